// schema/mod.rs - Schema 定义模块
//! 将调用方提供的 JSON 字段定义校验并编译为 tantivy Schema
//!
//! Schema 描述格式:
//! ```json
//! {
//!   "fields": [
//!     {"name": "id", "type": "text", "tokenizer": "raw"},
//!     {"name": "title", "type": "text"},
//!     {"name": "year", "type": "i64", "fast": true}
//!   ],
//!   "search_fields": ["title"]
//! }
//! ```

pub mod document;
pub mod fields;

pub use document::*;
pub use fields::*;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tantivy::Index;
use tantivy::schema::{
    Field, IndexRecordOption, NumericOptions, Schema, SchemaBuilder, TextFieldIndexing,
    TextOptions,
};
use tantivy_jieba::JiebaTokenizer;
use tracing::warn;

/// Schema 编译错误
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Malformed schema: {0}")]
    Malformed(String),

    #[error("Field #{0} has an empty name")]
    EmptyName(usize),

    #[error("Invalid field name '{0}': names must not start with '_' or '-'")]
    InvalidName(String),

    #[error("Duplicate field name: {0}")]
    DuplicateName(String),

    #[error("Tokenizer is only valid on text fields: {0}")]
    TokenizerOnNonText(String),

    #[error("Unknown search field: {0}")]
    UnknownSearchField(String),

    #[error("Search field must be an indexed text field: {0}")]
    InvalidSearchField(String),
}

/// 字段类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    I64,
    F64,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::I64 => "i64",
            FieldKind::F64 => "f64",
        }
    }
}

/// 文本字段的分词策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tokenizer {
    #[default]
    Default,
    /// 整串作为一个词项，用于 ID 等精确匹配字段
    Raw,
    #[serde(alias = "en_stem")]
    Stemmed,
    Jieba,
}

impl Tokenizer {
    /// 在 tantivy TokenizerManager 中注册的名称
    pub fn name(&self) -> &'static str {
        match self {
            Tokenizer::Default => TOKENIZER_DEFAULT,
            Tokenizer::Raw => TOKENIZER_RAW,
            Tokenizer::Stemmed => TOKENIZER_STEMMED,
            Tokenizer::Jieba => TOKENIZER_JIEBA,
        }
    }
}

fn default_true() -> bool {
    true
}

/// 单个字段定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: FieldKind,

    #[serde(default = "default_true")]
    pub stored: bool,

    #[serde(default = "default_true")]
    pub indexed: bool,

    /// 列式存储，范围查询必需
    #[serde(default)]
    pub fast: bool,

    /// 仅文本字段有效，缺省为 default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<Tokenizer>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            stored: true,
            indexed: true,
            fast: false,
            tokenizer: None,
        }
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::Text)
    }

    pub fn i64(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::I64)
    }

    pub fn f64(name: impl Into<String>) -> Self {
        Self::new(name, FieldKind::F64)
    }

    pub fn with_stored(mut self, stored: bool) -> Self {
        self.stored = stored;
        self
    }

    pub fn with_indexed(mut self, indexed: bool) -> Self {
        self.indexed = indexed;
        self
    }

    pub fn with_fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// 实际生效的分词器
    pub fn effective_tokenizer(&self) -> Tokenizer {
        self.tokenizer.unwrap_or_default()
    }

    /// 是否为经过分词的文本字段（短语查询的前提）
    pub fn is_tokenized(&self) -> bool {
        self.kind == FieldKind::Text && self.effective_tokenizer() != Tokenizer::Raw
    }
}

/// Schema 描述，即 `_schema.json` 的内容
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDef {
    pub fields: Vec<FieldDef>,

    /// 全文查询的默认目标字段
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_fields: Vec<String>,
}

impl SchemaDef {
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields, search_fields: Vec::new() }
    }

    pub fn with_search_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.search_fields = names.into_iter().map(Into::into).collect();
        self
    }
}

/// 编译后的字段：tantivy 字段句柄 + 原始定义
#[derive(Debug, Clone)]
pub struct CompiledField {
    pub field: Field,
    pub def: FieldDef,
}

/// 编译后的 Schema
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    def: SchemaDef,
    schema: Schema,
    fields: Vec<CompiledField>,
    by_name: HashMap<String, usize>,
    search_fields: Vec<Field>,
}

impl CompiledSchema {
    /// 从 JSON 文本解析并编译
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let def: SchemaDef =
            serde_json::from_str(json).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Self::compile(def)
    }

    /// 校验并编译字段定义；失败时不产生任何部分结果
    pub fn compile(def: SchemaDef) -> Result<Self, SchemaError> {
        validate(&def)?;

        let mut builder = SchemaBuilder::default();
        let mut fields = Vec::with_capacity(def.fields.len());
        let mut by_name = HashMap::with_capacity(def.fields.len());

        for (idx, fd) in def.fields.iter().enumerate() {
            let field = match fd.kind {
                FieldKind::Text => builder.add_text_field(&fd.name, text_options(fd)),
                FieldKind::I64 => builder.add_i64_field(&fd.name, numeric_options(fd)),
                FieldKind::F64 => builder.add_f64_field(&fd.name, numeric_options(fd)),
            };
            by_name.insert(fd.name.clone(), idx);
            fields.push(CompiledField { field, def: fd.clone() });
        }

        let search_fields = if def.search_fields.is_empty() {
            fields
                .iter()
                .filter(|f| f.def.indexed && f.def.is_tokenized())
                .map(|f| f.field)
                .collect()
        } else {
            def.search_fields
                .iter()
                .filter_map(|name| by_name.get(name).map(|&idx| fields[idx].field))
                .collect()
        };

        Ok(Self {
            schema: builder.build(),
            def,
            fields,
            by_name,
            search_fields,
        })
    }

    pub fn definition(&self) -> &SchemaDef {
        &self.def
    }

    pub fn tantivy_schema(&self) -> &Schema {
        &self.schema
    }

    /// 按声明顺序返回所有字段
    pub fn fields(&self) -> &[CompiledField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&CompiledField> {
        self.by_name.get(name).map(|&idx| &self.fields[idx])
    }

    /// 按 tantivy 字段句柄查找（字段 ID 与声明顺序一致）
    pub fn field_by_handle(&self, field: Field) -> Option<&CompiledField> {
        self.fields.get(field.field_id() as usize)
    }

    pub fn search_fields(&self) -> &[Field] {
        &self.search_fields
    }

    /// 序列化为持久化格式
    pub fn to_json(&self) -> Result<String, SchemaError> {
        serde_json::to_string_pretty(&self.def).map_err(|e| SchemaError::Malformed(e.to_string()))
    }
}

fn validate(def: &SchemaDef) -> Result<(), SchemaError> {
    let mut seen = HashSet::with_capacity(def.fields.len());
    for (idx, fd) in def.fields.iter().enumerate() {
        if fd.name.is_empty() {
            return Err(SchemaError::EmptyName(idx));
        }
        if fd.name.starts_with('_') || fd.name.starts_with('-') {
            return Err(SchemaError::InvalidName(fd.name.clone()));
        }
        if !seen.insert(fd.name.as_str()) {
            return Err(SchemaError::DuplicateName(fd.name.clone()));
        }
        if fd.tokenizer.is_some() && fd.kind != FieldKind::Text {
            return Err(SchemaError::TokenizerOnNonText(fd.name.clone()));
        }
        if !fd.stored && !fd.indexed {
            warn!(field = %fd.name, "field is neither stored nor indexed");
        }
    }

    for name in &def.search_fields {
        match def.fields.iter().find(|f| &f.name == name) {
            None => return Err(SchemaError::UnknownSearchField(name.clone())),
            Some(fd) if fd.kind != FieldKind::Text || !fd.indexed => {
                return Err(SchemaError::InvalidSearchField(name.clone()));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn text_options(fd: &FieldDef) -> TextOptions {
    let mut options = TextOptions::default();
    if fd.stored {
        options = options.set_stored();
    }
    if fd.indexed {
        let tokenizer = fd.effective_tokenizer();
        // raw 字段只有一个词项，不需要位置信息
        let record = if tokenizer == Tokenizer::Raw {
            IndexRecordOption::Basic
        } else {
            IndexRecordOption::WithFreqsAndPositions
        };
        options = options.set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(tokenizer.name())
                .set_index_option(record),
        );
    }
    if fd.fast {
        options = options.set_fast(None);
    }
    options
}

fn numeric_options(fd: &FieldDef) -> NumericOptions {
    let mut options = NumericOptions::default();
    if fd.stored {
        options = options.set_stored();
    }
    if fd.indexed {
        options = options.set_indexed();
    }
    if fd.fast {
        options = options.set_fast();
    }
    options
}

/// 注册内置之外的分词器到索引
pub fn register_tokenizers(index: &Index) {
    let tokenizer = JiebaTokenizer {};
    index.tokenizers().register(TOKENIZER_JIEBA, tokenizer);
}
