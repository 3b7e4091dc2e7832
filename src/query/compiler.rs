// query/compiler.rs - 查询编译器
//! 将 `QueryDef` 按 Schema 校验并编译为 `QueryTree`，不做任何 I/O
//!
//! 校验规则:
//! - text / fuzzy / phrase / prefix: 默认作用于 Schema 的 search_fields，
//!   也可用 `fields` 指定，指定的字段必须是已索引的文本字段
//! - phrase: 目标字段不能是 raw 分词
//! - term_match: 字段必须已索引，值类型与字段类型一致
//! - range_i64 / range_f64: 字段类型一致且为 fast 字段
//! - bool: 子查询独立编译；三个列表都为空时不匹配任何文档

use serde_json::Value;
use tracing::warn;

use tantivy::schema::Field;

use super::QueryError;
use super::types::*;
use crate::config::FUZZY_DISTANCE_CAP;
use crate::schema::{CompiledField, CompiledSchema, FieldKind, Tokenizer};
use crate::schema::document::json_kind;

/// 短词（字符数不超过该值）的编辑距离最多为 1，避免过度匹配
const SHORT_WORD_LEN: usize = 5;

/// 查询编译器
pub struct QueryCompiler<'a> {
    schema: &'a CompiledSchema,
    max_distance: u8,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(schema: &'a CompiledSchema) -> Self {
        Self { schema, max_distance: FUZZY_DISTANCE_CAP }
    }

    /// 设置模糊查询允许的最大编辑距离（不会超过硬上限）
    pub fn with_max_distance(mut self, distance: u8) -> Self {
        self.max_distance = distance.min(FUZZY_DISTANCE_CAP);
        self
    }

    pub fn compile(&self, def: &QueryDef) -> Result<QueryTree, QueryError> {
        match def {
            QueryDef::Text { query, fields } => Ok(QueryTree::Text {
                query: query.clone(),
                fields: self.text_fields(fields)?,
            }),
            QueryDef::Fuzzy { term, distance, fields } => {
                self.compile_fuzzy(term, *distance, fields)
            }
            QueryDef::Phrase { phrase, fields } => self.compile_phrase(phrase, fields),
            QueryDef::Prefix { prefix, fields } => self.compile_prefix(prefix, fields),
            QueryDef::TermMatch { field, value } => self.compile_term(field, value),
            QueryDef::RangeI64 { field, min, max } => {
                let field = self.range_field(field, FieldKind::I64)?;
                check_bounds(*min, *max)?;
                Ok(QueryTree::RangeI64 { field, min: *min, max: *max })
            }
            QueryDef::RangeF64 { field, min, max } => {
                let field = self.range_field(field, FieldKind::F64)?;
                check_bounds(*min, *max)?;
                Ok(QueryTree::RangeF64 { field, min: *min, max: *max })
            }
            QueryDef::Bool { must, should, must_not } => {
                if must.is_empty() && should.is_empty() && must_not.is_empty() {
                    warn!("bool query without clauses matches nothing");
                    return Ok(QueryTree::Nothing);
                }
                Ok(QueryTree::Bool {
                    must: self.compile_all(must)?,
                    should: self.compile_all(should)?,
                    must_not: self.compile_all(must_not)?,
                })
            }
            QueryDef::All {} => Ok(QueryTree::All),
        }
    }

    fn compile_all(&self, defs: &[QueryDef]) -> Result<Vec<QueryTree>, QueryError> {
        defs.iter().map(|d| self.compile(d)).collect()
    }

    fn compile_fuzzy(
        &self,
        term: &str,
        distance: u8,
        fields: &[String],
    ) -> Result<QueryTree, QueryError> {
        if distance > self.max_distance {
            return Err(QueryError::InvalidParameter {
                name: "distance",
                reason: format!("{} exceeds the maximum of {}", distance, self.max_distance),
            });
        }
        let fields = self.text_fields(fields)?;

        let words: Vec<FuzzyWord> = term
            .split_whitespace()
            .map(|w| w.to_lowercase().chars().filter(|c| c.is_alphanumeric()).collect::<String>())
            .filter(|w| w.chars().count() > 1)
            .map(|text| {
                let distance = if text.chars().count() <= SHORT_WORD_LEN {
                    distance.min(1)
                } else {
                    distance
                };
                FuzzyWord { text, distance }
            })
            .collect();

        if words.is_empty() {
            return Ok(QueryTree::Nothing);
        }
        Ok(QueryTree::Fuzzy { words, fields })
    }

    fn compile_phrase(&self, phrase: &str, fields: &[String]) -> Result<QueryTree, QueryError> {
        let fields = self.text_fields(fields)?;
        for field in &fields {
            let compiled = self.by_handle(*field)?;
            if !compiled.def.is_tokenized() {
                return Err(QueryError::PhraseOnRawField(compiled.def.name.clone()));
            }
        }
        if phrase.trim().is_empty() {
            return Ok(QueryTree::Nothing);
        }
        Ok(QueryTree::Phrase { phrase: phrase.to_string(), fields })
    }

    fn compile_prefix(&self, prefix: &str, fields: &[String]) -> Result<QueryTree, QueryError> {
        if prefix.is_empty() {
            return Err(QueryError::InvalidParameter {
                name: "prefix",
                reason: "must not be empty".to_string(),
            });
        }
        let clauses = self
            .text_fields(fields)?
            .into_iter()
            .map(|field| {
                let compiled = self.by_handle(field)?;
                // raw 字段保留原始大小写
                let prefix = if compiled.def.effective_tokenizer() == Tokenizer::Raw {
                    prefix.to_string()
                } else {
                    prefix.to_lowercase()
                };
                Ok(PrefixClause { field, prefix })
            })
            .collect::<Result<Vec<_>, QueryError>>()?;
        Ok(QueryTree::Prefix { clauses })
    }

    fn compile_term(&self, name: &str, raw: &Value) -> Result<QueryTree, QueryError> {
        let compiled = self.lookup(name)?;
        if !compiled.def.indexed {
            return Err(QueryError::NotIndexed(name.to_string()));
        }
        let mismatch = || QueryError::TypeMismatch {
            field: name.to_string(),
            expected: compiled.def.kind.as_str(),
            actual: json_kind(raw),
        };
        let value = match (compiled.def.kind, raw) {
            (FieldKind::Text, Value::String(s)) => TermValue::Text(s.clone()),
            (FieldKind::I64, Value::Number(n)) => TermValue::I64(n.as_i64().ok_or_else(mismatch)?),
            (FieldKind::F64, Value::Number(n)) => TermValue::F64(n.as_f64().ok_or_else(mismatch)?),
            _ => return Err(mismatch()),
        };
        Ok(QueryTree::TermMatch { field: compiled.field, value })
    }

    fn range_field(&self, name: &str, kind: FieldKind) -> Result<Field, QueryError> {
        let compiled = self.lookup(name)?;
        if compiled.def.kind != kind {
            return Err(QueryError::TypeMismatch {
                field: name.to_string(),
                expected: kind.as_str(),
                actual: compiled.def.kind.as_str(),
            });
        }
        if !compiled.def.fast {
            return Err(QueryError::NotFast(name.to_string()));
        }
        Ok(compiled.field)
    }

    /// 解析全文类查询的目标字段
    fn text_fields(&self, names: &[String]) -> Result<Vec<Field>, QueryError> {
        if names.is_empty() {
            let fields = self.schema.search_fields().to_vec();
            if fields.is_empty() {
                return Err(QueryError::NoSearchFields);
            }
            return Ok(fields);
        }

        names
            .iter()
            .map(|name| {
                let compiled = self.lookup(name)?;
                if compiled.def.kind != FieldKind::Text {
                    return Err(QueryError::TypeMismatch {
                        field: name.clone(),
                        expected: FieldKind::Text.as_str(),
                        actual: compiled.def.kind.as_str(),
                    });
                }
                if !compiled.def.indexed {
                    return Err(QueryError::NotIndexed(name.clone()));
                }
                Ok(compiled.field)
            })
            .collect()
    }

    fn lookup(&self, name: &str) -> Result<&'a CompiledField, QueryError> {
        self.schema.field(name).ok_or_else(|| QueryError::UnknownField(name.to_string()))
    }

    fn by_handle(&self, field: Field) -> Result<&'a CompiledField, QueryError> {
        self.schema
            .field_by_handle(field)
            .ok_or_else(|| QueryError::UnknownField(format!("#{}", field.field_id())))
    }
}

fn check_bounds<T: PartialOrd + std::fmt::Display>(
    min: Option<T>,
    max: Option<T>,
) -> Result<(), QueryError> {
    match (min, max) {
        (Some(lo), Some(hi)) if lo > hi => Err(QueryError::InvalidParameter {
            name: "min",
            reason: format!("{} is greater than max {}", lo, hi),
        }),
        _ => Ok(()),
    }
}
