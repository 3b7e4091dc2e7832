// api/response.rs - 搜索响应类型
//! 定义搜索结果的结构化响应类型，以及从引擎文档到结果行的转换

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tantivy::TantivyDocument;
use tantivy::schema::Value as _;

use crate::query::QueryOptions;
use crate::schema::{CompiledSchema, FieldKind, SCORE_KEY};

/// 搜索响应
///
/// 线格式: `{results: [...], count, total_count, limit, offset}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    /// 结果行：存储字段名 -> 值，另含 `_score`
    pub results: Vec<Value>,

    /// 实际返回的行数
    pub count: usize,

    /// 总匹配数（不考虑分页）
    pub total_count: usize,

    /// 请求的 limit，0 表示不限制
    pub limit: usize,

    pub offset: usize,
}

impl SearchResults {
    pub fn new(results: Vec<Value>, total_count: usize, options: QueryOptions) -> Self {
        Self {
            count: results.len(),
            results,
            total_count,
            limit: options.limit,
            offset: options.offset,
        }
    }

    /// 是否还有下一页
    pub fn has_more(&self) -> bool {
        self.total_count > self.offset + self.count
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 结果转换器：只输出 Schema 中声明为 stored 的字段
pub struct ResultMaterializer<'a> {
    schema: &'a CompiledSchema,
}

impl<'a> ResultMaterializer<'a> {
    pub fn new(schema: &'a CompiledSchema) -> Self {
        Self { schema }
    }

    /// 将单个命中文档转换为结果行
    pub fn row(&self, doc: &TantivyDocument, score: f32) -> Value {
        let mut row = Map::new();
        for compiled in self.schema.fields().iter().filter(|f| f.def.stored) {
            let Some(value) = doc.get_first(compiled.field) else {
                continue;
            };
            let json = match compiled.def.kind {
                FieldKind::Text => value.as_str().map(|s| Value::String(s.to_string())),
                FieldKind::I64 => value.as_i64().map(Value::from),
                FieldKind::F64 => value.as_f64().map(Value::from),
            };
            if let Some(json) = json {
                row.insert(compiled.def.name.clone(), json);
            }
        }
        row.insert(SCORE_KEY.to_string(), Value::from(score));
        Value::Object(row)
    }

    pub fn materialize(
        &self,
        hits: &[(f32, TantivyDocument)],
        total_count: usize,
        options: QueryOptions,
    ) -> SearchResults {
        let results = hits.iter().map(|(score, doc)| self.row(doc, *score)).collect();
        SearchResults::new(results, total_count, options)
    }
}
