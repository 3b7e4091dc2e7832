// query/types.rs - 查询相关类型定义
//! 查询 DSL 的线格式（`QueryDef`）与编译后的查询树（`QueryTree`）

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tantivy::schema::Field;

use super::QueryError;

/// DSL 支持的查询类型
pub const QUERY_TYPES: &[&str] = &[
    "text", "fuzzy", "phrase", "prefix", "term_match", "range_i64", "range_f64", "bool", "all",
];

fn default_distance() -> u8 {
    2
}

/// 查询 DSL，按 `type` 字段区分
///
/// 分页参数（limit / offset）在外层的 `SearchRequest` 中；
/// bool 子查询里出现的 limit 会被忽略。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryDef {
    /// 全文查询，使用引擎的查询语法
    Text {
        query: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },
    /// 模糊匹配，每个词都需要命中
    Fuzzy {
        term: String,
        #[serde(default = "default_distance")]
        distance: u8,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },
    Phrase {
        phrase: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },
    Prefix {
        prefix: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fields: Vec<String>,
    },
    /// 精确词项匹配，不经过分词
    TermMatch {
        field: String,
        value: Value,
    },
    #[serde(rename = "range_i64")]
    RangeI64 {
        field: String,
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    #[serde(rename = "range_f64")]
    RangeF64 {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Bool {
        #[serde(default)]
        must: Vec<QueryDef>,
        #[serde(default)]
        should: Vec<QueryDef>,
        #[serde(default)]
        must_not: Vec<QueryDef>,
    },
    All {},
}

impl QueryDef {
    /// 校验 JSON 中所有层级的 `type` 判别字段
    pub fn check_types(value: &Value) -> Result<(), QueryError> {
        let Some(obj) = value.as_object() else {
            return Err(QueryError::Malformed("query must be a JSON object".to_string()));
        };
        match obj.get("type") {
            Some(Value::String(t)) if QUERY_TYPES.contains(&t.as_str()) => {}
            Some(Value::String(t)) => return Err(QueryError::UnknownType(t.clone())),
            Some(_) => return Err(QueryError::Malformed("`type` must be a string".to_string())),
            None => return Err(QueryError::Malformed("missing field `type`".to_string())),
        }
        for key in ["must", "should", "must_not"] {
            if let Some(Value::Array(subs)) = obj.get(key) {
                for sub in subs {
                    Self::check_types(sub)?;
                }
            }
        }
        Ok(())
    }
}

/// 模糊查询中的单个词及其生效编辑距离
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyWord {
    pub text: String,
    pub distance: u8,
}

/// 前缀查询在单个字段上的子句
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixClause {
    pub field: Field,
    pub prefix: String,
}

/// 精确匹配的值，类型已与字段对齐
#[derive(Debug, Clone, PartialEq)]
pub enum TermValue {
    Text(String),
    I64(i64),
    F64(f64),
}

/// 编译后的查询树，字段引用已解析为引擎字段句柄
#[derive(Debug, Clone, PartialEq)]
pub enum QueryTree {
    Text { query: String, fields: Vec<Field> },
    Fuzzy { words: Vec<FuzzyWord>, fields: Vec<Field> },
    Phrase { phrase: String, fields: Vec<Field> },
    Prefix { clauses: Vec<PrefixClause> },
    TermMatch { field: Field, value: TermValue },
    RangeI64 { field: Field, min: Option<i64>, max: Option<i64> },
    RangeF64 { field: Field, min: Option<f64>, max: Option<f64> },
    Bool {
        must: Vec<QueryTree>,
        should: Vec<QueryTree>,
        must_not: Vec<QueryTree>,
    },
    All,
    /// 不匹配任何文档
    Nothing,
}

/// 查询选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    /// 返回数量限制，0 表示不限制
    pub limit: usize,
    /// 偏移量（分页）
    pub offset: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { limit: 100, offset: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_each_kind() {
        let cases = vec![
            (json!({"type": "text", "query": "batman"}), "text"),
            (json!({"type": "fuzzy", "term": "godfahter"}), "fuzzy"),
            (json!({"type": "range_i64", "field": "year", "min": 1990}), "range_i64"),
            (json!({"type": "range_f64", "field": "rating", "max": 9}), "range_f64"),
            (json!({"type": "all", "limit": 5}), "all"),
        ];
        for (value, kind) in cases {
            QueryDef::check_types(&value).unwrap();
            let def: QueryDef = serde_json::from_value(value).unwrap();
            let encoded = serde_json::to_value(&def).unwrap();
            assert_eq!(encoded["type"], kind);
        }
    }

    #[test]
    fn test_fuzzy_distance_default() {
        let def: QueryDef = serde_json::from_value(json!({"type": "fuzzy", "term": "x"})).unwrap();
        assert!(matches!(def, QueryDef::Fuzzy { distance: 2, .. }));
    }

    #[test]
    fn test_unknown_type_in_nested_bool() {
        let value = json!({
            "type": "bool",
            "must": [{"type": "all"}],
            "should": [{"type": "wildcard", "pattern": "*"}]
        });
        let err = QueryDef::check_types(&value).unwrap_err();
        assert!(matches!(err, QueryError::UnknownType(t) if t == "wildcard"));
    }

    #[test]
    fn test_missing_type() {
        let err = QueryDef::check_types(&json!({"query": "x"})).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }
}
