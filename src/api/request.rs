// api/request.rs - 搜索请求类型
//! 查询 DSL 外层：查询本体 + 分页参数

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::AppConfig;
use crate::query::{QueryDef, QueryError, QueryOptions};

/// 搜索请求
///
/// ```json
/// {"type": "range_i64", "field": "year", "min": 1990, "max": 2000, "limit": 10}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(flatten)]
    pub query: QueryDef,

    /// 返回结果数量限制，缺省取配置值，0 表示不限制
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// 跳过的结果数量（用于分页）
    #[serde(default)]
    pub offset: usize,
}

impl SearchRequest {
    pub fn new(query: QueryDef) -> Self {
        Self { query, limit: None, offset: 0 }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// 从 JSON 文本解析，未知的 `type` 返回 `QueryError::UnknownType`
    pub fn from_json(json: &str) -> Result<Self, QueryError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| QueryError::Malformed(e.to_string()))?;
        QueryDef::check_types(&value)?;
        serde_json::from_value(value).map_err(|e| QueryError::Malformed(e.to_string()))
    }

    /// 转换为内部 QueryOptions
    pub fn to_query_options(&self, config: &AppConfig) -> QueryOptions {
        let requested = self.limit.unwrap_or(config.search.default_limit);
        QueryOptions {
            limit: config.effective_limit(requested),
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_pagination() {
        let request = SearchRequest::from_json(
            r#"{"type": "text", "query": "batman", "limit": 5, "offset": 10}"#,
        )
        .unwrap();
        assert_eq!(request.limit, Some(5));
        assert_eq!(request.offset, 10);
        assert!(matches!(request.query, QueryDef::Text { ref query, .. } if query == "batman"));

        let options = request.to_query_options(&AppConfig::default());
        assert_eq!(options, QueryOptions { limit: 5, offset: 10 });
    }

    #[test]
    fn test_default_limit_from_config() {
        let request = SearchRequest::from_json(r#"{"type": "all"}"#).unwrap();
        let mut config = AppConfig::default();
        config.search.default_limit = 7;
        assert_eq!(request.to_query_options(&config).limit, 7);
    }

    #[test]
    fn test_zero_limit_means_no_cap() {
        let request = SearchRequest::from_json(r#"{"type": "all", "limit": 0}"#).unwrap();
        assert_eq!(request.to_query_options(&AppConfig::default()).limit, 0);
    }

    #[test]
    fn test_negative_limit_rejected() {
        let err = SearchRequest::from_json(r#"{"type": "all", "limit": -1}"#).unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn test_unknown_type() {
        let err = SearchRequest::from_json(r#"{"type": "regex", "pattern": "a.*"}"#).unwrap_err();
        assert!(matches!(err, QueryError::UnknownType(t) if t == "regex"));
    }

    #[test]
    fn test_round_trip_through_json() {
        let request = SearchRequest::new(QueryDef::RangeI64 {
            field: "year".into(),
            min: Some(1990),
            max: None,
        })
        .with_limit(3);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(SearchRequest::from_json(&json).unwrap(), request);
    }
}
