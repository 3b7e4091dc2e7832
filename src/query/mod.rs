// query/mod.rs - 查询模块
//! 查询 DSL 的解析、编译和到引擎查询的构建

mod compiler;
pub mod builder;
pub mod types;

pub use compiler::*;
pub use builder::*;
pub use types::*;

/// 查询编译错误
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Malformed query: {0}")]
    Malformed(String),

    #[error("Unknown query type: {0}")]
    UnknownType(String),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Type mismatch on field '{field}': expected {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Field is not indexed: {0}")]
    NotIndexed(String),

    #[error("Range query requires a fast field: {0}")]
    NotFast(String),

    #[error("Phrase query on raw-tokenized field: {0}")]
    PhraseOnRawField(String),

    #[error("No search fields available for full-text query")]
    NoSearchFields,

    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Query parse error: {0}")]
    Parse(String),
}
