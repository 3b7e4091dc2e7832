// src/lib.rs
pub mod api;
pub mod config;
pub mod engine;
pub mod ffi;
pub mod query;
pub mod registry;
pub mod schema;

pub use api::{SearchRequest, SearchResults};
pub use config::{AppConfig, CONFIG};
pub use engine::{EngineError, EngineResult, IndexBuilder, SearchIndex};
pub use query::{QueryDef, QueryError};
pub use schema::{
    CompiledSchema, DocumentError, FieldDef, FieldKind, SchemaDef, SchemaError, Tokenizer,
    TypedDocument,
};
