// engine/core.rs - 索引句柄核心
//! 持有已打开的索引，所有对引擎的调用都经过这里
//!
//! 生命周期: `create` / `open` -> `add_doc`* -> `commit` -> `search`* -> `close`。
//! 关闭后的任何调用都返回 `EngineError::Closed`。

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::time::Instant;

use tantivy::collector::{Count, TopDocs};
use tantivy::directory::error::LockError;
use tantivy::{Index, IndexReader, IndexWriter, TantivyDocument, TantivyError};
use tracing::{debug, info, warn};

use crate::api::{ResultMaterializer, SearchRequest, SearchResults};
use crate::config::AppConfig;
use crate::query::{QueryBuilder, QueryCompiler, QueryDef, QueryError};
use crate::schema::{CompiledSchema, DocumentError, SchemaError, TypedDocument};

/// 索引资源错误类型
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Tantivy error: {0}")]
    Tantivy(TantivyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("An index already exists at {0}")]
    IndexExists(String),

    #[error("No schema metadata found at {0}")]
    SchemaMissing(String),

    #[error("Persisted schema does not match the index at {0}")]
    SchemaMismatch(String),

    #[error("Index is locked by another writer: {0}")]
    LockBusy(String),

    #[error("Index was opened read-only")]
    ReadOnly,

    #[error("Index handle is closed")]
    Closed,

    #[error("Internal lock poisoned")]
    Poisoned,

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<TantivyError> for EngineError {
    fn from(err: TantivyError) -> Self {
        match err {
            TantivyError::LockFailure(LockError::LockBusy, msg) => {
                EngineError::LockBusy(msg.unwrap_or_else(|| "lock busy".to_string()))
            }
            other => EngineError::Tantivy(other),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// 已打开索引的内部状态，关闭时整体释放
pub(crate) struct OpenIndex {
    pub(crate) index: Index,
    pub(crate) reader: IndexReader,
    /// 只读打开时为 None
    pub(crate) writer: Option<RwLock<IndexWriter>>,
    pub(crate) schema: Arc<CompiledSchema>,
}

/// 索引句柄
///
/// 可在多个线程间共享：查询与计数只读取已提交的状态，
/// 写操作在内部的写锁上串行化。
pub struct SearchIndex {
    pub(crate) state: RwLock<Option<OpenIndex>>,
    pub(crate) path: PathBuf,
    pub(crate) config: Arc<AppConfig>,
}

impl SearchIndex {
    /// 在 `path` 创建新索引，使用全局配置
    pub fn create(path: impl AsRef<Path>, schema_json: &str) -> EngineResult<Self> {
        super::IndexBuilder::new()
            .with_path(path.as_ref())
            .create(schema_json)
    }

    /// 打开已有索引，Schema 从索引目录中的描述文件恢复
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        super::IndexBuilder::new().with_path(path.as_ref()).open()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前索引的 Schema
    pub fn schema(&self) -> EngineResult<Arc<CompiledSchema>> {
        let guard = self.read_state()?;
        Ok(Arc::clone(&open_state(&guard)?.schema))
    }

    /// 添加一个 JSON 文档，提交前不可见
    ///
    /// 转换失败时索引状态不变。
    pub fn add_doc(&self, doc_json: &str) -> EngineResult<()> {
        let guard = self.read_state()?;
        let state = open_state(&guard)?;
        let doc = TypedDocument::translate(&state.schema, doc_json, self.config.documents.strict)?;
        if !doc.ignored.is_empty() {
            debug!(keys = ?doc.ignored, "ignored unknown document keys");
        }
        Self::write(state, &doc)
    }

    /// 添加已经转换好的文档
    pub fn add_document(&self, doc: &TypedDocument) -> EngineResult<()> {
        let guard = self.read_state()?;
        Self::write(open_state(&guard)?, doc)
    }

    fn write(state: &OpenIndex, doc: &TypedDocument) -> EngineResult<()> {
        let writer = state.writer.as_ref().ok_or(EngineError::ReadOnly)?;
        let writer = writer.read().map_err(|_| EngineError::Poisoned)?;
        writer.add_document(doc.to_tantivy())?;
        Ok(())
    }

    /// 提交缓冲中的写入，并刷新 reader 使其可见
    pub fn commit(&self) -> EngineResult<()> {
        let start = Instant::now();
        let guard = self.read_state()?;
        let state = open_state(&guard)?;
        let writer = state.writer.as_ref().ok_or(EngineError::ReadOnly)?;

        let opstamp = {
            let mut writer = writer.write().map_err(|_| EngineError::Poisoned)?;
            writer.commit()?
        };
        state.reader.reload()?;

        info!(
            path = %self.path.display(),
            opstamp,
            took_ms = start.elapsed().as_millis() as u64,
            "index committed"
        );
        Ok(())
    }

    /// 丢弃上次提交之后缓冲的写入
    pub fn rollback(&self) -> EngineResult<()> {
        let guard = self.read_state()?;
        let state = open_state(&guard)?;
        let writer = state.writer.as_ref().ok_or(EngineError::ReadOnly)?;
        let mut writer = writer.write().map_err(|_| EngineError::Poisoned)?;
        writer.rollback()?;
        Ok(())
    }

    /// 已提交的文档数
    pub fn num_docs(&self) -> EngineResult<u64> {
        let guard = self.read_state()?;
        Ok(open_state(&guard)?.reader.searcher().num_docs())
    }

    /// 执行 JSON 查询
    pub fn search(&self, query_json: &str) -> EngineResult<SearchResults> {
        let request = SearchRequest::from_json(query_json)?;
        self.search_request(&request)
    }

    /// 使用默认分页执行查询
    pub fn search_query(&self, query: &QueryDef) -> EngineResult<SearchResults> {
        self.search_request(&SearchRequest::new(query.clone()))
    }

    pub fn search_request(&self, request: &SearchRequest) -> EngineResult<SearchResults> {
        let start = Instant::now();
        let guard = self.read_state()?;
        let state = open_state(&guard)?;

        let tree = QueryCompiler::new(&state.schema)
            .with_max_distance(self.config.search.max_fuzzy_distance)
            .compile(&request.query)?;
        let query = QueryBuilder::new(&state.index).build(&tree)?;
        let options = request.to_query_options(&self.config);

        let searcher = state.reader.searcher();
        let num_docs = searcher.num_docs() as usize;
        let mut hits = Vec::new();
        let total_count = if options.offset >= num_docs {
            // 偏移已越过全部文档，只计数
            searcher.search(&*query, &Count)?
        } else {
            // 收集器按 limit + offset 预分配，先截断到文档总数；limit 为 0 时取全部
            let limit = match options.limit {
                0 => num_docs,
                n => n.min(num_docs),
            };
            let collector = TopDocs::with_limit(limit.max(1)).and_offset(options.offset);
            let (total_count, top) = searcher.search(&*query, &(Count, collector))?;
            hits.reserve(top.len());
            for (score, address) in top {
                let doc: TantivyDocument = searcher.doc(address)?;
                hits.push((score, doc));
            }
            total_count
        };
        let results =
            ResultMaterializer::new(&state.schema).materialize(&hits, total_count, options);

        debug!(
            total = results.total_count,
            returned = results.count,
            took_ms = start.elapsed().as_millis() as u64,
            "search finished"
        );
        Ok(results)
    }

    /// 执行查询并序列化为 JSON 文本
    pub fn search_json(&self, query_json: &str) -> EngineResult<String> {
        self.search(query_json)?
            .to_json()
            .map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// 释放 writer 与 reader；之后的所有操作返回 `Closed`
    ///
    /// 未提交的写入会被丢弃。
    pub fn close(&self) -> EngineResult<()> {
        let mut guard = self.state.write().map_err(|_| EngineError::Poisoned)?;
        match guard.take() {
            Some(state) => {
                drop(state);
                info!(path = %self.path.display(), "index closed");
                Ok(())
            }
            None => Err(EngineError::Closed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.read().map(|s| s.is_none()).unwrap_or(true)
    }

    fn read_state(&self) -> EngineResult<RwLockReadGuard<'_, Option<OpenIndex>>> {
        self.state.read().map_err(|_| EngineError::Poisoned)
    }
}

impl Drop for SearchIndex {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if state.take().is_some() {
                debug!(path = %self.path.display(), "index handle dropped without close");
            }
        } else {
            warn!(path = %self.path.display(), "index state poisoned on drop");
        }
    }
}

fn open_state<'g>(
    guard: &'g RwLockReadGuard<'_, Option<OpenIndex>>,
) -> EngineResult<&'g OpenIndex> {
    guard.as_ref().ok_or(EngineError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::IndexBuilder;
    use crate::schema::{FieldDef, SchemaDef, Tokenizer};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    const MOVIE_SCHEMA: &str = r#"{
        "fields": [
            {"name": "id", "type": "text", "tokenizer": "raw"},
            {"name": "title", "type": "text"},
            {"name": "year", "type": "i64", "fast": true},
            {"name": "rating", "type": "f64", "fast": true}
        ],
        "search_fields": ["title"]
    }"#;

    fn movies(index: &SearchIndex) {
        let docs = [
            r#"{"id": "tt0111161", "title": "The Shawshank Redemption", "year": 1994, "rating": 9.3}"#,
            r#"{"id": "tt0068646", "title": "The Godfather", "year": 1972, "rating": 9.2}"#,
            r#"{"id": "tt0468569", "title": "The Dark Knight", "year": 2008, "rating": 9.0}"#,
            r#"{"id": "tt0137523", "title": "Fight Club", "year": 1999, "rating": 8.8}"#,
            r#"{"id": "tt0133093", "title": "The Matrix", "year": 1999, "rating": 8.7}"#,
            r#"{"id": "tt0167260", "title": "The Lord of the Rings: The Return of the King", "year": 2003, "rating": 9.0}"#,
        ];
        for doc in docs {
            index.add_doc(doc).unwrap();
        }
        index.commit().unwrap();
    }

    fn ids(results: &SearchResults) -> Vec<String> {
        let mut ids: Vec<String> = results
            .results
            .iter()
            .map(|r| r["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_add_commit_and_count() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();

        index.add_doc(r#"{"id": "a", "title": "x", "year": 1}"#).unwrap();
        assert_eq!(index.num_docs().unwrap(), 0);
        index.commit().unwrap();
        assert_eq!(index.num_docs().unwrap(), 1);
    }

    #[test]
    fn test_failed_document_leaves_index_unchanged() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();

        index.add_doc(r#"{"id": "a", "year": 1994}"#).unwrap();
        let err = index.add_doc(r#"{"id": "b", "year": "1994"}"#).unwrap_err();
        assert!(matches!(err, EngineError::Document(DocumentError::TypeMismatch { .. })));
        index.commit().unwrap();

        assert_eq!(index.num_docs().unwrap(), 1);
    }

    #[test]
    fn test_rollback_discards_buffered_documents() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();

        index.add_doc(r#"{"id": "a"}"#).unwrap();
        index.commit().unwrap();
        index.add_doc(r#"{"id": "b"}"#).unwrap();
        index.rollback().unwrap();
        index.commit().unwrap();

        assert_eq!(index.num_docs().unwrap(), 1);
    }

    #[test]
    fn test_text_and_phrase_search() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let results = index.search(r#"{"type": "text", "query": "godfather"}"#).unwrap();
        assert_eq!(ids(&results), vec!["tt0068646"]);

        let results = index.search(r#"{"type": "phrase", "phrase": "dark knight"}"#).unwrap();
        assert_eq!(ids(&results), vec!["tt0468569"]);

        let results = index.search(r#"{"type": "phrase", "phrase": "knight dark"}"#).unwrap();
        assert_eq!(results.count, 0);
    }

    #[test]
    fn test_fuzzy_search_distance() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let results =
            index.search(r#"{"type": "fuzzy", "term": "godfahter", "distance": 2}"#).unwrap();
        assert_eq!(ids(&results), vec!["tt0068646"]);

        let results =
            index.search(r#"{"type": "fuzzy", "term": "godfahter", "distance": 0}"#).unwrap();
        assert_eq!(results.count, 0);
    }

    #[test]
    fn test_prefix_search() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let results = index.search(r#"{"type": "prefix", "prefix": "Shaw"}"#).unwrap();
        assert_eq!(ids(&results), vec!["tt0111161"]);

        let results =
            index.search(r#"{"type": "prefix", "prefix": "tt01", "fields": ["id"]}"#).unwrap();
        assert_eq!(ids(&results), vec!["tt0111161", "tt0133093", "tt0137523", "tt0167260"]);
    }

    #[test]
    fn test_term_match_on_raw_field_is_exact() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let exact =
            index.search(r#"{"type": "term_match", "field": "id", "value": "tt0133093"}"#).unwrap();
        assert_eq!(ids(&exact), vec!["tt0133093"]);
        assert_eq!(exact.results[0]["_score"], json!(1.0));

        for probe in ["tt0133", "TT0133093", "0133093"] {
            let query = json!({"type": "term_match", "field": "id", "value": probe}).to_string();
            assert_eq!(index.search(&query).unwrap().count, 0, "probe {probe}");
        }
    }

    #[test]
    fn test_range_inclusive_bounds() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let results = index
            .search(r#"{"type": "range_i64", "field": "year", "min": 1994, "max": 2003}"#)
            .unwrap();
        assert_eq!(ids(&results), vec!["tt0111161", "tt0133093", "tt0137523", "tt0167260"]);

        let results =
            index.search(r#"{"type": "range_f64", "field": "rating", "min": 9.2}"#).unwrap();
        assert_eq!(ids(&results), vec!["tt0068646", "tt0111161"]);

        let results = index.search(r#"{"type": "range_i64", "field": "year"}"#).unwrap();
        assert_eq!(results.total_count, 6);
    }

    #[test]
    fn test_bool_must_not_ignores_sub_limit() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let query = json!({
            "type": "bool",
            "must": [{"type": "range_i64", "field": "year", "min": 1990}],
            "must_not": [
                {"type": "range_i64", "field": "year", "min": 1999, "max": 1999, "limit": 1}
            ]
        });
        let results = index.search(&query.to_string()).unwrap();
        assert_eq!(ids(&results), vec!["tt0111161", "tt0167260", "tt0468569"]);

        let only_not = json!({
            "type": "bool",
            "must_not": [{"type": "range_i64", "field": "year", "max": 1999}]
        });
        let results = index.search(&only_not.to_string()).unwrap();
        assert_eq!(ids(&results), vec!["tt0167260", "tt0468569"]);

        let results = index.search(r#"{"type": "bool"}"#).unwrap();
        assert_eq!(results.total_count, 0);
    }

    #[test]
    fn test_limit_offset_and_total() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let page = index.search(r#"{"type": "all", "limit": 4, "offset": 4}"#).unwrap();
        assert_eq!(page.count, 2);
        assert_eq!(page.total_count, 6);
        assert_eq!((page.limit, page.offset), (4, 4));

        let all = index.search(r#"{"type": "all", "limit": 0}"#).unwrap();
        assert_eq!(all.count, 6);
        assert_eq!(all.limit, 0);
    }

    #[test]
    fn test_oversized_pagination_is_clamped() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let huge_limit = index.search(r#"{"type": "all", "limit": 1000000000000}"#).unwrap();
        assert_eq!(huge_limit.count, 6);
        assert_eq!(huge_limit.limit, 1_000_000_000_000);

        let max_limit = index.search(r#"{"type": "all", "limit": 18446744073709551615}"#).unwrap();
        assert_eq!(max_limit.count, 6);

        let past_end = index
            .search(r#"{"type": "all", "offset": 18446744073709551615}"#)
            .unwrap();
        assert_eq!(past_end.count, 0);
        assert_eq!(past_end.total_count, 6);
        assert_eq!(past_end.offset, usize::MAX);

        let both = index
            .search(r#"{"type": "all", "limit": 18446744073709551615, "offset": 5}"#)
            .unwrap();
        assert_eq!(both.count, 1);
    }

    #[test]
    fn test_search_on_empty_index() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();

        let results = index.search(r#"{"type": "all", "limit": 0}"#).unwrap();
        assert_eq!((results.count, results.total_count), (0, 0));
    }

    #[test]
    fn test_add_typed_document_round_trips_stored_fields() {
        let dir = tempdir().unwrap();
        let def = SchemaDef::new(vec![
            FieldDef::text("id").with_tokenizer(Tokenizer::Raw),
            FieldDef::text("title"),
            FieldDef::i64("year").with_fast(true),
            FieldDef::f64("rating"),
        ])
        .with_search_fields(["title"]);
        let index = IndexBuilder::new()
            .with_path(dir.path().join("idx"))
            .create_with_def(def)
            .unwrap();
        let schema = index.schema().unwrap();

        let raw = json!({"id": "tt0113277", "title": "Heat", "year": 1995, "rating": 8.3});
        let doc = TypedDocument::translate(&schema, &raw.to_string(), false).unwrap();

        // 转换后的强类型值可以还原出原始文档
        let rebuilt: serde_json::Map<String, Value> = doc
            .values
            .iter()
            .map(|(field, value)| {
                let name = schema.field_by_handle(*field).unwrap().def.name.clone();
                (name, value.to_json())
            })
            .collect();
        assert_eq!(Value::Object(rebuilt), raw);

        index.add_document(&doc).unwrap();
        index.commit().unwrap();

        let results = index.search(r#"{"type": "text", "query": "heat"}"#).unwrap();
        assert_eq!(results.count, 1);
        let mut row = results.results[0].clone();
        row.as_object_mut().unwrap().remove("_score");
        assert_eq!(row, raw);
    }

    #[test]
    fn test_query_errors_surface() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();

        let err = index.search(r#"{"type": "nearest", "vector": []}"#).unwrap_err();
        assert!(matches!(err, EngineError::Query(QueryError::UnknownType(_))));

        let err =
            index.search(r#"{"type": "phrase", "phrase": "a b", "fields": ["id"]}"#).unwrap_err();
        assert!(matches!(err, EngineError::Query(QueryError::PhraseOnRawField(_))));
    }

    #[test]
    fn test_stored_fields_round_trip() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        let doc = json!({"id": "x1", "title": "Heat", "year": 1995, "rating": 8.3});
        index.add_doc(&doc.to_string()).unwrap();
        index.commit().unwrap();

        let results = index.search(r#"{"type": "all"}"#).unwrap();
        let mut row = results.results[0].clone();
        row.as_object_mut().unwrap().remove("_score");
        assert_eq!(row, doc);
    }

    #[test]
    fn test_operations_after_close_fail() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        index.close().unwrap();

        assert!(index.is_closed());
        assert!(matches!(index.add_doc(r#"{"id": "a"}"#), Err(EngineError::Closed)));
        assert!(matches!(index.commit(), Err(EngineError::Closed)));
        assert!(matches!(index.num_docs(), Err(EngineError::Closed)));
        assert!(matches!(index.search(r#"{"type": "all"}"#), Err(EngineError::Closed)));
        assert!(matches!(index.close(), Err(EngineError::Closed)));
    }

    #[test]
    fn test_strict_documents_config() {
        let dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.documents.strict = true;
        let index = IndexBuilder::new()
            .with_config(Arc::new(config))
            .with_path(dir.path().join("idx"))
            .create(MOVIE_SCHEMA)
            .unwrap();

        let err = index.add_doc(r#"{"id": "a", "director": "Mann"}"#).unwrap_err();
        assert!(matches!(err, EngineError::Document(DocumentError::UnknownField(_))));
    }

    #[test]
    fn test_results_serialize_to_wire_format() {
        let dir = tempdir().unwrap();
        let index = SearchIndex::create(dir.path().join("idx"), MOVIE_SCHEMA).unwrap();
        movies(&index);

        let json =
            index.search_json(r#"{"type": "term_match", "field": "year", "value": 1972}"#).unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["count"], 1);
        assert_eq!(value["total_count"], 1);
        assert_eq!(value["limit"], 100);
        assert_eq!(value["offset"], 0);
        assert_eq!(value["results"][0]["title"], "The Godfather");
    }
}
