// engine/builder.rs - 索引句柄构建器
//! 使用 Builder 模式创建或打开 SearchIndex

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tantivy::{Index, IndexReader, ReloadPolicy};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, CONFIG};
use crate::schema::{self, CompiledSchema, INDEX_META_FILE, MANAGED_FILE, SchemaDef};

use super::core::{EngineError, EngineResult, OpenIndex, SearchIndex};

/// 索引构建器
#[derive(Default)]
pub struct IndexBuilder {
    config: Option<Arc<AppConfig>>,
    path: Option<PathBuf>,
    heap_size: Option<usize>,
    read_only: bool,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置配置，缺省使用全局配置
    pub fn with_config(mut self, config: Arc<AppConfig>) -> Self {
        self.config = Some(config);
        self
    }

    /// 设置索引目录
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// 设置 IndexWriter 堆大小，覆盖配置中的 writer_memory
    pub fn with_heap_size(mut self, size: usize) -> Self {
        self.heap_size = Some(size);
        self
    }

    /// 只读打开：不获取写锁，写操作返回 `ReadOnly`
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// 用 JSON Schema 描述创建新索引
    ///
    /// Schema 在触碰磁盘之前完成校验；目录中已有索引时失败。
    pub fn create(self, schema_json: &str) -> EngineResult<SearchIndex> {
        let schema = CompiledSchema::from_json(schema_json)?;
        self.create_with_schema(schema)
    }

    pub fn create_with_def(self, def: SchemaDef) -> EngineResult<SearchIndex> {
        let schema = CompiledSchema::compile(def)?;
        self.create_with_schema(schema)
    }

    fn create_with_schema(self, schema: CompiledSchema) -> EngineResult<SearchIndex> {
        let config = self.resolve_config();
        let path = self.resolve_path()?;
        let sidecar = path.join(&config.index.schema_file);

        if sidecar.exists() || path.join(INDEX_META_FILE).exists() {
            return Err(EngineError::IndexExists(path.display().to_string()));
        }

        let mut cleanup = CreateGuard::new(&path, &sidecar);
        fs::create_dir_all(&path)?;

        let index = Index::create_in_dir(&path, schema.tantivy_schema().clone())?;
        schema::register_tokenizers(&index);
        write_atomic(&sidecar, &schema.to_json()?)?;

        let heap_size = self.heap_size.unwrap_or(config.index.writer_memory);
        let writer = index.writer(heap_size)?;
        let reader = reader_for(&index, ReloadPolicy::Manual)?;
        cleanup.disarm();

        info!(
            path = %path.display(),
            fields = schema.fields().len(),
            "index created"
        );

        Ok(SearchIndex {
            state: RwLock::new(Some(OpenIndex {
                index,
                reader,
                writer: Some(RwLock::new(writer)),
                schema: Arc::new(schema),
            })),
            path,
            config,
        })
    }

    /// 打开已有索引，从描述文件恢复 Schema 并与索引元数据核对
    pub fn open(self) -> EngineResult<SearchIndex> {
        let config = self.resolve_config();
        let path = self.resolve_path()?;
        let sidecar = path.join(&config.index.schema_file);

        if !sidecar.is_file() {
            return Err(EngineError::SchemaMissing(path.display().to_string()));
        }
        let schema = CompiledSchema::from_json(&fs::read_to_string(&sidecar)?)?;

        let index = Index::open_in_dir(&path)?;
        if !same_schema(&index, &schema)? {
            return Err(EngineError::SchemaMismatch(path.display().to_string()));
        }
        schema::register_tokenizers(&index);

        let (writer, reader) = if self.read_only {
            (None, reader_for(&index, ReloadPolicy::OnCommitWithDelay)?)
        } else {
            let heap_size = self.heap_size.unwrap_or(config.index.writer_memory);
            let writer = index.writer(heap_size)?;
            (Some(RwLock::new(writer)), reader_for(&index, ReloadPolicy::Manual)?)
        };

        info!(
            path = %path.display(),
            read_only = self.read_only,
            docs = reader.searcher().num_docs(),
            "index opened"
        );

        Ok(SearchIndex {
            state: RwLock::new(Some(OpenIndex {
                index,
                reader,
                writer,
                schema: Arc::new(schema),
            })),
            path,
            config,
        })
    }

    fn resolve_config(&self) -> Arc<AppConfig> {
        self.config
            .clone()
            .unwrap_or_else(|| Arc::new((*CONFIG).clone()))
    }

    fn resolve_path(&self) -> EngineResult<PathBuf> {
        self.path
            .clone()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "index path not set").into())
    }
}

fn reader_for(index: &Index, policy: ReloadPolicy) -> EngineResult<IndexReader> {
    Ok(index.reader_builder().reload_policy(policy).try_into()?)
}

fn same_schema(index: &Index, schema: &CompiledSchema) -> EngineResult<bool> {
    let on_disk = serde_json::to_value(index.schema())
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    let declared = serde_json::to_value(schema.tantivy_schema())
        .map_err(|e| EngineError::Serialization(e.to_string()))?;
    Ok(on_disk == declared)
}

/// 先写临时文件再改名，避免留下半截的描述文件
fn write_atomic(path: &Path, content: &str) -> io::Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// 创建失败时撤销本次调用写入的内容
///
/// 目录由本次调用新建时整体删除；目录原本就存在时只删除写入的文件。
struct CreateGuard {
    armed: bool,
    dir: PathBuf,
    created_dir: bool,
    files: Vec<PathBuf>,
}

impl CreateGuard {
    fn new(dir: &Path, sidecar: &Path) -> Self {
        Self {
            armed: true,
            dir: dir.to_path_buf(),
            created_dir: !dir.exists(),
            files: vec![
                dir.join(INDEX_META_FILE),
                dir.join(MANAGED_FILE),
                sidecar.to_path_buf(),
                tmp_path(sidecar),
            ],
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CreateGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        debug!(path = %self.dir.display(), "removing partially created index");
        if self.created_dir {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                warn!(path = %self.dir.display(), error = %e, "failed to clean up index directory");
            }
            return;
        }
        for file in &self.files {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to clean up index file")
                }
            }
        }
    }
}
