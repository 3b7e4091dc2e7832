// 配置模块 - 支持外部配置文件
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::schema::SCHEMA_FILE;

/// 默认配置文件路径
const CONFIG_FILE: &str = "./jsonsearch.toml";
/// 指定配置文件路径的环境变量
const CONFIG_ENV: &str = "JSONSEARCH_CONFIG";

// ============== 配置结构体 ==============

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub index: IndexConfig,
    pub search: SearchConfig,
    pub documents: DocumentConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct IndexConfig {
    /// IndexWriter 内存预算（字节）
    pub writer_memory: usize,
    /// Schema 描述文件名
    pub schema_file: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// 查询未指定 limit 时的默认值
    pub default_limit: usize,
    /// limit 上限，0 表示不限制
    pub max_limit: usize,
    /// 模糊查询允许的最大编辑距离（不超过 2）
    pub max_fuzzy_distance: u8,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct DocumentConfig {
    /// 为 true 时拒绝 Schema 之外的键，否则忽略
    pub strict: bool,
}

// ============== 默认配置 ==============

/// 编辑距离的硬上限
pub const FUZZY_DISTANCE_CAP: u8 = 2;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            documents: DocumentConfig::default(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            writer_memory: 50_000_000,
            schema_file: SCHEMA_FILE.to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 0,
            max_fuzzy_distance: FUZZY_DISTANCE_CAP,
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self { strict: false }
    }
}

// ============== 配置加载 ==============

impl AppConfig {
    /// 从配置文件加载，失败则使用默认配置
    pub fn load() -> Self {
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| CONFIG_FILE.to_string());
        if !Path::new(&path).exists() {
            return Self::default();
        }
        Self::load_from_file(&path).unwrap_or_else(|e| {
            warn!(path = %path, error = %e, "failed to load config, using defaults");
            Self::default()
        })
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config: AppConfig = toml::from_str(content)?;
        config.search.max_fuzzy_distance = config.search.max_fuzzy_distance.min(FUZZY_DISTANCE_CAP);
        Ok(config)
    }

    /// 生效的 limit：0 表示不限制，再按 max_limit 截断
    pub fn effective_limit(&self, requested: usize) -> usize {
        match (requested, self.search.max_limit) {
            (_, 0) => requested,
            (0, max) => max,
            (n, max) => n.min(max),
        }
    }
}

// ============== 全局配置实例 ==============

/// 全局配置实例 (懒加载)
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    let config = AppConfig::load();
    info!(
        writer_memory = config.index.writer_memory,
        default_limit = config.search.default_limit,
        strict_documents = config.documents.strict,
        "config loaded"
    );
    config
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [search]
            default_limit = 20
            max_fuzzy_distance = 5

            [documents]
            strict = true
            "#,
        )
        .unwrap();

        assert_eq!(config.search.default_limit, 20);
        assert_eq!(config.search.max_fuzzy_distance, FUZZY_DISTANCE_CAP);
        assert!(config.documents.strict);
        assert_eq!(config.index, IndexConfig::default());
    }

    #[test]
    fn test_effective_limit() {
        let mut config = AppConfig::default();
        assert_eq!(config.effective_limit(0), 0);
        assert_eq!(config.effective_limit(500), 500);

        config.search.max_limit = 50;
        assert_eq!(config.effective_limit(0), 50);
        assert_eq!(config.effective_limit(10), 10);
        assert_eq!(config.effective_limit(500), 50);
    }
}
