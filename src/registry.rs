// registry.rs - 索引句柄注册表
// C 边界只传递整数句柄，通过注册表解析为 SearchIndex，
// 已释放或未知的句柄查不到对象，不会访问已释放的内存

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use tracing::debug;

use crate::engine::SearchIndex;

/// 进程级句柄注册表
pub static REGISTRY: Lazy<HandleRegistry> = Lazy::new(HandleRegistry::new);

/// 句柄注册表 - 线程安全的句柄到索引映射
#[derive(Clone)]
pub struct HandleRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

struct RegistryInner {
    /// 句柄 -> 索引
    indexes: HashMap<u64, Arc<SearchIndex>>,
    /// 下一个句柄，从 1 开始，0 保留为失败值
    next_handle: u64,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                indexes: HashMap::new(),
                next_handle: 1,
            })),
        }
    }

    /// 登记索引并返回新句柄，句柄不会复用
    pub fn insert(&self, index: SearchIndex) -> u64 {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let handle = inner.next_handle;
        inner.next_handle += 1;
        debug!(handle, path = %index.path().display(), "handle registered");
        inner.indexes.insert(handle, Arc::new(index));
        handle
    }

    /// 解析句柄；返回的 Arc 让调用期间的索引保持存活
    pub fn get(&self, handle: u64) -> Option<Arc<SearchIndex>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.indexes.get(&handle).cloned()
    }

    /// 注销句柄，之后同一句柄的查询返回 None
    pub fn remove(&self, handle: u64) -> Option<Arc<SearchIndex>> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let removed = inner.indexes.remove(&handle);
        if removed.is_some() {
            debug!(handle, "handle released");
        }
        removed
    }

    pub fn contains(&self, handle: u64) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.indexes.contains_key(&handle)
    }

    /// 当前存活的句柄数
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
