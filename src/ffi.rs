// ffi.rs - C 接口
//! 面向 C 调用方的导出函数，声明见 `include/jsonsearch.h`
//!
//! 约定:
//! - 索引以非零 `u64` 句柄表示，0 表示失败
//! - 输入字符串只在调用期间借用
//! - 返回的字符串（结果与错误信息）归调用方所有，
//!   必须且只能用 `jsonsearch_release_string` 释放一次
//! - panic 不会跨越边界，统一转成错误值

use std::ffi::{CStr, CString, c_char};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use tracing::{debug, error};

use crate::engine::{EngineError, SearchIndex};
use crate::registry::REGISTRY;

/// C 边界错误
#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("Null pointer passed for `{0}`")]
    NullPointer(&'static str),

    #[error("Argument `{0}` is not valid UTF-8")]
    InvalidUtf8(&'static str),

    #[error("Output contains an interior NUL byte")]
    InteriorNul,

    #[error("Unknown or released handle: {0}")]
    UnknownHandle(u64),

    #[error("Internal panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

type BoundaryResult<T> = Result<T, BoundaryError>;

/// 在指定路径创建索引，失败返回 0 并写入 `err`
///
/// # Safety
/// `path` 与 `schema_json` 必须是有效的 NUL 结尾字符串；
/// `err` 可以为空，否则必须指向可写的 `char*`。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_create(
    path: *const c_char,
    schema_json: *const c_char,
    err: *mut *mut c_char,
) -> u64 {
    unsafe {
        guarded(err, 0, || {
            let path = borrow_str(path, "path")?;
            let schema_json = borrow_str(schema_json, "schema_json")?;
            let index = SearchIndex::create(path, schema_json)?;
            Ok(REGISTRY.insert(index))
        })
    }
}

/// 打开已有索引，失败返回 0 并写入 `err`
///
/// # Safety
/// 同 [`jsonsearch_create`]。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_open(path: *const c_char, err: *mut *mut c_char) -> u64 {
    unsafe {
        guarded(err, 0, || {
            let path = borrow_str(path, "path")?;
            let index = SearchIndex::open(path)?;
            Ok(REGISTRY.insert(index))
        })
    }
}

/// 添加一个 JSON 文档，成功返回 0，失败返回 -1
///
/// # Safety
/// `doc_json` 必须是有效的 NUL 结尾字符串；`err` 同上。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_add_document(
    handle: u64,
    doc_json: *const c_char,
    err: *mut *mut c_char,
) -> i32 {
    unsafe {
        guarded(err, -1, || {
            let doc_json = borrow_str(doc_json, "doc_json")?;
            resolve(handle)?.add_doc(doc_json)?;
            Ok(0)
        })
    }
}

/// # Safety
/// `err` 可以为空，否则必须指向可写的 `char*`。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_commit(handle: u64, err: *mut *mut c_char) -> i32 {
    unsafe {
        guarded(err, -1, || {
            resolve(handle)?.commit()?;
            Ok(0)
        })
    }
}

/// # Safety
/// `err` 可以为空，否则必须指向可写的 `char*`。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_rollback(handle: u64, err: *mut *mut c_char) -> i32 {
    unsafe {
        guarded(err, -1, || {
            resolve(handle)?.rollback()?;
            Ok(0)
        })
    }
}

/// 已提交文档数，无效句柄返回 0
#[unsafe(no_mangle)]
pub extern "C" fn jsonsearch_num_documents(handle: u64) -> u64 {
    let result =
        panic::catch_unwind(|| resolve(handle).ok().and_then(|index| index.num_docs().ok()));
    result.ok().flatten().unwrap_or(0)
}

/// 执行查询，返回结果 JSON；失败返回 NULL 并写入 `err`
///
/// # Safety
/// `query_json` 必须是有效的 NUL 结尾字符串；`err` 同上。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_search(
    handle: u64,
    query_json: *const c_char,
    err: *mut *mut c_char,
) -> *mut c_char {
    unsafe {
        guarded(err, ptr::null_mut(), || {
            let query_json = borrow_str(query_json, "query_json")?;
            let json = resolve(handle)?.search_json(query_json)?;
            into_owned(json)
        })
    }
}

/// 释放本库返回的字符串，传入 NULL 无操作
///
/// # Safety
/// `s` 必须来自本库且尚未释放。
#[unsafe(no_mangle)]
pub unsafe extern "C" fn jsonsearch_release_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// 关闭索引并注销句柄；未知句柄无操作
#[unsafe(no_mangle)]
pub extern "C" fn jsonsearch_release_handle(handle: u64) {
    let result = panic::catch_unwind(|| {
        if let Some(index) = REGISTRY.remove(handle) {
            match index.close() {
                Ok(()) | Err(EngineError::Closed) => {}
                Err(e) => error!(handle, error = %e, "failed to close index"),
            }
        }
    });
    if result.is_err() {
        error!(handle, "panic while releasing handle");
    }
}

fn resolve(handle: u64) -> BoundaryResult<Arc<SearchIndex>> {
    REGISTRY.get(handle).ok_or(BoundaryError::UnknownHandle(handle))
}

/// 借用调用方的字符串，仅在本次调用内有效
unsafe fn borrow_str<'a>(ptr: *const c_char, name: &'static str) -> BoundaryResult<&'a str> {
    if ptr.is_null() {
        return Err(BoundaryError::NullPointer(name));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| BoundaryError::InvalidUtf8(name))
}

fn into_owned(s: String) -> BoundaryResult<*mut c_char> {
    CString::new(s)
        .map(CString::into_raw)
        .map_err(|_| BoundaryError::InteriorNul)
}

/// 执行调用体：清空 `err`，捕获 panic，失败时写入错误信息并返回 `fallback`
unsafe fn guarded<T, F>(err: *mut *mut c_char, fallback: T, body: F) -> T
where
    F: FnOnce() -> BoundaryResult<T>,
{
    if !err.is_null() {
        unsafe { *err = ptr::null_mut() };
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(body)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(BoundaryError::Panic(message))
    });

    match outcome {
        Ok(value) => value,
        Err(e) => {
            debug!(error = %e, "call failed at C boundary");
            unsafe { write_error(err, &e) };
            fallback
        }
    }
}

unsafe fn write_error(err: *mut *mut c_char, error: &BoundaryError) {
    if err.is_null() {
        return;
    }
    let message = error.to_string().replace('\0', " ");
    if let Ok(message) = CString::new(message) {
        unsafe { *err = message.into_raw() };
    }
}
