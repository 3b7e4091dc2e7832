// engine/mod.rs - 索引资源层
//! 管理索引句柄的创建、打开、写入、查询与关闭

pub mod builder;
pub mod core;

pub use builder::*;
pub use core::*;
