//! # DWF Core
//!
//! 科室工作流系统的核心模块，提供：
//! - 消息与影像工作流实体（IAN、MPPS、SPS、UPS、SOP实例）
//! - 统一错误定义
//! - UID列表规范化与SOP实例去重创建
//! - HMAC-SHA256 请求签名校验
//! - 持久化存储与异步任务队列的接口定义

pub mod error;
pub mod models;
pub mod queue;
pub mod signature;
pub mod store;
pub mod utils;

pub use error::{DwfError, Result};
pub use models::*;
pub use queue::{TaskEnvelope, TaskHandler, TaskQueue, TaskRegistry};
pub use signature::{RequestHeaders, SignatureVerifier};
pub use store::{WorkflowStore, WorklistFilter};
