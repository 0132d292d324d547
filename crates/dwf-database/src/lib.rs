//! # DWF数据库模块
//!
//! 工作流实体的持久化实现：
//! - PostgreSQL 存储（连接池 + 自然唯一键约束）
//! - 内存存储，用于开发环境和测试

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStore;
pub use queries::PgStore;
