//! 错误定义模块

use thiserror::Error;

/// DWF系统统一错误类型
#[derive(Error, Debug)]
pub enum DwfError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    /// 唯一键冲突，调用方应视为"已存在"
    #[error("唯一键冲突: {0}")]
    Conflict(String),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("签名校验失败: {0}")]
    Forbidden(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("HL7解析错误: {0}")]
    Hl7Parse(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("任务队列错误: {0}")]
    Queue(String),

    #[error("{entity} {id} 接入失败: {reason}")]
    Ingestion {
        entity: &'static str,
        id: String,
        reason: String,
    },

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl DwfError {
    /// 是否为唯一键冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, DwfError::Conflict(_))
    }
}

/// DWF系统统一结果类型
pub type Result<T> = std::result::Result<T, DwfError>;
