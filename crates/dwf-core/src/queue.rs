//! 异步任务队列接口
//!
//! 接入流程在主记录提交后投递后续处理任务，投递即返回，不等待任务完成。
//! 任务至少投递一次，处理器需要容忍重复执行。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;

/// IAN后续处理任务
pub const TASK_PROCESS_IAN: &str = "process_ian";
/// PPS后续处理任务
pub const TASK_PROCESS_PPS: &str = "process_pps";

/// 任务封装
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: String,
    pub task_name: String,
    pub args: serde_json::Value,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TaskEnvelope {
    pub fn new(task_name: &str, args: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            args,
            enqueued_at: chrono::Utc::now(),
            retry_count: 0,
            max_retries: 3,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// 记录一次失败，返回是否还能继续重试
    ///
    /// `max_retries` 不含首次执行，任务最多执行 `max_retries + 1` 次。
    pub fn increment_retry(&mut self) -> bool {
        self.retry_count += 1;
        self.retry_count <= self.max_retries
    }

    /// 读取字符串参数
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(|v| v.as_str())
    }
}

/// 任务分发器
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 投递任务，返回即表示已交接给队列
    async fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()>;
}

/// 任务处理器
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &TaskEnvelope) -> Result<()>;

    /// 处理的任务名
    fn task_name(&self) -> &str;
}

/// 按任务名路由到处理器
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(handler.task_name().to_string(), handler);
        self
    }

    pub fn handles(&self, task_name: &str) -> bool {
        self.handlers.contains_key(task_name)
    }

    /// 分发任务；没有对应处理器时记录告警并视为成功
    pub async fn dispatch(&self, task: &TaskEnvelope) -> Result<()> {
        match self.handlers.get(&task.task_name) {
            Some(handler) => {
                debug!("Dispatching task {} ({})", task.id, task.task_name);
                handler.handle(task).await
            }
            None => {
                warn!("No handler registered for task: {}", task.task_name);
                Ok(())
            }
        }
    }
}
