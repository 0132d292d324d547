//! 任务队列实现
//!
//! 提供两种 [`TaskQueue`] 后端：
//! - 进程内队列：tokio 通道加后台 worker，失败按次数重试
//! - RabbitMQ队列：持久化队列，失败时带重试计数重新发布，超过上限后丢弃
//!
//! 两者都是至少一次投递，处理器需要容忍重复执行。

use async_trait::async_trait;
use dwf_core::{DwfError, Result, TaskEnvelope, TaskQueue, TaskRegistry};
use lapin::{
    message::{Delivery, DeliveryResult},
    options::*,
    publisher_confirm::Confirmation,
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 队列后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Local,
    Amqp,
}

/// 执行任务，失败时按封装上的重试次数重试
async fn run_with_retries(registry: &TaskRegistry, mut task: TaskEnvelope, retry_delay: Duration) {
    loop {
        match registry.dispatch(&task).await {
            Ok(()) => {
                debug!("Task {} ({}) completed", task.id, task.task_name);
                return;
            }
            Err(e) => {
                if task.increment_retry() {
                    warn!(
                        "Task {} ({}) failed, retry {}/{}: {}",
                        task.id, task.task_name, task.retry_count, task.max_retries, e
                    );
                    tokio::time::sleep(retry_delay * task.retry_count).await;
                } else {
                    error!(
                        "Task {} ({}) max retries exceeded, dropping: {}",
                        task.id, task.task_name, e
                    );
                    return;
                }
            }
        }
    }
}

/// 进程内任务队列
#[derive(Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<TaskEnvelope>,
    max_retries: u32,
}

impl LocalTaskQueue {
    /// 启动后台 worker；每个任务独立执行，不保证顺序
    pub fn start(registry: TaskRegistry, max_retries: u32, retry_delay: Duration) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TaskEnvelope>();

        tokio::spawn(async move {
            while let Some(task) = receiver.recv().await {
                let registry = registry.clone();
                tokio::spawn(async move {
                    run_with_retries(&registry, task, retry_delay).await;
                });
            }
            info!("Local task queue closed");
        });

        Self { sender, max_retries }
    }
}

#[async_trait]
impl TaskQueue for LocalTaskQueue {
    async fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()> {
        let task = TaskEnvelope::new(task_name, args).with_max_retries(self.max_retries);
        debug!("Enqueue task {} ({})", task.id, task.task_name);
        self.sender
            .send(task)
            .map_err(|_| DwfError::Queue("local task queue is closed".to_string()))
    }
}

fn queue_error(e: lapin::Error) -> DwfError {
    DwfError::Queue(e.to_string())
}

async fn open_channel(url: &str, queue_name: &str) -> Result<(Connection, Channel)> {
    let conn = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(queue_error)?;
    let channel = conn.create_channel().await.map_err(queue_error)?;

    channel
        .queue_declare(
            queue_name,
            QueueDeclareOptions {
                durable: true,
                ..QueueDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(queue_error)?;

    info!("Connected to message queue, queue declared: {}", queue_name);
    Ok((conn, channel))
}

async fn publish(channel: &Channel, queue_name: &str, task: &TaskEnvelope) -> Result<()> {
    let payload = serde_json::to_vec(task)?;
    let properties = BasicProperties::default()
        .with_content_type("application/json".into())
        .with_message_id(task.id.clone().into())
        .with_timestamp(task.enqueued_at.timestamp() as u64)
        .with_delivery_mode(2);

    let confirm = channel
        .basic_publish("", queue_name, BasicPublishOptions::default(), &payload, properties)
        .await
        .map_err(queue_error)?
        .await
        .map_err(queue_error)?;

    match confirm {
        Confirmation::Nack(nack) => {
            error!("Task publish rejected: {:?}", nack);
            Err(DwfError::Queue(format!("task {} rejected by broker", task.id)))
        }
        _ => {
            debug!("Task published: {} ({})", task.id, task.task_name);
            Ok(())
        }
    }
}

/// RabbitMQ任务队列（发布端）
pub struct AmqpTaskQueue {
    _connection: Connection,
    channel: Channel,
    queue_name: String,
    max_retries: u32,
}

impl AmqpTaskQueue {
    pub async fn connect(url: &str, queue_name: &str, max_retries: u32) -> Result<Self> {
        let (connection, channel) = open_channel(url, queue_name).await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(queue_error)?;

        Ok(Self {
            _connection: connection,
            channel,
            queue_name: queue_name.to_string(),
            max_retries,
        })
    }
}

#[async_trait]
impl TaskQueue for AmqpTaskQueue {
    async fn enqueue(&self, task_name: &str, args: serde_json::Value) -> Result<()> {
        let task = TaskEnvelope::new(task_name, args).with_max_retries(self.max_retries);
        publish(&self.channel, &self.queue_name, &task).await
    }
}

/// RabbitMQ任务消费端
pub struct AmqpTaskConsumer {
    _connection: Connection,
    channel: Channel,
    queue_name: String,
    registry: TaskRegistry,
}

impl AmqpTaskConsumer {
    pub async fn connect(url: &str, queue_name: &str, registry: TaskRegistry) -> Result<Self> {
        let (connection, channel) = open_channel(url, queue_name).await?;
        channel
            .basic_qos(10, BasicQosOptions::default())
            .await
            .map_err(queue_error)?;

        Ok(Self {
            _connection: connection,
            channel,
            queue_name: queue_name.to_string(),
            registry,
        })
    }

    /// 开始消费，消费者存活期间需持有本对象
    pub async fn start(&self) -> Result<()> {
        let consumer = self
            .channel
            .basic_consume(
                &self.queue_name,
                "dwf-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(queue_error)?;

        info!("Started consuming tasks from queue: {}", self.queue_name);

        let registry = self.registry.clone();
        let channel = self.channel.clone();
        let queue_name = self.queue_name.clone();
        consumer.set_delegate(move |delivery: DeliveryResult| {
            let registry = registry.clone();
            let channel = channel.clone();
            let queue_name = queue_name.clone();
            async move {
                match delivery {
                    Ok(Some(delivery)) => handle_delivery(&registry, &channel, &queue_name, delivery).await,
                    Ok(None) => info!("Task consumer for {} cancelled", queue_name),
                    Err(e) => error!("Task consumer error on {}: {}", queue_name, e),
                }
            }
        });

        Ok(())
    }
}

/// 处理一条投递：成功确认；失败时带递增的重试计数重新发布，超过上限后丢弃
async fn handle_delivery(registry: &TaskRegistry, channel: &Channel, queue_name: &str, delivery: Delivery) {
    let mut task: TaskEnvelope = match serde_json::from_slice(&delivery.data) {
        Ok(task) => task,
        Err(e) => {
            error!("Dropping undecodable task message: {}", e);
            if let Err(e) = delivery.acker.nack(BasicNackOptions::default()).await {
                error!("Failed to nack task message: {}", e);
            }
            return;
        }
    };

    let outcome = match registry.dispatch(&task).await {
        Ok(()) => Ok(()),
        Err(e) if task.increment_retry() => {
            warn!(
                "Task {} ({}) failed, retry {}/{}: {}",
                task.id, task.task_name, task.retry_count, task.max_retries, e
            );
            publish(channel, queue_name, &task).await
        }
        Err(e) => {
            error!("Task {} ({}) max retries exceeded, dropping: {}", task.id, task.task_name, e);
            Ok(())
        }
    };

    let acked = match outcome {
        Ok(()) => delivery.acker.ack(BasicAckOptions::default()).await,
        // 重新发布失败时交回broker重新投递
        Err(e) => {
            error!("Failed to republish task {}: {}", task.id, e);
            delivery
                .acker
                .nack(BasicNackOptions {
                    requeue: true,
                    ..BasicNackOptions::default()
                })
                .await
        }
    };
    if let Err(e) = acked {
        error!("Failed to acknowledge task {}: {}", task.id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwf_core::{queue::TASK_PROCESS_IAN, TaskHandler};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyHandler {
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
        done: tokio::sync::Notify,
    }

    impl FlakyHandler {
        fn new(failures: usize) -> Self {
            Self {
                failures_left: AtomicUsize::new(failures),
                attempts: AtomicUsize::new(0),
                done: tokio::sync::Notify::new(),
            }
        }
    }

    #[async_trait]
    impl TaskHandler for FlakyHandler {
        async fn handle(&self, _task: &TaskEnvelope) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures_left.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(DwfError::Internal("transient".to_string()));
            }
            self.done.notify_one();
            Ok(())
        }

        fn task_name(&self) -> &str {
            TASK_PROCESS_IAN
        }
    }

    #[tokio::test]
    async fn test_local_queue_retries_until_success() {
        let handler = Arc::new(FlakyHandler::new(2));
        let registry = TaskRegistry::new().register(handler.clone());
        let queue = LocalTaskQueue::start(registry, 3, Duration::from_millis(1));

        queue
            .enqueue(TASK_PROCESS_IAN, serde_json::json!({"ian_id": "IAN-1"}))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), handler.done.notified())
            .await
            .unwrap();
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_local_queue_gives_up_after_max_retries() {
        let handler = Arc::new(FlakyHandler::new(10));
        let registry = TaskRegistry::new().register(handler.clone());
        let queue = LocalTaskQueue::start(registry, 2, Duration::from_millis(1));

        queue
            .enqueue(TASK_PROCESS_IAN, serde_json::json!({"ian_id": "IAN-2"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        // 首次执行加两次重试
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_backend_names() {
        let backend: QueueBackend = serde_json::from_str("\"amqp\"").unwrap();
        assert_eq!(backend, QueueBackend::Amqp);
        assert_eq!(QueueBackend::default(), QueueBackend::Local);
    }
}
