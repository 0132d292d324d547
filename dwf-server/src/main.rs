//! DWF服务器主程序

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use dwf_core::{SignatureVerifier, TaskQueue, TaskRegistry, WorkflowStore};
use dwf_database::{DatabasePool, MemoryStore, PgStore};
use dwf_integration::{
    build_parser, AmqpTaskConsumer, AmqpTaskQueue, ApiServer, ApiState, LocalTaskQueue,
    MessageGateway, ParserKind, QueueBackend,
};
use dwf_workflow::{
    IanProcessor, IngestionPipeline, NoopMatcher, PpsProcessor, ProcedureMatcher, WorklistService,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{CliOverrides, DwfConfig};

/// DWF服务器命令行参数
#[derive(Parser, Debug)]
#[command(name = "dwf-server")]
#[command(about = "IHE 科室工作流 (DWF) 消息接入服务器")]
struct Args {
    /// 配置文件路径 (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// 监听主机
    #[arg(long)]
    host: Option<String>,

    /// 监听端口
    #[arg(short, long)]
    port: Option<u16>,

    /// PostgreSQL 连接字符串，未指定时使用内存存储
    #[arg(long)]
    database_url: Option<String>,

    /// HMAC-SHA256 共享密钥
    #[arg(long)]
    api_secret: Option<String>,

    /// HL7 解析策略 (structured / naive)
    #[arg(long)]
    parser: Option<ParserKind>,

    /// 日志级别
    #[arg(short, long)]
    log_level: Option<String>,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            host: self.host.clone(),
            port: self.port,
            database_url: self.database_url.clone(),
            api_secret: self.api_secret.clone(),
            parser: self.parser,
            log_level: self.log_level.clone(),
        }
    }
}

async fn open_store(config: &DwfConfig) -> Result<Arc<dyn WorkflowStore>> {
    match &config.database.url {
        Some(url) => {
            let pool = DatabasePool::connect(url, config.database.max_connections).await?;
            let store = PgStore::new(pool);
            store.create_tables().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("未配置数据库，使用内存存储（重启后数据丢失）");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = DwfConfig::load(args.config.as_deref(), &args.overrides())?;

    // 配置决定日志级别，因此先加载配置再初始化日志；RUST_LOG 优先
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    match args.config.as_deref() {
        Some(path) => info!("Configuration loaded from: {}", path),
        None => info!("Configuration loaded from defaults and environment"),
    }
    info!("启动DWF服务器...");
    info!("  监听地址: {}", config.bind_address());
    info!("  HL7解析策略: {}", config.hl7.parser);
    info!("  任务队列: {:?}", config.queue.backend);
    if config.security.api_secret.is_none() {
        warn!("未配置 api_secret，IAN/MPPS/UPS 接入不校验签名");
    }

    let store = open_store(&config).await?;

    let matcher: Arc<dyn ProcedureMatcher> = Arc::new(NoopMatcher);
    let registry = TaskRegistry::new()
        .register(Arc::new(IanProcessor::new(store.clone(), matcher.clone())))
        .register(Arc::new(PpsProcessor::new(store.clone(), matcher)));

    // 消费端需在服务运行期间保持存活
    let (queue, _consumer): (Arc<dyn TaskQueue>, Option<AmqpTaskConsumer>) = match config.queue.backend {
        QueueBackend::Local => {
            let queue = LocalTaskQueue::start(
                registry,
                config.queue.max_retries,
                Duration::from_millis(config.queue.retry_delay_ms),
            );
            (Arc::new(queue), None)
        }
        QueueBackend::Amqp => {
            let url = config
                .queue
                .amqp_url
                .as_deref()
                .context("queue.amqp_url is required for the amqp backend")?;
            let consumer = AmqpTaskConsumer::connect(url, &config.queue.queue_name, registry).await?;
            consumer.start().await?;
            let queue = AmqpTaskQueue::connect(url, &config.queue.queue_name, config.queue.max_retries).await?;
            (Arc::new(queue), Some(consumer))
        }
    };

    let state = ApiState::new(
        MessageGateway::new(store.clone(), build_parser(config.hl7.parser)),
        IngestionPipeline::new(
            store.clone(),
            queue,
            SignatureVerifier::new(config.security.api_secret.clone()),
        ),
        WorklistService::new(store),
    );

    if let Err(e) = ApiServer::new(state).run(&config.bind_address()).await {
        error!("服务器运行失败: {}", e);
        return Err(e);
    }

    info!("DWF服务器已停止");
    Ok(())
}
