//! DWF接入流程演示程序
//!
//! 使用内存存储和进程内任务队列，展示：
//! - HL7 / JSON 入站消息的规范化与幂等接收
//! - IAN、MPPS、UPS 的接入与SOP实例扩散
//! - UPS 生命周期推进
//! - 工作列表查询

use anyhow::Result;
use dwf_core::{SignatureVerifier, TaskRegistry, WorkflowStore, WorklistFilter, WorklistItem};
use dwf_database::MemoryStore;
use dwf_integration::{build_parser, LocalTaskQueue, MessageGateway, ParserKind};
use dwf_workflow::{
    IanPayload, IanProcessor, IngestionPipeline, MppsPayload, NoopMatcher, PpsProcessor,
    UpsPayload, UpsStatusUpdate, WorklistService,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const SAMPLE_HL7: &str = "MSH|^~\\&|SendingApp|SendingFac|ReceivingApp|ReceivingFac|202511121130||ORM^O01|MSG00001|P|2.5.1\rPID|1||123456^^^Hospital^MR||Doe^John||19800101|M\rORC|NW|ORD448||OC456|CM||||202511121130|||1234^Clinician\rOBR|1|ORD448||TEST^Test Order^L";

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("🚀 启动DWF接入流程演示");

    let store = Arc::new(MemoryStore::new());
    let matcher = Arc::new(NoopMatcher);
    let registry = TaskRegistry::new()
        .register(Arc::new(IanProcessor::new(store.clone(), matcher.clone())))
        .register(Arc::new(PpsProcessor::new(store.clone(), matcher)));
    let queue = Arc::new(LocalTaskQueue::start(registry, 3, Duration::from_millis(100)));

    demo_gateway(store.clone()).await?;

    let pipeline = IngestionPipeline::new(store.clone(), queue, SignatureVerifier::new(None));
    demo_ingestion(&pipeline, &store).await?;
    demo_worklist(store).await?;

    // 等待后台任务处理
    tokio::time::sleep(Duration::from_millis(200)).await;
    println!("\n✅ 演示完成！");
    Ok(())
}

/// 演示消息网关
async fn demo_gateway(store: Arc<MemoryStore>) -> Result<()> {
    println!("\n📨 消息网关演示");
    println!("------------------");

    for kind in [ParserKind::Structured, ParserKind::Naive] {
        let parsed = build_parser(kind).normalize(SAMPLE_HL7);
        println!(
            "  {} 策略: id={} type={} correlation={:?}",
            kind, parsed.message_id, parsed.message_type, parsed.correlation_id
        );
    }

    let gateway = MessageGateway::new(store.clone(), build_parser(ParserKind::Structured));
    let first = gateway.receive(SAMPLE_HL7.as_bytes(), "x-application/hl7-v2+er7").await;
    let replay = gateway.receive(SAMPLE_HL7.as_bytes(), "x-application/hl7-v2+er7").await;
    println!("  首次提交: {} {}", first.http_status, first.message);
    println!("  重复提交: {} {}", replay.http_status, replay.message);

    let body = json!({
        "message_id": "JSON-0001",
        "message_type": "ORM^O01",
        "payload": {"order": "ORD449"},
        "correlation_id": "ORD449"
    });
    let response = gateway.receive(body.to_string().as_bytes(), "application/json").await;
    println!("  JSON 提交: {} {}", response.http_status, response.message);
    println!("  消息总数: {}", store.message_count().await);
    Ok(())
}

/// 演示 IAN / MPPS / UPS 接入
async fn demo_ingestion(pipeline: &IngestionPipeline, store: &MemoryStore) -> Result<()> {
    println!("\n🩻 工作流接入演示");
    println!("------------------");

    let ian: IanPayload = serde_json::from_value(json!({
        "ian_id": "IAN-20251114-0001",
        "source": "OrthancAE",
        "sop_uids": ["1.2.840.113619.2.55.3.1", "1.2.840.113619.2.55.3.2"],
        "availability_status": "ONLINE"
    }))?;
    println!("  IAN: {:?}", pipeline.ingest_ian(&ian, None).await?.status);
    println!("  IAN 重复: {:?}", pipeline.ingest_ian(&ian, None).await?.status);

    let mpps: MppsPayload = serde_json::from_value(json!({
        "pps_uid": "MPPS-0001",
        "sps_uid": "SPS-0001",
        "actor": "CT-SCANNER-1",
        "status": "COMPLETED",
        "instance_uids": "1.2.840.113619.2.55.3.2,1.2.840.113619.2.55.3.3"
    }))?;
    println!("  MPPS: {:?}", pipeline.ingest_mpps(&mpps, None).await?.status);

    let ups: UpsPayload = serde_json::from_value(json!({
        "ups_id": "UPS-0001",
        "ups_status": "SCHEDULED",
        "instance_uids": ["1.2.840.113619.2.55.3.4"]
    }))?;
    pipeline.ingest_ups(&ups, None).await?;
    for target in ["IN-PROGRESS", "COMPLETED"] {
        let update: UpsStatusUpdate = serde_json::from_value(json!({"ups_status": target}))?;
        let ups = pipeline.update_ups_status("UPS-0001", &update, None).await?;
        println!(
            "  UPS -> {} (start={:?}, end={:?})",
            ups.ups_status, ups.start_time, ups.end_time
        );
    }

    println!("  SOP实例总数: {}", store.sop_instance_count().await);
    Ok(())
}

/// 演示工作列表查询
async fn demo_worklist(store: Arc<MemoryStore>) -> Result<()> {
    println!("\n📋 工作列表演示");
    println!("------------------");

    let service = WorklistService::new(store.clone());
    for (name, manager, user) in [
        ("WLI-0001", "radiology", "alice"),
        ("WLI-0002", "radiology", "bob"),
        ("WLI-0003", "cardiology", "alice"),
    ] {
        service
            .add_item(WorklistItem {
                name: name.to_string(),
                worklist_id: format!("WL-{}", name),
                rp: None,
                assigned_to: Some(user.to_string()),
                worklist_manager: Some(manager.to_string()),
                status: "Open".to_string(),
                partial_data_flag: true,
            })
            .await?;
    }

    let filter = WorklistFilter {
        manager: Some("radiology".to_string()),
        user: Some("alice".to_string()),
    };
    for item in service.get_worklist(&filter).await? {
        println!("  {} ({}) -> {:?}", item.name, item.worklist_id, item.assigned_to);
    }
    println!(
        "  全部条目: {}",
        store.list_worklist_items(&WorklistFilter::default()).await?.len()
    );
    Ok(())
}
