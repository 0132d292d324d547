//! 入站消息网关
//!
//! 按 Content-Type 选择JSON或HL7规范化，以 message_id 保证幂等。
//! 网关从不向调用方返回错误，所有失败都转为 500 响应。

use chrono::Utc;
use dwf_core::{MessageRecord, NormalizedMessage, Result, WorkflowStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::normalizer::normalize_json;
use crate::parser::MessageParser;

/// 回执数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
    pub status: String,
    pub correlation_id: Option<String>,
}

impl From<&MessageRecord> for MessageReceipt {
    fn from(record: &MessageRecord) -> Self {
        Self {
            message_id: record.message_id.clone(),
            status: record.status.as_str().to_string(),
            correlation_id: record.correlation_id.clone(),
        }
    }
}

/// 网关响应
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(skip)]
    pub http_status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MessageReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GatewayResponse {
    fn created(record: &MessageRecord) -> Self {
        Self {
            http_status: 201,
            message: "Message accepted and queued".to_string(),
            data: Some(record.into()),
            error: None,
        }
    }

    fn replay(record: &MessageRecord) -> Self {
        Self {
            http_status: 200,
            message: "Message already exists".to_string(),
            data: Some(record.into()),
            error: None,
        }
    }

    fn failure(reason: String) -> Self {
        Self {
            http_status: 500,
            message: "Failed to accept message".to_string(),
            data: None,
            error: Some(reason),
        }
    }
}

/// 消息网关
pub struct MessageGateway {
    store: Arc<dyn WorkflowStore>,
    parser: Box<dyn MessageParser>,
}

impl MessageGateway {
    pub fn new(store: Arc<dyn WorkflowStore>, parser: Box<dyn MessageParser>) -> Self {
        Self { store, parser }
    }

    /// 接收入站消息
    pub async fn receive(&self, body: &[u8], content_type: &str) -> GatewayResponse {
        match self.accept(body, content_type).await {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to accept inbound message: {}", e);
                GatewayResponse::failure(e.to_string())
            }
        }
    }

    fn normalize(&self, body: &[u8], content_type: &str) -> Result<NormalizedMessage> {
        let raw = String::from_utf8_lossy(body);
        if content_type.to_ascii_lowercase().contains("application/json") {
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            normalize_json(&value)
        } else {
            Ok(self.parser.normalize(&raw))
        }
    }

    async fn accept(&self, body: &[u8], content_type: &str) -> Result<GatewayResponse> {
        let message = self.normalize(body, content_type)?;
        debug!(
            "Normalized inbound message {} ({}) with {} parser",
            message.message_id,
            message.message_type,
            self.parser.name()
        );

        if let Some(existing) = self.store.find_message(&message.message_id).await? {
            debug!("Message {} already exists", existing.message_id);
            return Ok(GatewayResponse::replay(&existing));
        }

        let record = MessageRecord::received(message, Utc::now());
        match self.store.insert_message(&record).await {
            Ok(()) => {
                info!("Accepted message {} ({})", record.message_id, record.message_type);
                Ok(GatewayResponse::created(&record))
            }
            Err(e) if e.is_conflict() => match self.store.find_message(&record.message_id).await? {
                Some(existing) => Ok(GatewayResponse::replay(&existing)),
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{build_parser, ParserKind};
    use crate::test_support::SAMPLE_HL7;
    use async_trait::async_trait;
    use dwf_core::{models::*, DwfError, WorklistFilter};
    use dwf_database::MemoryStore;

    fn gateway(store: Arc<dyn WorkflowStore>) -> MessageGateway {
        MessageGateway::new(store, build_parser(ParserKind::Structured))
    }

    #[tokio::test]
    async fn test_hl7_created_then_replayed() {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway(store.clone());

        let first = gateway.receive(SAMPLE_HL7.as_bytes(), "text/plain").await;
        assert_eq!(first.http_status, 201);
        assert_eq!(first.message, "Message accepted and queued");
        let data = first.data.unwrap();
        assert_eq!(data.message_id, "MSG00001");
        assert_eq!(data.status, "received");
        assert_eq!(data.correlation_id.as_deref(), Some("ORD448"));

        let second = gateway.receive(SAMPLE_HL7.as_bytes(), "x-application/hl7-v2+er7").await;
        assert_eq!(second.http_status, 200);
        assert_eq!(second.message, "Message already exists");
        assert_eq!(second.data.unwrap(), data);
        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn test_json_content_type_is_case_insensitive() {
        let store = Arc::new(MemoryStore::new());
        let gateway = gateway(store.clone());
        let body = br#"{"message_id":"J-1","message_type":"ORM^O01","payload":{"a":1},"correlation_id":"C-1"}"#;

        let response = gateway.receive(body, "Application/JSON; charset=utf-8").await;
        assert_eq!(response.http_status, 201);

        let record = store.find_message("J-1").await.unwrap().unwrap();
        assert_eq!(record.payload, r#"{"a":1}"#);
        assert_eq!(record.correlation_id.as_deref(), Some("C-1"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_500() {
        let gateway = gateway(Arc::new(MemoryStore::new()));
        let response = gateway.receive(b"{not json", "application/json").await;
        assert_eq!(response.http_status, 500);
        assert_eq!(response.message, "Failed to accept message");
        assert!(response.error.is_some());
        assert!(response.data.is_none());
    }

    /// 查询时看不到记录、插入时报冲突，模拟并发重复提交
    struct RacingStore {
        inner: MemoryStore,
        winner: MessageRecord,
    }

    #[async_trait]
    impl WorkflowStore for RacingStore {
        async fn find_message(&self, message_id: &str) -> dwf_core::Result<Option<MessageRecord>> {
            self.inner.find_message(message_id).await
        }
        async fn insert_message(&self, _message: &MessageRecord) -> dwf_core::Result<()> {
            let _ = self.inner.insert_message(&self.winner).await;
            Err(DwfError::Conflict("message".to_string()))
        }
        async fn find_ian(&self, id: &str) -> dwf_core::Result<Option<InstanceAvailabilityNotification>> {
            self.inner.find_ian(id).await
        }
        async fn insert_ian(&self, ian: &InstanceAvailabilityNotification) -> dwf_core::Result<()> {
            self.inner.insert_ian(ian).await
        }
        async fn find_sop_instance(&self, uid: &str) -> dwf_core::Result<Option<SopInstance>> {
            self.inner.find_sop_instance(uid).await
        }
        async fn insert_sop_instance(&self, instance: &SopInstance) -> dwf_core::Result<()> {
            self.inner.insert_sop_instance(instance).await
        }
        async fn find_pps(&self, uid: &str) -> dwf_core::Result<Option<PerformedProcedureStep>> {
            self.inner.find_pps(uid).await
        }
        async fn insert_pps(&self, pps: &PerformedProcedureStep) -> dwf_core::Result<()> {
            self.inner.insert_pps(pps).await
        }
        async fn find_sps(&self, uid: &str) -> dwf_core::Result<Option<ScheduledProcedureStep>> {
            self.inner.find_sps(uid).await
        }
        async fn insert_sps(&self, sps: &ScheduledProcedureStep) -> dwf_core::Result<()> {
            self.inner.insert_sps(sps).await
        }
        async fn update_sps_status(&self, uid: &str, status: &SpsStatus) -> dwf_core::Result<()> {
            self.inner.update_sps_status(uid, status).await
        }
        async fn find_ups(&self, id: &str) -> dwf_core::Result<Option<UnifiedProcedureStep>> {
            self.inner.find_ups(id).await
        }
        async fn insert_ups(&self, ups: &UnifiedProcedureStep) -> dwf_core::Result<()> {
            self.inner.insert_ups(ups).await
        }
        async fn update_ups(&self, ups: &UnifiedProcedureStep, expected: &UpsStatus) -> dwf_core::Result<()> {
            self.inner.update_ups(ups, expected).await
        }
        async fn list_worklist_items(&self, filter: &WorklistFilter) -> dwf_core::Result<Vec<WorklistItem>> {
            self.inner.list_worklist_items(filter).await
        }
        async fn insert_worklist_item(&self, item: &WorklistItem) -> dwf_core::Result<()> {
            self.inner.insert_worklist_item(item).await
        }
        async fn clear_partial_data_flag(&self, name: &str) -> dwf_core::Result<bool> {
            self.inner.clear_partial_data_flag(name).await
        }
    }

    #[tokio::test]
    async fn test_insert_conflict_is_answered_as_replay() {
        let sample = build_parser(ParserKind::Structured).normalize(SAMPLE_HL7);
        let mut winner = MessageRecord::received(sample, Utc::now());
        winner.status = MessageStatus::Other("processed".to_string());
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            winner,
        });

        let response = gateway(store).receive(SAMPLE_HL7.as_bytes(), "text/plain").await;
        assert_eq!(response.http_status, 200);
        assert_eq!(response.data.unwrap().status, "processed");
    }
}
