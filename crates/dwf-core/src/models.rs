//! 核心数据模型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 协议解析/规范化后的消息（瞬态，由解析器产生，网关消费）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub message_id: String,                // 外部唯一标识 (MSH-10)，缺失时自动生成
    pub message_type: String,              // 消息类型 (MSH-9)，无法解析时为 UNKNOWN
    pub payload: String,                   // 原始报文，审计用
    pub source_actor: Option<String>,      // 发送方 "应用|机构"
    pub destination_actor: Option<String>, // 接收方 "应用|机构"
    pub correlation_id: Option<String>,    // 业务关联键 (ORC-2 或 PID-3)
}

/// 未识别的消息类型
pub const UNKNOWN_MESSAGE_TYPE: &str = "UNKNOWN";

/// 入站消息处理状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageStatus {
    Received,
    Other(String),
}

impl MessageStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Received => "received",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MessageStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "received" => Self::Received,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageStatus> for String {
    fn from(value: MessageStatus) -> Self {
        value.as_str().to_string()
    }
}

/// 已持久化的入站消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub message_type: String,
    pub payload: String,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub correlation_id: Option<String>,
    pub status: MessageStatus,
    pub received_at: DateTime<Utc>,
}

impl MessageRecord {
    /// 由规范化消息创建新记录，初始状态为 received
    pub fn received(msg: NormalizedMessage, received_at: DateTime<Utc>) -> Self {
        Self {
            message_id: msg.message_id,
            message_type: msg.message_type,
            payload: msg.payload,
            source: msg.source_actor,
            destination: msg.destination_actor,
            correlation_id: msg.correlation_id,
            status: MessageStatus::Received,
            received_at,
        }
    }
}

/// 实例可用通知 (IAN)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceAvailabilityNotification {
    pub ian_id: String,
    pub source: Option<String>,
    pub sop_instance_uids: String, // 规范化的逗号分隔列表
    pub availability_status: String,
    pub timestamp: DateTime<Utc>,
}

/// IAN 默认可用状态
pub const DEFAULT_AVAILABILITY_STATUS: &str = "Available";

/// SOP实例，每个 sop_uid 至多一条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SopInstance {
    pub sop_uid: String,
    pub stored_at_aet: Option<String>,
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 创建SOP实例时附带的可选元数据
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SopMetadata {
    pub stored_at_aet: Option<String>,
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
}

/// 执行步骤状态 (MPPS)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PpsStatus {
    InProgress,
    Completed,
    Discontinued,
    Other(String),
}

impl PpsStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::InProgress => "IN PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Discontinued => "DISCONTINUED",
            Self::Other(s) => s,
        }
    }
}

impl Default for PpsStatus {
    fn default() -> Self {
        Self::Completed
    }
}

impl From<String> for PpsStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "IN PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "DISCONTINUED" => Self::Discontinued,
            _ => Self::Other(value),
        }
    }
}

impl From<PpsStatus> for String {
    fn from(value: PpsStatus) -> Self {
        value.as_str().to_string()
    }
}

/// 执行过程步骤 (MPPS/PPS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformedProcedureStep {
    pub pps_uid: String,
    pub sps: Option<String>, // 关联的预约步骤
    pub rp: Option<String>,  // 关联的申请检查
    pub actor: Option<String>,
    pub status: PpsStatus,
    pub instance_uids: String,
    pub created_at: DateTime<Utc>,
}

/// 预约步骤状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SpsStatus {
    Scheduled,
    InProgress,
    Completed,
    Discontinued,
    Other(String),
}

impl SpsStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Discontinued => "Discontinued",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for SpsStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "Scheduled" => Self::Scheduled,
            "In Progress" => Self::InProgress,
            "Completed" => Self::Completed,
            "Discontinued" => Self::Discontinued,
            _ => Self::Other(value),
        }
    }
}

impl From<SpsStatus> for String {
    fn from(value: SpsStatus) -> Self {
        value.as_str().to_string()
    }
}

/// 预约过程步骤 (SPS)，只由PPS处理更新，不由接入流程创建
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledProcedureStep {
    pub sps_uid: String,
    pub status: SpsStatus,
}

/// 统一过程步骤状态 (UPS)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UpsStatus {
    Scheduled,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Other(String),
}

impl UpsStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN-PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Other(s) => s,
        }
    }

    /// 终止状态：COMPLETED / FAILED / CANCELLED
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl Default for UpsStatus {
    fn default() -> Self {
        Self::Scheduled
    }
}

impl From<String> for UpsStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "SCHEDULED" => Self::Scheduled,
            "IN-PROGRESS" => Self::InProgress,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Other(value),
        }
    }
}

impl From<UpsStatus> for String {
    fn from(value: UpsStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for UpsStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 统一过程步骤 (UPS)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedProcedureStep {
    pub ups_id: String,
    pub rp: Option<String>,
    pub ups_status: UpsStatus,
    pub actor: Option<String>,
    pub instance_uids: String,
    pub start_time: Option<DateTime<Utc>>, // 进入 IN-PROGRESS 时记录
    pub end_time: Option<DateTime<Utc>>,   // 进入终止状态时记录
    pub created_at: DateTime<Utc>,
}

/// 工作列表项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorklistItem {
    pub name: String,
    pub worklist_id: String,
    pub rp: Option<String>,
    pub assigned_to: Option<String>,
    pub worklist_manager: Option<String>,
    pub status: String,
    pub partial_data_flag: bool,
}
