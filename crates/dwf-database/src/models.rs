//! 数据库模型

use chrono::{DateTime, Utc};
use dwf_core::models::*;
use sqlx::FromRow;

// 数据库表模型 - 使用FromRow trait用于SQL查询，状态统一存储为字符串

/// 入站消息表
#[derive(Debug, FromRow)]
pub struct DbMessage {
    pub message_id: String,
    pub message_type: String,
    pub payload: String,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub correlation_id: Option<String>,
    pub status: String,
    pub received_at: DateTime<Utc>,
}

impl From<DbMessage> for MessageRecord {
    fn from(db: DbMessage) -> Self {
        MessageRecord {
            message_id: db.message_id,
            message_type: db.message_type,
            payload: db.payload,
            source: db.source,
            destination: db.destination,
            correlation_id: db.correlation_id,
            status: MessageStatus::from(db.status),
            received_at: db.received_at,
        }
    }
}

/// 实例可用通知表
#[derive(Debug, FromRow)]
pub struct DbIan {
    pub ian_id: String,
    pub source: Option<String>,
    pub sop_instance_uids: String,
    pub availability_status: String,
    pub timestamp: DateTime<Utc>,
}

impl From<DbIan> for InstanceAvailabilityNotification {
    fn from(db: DbIan) -> Self {
        InstanceAvailabilityNotification {
            ian_id: db.ian_id,
            source: db.source,
            sop_instance_uids: db.sop_instance_uids,
            availability_status: db.availability_status,
            timestamp: db.timestamp,
        }
    }
}

/// SOP实例表
#[derive(Debug, FromRow)]
pub struct DbSopInstance {
    pub sop_uid: String,
    pub stored_at_aet: Option<String>,
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<DbSopInstance> for SopInstance {
    fn from(db: DbSopInstance) -> Self {
        SopInstance {
            sop_uid: db.sop_uid,
            stored_at_aet: db.stored_at_aet,
            patient_id: db.patient_id,
            accession_number: db.accession_number,
            created_at: db.created_at,
        }
    }
}

/// 执行过程步骤表
#[derive(Debug, FromRow)]
pub struct DbPps {
    pub pps_uid: String,
    pub sps: Option<String>,
    pub rp: Option<String>,
    pub actor: Option<String>,
    pub status: String,
    pub instance_uids: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbPps> for PerformedProcedureStep {
    fn from(db: DbPps) -> Self {
        PerformedProcedureStep {
            pps_uid: db.pps_uid,
            sps: db.sps,
            rp: db.rp,
            actor: db.actor,
            status: PpsStatus::from(db.status),
            instance_uids: db.instance_uids,
            created_at: db.created_at,
        }
    }
}

/// 预约过程步骤表
#[derive(Debug, FromRow)]
pub struct DbSps {
    pub sps_uid: String,
    pub status: String,
}

impl From<DbSps> for ScheduledProcedureStep {
    fn from(db: DbSps) -> Self {
        ScheduledProcedureStep {
            sps_uid: db.sps_uid,
            status: SpsStatus::from(db.status),
        }
    }
}

/// 统一过程步骤表
#[derive(Debug, FromRow)]
pub struct DbUps {
    pub ups_id: String,
    pub rp: Option<String>,
    pub ups_status: String,
    pub actor: Option<String>,
    pub instance_uids: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbUps> for UnifiedProcedureStep {
    fn from(db: DbUps) -> Self {
        UnifiedProcedureStep {
            ups_id: db.ups_id,
            rp: db.rp,
            ups_status: UpsStatus::from(db.ups_status),
            actor: db.actor,
            instance_uids: db.instance_uids,
            start_time: db.start_time,
            end_time: db.end_time,
            created_at: db.created_at,
        }
    }
}

/// 工作列表项表
#[derive(Debug, FromRow)]
pub struct DbWorklistItem {
    pub name: String,
    pub worklist_id: String,
    pub rp: Option<String>,
    pub assigned_to: Option<String>,
    pub worklist_manager: Option<String>,
    pub status: String,
    pub partial_data_flag: bool,
}

impl From<DbWorklistItem> for WorklistItem {
    fn from(db: DbWorklistItem) -> Self {
        WorklistItem {
            name: db.name,
            worklist_id: db.worklist_id,
            rp: db.rp,
            assigned_to: db.assigned_to,
            worklist_manager: db.worklist_manager,
            status: db.status,
            partial_data_flag: db.partial_data_flag,
        }
    }
}
