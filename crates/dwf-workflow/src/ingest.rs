//! IAN / MPPS / UPS 接入流程
//!
//! 每类实体的处理步骤一致：
//! 1. 校验必填标识
//! 2. 携带请求头时校验签名
//! 3. 幂等检查，已存在则直接返回
//! 4. 写入主记录
//! 5. 按UID列表获取或创建SOP实例
//! 6. MPPS 关联的SPS置为 Completed
//! 7. 投递后续处理任务
//!
//! 第4步之后的任何失败都记录日志并以 [`DwfError::Ingestion`] 返回，已提交的写入不回滚。

use chrono::{DateTime, Utc};
use dwf_core::{
    models::*,
    queue::{TASK_PROCESS_IAN, TASK_PROCESS_PPS},
    utils::{
        deserialize_lenient_datetime, deserialize_uid_list, get_or_create_sop_instance, normalize_uids,
        split_uids, UidList,
    },
    DwfError, RequestHeaders, Result, SignatureVerifier, TaskQueue, WorkflowStore,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::state_machine::UpsStateMachine;

/// IAN 接入负载
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IanPayload {
    pub ian_id: Option<String>,
    pub source: Option<String>,
    #[serde(default, alias = "sop_uids", deserialize_with = "deserialize_uid_list")]
    pub sop_instance_uids: UidList,
    pub availability_status: Option<String>,
    /// 空值或无法识别的时间按接收时间处理
    #[serde(default, deserialize_with = "deserialize_lenient_datetime")]
    pub timestamp: Option<DateTime<Utc>>,
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
}

/// MPPS 接入负载
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MppsPayload {
    pub pps_uid: Option<String>,
    pub sps_uid: Option<String>,
    pub rp_id: Option<String>,
    pub actor: Option<String>,
    pub status: Option<PpsStatus>,
    #[serde(default, deserialize_with = "deserialize_uid_list")]
    pub instance_uids: UidList,
    pub patient_id: Option<String>,
    pub accession_number: Option<String>,
    #[serde(default, deserialize_with = "deserialize_lenient_datetime")]
    pub created_at: Option<DateTime<Utc>>,
}

/// UPS 接入负载
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpsPayload {
    pub ups_id: Option<String>,
    pub rp_id: Option<String>,
    pub ups_status: Option<UpsStatus>,
    pub actor: Option<String>,
    #[serde(default, deserialize_with = "deserialize_uid_list")]
    pub instance_uids: UidList,
}

/// UPS 状态变更请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsStatusUpdate {
    pub ups_status: UpsStatus,
    pub actor: Option<String>,
}

/// 需要签名校验的原始请求
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub headers: RequestHeaders,
    pub body: Vec<u8>,
}

impl SignedRequest {
    pub fn new(headers: RequestHeaders, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }
}

/// 接入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Created,
    Exists,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub status: IngestStatus,
    pub id: String,
}

impl IngestOutcome {
    pub fn created(id: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Created,
            id: id.into(),
        }
    }

    pub fn exists(id: impl Into<String>) -> Self {
        Self {
            status: IngestStatus::Exists,
            id: id.into(),
        }
    }
}

/// 空字符串视为缺失
fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

fn required(value: &Option<String>, entity: &str, field: &str) -> Result<String> {
    non_empty(value)
        .ok_or_else(|| DwfError::Validation(format!("{} payload missing required field: {}", entity, field)))
}

fn ingestion_error(entity: &'static str, id: &str, err: DwfError) -> DwfError {
    error!("ingest {} failed for {}: {}", entity, id, err);
    DwfError::Ingestion {
        entity,
        id: id.to_string(),
        reason: err.to_string(),
    }
}

/// 接入流程
pub struct IngestionPipeline {
    store: Arc<dyn WorkflowStore>,
    queue: Arc<dyn TaskQueue>,
    verifier: SignatureVerifier,
    state_machine: UpsStateMachine,
}

impl IngestionPipeline {
    pub fn new(store: Arc<dyn WorkflowStore>, queue: Arc<dyn TaskQueue>, verifier: SignatureVerifier) -> Self {
        Self {
            store,
            queue,
            verifier,
            state_machine: UpsStateMachine::new(),
        }
    }

    pub fn verifier(&self) -> &SignatureVerifier {
        &self.verifier
    }

    fn authenticate(&self, signed: Option<&SignedRequest>) -> Result<()> {
        if let Some(request) = signed {
            if !self.verifier.verify(&request.headers, &request.body) {
                return Err(DwfError::Forbidden("invalid signature".to_string()));
            }
        }
        Ok(())
    }

    async fn fan_out(&self, uids: &str, metadata: &SopMetadata) -> Result<()> {
        for uid in split_uids(uids) {
            get_or_create_sop_instance(self.store.as_ref(), &uid, metadata).await?;
        }
        Ok(())
    }

    // ========== IAN ==========

    /// 接入实例可用通知
    pub async fn ingest_ian(&self, payload: &IanPayload, signed: Option<SignedRequest>) -> Result<IngestOutcome> {
        let ian_id = required(&payload.ian_id, "IAN", "ian_id")?;
        self.authenticate(signed.as_ref())?;

        if self.store.ian_exists(&ian_id).await? {
            debug!("IAN {} already ingested", ian_id);
            return Ok(IngestOutcome::exists(ian_id));
        }

        self.create_ian(&ian_id, payload)
            .await
            .map_err(|e| ingestion_error("IAN", &ian_id, e))
    }

    async fn create_ian(&self, ian_id: &str, payload: &IanPayload) -> Result<IngestOutcome> {
        let source = non_empty(&payload.source);
        let ian = InstanceAvailabilityNotification {
            ian_id: ian_id.to_string(),
            source: source.clone(),
            sop_instance_uids: normalize_uids(&payload.sop_instance_uids),
            availability_status: non_empty(&payload.availability_status)
                .unwrap_or_else(|| DEFAULT_AVAILABILITY_STATUS.to_string()),
            timestamp: payload.timestamp.unwrap_or_else(Utc::now),
        };

        match self.store.insert_ian(&ian).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!("IAN {} inserted concurrently", ian_id);
                return Ok(IngestOutcome::exists(ian_id));
            }
            Err(e) => return Err(e),
        }

        let metadata = SopMetadata {
            stored_at_aet: source,
            patient_id: non_empty(&payload.patient_id),
            accession_number: non_empty(&payload.accession_number),
        };
        self.fan_out(&ian.sop_instance_uids, &metadata).await?;

        self.queue
            .enqueue(TASK_PROCESS_IAN, serde_json::json!({ "ian_id": ian_id }))
            .await?;

        info!("IAN {} ingested ({} instances)", ian_id, split_uids(&ian.sop_instance_uids).len());
        Ok(IngestOutcome::created(ian_id))
    }

    // ========== MPPS ==========

    /// 接入执行过程步骤
    pub async fn ingest_mpps(&self, payload: &MppsPayload, signed: Option<SignedRequest>) -> Result<IngestOutcome> {
        let pps_uid = required(&payload.pps_uid, "MPPS", "pps_uid")?;
        self.authenticate(signed.as_ref())?;

        if self.store.pps_exists(&pps_uid).await? {
            debug!("PPS {} already ingested", pps_uid);
            return Ok(IngestOutcome::exists(pps_uid));
        }

        self.create_pps(&pps_uid, payload)
            .await
            .map_err(|e| ingestion_error("PPS", &pps_uid, e))
    }

    async fn create_pps(&self, pps_uid: &str, payload: &MppsPayload) -> Result<IngestOutcome> {
        let actor = non_empty(&payload.actor);
        let sps_uid = non_empty(&payload.sps_uid);
        let pps = PerformedProcedureStep {
            pps_uid: pps_uid.to_string(),
            sps: sps_uid.clone(),
            rp: non_empty(&payload.rp_id),
            actor: actor.clone(),
            status: payload.status.clone().unwrap_or_default(),
            instance_uids: normalize_uids(&payload.instance_uids),
            created_at: payload.created_at.unwrap_or_else(Utc::now),
        };

        match self.store.insert_pps(&pps).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!("PPS {} inserted concurrently", pps_uid);
                return Ok(IngestOutcome::exists(pps_uid));
            }
            Err(e) => return Err(e),
        }

        let metadata = SopMetadata {
            stored_at_aet: actor,
            patient_id: non_empty(&payload.patient_id),
            accession_number: non_empty(&payload.accession_number),
        };
        self.fan_out(&pps.instance_uids, &metadata).await?;

        if let Some(sps_uid) = sps_uid {
            self.complete_sps(&sps_uid, pps_uid).await?;
        }

        self.queue
            .enqueue(TASK_PROCESS_PPS, serde_json::json!({ "pps_uid": pps_uid }))
            .await?;

        info!("PPS {} ingested with status {}", pps_uid, pps.status.as_str());
        Ok(IngestOutcome::created(pps_uid))
    }

    /// 关联SPS置为 Completed，已完成时不重复写入；SPS缺失不影响PPS
    async fn complete_sps(&self, sps_uid: &str, pps_uid: &str) -> Result<()> {
        match self.store.find_sps(sps_uid).await? {
            Some(sps) if sps.status == SpsStatus::Completed => {
                debug!("SPS {} already Completed", sps_uid);
                Ok(())
            }
            Some(_) => match self.store.update_sps_status(sps_uid, &SpsStatus::Completed).await {
                Ok(()) => {
                    info!("SPS {} completed by PPS {}", sps_uid, pps_uid);
                    Ok(())
                }
                Err(DwfError::NotFound(_)) => {
                    warn!("SPS {} referenced by PPS {} not found", sps_uid, pps_uid);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            None => {
                warn!("SPS {} referenced by PPS {} not found", sps_uid, pps_uid);
                Ok(())
            }
        }
    }

    // ========== UPS ==========

    /// 接入统一过程步骤
    pub async fn ingest_ups(&self, payload: &UpsPayload, signed: Option<SignedRequest>) -> Result<IngestOutcome> {
        let ups_id = required(&payload.ups_id, "UPS", "ups_id")?;
        self.authenticate(signed.as_ref())?;

        if self.store.ups_exists(&ups_id).await? {
            debug!("UPS {} already ingested", ups_id);
            return Ok(IngestOutcome::exists(ups_id));
        }

        self.create_ups(&ups_id, payload)
            .await
            .map_err(|e| ingestion_error("UPS", &ups_id, e))
    }

    async fn create_ups(&self, ups_id: &str, payload: &UpsPayload) -> Result<IngestOutcome> {
        let now = Utc::now();
        let status = payload.ups_status.clone().unwrap_or_default();
        let ups = UnifiedProcedureStep {
            ups_id: ups_id.to_string(),
            rp: non_empty(&payload.rp_id),
            actor: non_empty(&payload.actor),
            instance_uids: normalize_uids(&payload.instance_uids),
            start_time: (status == UpsStatus::InProgress).then_some(now),
            end_time: status.is_terminal().then_some(now),
            ups_status: status,
            created_at: now,
        };

        match self.store.insert_ups(&ups).await {
            Ok(()) => {}
            Err(e) if e.is_conflict() => {
                debug!("UPS {} inserted concurrently", ups_id);
                return Ok(IngestOutcome::exists(ups_id));
            }
            Err(e) => return Err(e),
        }

        if ups.ups_status == UpsStatus::Completed {
            self.fan_out(&ups.instance_uids, &SopMetadata::default()).await?;
        }

        info!("UPS {} ingested with status {}", ups_id, ups.ups_status);
        Ok(IngestOutcome::created(ups_id))
    }

    /// 推进UPS生命周期
    ///
    /// 写入以读取时的状态为前提，并发变更中落后的一方得到 [`DwfError::InvalidStateTransition`]。
    pub async fn update_ups_status(
        &self,
        ups_id: &str,
        update: &UpsStatusUpdate,
        signed: Option<SignedRequest>,
    ) -> Result<UnifiedProcedureStep> {
        self.authenticate(signed.as_ref())?;

        let mut ups = self
            .store
            .find_ups(ups_id)
            .await?
            .ok_or_else(|| DwfError::NotFound(format!("UPS {}", ups_id)))?;

        let next = self.state_machine.transition_to(&ups.ups_status, &update.ups_status)?;
        let now = Utc::now();
        if next == UpsStatus::InProgress && ups.start_time.is_none() {
            ups.start_time = Some(now);
        }
        if next.is_terminal() {
            ups.end_time = Some(now);
        }
        if let Some(actor) = non_empty(&update.actor) {
            ups.actor = Some(actor);
        }

        let previous = std::mem::replace(&mut ups.ups_status, next);
        self.store.update_ups(&ups, &previous).await?;

        if ups.ups_status == UpsStatus::Completed {
            self.fan_out(&ups.instance_uids, &SopMetadata::default())
                .await
                .map_err(|e| ingestion_error("UPS", ups_id, e))?;
        }

        info!("UPS {} transitioned {} -> {}", ups_id, previous, ups.ups_status);
        Ok(ups)
    }
}
