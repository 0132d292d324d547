//! IAN / PPS 后续处理
//!
//! 将已提交记录中的SOP实例交给可替换的匹配器，匹配器决定哪些工作项的
//! 部分数据标记可以清除。默认匹配器不做任何匹配。

use async_trait::async_trait;
use dwf_core::{
    models::{InstanceAvailabilityNotification, PerformedProcedureStep},
    queue::{TASK_PROCESS_IAN, TASK_PROCESS_PPS},
    utils::split_uids,
    DwfError, Result, TaskEnvelope, TaskHandler, WorkflowStore,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 触发匹配的记录
#[derive(Debug, Clone, Copy)]
pub enum MatchSource<'a> {
    Ian(&'a InstanceAvailabilityNotification),
    Pps(&'a PerformedProcedureStep),
}

/// 匹配结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchResult {
    /// 可清除部分数据标记的工作项
    pub completed_worklist_items: Vec<String>,
}

/// SOP实例到申请检查的匹配器
#[async_trait]
pub trait ProcedureMatcher: Send + Sync {
    async fn match_instances(&self, source: MatchSource<'_>, sop_uids: &[String]) -> Result<MatchResult>;
}

/// 默认匹配器
#[derive(Debug, Clone, Default)]
pub struct NoopMatcher;

#[async_trait]
impl ProcedureMatcher for NoopMatcher {
    async fn match_instances(&self, _source: MatchSource<'_>, sop_uids: &[String]) -> Result<MatchResult> {
        debug!("No procedure matcher configured, skipping {} instances", sop_uids.len());
        Ok(MatchResult::default())
    }
}

async fn apply_match(store: &dyn WorkflowStore, result: MatchResult) -> Result<usize> {
    let mut cleared = 0;
    for name in result.completed_worklist_items {
        if store.clear_partial_data_flag(&name).await? {
            info!("Cleared partial data flag on worklist item {}", name);
            cleared += 1;
        }
    }
    Ok(cleared)
}

fn required_arg<'a>(task: &'a TaskEnvelope, key: &str) -> Result<&'a str> {
    task.arg_str(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| DwfError::Validation(format!("task {} missing argument {}", task.task_name, key)))
}

/// `process_ian` 任务处理器
pub struct IanProcessor {
    store: Arc<dyn WorkflowStore>,
    matcher: Arc<dyn ProcedureMatcher>,
}

impl IanProcessor {
    pub fn new(store: Arc<dyn WorkflowStore>, matcher: Arc<dyn ProcedureMatcher>) -> Self {
        Self { store, matcher }
    }
}

#[async_trait]
impl TaskHandler for IanProcessor {
    async fn handle(&self, task: &TaskEnvelope) -> Result<()> {
        let ian_id = required_arg(task, "ian_id")?;
        let Some(ian) = self.store.find_ian(ian_id).await? else {
            warn!("IAN {} not found for post-processing", ian_id);
            return Ok(());
        };

        let uids = split_uids(&ian.sop_instance_uids);
        let result = self.matcher.match_instances(MatchSource::Ian(&ian), &uids).await?;
        let cleared = apply_match(self.store.as_ref(), result).await?;
        debug!("Processed IAN {} ({} instances, {} items cleared)", ian_id, uids.len(), cleared);
        Ok(())
    }

    fn task_name(&self) -> &str {
        TASK_PROCESS_IAN
    }
}

/// `process_pps` 任务处理器
pub struct PpsProcessor {
    store: Arc<dyn WorkflowStore>,
    matcher: Arc<dyn ProcedureMatcher>,
}

impl PpsProcessor {
    pub fn new(store: Arc<dyn WorkflowStore>, matcher: Arc<dyn ProcedureMatcher>) -> Self {
        Self { store, matcher }
    }
}

#[async_trait]
impl TaskHandler for PpsProcessor {
    async fn handle(&self, task: &TaskEnvelope) -> Result<()> {
        let pps_uid = required_arg(task, "pps_uid")?;
        let Some(pps) = self.store.find_pps(pps_uid).await? else {
            warn!("PPS {} not found for post-processing", pps_uid);
            return Ok(());
        };

        let uids = split_uids(&pps.instance_uids);
        let result = self.matcher.match_instances(MatchSource::Pps(&pps), &uids).await?;
        let cleared = apply_match(self.store.as_ref(), result).await?;
        debug!("Processed PPS {} ({} instances, {} items cleared)", pps_uid, uids.len(), cleared);
        Ok(())
    }

    fn task_name(&self) -> &str {
        TASK_PROCESS_PPS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use dwf_core::{models::*, TaskRegistry};
    use dwf_database::MemoryStore;
    use std::sync::Mutex;

    /// 按记录中的全部实例清除固定工作项
    struct FixedMatcher {
        item: String,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ProcedureMatcher for FixedMatcher {
        async fn match_instances(&self, _source: MatchSource<'_>, sop_uids: &[String]) -> Result<MatchResult> {
            self.seen.lock().unwrap().extend(sop_uids.iter().cloned());
            Ok(MatchResult {
                completed_worklist_items: vec![self.item.clone()],
            })
        }
    }

    async fn store_with_records() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_ian(&InstanceAvailabilityNotification {
                ian_id: "IAN-1".to_string(),
                source: None,
                sop_instance_uids: "1.2.3.4,1.2.3.5".to_string(),
                availability_status: DEFAULT_AVAILABILITY_STATUS.to_string(),
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
        store
            .insert_worklist_item(&WorklistItem {
                name: "WLI-1".to_string(),
                worklist_id: "WL-1".to_string(),
                rp: Some("RP-1".to_string()),
                assigned_to: None,
                worklist_manager: None,
                status: "Open".to_string(),
                partial_data_flag: true,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_ian_processor_applies_matcher_result() {
        let store = store_with_records().await;
        let matcher = Arc::new(FixedMatcher {
            item: "WLI-1".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let processor = IanProcessor::new(store.clone(), matcher.clone());

        let task = TaskEnvelope::new(TASK_PROCESS_IAN, serde_json::json!({"ian_id": "IAN-1"}));
        processor.handle(&task).await.unwrap();

        assert_eq!(*matcher.seen.lock().unwrap(), vec!["1.2.3.4", "1.2.3.5"]);
        let items = store.list_worklist_items(&Default::default()).await.unwrap();
        assert!(!items[0].partial_data_flag);
    }

    #[tokio::test]
    async fn test_noop_matcher_changes_nothing() {
        let store = store_with_records().await;
        let registry = TaskRegistry::new()
            .register(Arc::new(IanProcessor::new(store.clone(), Arc::new(NoopMatcher))))
            .register(Arc::new(PpsProcessor::new(store.clone(), Arc::new(NoopMatcher))));

        let task = TaskEnvelope::new(TASK_PROCESS_IAN, serde_json::json!({"ian_id": "IAN-1"}));
        registry.dispatch(&task).await.unwrap();

        let items = store.list_worklist_items(&Default::default()).await.unwrap();
        assert!(items[0].partial_data_flag);
    }

    #[tokio::test]
    async fn test_missing_record_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let processor = PpsProcessor::new(store, Arc::new(NoopMatcher));

        let task = TaskEnvelope::new(TASK_PROCESS_PPS, serde_json::json!({"pps_uid": "MPPS-404"}));
        processor.handle(&task).await.unwrap();

        let bad = TaskEnvelope::new(TASK_PROCESS_PPS, serde_json::json!({}));
        assert!(matches!(processor.handle(&bad).await, Err(DwfError::Validation(_))));
    }
}
