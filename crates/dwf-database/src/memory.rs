//! 内存存储
//!
//! 与数据库实现保持相同的唯一键语义：重复插入返回 `DwfError::Conflict`。

use async_trait::async_trait;
use dwf_core::{models::*, DwfError, Result, WorkflowStore, WorklistFilter};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Tables {
    messages: HashMap<String, MessageRecord>,
    ians: HashMap<String, InstanceAvailabilityNotification>,
    sop_instances: HashMap<String, SopInstance>,
    pps: HashMap<String, PerformedProcedureStep>,
    sps: HashMap<String, ScheduledProcedureStep>,
    ups: HashMap<String, UnifiedProcedureStep>,
    worklist: HashMap<String, WorklistItem>,
}

/// 内存工作流存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    sps_updates: AtomicUsize,
}

fn insert_unique<T: Clone>(map: &mut HashMap<String, T>, entity: &str, key: &str, value: &T) -> Result<()> {
    if map.contains_key(key) {
        return Err(DwfError::Conflict(format!("{} {}", entity, key)));
    }
    map.insert(key.to_string(), value.clone());
    Ok(())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// SPS状态写入次数
    pub fn sps_update_count(&self) -> usize {
        self.sps_updates.load(Ordering::SeqCst)
    }

    pub async fn message_count(&self) -> usize {
        self.tables.read().await.messages.len()
    }

    pub async fn sop_instance_count(&self) -> usize {
        self.tables.read().await.sop_instances.len()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn find_message(&self, message_id: &str) -> Result<Option<MessageRecord>> {
        Ok(self.tables.read().await.messages.get(message_id).cloned())
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.messages, "message", &message.message_id, message)
    }

    async fn find_ian(&self, ian_id: &str) -> Result<Option<InstanceAvailabilityNotification>> {
        Ok(self.tables.read().await.ians.get(ian_id).cloned())
    }

    async fn insert_ian(&self, ian: &InstanceAvailabilityNotification) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.ians, "IAN", &ian.ian_id, ian)
    }

    async fn find_sop_instance(&self, sop_uid: &str) -> Result<Option<SopInstance>> {
        Ok(self.tables.read().await.sop_instances.get(sop_uid).cloned())
    }

    async fn insert_sop_instance(&self, instance: &SopInstance) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.sop_instances, "SOP instance", &instance.sop_uid, instance)
    }

    async fn find_pps(&self, pps_uid: &str) -> Result<Option<PerformedProcedureStep>> {
        Ok(self.tables.read().await.pps.get(pps_uid).cloned())
    }

    async fn insert_pps(&self, pps: &PerformedProcedureStep) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.pps, "PPS", &pps.pps_uid, pps)
    }

    async fn find_sps(&self, sps_uid: &str) -> Result<Option<ScheduledProcedureStep>> {
        Ok(self.tables.read().await.sps.get(sps_uid).cloned())
    }

    async fn insert_sps(&self, sps: &ScheduledProcedureStep) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.sps, "SPS", &sps.sps_uid, sps)
    }

    async fn update_sps_status(&self, sps_uid: &str, status: &SpsStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        let sps = tables
            .sps
            .get_mut(sps_uid)
            .ok_or_else(|| DwfError::NotFound(format!("SPS {}", sps_uid)))?;
        sps.status = status.clone();
        self.sps_updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn find_ups(&self, ups_id: &str) -> Result<Option<UnifiedProcedureStep>> {
        Ok(self.tables.read().await.ups.get(ups_id).cloned())
    }

    async fn insert_ups(&self, ups: &UnifiedProcedureStep) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.ups, "UPS", &ups.ups_id, ups)
    }

    async fn update_ups(&self, ups: &UnifiedProcedureStep, expected: &UpsStatus) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.ups.get_mut(&ups.ups_id) {
            Some(existing) if existing.ups_status == *expected => {
                *existing = ups.clone();
                Ok(())
            }
            Some(existing) => Err(DwfError::InvalidStateTransition {
                from: existing.ups_status.to_string(),
                event: ups.ups_status.to_string(),
            }),
            None => Err(DwfError::NotFound(format!("UPS {}", ups.ups_id))),
        }
    }

    async fn list_worklist_items(&self, filter: &WorklistFilter) -> Result<Vec<WorklistItem>> {
        let tables = self.tables.read().await;
        let mut items: Vec<WorklistItem> = tables
            .worklist
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect();
        items.sort_by(|a, b| (&a.worklist_id, &a.name).cmp(&(&b.worklist_id, &b.name)));
        Ok(items)
    }

    async fn insert_worklist_item(&self, item: &WorklistItem) -> Result<()> {
        let mut tables = self.tables.write().await;
        insert_unique(&mut tables.worklist, "worklist item", &item.name, item)
    }

    async fn clear_partial_data_flag(&self, name: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.worklist.get_mut(name) {
            Some(item) if item.partial_data_flag => {
                item.partial_data_flag = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
