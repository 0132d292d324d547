//! 持久化存储接口
//!
//! 所有写入都以自然唯一键为准（message_id / ian_id / pps_uid / ups_id / sop_uid / sps_uid）。
//! `insert_*` 遇到唯一键冲突时必须返回 [`DwfError::Conflict`](crate::DwfError::Conflict)，
//! 由调用方转换为幂等的"已存在"结果。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::*;

/// 工作列表过滤器，未设置的条件匹配全部
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorklistFilter {
    pub manager: Option<String>,
    pub user: Option<String>,
}

impl WorklistFilter {
    pub fn matches(&self, item: &WorklistItem) -> bool {
        let manager_ok = match &self.manager {
            Some(m) => item.worklist_manager.as_deref() == Some(m.as_str()),
            None => true,
        };
        let user_ok = match &self.user {
            Some(u) => item.assigned_to.as_deref() == Some(u.as_str()),
            None => true,
        };
        manager_ok && user_ok
    }
}

/// 工作流持久化存储
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ========== 入站消息 ==========

    async fn find_message(&self, message_id: &str) -> Result<Option<MessageRecord>>;

    async fn insert_message(&self, message: &MessageRecord) -> Result<()>;

    // ========== IAN ==========

    async fn find_ian(&self, ian_id: &str) -> Result<Option<InstanceAvailabilityNotification>>;

    async fn insert_ian(&self, ian: &InstanceAvailabilityNotification) -> Result<()>;

    async fn ian_exists(&self, ian_id: &str) -> Result<bool> {
        Ok(self.find_ian(ian_id).await?.is_some())
    }

    // ========== SOP实例 ==========

    async fn find_sop_instance(&self, sop_uid: &str) -> Result<Option<SopInstance>>;

    async fn insert_sop_instance(&self, instance: &SopInstance) -> Result<()>;

    // ========== PPS ==========

    async fn find_pps(&self, pps_uid: &str) -> Result<Option<PerformedProcedureStep>>;

    async fn insert_pps(&self, pps: &PerformedProcedureStep) -> Result<()>;

    async fn pps_exists(&self, pps_uid: &str) -> Result<bool> {
        Ok(self.find_pps(pps_uid).await?.is_some())
    }

    // ========== SPS ==========

    async fn find_sps(&self, sps_uid: &str) -> Result<Option<ScheduledProcedureStep>>;

    async fn insert_sps(&self, sps: &ScheduledProcedureStep) -> Result<()>;

    /// 按键更新SPS状态，SPS不存在时返回 NotFound
    async fn update_sps_status(&self, sps_uid: &str, status: &SpsStatus) -> Result<()>;

    // ========== UPS ==========

    async fn find_ups(&self, ups_id: &str) -> Result<Option<UnifiedProcedureStep>>;

    async fn insert_ups(&self, ups: &UnifiedProcedureStep) -> Result<()>;

    /// 按键整体更新UPS，仅当存储中的状态仍为 `expected` 时写入（比较并交换）。
    /// UPS不存在时返回 NotFound，状态已被修改时返回 InvalidStateTransition。
    async fn update_ups(&self, ups: &UnifiedProcedureStep, expected: &UpsStatus) -> Result<()>;

    async fn ups_exists(&self, ups_id: &str) -> Result<bool> {
        Ok(self.find_ups(ups_id).await?.is_some())
    }

    // ========== 工作列表 ==========

    async fn list_worklist_items(&self, filter: &WorklistFilter) -> Result<Vec<WorklistItem>>;

    async fn insert_worklist_item(&self, item: &WorklistItem) -> Result<()>;

    /// 清除工作列表项的数据不完整标记，返回是否有改动
    async fn clear_partial_data_flag(&self, name: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(manager: Option<&str>, user: Option<&str>) -> WorklistItem {
        WorklistItem {
            name: "WLI-1".to_string(),
            worklist_id: "WL-1".to_string(),
            rp: None,
            assigned_to: user.map(str::to_string),
            worklist_manager: manager.map(str::to_string),
            status: "Open".to_string(),
            partial_data_flag: false,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = WorklistFilter::default();
        assert!(filter.matches(&item(None, None)));
        assert!(filter.matches(&item(Some("mgr"), Some("alice"))));
    }

    #[test]
    fn test_filters_combine_with_and() {
        let filter = WorklistFilter {
            manager: Some("mgr".to_string()),
            user: Some("alice".to_string()),
        };
        assert!(filter.matches(&item(Some("mgr"), Some("alice"))));
        assert!(!filter.matches(&item(Some("mgr"), Some("bob"))));
        assert!(!filter.matches(&item(None, Some("alice"))));
    }
}
