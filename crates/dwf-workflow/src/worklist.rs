//! 工作列表查询
//!
//! 按工作列表管理者和被分配用户过滤，两个条件同时设置时取交集。

use dwf_core::{DwfError, Result, WorkflowStore, WorklistFilter, WorklistItem};
use std::sync::Arc;
use tracing::debug;

/// 工作列表服务
#[derive(Clone)]
pub struct WorklistService {
    store: Arc<dyn WorkflowStore>,
}

impl WorklistService {
    pub fn new(store: Arc<dyn WorkflowStore>) -> Self {
        Self { store }
    }

    /// 获取工作列表，按 worklist_id 排序
    pub async fn get_worklist(&self, filter: &WorklistFilter) -> Result<Vec<WorklistItem>> {
        let items = self.store.list_worklist_items(filter).await?;
        debug!(
            "Worklist query manager={:?} user={:?} returned {} items",
            filter.manager,
            filter.user,
            items.len()
        );
        Ok(items)
    }

    /// 添加工作项
    pub async fn add_item(&self, item: WorklistItem) -> Result<WorklistItem> {
        if item.name.trim().is_empty() || item.worklist_id.trim().is_empty() {
            return Err(DwfError::Validation(
                "worklist item requires name and worklist_id".to_string(),
            ));
        }
        self.store.insert_worklist_item(&item).await?;
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dwf_database::MemoryStore;

    fn item(name: &str, worklist_id: &str, manager: Option<&str>, user: Option<&str>) -> WorklistItem {
        WorklistItem {
            name: name.to_string(),
            worklist_id: worklist_id.to_string(),
            rp: Some("RP-0001".to_string()),
            assigned_to: user.map(str::to_string),
            worklist_manager: manager.map(str::to_string),
            status: "Open".to_string(),
            partial_data_flag: false,
        }
    }

    async fn seeded() -> WorklistService {
        let service = WorklistService::new(Arc::new(MemoryStore::new()));
        service.add_item(item("WLI-3", "WL-3", Some("radiology"), Some("alice"))).await.unwrap();
        service.add_item(item("WLI-1", "WL-1", Some("radiology"), Some("bob"))).await.unwrap();
        service.add_item(item("WLI-2", "WL-2", Some("cardiology"), Some("alice"))).await.unwrap();
        service.add_item(item("WLI-4", "WL-4", None, None)).await.unwrap();
        service
    }

    fn ids(items: &[WorklistItem]) -> Vec<&str> {
        items.iter().map(|i| i.worklist_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_no_filter_returns_all_ordered() {
        let service = seeded().await;
        let items = service.get_worklist(&WorklistFilter::default()).await.unwrap();
        assert_eq!(ids(&items), vec!["WL-1", "WL-2", "WL-3", "WL-4"]);
    }

    #[tokio::test]
    async fn test_filters_combine_with_and() {
        let service = seeded().await;

        let by_user = service
            .get_worklist(&WorklistFilter {
                manager: None,
                user: Some("alice".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(ids(&by_user), vec!["WL-2", "WL-3"]);

        let both = service
            .get_worklist(&WorklistFilter {
                manager: Some("radiology".to_string()),
                user: Some("alice".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(ids(&both), vec!["WL-3"]);
    }

    #[tokio::test]
    async fn test_add_item_requires_keys() {
        let service = WorklistService::new(Arc::new(MemoryStore::new()));
        let err = service.add_item(item("", "WL-1", None, None)).await.unwrap_err();
        assert!(matches!(err, DwfError::Validation(_)));
    }
}
