//! 通用工具函数
//!
//! UID列表在实体上统一存储为逗号分隔的规范形式，接入端可能传入字符串或数组。

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{SopInstance, SopMetadata};
use crate::store::WorkflowStore;

/// 接入负载中的UID列表：逗号分隔字符串或字符串数组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UidList {
    Delimited(String),
    List(Vec<String>),
}

impl Default for UidList {
    fn default() -> Self {
        UidList::List(Vec::new())
    }
}

impl From<&str> for UidList {
    fn from(value: &str) -> Self {
        UidList::Delimited(value.to_string())
    }
}

impl From<Vec<String>> for UidList {
    fn from(value: Vec<String>) -> Self {
        UidList::List(value)
    }
}

/// 反序列化UID列表，`null` 视为空列表
pub fn deserialize_uid_list<'de, D>(deserializer: D) -> std::result::Result<UidList, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<UidList>::deserialize(deserializer)?.unwrap_or_default())
}

/// 宽松解析时间：RFC 3339、无时区的ISO格式（按UTC）、DICOM `YYYYMMDDHHMMSS` 或纯日期。
/// 空字符串返回 None。
pub fn parse_lenient_datetime(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }

    const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y%m%d%H%M%S"];
    const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y%m%d"];

    DATETIME_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(value, f).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|f| NaiveDate::parse_from_str(value, f).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 反序列化可选时间：`null`、空字符串或无法识别的文本均视为未提供
pub fn deserialize_lenient_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let parsed = match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(text)) => {
            let parsed = parse_lenient_datetime(&text);
            if parsed.is_none() && !text.trim().is_empty() {
                warn!("Ignoring unrecognised timestamp {:?}", text);
            }
            parsed
        }
        Some(other) => {
            warn!("Ignoring non-text timestamp {}", other);
            None
        }
    };
    Ok(parsed)
}

/// 生成消息标识
pub fn generate_message_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// 验证DICOM UID格式
pub fn is_valid_dicom_uid(uid: &str) -> bool {
    !uid.is_empty() && uid.len() <= 64 && uid.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// 规范化UID列表：去空白、丢弃空项、保持原有顺序，以逗号连接
pub fn normalize_uids(input: &UidList) -> String {
    let parts: Vec<&str> = match input {
        UidList::Delimited(s) => s.split(',').map(str::trim).filter(|u| !u.is_empty()).collect(),
        UidList::List(items) => items
            .iter()
            .flat_map(|item| item.split(','))
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .collect(),
    };
    parts.join(",")
}

/// 拆分规范化的UID列表
pub fn split_uids(canonical: &str) -> Vec<String> {
    canonical
        .split(',')
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .collect()
}

/// 按UID获取或创建SOP实例
///
/// 已存在的实例原样返回，不覆盖元数据（先写入者胜出）。并发创建时，
/// 存储层唯一键冲突后重新读取胜出的记录。
pub async fn get_or_create_sop_instance(
    store: &dyn WorkflowStore,
    uid: &str,
    metadata: &SopMetadata,
) -> Result<SopInstance> {
    if let Some(existing) = store.find_sop_instance(uid).await? {
        debug!("SOP instance {} already known, keeping original metadata", uid);
        return Ok(existing);
    }

    if !is_valid_dicom_uid(uid) {
        warn!("SOP instance UID {} is not a conformant DICOM UID", uid);
    }

    let instance = SopInstance {
        sop_uid: uid.to_string(),
        stored_at_aet: metadata.stored_at_aet.clone(),
        patient_id: metadata.patient_id.clone(),
        accession_number: metadata.accession_number.clone(),
        created_at: Utc::now(),
    };

    match store.insert_sop_instance(&instance).await {
        Ok(()) => {
            debug!("Created SOP instance {}", uid);
            Ok(instance)
        }
        Err(e) if e.is_conflict() => {
            debug!("SOP instance {} created concurrently, re-reading", uid);
            store
                .find_sop_instance(uid)
                .await?
                .ok_or_else(|| crate::DwfError::Database(format!("SOP instance {} vanished after conflict", uid)))
        }
        Err(e) => Err(e),
    }
}
