//! JSON消息规范化
//!
//! 入站JSON形如 `{message_id, message_type, payload, source_actor, destination_actor, correlation_id}`。

use dwf_core::{utils::generate_message_id, DwfError, NormalizedMessage, Result, UNKNOWN_MESSAGE_TYPE};
use serde_json::Value;

fn text(body: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    match body.get(key)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// 规范化JSON消息
///
/// `payload` 为对象或数组时序列化为JSON文本，缺失时保存整个请求体。
pub fn normalize_json(body: &Value) -> Result<NormalizedMessage> {
    let object = body
        .as_object()
        .ok_or_else(|| DwfError::Validation("JSON message body must be an object".to_string()))?;

    let payload = match object.get("payload") {
        None | Some(Value::Null) => serde_json::to_string(body)?,
        Some(Value::String(s)) => s.clone(),
        Some(other) => serde_json::to_string(other)?,
    };

    Ok(NormalizedMessage {
        message_id: text(object, "message_id").unwrap_or_else(generate_message_id),
        message_type: text(object, "message_type").unwrap_or_else(|| UNKNOWN_MESSAGE_TYPE.to_string()),
        payload,
        source_actor: text(object, "source_actor"),
        destination_actor: text(object, "destination_actor"),
        correlation_id: text(object, "correlation_id"),
    })
}
