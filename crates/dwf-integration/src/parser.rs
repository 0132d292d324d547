//! HL7v2 规范化策略
//!
//! 两种策略实现同一个 [`MessageParser`] 接口：
//! - [`StructuredParser`]：基于 [`Hl7Parser`] 的结构化解析，失败时退回朴素拆分
//! - [`NaiveParser`]：按 `|` 直接拆分，不理解HL7语法
//!
//! 两者都不会失败，无法识别的字段取默认值（消息ID自动生成，类型为 `UNKNOWN`）。

use dwf_core::{utils::generate_message_id, NormalizedMessage, UNKNOWN_MESSAGE_TYPE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::hl7::{split_segments, Hl7Message, Hl7Parser};

/// HL7规范化接口
pub trait MessageParser: Send + Sync {
    fn normalize(&self, raw: &str) -> NormalizedMessage;

    fn name(&self) -> &'static str;
}

/// 解析策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParserKind {
    #[default]
    Structured,
    Naive,
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "structured" => Ok(Self::Structured),
            "naive" => Ok(Self::Naive),
            other => Err(format!("unknown HL7 parser: {}", other)),
        }
    }
}

impl fmt::Display for ParserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structured => f.write_str("structured"),
            Self::Naive => f.write_str("naive"),
        }
    }
}

/// 按配置创建解析器
pub fn build_parser(kind: ParserKind) -> Box<dyn MessageParser> {
    match kind {
        ParserKind::Structured => Box::new(StructuredParser::new()),
        ParserKind::Naive => Box::new(NaiveParser),
    }
}

/// "应用|机构"，任一为空时取另一个
fn combine_actor(app: Option<String>, facility: Option<String>) -> Option<String> {
    match (app, facility) {
        (Some(a), Some(f)) => Some(format!("{}|{}", a, f)),
        (a, f) => a.or(f),
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// 空报文的默认结果
fn empty_message(raw: &str) -> NormalizedMessage {
    NormalizedMessage {
        message_id: generate_message_id(),
        message_type: UNKNOWN_MESSAGE_TYPE.to_string(),
        payload: raw.to_string(),
        source_actor: None,
        destination_actor: None,
        correlation_id: None,
    }
}

/// 单个字段的取值方式
type FieldStrategy = fn(&Hl7Message) -> Option<String>;

/// 依次尝试，第一个非空值胜出
fn first_present(message: &Hl7Message, strategies: &[FieldStrategy]) -> Option<String> {
    strategies.iter().find_map(|strategy| present(strategy(message)))
}

const MESSAGE_ID: &[FieldStrategy] = &[
    |m| m.header().ok().map(|h| h.message_control_id),
    |m| m.field_value("MSH", 10),
];
const MESSAGE_TYPE: &[FieldStrategy] = &[
    |m| m.header().ok().map(|h| h.message_type),
    |m| m.field_value("MSH", 9),
];
const SENDING_APP: &[FieldStrategy] = &[
    |m| m.header().ok().map(|h| h.sending_application),
    |m| m.field_value("MSH", 3),
];
const SENDING_FACILITY: &[FieldStrategy] = &[
    |m| m.header().ok().map(|h| h.sending_facility),
    |m| m.field_value("MSH", 4),
];
const RECEIVING_APP: &[FieldStrategy] = &[
    |m| m.header().ok().map(|h| h.receiving_application),
    |m| m.field_value("MSH", 5),
];
const RECEIVING_FACILITY: &[FieldStrategy] = &[
    |m| m.header().ok().map(|h| h.receiving_facility),
    |m| m.field_value("MSH", 6),
];
/// ORC-2 优先，其次 PID-3
const CORRELATION: &[FieldStrategy] = &[|m| m.field_value("ORC", 2), |m| m.field_value("PID", 3)];

/// 结构化解析策略
#[derive(Debug, Clone, Default)]
pub struct StructuredParser {
    parser: Hl7Parser,
    fallback: NaiveParser,
}

impl StructuredParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MessageParser for StructuredParser {
    fn normalize(&self, raw: &str) -> NormalizedMessage {
        if raw.trim().is_empty() {
            return empty_message(raw);
        }

        let message = match self.parser.parse(raw) {
            Ok(message) => message,
            Err(e) => {
                debug!("Structured HL7 parse failed ({}), using naive extraction", e);
                return self.fallback.normalize(raw);
            }
        };

        NormalizedMessage {
            message_id: first_present(&message, MESSAGE_ID).unwrap_or_else(generate_message_id),
            message_type: first_present(&message, MESSAGE_TYPE)
                .unwrap_or_else(|| UNKNOWN_MESSAGE_TYPE.to_string()),
            payload: raw.to_string(),
            source_actor: combine_actor(
                first_present(&message, SENDING_APP),
                first_present(&message, SENDING_FACILITY),
            ),
            destination_actor: combine_actor(
                first_present(&message, RECEIVING_APP),
                first_present(&message, RECEIVING_FACILITY),
            ),
            correlation_id: first_present(&message, CORRELATION),
        }
    }

    fn name(&self) -> &'static str {
        "structured"
    }
}

/// 朴素拆分策略
///
/// 每段按 `|` 拆分后按下标取值，MSH 下标 8/9/2/3/4/5 对应 MSH-9/10/3/4/5/6。
/// ORC 取下标1、PID 取下标3（过短时取下标2），与结构化策略的 ORC-2 不同。
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveParser;

impl MessageParser for NaiveParser {
    fn normalize(&self, raw: &str) -> NormalizedMessage {
        if raw.trim().is_empty() {
            return empty_message(raw);
        }

        let mut segments: HashMap<&str, Vec<Vec<&str>>> = HashMap::new();
        for line in split_segments(raw) {
            let parts: Vec<&str> = line.split('|').collect();
            segments.entry(parts[0]).or_default().push(parts);
        }

        let first = |name: &str| segments.get(name).and_then(|list| list.first());
        let part = |parts: &Vec<&str>, idx: usize| present(parts.get(idx).map(|s| s.to_string()));

        let (mut message_id, mut message_type, mut source_actor, mut destination_actor) = (None, None, None, None);
        if let Some(msh) = first("MSH") {
            message_type = part(msh, 8);
            message_id = part(msh, 9);
            source_actor = combine_actor(part(msh, 2), part(msh, 3));
            destination_actor = combine_actor(part(msh, 4), part(msh, 5));
        } else {
            warn!("HL7 message without MSH segment");
        }

        let correlation_id = first("ORC").and_then(|orc| part(orc, 1)).or_else(|| {
            first("PID").and_then(|pid| if pid.len() > 3 { part(pid, 3) } else { part(pid, 2) })
        });

        NormalizedMessage {
            message_id: message_id.unwrap_or_else(generate_message_id),
            message_type: message_type.unwrap_or_else(|| UNKNOWN_MESSAGE_TYPE.to_string()),
            payload: raw.to_string(),
            source_actor,
            destination_actor,
            correlation_id,
        }
    }

    fn name(&self) -> &'static str {
        "naive"
    }
}
