//! HL7接口模块
//!
//! 实现HL7 v2.x消息的结构化解析，支持：
//! - 按MSH声明的分隔符拆分段、字段、重复、组件
//! - 按HL7编号访问字段（MSH-1 为字段分隔符，MSH-2 为编码字符）
//! - 读取MSH段头与HL7时间戳

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum Hl7Error {
    #[error("Invalid HL7 message format: {0}")]
    InvalidFormat(String),
    #[error("Missing required field: {0}")]
    MissingField(String),
    #[error("Parse error: {0}")]
    ParseError(String),
}

pub type Hl7Result<T> = std::result::Result<T, Hl7Error>;

/// 段分隔：CR、CRLF 或 LF
fn segment_splitter() -> &'static Regex {
    static SPLITTER: OnceLock<Regex> = OnceLock::new();
    SPLITTER.get_or_init(|| Regex::new(r"\r\n?|\n").expect("segment separator pattern"))
}

fn segment_name_pattern() -> &'static Regex {
    static NAME: OnceLock<Regex> = OnceLock::new();
    NAME.get_or_init(|| Regex::new(r"^[A-Z][A-Z0-9]{2}$").expect("segment name pattern"))
}

/// 按段分隔符拆分报文，丢弃空行
pub fn split_segments(raw: &str) -> Vec<&str> {
    segment_splitter()
        .split(raw.trim())
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// 分隔符定义
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delimiters {
    pub field: char,
    pub component: char,
    pub repetition: char,
    pub escape: char,
    pub subcomponent: char,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self {
            field: '|',
            component: '^',
            repetition: '~',
            escape: '\\',
            subcomponent: '&',
        }
    }
}

impl Delimiters {
    /// 从MSH段头读取分隔符
    fn from_msh(line: &str) -> Hl7Result<Self> {
        let mut chars = line.chars().skip(3);
        let field = chars
            .next()
            .ok_or_else(|| Hl7Error::InvalidFormat("MSH segment has no field separator".to_string()))?;
        let encoding: Vec<char> = chars.take_while(|c| *c != field).collect();
        if encoding.is_empty() {
            return Err(Hl7Error::InvalidFormat("MSH-2 encoding characters missing".to_string()));
        }

        let defaults = Self::default();
        Ok(Self {
            field,
            component: encoding[0],
            repetition: encoding.get(1).copied().unwrap_or(defaults.repetition),
            escape: encoding.get(2).copied().unwrap_or(defaults.escape),
            subcomponent: encoding.get(3).copied().unwrap_or(defaults.subcomponent),
        })
    }
}

/// HL7字段：重复 -> 组件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hl7Field {
    pub repetitions: Vec<Vec<String>>,
}

impl Hl7Field {
    fn parse(raw: &str, delimiters: &Delimiters) -> Self {
        let repetitions = raw
            .split(delimiters.repetition)
            .map(|rep| rep.split(delimiters.component).map(str::to_string).collect())
            .collect();
        Self { repetitions }
    }

    /// 不拆分的原样字段（MSH-1、MSH-2）
    fn literal(value: String) -> Self {
        Self {
            repetitions: vec![vec![value]],
        }
    }

    /// 第一个重复的第n个组件（1起始）
    pub fn component(&self, n: usize) -> Option<&str> {
        self.repetitions
            .first()
            .and_then(|rep| rep.get(n.checked_sub(1)?))
            .map(String::as_str)
    }

    /// 还原为ER7文本，不做转义处理
    pub fn to_er7(&self, delimiters: &Delimiters) -> String {
        let component = delimiters.component.to_string();
        let repetition = delimiters.repetition.to_string();
        self.repetitions
            .iter()
            .map(|rep| rep.join(&component))
            .collect::<Vec<_>>()
            .join(&repetition)
    }

    pub fn is_empty(&self) -> bool {
        self.repetitions.iter().flatten().all(|c| c.is_empty())
    }
}

/// HL7段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hl7Segment {
    pub segment_type: String,
    /// 下标0对应字段1
    pub fields: Vec<Hl7Field>,
}

impl Hl7Segment {
    /// 按HL7编号取字段
    pub fn field(&self, number: usize) -> Option<&Hl7Field> {
        self.fields.get(number.checked_sub(1)?)
    }
}

/// HL7消息解析后的结构化数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hl7Message {
    pub delimiters: Delimiters,
    pub segments: Vec<Hl7Segment>,
}

/// MSH段头信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    pub sending_application: String,
    pub sending_facility: String,
    pub receiving_application: String,
    pub receiving_facility: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub message_type: String,
    pub message_control_id: String,
    pub processing_id: String,
    pub version_id: String,
}

impl Hl7Message {
    /// 第一个指定名称的段
    pub fn segment(&self, name: &str) -> Option<&Hl7Segment> {
        self.segments.iter().find(|s| s.segment_type == name)
    }

    /// 字段的ER7文本，空字段返回None
    pub fn field_value(&self, segment: &str, number: usize) -> Option<String> {
        self.segment(segment)
            .and_then(|s| s.field(number))
            .filter(|f| !f.is_empty())
            .map(|f| f.to_er7(&self.delimiters))
    }

    /// 读取MSH段头
    pub fn header(&self) -> Hl7Result<MessageHeader> {
        let msh = self
            .segment("MSH")
            .ok_or_else(|| Hl7Error::MissingField("MSH segment".to_string()))?;
        let text = |n: usize| {
            msh.field(n)
                .map(|f| f.to_er7(&self.delimiters))
                .unwrap_or_default()
        };

        Ok(MessageHeader {
            sending_application: text(3),
            sending_facility: text(4),
            receiving_application: text(5),
            receiving_facility: text(6),
            timestamp: msh
                .field(7)
                .and_then(|f| f.component(1))
                .and_then(|ts| parse_hl7_datetime(ts).ok()),
            message_type: text(9),
            message_control_id: text(10),
            processing_id: text(11),
            version_id: text(12),
        })
    }

}

/// HL7解析器
#[derive(Debug, Clone, Default)]
pub struct Hl7Parser;

impl Hl7Parser {
    pub fn new() -> Self {
        Self
    }

    /// 解析HL7消息
    pub fn parse(&self, message: &str) -> Hl7Result<Hl7Message> {
        let lines = split_segments(message);
        let first = lines
            .first()
            .ok_or_else(|| Hl7Error::InvalidFormat("Empty message".to_string()))?;
        if !first.starts_with("MSH") {
            return Err(Hl7Error::InvalidFormat("Message must start with MSH segment".to_string()));
        }

        let delimiters = Delimiters::from_msh(first)?;
        let mut segments = Vec::with_capacity(lines.len());
        for line in &lines {
            segments.push(self.parse_segment(line, &delimiters)?);
        }

        debug!("Parsed HL7 message with {} segments", segments.len());
        Ok(Hl7Message { delimiters, segments })
    }

    /// 解析单个段
    fn parse_segment(&self, line: &str, delimiters: &Delimiters) -> Hl7Result<Hl7Segment> {
        let parts: Vec<&str> = line.split(delimiters.field).collect();
        let segment_type = parts[0].trim().to_string();
        if !segment_name_pattern().is_match(&segment_type) {
            return Err(Hl7Error::InvalidFormat(format!("Invalid segment name: {:?}", segment_type)));
        }

        let fields = if segment_type == "MSH" {
            // MSH-1 是字段分隔符本身，MSH-2 编码字符不拆分
            let mut fields = vec![
                Hl7Field::literal(delimiters.field.to_string()),
                Hl7Field::literal(parts.get(1).copied().unwrap_or_default().to_string()),
            ];
            fields.extend(parts.iter().skip(2).map(|p| Hl7Field::parse(p, delimiters)));
            fields
        } else {
            parts.iter().skip(1).map(|p| Hl7Field::parse(p, delimiters)).collect()
        };

        Ok(Hl7Segment { segment_type, fields })
    }
}

/// 解析HL7日期时间：YYYYMMDD[HH[MM[SS]]]，忽略小数秒与时区
pub fn parse_hl7_datetime(value: &str) -> Hl7Result<DateTime<Utc>> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() < 8 {
        return Err(Hl7Error::ParseError(format!("Datetime too short: {}", value)));
    }

    let part = |range: std::ops::Range<usize>| -> Hl7Result<u32> {
        match digits.get(range) {
            Some(s) => s
                .parse()
                .map_err(|_| Hl7Error::ParseError(format!("Invalid datetime: {}", value))),
            None => Ok(0),
        }
    };

    let year = part(0..4)? as i32;
    Utc.with_ymd_and_hms(year, part(4..6)?, part(6..8)?, part(8..10)?, part(10..12)?, part(12..14)?)
        .single()
        .ok_or_else(|| Hl7Error::ParseError(format!("Invalid datetime: {}", value)))
}
