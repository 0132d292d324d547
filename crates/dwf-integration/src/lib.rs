//! # DWF集成模块
//!
//! 提供与外部系统的集成功能，包括：
//! - HL7 v2.x 解析与规范化（结构化策略与朴素策略）
//! - JSON入站消息规范化
//! - 幂等的入站消息网关
//! - RESTful API接口（IHE 接入端点与工作列表查询）
//! - 异步任务队列（进程内或RabbitMQ）

pub mod api;
pub mod gateway;
pub mod hl7;
pub mod message_queue;
pub mod normalizer;
pub mod parser;

pub use api::{create_api_routes, ApiError, ApiServer, ApiState};
pub use gateway::{GatewayResponse, MessageGateway, MessageReceipt};
pub use hl7::{Hl7Error, Hl7Message, Hl7Parser, MessageHeader};
pub use message_queue::{AmqpTaskConsumer, AmqpTaskQueue, LocalTaskQueue, QueueBackend};
pub use normalizer::normalize_json;
pub use parser::{build_parser, MessageParser, NaiveParser, ParserKind, StructuredParser};

#[cfg(test)]
pub(crate) mod test_support {
    /// ORM^O01 样例报文
    pub const SAMPLE_HL7: &str = "MSH|^~\\&|SendingApp|SendingFac|ReceivingApp|ReceivingFac|202511121130||ORM^O01|MSG00001|P|2.5.1\rPID|1||123456^^^Hospital^MR||Doe^John||19800101|M\rPV1|1|I|W^389^1^A||||1234^Physician^Primary|||||||||||\rORC|NW|ORD448||OC456|CM||||202511121130|||1234^Clinician\rOBR|1|ORD448||TEST^Test Order^L|||||||||||||||||1234^Clinician\rNTE|1||Sample order note";
}
