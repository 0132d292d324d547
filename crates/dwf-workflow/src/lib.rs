//! # DWF工作流模块
//!
//! 提供影像科室工作流的接入与流转功能，包括：
//! - 接入流程：IAN、MPPS、UPS 的幂等接入与SOP实例扩散
//! - UPS状态机：管理统一过程步骤的生命周期
//! - 后续处理：IAN/PPS 提交后的可替换匹配扩展点
//! - 工作列表查询

pub mod ingest;
pub mod processing;
pub mod state_machine;
pub mod worklist;

// 重新导出主要类型
pub use ingest::{
    IanPayload, IngestOutcome, IngestStatus, IngestionPipeline, MppsPayload, SignedRequest,
    UpsPayload, UpsStatusUpdate,
};
pub use processing::{
    IanProcessor, MatchResult, MatchSource, NoopMatcher, PpsProcessor, ProcedureMatcher,
};
pub use state_machine::{UpsEvent, UpsStateMachine};
pub use worklist::WorklistService;
