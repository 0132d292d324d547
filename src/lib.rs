//! # DWF
//!
//! IHE 科室工作流消息接入与流程服务的聚合入口，重新导出各子模块。

pub use dwf_core;
pub use dwf_database;
pub use dwf_integration;
pub use dwf_workflow;
