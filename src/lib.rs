//! # SIMRS
//!
//! 医院信息管理系统的聚合入口，便于演示程序直接引用各子模块。

pub use simrs_core as core;
pub use simrs_integration as integration;
pub use simrs_inventory as inventory;
pub use simrs_workflow as workflow;
