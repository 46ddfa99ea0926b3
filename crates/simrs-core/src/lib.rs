//! # SIMRS Core
//!
//! 医院信息管理系统的核心模块，提供基础数据结构、错误定义、领域事件和通用工具。

pub mod error;
pub mod events;
pub mod models;
pub mod utils;

pub use error::{Result, SimrsError};
pub use events::{DomainEvent, EventKind, EventPublisher, NoopPublisher};
pub use models::*;
