//! # SIMRS 管理模块
//!
//! 配置、日志、指标等运维功能，以及用户、角色和功能授权管理

pub mod access;
pub mod config;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod password;
pub mod users;

pub use access::{AccessControlService, AccessStore, FeatureAccess, FEATURES};
pub use config::{SimrsConfig, StorageBackend};
pub use logging::init_logging;
pub use memory::InMemoryAdmin;
pub use metrics::Metrics;
pub use users::{RoleService, UserService, UserStore};
