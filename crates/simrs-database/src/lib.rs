//! # SIMRS数据库模块
//!
//! PostgreSQL 连接池、表结构以及各业务存储接口的实现。
//! 计数器、库存扣减和状态流转都在单个事务内完成。

pub mod admin;
pub mod attendance;
pub mod clinic;
pub mod connection;
pub mod documents;
pub mod inventory;
pub mod models;
pub mod queue;
pub mod registry;
pub mod schema;

// 重新导出主要类型
pub use admin::PgAdminStore;
pub use attendance::PgAttendanceStore;
pub use clinic::PgPrescriptionStore;
pub use connection::{DatabasePool, PoolSettings};
pub use documents::PgDocumentStore;
pub use inventory::PgInventoryStore;
pub use queue::PgQueueStore;
pub use registry::PgRegistryStore;
pub use schema::create_tables;
