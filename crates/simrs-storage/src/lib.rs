//! # SIMRS文档存储模块
//!
//! - 对象存储：本地文件系统、内存或 S3，按阈值 gzip 压缩
//! - 访问控制：所有者、公开文档与按用户/角色/科室/医生授权的规则
//! - 访问日志

pub mod access;
pub mod documents;
pub mod memory;
pub mod storage;

pub use access::{evaluate, AccessDecision};
pub use documents::{DocumentService, DocumentStore, UploadDocument};
pub use memory::InMemoryDocuments;
pub use storage::{DocumentStorage, S3Options, StoredObject};
