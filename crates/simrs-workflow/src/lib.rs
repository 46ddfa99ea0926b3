//! # SIMRS工作流模块
//!
//! 门诊业务流程：
//! - 患者登记：病历号分配、科室与医生
//! - 排队叫号：每日计数器、号票状态机与显示屏
//! - 处方：病历、开方与发药
//! - 考勤：地理围栏打卡与请假审批

pub mod attendance;
pub mod board;
pub mod memory;
pub mod prescription;
pub mod queue;
pub mod registration;
pub mod state_machine;

// 重新导出主要类型
pub use attendance::{haversine_meters, AttendancePolicy, AttendanceService, AttendanceStore};
pub use board::{build_board, QueueBoard, StatusCounts};
pub use memory::{InMemoryAttendance, InMemoryClinic, InMemoryQueue, InMemoryRegistry};
pub use prescription::{PrescriptionService, PrescriptionStore};
pub use queue::{QueueService, QueueStore};
pub use registration::{RegistrationService, RegistryStore};
pub use state_machine::{QueueEvent, QueueStateMachine};
