//! # SIMRS库存模块
//!
//! 药房库存管理：
//! - 先进先出批次扣减
//! - 库存流水与安全库存预警
//! - 库存盘点（stock opname）

pub mod fifo;
pub mod memory;
pub mod opname;
pub mod stock;

pub use memory::InMemoryInventory;
pub use opname::{OpnameEvent, OpnameService, OpnameStateMachine, OpnameStore};
pub use stock::{ReceiveStock, StockService, StockStore};
