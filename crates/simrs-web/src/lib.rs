//! SIMRS Web 层
//!
//! REST API、JWT 认证与 WebSocket 实时推送

pub mod auth;
pub mod error;
pub mod handlers;
pub mod realtime;
pub mod server;
pub mod state;

pub use auth::{AuthSettings, Claims};
pub use error::{ApiError, ApiResult};
pub use server::{build_router, ServerOptions, WebServer};
pub use state::{AppState, Stores};
