//! 错误定义模块

use thiserror::Error;

/// SIMRS系统统一错误类型
#[derive(Error, Debug)]
pub enum SimrsError {
    #[error("配置错误: {0}")]
    Config(String),

    #[error("数据库错误: {0}")]
    Database(String),

    #[error("存储错误: {0}")]
    Storage(String),

    #[error("网络错误: {0}")]
    Network(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("验证错误: {0}")]
    Validation(String),

    #[error("认证失败: {0}")]
    Unauthorized(String),

    #[error("权限错误: {0}")]
    Permission(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("资源冲突: {0}")]
    Conflict(String),

    #[error("库存不足: {item} 需要 {requested}, 可用 {available}")]
    InsufficientStock {
        item: String,
        requested: i64,
        available: i64,
    },

    #[error("无效状态转换: 从 {from} 到 {event}")]
    InvalidStateTransition { from: String, event: String },

    #[error("系统内部错误: {0}")]
    Internal(String),
}

impl SimrsError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        SimrsError::NotFound(format!("{} {} not found", what, id))
    }

    /// 是否属于调用方可修正的错误（4xx）
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            SimrsError::Config(_)
                | SimrsError::Database(_)
                | SimrsError::Storage(_)
                | SimrsError::Network(_)
                | SimrsError::Internal(_)
        )
    }
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for SimrsError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => SimrsError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // unique_violation
                Some("23505") => SimrsError::Conflict(db.message().to_string()),
                // foreign_key_violation
                Some("23503") => SimrsError::Validation(db.message().to_string()),
                // check_violation
                Some("23514") => SimrsError::Validation(db.message().to_string()),
                _ => SimrsError::Database(err.to_string()),
            },
            _ => SimrsError::Database(err.to_string()),
        }
    }
}

/// SIMRS系统统一结果类型
pub type Result<T> = std::result::Result<T, SimrsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(SimrsError::Validation("x".into()).is_client_error());
        assert!(SimrsError::InsufficientStock {
            item: "PCT500".into(),
            requested: 10,
            available: 3
        }
        .is_client_error());
        assert!(!SimrsError::Database("down".into()).is_client_error());
    }

    #[test]
    fn test_insufficient_stock_message() {
        let err = SimrsError::InsufficientStock {
            item: "AMX500".into(),
            requested: 20,
            available: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("AMX500"));
        assert!(msg.contains("20"));
        assert!(msg.contains("5"));
    }
}
