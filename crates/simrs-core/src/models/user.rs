//! 用户、角色与功能授权

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 拥有全部权限的角色
pub const ADMIN_ROLE: &str = "admin";

/// 角色
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

/// 用户（含密码哈希，不直接对外序列化）
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: String,
    pub password_hash: String,
    pub is_active: bool,
    pub polyclinic_ids: Vec<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// 用户信息（不包含敏感数据）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub polyclinic_ids: Vec<Uuid>,
    pub doctor_id: Option<Uuid>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&User> for UserInfo {
    fn from(user: &User) -> Self {
        UserInfo {
            id: user.id,
            username: user.username.clone(),
            full_name: user.full_name.clone(),
            email: user.email.clone(),
            role: user.role.clone(),
            is_active: user.is_active,
            polyclinic_ids: user.polyclinic_ids.clone(),
            doctor_id: user.doctor_id,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub full_name: String,
    pub email: Option<String>,
    pub role: String,
    pub password: String,
    #[serde(default)]
    pub polyclinic_ids: Vec<Uuid>,
    pub doctor_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub polyclinic_ids: Option<Vec<Uuid>>,
    pub doctor_id: Option<Uuid>,
}

/// 授权主体
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum GrantSubject {
    Role(String),
    User(Uuid),
}

/// 功能授权记录 (role|user, feature)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: Uuid,
    pub subject: GrantSubject,
    pub feature: String,
    pub granted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// 已认证的请求主体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
    pub polyclinic_ids: Vec<Uuid>,
    pub doctor_id: Option<Uuid>,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Principal {
            user_id: user.id,
            username: user.username.clone(),
            role: user.role.clone(),
            polyclinic_ids: user.polyclinic_ids.clone(),
            doctor_id: user.doctor_id,
        }
    }
}
