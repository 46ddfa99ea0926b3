//! 用户与角色管理

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use simrs_core::utils::non_blank;
use simrs_core::{NewUser, Result, Role, SimrsError, User, UserUpdate, ADMIN_ROLE};
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::password::{hash_password, verify_password};

/// 内置角色
pub const SEED_ROLES: &[(&str, &str)] = &[
    (ADMIN_ROLE, "Administrator"),
    ("doctor", "Dokter"),
    ("nurse", "Perawat"),
    ("pharmacist", "Apoteker"),
    ("registration", "Petugas pendaftaran"),
    ("staff", "Staf umum"),
];

pub const MIN_PASSWORD_LENGTH: usize = 8;

fn username_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.\-]{3,32}$").expect("username pattern is a valid regex")
    })
}

/// 用户与角色存储接口
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create_role(&self, role: Role) -> Result<Role>;

    async fn get_role(&self, name: &str) -> Result<Option<Role>>;

    async fn list_roles(&self) -> Result<Vec<Role>>;

    /// 删除角色及其授权；仍有用户使用时返回 Conflict
    async fn delete_role(&self, name: &str) -> Result<()>;

    /// 用户名重复时返回 Conflict
    async fn create_user(&self, user: User) -> Result<User>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    async fn list_users(&self, include_inactive: bool) -> Result<Vec<User>>;

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User>;

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()>;

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn count_users(&self) -> Result<i64>;
}

/// 角色服务
pub struct RoleService {
    store: Arc<dyn UserStore>,
}

impl RoleService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    /// 补齐内置角色
    pub async fn seed(&self) -> Result<()> {
        for (name, description) in SEED_ROLES {
            if self.store.get_role(name).await?.is_none() {
                self.store
                    .create_role(Role {
                        name: name.to_string(),
                        description: Some(description.to_string()),
                        is_system: true,
                        created_at: Utc::now(),
                    })
                    .await?;
                tracing::info!("Seeded role {}", name);
            }
        }
        Ok(())
    }

    pub async fn create_role(&self, name: &str, description: Option<String>) -> Result<Role> {
        let name = name.trim().to_lowercase();
        let valid = !name.is_empty()
            && name.len() <= 32
            && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid {
            return Err(SimrsError::Validation(format!("invalid role name '{}'", name)));
        }
        self.store
            .create_role(Role {
                name,
                description: non_blank(description),
                is_system: false,
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>> {
        self.store.list_roles().await
    }

    pub async fn delete_role(&self, name: &str) -> Result<()> {
        let role = self
            .store
            .get_role(name)
            .await?
            .ok_or_else(|| SimrsError::not_found("role", name))?;
        if role.is_system {
            return Err(SimrsError::Conflict(format!("role {} is a system role", name)));
        }
        self.store.delete_role(name).await?;
        tracing::info!("Deleted role {}", name);
        Ok(())
    }
}

/// 用户服务
pub struct UserService {
    store: Arc<dyn UserStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn create_user(&self, request: NewUser) -> Result<User> {
        let username = request.username.trim().to_string();
        if !username_pattern().is_match(&username) {
            return Err(SimrsError::Validation(format!(
                "username '{}' must be 3-32 letters, digits, '.', '_' or '-'",
                username
            )));
        }
        if request.full_name.trim().is_empty() {
            return Err(SimrsError::Validation("full_name is required".to_string()));
        }
        validate_password(&request.password)?;
        self.ensure_role(&request.role).await?;

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username,
            full_name: request.full_name.trim().to_string(),
            email: non_blank(request.email),
            role: request.role,
            password_hash: hash_password(&request.password),
            is_active: true,
            polyclinic_ids: request.polyclinic_ids,
            doctor_id: request.doctor_id,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };
        let created = self.store.create_user(user).await?;
        tracing::info!("Created user {} with role {}", created.username, created.role);
        Ok(created)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("user", id))
    }

    pub async fn list_users(&self, include_inactive: bool) -> Result<Vec<User>> {
        self.store.list_users(include_inactive).await
    }

    pub async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User> {
        if let Some(role) = &update.role {
            self.ensure_role(role).await?;
        }
        if matches!(&update.full_name, Some(name) if name.trim().is_empty()) {
            return Err(SimrsError::Validation("full_name cannot be blank".to_string()));
        }
        self.store.update_user(id, update).await
    }

    pub async fn set_password(&self, id: Uuid, password: &str) -> Result<()> {
        validate_password(password)?;
        self.get_user(id).await?;
        self.store.set_password_hash(id, &hash_password(password)).await?;
        tracing::info!("Password changed for user {}", id);
        Ok(())
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<User> {
        let user = self
            .store
            .update_user(
                id,
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("Deactivated user {}", user.username);
        Ok(user)
    }

    /// 校验用户名密码
    ///
    /// 用户不存在、已停用或密码错误都返回同样的 Unauthorized。
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User> {
        let rejected = || SimrsError::Unauthorized("invalid username or password".to_string());

        let Some(mut user) = self.store.find_user_by_username(username.trim()).await? else {
            tracing::warn!("Login attempt for unknown user {}", username);
            return Err(rejected());
        };
        if !user.is_active || !verify_password(password, &user.password_hash)? {
            tracing::warn!("Rejected login for user {}", user.username);
            return Err(rejected());
        }

        let now = Utc::now();
        self.store.record_login(user.id, now).await?;
        user.last_login_at = Some(now);
        Ok(user)
    }

    /// 系统中没有用户时创建管理员
    pub async fn bootstrap_admin(&self, username: &str, password: &str) -> Result<Option<User>> {
        if self.store.count_users().await? > 0 {
            return Ok(None);
        }
        let admin = self
            .create_user(NewUser {
                username: username.to_string(),
                full_name: "Administrator".to_string(),
                email: None,
                role: ADMIN_ROLE.to_string(),
                password: password.to_string(),
                polyclinic_ids: Vec::new(),
                doctor_id: None,
            })
            .await?;
        tracing::warn!("Bootstrapped admin user '{}'; change its password", admin.username);
        Ok(Some(admin))
    }

    async fn ensure_role(&self, role: &str) -> Result<()> {
        if self.store.get_role(role).await?.is_none() {
            return Err(SimrsError::Validation(format!("role {} does not exist", role)));
        }
        Ok(())
    }
}

fn validate_password(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(SimrsError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAdmin;

    async fn services() -> (RoleService, UserService) {
        let store = Arc::new(InMemoryAdmin::new());
        let roles = RoleService::new(store.clone());
        roles.seed().await.unwrap();
        (roles, UserService::new(store))
    }

    fn new_user(username: &str, role: &str) -> NewUser {
        NewUser {
            username: username.into(),
            full_name: "Siti Rahma".into(),
            email: Some("siti@example.org".into()),
            role: role.into(),
            password: "password123".into(),
            polyclinic_ids: vec![],
            doctor_id: None,
        }
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let (roles, _) = services().await;
        roles.seed().await.unwrap();
        assert_eq!(roles.list_roles().await.unwrap().len(), SEED_ROLES.len());
    }

    #[tokio::test]
    async fn test_create_user_validation() {
        let (_, users) = services().await;
        users.create_user(new_user("siti", "nurse")).await.unwrap();

        assert!(matches!(
            users.create_user(new_user("siti", "nurse")).await,
            Err(SimrsError::Conflict(_))
        ));
        assert!(matches!(
            users.create_user(new_user("budi", "wizard")).await,
            Err(SimrsError::Validation(_))
        ));
        let mut short = new_user("andi", "staff");
        short.password = "1234567".into();
        assert!(matches!(users.create_user(short).await, Err(SimrsError::Validation(_))));
        assert!(matches!(
            users.create_user(new_user("a b", "staff")).await,
            Err(SimrsError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (_, users) = services().await;
        let user = users.create_user(new_user("dokter1", "doctor")).await.unwrap();

        let logged_in = users.authenticate("dokter1", "password123").await.unwrap();
        assert!(logged_in.last_login_at.is_some());
        assert!(matches!(
            users.authenticate("dokter1", "wrong-password").await,
            Err(SimrsError::Unauthorized(_))
        ));
        assert!(matches!(
            users.authenticate("nobody", "password123").await,
            Err(SimrsError::Unauthorized(_))
        ));

        users.set_password(user.id, "new-password").await.unwrap();
        assert!(users.authenticate("dokter1", "new-password").await.is_ok());

        users.deactivate(user.id).await.unwrap();
        assert!(matches!(
            users.authenticate("dokter1", "new-password").await,
            Err(SimrsError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_role_deletion_rules() {
        let (roles, users) = services().await;
        assert!(matches!(roles.delete_role("doctor").await, Err(SimrsError::Conflict(_))));

        roles.create_role("Cashier", None).await.unwrap();
        users.create_user(new_user("kasir", "cashier")).await.unwrap();
        assert!(matches!(roles.delete_role("cashier").await, Err(SimrsError::Conflict(_))));

        roles.create_role("lab", Some("Laboratorium".into())).await.unwrap();
        roles.delete_role("lab").await.unwrap();
        assert!(matches!(roles.delete_role("lab").await, Err(SimrsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_only_once() {
        let (_, users) = services().await;
        let admin = users.bootstrap_admin("admin", "admin12345").await.unwrap();
        assert_eq!(admin.unwrap().role, ADMIN_ROLE);
        assert!(users.bootstrap_admin("admin2", "admin12345").await.unwrap().is_none());
    }
}
