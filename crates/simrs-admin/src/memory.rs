//! 内存用户、角色与授权存储，用于测试和演示

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simrs_core::{AccessGrant, GrantSubject, Result, Role, SimrsError, User, UserUpdate};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::access::AccessStore;
use crate::users::UserStore;

#[derive(Debug, Default)]
struct AdminState {
    roles: BTreeMap<String, Role>,
    users: HashMap<Uuid, User>,
    grants: Vec<AccessGrant>,
}

#[derive(Debug, Default)]
pub struct InMemoryAdmin {
    state: RwLock<AdminState>,
}

impl InMemoryAdmin {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryAdmin {
    async fn create_role(&self, role: Role) -> Result<Role> {
        let mut state = self.state.write().await;
        if state.roles.contains_key(&role.name) {
            return Err(SimrsError::Conflict(format!("role {} already exists", role.name)));
        }
        state.roles.insert(role.name.clone(), role.clone());
        Ok(role)
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>> {
        Ok(self.state.read().await.roles.get(name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self.state.read().await.roles.values().cloned().collect())
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.roles.contains_key(name) {
            return Err(SimrsError::not_found("role", name));
        }
        if state.users.values().any(|u| u.role == name) {
            return Err(SimrsError::Conflict(format!("role {} is assigned to users", name)));
        }
        state.roles.remove(name);
        state
            .grants
            .retain(|g| !matches!(&g.subject, GrantSubject::Role(r) if r == name));
        Ok(())
    }

    async fn create_user(&self, user: User) -> Result<User> {
        let mut state = self.state.write().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(SimrsError::Conflict(format!(
                "username {} already taken",
                user.username
            )));
        }
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.read().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn list_users(&self, include_inactive: bool) -> Result<Vec<User>> {
        let state = self.state.read().await;
        let mut users: Vec<User> = state
            .users
            .values()
            .filter(|u| include_inactive || u.is_active)
            .cloned()
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("user", id))?;
        if let Some(full_name) = update.full_name {
            user.full_name = full_name.trim().to_string();
        }
        if update.email.is_some() {
            user.email = update.email;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        if let Some(is_active) = update.is_active {
            user.is_active = is_active;
        }
        if let Some(polyclinic_ids) = update.polyclinic_ids {
            user.polyclinic_ids = polyclinic_ids;
        }
        if update.doctor_id.is_some() {
            user.doctor_id = update.doctor_id;
        }
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("user", id))?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(user) = state.users.get_mut(&id) {
            user.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn count_users(&self) -> Result<i64> {
        Ok(self.state.read().await.users.len() as i64)
    }
}

#[async_trait]
impl AccessStore for InMemoryAdmin {
    async fn grant(&self, grant: AccessGrant) -> Result<AccessGrant> {
        let mut state = self.state.write().await;
        if let Some(existing) = state
            .grants
            .iter()
            .find(|g| g.subject == grant.subject && g.feature == grant.feature)
        {
            return Ok(existing.clone());
        }
        state.grants.push(grant.clone());
        Ok(grant)
    }

    async fn revoke(&self, subject: &GrantSubject, feature: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let before = state.grants.len();
        state
            .grants
            .retain(|g| !(g.subject == *subject && g.feature == feature));
        Ok(state.grants.len() != before)
    }

    async fn list_grants(&self, subject: Option<&GrantSubject>) -> Result<Vec<AccessGrant>> {
        let state = self.state.read().await;
        Ok(state
            .grants
            .iter()
            .filter(|g| subject.map_or(true, |s| g.subject == *s))
            .cloned()
            .collect())
    }

    async fn has_grant(&self, role: &str, user_id: Uuid, feature: &str) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.grants.iter().any(|g| {
            g.feature == feature
                && match &g.subject {
                    GrantSubject::Role(r) => r == role,
                    GrantSubject::User(id) => *id == user_id,
                }
        }))
    }
}
