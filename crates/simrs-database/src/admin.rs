//! 角色、用户与功能授权的 PostgreSQL 存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use simrs_admin::{AccessStore, UserStore};
use simrs_core::{AccessGrant, GrantSubject, Result, Role, SimrsError, User, UserUpdate};
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{convert_all, subject_parts, DbAccessGrant, DbRole, DbUser};

#[derive(Clone)]
pub struct PgAdminStore {
    db: DatabasePool,
}

impl PgAdminStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgAdminStore {
    async fn create_role(&self, role: Role) -> Result<Role> {
        let row = sqlx::query_as::<_, DbRole>(
            r#"
            INSERT INTO roles (name, description, is_system, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.is_system)
        .bind(role.created_at)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| match SimrsError::from(e) {
            SimrsError::Conflict(_) => {
                SimrsError::Conflict(format!("role {} already exists", role.name))
            }
            other => other,
        })?;
        row.try_into()
    }

    async fn get_role(&self, name: &str) -> Result<Option<Role>> {
        sqlx::query_as::<_, DbRole>("SELECT * FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(self.db.pool())
            .await?
            .map(Role::try_from)
            .transpose()
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>("SELECT * FROM roles ORDER BY name")
            .fetch_all(self.db.pool())
            .await?;
        convert_all(rows)
    }

    async fn delete_role(&self, name: &str) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let locked: Option<String> = sqlx::query_scalar("SELECT name FROM roles WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(SimrsError::not_found("role", name));
        }

        let holders: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = $1")
            .bind(name)
            .fetch_one(&mut *tx)
            .await?;
        if holders > 0 {
            return Err(SimrsError::Conflict(format!("role {} is assigned to users", name)));
        }

        sqlx::query("DELETE FROM access_grants WHERE subject_kind = 'role' AND subject_value = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM roles WHERE name = $1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn create_user(&self, user: User) -> Result<User> {
        let row = sqlx::query_as::<_, DbUser>(
            r#"
            INSERT INTO users
                (id, username, full_name, email, role, password_hash, is_active,
                 polyclinic_ids, doctor_id, created_at, updated_at, last_login_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.email)
        .bind(&user.role)
        .bind(&user.password_hash)
        .bind(user.is_active)
        .bind(&user.polyclinic_ids)
        .bind(user.doctor_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .bind(user.last_login_at)
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| match SimrsError::from(e) {
            SimrsError::Conflict(_) => {
                SimrsError::Conflict(format!("username {} already taken", user.username))
            }
            other => other,
        })?;
        row.try_into()
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>> {
        sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, DbUser>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(self.db.pool())
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn list_users(&self, include_inactive: bool) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, DbUser>(
            "SELECT * FROM users WHERE is_active OR $1 ORDER BY username",
        )
        .bind(include_inactive)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn update_user(&self, id: Uuid, update: UserUpdate) -> Result<User> {
        let row = sqlx::query_as::<_, DbUser>(
            r#"
            UPDATE users SET
                full_name = COALESCE($2, full_name),
                email = COALESCE($3, email),
                role = COALESCE($4, role),
                is_active = COALESCE($5, is_active),
                polyclinic_ids = COALESCE($6, polyclinic_ids),
                doctor_id = COALESCE($7, doctor_id),
                updated_at = $8
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.full_name.map(|n| n.trim().to_string()))
        .bind(update.email)
        .bind(update.role)
        .bind(update.is_active)
        .bind(update.polyclinic_ids)
        .bind(update.doctor_id)
        .bind(Utc::now())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| SimrsError::not_found("user", id))?;
        row.try_into()
    }

    async fn set_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        let updated = sqlx::query("UPDATE users SET password_hash = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .bind(Utc::now())
            .execute(self.db.pool())
            .await?
            .rows_affected();
        if updated == 0 {
            return Err(SimrsError::not_found("user", id));
        }
        Ok(())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    async fn count_users(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl AccessStore for PgAdminStore {
    async fn grant(&self, grant: AccessGrant) -> Result<AccessGrant> {
        let (kind, value) = subject_parts(&grant.subject);
        let inserted = sqlx::query_as::<_, DbAccessGrant>(
            r#"
            INSERT INTO access_grants (id, subject_kind, subject_value, feature, granted_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (subject_kind, subject_value, feature) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(grant.id)
        .bind(kind)
        .bind(&value)
        .bind(&grant.feature)
        .bind(grant.granted_by)
        .bind(grant.created_at)
        .fetch_optional(self.db.pool())
        .await?;

        let row = match inserted {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, DbAccessGrant>(
                    r#"
                    SELECT * FROM access_grants
                    WHERE subject_kind = $1 AND subject_value = $2 AND feature = $3
                    "#,
                )
                .bind(kind)
                .bind(&value)
                .bind(&grant.feature)
                .fetch_one(self.db.pool())
                .await?
            }
        };
        row.try_into()
    }

    async fn revoke(&self, subject: &GrantSubject, feature: &str) -> Result<bool> {
        let (kind, value) = subject_parts(subject);
        let deleted = sqlx::query(
            "DELETE FROM access_grants WHERE subject_kind = $1 AND subject_value = $2 AND feature = $3",
        )
        .bind(kind)
        .bind(value)
        .bind(feature)
        .execute(self.db.pool())
        .await?
        .rows_affected();
        Ok(deleted > 0)
    }

    async fn list_grants(&self, subject: Option<&GrantSubject>) -> Result<Vec<AccessGrant>> {
        let (kind, value) = match subject.map(subject_parts) {
            Some((kind, value)) => (Some(kind), Some(value)),
            None => (None, None),
        };
        let rows = sqlx::query_as::<_, DbAccessGrant>(
            r#"
            SELECT * FROM access_grants
            WHERE ($1::TEXT IS NULL OR (subject_kind = $1 AND subject_value = $2))
            ORDER BY feature, subject_kind, subject_value
            "#,
        )
        .bind(kind)
        .bind(value)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn has_grant(&self, role: &str, user_id: Uuid, feature: &str) -> Result<bool> {
        let allowed: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM access_grants
                WHERE feature = $3
                  AND ((subject_kind = 'role' AND subject_value = $1)
                    OR (subject_kind = 'user' AND subject_value = $2))
            )
            "#,
        )
        .bind(role)
        .bind(user_id.to_string())
        .bind(feature)
        .fetch_one(self.db.pool())
        .await?;
        Ok(allowed)
    }
}
