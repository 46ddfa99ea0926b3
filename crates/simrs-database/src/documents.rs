//! 文档元数据、访问规则与访问日志的 PostgreSQL 存储

use async_trait::async_trait;
use chrono::Utc;
use simrs_core::{
    Document, DocumentAccessLog, DocumentAccessRule, DocumentUpdate, Folder, Result, RuleScope,
    SimrsError,
};
use simrs_storage::DocumentStore;
use uuid::Uuid;

use crate::connection::DatabasePool;
use crate::models::{convert_all, scope_parts, DbAccessLog, DbAccessRule, DbDocument, DbFolder};

#[derive(Clone)]
pub struct PgDocumentStore {
    db: DatabasePool,
}

impl PgDocumentStore {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }
}

fn folder_conflict(name: &str) -> impl FnOnce(sqlx::Error) -> SimrsError + '_ {
    move |e| match SimrsError::from(e) {
        SimrsError::Conflict(_) => SimrsError::Conflict(format!("folder {} already exists", name)),
        other => other,
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn create_folder(&self, folder: Folder) -> Result<Folder> {
        let row = sqlx::query_as::<_, DbFolder>(
            r#"
            INSERT INTO folders (id, name, parent_id, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(folder.id)
        .bind(&folder.name)
        .bind(folder.parent_id)
        .bind(folder.created_by)
        .bind(folder.created_at)
        .bind(folder.updated_at)
        .fetch_one(self.db.pool())
        .await
        .map_err(folder_conflict(&folder.name))?;
        row.try_into()
    }

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>> {
        sqlx::query_as::<_, DbFolder>("SELECT * FROM folders WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Folder::try_from)
            .transpose()
    }

    async fn list_folders(&self, parent_id: Option<Uuid>) -> Result<Vec<Folder>> {
        let rows = sqlx::query_as::<_, DbFolder>(
            "SELECT * FROM folders WHERE parent_id IS NOT DISTINCT FROM $1 ORDER BY name",
        )
        .bind(parent_id)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn rename_folder(&self, id: Uuid, name: &str) -> Result<Folder> {
        let row = sqlx::query_as::<_, DbFolder>(
            "UPDATE folders SET name = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .fetch_optional(self.db.pool())
        .await
        .map_err(folder_conflict(name))?
        .ok_or_else(|| SimrsError::not_found("folder", id))?;
        row.try_into()
    }

    async fn delete_folder(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;

        let locked: Option<Uuid> = sqlx::query_scalar("SELECT id FROM folders WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        if locked.is_none() {
            return Err(SimrsError::not_found("folder", id));
        }

        let in_use: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (SELECT 1 FROM folders WHERE parent_id = $1)
                OR EXISTS (SELECT 1 FROM documents WHERE folder_id = $1)
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        if in_use {
            return Err(SimrsError::Conflict(format!("folder {} is not empty", id)));
        }

        sqlx::query("DELETE FROM document_access_rules WHERE scope_kind = 'folder' AND scope_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM folders WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn insert_document(&self, document: Document) -> Result<Document> {
        let row = sqlx::query_as::<_, DbDocument>(
            r#"
            INSERT INTO documents
                (id, folder_id, title, file_name, mime_type, size_bytes, checksum, storage_key,
                 compressed, owner_id, is_public, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(document.id)
        .bind(document.folder_id)
        .bind(&document.title)
        .bind(&document.file_name)
        .bind(&document.mime_type)
        .bind(document.size_bytes)
        .bind(&document.checksum)
        .bind(&document.storage_key)
        .bind(document.compressed)
        .bind(document.owner_id)
        .bind(document.is_public)
        .bind(document.created_at)
        .bind(document.updated_at)
        .fetch_one(self.db.pool())
        .await?;
        row.try_into()
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        sqlx::query_as::<_, DbDocument>("SELECT * FROM documents WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await?
            .map(Document::try_from)
            .transpose()
    }

    async fn list_documents(&self, folder_id: Option<Uuid>) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, DbDocument>(
            "SELECT * FROM documents WHERE folder_id IS NOT DISTINCT FROM $1 ORDER BY title",
        )
        .bind(folder_id)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn update_document(&self, id: Uuid, update: DocumentUpdate) -> Result<Document> {
        let row = sqlx::query_as::<_, DbDocument>(
            r#"
            UPDATE documents SET
                title = COALESCE($2, title),
                folder_id = COALESCE($3, folder_id),
                is_public = COALESCE($4, is_public),
                updated_at = $5
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(update.title.map(|t| t.trim().to_string()))
        .bind(update.folder_id)
        .bind(update.is_public)
        .bind(Utc::now())
        .fetch_optional(self.db.pool())
        .await?
        .ok_or_else(|| SimrsError::not_found("document", id))?;
        row.try_into()
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        let mut tx = self.db.pool().begin().await?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(SimrsError::not_found("document", id));
        }
        sqlx::query("DELETE FROM document_access_rules WHERE scope_kind = 'document' AND scope_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn rules_for(&self, scopes: &[RuleScope]) -> Result<Vec<DocumentAccessRule>> {
        let (mut documents, mut folders) = (Vec::new(), Vec::new());
        for scope in scopes {
            match scope {
                RuleScope::Document(id) => documents.push(*id),
                RuleScope::Folder(id) => folders.push(*id),
            }
        }

        let rows = sqlx::query_as::<_, DbAccessRule>(
            r#"
            SELECT * FROM document_access_rules
            WHERE (scope_kind = 'document' AND scope_id = ANY($1))
               OR (scope_kind = 'folder' AND scope_id = ANY($2))
            ORDER BY created_at
            "#,
        )
        .bind(&documents)
        .bind(&folders)
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }

    async fn replace_rules(
        &self,
        scope: RuleScope,
        rules: Vec<DocumentAccessRule>,
    ) -> Result<Vec<DocumentAccessRule>> {
        let (scope_kind, scope_id) = scope_parts(&scope);
        let mut tx = self.db.pool().begin().await?;

        sqlx::query("DELETE FROM document_access_rules WHERE scope_kind = $1 AND scope_id = $2")
            .bind(scope_kind)
            .bind(scope_id)
            .execute(&mut *tx)
            .await?;

        for rule in &rules {
            sqlx::query(
                r#"
                INSERT INTO document_access_rules
                    (id, scope_kind, scope_id, target_kind, target_value, level, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(rule.id)
            .bind(scope_kind)
            .bind(scope_id)
            .bind(rule.target.kind().as_str())
            .bind(rule.target.value())
            .bind(rule.level.as_str())
            .bind(rule.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(rules)
    }

    async fn log_access(&self, entry: DocumentAccessLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO document_access_logs (id, document_id, user_id, action, granted, at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.document_id)
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.granted)
        .bind(entry.at)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    async fn access_logs(&self, document_id: Uuid, limit: i64) -> Result<Vec<DocumentAccessLog>> {
        let rows = sqlx::query_as::<_, DbAccessLog>(
            "SELECT * FROM document_access_logs WHERE document_id = $1 ORDER BY at DESC LIMIT $2",
        )
        .bind(document_id)
        .bind(limit.max(0))
        .fetch_all(self.db.pool())
        .await?;
        convert_all(rows)
    }
}
