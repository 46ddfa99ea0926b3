//! 文档服务
//!
//! 元数据保存在 [`DocumentStore`]，内容保存在 [`DocumentStorage`]。
//! 对单个文档的每次访问（无论允许与否）都写入访问日志。

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use simrs_core::utils::clamp_limit;
use simrs_core::{
    AccessLevel, AccessRuleSpec, Document, DocumentAccessLog, DocumentAccessRule, DocumentAction,
    DocumentUpdate, Folder, Principal, Result, RuleScope, SimrsError,
};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::access::{best_level, evaluate};
use crate::storage::{object_key, sha256_hex, DocumentStorage};

/// 文件夹层级上限，防止环路
const MAX_FOLDER_DEPTH: usize = 64;

/// 文档元数据存储接口
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_folder(&self, folder: Folder) -> Result<Folder>;

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>>;

    async fn list_folders(&self, parent_id: Option<Uuid>) -> Result<Vec<Folder>>;

    async fn rename_folder(&self, id: Uuid, name: &str) -> Result<Folder>;

    /// 删除空文件夹；含子文件夹或文档时返回 `Conflict`
    async fn delete_folder(&self, id: Uuid) -> Result<()>;

    async fn insert_document(&self, document: Document) -> Result<Document>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    async fn list_documents(&self, folder_id: Option<Uuid>) -> Result<Vec<Document>>;

    async fn update_document(&self, id: Uuid, update: DocumentUpdate) -> Result<Document>;

    async fn delete_document(&self, id: Uuid) -> Result<()>;

    /// 任一作用范围上的规则
    async fn rules_for(&self, scopes: &[RuleScope]) -> Result<Vec<DocumentAccessRule>>;

    /// 原子地替换某作用范围上的全部规则
    async fn replace_rules(
        &self,
        scope: RuleScope,
        rules: Vec<DocumentAccessRule>,
    ) -> Result<Vec<DocumentAccessRule>>;

    async fn log_access(&self, entry: DocumentAccessLog) -> Result<()>;

    async fn access_logs(&self, document_id: Uuid, limit: i64) -> Result<Vec<DocumentAccessLog>>;
}

/// 上传请求的元数据部分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadDocument {
    pub folder_id: Option<Uuid>,
    pub title: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(default)]
    pub is_public: bool,
}

/// 文档服务
pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
    storage: DocumentStorage,
}

impl DocumentService {
    pub fn new(store: Arc<dyn DocumentStore>, storage: DocumentStorage) -> Self {
        Self { store, storage }
    }

    pub async fn create_folder(
        &self,
        principal: &Principal,
        name: &str,
        parent_id: Option<Uuid>,
    ) -> Result<Folder> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SimrsError::Validation("folder name is required".to_string()));
        }
        if let Some(parent_id) = parent_id {
            self.get_folder(parent_id).await?;
        }
        let now = Utc::now();
        let folder = self
            .store
            .create_folder(Folder {
                id: Uuid::new_v4(),
                name: name.to_string(),
                parent_id,
                created_by: Some(principal.user_id),
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::info!("Created folder {} ({})", folder.name, folder.id);
        Ok(folder)
    }

    pub async fn get_folder(&self, id: Uuid) -> Result<Folder> {
        self.store
            .get_folder(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("folder", id))
    }

    pub async fn list_folders(&self, parent_id: Option<Uuid>) -> Result<Vec<Folder>> {
        self.store.list_folders(parent_id).await
    }

    pub async fn rename_folder(&self, principal: &Principal, id: Uuid, name: &str) -> Result<Folder> {
        self.ensure_folder_manage(principal, id).await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(SimrsError::Validation("folder name is required".to_string()));
        }
        self.store.rename_folder(id, name).await
    }

    pub async fn delete_folder(&self, principal: &Principal, id: Uuid) -> Result<()> {
        self.ensure_folder_manage(principal, id).await?;
        self.store.delete_folder(id).await?;
        tracing::info!("Deleted folder {}", id);
        Ok(())
    }

    /// 上传文档
    pub async fn upload(
        &self,
        principal: &Principal,
        request: UploadDocument,
        content: &[u8],
    ) -> Result<Document> {
        if request.title.trim().is_empty() || request.file_name.trim().is_empty() {
            return Err(SimrsError::Validation(
                "document title and file name are required".to_string(),
            ));
        }
        if content.is_empty() {
            return Err(SimrsError::Validation("document content is empty".to_string()));
        }
        if let Some(folder_id) = request.folder_id {
            self.get_folder(folder_id).await?;
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let stored = self.storage.put(&object_key(id, now), content).await?;

        let document = Document {
            id,
            folder_id: request.folder_id,
            title: request.title.trim().to_string(),
            file_name: request.file_name.trim().to_string(),
            mime_type: request.mime_type,
            size_bytes: stored.size_bytes,
            checksum: stored.checksum,
            storage_key: stored.key.clone(),
            compressed: stored.compressed,
            owner_id: Some(principal.user_id),
            is_public: request.is_public,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_document(document).await {
            Ok(saved) => {
                tracing::info!(
                    "Uploaded document {} ({} bytes, compressed: {})",
                    saved.id,
                    saved.size_bytes,
                    saved.compressed
                );
                Ok(saved)
            }
            Err(e) => {
                // 元数据写入失败时清理已写入的内容
                if let Err(cleanup) = self.storage.delete(&stored.key).await {
                    tracing::warn!("Failed to remove orphaned object {}: {}", stored.key, cleanup);
                }
                Err(e)
            }
        }
    }

    pub async fn get(&self, principal: &Principal, id: Uuid) -> Result<Document> {
        self.authorize(principal, id, DocumentAction::View).await
    }

    /// 下载并校验内容
    pub async fn download(&self, principal: &Principal, id: Uuid) -> Result<(Document, Vec<u8>)> {
        let document = self.authorize(principal, id, DocumentAction::Download).await?;
        let content = self
            .storage
            .get(&document.storage_key, document.compressed)
            .await?;
        if sha256_hex(&content) != document.checksum {
            tracing::error!("Checksum mismatch for document {}", document.id);
            return Err(SimrsError::Storage(format!(
                "content of document {} is corrupted",
                document.id
            )));
        }
        Ok((document, content))
    }

    pub async fn update(
        &self,
        principal: &Principal,
        id: Uuid,
        update: DocumentUpdate,
    ) -> Result<Document> {
        self.authorize(principal, id, DocumentAction::Update).await?;
        if matches!(&update.title, Some(title) if title.trim().is_empty()) {
            return Err(SimrsError::Validation("document title must not be blank".to_string()));
        }
        if let Some(folder_id) = update.folder_id {
            self.get_folder(folder_id).await?;
        }
        self.store.update_document(id, update).await
    }

    pub async fn delete(&self, principal: &Principal, id: Uuid) -> Result<()> {
        let document = self.authorize(principal, id, DocumentAction::Delete).await?;
        self.store.delete_document(id).await?;
        self.storage.delete(&document.storage_key).await?;
        tracing::info!("Deleted document {}", id);
        Ok(())
    }

    /// 当前用户可见的文档
    pub async fn list_documents(
        &self,
        principal: &Principal,
        folder_id: Option<Uuid>,
    ) -> Result<Vec<Document>> {
        let documents = self.store.list_documents(folder_id).await?;
        let folder_rules = match folder_id {
            Some(folder_id) => {
                let scopes = self.folder_scopes(folder_id).await?;
                self.store.rules_for(&scopes).await?
            }
            None => Vec::new(),
        };

        let mut visible = Vec::new();
        for document in documents {
            let mut rules = self
                .store
                .rules_for(&[RuleScope::Document(document.id)])
                .await?;
            rules.extend(folder_rules.iter().cloned());
            if evaluate(principal, &document, &rules, DocumentAction::View).is_granted() {
                visible.push(document);
            }
        }
        Ok(visible)
    }

    pub async fn rules(&self, principal: &Principal, scope: RuleScope) -> Result<Vec<DocumentAccessRule>> {
        self.ensure_scope_manage(principal, scope).await?;
        self.store.rules_for(&[scope]).await
    }

    /// 替换文档或文件夹上的访问规则
    pub async fn set_rules(
        &self,
        principal: &Principal,
        scope: RuleScope,
        specs: Vec<AccessRuleSpec>,
    ) -> Result<Vec<DocumentAccessRule>> {
        self.ensure_scope_manage(principal, scope).await?;

        let mut seen = HashSet::new();
        let now = Utc::now();
        let rules: Vec<DocumentAccessRule> = specs
            .into_iter()
            .filter(|spec| seen.insert(spec.target.clone()))
            .map(|spec| DocumentAccessRule {
                id: Uuid::new_v4(),
                scope,
                target: spec.target,
                level: spec.level,
                created_at: now,
            })
            .collect();

        let saved = self.store.replace_rules(scope, rules).await?;
        tracing::info!("Set {} access rules on {:?}", saved.len(), scope);
        Ok(saved)
    }

    pub async fn access_logs(
        &self,
        principal: &Principal,
        id: Uuid,
        limit: Option<i64>,
    ) -> Result<Vec<DocumentAccessLog>> {
        self.authorize(principal, id, DocumentAction::ShareRules).await?;
        self.store.access_logs(id, clamp_limit(limit, 100, 1000)).await
    }

    /// 判定并记录一次访问
    async fn authorize(
        &self,
        principal: &Principal,
        id: Uuid,
        action: DocumentAction,
    ) -> Result<Document> {
        let document = self
            .store
            .get_document(id)
            .await?
            .ok_or_else(|| SimrsError::not_found("document", id))?;

        let rules = self.effective_rules(&document).await?;
        let decision = evaluate(principal, &document, &rules, action);

        let entry = DocumentAccessLog {
            id: Uuid::new_v4(),
            document_id: document.id,
            user_id: principal.user_id,
            action,
            granted: decision.is_granted(),
            at: Utc::now(),
        };
        if let Err(e) = self.store.log_access(entry).await {
            tracing::warn!("Failed to write access log for {}: {}", document.id, e);
        }

        if decision.is_granted() {
            tracing::debug!(document = %document.id, user = %principal.user_id, ?decision, "Access granted");
            Ok(document)
        } else {
            tracing::info!(
                "Denied {} on document {} for {}",
                action,
                document.id,
                principal.username
            );
            Err(SimrsError::Permission(format!(
                "{} is not allowed on document {}",
                action, document.id
            )))
        }
    }

    async fn effective_rules(&self, document: &Document) -> Result<Vec<DocumentAccessRule>> {
        let mut scopes = vec![RuleScope::Document(document.id)];
        if let Some(folder_id) = document.folder_id {
            scopes.extend(self.folder_scopes(folder_id).await?);
        }
        self.store.rules_for(&scopes).await
    }

    /// 文件夹自身及全部上级文件夹
    async fn folder_scopes(&self, folder_id: Uuid) -> Result<Vec<RuleScope>> {
        let mut scopes = Vec::new();
        let mut current = Some(folder_id);
        while let Some(id) = current {
            if scopes.len() >= MAX_FOLDER_DEPTH {
                tracing::warn!("Folder chain from {} exceeds {} levels", folder_id, MAX_FOLDER_DEPTH);
                break;
            }
            scopes.push(RuleScope::Folder(id));
            current = match self.store.get_folder(id).await? {
                Some(folder) => folder.parent_id,
                None => None,
            };
        }
        Ok(scopes)
    }

    async fn ensure_folder_manage(&self, principal: &Principal, folder_id: Uuid) -> Result<()> {
        let folder = self.get_folder(folder_id).await?;
        if principal.is_admin() || folder.created_by == Some(principal.user_id) {
            return Ok(());
        }
        let scopes = self.folder_scopes(folder_id).await?;
        let rules = self.store.rules_for(&scopes).await?;
        match best_level(&rules, principal) {
            Some(level) if level.covers(AccessLevel::Manage) => Ok(()),
            _ => Err(SimrsError::Permission(format!(
                "managing folder {} is not allowed",
                folder.name
            ))),
        }
    }

    async fn ensure_scope_manage(&self, principal: &Principal, scope: RuleScope) -> Result<()> {
        match scope {
            RuleScope::Document(id) => self
                .authorize(principal, id, DocumentAction::ShareRules)
                .await
                .map(|_| ()),
            RuleScope::Folder(id) => self.ensure_folder_manage(principal, id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocuments;
    use simrs_core::AccessTarget;

    fn principal(role: &str) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: role.into(),
            role: role.into(),
            polyclinic_ids: vec![],
            doctor_id: None,
        }
    }

    fn service() -> DocumentService {
        DocumentService::new(Arc::new(InMemoryDocuments::new()), DocumentStorage::in_memory(32))
    }

    fn upload(folder_id: Option<Uuid>) -> UploadDocument {
        UploadDocument {
            folder_id,
            title: "SOP Triage".into(),
            file_name: "triage.txt".into(),
            mime_type: "text/plain".into(),
            is_public: false,
        }
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let service = service();
        let owner = principal("staff");
        let content = b"Triage protocol: assess airway, breathing, circulation first.".to_vec();
        let doc = service.upload(&owner, upload(None), &content).await.unwrap();
        assert!(doc.compressed);
        assert!(doc.storage_key.starts_with("documents/"));

        let (_, downloaded) = service.download(&owner, doc.id).await.unwrap();
        assert_eq!(downloaded, content);
    }

    #[tokio::test]
    async fn test_folder_rules_inherit_and_denials_are_logged() {
        let service = service();
        let admin = principal("admin");
        let nurse = principal("nurse");

        let root = service.create_folder(&admin, "SOP", None).await.unwrap();
        let child = service.create_folder(&admin, "IGD", Some(root.id)).await.unwrap();
        let doc = service.upload(&admin, upload(Some(child.id)), b"abc").await.unwrap();

        assert!(matches!(service.get(&nurse, doc.id).await, Err(SimrsError::Permission(_))));
        assert!(service.list_documents(&nurse, Some(child.id)).await.unwrap().is_empty());

        service
            .set_rules(
                &admin,
                RuleScope::Folder(root.id),
                vec![AccessRuleSpec { target: AccessTarget::Role("nurse".into()), level: AccessLevel::View }],
            )
            .await
            .unwrap();

        assert!(service.get(&nurse, doc.id).await.is_ok());
        assert!(service.download(&nurse, doc.id).await.is_err());
        assert_eq!(service.list_documents(&nurse, Some(child.id)).await.unwrap().len(), 1);

        let logs = service.access_logs(&admin, doc.id, None).await.unwrap();
        let nurse_logs: Vec<_> = logs.iter().filter(|l| l.user_id == nurse.user_id).collect();
        assert_eq!(nurse_logs.len(), 3);
        assert_eq!(nurse_logs.iter().filter(|l| l.granted).count(), 1);
    }

    #[tokio::test]
    async fn test_only_managers_change_rules() {
        let service = service();
        let owner = principal("doctor");
        let other = principal("doctor");
        let doc = service.upload(&owner, upload(None), b"x").await.unwrap();

        let spec = vec![AccessRuleSpec { target: AccessTarget::User(other.user_id), level: AccessLevel::Download }];
        assert!(service.set_rules(&other, RuleScope::Document(doc.id), spec.clone()).await.is_err());
        service.set_rules(&owner, RuleScope::Document(doc.id), spec).await.unwrap();
        assert!(service.download(&other, doc.id).await.is_ok());
        assert!(service.delete(&other, doc.id).await.is_err());

        service.delete(&owner, doc.id).await.unwrap();
        assert!(matches!(service.get(&owner, doc.id).await, Err(SimrsError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_non_empty_folder_cannot_be_deleted() {
        let service = service();
        let admin = principal("admin");
        let folder = service.create_folder(&admin, "Arsip", None).await.unwrap();
        service.upload(&admin, upload(Some(folder.id)), b"x").await.unwrap();
        assert!(matches!(
            service.delete_folder(&admin, folder.id).await,
            Err(SimrsError::Conflict(_))
        ));
    }
}
