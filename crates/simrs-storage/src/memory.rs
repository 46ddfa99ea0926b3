//! 内存文档元数据存储，用于测试和演示

use async_trait::async_trait;
use chrono::Utc;
use simrs_core::{
    Document, DocumentAccessLog, DocumentAccessRule, DocumentUpdate, Folder, Result, RuleScope,
    SimrsError,
};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::documents::DocumentStore;

#[derive(Debug, Default)]
struct DocumentState {
    folders: HashMap<Uuid, Folder>,
    documents: HashMap<Uuid, Document>,
    rules: Vec<DocumentAccessRule>,
    logs: Vec<DocumentAccessLog>,
}

#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    state: RwLock<DocumentState>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocuments {
    async fn create_folder(&self, folder: Folder) -> Result<Folder> {
        let mut state = self.state.write().await;
        let duplicate = state
            .folders
            .values()
            .any(|f| f.parent_id == folder.parent_id && f.name == folder.name);
        if duplicate {
            return Err(SimrsError::Conflict(format!("folder {} already exists", folder.name)));
        }
        state.folders.insert(folder.id, folder.clone());
        Ok(folder)
    }

    async fn get_folder(&self, id: Uuid) -> Result<Option<Folder>> {
        Ok(self.state.read().await.folders.get(&id).cloned())
    }

    async fn list_folders(&self, parent_id: Option<Uuid>) -> Result<Vec<Folder>> {
        let state = self.state.read().await;
        let mut folders: Vec<Folder> = state
            .folders
            .values()
            .filter(|f| f.parent_id == parent_id)
            .cloned()
            .collect();
        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }

    async fn rename_folder(&self, id: Uuid, name: &str) -> Result<Folder> {
        let mut state = self.state.write().await;
        let folder = state
            .folders
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("folder", id))?;
        folder.name = name.to_string();
        folder.updated_at = Utc::now();
        Ok(folder.clone())
    }

    async fn delete_folder(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.folders.contains_key(&id) {
            return Err(SimrsError::not_found("folder", id));
        }
        let in_use = state.folders.values().any(|f| f.parent_id == Some(id))
            || state.documents.values().any(|d| d.folder_id == Some(id));
        if in_use {
            return Err(SimrsError::Conflict(format!("folder {} is not empty", id)));
        }
        state.folders.remove(&id);
        state.rules.retain(|r| r.scope != RuleScope::Folder(id));
        Ok(())
    }

    async fn insert_document(&self, document: Document) -> Result<Document> {
        let mut state = self.state.write().await;
        state.documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>> {
        Ok(self.state.read().await.documents.get(&id).cloned())
    }

    async fn list_documents(&self, folder_id: Option<Uuid>) -> Result<Vec<Document>> {
        let state = self.state.read().await;
        let mut documents: Vec<Document> = state
            .documents
            .values()
            .filter(|d| d.folder_id == folder_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(documents)
    }

    async fn update_document(&self, id: Uuid, update: DocumentUpdate) -> Result<Document> {
        let mut state = self.state.write().await;
        let document = state
            .documents
            .get_mut(&id)
            .ok_or_else(|| SimrsError::not_found("document", id))?;
        if let Some(title) = update.title {
            document.title = title.trim().to_string();
        }
        if update.folder_id.is_some() {
            document.folder_id = update.folder_id;
        }
        if let Some(is_public) = update.is_public {
            document.is_public = is_public;
        }
        document.updated_at = Utc::now();
        Ok(document.clone())
    }

    async fn delete_document(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .documents
            .remove(&id)
            .ok_or_else(|| SimrsError::not_found("document", id))?;
        state.rules.retain(|r| r.scope != RuleScope::Document(id));
        Ok(())
    }

    async fn rules_for(&self, scopes: &[RuleScope]) -> Result<Vec<DocumentAccessRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .iter()
            .filter(|r| scopes.contains(&r.scope))
            .cloned()
            .collect())
    }

    async fn replace_rules(
        &self,
        scope: RuleScope,
        rules: Vec<DocumentAccessRule>,
    ) -> Result<Vec<DocumentAccessRule>> {
        let mut state = self.state.write().await;
        state.rules.retain(|r| r.scope != scope);
        state.rules.extend(rules.iter().cloned());
        Ok(rules)
    }

    async fn log_access(&self, entry: DocumentAccessLog) -> Result<()> {
        self.state.write().await.logs.push(entry);
        Ok(())
    }

    async fn access_logs(&self, document_id: Uuid, limit: i64) -> Result<Vec<DocumentAccessLog>> {
        let state = self.state.read().await;
        Ok(state
            .logs
            .iter()
            .rev()
            .filter(|l| l.document_id == document_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
