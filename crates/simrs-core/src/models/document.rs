//! 文档、文件夹与访问控制

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 文件夹（树形结构）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 文档元数据，内容保存在对象存储中
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub folder_id: Option<Uuid>,
    pub title: String,
    pub file_name: String,
    pub mime_type: String,
    pub size_bytes: i64,
    pub checksum: String, // sha256
    pub storage_key: String,
    pub compressed: bool,
    pub owner_id: Option<Uuid>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentUpdate {
    pub title: Option<String>,
    pub folder_id: Option<Uuid>,
    pub is_public: Option<bool>,
}

string_enum! {
    /// 访问级别，按 View < Download < Manage 递增
    AccessLevel {
        View => "view",
        Download => "download",
        Manage => "manage",
    }
}

impl AccessLevel {
    pub fn rank(&self) -> u8 {
        match self {
            AccessLevel::View => 1,
            AccessLevel::Download => 2,
            AccessLevel::Manage => 3,
        }
    }

    pub fn covers(&self, required: AccessLevel) -> bool {
        self.rank() >= required.rank()
    }
}

string_enum! {
    /// 访问规则的主体类型
    AccessTargetKind {
        User => "user",
        Role => "role",
        Polyclinic => "polyclinic",
        Doctor => "doctor",
    }
}

/// 访问规则主体
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AccessTarget {
    User(Uuid),
    Role(String),
    Polyclinic(Uuid),
    Doctor(Uuid),
}

impl AccessTarget {
    pub fn kind(&self) -> AccessTargetKind {
        match self {
            AccessTarget::User(_) => AccessTargetKind::User,
            AccessTarget::Role(_) => AccessTargetKind::Role,
            AccessTarget::Polyclinic(_) => AccessTargetKind::Polyclinic,
            AccessTarget::Doctor(_) => AccessTargetKind::Doctor,
        }
    }

    pub fn value(&self) -> String {
        match self {
            AccessTarget::User(id) | AccessTarget::Polyclinic(id) | AccessTarget::Doctor(id) => {
                id.to_string()
            }
            AccessTarget::Role(role) => role.clone(),
        }
    }

    /// 从存储的 (kind, value) 还原
    pub fn from_parts(kind: AccessTargetKind, value: &str) -> crate::Result<Self> {
        let parse_id = |v: &str| {
            Uuid::parse_str(v).map_err(|e| {
                crate::SimrsError::Validation(format!("invalid access target id '{}': {}", v, e))
            })
        };
        Ok(match kind {
            AccessTargetKind::User => AccessTarget::User(parse_id(value)?),
            AccessTargetKind::Role => AccessTarget::Role(value.to_string()),
            AccessTargetKind::Polyclinic => AccessTarget::Polyclinic(parse_id(value)?),
            AccessTargetKind::Doctor => AccessTarget::Doctor(parse_id(value)?),
        })
    }
}

/// 规则作用范围：单个文档或整个文件夹（含子文件夹）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum RuleScope {
    Document(Uuid),
    Folder(Uuid),
}

/// 文档访问规则
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAccessRule {
    pub id: Uuid,
    pub scope: RuleScope,
    pub target: AccessTarget,
    pub level: AccessLevel,
    pub created_at: DateTime<Utc>,
}

/// 规则设置请求项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRuleSpec {
    pub target: AccessTarget,
    pub level: AccessLevel,
}

string_enum! {
    DocumentAction {
        View => "view",
        Download => "download",
        Update => "update",
        Delete => "delete",
        ShareRules => "share_rules",
    }
}

impl DocumentAction {
    pub fn required_level(&self) -> AccessLevel {
        match self {
            DocumentAction::View => AccessLevel::View,
            DocumentAction::Download => AccessLevel::Download,
            DocumentAction::Update | DocumentAction::Delete | DocumentAction::ShareRules => {
                AccessLevel::Manage
            }
        }
    }
}

/// 文档访问日志
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAccessLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub user_id: Uuid,
    pub action: DocumentAction,
    pub granted: bool,
    pub at: DateTime<Utc>,
}
