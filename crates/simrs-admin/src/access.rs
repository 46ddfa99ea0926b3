//! 功能授权
//!
//! 判定规则：admin 角色全部放行；其他主体只要存在 (角色, 功能) 或
//! (用户, 功能) 授权记录即放行。

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use simrs_core::{AccessGrant, GrantSubject, Principal, Result, SimrsError};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

use crate::users::UserStore;

/// 已知功能及说明
pub const FEATURES: &[(&str, &str)] = &[
    ("patients:read", "Lihat data pasien"),
    ("patients:write", "Daftar dan ubah data pasien"),
    ("polyclinics:manage", "Kelola poliklinik"),
    ("doctors:manage", "Kelola dokter"),
    ("queue:read", "Lihat antrean"),
    ("queue:take", "Ambil nomor antrean"),
    ("queue:call", "Panggil dan layani antrean"),
    ("stock:read", "Lihat stok"),
    ("stock:manage", "Kelola master barang"),
    ("stock:receive", "Terima barang masuk"),
    ("stock:adjust", "Koreksi stok"),
    ("opname:manage", "Kelola stok opname"),
    ("opname:count", "Input hitung fisik"),
    ("prescriptions:read", "Lihat resep"),
    ("prescriptions:create", "Buat resep"),
    ("prescriptions:dispense", "Serahkan obat"),
    ("medical_records:read", "Lihat rekam medis"),
    ("documents:read", "Lihat dokumen"),
    ("documents:write", "Unggah dan kelola dokumen"),
    ("attendance:self", "Absensi dan cuti pribadi"),
    ("attendance:read", "Lihat absensi pegawai"),
    ("leaves:review", "Setujui atau tolak cuti"),
    ("access:manage", "Kelola hak akses"),
    ("users:manage", "Kelola pengguna dan peran"),
    ("webhooks:manage", "Kelola webhook"),
];

/// 内置角色的初始授权
pub const DEFAULT_GRANTS: &[(&str, &[&str])] = &[
    (
        "doctor",
        &[
            "patients:read",
            "queue:read",
            "queue:call",
            "stock:read",
            "prescriptions:read",
            "prescriptions:create",
            "medical_records:read",
            "documents:read",
            "attendance:self",
        ],
    ),
    (
        "nurse",
        &[
            "patients:read",
            "queue:read",
            "queue:call",
            "medical_records:read",
            "documents:read",
            "attendance:self",
        ],
    ),
    (
        "pharmacist",
        &[
            "patients:read",
            "stock:read",
            "stock:manage",
            "stock:receive",
            "stock:adjust",
            "opname:manage",
            "opname:count",
            "prescriptions:read",
            "prescriptions:dispense",
            "documents:read",
            "attendance:self",
        ],
    ),
    (
        "registration",
        &[
            "patients:read",
            "patients:write",
            "queue:read",
            "queue:take",
            "documents:read",
            "attendance:self",
        ],
    ),
    ("staff", &["documents:read", "attendance:self"]),
];

fn feature_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z][a-z0-9_]*(:[a-z][a-z0-9_]*)+$").expect("feature pattern is a valid regex")
    })
}

pub fn is_valid_feature(feature: &str) -> bool {
    feature_pattern().is_match(feature)
}

pub fn is_known_feature(feature: &str) -> bool {
    FEATURES.iter().any(|(key, _)| *key == feature)
}

/// 授权存储接口
#[async_trait]
pub trait AccessStore: Send + Sync {
    /// 已存在相同授权时返回原记录
    async fn grant(&self, grant: AccessGrant) -> Result<AccessGrant>;

    /// 返回是否确实删除了记录
    async fn revoke(&self, subject: &GrantSubject, feature: &str) -> Result<bool>;

    async fn list_grants(&self, subject: Option<&GrantSubject>) -> Result<Vec<AccessGrant>>;

    async fn has_grant(&self, role: &str, user_id: Uuid, feature: &str) -> Result<bool>;
}

/// 某项功能的授权情况
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureAccess {
    pub description: Option<String>,
    pub roles: Vec<String>,
    pub users: Vec<Uuid>,
}

/// 功能授权服务
pub struct AccessControlService {
    store: Arc<dyn AccessStore>,
    users: Arc<dyn UserStore>,
}

impl AccessControlService {
    pub fn new(store: Arc<dyn AccessStore>, users: Arc<dyn UserStore>) -> Self {
        Self { store, users }
    }

    pub async fn is_allowed(&self, principal: &Principal, feature: &str) -> Result<bool> {
        if principal.is_admin() {
            return Ok(true);
        }
        self.store
            .has_grant(&principal.role, principal.user_id, feature)
            .await
    }

    /// 无权限时返回 Permission 错误
    pub async fn require(&self, principal: &Principal, feature: &str) -> Result<()> {
        if self.is_allowed(principal, feature).await? {
            Ok(())
        } else {
            tracing::debug!(user = %principal.username, feature, "Feature denied");
            Err(SimrsError::Permission(format!("missing permission {}", feature)))
        }
    }

    pub async fn grant(
        &self,
        subject: GrantSubject,
        feature: &str,
        granted_by: Option<Uuid>,
    ) -> Result<AccessGrant> {
        if !is_valid_feature(feature) {
            return Err(SimrsError::Validation(format!("invalid feature key '{}'", feature)));
        }
        if !is_known_feature(feature) {
            tracing::warn!("Granting feature {} which is not in the catalogue", feature);
        }
        match &subject {
            GrantSubject::Role(role) => {
                if self.users.get_role(role).await?.is_none() {
                    return Err(SimrsError::not_found("role", role));
                }
            }
            GrantSubject::User(id) => {
                if self.users.get_user(*id).await?.is_none() {
                    return Err(SimrsError::not_found("user", id));
                }
            }
        }

        self.store
            .grant(AccessGrant {
                id: Uuid::new_v4(),
                subject,
                feature: feature.to_string(),
                granted_by,
                created_at: Utc::now(),
            })
            .await
    }

    pub async fn revoke(&self, subject: &GrantSubject, feature: &str) -> Result<()> {
        if !self.store.revoke(subject, feature).await? {
            return Err(SimrsError::NotFound(format!("grant {} not found", feature)));
        }
        Ok(())
    }

    pub async fn list_grants(&self, subject: Option<&GrantSubject>) -> Result<Vec<AccessGrant>> {
        self.store.list_grants(subject).await
    }

    /// 功能 → 角色/用户 矩阵，包含尚无授权的已知功能
    pub async fn matrix(&self) -> Result<BTreeMap<String, FeatureAccess>> {
        let mut matrix: BTreeMap<String, FeatureAccess> = FEATURES
            .iter()
            .map(|(key, description)| {
                (
                    key.to_string(),
                    FeatureAccess {
                        description: Some(description.to_string()),
                        ..Default::default()
                    },
                )
            })
            .collect();

        for grant in self.store.list_grants(None).await? {
            let entry = matrix.entry(grant.feature.clone()).or_default();
            match grant.subject {
                GrantSubject::Role(role) => entry.roles.push(role),
                GrantSubject::User(id) => entry.users.push(id),
            }
        }
        for entry in matrix.values_mut() {
            entry.roles.sort();
            entry.users.sort();
        }
        Ok(matrix)
    }

    /// 写入内置角色的初始授权
    pub async fn seed_defaults(&self) -> Result<usize> {
        let mut count = 0;
        for (role, features) in DEFAULT_GRANTS {
            if self.users.get_role(role).await?.is_none() {
                continue;
            }
            for feature in *features {
                self.grant(GrantSubject::Role(role.to_string()), feature, None)
                    .await?;
                count += 1;
            }
        }
        tracing::info!("Seeded {} default grants", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAdmin;
    use crate::users::{RoleService, UserService};
    use simrs_core::{NewUser, ADMIN_ROLE};

    fn principal(role: &str) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: "tester".into(),
            role: role.into(),
            polyclinic_ids: vec![],
            doctor_id: None,
        }
    }

    async fn service() -> (AccessControlService, Arc<InMemoryAdmin>) {
        let store = Arc::new(InMemoryAdmin::new());
        RoleService::new(store.clone()).seed().await.unwrap();
        (AccessControlService::new(store.clone(), store.clone()), store)
    }

    #[test]
    fn test_feature_key_format() {
        assert!(is_valid_feature("stock:adjust"));
        assert!(is_valid_feature("medical_records:read"));
        assert!(is_valid_feature("a:b:c"));
        assert!(!is_valid_feature("stock"));
        assert!(!is_valid_feature("Stock:adjust"));
        assert!(!is_valid_feature("stock:"));
        assert!(!is_valid_feature("1stock:adjust"));
        assert!(FEATURES.iter().all(|(key, _)| is_valid_feature(key)));
    }

    #[tokio::test]
    async fn test_admin_always_allowed() {
        let (access, _) = service().await;
        assert!(access.is_allowed(&principal(ADMIN_ROLE), "anything:here").await.unwrap());
        assert!(!access.is_allowed(&principal("nurse"), "stock:adjust").await.unwrap());
    }

    #[tokio::test]
    async fn test_role_and_user_grants() {
        let (access, store) = service().await;
        access
            .grant(GrantSubject::Role("pharmacist".into()), "stock:adjust", None)
            .await
            .unwrap();
        // 重复授权不产生新记录
        access
            .grant(GrantSubject::Role("pharmacist".into()), "stock:adjust", None)
            .await
            .unwrap();
        assert_eq!(access.list_grants(None).await.unwrap().len(), 1);
        assert!(access.is_allowed(&principal("pharmacist"), "stock:adjust").await.unwrap());

        let users = UserService::new(store);
        let nurse = users
            .create_user(NewUser {
                username: "perawat".into(),
                full_name: "Perawat Satu".into(),
                email: None,
                role: "nurse".into(),
                password: "password123".into(),
                polyclinic_ids: vec![],
                doctor_id: None,
            })
            .await
            .unwrap();
        let mut p = principal("nurse");
        p.user_id = nurse.id;
        assert!(access.require(&p, "stock:adjust").await.is_err());

        access
            .grant(GrantSubject::User(nurse.id), "stock:adjust", None)
            .await
            .unwrap();
        access.require(&p, "stock:adjust").await.unwrap();

        access
            .revoke(&GrantSubject::User(nurse.id), "stock:adjust")
            .await
            .unwrap();
        assert!(!access.is_allowed(&p, "stock:adjust").await.unwrap());
        assert!(matches!(
            access.revoke(&GrantSubject::User(nurse.id), "stock:adjust").await,
            Err(SimrsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_grant_validation() {
        let (access, _) = service().await;
        assert!(matches!(
            access.grant(GrantSubject::Role("nurse".into()), "STOCK", None).await,
            Err(SimrsError::Validation(_))
        ));
        assert!(matches!(
            access.grant(GrantSubject::Role("ghost".into()), "stock:read", None).await,
            Err(SimrsError::NotFound(_))
        ));
        assert!(matches!(
            access.grant(GrantSubject::User(Uuid::new_v4()), "stock:read", None).await,
            Err(SimrsError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_matrix_lists_catalogue_and_grants() {
        let (access, _) = service().await;
        access.seed_defaults().await.unwrap();
        let matrix = access.matrix().await.unwrap();

        assert_eq!(matrix.len(), FEATURES.len());
        let dispense = &matrix["prescriptions:dispense"];
        assert_eq!(dispense.roles, vec!["pharmacist".to_string()]);
        assert!(matrix["access:manage"].roles.is_empty());
        assert!(access.is_allowed(&principal("registration"), "queue:take").await.unwrap());
    }
}
