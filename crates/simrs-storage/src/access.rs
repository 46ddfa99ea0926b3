//! 文档访问判定

use serde::{Deserialize, Serialize};
use simrs_core::{
    AccessLevel, AccessTarget, Document, DocumentAccessRule, DocumentAction, Principal,
};

/// 判定结果及依据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    Admin,
    Owner,
    Public,
    Rule(AccessLevel),
    Denied,
}

impl AccessDecision {
    pub fn is_granted(&self) -> bool {
        !matches!(self, AccessDecision::Denied)
    }
}

/// 规则主体是否命中当前用户
pub fn target_matches(target: &AccessTarget, principal: &Principal) -> bool {
    match target {
        AccessTarget::User(id) => *id == principal.user_id,
        AccessTarget::Role(role) => *role == principal.role,
        AccessTarget::Polyclinic(id) => principal.polyclinic_ids.contains(id),
        AccessTarget::Doctor(id) => principal.doctor_id == Some(*id),
    }
}

/// 命中规则中的最高级别
pub fn best_level(rules: &[DocumentAccessRule], principal: &Principal) -> Option<AccessLevel> {
    rules
        .iter()
        .filter(|rule| target_matches(&rule.target, principal))
        .map(|rule| rule.level)
        .max_by_key(|level| level.rank())
}

/// 判定用户对文档执行某操作是否允许
///
/// `rules` 为文档本身及其所有上级文件夹上的规则。
pub fn evaluate(
    principal: &Principal,
    document: &Document,
    rules: &[DocumentAccessRule],
    action: DocumentAction,
) -> AccessDecision {
    if principal.is_admin() {
        return AccessDecision::Admin;
    }
    if document.owner_id == Some(principal.user_id) {
        return AccessDecision::Owner;
    }

    if document.is_public && matches!(action, DocumentAction::View | DocumentAction::Download) {
        return AccessDecision::Public;
    }

    let required = action.required_level();
    match best_level(rules, principal) {
        Some(level) if level.covers(required) => AccessDecision::Rule(level),
        _ => AccessDecision::Denied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use simrs_core::RuleScope;
    use uuid::Uuid;

    fn principal(role: &str) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            username: "u".into(),
            role: role.into(),
            polyclinic_ids: vec![],
            doctor_id: None,
        }
    }

    fn document(owner: Option<Uuid>, is_public: bool) -> Document {
        let now = Utc::now();
        Document {
            id: Uuid::new_v4(),
            folder_id: None,
            title: "SOP".into(),
            file_name: "sop.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: 10,
            checksum: String::new(),
            storage_key: "documents/x".into(),
            compressed: false,
            owner_id: owner,
            is_public,
            created_at: now,
            updated_at: now,
        }
    }

    fn rule(target: AccessTarget, level: AccessLevel) -> DocumentAccessRule {
        DocumentAccessRule {
            id: Uuid::new_v4(),
            scope: RuleScope::Folder(Uuid::nil()),
            target,
            level,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_admin_owner_public() {
        let doc = document(None, false);
        assert_eq!(evaluate(&principal("admin"), &doc, &[], DocumentAction::Delete), AccessDecision::Admin);

        let nurse = principal("nurse");
        let own = document(Some(nurse.user_id), false);
        assert_eq!(evaluate(&nurse, &own, &[], DocumentAction::ShareRules), AccessDecision::Owner);

        let public = document(None, true);
        assert_eq!(evaluate(&nurse, &public, &[], DocumentAction::Download), AccessDecision::Public);
        assert_eq!(evaluate(&nurse, &public, &[], DocumentAction::Update), AccessDecision::Denied);
    }

    #[test]
    fn test_rule_levels() {
        let mut doctor = principal("doctor");
        let poli = Uuid::new_v4();
        doctor.polyclinic_ids.push(poli);
        let doc = document(None, false);

        let rules = vec![
            rule(AccessTarget::Role("doctor".into()), AccessLevel::View),
            rule(AccessTarget::Polyclinic(poli), AccessLevel::Download),
        ];
        assert!(evaluate(&doctor, &doc, &rules, DocumentAction::Download).is_granted());
        assert_eq!(evaluate(&doctor, &doc, &rules, DocumentAction::Delete), AccessDecision::Denied);

        let stranger = principal("staff");
        assert_eq!(evaluate(&stranger, &doc, &rules, DocumentAction::View), AccessDecision::Denied);
    }

    #[test]
    fn test_doctor_and_user_targets() {
        let mut p = principal("doctor");
        let doctor_id = Uuid::new_v4();
        p.doctor_id = Some(doctor_id);
        assert!(target_matches(&AccessTarget::Doctor(doctor_id), &p));
        assert!(target_matches(&AccessTarget::User(p.user_id), &p));
        assert!(!target_matches(&AccessTarget::Doctor(Uuid::new_v4()), &p));
    }
}
