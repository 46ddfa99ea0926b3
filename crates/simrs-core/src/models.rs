//! 核心数据模型定义
//!
//! 所有状态枚举以 snake_case 文本形式存储在数据库中，
//! 通过 `as_str()` / `FromStr` 进行双向转换。

/// 定义可与文本互转的枚举
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }

            pub fn all() -> &'static [$name] {
                &[ $( $name::$variant ),+ ]
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::error::SimrsError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $( $text => Ok($name::$variant), )+
                    other => Err($crate::error::SimrsError::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

pub mod attendance;
pub mod clinical;
pub mod document;
pub mod inventory;
pub mod queue;
pub mod registry;
pub mod user;

pub use attendance::*;
pub use clinical::*;
pub use document::*;
pub use inventory::*;
pub use queue::*;
pub use registry::*;
pub use user::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_text_round_trip() {
        for status in QueueStatus::all() {
            assert_eq!(QueueStatus::from_str(status.as_str()).unwrap(), *status);
        }
        assert_eq!(OpnameStatus::InProgress.as_str(), "in_progress");
        assert!(MovementKind::from_str("teleport").is_err());
    }

    #[test]
    fn test_serde_matches_text_form() {
        let json = serde_json::to_string(&OpnameStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let level: AccessLevel = serde_json::from_str("\"download\"").unwrap();
        assert_eq!(level, AccessLevel::Download);
    }
}
