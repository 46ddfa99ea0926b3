//! 密码哈希
//!
//! 存储格式 `sha256$<iterations>$<salt>$<hex>`，盐为 URL 安全的 base64。

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use simrs_core::{Result, SimrsError};
use uuid::Uuid;

pub const DEFAULT_ITERATIONS: u32 = 10_000;
const SCHEME: &str = "sha256";

/// 生成带随机盐的密码哈希
pub fn hash_password(password: &str) -> String {
    hash_with_iterations(password, DEFAULT_ITERATIONS)
}

pub fn hash_with_iterations(password: &str, iterations: u32) -> String {
    let salt = URL_SAFE_NO_PAD.encode(Uuid::new_v4().as_bytes());
    let digest = derive(password, &salt, iterations);
    format!("{}${}${}${}", SCHEME, iterations, salt, hex(&digest))
}

/// 校验密码，比较过程与内容无关的耗时恒定
pub fn verify_password(password: &str, stored: &str) -> Result<bool> {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, iterations, salt, expected] = parts.as_slice() else {
        return Err(SimrsError::Internal("malformed password hash".to_string()));
    };
    if *scheme != SCHEME {
        return Err(SimrsError::Internal(format!("unsupported hash scheme {}", scheme)));
    }
    let iterations: u32 = iterations
        .parse()
        .map_err(|_| SimrsError::Internal("malformed hash iterations".to_string()))?;

    let actual = hex(&derive(password, salt, iterations));
    Ok(constant_time_eq(actual.as_bytes(), expected.as_bytes()))
}

fn derive(password: &str, salt: &str, iterations: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let mut digest: [u8; 32] = hasher.finalize().into();

    for _ in 1..iterations.max(1) {
        let mut hasher = Sha256::new();
        hasher.update(digest);
        hasher.update(salt.as_bytes());
        digest = hasher.finalize().into();
    }
    digest
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_with_iterations("rahasia123", 100);
        assert!(hash.starts_with("sha256$100$"));
        assert!(verify_password("rahasia123", &hash).unwrap());
        assert!(!verify_password("rahasia124", &hash).unwrap());
    }

    #[test]
    fn test_salts_differ() {
        let a = hash_with_iterations("same-password", 10);
        let b = hash_with_iterations("same-password", 10);
        assert_ne!(a, b);
        assert!(verify_password("same-password", &b).unwrap());
    }

    #[test]
    fn test_malformed_hash_is_error() {
        assert!(verify_password("x", "plain").is_err());
        assert!(verify_password("x", "md5$1$salt$abcd").is_err());
        assert!(verify_password("x", "sha256$many$salt$abcd").is_err());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
