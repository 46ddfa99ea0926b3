//! 用户认证
//!
//! 登录签发 HS256 JWT，中间件校验 `Authorization: Bearer` 后把
//! [`Principal`] 放入请求扩展，业务处理器再按功能授权检查。

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use simrs_admin::FEATURES;
use simrs_core::{Principal, Result, SimrsError, User, UserInfo};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// JWT Claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,      // 用户ID
    pub username: String, // 用户名
    pub role: String,     // 角色
    pub exp: usize,       // 过期时间
    pub iat: usize,       // 签发时间
    pub jti: String,      // JWT ID
}

/// 令牌签发与校验参数
pub struct AuthSettings {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl AuthSettings {
    pub fn new(secret: &str, ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::minutes(ttl_minutes.max(1)),
        }
    }

    /// 为用户签发令牌，返回令牌及过期时间
    pub fn issue(&self, user: &User) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: user.id.to_string(),
            username: user.username.clone(),
            role: user.role.clone(),
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SimrsError::Internal(format!("failed to sign token: {}", e)))?;
        Ok((token, expires_at))
    }

    pub fn verify(&self, token: &str) -> Result<Claims> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| SimrsError::Unauthorized(format!("invalid token: {}", e)))
    }
}

/// 登录请求
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// 登录响应
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
    pub user: UserInfo,
}

/// 当前用户及其可用功能
#[derive(Debug, Serialize)]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: UserInfo,
    pub features: Vec<&'static str>,
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// 校验 token 并加载当前用户
pub(crate) async fn resolve_principal(state: &AppState, token: &str) -> ApiResult<Principal> {
    let claims = state.auth.verify(token)?;

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::unauthorized("invalid token subject"))?;
    // 以数据库中的当前状态为准，停用或改角色立即生效
    let user = state
        .users
        .get_user(user_id)
        .await
        .map_err(|_| ApiError::unauthorized("unknown user"))?;
    if !user.is_active {
        return Err(ApiError::unauthorized("account is disabled"));
    }
    Ok(Principal::from(&user))
}

/// 认证中间件
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> ApiResult<Response> {
    let token = bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    let principal = resolve_principal(&state, token).await?;

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// 登录处理器
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    info!("Login attempt for user: {}", request.username);

    let user = match state.users.authenticate(&request.username, &request.password).await {
        Ok(user) => user,
        Err(e) => {
            warn!("Login failed for {}: {}", request.username, e);
            return Err(e.into());
        }
    };
    let (token, expires_at) = state.auth.issue(&user)?;
    info!("User logged in successfully: {}", user.username);

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            token,
            token_type: "Bearer",
            expires_at,
            user: UserInfo::from(&user),
        }),
    ))
}

/// 获取当前用户信息
pub async fn get_current_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<CurrentUser>> {
    let user = state.users.get_user(principal.user_id).await?;

    let mut features = Vec::new();
    for (key, _) in FEATURES {
        if state.access.is_allowed(&principal, key).await? {
            features.push(*key);
        }
    }

    Ok(Json(CurrentUser {
        user: UserInfo::from(&user),
        features,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: "dr.sari".to_string(),
            full_name: "dr. Sari".to_string(),
            email: None,
            role: "doctor".to_string(),
            password_hash: String::new(),
            is_active: true,
            polyclinic_ids: Vec::new(),
            doctor_id: None,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let settings = AuthSettings::new("secret", 60);
        let user = user();
        let (token, expires_at) = settings.issue(&user).unwrap();
        assert!(expires_at > Utc::now());

        let claims = settings.verify(&token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.role, "doctor");
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let (token, _) = AuthSettings::new("secret", 60).issue(&user()).unwrap();
        let err = AuthSettings::new("other", 60).verify(&token).unwrap_err();
        assert!(matches!(err, SimrsError::Unauthorized(_)));
    }

    #[test]
    fn test_garbage_token_is_rejected() {
        let settings = AuthSettings::new("secret", 60);
        assert!(settings.verify("not.a.token").is_err());
    }
}
