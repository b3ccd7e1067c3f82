use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

const SUPABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Clone, Deserialize)]
pub struct SupabaseClaims {
    pub sub: String,
}

/// Resolve the calling user's id from the request.
///
/// Order: dev `x-user-id` override (non-production only), local HS256
/// verification with `SUPABASE_JWT_SECRET`, then Supabase `/auth/v1/user`.
pub async fn require_user_id(state: &AppState, headers: &HeaderMap) -> AppResult<String> {
    if state.config.auth_dev_overrides_enabled() {
        if let Some(user_id) = header_str(headers, "x-user-id") {
            return Ok(user_id);
        }
    }

    let token = bearer_token(headers).ok_or_else(|| {
        AppError::Unauthorized("Unauthorized: missing bearer token.".to_string())
    })?;

    if let Some(secret) = state.config.supabase_jwt_secret.as_deref() {
        return decode_supabase_jwt(&token, secret).map(|claims| claims.sub);
    }

    fetch_supabase_user_id(state, &token).await
}

pub fn decode_supabase_jwt(token: &str, secret: &str) -> AppResult<SupabaseClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_audience(&[SUPABASE_AUDIENCE]);

    let data = decode::<SupabaseClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|error| {
        tracing::debug!(error = %error, "Rejected bearer token");
        AppError::Unauthorized("Unauthorized: invalid or expired token.".to_string())
    })?;

    if data.claims.sub.trim().is_empty() {
        return Err(AppError::Unauthorized(
            "Unauthorized: token has no subject.".to_string(),
        ));
    }
    Ok(data.claims)
}

async fn fetch_supabase_user_id(state: &AppState, token: &str) -> AppResult<String> {
    let (Some(base_url), Some(api_key)) = (
        state.config.supabase_url.as_deref(),
        state.config.supabase_service_role_key.as_deref(),
    ) else {
        return Err(AppError::ServiceUnavailable(
            "Auth is not configured. Set SUPABASE_JWT_SECRET or SUPABASE_URL.".to_string(),
        ));
    };

    let response = state
        .http_client
        .get(format!("{base_url}/auth/v1/user"))
        .header("apikey", api_key)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|error| {
            tracing::error!(error = %error, "Supabase auth request failed");
            AppError::Dependency("Supabase auth request failed.".to_string())
        })?;

    if !response.status().is_success() {
        return Err(AppError::Unauthorized(
            "Unauthorized: invalid or expired token.".to_string(),
        ));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|_| AppError::Dependency("Supabase auth returned invalid JSON.".to_string()))?;

    body.get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToOwned::to_owned)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized: missing user.".to_string()))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = header_str(headers, "authorization")?;
    let (scheme, token) = raw.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue};
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::{bearer_token, decode_supabase_jwt};

    const SECRET: &str = "test-secret-with-enough-length";

    fn token(aud: &str, exp_offset: i64) -> String {
        let exp = chrono::Utc::now().timestamp() + exp_offset;
        encode(
            &Header::default(),
            &json!({ "sub": "user-1", "aud": aud, "exp": exp, "email": "a@b.co" }),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .expect("encode token")
    }

    #[test]
    fn extracts_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def"));

        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn accepts_valid_supabase_token() {
        let claims = decode_supabase_jwt(&token("authenticated", 600), SECRET).expect("valid");
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn rejects_wrong_audience_expired_or_forged_tokens() {
        assert!(decode_supabase_jwt(&token("anon", 600), SECRET).is_err());
        assert!(decode_supabase_jwt(&token("authenticated", -3600), SECRET).is_err());
        assert!(decode_supabase_jwt(&token("authenticated", 600), "other-secret").is_err());
    }
}
