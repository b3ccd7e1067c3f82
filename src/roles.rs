use sqlx::PgPool;

use crate::{error::AppError, state::AppState};

pub const ADMIN_ROLES: &[&str] = &["admin"];
pub const REVIEW_ROLES: &[&str] = &["admin", "board"];
pub const MEMBER_ROLES: &[&str] = &["admin", "board", "resident"];

fn db_pool(state: &AppState) -> Result<&PgPool, AppError> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}

/// Profile role for a user, cached for `ROLE_CACHE_TTL_SECONDS`.
pub async fn get_profile_role(state: &AppState, user_id: &str) -> Result<Option<String>, AppError> {
    if let Some(role) = state.role_cache.get(user_id).await {
        return Ok(Some(role));
    }

    let pool = db_pool(state)?;
    let role = sqlx::query_scalar::<_, Option<String>>(
        "SELECT role::text FROM profiles WHERE id::text = $1 LIMIT 1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| AppError::Dependency(format!("Supabase request failed: {error}")))?
    .flatten()
    .map(|role| normalize_role(&role))
    .filter(|role| !role.is_empty());

    if let Some(role) = &role {
        state
            .role_cache
            .insert(user_id.to_string(), role.clone())
            .await;
    }
    Ok(role)
}

pub async fn assert_role(
    state: &AppState,
    user_id: &str,
    allowed_roles: &[&str],
) -> Result<String, AppError> {
    let role = get_profile_role(state, user_id).await?.ok_or_else(|| {
        AppError::Forbidden("Forbidden: no profile for this user.".to_string())
    })?;
    check_role(&role, allowed_roles)?;
    Ok(role)
}

fn check_role(role: &str, allowed_roles: &[&str]) -> Result<(), AppError> {
    if allowed_roles.contains(&role) {
        return Ok(());
    }
    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

fn normalize_role(raw: &str) -> String {
    match raw.trim().to_ascii_lowercase().as_str() {
        "administrator" | "superadmin" => "admin".to_string(),
        "owner" | "tenant" => "resident".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{check_role, normalize_role, ADMIN_ROLES, MEMBER_ROLES, REVIEW_ROLES};

    #[test]
    fn normalizes_role_aliases() {
        assert_eq!(normalize_role(" Admin "), "admin");
        assert_eq!(normalize_role("superadmin"), "admin");
        assert_eq!(normalize_role("tenant"), "resident");
        assert_eq!(normalize_role("board"), "board");
    }

    #[test]
    fn checks_role_lists() {
        assert!(check_role("admin", ADMIN_ROLES).is_ok());
        assert!(check_role("board", ADMIN_ROLES).is_err());
        assert!(check_role("board", REVIEW_ROLES).is_ok());
        assert!(check_role("resident", REVIEW_ROLES).is_err());
        assert!(check_role("resident", MEMBER_ROLES).is_ok());
        assert!(check_role("guest", MEMBER_ROLES).is_err());
    }
}
