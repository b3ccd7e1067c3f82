use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::get_row,
    roles::{assert_role, REVIEW_ROLES},
    schemas::{validate_input, PaymentPath, PaymentRecord, RejectPaymentInput},
    services::payment_review::{review_payment, PaymentReviewOutcome, PaymentStatus},
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/payments/{payment_id}/confirm",
            axum::routing::post(confirm_payment),
        )
        .route(
            "/payments/{payment_id}/reject",
            axum::routing::post(reject_payment),
        )
}

async fn confirm_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
) -> AppResult<Json<PaymentReviewOutcome>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, REVIEW_ROLES).await?;

    let payment = load_payment(&state, &path.payment_id).await?;
    let outcome = review_payment(db_pool(&state)?, &payment, PaymentStatus::Confirmed).await?;
    tracing::info!(payment_id = %payment.id, reviewer = %user_id, "Payment confirmed");
    Ok(Json(outcome))
}

async fn reject_payment(
    State(state): State<AppState>,
    Path(path): Path<PaymentPath>,
    headers: HeaderMap,
    payload: Option<Json<RejectPaymentInput>>,
) -> AppResult<Json<PaymentReviewOutcome>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, REVIEW_ROLES).await?;

    let Json(payload) = payload.unwrap_or_default();
    validate_input(&payload)?;

    let payment = load_payment(&state, &path.payment_id).await?;
    let outcome = review_payment(db_pool(&state)?, &payment, PaymentStatus::Rejected).await?;
    tracing::info!(
        payment_id = %payment.id,
        reviewer = %user_id,
        reversed = outcome.previous_status == PaymentStatus::Confirmed,
        reason = payload.reason.as_deref().unwrap_or(""),
        "Payment rejected"
    );
    Ok(Json(outcome))
}

async fn load_payment(state: &AppState, payment_id: &str) -> AppResult<PaymentRecord> {
    let row = get_row(db_pool(state)?, "payments", payment_id, "id").await?;
    serde_json::from_value(row)
        .map_err(|error| AppError::Internal(format!("Malformed payment row: {error}")))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}
