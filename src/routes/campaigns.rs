use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    roles::{assert_role, ADMIN_ROLES, REVIEW_ROLES},
    schemas::{CampaignPath, ReconcileCampaignsInput},
    services::campaign_totals::{
        check_campaign, run_campaign_reconciliation, CampaignReconciliation, ReconciliationRun,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/campaigns/{campaign_id}/reconciliation",
            axum::routing::get(get_campaign_reconciliation),
        )
        .route(
            "/campaigns/reconcile",
            axum::routing::post(reconcile_campaigns),
        )
}

async fn get_campaign_reconciliation(
    State(state): State<AppState>,
    Path(path): Path<CampaignPath>,
    headers: HeaderMap,
) -> AppResult<Json<CampaignReconciliation>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, REVIEW_ROLES).await?;
    let pool = db_pool(&state)?;

    let report = check_campaign(pool, path.campaign_id.trim()).await?;
    Ok(Json(report))
}

async fn reconcile_campaigns(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<ReconcileCampaignsInput>>,
) -> AppResult<Json<ReconciliationRun>> {
    let Json(payload) = payload.unwrap_or_default();
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, ADMIN_ROLES).await?;
    let pool = db_pool(&state)?;

    let campaign_id = payload
        .campaign_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let run = run_campaign_reconciliation(pool, campaign_id, payload.apply).await;

    tracing::info!(
        requested_by = %user_id,
        apply = payload.apply,
        mismatched = run.mismatched,
        "Manual campaign reconciliation finished"
    );
    Ok(Json(run))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}
