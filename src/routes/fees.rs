use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use crate::{
    auth::require_user_id,
    error::{AppError, AppResult},
    repository::table_service::{get_row, list_all_rows, list_rows},
    roles::{assert_role, MEMBER_ROLES},
    schemas::{
        clamp_limit_in_range, parse_rows, CampaignRecord, FeeKind, FeePath, FeeRecord, FeeView,
        FeesQuery, UnitPath,
    },
    services::fee_status::{
        due_date_for, parse_deadline, resolve_effective_status, summarize_fees, DueDateRules,
    },
    state::AppState,
};

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/fees", axum::routing::get(list_fees))
        .route("/fees/{kind}/{fee_id}", axum::routing::get(get_fee))
        .route(
            "/units/{unit_id}/fee-statement",
            axum::routing::get(get_unit_fee_statement),
        )
}

async fn list_fees(
    State(state): State<AppState>,
    Query(query): Query<FeesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, MEMBER_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    if let Some(unit_id) = non_empty_opt(query.unit_id.as_deref()) {
        filters.insert("unit_id".to_string(), Value::String(unit_id));
    }
    match query.kind {
        FeeKind::Monthly => {
            if let Some(period) = non_empty_opt(query.period.as_deref()) {
                filters.insert("period".to_string(), Value::String(period));
            }
        }
        FeeKind::Extraordinary => {
            if let Some(campaign_id) = non_empty_opt(query.campaign_id.as_deref()) {
                filters.insert("campaign_id".to_string(), Value::String(campaign_id));
            }
        }
    }

    let order_by = match query.kind {
        FeeKind::Monthly => "period",
        FeeKind::Extraordinary => "created_at",
    };
    let limit = clamp_limit_in_range(query.limit, 1, 1000);
    let status = non_empty_opt(query.status.as_deref());

    // Effective status is derived, so a status filter has to see every row
    // before the limit applies.
    let rows = if status.is_some() {
        let mut rows =
            list_all_rows(pool, query.kind.table(), Some(&filters), order_by).await?;
        rows.reverse();
        rows
    } else {
        list_rows(pool, query.kind.table(), Some(&filters), limit, 0, order_by, false).await?
    };
    let (fees, _) = parse_rows::<FeeRecord>(rows);

    let views = build_fee_views(&state, query.kind, fees).await?;
    let views = filter_by_status(views, status.as_deref(), limit);

    Ok(Json(json!({ "data": views })))
}

async fn get_fee(
    State(state): State<AppState>,
    Path(path): Path<FeePath>,
    headers: HeaderMap,
) -> AppResult<Json<FeeView>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, MEMBER_ROLES).await?;
    let pool = db_pool(&state)?;

    let row = get_row(pool, path.kind.table(), &path.fee_id, "id").await?;
    let fee: FeeRecord = serde_json::from_value(row)
        .map_err(|error| AppError::Internal(format!("Malformed fee row: {error}")))?;

    let mut views = build_fee_views(&state, path.kind, vec![fee]).await?;
    views
        .pop()
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Fee not found.".to_string()))
}

async fn get_unit_fee_statement(
    State(state): State<AppState>,
    Path(path): Path<UnitPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_role(&state, &user_id, MEMBER_ROLES).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert(
        "unit_id".to_string(),
        Value::String(path.unit_id.trim().to_string()),
    );

    let mut views = Vec::new();
    for kind in [FeeKind::Monthly, FeeKind::Extraordinary] {
        let rows = list_all_rows(pool, kind.table(), Some(&filters), "created_at").await?;
        let (fees, _) = parse_rows::<FeeRecord>(rows);
        views.extend(build_fee_views(&state, kind, fees).await?);
    }

    let summary = summarize_fees(
        views
            .iter()
            .map(|view| (&view.fee, &view.effective_status)),
    );

    Ok(Json(json!({
        "unit_id": path.unit_id,
        "summary": summary,
        "data": views,
    })))
}

async fn build_fee_views(
    state: &AppState,
    kind: FeeKind,
    fees: Vec<FeeRecord>,
) -> AppResult<Vec<FeeView>> {
    let rules = DueDateRules::from_config(&state.config);
    let deadlines = match kind {
        FeeKind::Monthly => HashMap::new(),
        FeeKind::Extraordinary => campaign_deadlines(state, &fees, &rules).await?,
    };
    let now = Utc::now();

    Ok(fees
        .into_iter()
        .map(|fee| {
            let deadline = fee
                .campaign_id
                .as_deref()
                .and_then(|campaign_id| deadlines.get(campaign_id).copied().flatten());
            fee_view(fee, kind, deadline, now, &rules)
        })
        .collect())
}

/// Keep fees whose effective status matches, then apply the page limit.
fn filter_by_status(mut views: Vec<FeeView>, status: Option<&str>, limit: i64) -> Vec<FeeView> {
    if let Some(status) = status {
        let wanted = status.to_ascii_lowercase();
        views.retain(|view| view.effective_status.as_str() == wanted);
    }
    views.truncate(usize::try_from(limit).unwrap_or(0));
    views
}

fn fee_view(
    fee: FeeRecord,
    kind: FeeKind,
    campaign_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    rules: &DueDateRules,
) -> FeeView {
    let effective_status = resolve_effective_status(&fee, kind, campaign_deadline, now, rules);
    let due_date = due_date_for(&fee, kind, campaign_deadline, rules);
    FeeView {
        fee,
        kind,
        effective_status,
        due_date,
    }
}

async fn campaign_deadlines(
    state: &AppState,
    fees: &[FeeRecord],
    rules: &DueDateRules,
) -> AppResult<HashMap<String, Option<DateTime<Utc>>>> {
    let pool = db_pool(state)?;
    let mut deadlines = HashMap::new();
    for campaign_id in fees.iter().filter_map(|fee| fee.campaign_id.as_deref()) {
        if deadlines.contains_key(campaign_id) {
            continue;
        }
        let deadline = match get_row(pool, "campaigns", campaign_id, "id").await {
            Ok(row) => deadline_from_campaign_row(campaign_id, row, rules),
            Err(AppError::NotFound(_)) => {
                tracing::warn!(campaign_id, "Extraordinary fee references a missing campaign");
                None
            }
            Err(error) => return Err(error),
        };
        deadlines.insert(campaign_id.to_string(), deadline);
    }
    Ok(deadlines)
}

fn deadline_from_campaign_row(
    campaign_id: &str,
    row: Value,
    rules: &DueDateRules,
) -> Option<DateTime<Utc>> {
    match serde_json::from_value::<CampaignRecord>(row) {
        Ok(campaign) => campaign
            .deadline
            .and_then(|raw| parse_deadline(&raw, rules.timezone)),
        Err(error) => {
            tracing::warn!(campaign_id, error = %error, "Skipping malformed campaign row");
            None
        }
    }
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency(
            "Supabase database is not configured. Set SUPABASE_DB_URL or DATABASE_URL.".to_string(),
        )
    })
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
