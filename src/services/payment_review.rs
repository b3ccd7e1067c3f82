use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Row};

use crate::{
    error::AppError,
    schemas::PaymentRecord,
    services::campaign_totals::{apply_campaign_delta, contribution_delta, ContributionSource},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl PaymentStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }
}

/// Allowed review moves: pending -> confirmed, pending -> rejected, and
/// confirmed -> rejected for reversals.
pub fn validate_transition(current: PaymentStatus, target: PaymentStatus) -> Result<(), AppError> {
    match (current, target) {
        (PaymentStatus::Pending, PaymentStatus::Confirmed)
        | (PaymentStatus::Pending, PaymentStatus::Rejected)
        | (PaymentStatus::Confirmed, PaymentStatus::Rejected) => Ok(()),
        _ => Err(AppError::Conflict(format!(
            "Payment cannot move from '{}' to '{}'.",
            current.as_str(),
            target.as_str()
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignTotalChange {
    pub campaign_id: String,
    pub delta: Decimal,
    pub current_amount: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReviewOutcome {
    pub payment_id: String,
    pub previous_status: PaymentStatus,
    pub status: PaymentStatus,
    pub fees_updated: usize,
    pub campaign_totals: Vec<CampaignTotalChange>,
}

/// Fee touched by a review, as it was before the update.
#[derive(Debug, Clone)]
struct LinkedFee {
    campaign_id: Option<String>,
    amount: Decimal,
    was_paid: bool,
}

/// Move a payment to `target` and propagate the effect in one transaction:
/// linked fees flip to `paid` (or back to `pending` with the link cleared on
/// rejection) and every affected campaign total is shifted atomically.
pub async fn review_payment(
    pool: &PgPool,
    payment: &PaymentRecord,
    target: PaymentStatus,
) -> Result<PaymentReviewOutcome, AppError> {
    let current = PaymentStatus::parse(&payment.status).ok_or_else(|| {
        AppError::Conflict(format!("Payment has unknown status '{}'.", payment.status))
    })?;
    validate_transition(current, target)?;

    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::Dependency(format!("txn begin: {e}")))?;

    // Guard against a concurrent review having moved the payment already.
    let sql = format!(
        "UPDATE payments SET status = '{}'
         WHERE id::text = $1 AND status::text = $2",
        target.as_str()
    );
    let updated = sqlx::query(&sql)
        .bind(&payment.id)
        .bind(current.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Dependency(format!("payment update: {e}")))?;
    if updated.rows_affected() == 0 {
        return Err(AppError::Conflict(
            "Payment was modified by another request; reload and retry.".to_string(),
        ));
    }

    let settle = target == PaymentStatus::Confirmed;
    let monthly = update_linked_fees(&mut tx, "maintenance_fees", &payment.id, settle).await?;
    let extraordinary =
        update_linked_fees(&mut tx, "extraordinary_fees", &payment.id, settle).await?;
    let fees_updated = monthly.len() + extraordinary.len();

    let mut campaign_totals = Vec::new();
    for (campaign_id, delta) in fee_deltas(&extraordinary, settle) {
        if let Some(current_amount) = apply_campaign_delta(
            &mut tx,
            &campaign_id,
            ContributionSource::PaidExtraordinaryFees,
            delta,
        )
        .await?
        {
            campaign_totals.push(CampaignTotalChange {
                campaign_id,
                delta,
                current_amount,
            });
        }
    }

    if let Some(campaign_id) = payment.campaign_id.as_deref() {
        let delta = contribution_delta(
            current == PaymentStatus::Confirmed,
            target == PaymentStatus::Confirmed,
            payment.amount,
        );
        if let Some(current_amount) = apply_campaign_delta(
            &mut tx,
            campaign_id,
            ContributionSource::ConfirmedPayments,
            delta,
        )
        .await?
        {
            campaign_totals.push(CampaignTotalChange {
                campaign_id: campaign_id.to_string(),
                delta,
                current_amount,
            });
        }
    }

    tx.commit()
        .await
        .map_err(|e| AppError::Dependency(format!("txn commit: {e}")))?;

    tracing::info!(
        payment_id = %payment.id,
        from = current.as_str(),
        to = target.as_str(),
        fees_updated,
        campaigns_updated = campaign_totals.len(),
        "Payment reviewed"
    );

    Ok(PaymentReviewOutcome {
        payment_id: payment.id.clone(),
        previous_status: current,
        status: target,
        fees_updated,
        campaign_totals,
    })
}

/// Net change per campaign from extraordinary fees entering or leaving `paid`.
fn fee_deltas(fees: &[LinkedFee], settle: bool) -> Vec<(String, Decimal)> {
    let mut deltas: Vec<(String, Decimal)> = Vec::new();
    for fee in fees {
        let Some(campaign_id) = fee.campaign_id.as_deref() else {
            continue;
        };
        let delta = contribution_delta(fee.was_paid, settle, fee.amount);
        if delta.is_zero() {
            continue;
        }
        match deltas.iter_mut().find(|(id, _)| id == campaign_id) {
            Some((_, total)) => *total += delta,
            None => deltas.push((campaign_id.to_string(), delta)),
        }
    }
    deltas
}

async fn update_linked_fees(
    conn: &mut PgConnection,
    table: &'static str,
    payment_id: &str,
    settle: bool,
) -> Result<Vec<LinkedFee>, AppError> {
    let campaign_column = if table == "extraordinary_fees" {
        "f.campaign_id::text"
    } else {
        "NULL::text"
    };
    let set_clause = if settle {
        "status = 'paid'"
    } else {
        "status = CASE WHEN prev.status::text = 'paid' THEN 'pending' ELSE f.status END, \
         payment_id = NULL"
    };
    let sql = format!(
        "WITH prev AS (
             SELECT id, status FROM {table}
             WHERE payment_id::text = $1
             FOR UPDATE
         )
         UPDATE {table} f SET {set_clause}
         FROM prev
         WHERE f.id = prev.id
         RETURNING {campaign_column} AS campaign_id, f.amount AS amount,
                   (prev.status::text = 'paid') AS was_paid"
    );

    let rows = sqlx::query(&sql)
        .bind(payment_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| AppError::Dependency(format!("{table} update: {e}")))?;

    rows.into_iter()
        .map(|row| {
            Ok(LinkedFee {
                campaign_id: row
                    .try_get::<Option<String>, _>("campaign_id")
                    .map_err(|e| AppError::Internal(format!("{table} row: {e}")))?,
                amount: row
                    .try_get::<Option<Decimal>, _>("amount")
                    .map_err(|e| AppError::Internal(format!("{table} row: {e}")))?
                    .unwrap_or(Decimal::ZERO),
                was_paid: row
                    .try_get::<Option<bool>, _>("was_paid")
                    .map_err(|e| AppError::Internal(format!("{table} row: {e}")))?
                    .unwrap_or(false),
            })
        })
        .collect()
}
