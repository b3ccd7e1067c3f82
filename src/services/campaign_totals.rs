use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};

use crate::{
    error::AppError,
    repository::table_service::{get_row, list_all_rows},
    schemas::{parse_rows, CampaignRecord},
};

/// Which records make up a campaign's collected amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContributionSource {
    /// Mandatory assessments: linked extraordinary fees with status `paid`.
    PaidExtraordinaryFees,
    /// Voluntary drives: payments with status `confirmed`.
    ConfirmedPayments,
}

impl ContributionSource {
    pub fn for_campaign(campaign: &CampaignRecord) -> Self {
        if campaign.is_mandatory {
            Self::PaidExtraordinaryFees
        } else {
            Self::ConfirmedPayments
        }
    }

    fn amounts_sql(self) -> &'static str {
        match self {
            Self::PaidExtraordinaryFees => {
                "SELECT amount FROM extraordinary_fees
                 WHERE campaign_id::text = $1 AND status::text = 'paid'"
            }
            Self::ConfirmedPayments => {
                "SELECT amount FROM payments
                 WHERE campaign_id::text = $1 AND status::text = 'confirmed'"
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignReconciliation {
    pub campaign_id: String,
    pub campaign_name: String,
    pub source: ContributionSource,
    pub contributions: usize,
    pub stored_amount: Decimal,
    pub computed_amount: Decimal,
    pub mismatch: bool,
    pub applied: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconciliationRun {
    pub checked: u32,
    pub mismatched: u32,
    pub repaired: u32,
    pub errors: u32,
    pub reports: Vec<CampaignReconciliation>,
}

pub fn compute_collected<'a, I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = &'a Decimal>,
{
    amounts
        .into_iter()
        .fold(Decimal::ZERO, |total, amount| total + *amount)
}

pub fn reconcile_campaign(campaign: &CampaignRecord, amounts: &[Decimal]) -> CampaignReconciliation {
    let computed_amount = compute_collected(amounts);
    CampaignReconciliation {
        campaign_id: campaign.id.clone(),
        campaign_name: campaign.name.clone(),
        source: ContributionSource::for_campaign(campaign),
        contributions: amounts.len(),
        stored_amount: campaign.current_amount,
        computed_amount,
        mismatch: campaign.current_amount != computed_amount,
        applied: false,
    }
}

/// Signed change to a campaign total when one contribution moves in or out
/// of the counted set.
pub fn contribution_delta(was_counted: bool, is_counted: bool, amount: Decimal) -> Decimal {
    match (was_counted, is_counted) {
        (false, true) => amount,
        (true, false) => -amount,
        _ => Decimal::ZERO,
    }
}

async fn fetch_contribution_amounts(
    pool: &PgPool,
    campaign_id: &str,
    source: ContributionSource,
) -> Result<Vec<Decimal>, AppError> {
    sqlx::query_scalar::<_, Decimal>(source.amounts_sql())
        .bind(campaign_id)
        .fetch_all(pool)
        .await
        .map_err(|error| AppError::Dependency(format!("Contribution lookup failed: {error}")))
}

/// Compare one campaign's cached total against its contributions without
/// writing anything.
pub async fn check_campaign(
    pool: &PgPool,
    campaign_id: &str,
) -> Result<CampaignReconciliation, AppError> {
    let row = get_row(pool, "campaigns", campaign_id, "id").await?;
    let campaign: CampaignRecord = serde_json::from_value(row)
        .map_err(|error| AppError::Internal(format!("Malformed campaign row: {error}")))?;
    let source = ContributionSource::for_campaign(&campaign);
    let amounts = fetch_contribution_amounts(pool, &campaign.id, source).await?;
    Ok(reconcile_campaign(&campaign, &amounts))
}

/// Recompute `current_amount` for every campaign (or one) and, when `apply`
/// is set, overwrite the mismatched ones. Safe to rerun.
pub async fn run_campaign_reconciliation(
    pool: &PgPool,
    campaign_id: Option<&str>,
    apply: bool,
) -> ReconciliationRun {
    let mut run = ReconciliationRun::default();

    let mut filters = Map::new();
    if let Some(id) = campaign_id {
        filters.insert("id".to_string(), Value::String(id.to_string()));
    }

    let rows = match list_all_rows(pool, "campaigns", Some(&filters), "created_at").await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Failed to fetch campaigns for reconciliation: {e}");
            run.errors += 1;
            return run;
        }
    };
    let (campaigns, malformed) = parse_rows::<CampaignRecord>(rows);
    run.errors += malformed;

    for campaign in campaigns {
        run.checked += 1;
        let source = ContributionSource::for_campaign(&campaign);
        let amounts = match fetch_contribution_amounts(pool, &campaign.id, source).await {
            Ok(amounts) => amounts,
            Err(e) => {
                warn!(campaign_id = %campaign.id, "Failed to load contributions: {e}");
                run.errors += 1;
                continue;
            }
        };

        let mut report = reconcile_campaign(&campaign, &amounts);
        if report.mismatch {
            run.mismatched += 1;
            warn!(
                campaign_id = %report.campaign_id,
                stored = %report.stored_amount,
                computed = %report.computed_amount,
                "Campaign total drifted from its contributions"
            );
            if apply {
                match overwrite_current_amount(pool, &report.campaign_id, report.computed_amount)
                    .await
                {
                    Ok(()) => {
                        report.applied = true;
                        run.repaired += 1;
                    }
                    Err(e) => {
                        warn!(campaign_id = %report.campaign_id, "Failed to repair total: {e}");
                        run.errors += 1;
                    }
                }
            }
        }
        run.reports.push(report);
    }

    info!(
        checked = run.checked,
        mismatched = run.mismatched,
        repaired = run.repaired,
        errors = run.errors,
        "Campaign reconciliation completed"
    );

    run
}

async fn overwrite_current_amount(
    pool: &PgPool,
    campaign_id: &str,
    amount: Decimal,
) -> Result<(), AppError> {
    sqlx::query("UPDATE campaigns SET current_amount = $1 WHERE id::text = $2")
        .bind(amount)
        .bind(campaign_id)
        .execute(pool)
        .await
        .map_err(|error| AppError::Dependency(format!("Campaign update failed: {error}")))?;
    Ok(())
}

// NULL `is_mandatory` reads as voluntary, matching `ContributionSource::for_campaign`.
const APPLY_DELTA_SQL: &str = "UPDATE campaigns
     SET current_amount = COALESCE(current_amount, 0) + $1
     WHERE id::text = $2 AND COALESCE(is_mandatory, false) = $3
     RETURNING current_amount";

/// Shift a campaign total by `delta` in one atomic statement. Only applies
/// when the campaign actually counts contributions from `source`; returns the
/// new total, or `None` when nothing changed.
pub async fn apply_campaign_delta(
    conn: &mut PgConnection,
    campaign_id: &str,
    source: ContributionSource,
    delta: Decimal,
) -> Result<Option<Decimal>, AppError> {
    if delta.is_zero() {
        return Ok(None);
    }

    sqlx::query_scalar::<_, Decimal>(APPLY_DELTA_SQL)
    .bind(delta)
    .bind(campaign_id)
    .bind(source == ContributionSource::PaidExtraordinaryFees)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|error| AppError::Dependency(format!("Campaign total update failed: {error}")))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{
        compute_collected, contribution_delta, reconcile_campaign, ContributionSource,
        APPLY_DELTA_SQL,
    };
    use crate::schemas::CampaignRecord;

    fn campaign(current: Decimal, mandatory: bool) -> CampaignRecord {
        CampaignRecord {
            id: "camp-1".to_string(),
            name: "Roof repair".to_string(),
            target_amount: dec!(5000),
            current_amount: current,
            is_mandatory: mandatory,
            is_active: true,
            deadline: None,
        }
    }

    #[test]
    fn reports_mismatch_with_computed_total() {
        let report = reconcile_campaign(&campaign(dec!(100), false), &[dec!(50), dec!(100)]);
        assert!(report.mismatch);
        assert_eq!(report.computed_amount, dec!(150));
        assert_eq!(report.stored_amount, dec!(100));
        assert_eq!(report.contributions, 2);
        assert!(!report.applied);
    }

    #[test]
    fn matching_totals_are_not_flagged() {
        let report = reconcile_campaign(&campaign(dec!(150.00), true), &[dec!(75.5), dec!(74.5)]);
        assert!(!report.mismatch);
        assert_eq!(report.source, ContributionSource::PaidExtraordinaryFees);
    }

    #[test]
    fn empty_contributions_sum_to_zero() {
        let report = reconcile_campaign(&campaign(dec!(0), false), &[]);
        assert_eq!(report.computed_amount, Decimal::ZERO);
        assert!(!report.mismatch);
    }

    #[test]
    fn null_mandatory_flag_is_voluntary_in_both_paths() {
        let row: CampaignRecord = serde_json::from_value(serde_json::json!({
            "id": "c-9",
            "name": "Gym",
            "target_amount": 100,
            "current_amount": 0,
            "is_mandatory": null
        }))
        .expect("campaign row");
        assert_eq!(
            ContributionSource::for_campaign(&row),
            ContributionSource::ConfirmedPayments
        );
        assert!(APPLY_DELTA_SQL.contains("COALESCE(is_mandatory, false) = $3"));
        assert!(!APPLY_DELTA_SQL.contains("AND is_mandatory ="));
    }

    #[test]
    fn many_small_amounts_do_not_drift() {
        let amounts = vec![dec!(0.1); 1000];
        assert_eq!(compute_collected(&amounts), dec!(100));
    }

    #[test]
    fn source_follows_mandatory_flag() {
        assert_eq!(
            ContributionSource::for_campaign(&campaign(dec!(0), true)),
            ContributionSource::PaidExtraordinaryFees
        );
        assert_eq!(
            ContributionSource::for_campaign(&campaign(dec!(0), false)),
            ContributionSource::ConfirmedPayments
        );
    }

    #[test]
    fn delta_only_moves_on_transitions() {
        assert_eq!(contribution_delta(false, true, dec!(40)), dec!(40));
        assert_eq!(contribution_delta(true, false, dec!(40)), dec!(-40));
        assert_eq!(contribution_delta(true, true, dec!(40)), Decimal::ZERO);
        assert_eq!(contribution_delta(false, false, dec!(40)), Decimal::ZERO);
    }
}
