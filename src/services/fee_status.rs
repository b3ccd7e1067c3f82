use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};

use crate::{
    config::AppConfig,
    schemas::{FeeKind, FeeRecord},
};

/// Status as stored in the fee tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredFeeStatus {
    Pending,
    Paid,
    Overdue,
    Other(String),
}

impl StoredFeeStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Self::Pending,
            "paid" => Self::Paid,
            "overdue" => Self::Overdue,
            _ => Self::Other(raw.to_string()),
        }
    }
}

/// Display-facing status of a fee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectiveFeeStatus {
    Paid,
    Pending,
    Processing,
    Overdue,
    /// Unrecognized stored status, passed through verbatim.
    Other(String),
}

impl EffectiveFeeStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Paid => "paid",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Overdue => "overdue",
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl Serialize for EffectiveFeeStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Community-level rules used to place a due date on the calendar.
#[derive(Debug, Clone, Copy)]
pub struct DueDateRules {
    pub timezone: Tz,
    /// Days after the first of the following month before a monthly fee is late.
    pub grace_days: i64,
}

impl DueDateRules {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timezone: config.community_timezone,
            grace_days: config.monthly_fee_grace_days,
        }
    }
}

impl Default for DueDateRules {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::UTC,
            grace_days: 0,
        }
    }
}

/// Derive the effective status of a fee.
///
/// Priority, first match wins:
/// 1. stored `paid` is always `paid`
/// 2. stored `pending` with a linked payment is `processing`
/// 3. stored `overdue` stays `overdue`
/// 4. stored `pending` without payment is `overdue` once `now` passes the due
///    date, `pending` otherwise (no due date means never auto-overdue)
/// 5. anything else is returned unchanged
pub fn resolve_effective_status(
    fee: &FeeRecord,
    kind: FeeKind,
    campaign_deadline: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    rules: &DueDateRules,
) -> EffectiveFeeStatus {
    let has_payment = fee
        .payment_id
        .as_deref()
        .is_some_and(|payment_id| !payment_id.trim().is_empty());

    match StoredFeeStatus::parse(&fee.status) {
        StoredFeeStatus::Paid => EffectiveFeeStatus::Paid,
        StoredFeeStatus::Pending if has_payment => EffectiveFeeStatus::Processing,
        StoredFeeStatus::Overdue => EffectiveFeeStatus::Overdue,
        StoredFeeStatus::Pending => match due_date_for(fee, kind, campaign_deadline, rules) {
            Some(due) if now > due => EffectiveFeeStatus::Overdue,
            _ => EffectiveFeeStatus::Pending,
        },
        StoredFeeStatus::Other(raw) => EffectiveFeeStatus::Other(raw),
    }
}

pub fn due_date_for(
    fee: &FeeRecord,
    kind: FeeKind,
    campaign_deadline: Option<DateTime<Utc>>,
    rules: &DueDateRules,
) -> Option<DateTime<Utc>> {
    match kind {
        FeeKind::Extraordinary => campaign_deadline,
        FeeKind::Monthly => fee
            .period
            .as_deref()
            .and_then(|period| monthly_due_date(period, rules)),
    }
}

/// First instant of the month after `period`, in the community timezone,
/// pushed back by the configured grace days.
pub fn monthly_due_date(period: &str, rules: &DueDateRules) -> Option<DateTime<Utc>> {
    let month_start = parse_period_month(period)?;
    let (year, month) = if month_start.month() == 12 {
        (month_start.year() + 1, 1)
    } else {
        (month_start.year(), month_start.month() + 1)
    };
    let next_month = NaiveDate::from_ymd_opt(year, month, 1)?;
    let cutoff = local_midnight(next_month, rules.timezone)?;
    Some(cutoff + Duration::days(rules.grace_days))
}

/// Accepts `YYYY-MM` or anything starting with `YYYY-MM-DD`.
pub fn parse_period_month(period: &str) -> Option<NaiveDate> {
    let trimmed = period.trim();
    let date = match trimmed.get(..10) {
        Some(prefix) => NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()?,
        None => NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d").ok()?,
    };
    date.with_day(1)
}

/// Parse a campaign deadline. Timestamps are taken as-is; a bare date stays
/// payable through the end of that local day.
pub fn parse_deadline(raw: &str, timezone: Tz) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    // `timestamp without time zone` columns carry wall-clock time in the community zone
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return local_to_utc(naive, timezone);
        }
    }
    let date = NaiveDate::parse_from_str(trimmed.get(..10)?, "%Y-%m-%d").ok()?;
    local_midnight(date.succ_opt()?, timezone)
}

fn local_midnight(date: NaiveDate, timezone: Tz) -> Option<DateTime<Utc>> {
    local_to_utc(date.and_hms_opt(0, 0, 0)?, timezone)
}

fn local_to_utc(naive: NaiveDateTime, timezone: Tz) -> Option<DateTime<Utc>> {
    let local = timezone.from_local_datetime(&naive);
    local
        .earliest()
        .or_else(|| local.latest())
        .map(|value| value.with_timezone(&Utc))
}

/// Per-status counts and money still owed for a set of fees.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeeSummary {
    pub total_fees: usize,
    pub paid: usize,
    pub pending: usize,
    pub processing: usize,
    pub overdue: usize,
    pub other: usize,
    pub outstanding_amount: Decimal,
    pub overdue_amount: Decimal,
}

pub fn summarize_fees<'a, I>(items: I) -> FeeSummary
where
    I: IntoIterator<Item = (&'a FeeRecord, &'a EffectiveFeeStatus)>,
{
    let mut summary = FeeSummary::default();
    for (fee, status) in items {
        summary.total_fees += 1;
        match status {
            EffectiveFeeStatus::Paid => summary.paid += 1,
            EffectiveFeeStatus::Pending => summary.pending += 1,
            EffectiveFeeStatus::Processing => summary.processing += 1,
            EffectiveFeeStatus::Overdue => {
                summary.overdue += 1;
                summary.overdue_amount += fee.amount;
            }
            EffectiveFeeStatus::Other(_) => summary.other += 1,
        }
        if *status != EffectiveFeeStatus::Paid {
            summary.outstanding_amount += fee.amount;
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};
    use rust_decimal_macros::dec;

    use super::{
        monthly_due_date, parse_deadline, parse_period_month, resolve_effective_status,
        summarize_fees, DueDateRules, EffectiveFeeStatus,
    };
    use crate::schemas::{FeeKind, FeeRecord};

    fn fee(status: &str, period: Option<&str>, payment_id: Option<&str>) -> FeeRecord {
        FeeRecord {
            id: "fee-1".to_string(),
            unit_id: Some("unit-1".to_string()),
            period: period.map(ToOwned::to_owned),
            campaign_id: None,
            amount: dec!(120.50),
            status: status.to_string(),
            payment_id: payment_id.map(ToOwned::to_owned),
        }
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn paid_wins_over_everything() {
        let rules = DueDateRules::default();
        let record = fee("paid", Some("2020-01"), Some("pay-1"));
        let status =
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2030, 1, 1), &rules);
        assert_eq!(status, EffectiveFeeStatus::Paid);
    }

    #[test]
    fn pending_with_payment_is_processing() {
        let rules = DueDateRules::default();
        let record = fee("pending", Some("2020-01"), Some("pay-1"));
        let status =
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2030, 1, 1), &rules);
        assert_eq!(status, EffectiveFeeStatus::Processing);
    }

    #[test]
    fn blank_payment_id_is_not_a_payment() {
        let rules = DueDateRules::default();
        let record = fee("pending", Some("2024-01"), Some("  "));
        let status =
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 1, 15), &rules);
        assert_eq!(status, EffectiveFeeStatus::Pending);
    }

    #[test]
    fn monthly_fee_goes_overdue_after_next_month_starts() {
        let rules = DueDateRules::default();
        let record = fee("pending", Some("2024-01"), None);
        assert_eq!(
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 2, 15), &rules),
            EffectiveFeeStatus::Overdue
        );
        assert_eq!(
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 1, 15), &rules),
            EffectiveFeeStatus::Pending
        );
    }

    #[test]
    fn stored_overdue_is_kept() {
        let rules = DueDateRules::default();
        let record = fee("overdue", Some("not-a-period"), None);
        let status =
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 1, 1), &rules);
        assert_eq!(status, EffectiveFeeStatus::Overdue);
    }

    #[test]
    fn unparseable_period_never_auto_overdue() {
        let rules = DueDateRules::default();
        let record = fee("pending", Some("enero"), None);
        let status =
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2099, 1, 1), &rules);
        assert_eq!(status, EffectiveFeeStatus::Pending);
    }

    #[test]
    fn extraordinary_fee_uses_campaign_deadline() {
        let rules = DueDateRules::default();
        let record = fee("pending", None, None);
        let deadline = Some(at(2024, 3, 31));
        assert_eq!(
            resolve_effective_status(
                &record,
                FeeKind::Extraordinary,
                deadline,
                at(2024, 4, 1),
                &rules
            ),
            EffectiveFeeStatus::Overdue
        );
        assert_eq!(
            resolve_effective_status(
                &record,
                FeeKind::Extraordinary,
                deadline,
                at(2024, 3, 30),
                &rules
            ),
            EffectiveFeeStatus::Pending
        );
        assert_eq!(
            resolve_effective_status(&record, FeeKind::Extraordinary, None, at(2099, 1, 1), &rules),
            EffectiveFeeStatus::Pending
        );
    }

    #[test]
    fn unknown_stored_status_passes_through() {
        let rules = DueDateRules::default();
        let record = fee("waived", Some("2024-01"), None);
        let status =
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 6, 1), &rules);
        assert_eq!(status, EffectiveFeeStatus::Other("waived".to_string()));
        assert_eq!(status.as_str(), "waived");
    }

    #[test]
    fn due_date_rolls_over_december_and_respects_timezone() {
        let rules = DueDateRules {
            timezone: chrono_tz::America::Bogota,
            grace_days: 0,
        };
        assert_eq!(
            monthly_due_date("2024-12", &rules),
            Some(Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap())
        );
    }

    #[test]
    fn grace_days_push_the_cutoff() {
        let rules = DueDateRules {
            timezone: chrono_tz::UTC,
            grace_days: 10,
        };
        let record = fee("pending", Some("2024-01-01"), None);
        assert_eq!(
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 2, 5), &rules),
            EffectiveFeeStatus::Pending
        );
        assert_eq!(
            resolve_effective_status(&record, FeeKind::Monthly, None, at(2024, 2, 12), &rules),
            EffectiveFeeStatus::Overdue
        );
    }

    #[test]
    fn parses_period_shapes() {
        assert_eq!(
            parse_period_month("2024-07"),
            chrono::NaiveDate::from_ymd_opt(2024, 7, 1)
        );
        assert_eq!(
            parse_period_month("2024-07-15T00:00:00Z"),
            chrono::NaiveDate::from_ymd_opt(2024, 7, 1)
        );
        assert_eq!(parse_period_month("2024-13"), None);
        assert_eq!(parse_period_month(""), None);
    }

    #[test]
    fn date_only_deadline_covers_the_whole_day() {
        let deadline = parse_deadline("2024-03-31", chrono_tz::UTC);
        assert_eq!(deadline, Some(Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()));
        assert_eq!(
            parse_deadline("2024-03-31T18:00:00+00:00", chrono_tz::UTC),
            Some(Utc.with_ymd_and_hms(2024, 3, 31, 18, 0, 0).unwrap())
        );
        assert_eq!(parse_deadline("soon", chrono_tz::UTC), None);
    }

    #[test]
    fn zoneless_timestamp_deadline_keeps_its_time_of_day() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 31, 18, 0, 0).unwrap();
        assert_eq!(parse_deadline("2024-03-31T18:00:00", chrono_tz::UTC), Some(expected));
        assert_eq!(
            parse_deadline("2024-03-31 18:00:00.250", chrono_tz::UTC).map(|d| d.timestamp()),
            Some(expected.timestamp())
        );
        assert_eq!(
            parse_deadline("2024-03-31T13:00:00", chrono_tz::America::Bogota),
            Some(expected)
        );

        let deadline = parse_deadline("2024-03-31T18:00:00", chrono_tz::UTC);
        let evening = Utc.with_ymd_and_hms(2024, 3, 31, 20, 0, 0).unwrap();
        assert_eq!(
            resolve_effective_status(
                &fee("pending", None, None),
                FeeKind::Extraordinary,
                deadline,
                evening,
                &DueDateRules::default()
            ),
            EffectiveFeeStatus::Overdue
        );
    }

    #[test]
    fn summary_counts_outstanding_money() {
        let paid = fee("paid", Some("2024-01"), None);
        let late = fee("overdue", Some("2024-02"), None);
        let open = fee("pending", Some("2024-03"), Some("pay-9"));
        let statuses = [
            EffectiveFeeStatus::Paid,
            EffectiveFeeStatus::Overdue,
            EffectiveFeeStatus::Processing,
        ];
        let summary = summarize_fees([&paid, &late, &open].into_iter().zip(statuses.iter()));
        assert_eq!(summary.total_fees, 3);
        assert_eq!(summary.paid, 1);
        assert_eq!(summary.overdue, 1);
        assert_eq!(summary.processing, 1);
        assert_eq!(summary.outstanding_amount, dec!(241.00));
        assert_eq!(summary.overdue_amount, dec!(120.50));
    }
}
