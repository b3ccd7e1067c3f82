use std::time::Duration;

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use tokio::time::sleep;

use crate::services::campaign_totals::run_campaign_reconciliation;
use crate::state::AppState;

const TICK: Duration = Duration::from_secs(60);

/// Background loop for the nightly campaign reconciliation.
///
/// The job runs in its own `tokio::spawn` so a failing run never takes the
/// loop down with it.
pub async fn run_background_scheduler(state: AppState) {
    if !state.config.campaign_reconcile_enabled {
        tracing::info!("Scheduler: campaign reconciliation disabled");
        return;
    }

    let pool = match state.db_pool.as_ref() {
        Some(p) => p.clone(),
        None => {
            tracing::warn!("Scheduler: no database pool configured, exiting");
            return;
        }
    };

    let run_hour = state.config.campaign_reconcile_hour_utc;
    tracing::info!(run_hour_utc = run_hour, "Background scheduler started");

    let mut last_daily_run: Option<NaiveDate> = None;
    loop {
        sleep(TICK).await;

        let now = Utc::now();
        if !daily_run_due(now, run_hour, last_daily_run) {
            continue;
        }
        last_daily_run = Some(now.date_naive());

        let pool = pool.clone();
        tokio::spawn(async move {
            let run = run_campaign_reconciliation(&pool, None, true).await;
            tracing::info!(
                checked = run.checked,
                mismatched = run.mismatched,
                repaired = run.repaired,
                errors = run.errors,
                "Scheduler: campaign reconciliation completed"
            );
        });
    }
}

/// Once per UTC calendar day, at or after `run_hour`.
fn daily_run_due(now: DateTime<Utc>, run_hour: u32, last_run: Option<NaiveDate>) -> bool {
    last_run != Some(now.date_naive()) && now.hour() >= run_hour
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::daily_run_due;

    #[test]
    fn waits_for_the_configured_hour() {
        let early = Utc.with_ymd_and_hms(2024, 3, 1, 4, 59, 0).unwrap();
        let on_time = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();
        assert!(!daily_run_due(early, 5, None));
        assert!(daily_run_due(on_time, 5, None));
    }

    #[test]
    fn runs_once_per_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap();
        assert!(!daily_run_due(now, 5, Some(now.date_naive())));
        let next_day = Utc.with_ymd_and_hms(2024, 3, 2, 5, 30, 0).unwrap();
        assert!(daily_run_due(next_day, 5, Some(now.date_naive())));
    }
}
