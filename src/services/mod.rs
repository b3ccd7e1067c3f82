pub mod block_paths;
pub mod campaign_totals;
pub mod fee_status;
pub mod payment_review;
pub mod scheduler;
