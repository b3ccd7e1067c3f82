use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::{error::AppError, services::fee_status::EffectiveFeeStatus};

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

/// Decode database rows into typed records, dropping (and logging) rows that
/// do not match the expected shape. Returns the number of dropped rows.
pub fn parse_rows<T: DeserializeOwned>(rows: Vec<Value>) -> (Vec<T>, u32) {
    let mut parsed = Vec::with_capacity(rows.len());
    let mut malformed = 0;
    for row in rows {
        match serde_json::from_value::<T>(row) {
            Ok(item) => parsed.push(item),
            Err(error) => {
                malformed += 1;
                tracing::warn!(
                    record = std::any::type_name::<T>(),
                    error = %error,
                    "Skipping malformed row"
                );
            }
        }
    }
    (parsed, malformed)
}

fn default_limit_200() -> i64 {
    200
}
fn default_true() -> bool {
    true
}

// Supabase hands back uuids as strings but legacy tables use integer keys.
fn id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or numeric id, got {other}"
        ))),
    }
}

fn opt_id_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => Ok(Some(text)),
        Value::Number(number) => Ok(Some(number.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string or numeric id, got {other}"
        ))),
    }
}

fn nullable_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

fn decimal_or_zero<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    Ok(Option::<Decimal>::deserialize(deserializer)?.unwrap_or(Decimal::ZERO))
}

fn bool_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or_default())
}

fn bool_or_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeKind {
    #[default]
    Monthly,
    Extraordinary,
}

impl FeeKind {
    pub fn table(self) -> &'static str {
        match self {
            Self::Monthly => "maintenance_fees",
            Self::Extraordinary => "extraordinary_fees",
        }
    }
}

/// Row of `maintenance_fees` or `extraordinary_fees`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeeRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub unit_id: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub campaign_id: Option<String>,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub amount: Decimal,
    #[serde(default, deserialize_with = "nullable_string")]
    pub status: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub unit_id: Option<String>,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub amount: Decimal,
    #[serde(default, deserialize_with = "nullable_string")]
    pub status: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub payment_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CampaignRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub target_amount: Decimal,
    #[serde(default, deserialize_with = "decimal_or_zero")]
    pub current_amount: Decimal,
    #[serde(default, deserialize_with = "bool_or_default")]
    pub is_mandatory: bool,
    #[serde(default = "default_true", deserialize_with = "bool_or_true")]
    pub is_active: bool,
    #[serde(default)]
    pub deadline: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockRecord {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable_string")]
    pub name: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub parent_id: Option<String>,
}

impl BlockRecord {
    pub fn parent_ref(&self) -> Option<&str> {
        self.parent_id
            .as_deref()
            .map(str::trim)
            .filter(|parent_id| !parent_id.is_empty())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeeView {
    #[serde(flatten)]
    pub fee: FeeRecord,
    pub kind: FeeKind,
    pub effective_status: EffectiveFeeStatus,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockView {
    #[serde(flatten)]
    pub block: BlockRecord,
    pub full_path: String,
    pub path_truncated: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeesQuery {
    #[serde(default)]
    pub kind: FeeKind,
    pub unit_id: Option<String>,
    pub campaign_id: Option<String>,
    pub period: Option<String>,
    /// Filters on the effective status, not the stored one.
    pub status: Option<String>,
    #[serde(default = "default_limit_200")]
    pub limit: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeePath {
    pub kind: FeeKind,
    pub fee_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UnitPath {
    pub unit_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentPath {
    pub payment_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CampaignPath {
    pub campaign_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BlockIdPath {
    pub block_id: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct RejectPaymentInput {
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileCampaignsInput {
    pub campaign_id: Option<String>,
    #[serde(default = "default_true")]
    pub apply: bool,
}

impl Default for ReconcileCampaignsInput {
    fn default() -> Self {
        Self {
            campaign_id: None,
            apply: true,
        }
    }
}
