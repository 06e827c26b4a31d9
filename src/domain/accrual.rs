use rust_decimal::Decimal;
use serde::Deserialize;

/// Order status as reported by the accrual authority
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum ExternalStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
    /// Anything the authority sends that we do not know about
    Unknown(String),
}

impl From<String> for ExternalStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "REGISTERED" => ExternalStatus::Registered,
            "PROCESSING" => ExternalStatus::Processing,
            "PROCESSED" => ExternalStatus::Processed,
            "INVALID" => ExternalStatus::Invalid,
            _ => ExternalStatus::Unknown(raw),
        }
    }
}

/// Body of a 200 response from `GET /api/orders/{number}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ExternalResolution {
    pub order: String,
    pub status: ExternalStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

impl ExternalResolution {
    /// Credit amount; only meaningful for PROCESSED
    pub fn credit(&self) -> Decimal {
        self.accrual.unwrap_or(Decimal::ZERO)
    }
}
