use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk inputs for one evaluation, as read from the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskSnapshot {
    /// Daily risk already used, as a fraction of capital.
    pub risk_exposure: Option<f64>,
    pub market_volatility: Option<f64>,
    pub asset_volatility: Option<f64>,
    pub account_balance: Option<Decimal>,
    pub daily_pnl: Option<Decimal>,
}

/// Output of one risk evaluation. Ephemeral; cached in the store with a short TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub symbol: String,
    pub daily_pnl: Option<Decimal>,
    pub risk_exposure: Option<f64>,
    pub market_volatility: Option<f64>,
    pub asset_volatility: Option<f64>,
    pub account_balance: Decimal,
    pub max_leverage: f64,
    pub leverage: f64,
    pub risk_exceeded: bool,
    pub computed_at: DateTime<Utc>,
}
