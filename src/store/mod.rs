//! Shared key-value state with network semantics.
//!
//! Components never hold a reference into another component's memory; all
//! shared state (circuit records, module statuses, risk profiles, the
//! collaborator feeds) goes through [`StateStore`]. Production deployments
//! plug in a networked backend; tests and the standalone binary use
//! [`memory::MemoryStore`].

use async_trait::async_trait;
use std::time::Duration;

use crate::error::StoreError;

pub mod client;
pub mod fault;
pub mod memory;
pub mod retry;

pub use client::StoreClient;
pub use memory::MemoryStore;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Write only if no live value exists. Returns whether this call wrote.
    async fn set_if_absent(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError>;

    /// Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Key layout shared with collaborators.
pub mod keys {
    use crate::models::circuit::Scope;

    pub const UPSTREAM_LATENCY: &str = "latency:upstream";
    pub const RISK_EXPOSURE: &str = "risk:exposure";
    pub const MARKET_VOLATILITY: &str = "volatility:market";
    pub const ACCOUNT_BALANCE: &str = "account:balance";
    pub const DAILY_LOSS: &str = "pnl:daily_loss";
    pub const DAILY_PNL: &str = "pnl:daily";
    pub const CHAOS_FLAG: &str = "global:chaos_flag";
    pub const CHAOS_LEVEL: &str = "global:chaos_level";
    pub const MARKET_REGIME: &str = "global:market_regime";
    pub const MORPHIC_MODE: &str = "global:morphic_mode";

    pub fn indicator_ts(symbol: &str, indicator: &str) -> String {
        format!("indicator:{symbol}:{indicator}:ts")
    }

    pub fn entropy(symbol: &str) -> String {
        format!("entropy:{symbol}")
    }

    pub fn symbol_volatility(symbol: &str) -> String {
        format!("volatility:{symbol}")
    }

    pub fn risk_profile(symbol: &str) -> String {
        format!("risk_profile:{symbol}")
    }

    pub fn circuit(scope: &Scope) -> String {
        format!("circuit:{scope}")
    }

    pub fn module_status(module: &str) -> String {
        format!("module_status:{module}")
    }
}
