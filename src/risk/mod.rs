pub mod risk_manager;

pub use risk_manager::{risk_adjusted_leverage, RiskManager};
