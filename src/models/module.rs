use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role of a downstream module, used by the registry's run/throttle rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    SignalProducer,
    Execution,
    Risk,
}

impl FromStr for ModuleKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "signal" | "signal_producer" | "producer" => Ok(ModuleKind::SignalProducer),
            "execution" => Ok(ModuleKind::Execution),
            "risk" => Ok(ModuleKind::Risk),
            other => Err(format!("unknown module kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleStatus {
    Run,
    Throttle,
    Suspend,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModuleStatus::Run => "RUN",
            ModuleStatus::Throttle => "THROTTLE",
            ModuleStatus::Suspend => "SUSPEND",
        };
        f.write_str(s)
    }
}

/// One `control.module_status` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStatusRecord {
    pub module: String,
    pub status: ModuleStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
}

impl FromStr for MarketRegime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bull" => Ok(MarketRegime::Bull),
            "bear" => Ok(MarketRegime::Bear),
            "sideways" | "range" => Ok(MarketRegime::Sideways),
            other => Err(format!("unknown market regime '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds_and_regimes() {
        assert_eq!("signal".parse::<ModuleKind>().unwrap(), ModuleKind::SignalProducer);
        assert_eq!("Execution".parse::<ModuleKind>().unwrap(), ModuleKind::Execution);
        assert!("dashboard".parse::<ModuleKind>().is_err());
        assert_eq!("BEAR".parse::<MarketRegime>().unwrap(), MarketRegime::Bear);
    }

    #[test]
    fn test_status_record_wire_shape() {
        let rec = ModuleStatusRecord {
            module: "momentum".into(),
            status: ModuleStatus::Throttle,
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v, serde_json::json!({"module": "momentum", "status": "THROTTLE"}));
    }
}
