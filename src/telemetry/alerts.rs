use crate::config::TelemetryConfig;
use crate::models::circuit::CircuitState;
use anyhow::Result;
use tracing::{error, info};

/// Pushes operator alerts to an optional JSON webhook.
pub struct AlertManager {
    config: TelemetryConfig,
    http: reqwest::Client,
}

impl AlertManager {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// Log the alert and forward it to the webhook, if one is configured.
    pub async fn send(&self, message: &str) {
        info!("ALERT: {message}");

        if let Err(e) = self.send_webhook(message).await {
            error!("Webhook alert failed: {e}");
        }
    }

    async fn send_webhook(&self, message: &str) -> Result<()> {
        let Some(url) = &self.config.alert_webhook_url else {
            return Ok(()); // Not configured
        };

        let body = serde_json::json!({
            "source": "gatekeeper",
            "content": message,
        });

        self.http
            .post(url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn on_trip(&self, state: &CircuitState) {
        if !self.config.alert_on_trip {
            return;
        }
        let reason = state
            .reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "UNKNOWN".into());
        let until = state
            .cooldown_expiry
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "?".into());
        self.send(&format!(
            "Circuit TRIPPED scope={} reason={reason} until={until}",
            state.scope
        ))
        .await;
    }

    pub async fn on_suspend_all(&self, cause: &str) {
        if self.config.alert_on_suspend {
            self.send(&format!("All modules SUSPENDED: {cause}")).await;
        }
    }
}
