//! In-process publish/subscribe fabric.
//!
//! Two `broadcast` channels: one for `control.*` topics and one for
//! everything else, so signal traffic can never evict a circuit or module
//! status event. Subscribers filter by topic pattern on receive. Patterns are
//! an exact topic or a prefix ending in `*` (`signal.raw.*`) and read from the
//! channel their topic prefix belongs to.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

pub mod topics {
    pub const SIGNAL_RAW_ALL: &str = "signal.raw.*";
    pub const SIGNAL_APPROVED: &str = "signal.approved";
    pub const CONTROL_CIRCUIT: &str = "control.circuit";
    pub const CONTROL_MODULE_STATUS: &str = "control.module_status";

    pub(super) const CONTROL_PREFIX: &str = "control.";

    pub fn signal_raw(symbol: &str) -> String {
        format!("signal.raw.{symbol}")
    }
}

#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Arc<Value>,
}

#[derive(Clone)]
pub struct SignalBus {
    signals: broadcast::Sender<BusMessage>,
    control: broadcast::Sender<BusMessage>,
}

impl SignalBus {
    /// `capacity` bounds each channel separately.
    pub fn new(capacity: usize) -> Self {
        let (signals, _) = broadcast::channel(capacity.max(1));
        let (control, _) = broadcast::channel(capacity.max(1));
        Self { signals, control }
    }

    fn channel_for(&self, topic: &str) -> &broadcast::Sender<BusMessage> {
        if topic.starts_with(topics::CONTROL_PREFIX) {
            &self.control
        } else {
            &self.signals
        }
    }

    /// Publish to a topic. Returns how many subscribers were live.
    pub fn publish(&self, topic: impl Into<String>, payload: Value) -> usize {
        self.publish_shared(topic, Arc::new(payload))
    }

    pub fn publish_shared(&self, topic: impl Into<String>, payload: Arc<Value>) -> usize {
        let msg = BusMessage {
            topic: topic.into(),
            payload,
        };
        // No subscribers is not an error.
        self.channel_for(&msg.topic).send(msg).unwrap_or(0)
    }

    pub fn subscribe(&self, pattern: &str) -> Subscription {
        Subscription {
            pattern: pattern.to_string(),
            rx: self.channel_for(pattern).subscribe(),
        }
    }
}

pub struct Subscription {
    pattern: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    /// Next matching message; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if topic_matches(&self.pattern, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Subscriber '{}' lagged by {n} messages", self.pattern);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if topic_matches(&self.pattern, &msg.topic) => return Some(msg),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Subscriber '{}' lagged by {n} messages", self.pattern);
                }
                Err(_) => return None,
            }
        }
    }
}

pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("signal.raw.*", "signal.raw.BTCUSDT"));
        assert!(topic_matches("signal.approved", "signal.approved"));
        assert!(!topic_matches("signal.raw.*", "signal.approved"));
        assert!(!topic_matches("control.circuit", "control.circuit.extra"));
        assert!(topic_matches("*", "anything"));
    }

    #[tokio::test]
    async fn test_subscriber_only_sees_matching_topics() {
        let bus = SignalBus::new(16);
        let mut raw = bus.subscribe(topics::SIGNAL_RAW_ALL);
        let mut approved = bus.subscribe(topics::SIGNAL_APPROVED);

        bus.publish(topics::CONTROL_CIRCUIT, json!({"event": "reset"}));
        bus.publish(topics::signal_raw("ETHUSDT"), json!({"symbol": "ETHUSDT"}));

        let msg = raw.recv().await.unwrap();
        assert_eq!(msg.topic, "signal.raw.ETHUSDT");
        assert_eq!(msg.payload["symbol"], "ETHUSDT");
        assert!(approved.try_recv().is_none());
    }

    #[test]
    fn test_signal_flood_does_not_evict_control_events() {
        let bus = SignalBus::new(8);
        let mut control = bus.subscribe(topics::CONTROL_CIRCUIT);
        let mut raw = bus.subscribe(topics::SIGNAL_RAW_ALL);

        bus.publish(topics::CONTROL_CIRCUIT, json!({"event": "tripped"}));
        for i in 0..20 {
            bus.publish(topics::signal_raw("BTCUSDT"), json!({"n": i}));
        }

        let msg = control.try_recv().expect("trip survives the flood");
        assert_eq!(msg.payload["event"], "tripped");
        // The raw subscriber lagged and only sees the tail.
        assert_eq!(raw.try_recv().unwrap().payload["n"], 12);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = SignalBus::new(4);
        assert_eq!(bus.publish(topics::SIGNAL_APPROVED, json!({})), 0);
    }
}
