use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Run `job` every `period` until shutdown. The first tick fires at once.
/// A job that overruns skips the ticks it missed rather than bursting.
pub fn spawn_every<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => job().await,
                _ = shutdown_rx.recv() => break,
            }
        }
        debug!("Scheduler '{name}' stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let (tx, _) = broadcast::channel::<()>(1);
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = spawn_every("test", Duration::from_millis(5), tx.subscribe(), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();

        let ran = count.load(Ordering::SeqCst);
        assert!(ran >= 2, "ran {ran} times");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(count.load(Ordering::SeqCst), ran);
    }
}
