//! Coordinated shutdown for a worker process: broadcasts a signal that cancels
//! the queue consumer's next-message wait, gives in-flight handlers a grace
//! period to finish (and ack/nack, committing delivery state before the
//! process exits), then returns so `main` can drop the broker connection.

use std::time::Duration;

use tokio::signal;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy)]
pub struct ShutdownConfig {
    /// How long in-flight handlers get to finish after the signal fires
    /// before the process gives up waiting and exits anyway.
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
        }
    }
}

/// Owns the broadcast channel every long-running task subscribes to. `listen`
/// fires the signal exactly once, from the signal-listening task in `main`;
/// everything else only ever subscribes.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl Shutdown {
    pub fn new(config: ShutdownConfig) -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx, config }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn grace_period(&self) -> Duration {
        self.config.grace_period
    }

    /// Waits for Ctrl+C or SIGTERM, then signals every subscriber.
    pub async fn listen(&self) {
        wait_for_signal().await;
        tracing::info!("shutdown signal received, notifying workers");
        let _ = self.tx.send(());
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

/// Runs `task` to completion, but no longer than `grace_period`. Used to
/// bound how long `main` waits for the queue consumer and HTTP server to wind
/// down before force-exiting.
pub async fn with_grace_period<F>(grace_period: Duration, task: F) -> bool
where
    F: std::future::Future<Output = ()>,
{
    tokio::time::timeout(grace_period, task).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grace_period() {
        assert_eq!(ShutdownConfig::default().grace_period, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_subscribers_receive_fired_signal() {
        let shutdown = Shutdown::new(ShutdownConfig::default());
        let mut rx1 = shutdown.subscribe();
        let mut rx2 = shutdown.subscribe();
        shutdown.tx.send(()).unwrap();
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_with_grace_period_times_out() {
        let completed = with_grace_period(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_with_grace_period_completes_in_time() {
        let completed = with_grace_period(Duration::from_secs(1), async {
            tokio::time::sleep(Duration::from_millis(1)).await;
        })
        .await;
        assert!(completed);
    }
}
