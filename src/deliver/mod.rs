//! Notification delivery.
//!
//! A single [`DeliveryWorker`] drains the [`NotificationQueue`] and hands each
//! entry to the configured [`Transport`].  Failed sends go back to the end of
//! the queue and are retried forever; a growing queue is the visible sign of a
//! transport outage.
//!
//! ## Adding a transport
//!
//! Implement [`Transport`] in a new sub-module, add a variant to
//! [`TransportConfig`], and construct it in [`build_transport`].

mod mail;
mod telegram;

pub use mail::MailTransport;
pub use telegram::TelegramTransport;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{DeliveryConfig, TransportConfig};
use crate::error::Result;
use crate::notification::Notification;
use crate::queue::NotificationQueue;
use crate::shutdown::sleep_or_cancel;

/// Something that can deliver a notification to the user.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Render `notification` into the transport's wire form and send it.
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Build the transport named by the configuration.
pub fn build_transport(
    config: &TransportConfig,
    client: reqwest::Client,
) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match config {
        TransportConfig::Mail(mail) => Box::new(MailTransport::new(mail)?),
        TransportConfig::Telegram(tg) => Box::new(TelegramTransport::new(tg, client)),
    };
    Ok(transport)
}

/// Counters reported when the worker stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    pub sent: u64,
    pub failed: u64,
}

pub struct DeliveryWorker {
    queue: Arc<NotificationQueue>,
    transport: Box<dyn Transport>,
    send_delay: Duration,
    failure_cooldown: Duration,
}

impl DeliveryWorker {
    pub fn new(
        queue: Arc<NotificationQueue>,
        transport: Box<dyn Transport>,
        config: &DeliveryConfig,
    ) -> Self {
        Self {
            queue,
            transport,
            send_delay: config.send_delay(),
            failure_cooldown: config.failure_cooldown(),
        }
    }

    /// Deliver until `shutdown` fires.
    ///
    /// A send in progress is always finished, and a failed one requeued,
    /// before the worker returns.
    pub async fn run(self, shutdown: CancellationToken) -> DeliveryStats {
        let mut stats = DeliveryStats::default();
        info!(transport = self.transport.name(), "delivery worker started");

        loop {
            let notification = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                n = self.queue.dequeue() => n,
            };

            let pause = match self.transport.send(&notification).await {
                Ok(()) => {
                    stats.sent += 1;
                    debug!(
                        title = %notification.item.title,
                        feed = %notification.feed_url,
                        "delivered"
                    );
                    self.send_delay
                }
                Err(e) => {
                    stats.failed += 1;
                    self.queue.requeue(notification);
                    warn!(error = %e, backlog = self.queue.len(), "delivery failed, requeued");
                    self.failure_cooldown
                }
            };

            if !sleep_or_cancel(pause, &shutdown).await {
                break;
            }
        }

        info!(
            sent = stats.sent,
            failed = stats.failed,
            backlog = self.queue.len(),
            "delivery worker stopped"
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::error::Error;
    use crate::notification::tests::make_notification;

    /// Records successful sends; fails while it has scripted failures left.
    struct FlakyTransport {
        failures: Mutex<VecDeque<&'static str>>,
        probe: Probe,
    }

    #[derive(Clone, Default)]
    struct Probe {
        sent: Arc<Mutex<Vec<String>>>,
        attempts: Arc<AtomicUsize>,
    }

    impl FlakyTransport {
        fn new(failures: &[&'static str]) -> (Box<dyn Transport>, Probe) {
            let probe = Probe::default();
            let transport = Self {
                failures: Mutex::new(failures.iter().copied().collect()),
                probe: probe.clone(),
            };
            (Box::new(transport), probe)
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn send(&self, notification: &Notification) -> Result<()> {
            self.probe.attempts.fetch_add(1, Ordering::SeqCst);
            let mut failures = self.failures.lock();
            if failures.front().copied() == Some(notification.item.id.as_str()) {
                failures.pop_front();
                return Err(Error::delivery("server unavailable"));
            }
            self.probe.sent.lock().push(notification.item.id.clone());
            Ok(())
        }
    }

    fn config() -> DeliveryConfig {
        DeliveryConfig {
            send_delay_ms: 1,
            failure_cooldown_ms: 1,
        }
    }

    async fn wait_until_sent(probe: &Probe, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while probe.sent.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delivers_in_queue_order() {
        let queue = Arc::new(NotificationQueue::new(10));
        for id in ["1", "2", "3"] {
            queue.enqueue(make_notification(id)).await.unwrap();
        }
        let (transport, probe) = FlakyTransport::new(&[]);
        let token = CancellationToken::new();
        let worker = DeliveryWorker::new(queue.clone(), transport, &config());
        let worker = tokio::spawn(worker.run(token.clone()));

        wait_until_sent(&probe, 3).await;
        token.cancel();
        let stats = worker.await.unwrap();

        assert_eq!(*probe.sent.lock(), vec!["1", "2", "3"]);
        assert_eq!(stats, DeliveryStats { sent: 3, failed: 0 });
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn failed_send_is_retried_and_delivered_once() {
        let queue = Arc::new(NotificationQueue::new(10));
        queue.enqueue(make_notification("a")).await.unwrap();
        queue.enqueue(make_notification("b")).await.unwrap();
        let (transport, probe) = FlakyTransport::new(&["a"]);
        let token = CancellationToken::new();
        let worker = DeliveryWorker::new(queue.clone(), transport, &config());
        let worker = tokio::spawn(worker.run(token.clone()));

        wait_until_sent(&probe, 2).await;
        token.cancel();
        let stats = worker.await.unwrap();

        // "a" moved behind "b" after failing once, then went through.
        assert_eq!(*probe.sent.lock(), vec!["b", "a"]);
        assert_eq!(stats, DeliveryStats { sent: 2, failed: 1 });
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn shutdown_keeps_undelivered_entries_queued() {
        let queue = Arc::new(NotificationQueue::new(10));
        queue.enqueue(make_notification("x")).await.unwrap();
        let (transport, probe) = FlakyTransport::new(&["x"]);
        let token = CancellationToken::new();
        token.cancel();

        let stats = DeliveryWorker::new(queue.clone(), transport, &config())
            .run(token)
            .await;

        assert_eq!(stats, DeliveryStats::default());
        assert!(probe.sent.lock().is_empty());
        assert_eq!(probe.attempts.load(Ordering::SeqCst), 0);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn failure_during_shutdown_is_requeued() {
        let queue = Arc::new(NotificationQueue::new(10));
        queue.enqueue(make_notification("x")).await.unwrap();
        let (transport, probe) = FlakyTransport::new(&["x"]);
        let token = CancellationToken::new();
        let worker = DeliveryWorker {
            queue: queue.clone(),
            transport,
            send_delay: Duration::from_millis(1),
            failure_cooldown: Duration::from_secs(3600),
        };
        let task = tokio::spawn(worker.run(token.clone()));

        // Wait for the failed attempt to land back in the queue.
        tokio::time::timeout(Duration::from_secs(5), async {
            while probe.attempts.load(Ordering::SeqCst) == 0 || queue.len() != 1 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        token.cancel();
        let stats = task.await.unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(queue.drain()[0].item.id, "x");
    }
}
