//! Bounded worker pool for post-commit side effects.

use std::sync::Arc;
use std::time::Duration;

use domain::Reservation;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::error::DispatchError;
use crate::services::{IssueError, Notifier, VoucherIssuer};

/// Sizing for [`SideEffectDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    /// How long `dispatch` waits for room in a full queue.
    pub enqueue_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            enqueue_timeout: Duration::from_millis(500),
        }
    }
}

struct Inner {
    sender: Mutex<Option<mpsc::Sender<Reservation>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    enqueue_timeout: Duration,
}

/// Runs voucher issuance and notification off the request path.
///
/// Jobs are confirmed reservations. Each job issues the voucher and, when
/// that succeeds, notifies the customer; failures are logged and counted
/// and never reach the webhook response.
#[derive(Clone)]
pub struct SideEffectDispatcher {
    inner: Arc<Inner>,
}

impl SideEffectDispatcher {
    /// Starts the worker pool. Must be called inside a Tokio runtime.
    pub fn start(
        config: DispatcherConfig,
        issuer: Arc<dyn VoucherIssuer>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                tokio::spawn(worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&issuer),
                    Arc::clone(&notifier),
                ))
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(sender)),
                workers: Mutex::new(workers),
                enqueue_timeout: config.enqueue_timeout,
            }),
        }
    }

    /// Queues side effects for a confirmed reservation.
    pub async fn dispatch(&self, reservation: Reservation) -> Result<(), DispatchError> {
        let sender = self
            .inner
            .sender
            .lock()
            .await
            .clone()
            .ok_or(DispatchError::ShutDown)?;

        let timeout = self.inner.enqueue_timeout;
        let result = sender
            .send_timeout(reservation, timeout)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => DispatchError::QueueFull(timeout),
                mpsc::error::SendTimeoutError::Closed(_) => DispatchError::ShutDown,
            });

        match &result {
            Ok(()) => metrics::counter!("side_effects_total", "result" => "queued").increment(1),
            Err(DispatchError::QueueFull(_)) => {
                metrics::counter!("side_effects_total", "result" => "queue_full").increment(1)
            }
            Err(DispatchError::ShutDown) => {
                metrics::counter!("side_effects_total", "result" => "shut_down").increment(1)
            }
        }
        result
    }

    /// Stops intake, then waits until every queued job has run.
    pub async fn shutdown(&self) {
        self.inner.sender.lock().await.take();

        let workers: Vec<_> = self.inner.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "side-effect worker panicked");
            }
        }
        tracing::info!("side-effect dispatcher drained");
    }
}

async fn worker_loop(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Reservation>>>,
    issuer: Arc<dyn VoucherIssuer>,
    notifier: Arc<dyn Notifier>,
) {
    loop {
        let job = receiver.lock().await.recv().await;
        let Some(reservation) = job else {
            break;
        };
        run_job(issuer.as_ref(), notifier.as_ref(), reservation).await;
    }
    tracing::debug!(worker, "side-effect worker stopped");
}

#[tracing::instrument(skip_all, fields(reservation_id = %reservation.id))]
async fn run_job(issuer: &dyn VoucherIssuer, notifier: &dyn Notifier, reservation: Reservation) {
    let voucher = match issuer.issue(&reservation).await {
        Ok(voucher) => voucher,
        Err(IssueError::AlreadyIssued(_)) => {
            tracing::info!("voucher already issued, skipping notification");
            metrics::counter!("side_effects_total", "result" => "already_issued").increment(1);
            return;
        }
        Err(e) => {
            tracing::error!(error = %e, "voucher issuance failed");
            metrics::counter!("side_effects_total", "result" => "issue_failed").increment(1);
            return;
        }
    };

    match notifier.notify(&reservation, &voucher).await {
        Ok(()) => {
            metrics::counter!("side_effects_total", "result" => "completed").increment(1);
        }
        Err(e) => {
            tracing::warn!(error = %e, code = %voucher.code, "customer notification failed");
            metrics::counter!("side_effects_total", "result" => "notify_failed").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use domain::{Money, NewReservation};
    use store::{InMemoryVoucherStore, VoucherStore};

    use super::*;
    use crate::services::{InMemoryNotifier, StoreVoucherIssuer};

    fn confirmed(reference: &str) -> Reservation {
        let mut reservation = Reservation::new(
            NewReservation {
                external_reference: reference.to_string(),
                customer_name: "Ana".to_string(),
                customer_email: "ana@example.com".to_string(),
                party_size: 2,
                amount: Money::from_cents(8000),
            },
            Utc::now(),
        )
        .unwrap();
        reservation.confirm_payment(Utc::now()).unwrap();
        reservation
    }

    fn start(
        config: DispatcherConfig,
    ) -> (SideEffectDispatcher, InMemoryVoucherStore, InMemoryNotifier) {
        let vouchers = InMemoryVoucherStore::new();
        let notifier = InMemoryNotifier::new();
        let dispatcher = SideEffectDispatcher::start(
            config,
            Arc::new(StoreVoucherIssuer::new(Arc::new(vouchers.clone()))),
            Arc::new(notifier.clone()),
        );
        (dispatcher, vouchers, notifier)
    }

    #[tokio::test]
    async fn shutdown_drains_queued_jobs() {
        let (dispatcher, vouchers, notifier) = start(DispatcherConfig {
            workers: 2,
            queue_capacity: 64,
            enqueue_timeout: Duration::from_secs(1),
        });

        for i in 0..20 {
            dispatcher
                .dispatch(confirmed(&format!("ref-{i}")))
                .await
                .unwrap();
        }
        dispatcher.shutdown().await;

        assert_eq!(vouchers.count().await.unwrap(), 20);
        assert_eq!(notifier.sent().len(), 20);
    }

    #[tokio::test]
    async fn duplicate_jobs_issue_and_notify_once() {
        let (dispatcher, vouchers, notifier) = start(DispatcherConfig::default());
        let reservation = confirmed("ref-1");

        dispatcher.dispatch(reservation.clone()).await.unwrap();
        dispatcher.dispatch(reservation.clone()).await.unwrap();
        dispatcher.shutdown().await;

        assert_eq!(vouchers.count().await.unwrap(), 1);
        assert_eq!(notifier.count_for(reservation.id), 1);
    }

    #[tokio::test]
    async fn notification_failure_keeps_the_voucher() {
        let (dispatcher, vouchers, notifier) = start(DispatcherConfig::default());
        notifier.set_fail(true);
        let reservation = confirmed("ref-1");

        dispatcher.dispatch(reservation.clone()).await.unwrap();
        dispatcher.shutdown().await;

        assert!(
            vouchers
                .find_by_reservation(reservation.id)
                .await
                .unwrap()
                .is_some()
        );
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn dispatch_after_shutdown_is_refused() {
        let (dispatcher, _, _) = start(DispatcherConfig::default());
        dispatcher.shutdown().await;

        let result = dispatcher.dispatch(confirmed("ref-1")).await;
        assert_eq!(result, Err(DispatchError::ShutDown));
    }
}
