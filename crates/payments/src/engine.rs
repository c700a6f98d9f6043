//! Reconciliation of provider payment webhooks with reservations.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use common::ReservationId;
use domain::{Reservation, ReservationError, ReservationStatus};
use serde::Serialize;
use store::{
    EventOutcome, IdempotencyLedger, MarkResult, ReservationStore, ReservationTx, StoreError,
};

use crate::dispatcher::SideEffectDispatcher;
use crate::error::{TransientError, WebhookError};
use crate::event::{EventKind, ParseError, WebhookEvent};
use crate::signature::SignatureVerifier;

/// Default bound on begin, lock and save of one confirmation.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Status reported back to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    /// Authentic event that needs no work.
    Received,
    /// The event was applied, or there was nothing to apply it to.
    Processed,
    /// The reservation was already confirmed.
    AlreadyConfirmed,
}

/// Successful webhook handling result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub status: AckStatus,
    pub reservation_id: Option<ReservationId>,
    /// Definitive outcome, when the event was a payment confirmation.
    pub outcome: Option<EventOutcome>,
}

impl Ack {
    fn received() -> Self {
        Self {
            status: AckStatus::Received,
            reservation_id: None,
            outcome: None,
        }
    }

    fn from_outcome(outcome: EventOutcome, reservation_id: Option<ReservationId>) -> Self {
        let status = match outcome {
            EventOutcome::Confirmed => AckStatus::Processed,
            EventOutcome::AlreadyConfirmed => AckStatus::AlreadyConfirmed,
            EventOutcome::Superseded | EventOutcome::ReservationNotFound => AckStatus::Processed,
        };
        Self {
            status,
            reservation_id,
            outcome: Some(outcome),
        }
    }

    /// Ack for a replayed event whose outcome was already recorded.
    fn replayed(outcome: EventOutcome) -> Self {
        let status = match outcome {
            EventOutcome::Confirmed | EventOutcome::AlreadyConfirmed => {
                AckStatus::AlreadyConfirmed
            }
            EventOutcome::Superseded | EventOutcome::ReservationNotFound => AckStatus::Processed,
        };
        Self {
            status,
            reservation_id: None,
            outcome: Some(outcome),
        }
    }

    fn metric_label(&self) -> &'static str {
        match self.outcome {
            None => "ignored",
            Some(outcome) => outcome.as_str(),
        }
    }
}

/// Result of the locked section.
enum Locked {
    Confirmed(Reservation),
    AlreadyConfirmed,
    Superseded(ReservationStatus),
    Vanished,
}

/// Applies payment confirmations to reservations exactly once.
///
/// Per event: verify the signature over the raw body, parse, classify,
/// consult the idempotency ledger, resolve the reservation by payment id,
/// then confirm it under its row lock and hand it to the dispatcher after
/// commit. The row lock recheck is authoritative; the ledger only lets
/// replays skip the lock.
pub struct ReconciliationEngine<S: ReservationStore> {
    verifier: SignatureVerifier,
    store: Arc<S>,
    ledger: Arc<dyn IdempotencyLedger>,
    dispatcher: SideEffectDispatcher,
    transaction_timeout: Duration,
}

impl<S: ReservationStore> Clone for ReconciliationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            verifier: self.verifier.clone(),
            store: Arc::clone(&self.store),
            ledger: Arc::clone(&self.ledger),
            dispatcher: self.dispatcher.clone(),
            transaction_timeout: self.transaction_timeout,
        }
    }
}

impl<S: ReservationStore + 'static> ReconciliationEngine<S> {
    /// Creates a new engine.
    pub fn new(
        verifier: SignatureVerifier,
        store: Arc<S>,
        ledger: Arc<dyn IdempotencyLedger>,
        dispatcher: SideEffectDispatcher,
    ) -> Self {
        Self {
            verifier,
            store,
            ledger,
            dispatcher,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }

    /// Overrides the bound on begin, lock and save.
    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = timeout;
        self
    }

    /// Handles one webhook delivery.
    ///
    /// `signature` is the raw header value, `None` when absent. Nothing in
    /// the body is interpreted before the signature is verified.
    #[tracing::instrument(skip_all, fields(event_id, payment_id))]
    pub async fn handle(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<Ack, WebhookError> {
        let started = Instant::now();
        let result = self.process(raw_body, signature).await;

        let label = match &result {
            Ok(ack) => ack.metric_label(),
            Err(e) => e.label(),
        };
        metrics::counter!("webhook_events_total", "outcome" => label).increment(1);
        metrics::histogram!("webhook_duration_seconds").record(started.elapsed().as_secs_f64());

        result
    }

    async fn process(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<Ack, WebhookError> {
        let signature = signature
            .filter(|s| !s.trim().is_empty())
            .ok_or(WebhookError::MissingSignature)?;
        if !self.verifier.verify(raw_body, signature) {
            tracing::warn!("webhook signature verification failed");
            return Err(WebhookError::InvalidSignature);
        }

        let event = WebhookEvent::parse(raw_body)?;
        let span = tracing::Span::current();
        span.record("event_id", event.id.as_str());

        let payment_id = match (event.kind(), event.payment_id()) {
            (EventKind::PaymentConfirmation, Some(payment_id)) => payment_id,
            (EventKind::PaymentConfirmation, None) => {
                return Err(ParseError::MissingField("payment id").into());
            }
            (EventKind::Other, _) => {
                tracing::debug!(event = %event.event, "event acknowledged without processing");
                return Ok(Ack::received());
            }
        };
        span.record("payment_id", payment_id.as_str());

        if let Some(outcome) = self.recorded_outcome(&event.id).await {
            tracing::info!(%outcome, "replayed event short-circuited");
            return Ok(Ack::replayed(outcome));
        }

        let Some(reservation) = self.store.find_by_payment_id(&payment_id).await? else {
            tracing::warn!("no reservation for payment");
            record_outcome(self.ledger.as_ref(), &event.id, EventOutcome::ReservationNotFound)
                .await;
            return Ok(Ack::from_outcome(EventOutcome::ReservationNotFound, None));
        };

        // Once started, the locked section and its follow-up run to
        // completion even if the caller goes away.
        let task = tokio::spawn(confirm_and_dispatch(
            Arc::clone(&self.store),
            Arc::clone(&self.ledger),
            self.dispatcher.clone(),
            event.id.clone(),
            reservation.id,
            self.transaction_timeout,
        ));

        match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "confirmation task failed");
                Err(TransientError::Aborted.into())
            }
        }
    }

    async fn recorded_outcome(&self, event_id: &str) -> Option<EventOutcome> {
        match self.ledger.recorded_outcome(event_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "idempotency ledger lookup failed");
                None
            }
        }
    }
}

#[tracing::instrument(skip(store, ledger, dispatcher, transaction_timeout))]
async fn confirm_and_dispatch<S: ReservationStore>(
    store: Arc<S>,
    ledger: Arc<dyn IdempotencyLedger>,
    dispatcher: SideEffectDispatcher,
    event_id: String,
    reservation_id: ReservationId,
    transaction_timeout: Duration,
) -> Result<Ack, WebhookError> {
    let outcome = match lock_and_confirm(store.as_ref(), reservation_id, transaction_timeout).await?
    {
        Locked::Confirmed(reservation) => {
            tracing::info!("reservation confirmed");
            if let Err(e) = dispatcher.dispatch(reservation).await {
                tracing::error!(error = %e, "side effects not queued");
            }
            EventOutcome::Confirmed
        }
        Locked::AlreadyConfirmed => {
            tracing::info!("reservation already confirmed");
            EventOutcome::AlreadyConfirmed
        }
        Locked::Superseded(status) => {
            tracing::warn!(%status, "payment confirmation superseded by administrative status");
            EventOutcome::Superseded
        }
        Locked::Vanished => {
            tracing::warn!("reservation disappeared before it could be locked");
            record_outcome(ledger.as_ref(), &event_id, EventOutcome::ReservationNotFound).await;
            return Ok(Ack::from_outcome(EventOutcome::ReservationNotFound, None));
        }
    };

    record_outcome(ledger.as_ref(), &event_id, outcome).await;
    Ok(Ack::from_outcome(outcome, Some(reservation_id)))
}

/// Confirms under the row lock. Begin, lock and save are bounded by
/// `transaction_timeout`; commit is not, so a commit is never abandoned
/// halfway.
async fn lock_and_confirm<S: ReservationStore>(
    store: &S,
    id: ReservationId,
    transaction_timeout: Duration,
) -> Result<Locked, WebhookError> {
    let (tx, locked) = tokio::time::timeout(transaction_timeout, stage_confirmation(store, id))
        .await
        .map_err(|_| TransientError::TransactionTimeout(transaction_timeout))??;

    if let Some(tx) = tx {
        tx.commit().await?;
    }
    Ok(locked)
}

/// Locks, rechecks and stages the confirmation. Returns the open
/// transaction only when there is something to commit.
async fn stage_confirmation<S: ReservationStore>(
    store: &S,
    id: ReservationId,
) -> Result<(Option<S::Tx>, Locked), WebhookError> {
    let mut tx = store.begin().await?;
    let mut reservation = match tx.lock_and_load(id).await {
        Ok(reservation) => reservation,
        Err(StoreError::ReservationNotFound(_)) => return Ok((None, Locked::Vanished)),
        Err(e) => return Err(e.into()),
    };

    match reservation.confirm_payment(Utc::now()) {
        Ok(()) => {
            tx.save(&reservation).await?;
            Ok((Some(tx), Locked::Confirmed(reservation)))
        }
        Err(ReservationError::AlreadyConfirmed) => {
            release(tx).await;
            Ok((None, Locked::AlreadyConfirmed))
        }
        Err(_) => {
            let status = reservation.status;
            release(tx).await;
            Ok((None, Locked::Superseded(status)))
        }
    }
}

async fn release<T: ReservationTx>(tx: T) {
    if let Err(e) = tx.rollback().await {
        tracing::warn!(error = %e, "rollback failed");
    }
}

async fn record_outcome(ledger: &dyn IdempotencyLedger, event_id: &str, outcome: EventOutcome) {
    match ledger.try_mark_processed(event_id, outcome).await {
        Ok(MarkResult::Accepted) => {}
        Ok(MarkResult::AlreadyProcessed(recorded)) => {
            tracing::debug!(%recorded, "event outcome already recorded");
        }
        Err(e) => tracing::warn!(error = %e, "failed to record event outcome"),
    }
}

#[cfg(test)]
mod tests {
    use domain::{Money, NewReservation, PaymentId};
    use store::{InMemoryLedger, InMemoryReservationStore, InMemoryVoucherStore, VoucherStore};

    use super::*;
    use crate::dispatcher::DispatcherConfig;
    use crate::services::{InMemoryNotifier, StoreVoucherIssuer};

    const SECRET: &str = "whsec_test";

    struct Harness {
        engine: ReconciliationEngine<InMemoryReservationStore>,
        store: InMemoryReservationStore,
        ledger: InMemoryLedger,
        vouchers: InMemoryVoucherStore,
        notifier: InMemoryNotifier,
        dispatcher: SideEffectDispatcher,
        verifier: SignatureVerifier,
    }

    fn harness_with_store(store: InMemoryReservationStore) -> Harness {
        let ledger = InMemoryLedger::new();
        let vouchers = InMemoryVoucherStore::new();
        let notifier = InMemoryNotifier::new();
        let dispatcher = SideEffectDispatcher::start(
            DispatcherConfig::default(),
            Arc::new(StoreVoucherIssuer::new(Arc::new(vouchers.clone()))),
            Arc::new(notifier.clone()),
        );
        let verifier = SignatureVerifier::new(SECRET).unwrap();
        let engine = ReconciliationEngine::new(
            verifier.clone(),
            Arc::new(store.clone()),
            Arc::new(ledger.clone()),
            dispatcher.clone(),
        );
        Harness {
            engine,
            store,
            ledger,
            vouchers,
            notifier,
            dispatcher,
            verifier,
        }
    }

    fn harness() -> Harness {
        harness_with_store(InMemoryReservationStore::new())
    }

    async fn seed(store: &InMemoryReservationStore, payment: &str) -> Reservation {
        let mut reservation = Reservation::new(
            NewReservation {
                external_reference: format!("ref-{payment}"),
                customer_name: "Ana".to_string(),
                customer_email: "ana@example.com".to_string(),
                party_size: 2,
                amount: Money::from_cents(15000),
            },
            Utc::now(),
        )
        .unwrap();
        reservation
            .attach_payment(PaymentId::from(payment), Utc::now())
            .unwrap();
        store.insert(&reservation).await.unwrap();
        reservation
    }

    fn body(event_id: &str, event: &str, payment: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "id": event_id,
            "event": event,
            "payment": { "id": payment, "status": "CONFIRMED", "value": 150.0 }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn confirms_pending_reservation_and_issues_voucher() {
        let h = harness();
        let reservation = seed(&h.store, "pay_1").await;
        let raw = body("evt_1", "PAYMENT_CONFIRMED", "pay_1");
        let signature = h.verifier.sign(&raw);

        let ack = h.engine.handle(&raw, Some(&signature)).await.unwrap();
        assert_eq!(ack.status, AckStatus::Processed);
        assert_eq!(ack.reservation_id, Some(reservation.id));
        assert_eq!(ack.outcome, Some(EventOutcome::Confirmed));

        h.dispatcher.shutdown().await;
        let stored = h.store.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Confirmed);
        assert_eq!(h.vouchers.count().await.unwrap(), 1);
        assert_eq!(h.notifier.count_for(reservation.id), 1);
        assert_eq!(
            h.ledger.recorded_outcome("evt_1").await.unwrap(),
            Some(EventOutcome::Confirmed)
        );
    }

    #[tokio::test]
    async fn missing_and_invalid_signatures_are_rejected_before_parsing() {
        let h = harness();
        let reservation = seed(&h.store, "pay_1").await;
        let raw = body("evt_1", "PAYMENT_CONFIRMED", "pay_1");

        assert!(matches!(
            h.engine.handle(&raw, None).await,
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            h.engine.handle(&raw, Some("  ")).await,
            Err(WebhookError::MissingSignature)
        ));

        let mut tampered = raw.clone();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x01;
        let signature = h.verifier.sign(&raw);
        assert!(matches!(
            h.engine.handle(&tampered, Some(&signature)).await,
            Err(WebhookError::InvalidSignature)
        ));

        assert!(matches!(
            h.engine.handle(b"not json", Some(&h.verifier.sign(b"x"))).await,
            Err(WebhookError::InvalidSignature)
        ));

        let stored = h.store.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn malformed_but_signed_payload() {
        let h = harness();
        let raw = b"{\"id\":".to_vec();
        let result = h.engine.handle(&raw, Some(&h.verifier.sign(&raw))).await;
        assert!(matches!(result, Err(WebhookError::MalformedPayload(_))));
    }

    #[tokio::test]
    async fn non_confirmation_events_are_only_acknowledged() {
        let h = harness();
        let reservation = seed(&h.store, "pay_1").await;
        let raw = body("evt_1", "PAYMENT_CREATED", "pay_1");

        let ack = h
            .engine
            .handle(&raw, Some(&h.verifier.sign(&raw)))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::Received);
        assert_eq!(ack.outcome, None);

        let stored = h.store.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn events_without_a_payment_are_acknowledged() {
        let h = harness();
        let raw = br#"{"id":"evt_9","event":"TRANSFER_DONE","transfer":{"id":"tr_1"}}"#.to_vec();

        let ack = h
            .engine
            .handle(&raw, Some(&h.verifier.sign(&raw)))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::Received);
        assert_eq!(ack.outcome, None);
        assert!(h.ledger.is_empty());
    }

    #[tokio::test]
    async fn confirmation_without_payment_is_malformed() {
        let h = harness();
        let raw = br#"{"id":"evt_1","event":"PAYMENT_CONFIRMED"}"#.to_vec();
        let result = h.engine.handle(&raw, Some(&h.verifier.sign(&raw))).await;
        assert!(matches!(result, Err(WebhookError::MalformedPayload(_))));
    }

    #[tokio::test]
    async fn unknown_payment_is_acknowledged_without_mutation() {
        let h = harness();
        let reservation = seed(&h.store, "pay_1").await;
        let raw = body("evt_1", "PAYMENT_RECEIVED", "pay_unknown");

        let ack = h
            .engine
            .handle(&raw, Some(&h.verifier.sign(&raw)))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::Processed);
        assert_eq!(ack.outcome, Some(EventOutcome::ReservationNotFound));
        assert_eq!(ack.reservation_id, None);

        h.dispatcher.shutdown().await;
        let stored = h.store.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored, reservation);
        assert_eq!(h.vouchers.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn redelivery_and_second_event_report_already_confirmed() {
        let h = harness();
        let reservation = seed(&h.store, "pay_1").await;

        let first = body("evt_1", "PAYMENT_RECEIVED", "pay_1");
        let ack = h
            .engine
            .handle(&first, Some(&h.verifier.sign(&first)))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::Processed);

        let replay = h
            .engine
            .handle(&first, Some(&h.verifier.sign(&first)))
            .await
            .unwrap();
        assert_eq!(replay.status, AckStatus::AlreadyConfirmed);

        let second = body("evt_2", "PAYMENT_CONFIRMED", "pay_1");
        let ack = h
            .engine
            .handle(&second, Some(&h.verifier.sign(&second)))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::AlreadyConfirmed);
        assert_eq!(ack.outcome, Some(EventOutcome::AlreadyConfirmed));

        h.dispatcher.shutdown().await;
        assert_eq!(h.vouchers.count().await.unwrap(), 1);
        assert_eq!(h.notifier.count_for(reservation.id), 1);
    }

    #[tokio::test]
    async fn administrative_status_is_not_overridden() {
        let h = harness();
        let mut reservation = seed(&h.store, "pay_1").await;
        let mut tx = h.store.begin().await.unwrap();
        reservation = tx.lock_and_load(reservation.id).await.unwrap();
        reservation.cancel(Utc::now()).unwrap();
        tx.save(&reservation).await.unwrap();
        tx.commit().await.unwrap();

        let raw = body("evt_1", "PAYMENT_CONFIRMED", "pay_1");
        let ack = h
            .engine
            .handle(&raw, Some(&h.verifier.sign(&raw)))
            .await
            .unwrap();
        assert_eq!(ack.status, AckStatus::Processed);
        assert_eq!(ack.outcome, Some(EventOutcome::Superseded));

        h.dispatcher.shutdown().await;
        let stored = h.store.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert_eq!(h.vouchers.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn lock_timeout_is_transient_and_not_recorded() {
        let h = harness_with_store(InMemoryReservationStore::with_lock_timeout(
            Duration::from_millis(50),
        ));
        let reservation = seed(&h.store, "pay_1").await;

        let mut holder = h.store.begin().await.unwrap();
        holder.lock_and_load(reservation.id).await.unwrap();

        let raw = body("evt_1", "PAYMENT_CONFIRMED", "pay_1");
        let signature = h.verifier.sign(&raw);
        let result = h.engine.handle(&raw, Some(&signature)).await;
        assert!(matches!(&result, Err(e) if e.is_transient()));
        assert!(h.ledger.is_empty());

        holder.rollback().await.unwrap();

        let ack = h.engine.handle(&raw, Some(&signature)).await.unwrap();
        assert_eq!(ack.outcome, Some(EventOutcome::Confirmed));
    }

    #[tokio::test]
    async fn transaction_timeout_is_transient() {
        let h = harness();
        let engine = h
            .engine
            .clone()
            .with_transaction_timeout(Duration::from_millis(50));
        let reservation = seed(&h.store, "pay_1").await;

        let mut holder = h.store.begin().await.unwrap();
        holder.lock_and_load(reservation.id).await.unwrap();

        let raw = body("evt_1", "PAYMENT_CONFIRMED", "pay_1");
        let result = engine.handle(&raw, Some(&h.verifier.sign(&raw))).await;
        assert!(matches!(
            result,
            Err(WebhookError::Transient(TransientError::TransactionTimeout(_)))
        ));
        holder.rollback().await.unwrap();

        let stored = h.store.get(reservation.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Pending);
    }

    #[tokio::test]
    async fn confirmation_completes_after_the_caller_goes_away() {
        let h = harness();
        let reservation = seed(&h.store, "pay_1").await;

        let mut holder = h.store.begin().await.unwrap();
        holder.lock_and_load(reservation.id).await.unwrap();

        let raw = body("evt_1", "PAYMENT_CONFIRMED", "pay_1");
        let signature = h.verifier.sign(&raw);
        let engine = h.engine.clone();
        let caller = tokio::spawn(async move { engine.handle(&raw, Some(&signature)).await });

        // Let the delivery reach the row lock, then drop the caller.
        tokio::time::sleep(Duration::from_millis(100)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());
        holder.rollback().await.unwrap();

        let mut status = ReservationStatus::Pending;
        for _ in 0..200 {
            status = h.store.get(reservation.id).await.unwrap().unwrap().status;
            if status == ReservationStatus::Confirmed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, ReservationStatus::Confirmed);

        // The ledger is written after the dispatch, so it marks the end of
        // the detached section.
        for _ in 0..200 {
            if h.ledger.recorded_outcome("evt_1").await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            h.ledger.recorded_outcome("evt_1").await.unwrap(),
            Some(EventOutcome::Confirmed)
        );

        h.dispatcher.shutdown().await;
        assert_eq!(h.vouchers.count().await.unwrap(), 1);
        assert_eq!(h.notifier.count_for(reservation.id), 1);
    }
}
