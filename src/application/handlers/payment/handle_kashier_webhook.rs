//! Kashier webhook orchestrator.
//!
//! Drives one inbound delivery through the full pipeline: rate gate,
//! signature verification, payload parsing, idempotent status transition,
//! event recording, audit. Every call leaves a webhook_events row; the
//! handler itself never returns an error, it always produces a response
//! the HTTP layer can send back to the gateway.

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;

use crate::domain::foundation::WebhookEventId;
use crate::domain::payment::{
    GatewayStatus, KashierEvent, KashierEventType, KashierWebhookVerifier, WebhookError,
};
use crate::ports::{
    AuditEventType, AuditLogEntry, AuditLogger, OrderRepository, ProcessingStatus,
    RateLimitDenied, RateLimitResult, RateLimitScope, RateLimitStatus, RateLimiter, SaveResult,
    SubscriptionRepository, TransitionOutcome, WebhookEventRecord, WebhookEventRepository,
    WebhookSecretProvider,
};

/// One inbound webhook delivery, as extracted by the HTTP layer.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    pub raw_body: Vec<u8>,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub source_ip: Option<String>,
    /// True when the delivery arrived on the subscription endpoint, where
    /// plain "pay" events settle subscription periods.
    pub via_subscription_endpoint: bool,
}

/// Response the HTTP layer renders for the gateway.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub status: StatusCode,
    pub message: String,
    /// Budget reported in the X-RateLimit response headers: the IP window
    /// on accepted calls, the exhausted scope on 429s.
    pub rate_limit: Option<RateLimitStatus>,
    /// Set on 429 responses.
    pub retry_after_secs: Option<u32>,
}

impl WebhookOutcome {
    fn ok(message: impl Into<String>, rate_limit: Option<RateLimitStatus>) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            rate_limit,
            retry_after_secs: None,
        }
    }

    fn from_error(err: &WebhookError, rate_limit: Option<RateLimitStatus>) -> Self {
        let retry_after_secs = match err {
            WebhookError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        Self {
            status: err.status_code(),
            message: err.public_message().to_string(),
            rate_limit,
            retry_after_secs,
        }
    }
}

/// Budget view of a denied check for the X-RateLimit headers: nothing
/// left, window reopens when the retry hint says so.
fn exhausted_budget(denied: &RateLimitDenied) -> RateLimitStatus {
    RateLimitStatus {
        limit: denied.limit,
        remaining: 0,
        reset_secs: denied.retry_after_secs,
    }
}

/// Application handler for Kashier webhook deliveries.
pub struct HandleKashierWebhook {
    verifier: KashierWebhookVerifier,
    secrets: Arc<dyn WebhookSecretProvider>,
    rate_limiter: Arc<dyn RateLimiter>,
    events: Arc<dyn WebhookEventRepository>,
    orders: Arc<dyn OrderRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    audit: Arc<dyn AuditLogger>,
}

impl HandleKashierWebhook {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        verifier: KashierWebhookVerifier,
        secrets: Arc<dyn WebhookSecretProvider>,
        rate_limiter: Arc<dyn RateLimiter>,
        events: Arc<dyn WebhookEventRepository>,
        orders: Arc<dyn OrderRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        audit: Arc<dyn AuditLogger>,
    ) -> Self {
        Self {
            verifier,
            secrets,
            rate_limiter,
            events,
            orders,
            subscriptions,
            audit,
        }
    }

    /// Processes one delivery end to end. Infallible by contract: every
    /// branch resolves to a response for the gateway.
    pub async fn handle(&self, delivery: WebhookDelivery) -> WebhookOutcome {
        let ip = delivery
            .source_ip
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        // ── Rate gate (IP scope) ─────────────────────────────────────
        let ip_budget = match self.rate_limiter.check(RateLimitScope::Ip, &ip).await {
            Ok(RateLimitResult::Allowed(status)) => Some(status),
            Ok(RateLimitResult::Denied(denied)) => {
                let err = WebhookError::RateLimited {
                    retry_after_secs: denied.retry_after_secs,
                };
                self.record_rejection(&delivery, &ip, false, &err).await;
                self.audit_rate_limited(RateLimitScope::Ip, &ip, denied.retry_after_secs)
                    .await;
                return WebhookOutcome::from_error(&err, Some(exhausted_budget(&denied)));
            }
            Err(e) => {
                // Counter store down: availability wins over strictness.
                tracing::warn!(error = %e, scope = "ip", "rate limit check failed, allowing");
                None
            }
        };

        // ── Signature headers ────────────────────────────────────────
        let (signature, timestamp) = match (&delivery.signature, &delivery.timestamp) {
            (Some(s), Some(t)) => (s.clone(), t.clone()),
            (None, _) => {
                let err = WebhookError::MissingHeader("x-kashier-signature");
                self.record_rejection(&delivery, &ip, false, &err).await;
                self.audit_rejected(&ip, &err).await;
                return WebhookOutcome::from_error(&err, ip_budget);
            }
            (_, None) => {
                let err = WebhookError::MissingHeader("x-kashier-timestamp");
                self.record_rejection(&delivery, &ip, false, &err).await;
                self.audit_rejected(&ip, &err).await;
                return WebhookOutcome::from_error(&err, ip_budget);
            }
        };

        // ── Verification ─────────────────────────────────────────────
        let merchant_hint = KashierEvent::merchant_hint(&delivery.raw_body);
        let secret = match self.secrets.signing_secret(merchant_hint.as_deref()) {
            Some(secret) => secret,
            None => {
                // Unrecognized tenant is indistinguishable from a forgery
                // to the caller.
                let err = WebhookError::InvalidSignature;
                self.record_rejection(&delivery, &ip, false, &err).await;
                self.audit_rejected(&ip, &err).await;
                return WebhookOutcome::from_error(&err, ip_budget);
            }
        };

        if let Err(err) = self
            .verifier
            .verify(&secret, &signature, &timestamp, &delivery.raw_body)
        {
            self.record_rejection(&delivery, &ip, false, &err).await;
            self.audit_rejected(&ip, &err).await;
            return WebhookOutcome::from_error(&err, ip_budget);
        }

        // ── Parse ────────────────────────────────────────────────────
        let mut event = match KashierEvent::from_payload(&delivery.raw_body) {
            Ok(event) => event,
            Err(err) => {
                self.record_rejection(&delivery, &ip, true, &err).await;
                self.audit_rejected(&ip, &err).await;
                return WebhookOutcome::from_error(&err, ip_budget);
            }
        };

        // The subscription endpoint receives plain "pay" events for
        // period settlements.
        if delivery.via_subscription_endpoint && event.event_type == KashierEventType::Pay {
            event.event_type = KashierEventType::SubscriptionPay;
        }

        // ── Secondary rate scopes from the verified payload ──────────
        if let Some(outcome) = self
            .check_payload_scope(&delivery, &ip, RateLimitScope::Customer, &event)
            .await
        {
            return outcome;
        }
        if let Some(outcome) = self
            .check_payload_scope(&delivery, &ip, RateLimitScope::Card, &event)
            .await
        {
            return outcome;
        }

        // ── Unknown event types are acknowledged, never retried ──────
        if let KashierEventType::Unknown(ref name) = event.event_type {
            tracing::info!(event_type = %name, "ignoring unhandled webhook event type");
            let err = WebhookError::Ignored(format!("unhandled event type {name}"));
            self.save_event(&delivery, &ip, &event, None, ProcessingStatus::Ignored, None)
                .await;
            self.audit_event(
                AuditEventType::KashierWebhookIgnored,
                format!("Ignored unhandled event type {name}"),
                &ip,
                &event,
            )
            .await;
            return WebhookOutcome::from_error(&err, ip_budget);
        }

        // ── Idempotency pre-check ────────────────────────────────────
        let dedup_key = event.dedup_key();
        match self.events.find_by_dedup_key(&dedup_key).await {
            Ok(Some(_)) => {
                self.save_event(
                    &delivery,
                    &ip,
                    &event,
                    None,
                    ProcessingStatus::Duplicate,
                    None,
                )
                .await;
                self.audit_event(
                    AuditEventType::KashierWebhookDuplicate,
                    format!("Duplicate delivery for {}", event.payment_reference),
                    &ip,
                    &event,
                )
                .await;
                return WebhookOutcome::ok("Event already processed", ip_budget);
            }
            Ok(None) => {}
            Err(e) => {
                // The unique claim insert below is the real guard.
                tracing::warn!(error = %e, "dedup lookup failed, relying on claim insert");
            }
        }

        // ── Claim ────────────────────────────────────────────────────
        // Two racing deliveries can both pass the pre-check; the unique
        // dedup_key insert decides which one gets to apply. The loser
        // must not touch order state: subscription renewals re-enter the
        // active status, so the guarded update alone would let a second
        // identical delivery through.
        let claim = self.event_record(
            &delivery,
            &ip,
            &event,
            Some(dedup_key.clone()),
            ProcessingStatus::Applied,
            None,
        );
        let claim_id = claim.id;
        let claimed = match self.events.save(&claim).await {
            Ok(SaveResult::Inserted) => true,
            Ok(SaveResult::AlreadyExists) => {
                self.save_event(
                    &delivery,
                    &ip,
                    &event,
                    None,
                    ProcessingStatus::Duplicate,
                    None,
                )
                .await;
                self.audit_event(
                    AuditEventType::KashierWebhookDuplicate,
                    format!("Duplicate delivery for {}", event.payment_reference),
                    &ip,
                    &event,
                )
                .await;
                return WebhookOutcome::ok("Event already processed", ip_budget);
            }
            Err(e) => {
                // Store down: proceed on the guarded update alone rather
                // than drop the payment.
                tracing::warn!(error = %e, "failed to claim webhook identity, relying on guarded update");
                false
            }
        };

        // ── Apply ────────────────────────────────────────────────────
        match self.apply_transition(&event).await {
            Ok(Some(TransitionOutcome::Applied)) => {
                if !claimed {
                    self.save_event(
                        &delivery,
                        &ip,
                        &event,
                        Some(dedup_key),
                        ProcessingStatus::Applied,
                        None,
                    )
                    .await;
                }
                self.audit_event(
                    AuditEventType::KashierWebhookApplied,
                    format!(
                        "Applied {} {} for {}",
                        event.event_type.as_str(),
                        event.status.as_str(),
                        event.payment_reference
                    ),
                    &ip,
                    &event,
                )
                .await;
                WebhookOutcome::ok("Webhook processed", ip_budget)
            }
            Ok(Some(TransitionOutcome::AlreadySettled)) => {
                if claimed {
                    self.finalize_event(claim_id, ProcessingStatus::Duplicate, None)
                        .await;
                } else {
                    self.save_event(
                        &delivery,
                        &ip,
                        &event,
                        Some(dedup_key),
                        ProcessingStatus::Duplicate,
                        None,
                    )
                    .await;
                }
                self.audit_event(
                    AuditEventType::KashierWebhookDuplicate,
                    format!("{} already settled", event.payment_reference),
                    &ip,
                    &event,
                )
                .await;
                WebhookOutcome::ok("Event already processed", ip_budget)
            }
            Ok(Some(TransitionOutcome::NotFound)) => {
                let err = match event.event_type {
                    KashierEventType::SubscriptionPay => WebhookError::SubscriptionNotFound,
                    _ => WebhookError::OrderNotFound,
                };
                if claimed {
                    self.finalize_event(
                        claim_id,
                        ProcessingStatus::Failed,
                        Some(err.to_string()),
                    )
                    .await;
                } else {
                    self.save_event(
                        &delivery,
                        &ip,
                        &event,
                        None,
                        ProcessingStatus::Failed,
                        Some(err.to_string()),
                    )
                    .await;
                }
                self.audit_event(
                    AuditEventType::KashierWebhookFailed,
                    format!("No record for {}", event.payment_reference),
                    &ip,
                    &event,
                )
                .await;
                WebhookOutcome::from_error(&err, ip_budget)
            }
            // PENDING statuses carry no transition; acknowledge.
            Ok(None) => {
                if claimed {
                    self.finalize_event(claim_id, ProcessingStatus::Ignored, None)
                        .await;
                } else {
                    self.save_event(&delivery, &ip, &event, None, ProcessingStatus::Ignored, None)
                        .await;
                }
                WebhookOutcome::ok("Event acknowledged", ip_budget)
            }
            Err(e) => {
                let err = WebhookError::from(e);
                if claimed {
                    self.finalize_event(
                        claim_id,
                        ProcessingStatus::Failed,
                        Some(err.to_string()),
                    )
                    .await;
                } else {
                    self.save_event(
                        &delivery,
                        &ip,
                        &event,
                        None,
                        ProcessingStatus::Failed,
                        Some(err.to_string()),
                    )
                    .await;
                }
                self.audit_event(
                    AuditEventType::KashierWebhookFailed,
                    format!("Store failure for {}", event.payment_reference),
                    &ip,
                    &event,
                )
                .await;
                WebhookOutcome::from_error(&err, ip_budget)
            }
        }
    }

    /// Routes the event to its conditional status transition. None means
    /// the event carries no transition (a PENDING progress report).
    async fn apply_transition(
        &self,
        event: &KashierEvent,
    ) -> Result<Option<TransitionOutcome>, crate::domain::foundation::DomainError> {
        let reference = event.payment_reference.as_str();
        let transaction = event.transaction_id.as_deref();

        let outcome = match (&event.event_type, event.status) {
            (KashierEventType::Pay, GatewayStatus::Success) => {
                Some(self.orders.mark_paid(reference, transaction).await?)
            }
            (KashierEventType::Pay, GatewayStatus::Failed) => {
                Some(self.orders.mark_payment_failed(reference).await?)
            }
            (KashierEventType::Refund, GatewayStatus::Success) => {
                Some(self.orders.mark_refunded(reference).await?)
            }
            // A failed refund leaves the order paid.
            (KashierEventType::Refund, GatewayStatus::Failed) => None,
            (KashierEventType::SubscriptionPay, GatewayStatus::Success) => {
                Some(self.subscriptions.activate(reference, transaction).await?)
            }
            (KashierEventType::SubscriptionPay, GatewayStatus::Failed) => {
                Some(self.subscriptions.mark_past_due(reference).await?)
            }
            (_, GatewayStatus::Pending) => None,
            // Unknown types never reach here.
            (KashierEventType::Unknown(_), _) => None,
        };

        Ok(outcome)
    }

    /// Counts an attempt against a payload-derived scope. Some(outcome)
    /// short-circuits the pipeline with a 429.
    async fn check_payload_scope(
        &self,
        delivery: &WebhookDelivery,
        ip: &str,
        scope: RateLimitScope,
        event: &KashierEvent,
    ) -> Option<WebhookOutcome> {
        let identifier = match scope {
            RateLimitScope::Customer => event.customer_reference.as_deref()?,
            RateLimitScope::Card => event.card_token.as_deref()?,
            RateLimitScope::Ip => return None,
        };

        match self.rate_limiter.check(scope, identifier).await {
            Ok(RateLimitResult::Allowed(_)) => None,
            Ok(RateLimitResult::Denied(denied)) => {
                let err = WebhookError::RateLimited {
                    retry_after_secs: denied.retry_after_secs,
                };
                self.record_rejection(delivery, ip, true, &err).await;
                self.audit_rate_limited(scope, identifier, denied.retry_after_secs)
                    .await;
                Some(WebhookOutcome::from_error(
                    &err,
                    Some(exhausted_budget(&denied)),
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, scope = scope.as_str(), "rate limit check failed, allowing");
                None
            }
        }
    }

    /// Builds the stored record for a verified, parsed delivery.
    fn event_record(
        &self,
        delivery: &WebhookDelivery,
        ip: &str,
        event: &KashierEvent,
        dedup_key: Option<String>,
        processing_status: ProcessingStatus,
        error_message: Option<String>,
    ) -> WebhookEventRecord {
        WebhookEventRecord {
            id: Default::default(),
            source: "kashier".to_string(),
            event_type: event.event_type.as_str().to_string(),
            dedup_key,
            raw_payload: String::from_utf8_lossy(&delivery.raw_body).into_owned(),
            signature: delivery.signature.clone(),
            signature_verified: true,
            source_ip: Some(ip.to_string()),
            processing_status,
            error_message,
            received_at: crate::domain::foundation::Timestamp::now(),
        }
    }

    /// Persists the event record for a verified, parsed delivery.
    /// Best effort: a failed insert is logged, never surfaced.
    async fn save_event(
        &self,
        delivery: &WebhookDelivery,
        ip: &str,
        event: &KashierEvent,
        dedup_key: Option<String>,
        processing_status: ProcessingStatus,
        error_message: Option<String>,
    ) {
        let record = self.event_record(
            delivery,
            ip,
            event,
            dedup_key,
            processing_status,
            error_message,
        );
        if let Err(e) = self.events.save(&record).await {
            tracing::warn!(error = %e, "failed to persist webhook event record");
        }
    }

    /// Settles a claimed row once its transition outcome is known.
    /// Best effort, like `save_event`.
    async fn finalize_event(
        &self,
        id: WebhookEventId,
        status: ProcessingStatus,
        error_message: Option<String>,
    ) {
        if let Err(e) = self.events.finalize(id, status, error_message).await {
            tracing::warn!(error = %e, "failed to finalize webhook event record");
        }
    }

    /// Persists the event record for a delivery rejected before parsing.
    async fn record_rejection(
        &self,
        delivery: &WebhookDelivery,
        ip: &str,
        signature_verified: bool,
        err: &WebhookError,
    ) {
        let record = WebhookEventRecord {
            id: Default::default(),
            source: "kashier".to_string(),
            event_type: "unknown".to_string(),
            dedup_key: None,
            raw_payload: String::from_utf8_lossy(&delivery.raw_body).into_owned(),
            signature: delivery.signature.clone(),
            signature_verified,
            source_ip: Some(ip.to_string()),
            processing_status: ProcessingStatus::Rejected,
            error_message: Some(err.to_string()),
            received_at: crate::domain::foundation::Timestamp::now(),
        };

        if let Err(e) = self.events.save(&record).await {
            tracing::warn!(error = %e, "failed to persist webhook event record");
        }
    }

    async fn audit_event(
        &self,
        event_type: AuditEventType,
        description: String,
        ip: &str,
        event: &KashierEvent,
    ) {
        let entry = AuditLogEntry::new(event_type, description)
            .with_ip(ip)
            .with_metadata(json!({
                "payment_reference": event.payment_reference,
                "event_type": event.event_type.as_str(),
                "gateway_status": event.status.as_str(),
                "transaction_id": event.transaction_id,
                "merchant_id": event.merchant_id,
            }));
        let _ = self.audit.record(entry).await;
    }

    async fn audit_rejected(&self, ip: &str, err: &WebhookError) {
        let entry = AuditLogEntry::new(
            AuditEventType::KashierWebhookRejected,
            format!("Webhook rejected: {err}"),
        )
        .with_ip(ip);
        let _ = self.audit.record(entry).await;
    }

    async fn audit_rate_limited(&self, scope: RateLimitScope, identifier: &str, retry: u32) {
        let entry = AuditLogEntry::new(
            AuditEventType::KashierWebhookRateLimited,
            format!("Rate limit hit for {} {}", scope.as_str(), identifier),
        )
        .with_metadata(json!({
            "scope": scope.as_str(),
            "identifier": identifier,
            "retry_after_secs": retry,
        }));
        let _ = self.audit.record(entry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    use crate::adapters::rate_limiter::{InMemoryRateLimiter, RateLimitConfig, WindowLimits};
    use crate::domain::foundation::{DomainError, Timestamp};
    use crate::domain::order::{Order, OrderStatus};
    use crate::domain::subscription::{Subscription, SubscriptionStatus};

    const SECRET: &str = "whsec_orchestrator_test";

    // ══════════════════════════════════════════════════════════════
    // Test Doubles
    // ══════════════════════════════════════════════════════════════

    struct StaticSecrets;

    impl WebhookSecretProvider for StaticSecrets {
        fn signing_secret(&self, _merchant_id: Option<&str>) -> Option<SecretString> {
            Some(SecretString::new(SECRET.to_string()))
        }
    }

    struct FailingLimiter;

    #[async_trait]
    impl RateLimiter for FailingLimiter {
        async fn check(
            &self,
            _scope: RateLimitScope,
            _identifier: &str,
        ) -> Result<RateLimitResult, DomainError> {
            Err(DomainError::cache("connection refused"))
        }
        async fn status(
            &self,
            _scope: RateLimitScope,
            _identifier: &str,
        ) -> Result<RateLimitStatus, DomainError> {
            Err(DomainError::cache("connection refused"))
        }
        async fn reset(&self, _: RateLimitScope, _: &str) -> Result<(), DomainError> {
            Ok(())
        }
        async fn block(
            &self,
            _: RateLimitScope,
            _: &str,
            _: Option<Timestamp>,
        ) -> Result<(), DomainError> {
            Ok(())
        }
        async fn unblock(&self, _: RateLimitScope, _: &str) -> Result<(), DomainError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryEvents {
        rows: Mutex<Vec<WebhookEventRecord>>,
    }

    #[async_trait]
    impl WebhookEventRepository for MemoryEvents {
        async fn save(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError> {
            let mut rows = self.rows.lock().await;
            if let Some(key) = &record.dedup_key {
                if rows.iter().any(|r| r.dedup_key.as_ref() == Some(key)) {
                    return Ok(SaveResult::AlreadyExists);
                }
            }
            rows.push(record.clone());
            Ok(SaveResult::Inserted)
        }

        async fn find_by_dedup_key(
            &self,
            dedup_key: &str,
        ) -> Result<Option<WebhookEventRecord>, DomainError> {
            let rows = self.rows.lock().await;
            Ok(rows
                .iter()
                .find(|r| r.dedup_key.as_deref() == Some(dedup_key))
                .cloned())
        }

        async fn finalize(
            &self,
            id: WebhookEventId,
            status: ProcessingStatus,
            error_message: Option<String>,
        ) -> Result<(), DomainError> {
            let mut rows = self.rows.lock().await;
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.processing_status = status;
                row.error_message = error_message;
                if status == ProcessingStatus::Failed {
                    row.dedup_key = None;
                }
            }
            Ok(())
        }

        async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
            let mut rows = self.rows.lock().await;
            let before = rows.len();
            rows.retain(|r| !r.received_at.is_before(&cutoff));
            Ok((before - rows.len()) as u64)
        }
    }

    /// Event store whose dedup lookups are slow enough for two deliveries
    /// of the same event to overlap before either claims the identity.
    struct SlowLookupEvents {
        inner: MemoryEvents,
    }

    #[async_trait]
    impl WebhookEventRepository for SlowLookupEvents {
        async fn save(&self, record: &WebhookEventRecord) -> Result<SaveResult, DomainError> {
            self.inner.save(record).await
        }

        async fn find_by_dedup_key(
            &self,
            dedup_key: &str,
        ) -> Result<Option<WebhookEventRecord>, DomainError> {
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
            self.inner.find_by_dedup_key(dedup_key).await
        }

        async fn finalize(
            &self,
            id: WebhookEventId,
            status: ProcessingStatus,
            error_message: Option<String>,
        ) -> Result<(), DomainError> {
            self.inner.finalize(id, status, error_message).await
        }

        async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
            self.inner.delete_before(cutoff).await
        }
    }

    #[derive(Default)]
    struct MemoryOrders {
        rows: Mutex<HashMap<String, Order>>,
    }

    impl MemoryOrders {
        async fn insert_pending(&self, reference: &str) {
            let order = Order::new(reference, 100_000, "EGP");
            self.rows.lock().await.insert(reference.to_string(), order);
        }

        async fn status_of(&self, reference: &str) -> Option<OrderStatus> {
            self.rows.lock().await.get(reference).map(|o| o.status)
        }
    }

    #[async_trait]
    impl OrderRepository for MemoryOrders {
        async fn find_by_payment_reference(
            &self,
            payment_reference: &str,
        ) -> Result<Option<Order>, DomainError> {
            Ok(self.rows.lock().await.get(payment_reference).cloned())
        }

        async fn save(&self, order: &Order) -> Result<(), DomainError> {
            self.rows
                .lock()
                .await
                .insert(order.payment_reference.clone(), order.clone());
            Ok(())
        }

        async fn mark_paid(
            &self,
            payment_reference: &str,
            transaction_id: Option<&str>,
        ) -> Result<TransitionOutcome, DomainError> {
            let mut rows = self.rows.lock().await;
            match rows.get_mut(payment_reference) {
                None => Ok(TransitionOutcome::NotFound),
                Some(order) if order.status == OrderStatus::Pending => {
                    order
                        .mark_paid(transaction_id.map(String::from))
                        .map_err(|e| DomainError::internal(e.to_string()))?;
                    Ok(TransitionOutcome::Applied)
                }
                Some(_) => Ok(TransitionOutcome::AlreadySettled),
            }
        }

        async fn mark_payment_failed(
            &self,
            payment_reference: &str,
        ) -> Result<TransitionOutcome, DomainError> {
            let mut rows = self.rows.lock().await;
            match rows.get_mut(payment_reference) {
                None => Ok(TransitionOutcome::NotFound),
                Some(order) if order.status == OrderStatus::Pending => {
                    order
                        .mark_payment_failed()
                        .map_err(|e| DomainError::internal(e.to_string()))?;
                    Ok(TransitionOutcome::Applied)
                }
                Some(_) => Ok(TransitionOutcome::AlreadySettled),
            }
        }

        async fn mark_refunded(
            &self,
            payment_reference: &str,
        ) -> Result<TransitionOutcome, DomainError> {
            let mut rows = self.rows.lock().await;
            match rows.get_mut(payment_reference) {
                None => Ok(TransitionOutcome::NotFound),
                Some(order) if order.status == OrderStatus::Paid => {
                    order
                        .mark_refunded()
                        .map_err(|e| DomainError::internal(e.to_string()))?;
                    Ok(TransitionOutcome::Applied)
                }
                Some(_) => Ok(TransitionOutcome::AlreadySettled),
            }
        }
    }

    #[derive(Default)]
    struct MemorySubscriptions {
        rows: Mutex<HashMap<String, Subscription>>,
    }

    impl MemorySubscriptions {
        async fn insert_pending(&self, reference: &str) {
            let sub = Subscription::new(reference);
            self.rows.lock().await.insert(reference.to_string(), sub);
        }

        async fn status_of(&self, reference: &str) -> Option<SubscriptionStatus> {
            self.rows.lock().await.get(reference).map(|s| s.status)
        }
    }

    #[async_trait]
    impl SubscriptionRepository for MemorySubscriptions {
        async fn find_by_payment_reference(
            &self,
            payment_reference: &str,
        ) -> Result<Option<Subscription>, DomainError> {
            Ok(self.rows.lock().await.get(payment_reference).cloned())
        }

        async fn save(&self, subscription: &Subscription) -> Result<(), DomainError> {
            self.rows
                .lock()
                .await
                .insert(subscription.payment_reference.clone(), subscription.clone());
            Ok(())
        }

        async fn activate(
            &self,
            payment_reference: &str,
            transaction_id: Option<&str>,
        ) -> Result<TransitionOutcome, DomainError> {
            let mut rows = self.rows.lock().await;
            match rows.get_mut(payment_reference) {
                None => Ok(TransitionOutcome::NotFound),
                Some(sub) if !sub.status.is_terminal() => {
                    sub.activate(transaction_id.map(String::from))
                        .map_err(|e| DomainError::internal(e.to_string()))?;
                    Ok(TransitionOutcome::Applied)
                }
                Some(_) => Ok(TransitionOutcome::AlreadySettled),
            }
        }

        async fn mark_past_due(
            &self,
            payment_reference: &str,
        ) -> Result<TransitionOutcome, DomainError> {
            let mut rows = self.rows.lock().await;
            match rows.get_mut(payment_reference) {
                None => Ok(TransitionOutcome::NotFound),
                Some(sub) if !sub.status.is_terminal() => {
                    sub.mark_past_due()
                        .map_err(|e| DomainError::internal(e.to_string()))?;
                    Ok(TransitionOutcome::Applied)
                }
                Some(_) => Ok(TransitionOutcome::AlreadySettled),
            }
        }
    }

    #[derive(Default)]
    struct MemoryAudit {
        entries: Mutex<Vec<AuditLogEntry>>,
    }

    impl MemoryAudit {
        async fn types(&self) -> Vec<AuditEventType> {
            self.entries
                .lock()
                .await
                .iter()
                .map(|e| e.event_type)
                .collect()
        }
    }

    #[async_trait]
    impl AuditLogger for MemoryAudit {
        async fn record(&self, entry: AuditLogEntry) -> Result<(), DomainError> {
            self.entries.lock().await.push(entry);
            Ok(())
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Test Harness
    // ══════════════════════════════════════════════════════════════

    struct Harness {
        handler: HandleKashierWebhook,
        events: Arc<MemoryEvents>,
        orders: Arc<MemoryOrders>,
        subscriptions: Arc<MemorySubscriptions>,
        audit: Arc<MemoryAudit>,
    }

    fn tight_ip_config(max_attempts: u32) -> RateLimitConfig {
        RateLimitConfig {
            per_ip: WindowLimits {
                max_attempts,
                window_secs: 600,
                block_secs: 600,
            },
            ..RateLimitConfig::default()
        }
    }

    fn harness_with_limiter(limiter: Arc<dyn RateLimiter>) -> Harness {
        let events = Arc::new(MemoryEvents::default());
        let orders = Arc::new(MemoryOrders::default());
        let subscriptions = Arc::new(MemorySubscriptions::default());
        let audit = Arc::new(MemoryAudit::default());

        let handler = HandleKashierWebhook::new(
            KashierWebhookVerifier::new(300),
            Arc::new(StaticSecrets),
            limiter,
            events.clone(),
            orders.clone(),
            subscriptions.clone(),
            audit.clone(),
        );

        Harness {
            handler,
            events,
            orders,
            subscriptions,
            audit,
        }
    }

    fn harness() -> Harness {
        harness_with_limiter(Arc::new(InMemoryRateLimiter::with_defaults()))
    }

    fn pay_payload(reference: &str, status: &str, transaction: &str) -> String {
        format!(
            r#"{{"event":"pay","data":{{"merchantOrderId":"{reference}","status":"{status}","transactionId":"{transaction}","merchantId":"MID-12345"}}}}"#
        )
    }

    fn signed_delivery(payload: &str) -> WebhookDelivery {
        let ts = Timestamp::now().as_unix_secs() as i64;
        let secret = SecretString::new(SECRET.to_string());
        WebhookDelivery {
            raw_body: payload.as_bytes().to_vec(),
            signature: Some(KashierWebhookVerifier::sign(&secret, ts, payload.as_bytes())),
            timestamp: Some(ts.to_string()),
            source_ip: Some("203.0.113.1".to_string()),
            via_subscription_endpoint: false,
        }
    }

    // ══════════════════════════════════════════════════════════════
    // Happy Path Tests
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn successful_payment_settles_order() {
        let h = harness();
        h.orders.insert_pending("ORD-1").await;

        let outcome = h
            .handler
            .handle(signed_delivery(&pay_payload("ORD-1", "SUCCESS", "TX-1")))
            .await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(h.orders.status_of("ORD-1").await, Some(OrderStatus::Paid));
        assert!(outcome.rate_limit.is_some());

        let rows = h.events.rows.lock().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].processing_status, ProcessingStatus::Applied);
        assert!(rows[0].signature_verified);
        assert!(rows[0].dedup_key.is_some());

        assert!(h
            .audit
            .types()
            .await
            .contains(&AuditEventType::KashierWebhookApplied));
    }

    #[tokio::test]
    async fn failed_payment_marks_order_failed() {
        let h = harness();
        h.orders.insert_pending("ORD-2").await;

        let outcome = h
            .handler
            .handle(signed_delivery(&pay_payload("ORD-2", "FAILED", "TX-2")))
            .await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(
            h.orders.status_of("ORD-2").await,
            Some(OrderStatus::PaymentFailed)
        );
    }

    #[tokio::test]
    async fn subscription_endpoint_routes_pay_to_subscription() {
        let h = harness();
        h.subscriptions.insert_pending("SUB-1").await;

        let mut delivery = signed_delivery(&pay_payload("SUB-1", "SUCCESS", "TX-3"));
        delivery.via_subscription_endpoint = true;

        let outcome = h.handler.handle(delivery).await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(
            h.subscriptions.status_of("SUB-1").await,
            Some(SubscriptionStatus::Active)
        );
    }

    #[tokio::test]
    async fn pending_status_is_acknowledged_without_transition() {
        let h = harness();
        h.orders.insert_pending("ORD-3").await;

        let outcome = h
            .handler
            .handle(signed_delivery(&pay_payload("ORD-3", "PENDING", "TX-4")))
            .await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(h.orders.status_of("ORD-3").await, Some(OrderStatus::Pending));
    }

    // ══════════════════════════════════════════════════════════════
    // Idempotency Tests
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn duplicate_delivery_does_not_reapply() {
        let h = harness();
        h.orders.insert_pending("ORD-4").await;
        let payload = pay_payload("ORD-4", "SUCCESS", "TX-5");

        let first = h.handler.handle(signed_delivery(&payload)).await;
        let second = h.handler.handle(signed_delivery(&payload)).await;

        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(second.message, "Event already processed");
        assert_eq!(h.orders.status_of("ORD-4").await, Some(OrderStatus::Paid));

        // Both calls leave a row; only one owns the dedup key.
        let rows = h.events.rows.lock().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows.iter().filter(|r| r.dedup_key.is_some()).count(),
            1
        );
        drop(rows);

        assert!(h
            .audit
            .types()
            .await
            .contains(&AuditEventType::KashierWebhookDuplicate));
    }

    #[tokio::test]
    async fn settled_order_yields_duplicate_not_error() {
        let h = harness();
        h.orders.insert_pending("ORD-5").await;
        h.handler
            .handle(signed_delivery(&pay_payload("ORD-5", "SUCCESS", "TX-6")))
            .await;

        // Same reference, different transaction: conditional update catches it.
        let outcome = h
            .handler
            .handle(signed_delivery(&pay_payload("ORD-5", "SUCCESS", "TX-7")))
            .await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(outcome.message, "Event already processed");
        assert_eq!(h.orders.status_of("ORD-5").await, Some(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn concurrent_duplicate_deliveries_apply_once() {
        let events = Arc::new(SlowLookupEvents {
            inner: MemoryEvents::default(),
        });
        let subscriptions = Arc::new(MemorySubscriptions::default());
        let audit = Arc::new(MemoryAudit::default());
        subscriptions.insert_pending("SUB-2").await;

        let handler = HandleKashierWebhook::new(
            KashierWebhookVerifier::new(300),
            Arc::new(StaticSecrets),
            Arc::new(InMemoryRateLimiter::with_defaults()),
            events.clone(),
            Arc::new(MemoryOrders::default()),
            subscriptions.clone(),
            audit.clone(),
        );

        // Subscription settlement: activate accepts renewals, so without
        // the claim both racers would transition.
        let mut delivery = signed_delivery(&pay_payload("SUB-2", "SUCCESS", "TX-RENEW"));
        delivery.via_subscription_endpoint = true;

        let (first, second) =
            tokio::join!(handler.handle(delivery.clone()), handler.handle(delivery));

        assert_eq!(first.status, StatusCode::OK);
        assert_eq!(second.status, StatusCode::OK);
        let messages = [first.message.as_str(), second.message.as_str()];
        assert!(messages.contains(&"Webhook processed"));
        assert!(messages.contains(&"Event already processed"));

        assert_eq!(
            subscriptions.status_of("SUB-2").await,
            Some(SubscriptionStatus::Active)
        );

        // One row owns the identity, one transition was audited.
        let rows = events.inner.rows.lock().await;
        assert_eq!(rows.iter().filter(|r| r.dedup_key.is_some()).count(), 1);
        drop(rows);
        let applied = audit
            .types()
            .await
            .iter()
            .filter(|t| **t == AuditEventType::KashierWebhookApplied)
            .count();
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn failed_delivery_releases_identity_for_retry() {
        let h = harness();
        let payload = pay_payload("ORD-14", "SUCCESS", "TX-17");

        // Webhook outruns checkout persistence: 500, gateway will retry.
        let first = h.handler.handle(signed_delivery(&payload)).await;
        assert_eq!(first.status, StatusCode::INTERNAL_SERVER_ERROR);

        h.orders.insert_pending("ORD-14").await;
        let second = h.handler.handle(signed_delivery(&payload)).await;

        assert_eq!(second.status, StatusCode::OK);
        assert_eq!(second.message, "Webhook processed");
        assert_eq!(h.orders.status_of("ORD-14").await, Some(OrderStatus::Paid));
    }

    // ══════════════════════════════════════════════════════════════
    // Verification Failure Tests
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn missing_signature_header_is_400() {
        let h = harness();
        h.orders.insert_pending("ORD-6").await;

        let mut delivery = signed_delivery(&pay_payload("ORD-6", "SUCCESS", "TX-8"));
        delivery.signature = None;

        let outcome = h.handler.handle(delivery).await;

        assert_eq!(outcome.status, StatusCode::BAD_REQUEST);
        assert_eq!(h.orders.status_of("ORD-6").await, Some(OrderStatus::Pending));

        let rows = h.events.rows.lock().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].processing_status, ProcessingStatus::Rejected);
        assert!(!rows[0].signature_verified);
    }

    #[tokio::test]
    async fn invalid_signature_is_401_and_recorded() {
        let h = harness();
        h.orders.insert_pending("ORD-7").await;

        let mut delivery = signed_delivery(&pay_payload("ORD-7", "SUCCESS", "TX-9"));
        delivery.signature = Some("deadbeef".to_string());

        let outcome = h.handler.handle(delivery).await;

        assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
        assert_eq!(h.orders.status_of("ORD-7").await, Some(OrderStatus::Pending));

        let rows = h.events.rows.lock().await;
        assert!(!rows[0].signature_verified);
        drop(rows);

        assert!(h
            .audit
            .types()
            .await
            .contains(&AuditEventType::KashierWebhookRejected));
    }

    #[tokio::test]
    async fn stale_timestamp_is_401() {
        let h = harness();
        let payload = pay_payload("ORD-8", "SUCCESS", "TX-10");
        let stale = Timestamp::now().as_unix_secs() as i64 - 3600;
        let secret = SecretString::new(SECRET.to_string());

        let delivery = WebhookDelivery {
            raw_body: payload.as_bytes().to_vec(),
            signature: Some(KashierWebhookVerifier::sign(
                &secret,
                stale,
                payload.as_bytes(),
            )),
            timestamp: Some(stale.to_string()),
            source_ip: Some("203.0.113.1".to_string()),
            via_subscription_endpoint: false,
        };

        let outcome = h.handler.handle(delivery).await;
        assert_eq!(outcome.status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn malformed_payload_after_valid_signature_is_400() {
        let h = harness();
        let payload = r#"{"event":"pay","data":{"status":"SUCCESS"}}"#;

        let outcome = h.handler.handle(signed_delivery(payload)).await;

        assert_eq!(outcome.status, StatusCode::BAD_REQUEST);
        let rows = h.events.rows.lock().await;
        assert_eq!(rows[0].processing_status, ProcessingStatus::Rejected);
        assert!(rows[0].signature_verified);
    }

    #[tokio::test]
    async fn unknown_event_type_is_acknowledged() {
        let h = harness();
        let payload = r#"{"event":"chargeback","data":{"merchantOrderId":"ORD-9","status":"SUCCESS"}}"#;

        let outcome = h.handler.handle(signed_delivery(payload)).await;

        assert_eq!(outcome.status, StatusCode::OK);
        let rows = h.events.rows.lock().await;
        assert_eq!(rows[0].processing_status, ProcessingStatus::Ignored);
    }

    // ══════════════════════════════════════════════════════════════
    // Rate Limiting Tests
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn ip_over_limit_is_429_before_verification() {
        let h = harness_with_limiter(Arc::new(InMemoryRateLimiter::new(tight_ip_config(2))));
        h.orders.insert_pending("ORD-10").await;

        // Unsigned deliveries: the gate runs before header checks.
        let mut delivery = signed_delivery(&pay_payload("ORD-10", "SUCCESS", "TX-11"));
        delivery.signature = None;

        h.handler.handle(delivery.clone()).await;
        h.handler.handle(delivery.clone()).await;
        let third = h.handler.handle(delivery).await;

        assert_eq!(third.status, StatusCode::TOO_MANY_REQUESTS);
        assert!(third.retry_after_secs.unwrap_or(0) > 0);

        // The denied response still reports the exhausted budget.
        let budget = third.rate_limit.expect("budget on 429");
        assert_eq!(budget.limit, 2);
        assert_eq!(budget.remaining, 0);

        assert!(h
            .audit
            .types()
            .await
            .contains(&AuditEventType::KashierWebhookRateLimited));

        // The denied call still left a row.
        let rows = h.events.rows.lock().await;
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].processing_status, ProcessingStatus::Rejected);
    }

    #[tokio::test]
    async fn card_scope_denial_is_429() {
        let h = harness();
        h.orders.insert_pending("ORD-11").await;

        // Exhaust the card budget directly, then deliver.
        for _ in 0..11 {
            let _ = h
                .handler
                .rate_limiter
                .check(RateLimitScope::Card, "tok-hot")
                .await
                .unwrap();
        }

        let payload = r#"{"event":"pay","data":{"merchantOrderId":"ORD-11","status":"SUCCESS","transactionId":"TX-12","cardToken":"tok-hot"}}"#;
        let outcome = h.handler.handle(signed_delivery(payload)).await;

        assert_eq!(outcome.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(h.orders.status_of("ORD-11").await, Some(OrderStatus::Pending));
        assert_eq!(outcome.rate_limit.map(|b| b.remaining), Some(0));
    }

    #[tokio::test]
    async fn limiter_outage_fails_open() {
        let h = harness_with_limiter(Arc::new(FailingLimiter));
        h.orders.insert_pending("ORD-12").await;

        let outcome = h
            .handler
            .handle(signed_delivery(&pay_payload("ORD-12", "SUCCESS", "TX-13")))
            .await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(h.orders.status_of("ORD-12").await, Some(OrderStatus::Paid));
        // No budget info to report when the store is down.
        assert!(outcome.rate_limit.is_none());
    }

    // ══════════════════════════════════════════════════════════════
    // Missing Record Tests
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn unknown_order_is_500_and_retryable() {
        let h = harness();

        let outcome = h
            .handler
            .handle(signed_delivery(&pay_payload("ORD-GONE", "SUCCESS", "TX-14")))
            .await;

        assert_eq!(outcome.status, StatusCode::INTERNAL_SERVER_ERROR);

        let rows = h.events.rows.lock().await;
        assert_eq!(rows[0].processing_status, ProcessingStatus::Failed);
        // Failure does not consume the idempotency identity.
        assert!(rows[0].dedup_key.is_none());
    }

    #[tokio::test]
    async fn refund_transitions_paid_order() {
        let h = harness();
        h.orders.insert_pending("ORD-13").await;
        h.handler
            .handle(signed_delivery(&pay_payload("ORD-13", "SUCCESS", "TX-15")))
            .await;

        let refund = r#"{"event":"refund","data":{"merchantOrderId":"ORD-13","status":"SUCCESS","transactionId":"TX-16"}}"#;
        let outcome = h.handler.handle(signed_delivery(refund)).await;

        assert_eq!(outcome.status, StatusCode::OK);
        assert_eq!(h.orders.status_of("ORD-13").await, Some(OrderStatus::Refunded));
    }
}
