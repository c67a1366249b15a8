use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{AppError, Result};
use crate::models::{Customer, Id, Payment, Subscription, WebhookEvent, WebhookProcessingStatus};

/// The transactional store backing customers, subscriptions, payments, and
/// webhook events.
///
/// A real deployment would back this with a relational database and rely
/// on its unique constraints and row-level locking. Here a single
/// `tokio::sync::Mutex` over all four tables plays the same role for a
/// single process: holding the guard across a dispatch gives an "insert
/// and its effects commit together, or neither does" guarantee, and
/// checking uniqueness under that same guard gives the `(provider,
/// event_id)` constraint its atomicity.
pub struct Store {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    customers: HashMap<Id, Customer>,
    subscriptions: HashMap<Id, Subscription>,
    payments: HashMap<Id, Payment>,
    webhook_events: HashMap<Id, WebhookEvent>,
    next_customer_id: Id,
    next_subscription_id: Id,
    next_payment_id: Id,
    next_event_id: Id,
}

/// A held lock over the whole store, acting as the "transaction" in which
/// a dispatch's reads and writes occur.
pub struct Txn<'a> {
    guard: MutexGuard<'a, Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn begin(&self) -> Txn<'_> {
        Txn {
            guard: self.inner.lock().await,
        }
    }
}

impl<'a> Txn<'a> {
    // ---- Customers -----------------------------------------------------

    pub fn get_customer(&self, id: Id) -> Option<Customer> {
        self.guard.customers.get(&id).cloned()
    }

    pub fn find_customer_by_email(&self, email: &str) -> Option<Customer> {
        self.guard.customers.values().find(|c| c.email == email).cloned()
    }

    pub fn find_customer_by_provider_id(&self, provider_customer_id: &str) -> Option<Customer> {
        self.guard
            .customers
            .values()
            .find(|c| c.provider_customer_id.as_deref() == Some(provider_customer_id))
            .cloned()
    }

    pub fn insert_customer(&mut self, email: String, status: Option<String>) -> Customer {
        self.guard.next_customer_id += 1;
        let id = self.guard.next_customer_id;
        let customer = Customer {
            id,
            provider_customer_id: None,
            email,
            status,
            created_at: crate::models::now(),
        };
        self.guard.customers.insert(id, customer.clone());
        customer
    }

    pub fn save_customer(&mut self, customer: Customer) {
        self.guard.customers.insert(customer.id, customer);
    }

    // ---- Subscriptions ---------------------------------------------------

    pub fn get_subscription(&self, id: Id) -> Option<Subscription> {
        self.guard.subscriptions.get(&id).cloned()
    }

    pub fn find_subscription_by_provider_id(&self, provider_subscription_id: &str) -> Option<Subscription> {
        self.guard
            .subscriptions
            .values()
            .find(|s| s.provider_subscription_id == provider_subscription_id)
            .cloned()
    }

    pub fn list_subscriptions_by_status(
        &self,
        status: crate::models::SubscriptionStatus,
    ) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .guard
            .subscriptions
            .values()
            .filter(|s| s.status == status)
            .cloned()
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    pub fn insert_subscription(&mut self, subscription: Subscription) -> Subscription {
        self.guard.next_subscription_id += 1;
        let id = self.guard.next_subscription_id;
        let mut subscription = subscription;
        subscription.id = id;
        self.guard.subscriptions.insert(id, subscription.clone());
        subscription
    }

    pub fn save_subscription(&mut self, subscription: Subscription) {
        self.guard.subscriptions.insert(subscription.id, subscription);
    }

    // ---- Payments ----------------------------------------------------

    pub fn list_payments_for_subscription(&self, subscription_id: Id) -> Vec<Payment> {
        self.guard
            .payments
            .values()
            .filter(|p| p.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    pub fn insert_payment(&mut self, mut payment: Payment) -> Payment {
        self.guard.next_payment_id += 1;
        payment.id = self.guard.next_payment_id;
        self.guard.payments.insert(payment.id, payment.clone());
        payment
    }

    // ---- Webhook events --------------------------------------------------

    pub fn find_event_by_composite(&self, provider: &str, event_id: &str) -> Option<WebhookEvent> {
        self.guard
            .webhook_events
            .values()
            .find(|e| e.provider == provider && e.event_id == event_id)
            .cloned()
    }

    /// Inserts a new event, raising `Internal` if `(provider, event_id)`
    /// already exists — the in-process analogue of a unique-constraint
    /// violation a real database would raise under a race.
    pub fn insert_event(&mut self, event: WebhookEvent) -> Result<WebhookEvent> {
        if self.find_event_by_composite(&event.provider, &event.event_id).is_some() {
            return Err(AppError::Internal("duplicate (provider, event_id)".to_string()));
        }
        self.guard.next_event_id += 1;
        let mut event = event;
        event.id = self.guard.next_event_id;
        self.guard.webhook_events.insert(event.id, event.clone());
        Ok(event)
    }

    pub fn save_event(&mut self, event: WebhookEvent) {
        self.guard.webhook_events.insert(event.id, event);
    }

    pub fn list_events_desc(&self) -> Vec<WebhookEvent> {
        let mut events: Vec<WebhookEvent> = self.guard.webhook_events.values().cloned().collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.id));
        events
    }

    pub fn find_event_by_event_id(&self, event_id: &str, provider: Option<&str>) -> Result<WebhookEvent> {
        let mut matches: Vec<WebhookEvent> = self
            .guard
            .webhook_events
            .values()
            .filter(|e| e.event_id == event_id)
            .filter(|e| provider.map(|p| e.provider == p).unwrap_or(true))
            .cloned()
            .collect();
        match matches.len() {
            0 => Err(AppError::NotFound(format!("webhook '{event_id}' not found"))),
            1 => Ok(matches.remove(0)),
            _ => Err(AppError::InvalidPayload(
                "multiple events found; specify provider".to_string(),
            )),
        }
    }

    /// Rows eligible for automatic retry: failed, not flagged for operator
    /// attention, and either never scheduled or due. Ordered by insertion
    /// id ascending so retries are FIFO under contention.
    pub fn find_retry_candidates(&self, limit: usize, now: chrono::NaiveDateTime) -> Vec<WebhookEvent> {
        let mut candidates: Vec<WebhookEvent> = self
            .guard
            .webhook_events
            .values()
            .filter(|e| e.processing_status == WebhookProcessingStatus::Failed)
            .filter(|e| !e.needs_attention)
            .filter(|e| e.next_retry_at.map(|t| t <= now).unwrap_or(true))
            .cloned()
            .collect();
        candidates.sort_by_key(|e| e.id);
        candidates.truncate(limit);
        candidates
    }
}
