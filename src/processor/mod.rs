//! Account-open message processor
//!
//! Consumes batches of queued account-open events and reports per-record
//! failures back to the queue for redelivery. Which branch a record takes
//! depends on the region's configured role crossed with the live failover
//! marker: the designated region creates accounts through the idempotency
//! guard, the other region verifies the work happened and drops the
//! duplicate delivery.

use crate::domain::{Account, AccountEvent};
use crate::error::{Result, TradeGuardError};
use crate::failover::{ModeProvider, RegionRole};
use crate::idempotency::{IdempotencyGuard, IdempotencyStore};
use crate::persistence::AccountStore;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Synthetic traffic marker. Test users are processed in every region so
/// cross-region smoke checks work without flipping the failover marker.
pub const SYNTHETIC_TEST_MARKER: &str = "greentest_";

/// One queued message as delivered by the event source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub message_id: String,
    /// Queue envelope JSON; the account event lives in its nested
    /// `Message` string field
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Redelivery contract: only the listed records are retried, everything
/// else in the batch is considered consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl BatchResponse {
    pub fn is_clean(&self) -> bool {
        self.batch_item_failures.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct QueueEnvelope {
    #[serde(rename = "Message")]
    message: String,
}

/// Unwrap the queue envelope and parse the nested account event
pub fn parse_account_event(body: &str) -> Result<AccountEvent> {
    let envelope: QueueEnvelope = serde_json::from_str(body)
        .map_err(|e| TradeGuardError::MalformedEvent(format!("bad envelope: {}", e)))?;
    serde_json::from_str(&envelope.message)
        .map_err(|e| TradeGuardError::MalformedEvent(format!("bad account event: {}", e)))
}

/// Minimal queue contract: hand out a bounded batch, take back the records
/// that must be redelivered.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn receive_batch(&self, max: usize) -> Result<Vec<EventRecord>>;

    async fn redeliver(&self, failures: &[BatchItemFailure]) -> Result<()>;
}

/// In-memory queue for tests and local runs. Received records stay
/// in-flight until either the next receive (consumed) or a redeliver call
/// puts them back at the end of the line.
pub struct MemoryQueue {
    ready: Mutex<VecDeque<EventRecord>>,
    in_flight: Mutex<Vec<EventRecord>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub async fn push(&self, record: EventRecord) {
        self.ready.lock().await.push_back(record);
    }

    pub async fn pending(&self) -> usize {
        self.ready.lock().await.len()
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSource for MemoryQueue {
    async fn receive_batch(&self, max: usize) -> Result<Vec<EventRecord>> {
        let mut ready = self.ready.lock().await;
        let mut in_flight = self.in_flight.lock().await;
        in_flight.clear();
        let take = max.min(ready.len());
        let batch: Vec<EventRecord> = ready.drain(..take).collect();
        in_flight.extend(batch.iter().cloned());
        Ok(batch)
    }

    async fn redeliver(&self, failures: &[BatchItemFailure]) -> Result<()> {
        let mut ready = self.ready.lock().await;
        let in_flight = self.in_flight.lock().await;
        for failure in failures {
            if let Some(record) = in_flight
                .iter()
                .find(|r| r.message_id == failure.item_identifier)
            {
                ready.push_back(record.clone());
            }
        }
        Ok(())
    }
}

/// Batch consumer for account-open events
pub struct MessageProcessor<A: ?Sized, S: ?Sized, M: ?Sized> {
    accounts: Arc<A>,
    guard: IdempotencyGuard<S>,
    mode: Arc<M>,
    role: RegionRole,
    max_concurrency: usize,
}

impl<A, S, M> MessageProcessor<A, S, M>
where
    A: AccountStore + ?Sized,
    S: IdempotencyStore + ?Sized,
    M: ModeProvider + ?Sized,
{
    pub fn new(
        accounts: Arc<A>,
        guard: IdempotencyGuard<S>,
        mode: Arc<M>,
        role: RegionRole,
        max_concurrency: usize,
    ) -> Self {
        Self {
            accounts,
            guard,
            mode,
            role,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Process one batch, returning the records to redeliver.
    ///
    /// The failover marker is probed once so the whole batch sees a
    /// consistent mode; a probe failure is an operational error that fails
    /// the batch loudly rather than guessing a mode.
    pub async fn process_batch(&self, batch: Vec<EventRecord>) -> Result<BatchResponse> {
        let passive = self.mode.is_passive().await?;
        debug!(
            role = ?self.role,
            passive,
            records = batch.len(),
            "processing account event batch"
        );

        let outcomes = stream::iter(batch.into_iter().map(|record| async move {
            let message_id = record.message_id.clone();
            match self.handle_record(&record, passive).await {
                Ok(()) => None,
                Err(e) => {
                    warn!(message_id = %message_id, "record failed: {}", e);
                    Some(BatchItemFailure {
                        item_identifier: message_id,
                    })
                }
            }
        }))
        .buffer_unordered(self.max_concurrency)
        .collect::<Vec<_>>()
        .await;

        let batch_item_failures: Vec<BatchItemFailure> =
            outcomes.into_iter().flatten().collect();
        if !batch_item_failures.is_empty() {
            info!(
                failed = batch_item_failures.len(),
                "batch finished with records queued for redelivery"
            );
        }
        Ok(BatchResponse {
            batch_item_failures,
        })
    }

    async fn handle_record(&self, record: &EventRecord, passive: bool) -> Result<()> {
        let event = parse_account_event(&record.body)?;

        let synthetic = event.user_id.contains(SYNTHETIC_TEST_MARKER);
        let designated = match self.role {
            RegionRole::Primary => !passive,
            RegionRole::Recovery => passive,
        };

        if designated || synthetic {
            self.create_account(event).await.map(|_| ())
        } else {
            self.verify_created_elsewhere(&event).await
        }
    }

    /// Create the account through the idempotency guard, keyed by the
    /// caller's request token.
    async fn create_account(&self, event: AccountEvent) -> Result<Account> {
        let token = event.request_token.clone();
        let accounts = Arc::clone(&self.accounts);
        let account = self
            .guard
            .execute(Some(&token), || async move {
                let account = Account::from_event(event);
                accounts.put_account(&account).await?;
                info!(
                    account_id = %account.account_id,
                    user_id = %account.user_id,
                    "account created"
                );
                Ok(account)
            })
            .await?;
        Ok(account)
    }

    /// The other region owns this record. Confirm its work landed, then
    /// drop the duplicate delivery; if the account is missing, report the
    /// record for redelivery until the owner catches up.
    async fn verify_created_elsewhere(&self, event: &AccountEvent) -> Result<()> {
        match self
            .accounts
            .find_account_id(&event.user_id, &event.request_token)
            .await?
        {
            Some(account_id) => {
                debug!(
                    account_id = %account_id,
                    user_id = %event.user_id,
                    "account already created by the active region, dropping record"
                );
                Ok(())
            }
            None => {
                error!(
                    user_id = %event.user_id,
                    "account not yet visible from the active region, redelivering"
                );
                Err(TradeGuardError::AccountNotFound {
                    user_id: event.user_id.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Beneficiary, Instructions, Suitability};
    use crate::failover::{MarkerModeProvider, MemoryMarkerStore, FAILOVER_MARKER_KEY};
    use crate::persistence::MemoryStore;

    fn account_event(user_id: &str, token: &str) -> AccountEvent {
        AccountEvent {
            customer_first_name: "Ada".to_string(),
            customer_last_name: "Lovelace".to_string(),
            account_type: "brokerage".to_string(),
            comment: String::new(),
            beneficiaries: vec![Beneficiary {
                name: "Byron".to_string(),
                percent: 100,
            }],
            suitability: Suitability {
                liquidity: "high".to_string(),
                time_horizon: "long".to_string(),
                risk_tolerance: "moderate".to_string(),
            },
            instructions: Instructions {
                dividends: "reinvest".to_string(),
            },
            request_token: token.to_string(),
            user_id: user_id.to_string(),
        }
    }

    fn record(message_id: &str, event: &AccountEvent) -> EventRecord {
        let body = serde_json::json!({
            "Message": serde_json::to_string(event).unwrap(),
        });
        EventRecord {
            message_id: message_id.to_string(),
            body: body.to_string(),
        }
    }

    fn processor(
        store: Arc<MemoryStore>,
        marker: Arc<MemoryMarkerStore>,
        role: RegionRole,
    ) -> MessageProcessor<MemoryStore, MemoryStore, MarkerModeProvider<MemoryMarkerStore>> {
        MessageProcessor::new(
            Arc::clone(&store),
            IdempotencyGuard::with_ttl_secs(store, 10_800),
            Arc::new(MarkerModeProvider::new(marker, FAILOVER_MARKER_KEY)),
            role,
            8,
        )
    }

    #[tokio::test]
    async fn active_primary_creates_accounts() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());
        let p = processor(Arc::clone(&store), marker, RegionRole::Primary);

        let event = account_event("user-1", "tok-1");
        let response = p
            .process_batch(vec![record("m-1", &event)])
            .await
            .unwrap();

        assert!(response.is_clean());
        assert!(store
            .find_account_id("user-1", "tok-1")
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.account_writes(), 1);
    }

    #[tokio::test]
    async fn duplicate_delivery_creates_one_account() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());
        let p = processor(Arc::clone(&store), marker, RegionRole::Primary);

        let event = account_event("user-1", "tok-1");
        p.process_batch(vec![record("m-1", &event)]).await.unwrap();
        p.process_batch(vec![record("m-2", &event)]).await.unwrap();

        assert_eq!(store.account_writes(), 1);
    }

    #[tokio::test]
    async fn passive_primary_drops_verified_records() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());

        // Recovery region did the work
        marker.set_marker(FAILOVER_MARKER_KEY);
        let recovery = processor(Arc::clone(&store), Arc::clone(&marker), RegionRole::Recovery);
        let event = account_event("user-1", "tok-1");
        let response = recovery
            .process_batch(vec![record("m-1", &event)])
            .await
            .unwrap();
        assert!(response.is_clean());
        assert_eq!(store.account_writes(), 1);

        // Primary sees the marker, verifies, and drops its copy
        let primary = processor(Arc::clone(&store), marker, RegionRole::Primary);
        let response = primary
            .process_batch(vec![record("m-2", &event)])
            .await
            .unwrap();
        assert!(response.is_clean());
        assert_eq!(store.account_writes(), 1);
    }

    #[tokio::test]
    async fn unverified_record_is_redelivered() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());
        marker.set_marker(FAILOVER_MARKER_KEY);
        let p = processor(Arc::clone(&store), marker, RegionRole::Primary);

        let event = account_event("user-1", "tok-1");
        let response = p
            .process_batch(vec![record("m-1", &event)])
            .await
            .unwrap();

        assert_eq!(response.batch_item_failures.len(), 1);
        assert_eq!(response.batch_item_failures[0].item_identifier, "m-1");
        assert_eq!(store.account_writes(), 0);
    }

    #[tokio::test]
    async fn synthetic_traffic_is_processed_even_when_passive() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());
        marker.set_marker(FAILOVER_MARKER_KEY);
        let p = processor(Arc::clone(&store), marker, RegionRole::Primary);

        let event = account_event("greentest_user-9", "tok-9");
        let response = p
            .process_batch(vec![record("m-1", &event)])
            .await
            .unwrap();

        assert!(response.is_clean());
        assert_eq!(store.account_writes(), 1);
    }

    #[tokio::test]
    async fn malformed_record_fails_alone() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());
        let p = processor(Arc::clone(&store), marker, RegionRole::Primary);

        let good = account_event("user-1", "tok-1");
        let batch = vec![
            EventRecord {
                message_id: "m-bad".to_string(),
                body: "{not json".to_string(),
            },
            record("m-good", &good),
        ];
        let response = p.process_batch(batch).await.unwrap();

        assert_eq!(response.batch_item_failures.len(), 1);
        assert_eq!(response.batch_item_failures[0].item_identifier, "m-bad");
        assert_eq!(store.account_writes(), 1);
    }

    #[tokio::test]
    async fn probe_failure_fails_the_whole_batch() {
        struct FailingMode;

        #[async_trait]
        impl ModeProvider for FailingMode {
            async fn is_passive(&self) -> Result<bool> {
                Err(TradeGuardError::FailoverProbe("store unreachable".into()))
            }
        }

        let store = Arc::new(MemoryStore::new());
        let p = MessageProcessor::new(
            Arc::clone(&store),
            IdempotencyGuard::with_ttl_secs(Arc::clone(&store), 10_800),
            Arc::new(FailingMode),
            RegionRole::Primary,
            8,
        );

        let event = account_event("user-1", "tok-1");
        let result = p.process_batch(vec![record("m-1", &event)]).await;
        assert!(matches!(result, Err(TradeGuardError::FailoverProbe(_))));
        assert_eq!(store.account_writes(), 0);
    }

    #[tokio::test]
    async fn missing_request_token_is_a_record_failure() {
        let store = Arc::new(MemoryStore::new());
        let marker = Arc::new(MemoryMarkerStore::new());
        let p = processor(Arc::clone(&store), marker, RegionRole::Primary);

        let event = account_event("user-1", "");
        let response = p
            .process_batch(vec![record("m-1", &event)])
            .await
            .unwrap();

        assert_eq!(response.batch_item_failures.len(), 1);
        assert_eq!(store.account_writes(), 0);
    }

    #[tokio::test]
    async fn memory_queue_redelivers_reported_failures() {
        let queue = MemoryQueue::new();
        let event = account_event("user-1", "tok-1");
        queue.push(record("m-1", &event)).await;
        queue.push(record("m-2", &event)).await;

        let batch = queue.receive_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.pending().await, 0);

        queue
            .redeliver(&[BatchItemFailure {
                item_identifier: "m-2".to_string(),
            }])
            .await
            .unwrap();
        let redelivered = queue.receive_batch(10).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].message_id, "m-2");
    }
}
