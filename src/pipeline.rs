//! Pickup Pipeline — the core state machine (component E, §4.E).
//!
//! Serialises message handling behind a single mutex, validates nonce
//! continuity, fans mutations out across orders/trades/users/activities,
//! and decides between commit, skip, and deferred-retry. Nothing here
//! throws: every path through [`Pipeline::handle`] returns a terminal
//! [`PickupOutcome`] the bus runner can log and move on from.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::bus::{Bus, BusMessage};
use crate::collateral;
use crate::decoder::{self, DecodeError};
use crate::metrics::MetricsCollector;
use crate::models::Activity;
use crate::planner::{self, Plan};
use crate::repository::{ActivityRepository, OrderRepository, TradeRepository, UserRepository};

/// Terminal status of one `handle` call. Never an `Err` the caller must
/// propagate — §7: "nothing throws out of `handle`".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickupOutcome {
    /// The event's mutations landed, the message was committed, and the
    /// saved-ack was published. `lastNonce` advanced.
    Committed,
    /// The message was poisoned (malformed, invalid nonce, or rejected) and
    /// was committed anyway so the consumer moves past it. No mutations ran.
    Skipped,
    /// A transient failure (nonce gap, repository write, bus commit/publish,
    /// or activity write) — the message was *not* committed and the bus
    /// will redeliver it.
    Deferred,
}

pub struct Pipeline<B, O, T, U, A> {
    bus: Arc<B>,
    orders: Arc<O>,
    trades: Arc<T>,
    users: Arc<U>,
    activities: Arc<A>,
    metrics: Arc<MetricsCollector>,
    last_nonce: Mutex<i64>,
}

impl<B, O, T, U, A> Pipeline<B, O, T, U, A>
where
    B: Bus,
    O: OrderRepository,
    T: TradeRepository,
    U: UserRepository,
    A: ActivityRepository,
{
    /// `last_nonce` must already be reconstructed from persisted Activities
    /// (max nonce, or 0 if none exist) before the pipeline starts taking
    /// messages — see §3 and §4.E.
    pub fn new(
        bus: Arc<B>,
        orders: Arc<O>,
        trades: Arc<T>,
        users: Arc<U>,
        activities: Arc<A>,
        metrics: Arc<MetricsCollector>,
        last_nonce: i64,
    ) -> Self {
        Self {
            bus,
            orders,
            trades,
            users,
            activities,
            metrics,
            last_nonce: Mutex::new(last_nonce),
        }
    }

    pub async fn last_nonce(&self) -> i64 {
        *self.last_nonce.lock().await
    }

    /// Handles one bus message end to end. Only one call runs at a time —
    /// the mutex guard is held for the whole method, so a second message
    /// can't start decoding until this one reaches a terminal state.
    pub async fn handle(&self, msg: BusMessage) -> PickupOutcome {
        let mut last_nonce = self.last_nonce.lock().await;

        let correlation_id = Uuid::new_v4().to_string();
        self.metrics.observe_start(&correlation_id, &msg.topic);

        let plan = match self.decode_and_plan(&msg) {
            Ok(Some(plan)) => plan,
            Ok(None) => {
                // Unsubscribed topic: no-op success, nothing to commit or
                // record. Shouldn't happen given the consumer's topic list,
                // but a no-op is the documented behaviour (§4.B).
                self.metrics.observe_end(&correlation_id, &msg.topic, true);
                return PickupOutcome::Committed;
            }
            Err(Poisoned) => {
                return self.commit_and_skip(&msg, &correlation_id).await;
            }
        };

        if plan.nonce != *last_nonce + 1 {
            tracing::error!(
                expected = *last_nonce + 1,
                got = plan.nonce,
                topic = %msg.topic,
                "nonce gap detected, awaiting redelivery"
            );
            self.metrics.observe_end(&correlation_id, &msg.topic, false);
            return PickupOutcome::Deferred;
        }

        if let Err(()) = self.apply_orders(&plan).await {
            self.metrics.observe_end(&correlation_id, &msg.topic, false);
            return PickupOutcome::Deferred;
        }

        if let Err(()) = self.apply_trades(&plan).await {
            self.metrics.observe_end(&correlation_id, &msg.topic, false);
            return PickupOutcome::Deferred;
        }

        if self.bus.commit(&msg).await.is_err() {
            tracing::error!(topic = %msg.topic, offset = msg.offset, "bus commit failed");
            self.metrics.observe_end(&correlation_id, &msg.topic, false);
            return PickupOutcome::Deferred;
        }

        if self.bus.publish(plan.saved_topic, &msg.value).await.is_err() {
            tracing::error!(topic = %plan.saved_topic, "saved-ack publish failed");
            self.metrics.observe_end(&correlation_id, &msg.topic, false);
            return PickupOutcome::Deferred;
        }

        let activity = Activity {
            id: correlation_id.clone(),
            nonce: plan.nonce,
            bus_offset: msg.offset,
            data: plan.activity_data.clone(),
            created_at: Utc::now(),
        };

        if self.activities.upsert(&activity).await.is_err() {
            tracing::error!(nonce = plan.nonce, "activity write failed after commit");
            self.metrics.observe_end(&correlation_id, &msg.topic, false);
            return PickupOutcome::Deferred;
        }

        *last_nonce = plan.nonce;
        self.metrics.observe_end(&correlation_id, &msg.topic, true);
        PickupOutcome::Committed
    }

    /// Decode + plan (4.B → 4.C). `Ok(None)` is the documented no-op path
    /// for topics this pipeline doesn't subscribe to; `Err` is any of the
    /// poisoned-message outcomes (malformed, invalid nonce, rejected),
    /// which all share the same commit-and-drop handling.
    fn decode_and_plan(&self, msg: &BusMessage) -> Result<Option<Plan>, Poisoned> {
        let event = match decoder::decode(&msg.topic, &msg.value) {
            Ok(Some(event)) => event,
            Ok(None) => return Ok(None),
            Err(DecodeError::Malformed { topic, source }) => {
                tracing::warn!(%topic, %source, "malformed payload, dropping");
                return Err(Poisoned);
            }
            Err(DecodeError::InvalidNonce { topic, nonce }) => {
                tracing::warn!(%topic, nonce, "invalid nonce, dropping");
                return Err(Poisoned);
            }
            Err(DecodeError::Rejected { nonce }) => {
                tracing::info!(nonce, "engine rejected event, dropping");
                return Err(Poisoned);
            }
        };

        match planner::plan(event) {
            Ok(plan) => Ok(Some(plan)),
            Err(err) => {
                tracing::warn!(%err, "failed to encode activity payload, dropping");
                Err(Poisoned)
            }
        }
    }

    async fn commit_and_skip(&self, msg: &BusMessage, correlation_id: &str) -> PickupOutcome {
        if let Err(err) = self.bus.commit(msg).await {
            tracing::error!(%err, topic = %msg.topic, "failed to commit poisoned message");
        }
        self.metrics.observe_end(correlation_id, &msg.topic, false);
        PickupOutcome::Skipped
    }

    async fn apply_orders(&self, plan: &Plan) -> Result<(), ()> {
        for order in &plan.orders {
            if let Err(err) = self.orders.upsert(order).await {
                tracing::error!(%err, order_id = %order.id, "order upsert failed");
                return Err(());
            }
        }
        Ok(())
    }

    async fn apply_trades(&self, plan: &Plan) -> Result<(), ()> {
        for trade in &plan.trades {
            if let Err(err) = self.trades.upsert(trade).await {
                tracing::error!(%err, trade_id = %trade.id, "trade upsert failed");
                return Err(());
            }

            if trade.is_failed() {
                continue;
            }

            self.adjust_collateral(trade, &trade.taker).await;
            self.adjust_collateral(trade, &trade.maker).await;
        }
        Ok(())
    }

    /// Per §4.D: a leg whose user can't be found is logged and skipped, not
    /// treated as a pipeline failure — the event as a whole still commits.
    async fn adjust_collateral(&self, trade: &crate::models::Trade, leg: &crate::models::Leg) {
        let account = match self.users.find_by_id(&leg.user_id).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::warn!(user_id = %leg.user_id, trade_id = %trade.id, "user not found, skipping collateral adjustment");
                return;
            }
            Err(err) => {
                tracing::error!(%err, user_id = %leg.user_id, "user lookup failed, skipping collateral adjustment");
                return;
            }
        };

        let mut account = account;
        collateral::apply_leg(&mut account, trade, leg);

        if let Err(err) = self.users.upsert(&account).await {
            tracing::error!(%err, user_id = %leg.user_id, "user collateral upsert failed");
        }
    }
}

/// Internal marker for the "commit + drop + metric-fail" branch shared by
/// malformed payloads, invalid nonces, and rejected events (§4.B/§4.E).
struct Poisoned;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryBus;
    use crate::bus::{TOPIC_CANCELLED_ORDER, TOPIC_ENGINE, TOPIC_ENGINE_SAVED};
    use crate::models::{Balance, Collaterals, UserAccount};
    use crate::repository::memory::InMemoryRepositories;
    use rust_decimal_macros::dec;

    fn make_pipeline(
        last_nonce: i64,
    ) -> Pipeline<InMemoryBus, InMemoryRepositories, InMemoryRepositories, InMemoryRepositories, InMemoryRepositories>
    {
        let repos = Arc::new(InMemoryRepositories::new());
        Pipeline::new(
            Arc::new(InMemoryBus::new()),
            repos.clone(),
            repos.clone(),
            repos.clone(),
            repos,
            Arc::new(MetricsCollector::new()),
            last_nonce,
        )
    }

    fn engine_msg(nonce: i64, offset: i64) -> BusMessage {
        let payload = serde_json::json!({
            "nonce": nonce,
            "status": "accepted",
            "matches": {
                "takerOrder": {"_id": "taker-1"},
                "makerOrders": [{"_id": "maker-1"}],
                "trades": [{
                    "_id": "trade-1",
                    "price": "100",
                    "amount": "2",
                    "status": "ok",
                    "taker": {"userId": "taker-1", "side": "buy", "fee": "1"},
                    "maker": {"userId": "maker-1", "side": "sell", "fee": "0.5"},
                    "instrument": "BTC-PERP",
                }],
            },
            "createdAt": "2026-01-01T00:00:00Z",
        });

        BusMessage {
            topic: TOPIC_ENGINE.to_string(),
            partition: 0,
            offset,
            value: payload.to_string().into_bytes(),
        }
    }

    fn seeded_user(id: &str, usd: rust_decimal::Decimal) -> UserAccount {
        UserAccount {
            id: id.to_string(),
            collaterals: Collaterals {
                balances: vec![Balance {
                    currency: "USD".into(),
                    amount: usd,
                }],
                contracts: vec![],
            },
        }
    }

    #[tokio::test]
    async fn s1_happy_path_in_order() {
        let pipeline = make_pipeline(5);
        pipeline
            .users
            .seed_user(seeded_user("taker-1", dec!(1000)));
        pipeline
            .users
            .seed_user(seeded_user("maker-1", dec!(1000)));

        let outcome = pipeline.handle(engine_msg(6, 100)).await;

        assert_eq!(outcome, PickupOutcome::Committed);
        assert_eq!(pipeline.last_nonce().await, 6);
        assert_eq!(pipeline.orders.orders.lock().len(), 2);
        assert_eq!(pipeline.trades.trades.lock().len(), 1);
        assert_eq!(pipeline.bus.published.lock().len(), 1);
        assert_eq!(pipeline.bus.published.lock()[0].0, TOPIC_ENGINE_SAVED);
        assert_eq!(pipeline.bus.committed.lock().len(), 1);
        assert_eq!(pipeline.activities.activities.lock().len(), 1);

        let taker = pipeline.users.find_by_id("taker-1").await.unwrap().unwrap();
        assert_eq!(taker.collaterals.balances[0].amount, dec!(799));

        let maker = pipeline.users.find_by_id("maker-1").await.unwrap().unwrap();
        assert_eq!(maker.collaterals.balances[0].amount, dec!(1199.5));
    }

    #[tokio::test]
    async fn s2_nonce_gap_defers_without_side_effects() {
        let pipeline = make_pipeline(5);
        let outcome = pipeline.handle(engine_msg(7, 100)).await;

        assert_eq!(outcome, PickupOutcome::Deferred);
        assert_eq!(pipeline.last_nonce().await, 5);
        assert!(pipeline.bus.committed.lock().is_empty());
        assert!(pipeline.activities.activities.lock().is_empty());
    }

    #[tokio::test]
    async fn s3_malformed_payload_commits_and_drops() {
        let pipeline = make_pipeline(5);
        let msg = BusMessage {
            topic: TOPIC_ENGINE.to_string(),
            partition: 0,
            offset: 1,
            value: b"not json".to_vec(),
        };

        let outcome = pipeline.handle(msg).await;

        assert_eq!(outcome, PickupOutcome::Skipped);
        assert_eq!(pipeline.last_nonce().await, 5);
        assert_eq!(pipeline.bus.committed.lock().len(), 1);
        assert!(pipeline.activities.activities.lock().is_empty());
    }

    #[tokio::test]
    async fn s4_rejected_event_commits_and_drops_without_advancing() {
        let pipeline = make_pipeline(5);
        let payload = serde_json::json!({
            "nonce": 6,
            "status": "rejected",
            "matches": {},
            "createdAt": "2026-01-01T00:00:00Z",
        });
        let msg = BusMessage {
            topic: TOPIC_ENGINE.to_string(),
            partition: 0,
            offset: 1,
            value: payload.to_string().into_bytes(),
        };

        let outcome = pipeline.handle(msg).await;

        assert_eq!(outcome, PickupOutcome::Skipped);
        assert_eq!(pipeline.last_nonce().await, 5);
        assert_eq!(pipeline.bus.committed.lock().len(), 1);
        assert!(pipeline.orders.orders.lock().is_empty());
    }

    #[tokio::test]
    async fn s5_cancellation_batch_upserts_orders_only() {
        let pipeline = make_pipeline(5);
        let payload = serde_json::json!({
            "nonce": 6,
            "query": {"symbol": "BTC-PERP"},
            "data": [{"_id": "o1"}, {"_id": "o2"}],
        });
        let msg = BusMessage {
            topic: TOPIC_CANCELLED_ORDER.to_string(),
            partition: 0,
            offset: 1,
            value: payload.to_string().into_bytes(),
        };

        let outcome = pipeline.handle(msg).await;

        assert_eq!(outcome, PickupOutcome::Committed);
        assert_eq!(pipeline.last_nonce().await, 6);
        assert_eq!(pipeline.orders.orders.lock().len(), 2);
        assert!(pipeline.trades.trades.lock().is_empty());
        assert_eq!(
            pipeline.bus.published.lock()[0].0,
            crate::bus::TOPIC_CANCELLED_ORDER_SAVED
        );
    }

    #[tokio::test]
    async fn repository_write_failure_defers_without_committing() {
        let pipeline = make_pipeline(5);
        *pipeline.bus.fail_commit.lock() = true;

        let outcome = pipeline.handle(engine_msg(6, 1)).await;

        assert_eq!(outcome, PickupOutcome::Deferred);
        assert_eq!(pipeline.last_nonce().await, 5);
        // Orders/trades were applied (idempotent upserts) even though the
        // bus commit failed — replay is safe per §4.E.
        assert_eq!(pipeline.orders.orders.lock().len(), 2);
    }

    #[tokio::test]
    async fn missing_user_does_not_abort_the_event() {
        let pipeline = make_pipeline(5);
        // Neither taker-1 nor maker-1 seeded.
        let outcome = pipeline.handle(engine_msg(6, 1)).await;

        assert_eq!(outcome, PickupOutcome::Committed);
        assert_eq!(pipeline.last_nonce().await, 6);
        assert!(pipeline.users.find_by_id("taker-1").await.unwrap().is_none());
    }
}
