//! Repository abstraction (component E collaborator, §6).
//!
//! The pipeline never talks to the document store directly: it depends on
//! one narrow trait per collection, mirroring the Go source's
//! `interfaces.Repository[T]` generic but split per collection because each
//! one needs a different extra operation (`User` needs a point lookup,
//! `Activity` needs the max-nonce aggregate, `System` needs create-if-absent).
//!
//! [`MongoRepositories`] is the real implementation over the `mongodb` driver.
//! [`memory`] provides in-memory fakes used by the pipeline's own unit tests
//! and by anything downstream that wants to exercise the pipeline without a
//! live Mongo instance.

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::{FindOneAndUpdateOptions, ReturnDocument};
use mongodb::{Collection, Database};
use thiserror::Error;

use crate::models::{Activity, Order, SystemStatus, Trade, UserAccount};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("document store error: {0}")]
    Store(#[from] mongodb::error::Error),
    #[error("failed to (de)serialize document: {0}")]
    Bson(String),
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn upsert(&self, order: &Order) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn upsert(&self, trade: &Trade) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserAccount>, RepositoryError>;
    async fn upsert(&self, user: &UserAccount) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    async fn upsert(&self, activity: &Activity) -> Result<(), RepositoryError>;
    /// `max(nonce)` over every persisted activity, or `None` if the
    /// collection is empty. Used to reconstruct `lastNonce` on startup and
    /// by the nonce monitor on every tick.
    async fn max_nonce(&self) -> Result<Option<i64>, RepositoryError>;
}

#[async_trait]
pub trait SystemRepository: Send + Sync {
    async fn find(&self) -> Result<Option<SystemStatus>, RepositoryError>;
    async fn create(&self, status: &SystemStatus) -> Result<SystemStatus, RepositoryError>;
    async fn update(&self, status: &SystemStatus) -> Result<(), RepositoryError>;
}

/// Bundle of the five live Mongo-backed repositories, wired up once at
/// startup from a single [`Database`] handle.
#[derive(Clone)]
pub struct MongoRepositories {
    orders: Collection<Order>,
    trades: Collection<Trade>,
    users: Collection<UserAccount>,
    activities: Collection<Activity>,
    system: Collection<SystemStatus>,
}

impl MongoRepositories {
    pub fn new(db: &Database) -> Self {
        Self {
            orders: db.collection("orders"),
            trades: db.collection("trades"),
            users: db.collection("users"),
            activities: db.collection("activities"),
            system: db.collection("system"),
        }
    }
}

fn upsert_options() -> FindOneAndUpdateOptions {
    FindOneAndUpdateOptions::builder()
        .upsert(true)
        .return_document(ReturnDocument::After)
        .build()
}

fn to_set_document<T: serde::Serialize>(value: &T) -> Result<Document, RepositoryError> {
    let bson = mongodb::bson::to_bson(value).map_err(|e| RepositoryError::Bson(e.to_string()))?;
    Ok(doc! { "$set": bson })
}

#[async_trait]
impl OrderRepository for MongoRepositories {
    async fn upsert(&self, order: &Order) -> Result<(), RepositoryError> {
        let filter = doc! { "_id": &order.id };
        let update = to_set_document(order)?;
        self.orders
            .find_one_and_update(filter, update)
            .with_options(upsert_options())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl TradeRepository for MongoRepositories {
    async fn upsert(&self, trade: &Trade) -> Result<(), RepositoryError> {
        let filter = doc! { "_id": &trade.id };
        let update = to_set_document(trade)?;
        self.trades
            .find_one_and_update(filter, update)
            .with_options(upsert_options())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for MongoRepositories {
    async fn find_by_id(&self, id: &str) -> Result<Option<UserAccount>, RepositoryError> {
        let filter = doc! { "_id": id };
        Ok(self.users.find_one(filter).await?)
    }

    async fn upsert(&self, user: &UserAccount) -> Result<(), RepositoryError> {
        let filter = doc! { "_id": &user.id };
        let update = to_set_document(user)?;
        self.users
            .find_one_and_update(filter, update)
            .with_options(upsert_options())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ActivityRepository for MongoRepositories {
    async fn upsert(&self, activity: &Activity) -> Result<(), RepositoryError> {
        let filter = doc! { "_id": &activity.id };
        let update = to_set_document(activity)?;
        self.activities
            .find_one_and_update(filter, update)
            .with_options(upsert_options())
            .await?;
        Ok(())
    }

    async fn max_nonce(&self) -> Result<Option<i64>, RepositoryError> {
        use futures_util::stream::TryStreamExt;

        let pipeline = vec![doc! { "$sort": { "nonce": -1 } }, doc! { "$limit": 1 }];
        let mut cursor = self.activities.aggregate(pipeline).await?;
        let Some(doc) = cursor.try_next().await? else {
            return Ok(None);
        };
        let nonce = doc
            .get_i64("nonce")
            .map_err(|e| RepositoryError::Bson(e.to_string()))?;
        Ok(Some(nonce))
    }
}

#[async_trait]
impl SystemRepository for MongoRepositories {
    async fn find(&self) -> Result<Option<SystemStatus>, RepositoryError> {
        Ok(self.system.find_one(doc! {}).await?)
    }

    async fn create(&self, status: &SystemStatus) -> Result<SystemStatus, RepositoryError> {
        self.system.insert_one(status).await?;
        Ok(status.clone())
    }

    async fn update(&self, status: &SystemStatus) -> Result<(), RepositoryError> {
        let filter = doc! { "_id": &status.id };
        let update = to_set_document(status)?;
        self.system
            .find_one_and_update(filter, update)
            .with_options(upsert_options())
            .await?;
        Ok(())
    }
}

/// In-memory fakes for unit tests — no live Mongo needed.
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct InMemoryRepositories {
        pub orders: Mutex<HashMap<String, Order>>,
        pub trades: Mutex<HashMap<String, Trade>>,
        pub users: Mutex<HashMap<String, UserAccount>>,
        pub activities: Mutex<HashMap<String, Activity>>,
        pub system: Mutex<Option<SystemStatus>>,
    }

    impl InMemoryRepositories {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_user(&self, user: UserAccount) {
            self.users.lock().insert(user.id.clone(), user);
        }

        pub fn seed_activity(&self, activity: Activity) {
            self.activities.lock().insert(activity.id.clone(), activity);
        }
    }

    #[async_trait]
    impl OrderRepository for InMemoryRepositories {
        async fn upsert(&self, order: &Order) -> Result<(), RepositoryError> {
            self.orders.lock().insert(order.id.clone(), order.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl TradeRepository for InMemoryRepositories {
        async fn upsert(&self, trade: &Trade) -> Result<(), RepositoryError> {
            self.trades.lock().insert(trade.id.clone(), trade.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl UserRepository for InMemoryRepositories {
        async fn find_by_id(&self, id: &str) -> Result<Option<UserAccount>, RepositoryError> {
            Ok(self.users.lock().get(id).cloned())
        }

        async fn upsert(&self, user: &UserAccount) -> Result<(), RepositoryError> {
            self.users.lock().insert(user.id.clone(), user.clone());
            Ok(())
        }
    }

    #[async_trait]
    impl ActivityRepository for InMemoryRepositories {
        async fn upsert(&self, activity: &Activity) -> Result<(), RepositoryError> {
            self.activities
                .lock()
                .insert(activity.id.clone(), activity.clone());
            Ok(())
        }

        async fn max_nonce(&self) -> Result<Option<i64>, RepositoryError> {
            Ok(self.activities.lock().values().map(|a| a.nonce).max())
        }
    }

    #[async_trait]
    impl SystemRepository for InMemoryRepositories {
        async fn find(&self) -> Result<Option<SystemStatus>, RepositoryError> {
            Ok(self.system.lock().clone())
        }

        async fn create(&self, status: &SystemStatus) -> Result<SystemStatus, RepositoryError> {
            *self.system.lock() = Some(status.clone());
            Ok(status.clone())
        }

        async fn update(&self, status: &SystemStatus) -> Result<(), RepositoryError> {
            *self.system.lock() = Some(status.clone());
            Ok(())
        }
    }
}
