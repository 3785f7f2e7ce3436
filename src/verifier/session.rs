use std::{collections::BTreeMap, fmt::Debug, sync::Arc};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::ExchangeError;

/// A locally issued transaction and the remote session it is correlated with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub id: Uuid,
    /// Set once the remote verifier acknowledges the request.
    pub remote_session_token: Option<String>,
}

/// Storage interface correlating transactions with remote verification sessions.
#[async_trait]
pub trait TransactionStore: Debug {
    /// Allocate a fresh transaction. No remote call is made.
    async fn create(&self) -> Result<Transaction, ExchangeError>;

    /// Record the remote session token of a transaction.
    ///
    /// A transaction is bound once; binding it again fails with
    /// [ExchangeError::AlreadyBound].
    async fn bind(&self, id: Uuid, remote_session_token: String) -> Result<(), ExchangeError>;

    /// The remote session token, if the transaction is known and bound.
    async fn remote_token(&self, id: Uuid) -> Result<Option<String>, ExchangeError>;

    /// Remove a transaction from the store.
    async fn remove(&self, id: Uuid) -> Result<(), ExchangeError>;
}

/// A local in-memory store.
///
/// # Warning
/// Entries are never evicted on their own; every exchange leaves one entry behind until
/// [TransactionStore::remove] is called. This store should only be used for a single process,
/// it will not work for a distributed deployment.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    store: Arc<Mutex<BTreeMap<Uuid, Transaction>>>,
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn create(&self) -> Result<Transaction, ExchangeError> {
        let transaction = Transaction {
            id: Uuid::new_v4(),
            remote_session_token: None,
        };
        self.store
            .lock()
            .await
            .insert(transaction.id, transaction.clone());
        debug!(id = %transaction.id, "created transaction");

        Ok(transaction)
    }

    async fn bind(&self, id: Uuid, remote_session_token: String) -> Result<(), ExchangeError> {
        let mut store = self.store.lock().await;
        let Some(transaction) = store.get_mut(&id) else {
            return Err(ExchangeError::UnknownTransaction(id));
        };
        if transaction.remote_session_token.is_some() {
            return Err(ExchangeError::AlreadyBound(id));
        }
        transaction.remote_session_token = Some(remote_session_token);
        debug!(%id, "bound transaction to remote session");

        Ok(())
    }

    async fn remote_token(&self, id: Uuid) -> Result<Option<String>, ExchangeError> {
        if let Some(transaction) = self.store.lock().await.get(&id) {
            return Ok(transaction.remote_session_token.clone());
        }

        Err(ExchangeError::UnknownTransaction(id))
    }

    async fn remove(&self, id: Uuid) -> Result<(), ExchangeError> {
        if self.store.lock().await.remove(&id).is_some() {
            return Ok(());
        }

        Err(ExchangeError::UnknownTransaction(id))
    }
}
