//! Logical database session.
//!
//! A session owns a stack of open SeaORM transactions: index 0 is the real
//! transaction, every level above it is a savepoint. Statements always run
//! on the top of the stack.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard, Notify};
use uuid::Uuid;

use super::ambient;
use crate::errors::{DataError, DataResult};

/// Exclusive connection to one open transaction level.
pub type SessionConnection<'a> = MappedMutexGuard<'a, DatabaseTransaction>;

/// One logical, stateful handle to a database connection.
///
/// A session is used by exactly one call chain: the first chain that
/// publishes it claims it, and every other chain is refused.
pub struct Session {
    id: Uuid,
    engine: DatabaseConnection,
    levels: Mutex<Vec<DatabaseTransaction>>,
    released: Notify,
    depth: AtomicUsize,
    closed: AtomicBool,
    attached: AtomicUsize,
    owner: AtomicU64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .field("closed", &self.is_closed())
            .field("attached", &self.attached())
            .finish()
    }
}

impl Session {
    /// Create a session bound to `engine`. No connection is taken from the
    /// pool until the first transaction begins.
    pub fn new(engine: DatabaseConnection) -> Self {
        Self {
            id: Uuid::new_v4(),
            engine,
            levels: Mutex::new(Vec::new()),
            released: Notify::new(),
            depth: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            attached: AtomicUsize::new(0),
            owner: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of open levels (transaction plus savepoints)
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn has_open_transaction(&self) -> bool {
        self.depth() > 0
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DataResult<()> {
        if self.is_closed() {
            return Err(DataError::SessionClosed(self.id));
        }
        Ok(())
    }

    /// Claim the session for call chain `chain`. Claiming again from the
    /// same chain is a no-op.
    pub(crate) fn claim(&self, chain: u64) -> DataResult<()> {
        match self
            .owner
            .compare_exchange(0, chain, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(owner) if owner == chain => Ok(()),
            Err(_) => {
                tracing::warn!(session = %self.id, "Session used outside its call chain");
                Err(DataError::ForeignSession(self.id))
            }
        }
    }

    /// A claimed session only works inside the chain that claimed it.
    fn ensure_owner(&self) -> DataResult<()> {
        match self.owner.load(Ordering::Acquire) {
            0 => Ok(()),
            owner if ambient::chain_id() == Some(owner) => Ok(()),
            _ => Err(DataError::ForeignSession(self.id)),
        }
    }

    /// Start the real transaction. Returns the new depth (always 1).
    pub async fn begin(&self) -> DataResult<usize> {
        self.ensure_open()?;
        self.ensure_owner()?;
        let mut levels = self.levels.lock().await;
        if !levels.is_empty() {
            return Err(DataError::ScopeOrder {
                expected: 0,
                found: levels.len(),
            });
        }
        self.push_level(&mut levels).await
    }

    /// Start a savepoint inside the open transaction. Returns the new depth.
    pub async fn begin_nested(&self) -> DataResult<usize> {
        self.ensure_open()?;
        self.ensure_owner()?;
        let mut levels = self.levels.lock().await;
        if levels.is_empty() {
            return Err(DataError::NoOpenTransaction);
        }
        self.push_level(&mut levels).await
    }

    /// Open a level directly above `parent` (0 = the real transaction).
    ///
    /// While a sibling level opened above `parent` is still open, waits for
    /// it to close, so sibling scopes on one session run one after another.
    pub(crate) async fn begin_at(&self, parent: usize) -> DataResult<usize> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            self.ensure_open()?;
            self.ensure_owner()?;
            {
                let mut levels = self.levels.lock().await;
                if levels.len() == parent {
                    return self.push_level(&mut levels).await;
                }
                if levels.len() < parent {
                    return Err(DataError::ScopeOrder {
                        expected: parent,
                        found: levels.len(),
                    });
                }
            }
            tracing::debug!(session = %self.id, parent, "Waiting for sibling scope to close");
            released.await;
        }
    }

    async fn push_level(&self, levels: &mut Vec<DatabaseTransaction>) -> DataResult<usize> {
        let level = match levels.last() {
            Some(parent) => parent.begin().await?,
            None => self.engine.begin().await?,
        };
        levels.push(level);
        self.depth.store(levels.len(), Ordering::Release);
        if levels.len() == 1 {
            tracing::debug!(session = %self.id, "Transaction started");
        } else {
            tracing::debug!(session = %self.id, depth = levels.len(), "Savepoint started");
        }
        Ok(levels.len())
    }

    /// Commit the level opened at `depth`, which must be the innermost one.
    pub async fn commit(&self, depth: usize) -> DataResult<()> {
        let txn = self.pop_level(depth).await?;
        let result = txn.commit().await;
        self.released.notify_waiters();
        result?;
        Ok(())
    }

    /// Roll back the level opened at `depth`, which must be the innermost one.
    pub async fn rollback(&self, depth: usize) -> DataResult<()> {
        let txn = self.pop_level(depth).await?;
        let result = txn.rollback().await;
        self.released.notify_waiters();
        result?;
        Ok(())
    }

    async fn pop_level(&self, depth: usize) -> DataResult<DatabaseTransaction> {
        let mut levels = self.levels.lock().await;
        if levels.len() != depth {
            return Err(DataError::ScopeOrder {
                expected: depth,
                found: levels.len(),
            });
        }
        let txn = levels.pop().ok_or(DataError::NoOpenTransaction)?;
        self.depth.store(levels.len(), Ordering::Release);
        Ok(txn)
    }

    /// Drop every level from `depth` upwards without awaiting.
    ///
    /// Used when a scope is abandoned (panic or cancelled future); SeaORM
    /// rolls back a transaction that is dropped while still open.
    pub(crate) fn discard_from(&self, depth: usize) {
        match self.levels.try_lock() {
            Ok(mut levels) => {
                if levels.len() >= depth && depth > 0 {
                    levels.truncate(depth - 1);
                    self.depth.store(levels.len(), Ordering::Release);
                    tracing::warn!(session = %self.id, depth, "Abandoned scope discarded");
                }
            }
            Err(_) => {
                tracing::error!(session = %self.id, depth, "Abandoned scope could not be discarded");
            }
        }
        self.released.notify_waiters();
    }

    /// Close the session. Levels still open are rolled back innermost first.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut levels = self.levels.lock().await;
        while let Some(txn) = levels.pop() {
            if let Err(e) = txn.rollback().await {
                tracing::error!(session = %self.id, "Rollback on close failed: {}", e);
            }
        }
        self.depth.store(0, Ordering::Release);
        self.attached.store(0, Ordering::Release);
        self.released.notify_waiters();
        tracing::debug!(session = %self.id, "Session closed");
    }

    /// Lock the level the calling scope opened for running statements.
    ///
    /// Outside any scope on this session the innermost level is used. Inside
    /// one, waits while a sibling scope has a level open above it.
    pub async fn connection(&self) -> DataResult<SessionConnection<'_>> {
        match ambient::level_of(self) {
            Some(level) => self.connection_at(level.depth).await,
            None => {
                self.ensure_open()?;
                self.ensure_owner()?;
                let levels = self.levels.lock().await;
                MutexGuard::try_map(levels, |levels| levels.last_mut())
                    .map_err(|_| DataError::NoOpenTransaction)
            }
        }
    }

    async fn connection_at(&self, depth: usize) -> DataResult<SessionConnection<'_>> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            self.ensure_open()?;
            self.ensure_owner()?;
            {
                let levels = self.levels.lock().await;
                if levels.len() == depth {
                    return MutexGuard::try_map(levels, |levels| levels.last_mut())
                        .map_err(|_| DataError::NoOpenTransaction);
                }
                if levels.len() < depth {
                    return Err(DataError::ScopeOrder {
                        expected: depth,
                        found: levels.len(),
                    });
                }
            }
            released.await;
        }
    }

    /// Record `count` entities as loaded or written through this session.
    pub fn attach(&self, count: usize) {
        self.attached.fetch_add(count, Ordering::AcqRel);
    }

    /// Entities attached since the session opened or was last expunged
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }

    /// Detach every entity from the session. Returns how many were attached.
    pub fn expunge_all(&self) -> DataResult<usize> {
        self.ensure_open()?;
        Ok(self.attached.swap(0, Ordering::AcqRel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, Database, Statement};

    async fn memory_engine() -> DatabaseConnection {
        Database::connect("sqlite::memory:").await.expect("sqlite engine")
    }

    #[tokio::test]
    async fn test_levels_stack_and_unwind() {
        let session = Session::new(memory_engine().await);
        assert!(!session.has_open_transaction());

        assert_eq!(session.begin().await.unwrap(), 1);
        assert_eq!(session.begin_nested().await.unwrap(), 2);
        assert_eq!(session.depth(), 2);

        session.commit(2).await.unwrap();
        assert_eq!(session.depth(), 1);
        session.rollback(1).await.unwrap();
        assert!(!session.has_open_transaction());
    }

    #[tokio::test]
    async fn test_out_of_order_commit_is_rejected() {
        let session = Session::new(memory_engine().await);
        session.begin().await.unwrap();
        session.begin_nested().await.unwrap();

        let err = session.commit(1).await.unwrap_err();
        assert!(matches!(err, DataError::ScopeOrder { expected: 1, found: 2 }));
        session.close().await;
    }

    #[tokio::test]
    async fn test_begin_nested_requires_transaction() {
        let session = Session::new(memory_engine().await);
        let err = session.begin_nested().await.unwrap_err();
        assert!(matches!(err, DataError::NoOpenTransaction));
    }

    #[tokio::test]
    async fn test_connection_runs_on_innermost_level() {
        let session = Session::new(memory_engine().await);
        assert!(matches!(
            session.connection().await,
            Err(DataError::NoOpenTransaction)
        ));

        session.begin().await.unwrap();
        {
            let conn = session.connection().await.unwrap();
            let backend = conn.get_database_backend();
            conn.execute(Statement::from_string(backend, "SELECT 1".to_string()))
                .await
                .unwrap();
        }
        session.commit(1).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_session_refuses_work() {
        let session = Session::new(memory_engine().await);
        session.begin().await.unwrap();
        session.attach(3);
        session.close().await;

        assert!(session.is_closed());
        assert_eq!(session.depth(), 0);
        assert!(matches!(session.begin().await, Err(DataError::SessionClosed(_))));
        assert!(matches!(session.expunge_all(), Err(DataError::SessionClosed(_))));
    }

    #[tokio::test]
    async fn test_expunge_all_resets_attached() {
        let session = Session::new(memory_engine().await);
        session.attach(2);
        session.attach(1);
        assert_eq!(session.expunge_all().unwrap(), 3);
        assert_eq!(session.attached(), 0);
    }

    #[tokio::test]
    async fn test_sibling_level_waits_for_release() {
        let session = Session::new(memory_engine().await);
        session.begin().await.unwrap();
        assert_eq!(session.begin_at(1).await.unwrap(), 2);

        let (sibling, ()) = tokio::join!(session.begin_at(1), async {
            tokio::task::yield_now().await;
            assert_eq!(session.depth(), 2);
            session.commit(2).await.unwrap();
        });
        assert_eq!(sibling.unwrap(), 2);

        session.rollback(2).await.unwrap();
        assert!(matches!(
            session.begin_at(3).await,
            Err(DataError::ScopeOrder { expected: 3, found: 1 })
        ));
        session.commit(1).await.unwrap();
    }

    #[tokio::test]
    async fn test_claimed_session_refused_elsewhere() {
        let session = std::sync::Arc::new(Session::new(memory_engine().await));
        let owned = session.clone();
        ambient::bind(async move {
            ambient::set(Some(owned.clone())).unwrap();
            owned.begin().await.unwrap();
        })
        .await;

        let err = ambient::bind(async { session.connection().await.map(|_| ()) })
            .await
            .unwrap_err();
        assert!(matches!(err, DataError::ForeignSession(_)));
        assert!(matches!(session.begin_nested().await, Err(DataError::ForeignSession(_))));
    }
}
