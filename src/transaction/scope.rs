//! Transaction scopes.
//!
//! A scope opens a real transaction when its session has none open, and a
//! savepoint otherwise. The body's result decides commit or rollback; the
//! body's error is returned untouched. Only the outermost scope closes the
//! session and clears the ambient slot.
//!
//! The body runs at the level its scope opened: statements it issues go to
//! that level, and scopes it opens nest under it. Sibling scopes on one
//! session (futures joined on the same task) run one after another.

use std::future::Future;
use std::sync::Arc;

use crate::errors::DataError;
use crate::session::ambient::{self, AmbientReset, ScopeLevel};
use crate::session::Session;

/// Terminal state of a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeOutcome {
    Pending,
    Committed,
    RolledBack,
}

/// What the body of a scope receives.
///
/// For the outermost scope it stands for the session's transaction, for a
/// nested scope for its savepoint.
#[derive(Debug, Clone)]
pub struct ScopeHandle {
    session: Arc<Session>,
    nested: bool,
    depth: usize,
}

impl ScopeHandle {
    /// Whether this scope runs in a savepoint
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Level this scope opened (1 = real transaction)
    pub fn depth(&self) -> usize {
        self.depth
    }
}

/// One open level of transactional work.
struct Scope {
    session: Arc<Session>,
    nested: bool,
    depth: usize,
    outcome: ScopeOutcome,
}

impl Scope {
    /// Open a level on `session` above `parent`: the real transaction when
    /// `parent` is 0, a savepoint otherwise.
    async fn open(session: Arc<Session>, parent: usize) -> Result<Self, DataError> {
        let nested = parent > 0;
        if nested {
            tracing::debug!(session = %session.id(), parent, "Starting nested transaction");
        } else {
            tracing::debug!(session = %session.id(), "Starting new transaction");
        }
        let depth = session.begin_at(parent).await?;

        Ok(Self {
            session,
            nested,
            depth,
            outcome: ScopeOutcome::Pending,
        })
    }

    fn level(&self) -> ScopeLevel {
        ScopeLevel {
            session: self.session.id(),
            depth: self.depth,
            intercepted: false,
        }
    }

    fn handle(&self) -> ScopeHandle {
        ScopeHandle {
            session: self.session.clone(),
            nested: self.nested,
            depth: self.depth,
        }
    }

    async fn commit(&mut self) -> Result<(), DataError> {
        let result = self.session.commit(self.depth).await;
        self.outcome = if result.is_ok() {
            ScopeOutcome::Committed
        } else {
            ScopeOutcome::RolledBack
        };

        if self.nested {
            tracing::debug!(session = %self.session.id(), depth = self.depth, "Savepoint committed");
        } else {
            self.session.close().await;
            tracing::debug!(session = %self.session.id(), "Transaction committed");
        }
        result
    }

    /// Roll back after the body failed. A failing rollback is logged; the
    /// body's error stays the one reported.
    async fn rollback(&mut self) {
        if let Err(e) = self.session.rollback(self.depth).await {
            tracing::error!(
                session = %self.session.id(),
                depth = self.depth,
                code = e.code(),
                "Rollback failed: {}",
                e
            );
        }
        self.outcome = ScopeOutcome::RolledBack;

        if self.nested {
            tracing::debug!(session = %self.session.id(), depth = self.depth, "Savepoint rolled back");
        } else {
            self.session.close().await;
            tracing::debug!(session = %self.session.id(), "Transaction rolled back");
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if self.outcome == ScopeOutcome::Pending {
            self.session.discard_from(self.depth);
        }
    }
}

/// Run `body` inside a transaction scope.
///
/// Joins the session already active in this call chain, or draws a new one
/// from the provider. Opens a savepoint when the session already has a
/// transaction open, a new transaction otherwise. On `Ok` the level is
/// committed; on `Err` it is rolled back and the error returned as-is.
///
/// # Example
/// ```ignore
/// let widget = transaction(|_scope| async {
///     widgets.create(new_widget("X")).await
/// })
/// .await?;
/// ```
pub async fn transaction<F, Fut, T, E>(body: F) -> Result<T, E>
where
    F: FnOnce(ScopeHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DataError>,
{
    if ambient::is_bound() {
        run_scope(body).await
    } else {
        ambient::bind(run_scope(body)).await
    }
}

async fn run_scope<F, Fut, T, E>(body: F) -> Result<T, E>
where
    F: FnOnce(ScopeHandle) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DataError>,
{
    let session = match ambient::current() {
        Some(session) => session,
        None => {
            let session = ambient::provider().get_session().await?;
            ambient::set(Some(session.clone()))?;
            session
        }
    };

    let parent = match ambient::level_of(&session) {
        Some(level) => level.depth,
        None => session.depth(),
    };
    let outermost = parent == 0;
    let _reset = if outermost { Some(AmbientReset) } else { None };

    let mut scope = match Scope::open(session.clone(), parent).await {
        Ok(scope) => scope,
        Err(e) => {
            if outermost {
                session.close().await;
            }
            return Err(e.into());
        }
    };

    match ambient::at_level(scope.level(), body(scope.handle())).await {
        Ok(value) => {
            scope.commit().await?;
            Ok(value)
        }
        Err(err) => {
            tracing::debug!(
                session = %scope.session.id(),
                depth = scope.depth,
                "Scope body failed, rolling back"
            );
            scope.rollback().await;
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, EngineOptions};
    use crate::errors::DataResult;
    use crate::session::{MockEngineFactory, SessionProvider};
    use sea_orm::{Database, DatabaseConnection};
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn memory_provider() -> Arc<SessionProvider> {
        let engine = Database::connect("sqlite::memory:").await.expect("sqlite engine");
        Arc::new(SessionProvider::with_engine(engine))
    }

    #[tokio::test]
    async fn test_empty_scope_opens_and_closes() {
        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let result: DataResult<()> = transaction(|_| async { Ok(()) }).await;
            assert!(result.is_ok());
            assert!(ambient::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_nesting_is_detected_from_session_state() {
        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let depths: DataResult<(bool, usize, bool, usize, bool, usize)> =
                transaction(|outer| async move {
                    let (mid_nested, mid_depth, inner_nested, inner_depth) =
                        transaction(|mid| async move {
                            let inner = transaction(|inner| async move {
                                Ok::<_, DataError>((inner.is_nested(), inner.depth()))
                            })
                            .await?;
                            Ok::<_, DataError>((mid.is_nested(), mid.depth(), inner.0, inner.1))
                        })
                        .await?;
                    Ok((
                        outer.is_nested(),
                        outer.depth(),
                        mid_nested,
                        mid_depth,
                        inner_nested,
                        inner_depth,
                    ))
                })
                .await;

            assert_eq!(depths.unwrap(), (false, 1, true, 2, true, 3));
        })
        .await;
    }

    #[tokio::test]
    async fn test_outermost_scope_closes_session() {
        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let session = transaction(|scope| async move {
                Ok::<_, DataError>(scope.session().clone())
            })
            .await
            .unwrap();
            assert!(session.is_closed());
            assert!(!session.has_open_transaction());
        })
        .await;
    }

    #[tokio::test]
    async fn test_body_error_is_returned_unchanged() {
        #[derive(Debug, PartialEq)]
        enum BodyError {
            Refused(u32),
            Data(String),
        }

        impl From<DataError> for BodyError {
            fn from(e: DataError) -> Self {
                BodyError::Data(e.to_string())
            }
        }

        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let result: Result<(), BodyError> =
                transaction(|_| async { Err(BodyError::Refused(7)) }).await;
            assert_eq!(result.unwrap_err(), BodyError::Refused(7));
            assert!(ambient::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_published_session_without_transaction_is_cleared() {
        let provider = memory_provider().await;
        let session = provider.get_session().await.unwrap();
        let expected = session.id();

        ambient::bind(async move {
            ambient::set(Some(session)).unwrap();
            let seen: DataResult<uuid::Uuid> =
                transaction(|scope| async move { Ok(scope.session().id()) }).await;
            assert_eq!(seen.unwrap(), expected);
            assert!(ambient::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_begin_failure_surfaces_and_clears_ambient() {
        let mut factory = MockEngineFactory::new();
        factory
            .expect_create_engine()
            .times(1)
            .returning(|_, _| Ok(DatabaseConnection::Disconnected));
        let provider = SessionProvider::new(DatabaseConfig::sqlite(":memory:"), EngineOptions::default())
            .factory(Arc::new(factory));

        let flag = AtomicBool::new(false);
        let ran = &flag;
        ambient::with_provider(Arc::new(provider), async move {
            let result: DataResult<()> = transaction(move |_| async move {
                ran.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

            assert!(matches!(result, Err(DataError::Database(_))));
            assert!(!ran.load(Ordering::SeqCst));
            assert!(ambient::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces_and_clears_ambient() {
        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let result: DataResult<()> = transaction(|scope| async move {
                scope.session().close().await;
                Ok(())
            })
            .await;

            assert!(matches!(
                result,
                Err(DataError::ScopeOrder { expected: 1, found: 0 })
            ));
            assert!(ambient::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_body_error() {
        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let result: DataResult<()> = transaction(|scope| async move {
                scope.session().close().await;
                Err(DataError::invalid_patch("body failed"))
            })
            .await;

            assert!(matches!(result, Err(DataError::InvalidPatch(_))));
            assert!(ambient::current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_scope_outcome_follows_close() {
        let engine = Database::connect("sqlite::memory:").await.expect("sqlite engine");
        let session = Arc::new(Session::new(engine));

        let mut outer = Scope::open(session.clone(), 0).await.unwrap();
        assert_eq!(outer.outcome, ScopeOutcome::Pending);

        let mut inner = Scope::open(session.clone(), 1).await.unwrap();
        assert!(inner.handle().is_nested());
        inner.rollback().await;
        assert_eq!(inner.outcome, ScopeOutcome::RolledBack);
        assert_eq!(session.depth(), 1);

        outer.commit().await.unwrap();
        assert_eq!(outer.outcome, ScopeOutcome::Committed);
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_sibling_scopes_run_in_turn() {
        let provider = memory_provider().await;
        ambient::with_provider(provider, async {
            let depths: DataResult<(usize, usize, usize)> = transaction(|outer| async move {
                let (a, b) = futures::join!(
                    transaction(|scope| async move {
                        tokio::task::yield_now().await;
                        Ok::<_, DataError>(scope.depth())
                    }),
                    transaction(|scope| async move { Ok::<_, DataError>(scope.depth()) })
                );
                Ok((outer.depth(), a?, b?))
            })
            .await;

            assert_eq!(depths.unwrap(), (1, 2, 2));
        })
        .await;
    }
}
