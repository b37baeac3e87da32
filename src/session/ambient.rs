//! Ambient session context.
//!
//! Each call chain (tokio task) carries its own slot holding the active
//! session and, optionally, the provider sessions are drawn from. Code running
//! inside the chain reads the slot without the session being passed to it.
//! Spawned tasks start without a slot and never see their parent's session.
//!
//! A session published in a slot is claimed by that call chain; publishing it
//! in any other chain fails with `DataError::ForeignSession`.

use std::cell::RefCell;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use super::{Session, SessionProvider};
use crate::errors::{DataError, DataResult};

static NEXT_CHAIN: AtomicU64 = AtomicU64::new(1);

struct Frame {
    chain: u64,
    session: Option<Arc<Session>>,
    provider: Option<Arc<SessionProvider>>,
}

impl Frame {
    fn new(provider: Option<Arc<SessionProvider>>) -> Self {
        Self {
            chain: NEXT_CHAIN.fetch_add(1, Ordering::Relaxed),
            session: None,
            provider,
        }
    }
}

/// The scope level a future runs at: the session it belongs to, the depth
/// its scope opened, and whether that scope was opened by an intercepted
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ScopeLevel {
    pub(crate) session: Uuid,
    pub(crate) depth: usize,
    pub(crate) intercepted: bool,
}

tokio::task_local! {
    static AMBIENT: RefCell<Frame>;
    static LEVEL: ScopeLevel;
}

/// The session active in the current call chain, if any.
pub fn current() -> Option<Arc<Session>> {
    AMBIENT
        .try_with(|frame| frame.borrow().session.clone())
        .ok()
        .flatten()
}

/// The active session, or `DataError::NoActiveSession`.
pub fn require() -> DataResult<Arc<Session>> {
    current().ok_or(DataError::NoActiveSession)
}

/// Publish `session` as the active session of the current call chain.
///
/// Fails with `DataError::NoAmbientContext` outside a bound call chain and
/// with `DataError::ForeignSession` when another chain already claimed the
/// session.
pub fn set(session: Option<Arc<Session>>) -> DataResult<()> {
    let chain = chain_id().ok_or(DataError::NoAmbientContext)?;
    if let Some(session) = &session {
        session.claim(chain)?;
    }
    AMBIENT
        .try_with(|frame| frame.borrow_mut().session = session)
        .map_err(|_| DataError::NoAmbientContext)
}

/// Identity of the current call chain's slot
pub(crate) fn chain_id() -> Option<u64> {
    AMBIENT.try_with(|frame| frame.borrow().chain).ok()
}

/// Whether the current call chain has an ambient slot.
pub fn is_bound() -> bool {
    AMBIENT.try_with(|_| ()).is_ok()
}

/// Provider for new sessions in this call chain: the one bound with
/// [`with_provider`], else the process-wide provider.
pub fn provider() -> Arc<SessionProvider> {
    AMBIENT
        .try_with(|frame| frame.borrow().provider.clone())
        .ok()
        .flatten()
        .unwrap_or_else(SessionProvider::global)
}

/// Run `fut` with a fresh, empty ambient slot.
pub async fn bind<F: Future>(fut: F) -> F::Output {
    AMBIENT.scope(RefCell::new(Frame::new(None)), fut).await
}

/// Run `fut` with a fresh ambient slot whose sessions come from `provider`.
pub async fn with_provider<F: Future>(provider: Arc<SessionProvider>, fut: F) -> F::Output {
    AMBIENT.scope(RefCell::new(Frame::new(Some(provider))), fut).await
}

/// Level of the innermost scope on `session` enclosing the running future.
///
/// Sibling futures polled by the same task (`join!`) each see the level of
/// their own enclosing scope.
pub(crate) fn level_of(session: &Session) -> Option<ScopeLevel> {
    LEVEL
        .try_with(|level| *level)
        .ok()
        .filter(|level| level.session == session.id())
}

/// Run `fut` at `level`.
pub(crate) async fn at_level<F: Future>(level: ScopeLevel, fut: F) -> F::Output {
    LEVEL.scope(level, fut).await
}

/// Clears the ambient session when dropped, on every exit path of the
/// outermost scope.
pub(crate) struct AmbientReset;

impl Drop for AmbientReset {
    fn drop(&mut self) {
        let _ = AMBIENT.try_with(|frame| {
            if let Ok(mut frame) = frame.try_borrow_mut() {
                frame.session = None;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::DatabaseConnection;

    fn session() -> Arc<Session> {
        Arc::new(Session::new(DatabaseConnection::Disconnected))
    }

    #[test]
    fn test_unbound_chain_has_no_session() {
        assert!(!is_bound());
        assert!(current().is_none());
        assert!(matches!(require(), Err(DataError::NoActiveSession)));
        assert!(matches!(set(Some(session())), Err(DataError::NoAmbientContext)));
    }

    #[tokio::test]
    async fn test_set_is_visible_down_the_chain() {
        async fn nested_lookup() -> Option<uuid::Uuid> {
            current().map(|s| s.id())
        }

        bind(async {
            assert!(is_bound());
            let active = session();
            set(Some(active.clone())).unwrap();
            assert_eq!(nested_lookup().await, Some(active.id()));

            set(None).unwrap();
            assert!(nested_lookup().await.is_none());
        })
        .await;
        assert!(!is_bound());
    }

    #[tokio::test]
    async fn test_spawned_task_does_not_inherit_session() {
        bind(async {
            set(Some(session())).unwrap();
            let seen = tokio::spawn(async { current().is_some() }).await.unwrap();
            assert!(!seen);
            assert!(current().is_some());
        })
        .await;
    }

    #[tokio::test]
    async fn test_reset_guard_clears_session() {
        bind(async {
            set(Some(session())).unwrap();
            {
                let _reset = AmbientReset;
            }
            assert!(current().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn test_session_claimed_by_one_chain() {
        let active = session();
        let leaked = active.clone();

        bind(async move {
            set(Some(active.clone())).unwrap();
            set(None).unwrap();
            set(Some(active)).unwrap();

            let foreign = tokio::spawn(bind(async move { set(Some(leaked)) }))
                .await
                .unwrap();
            assert!(matches!(foreign, Err(DataError::ForeignSession(_))));
            assert!(current().is_some());
        })
        .await;
    }

    #[tokio::test]
    async fn test_level_is_scoped_per_future() {
        let active = session();
        let level = ScopeLevel {
            session: active.id(),
            depth: 2,
            intercepted: false,
        };

        assert!(level_of(&active).is_none());
        let (inside, sibling) = futures::join!(
            at_level(level, async { level_of(&active) }),
            async { level_of(&active) }
        );
        assert_eq!(inside, Some(level));
        assert!(sibling.is_none());

        let other = session();
        let seen = at_level(level, async { level_of(&other) }).await;
        assert!(seen.is_none());
    }

    #[tokio::test]
    async fn test_with_provider_binds_provider() {
        let bound = Arc::new(SessionProvider::with_engine(DatabaseConnection::Disconnected));
        let expected = bound.clone();
        with_provider(bound, async move {
            assert!(Arc::ptr_eq(&provider(), &expected));
        })
        .await;
    }
}
