//! Transactional call interception.
//!
//! Repository operations declare up front whether they are transactional.
//! A transactional operation called outside any scope gets its own scope;
//! called from inside another intercepted operation at the same level it
//! joins that operation's scope instead of wrapping itself a second time.

use std::future::Future;

use super::scope::transaction;
use crate::errors::DataError;
use crate::session::ambient::{self, ScopeLevel};

/// Operation name prefixes treated as transactional by convention
pub const TRANSACTIONAL_PREFIXES: &[&str] = &["find", "get", "create", "update", "delete", "upsert"];

/// A declared data-access operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    name: &'static str,
    transactional: bool,
}

impl Operation {
    /// Operation that always runs inside a scope
    pub const fn transactional(name: &'static str) -> Self {
        Self {
            name,
            transactional: true,
        }
    }

    /// Operation that runs as called, inside a scope only if the caller
    /// opened one
    pub const fn plain(name: &'static str) -> Self {
        Self {
            name,
            transactional: false,
        }
    }

    /// Classify by name prefix (`find*`, `get*`, `create*`, `update*`,
    /// `delete*`, `upsert*`)
    pub fn by_convention(name: &'static str) -> Self {
        let transactional = TRANSACTIONAL_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix));
        Self {
            name,
            transactional,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }
}

/// Run `body` as `operation`, opening a scope when the operation is
/// transactional and no intercepted operation already owns the current one.
pub async fn intercept<F, Fut, T, E>(operation: Operation, body: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<DataError>,
{
    if !operation.is_transactional() {
        return body().await;
    }

    if let Some(session) = ambient::current() {
        let owned = ambient::level_of(&session).is_some_and(|level| level.intercepted);
        if owned {
            tracing::trace!(
                operation = operation.name(),
                session = %session.id(),
                "Joining enclosing operation scope"
            );
            return body().await;
        }
    }

    transaction(|scope| async move {
        tracing::trace!(
            operation = operation.name(),
            session = %scope.session().id(),
            nested = scope.is_nested(),
            "Operation scope opened"
        );
        let level = ScopeLevel {
            session: scope.session().id(),
            depth: scope.depth(),
            intercepted: true,
        };
        ambient::at_level(level, body()).await
    })
    .await
}
