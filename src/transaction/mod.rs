//! Transaction layer - scopes and call interception
//!
//! `transaction` opens a transaction or a savepoint around a unit of work;
//! `intercept` applies it to declared repository operations.

mod intercept;
mod scope;

pub use intercept::{intercept, Operation, TRANSACTIONAL_PREFIXES};
pub use scope::{transaction, ScopeHandle};

/// Run a block inside a transaction scope.
///
/// Sugar over [`transaction`] for bodies that do not need the scope handle.
/// The block must evaluate to a `Result` whose error implements
/// `From<DataError>`.
///
/// # Example
/// ```ignore
/// let widget = scoped!({
///     widgets.create(new_widget("X")).await
/// })?;
/// ```
#[macro_export]
macro_rules! scoped {
    (|$scope:ident| { $($body:tt)* }) => {
        $crate::transaction::transaction(|$scope| async move { $($body)* }).await
    };
    ({ $($body:tt)* }) => {
        $crate::transaction::transaction(|_| async move { $($body)* }).await
    };
}
