//! Session layer - engine, sessions and ambient propagation
//!
//! - `provider`: builds the engine once and creates sessions
//! - `session`: one logical connection with its transaction/savepoint stack
//! - `ambient`: the per-call-chain slot holding the active session

pub mod ambient;
mod provider;
mod session;

pub use provider::{EngineFactory, SeaEngineFactory, SessionProvider};
pub use session::{Session, SessionConnection};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockEngineFactory;
