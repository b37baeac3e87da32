//! Process-wide registry of repository instances.
//!
//! Exactly one instance per repository type. Each type gets its own
//! initialization cell; the map lock is only held to find or insert that
//! cell, so a constructor may itself ask the registry for other types.
//! A constructor asking for its own type is unsupported and blocks.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

static GLOBAL: Lazy<RepositoryRegistry> = Lazy::new(RepositoryRegistry::new);

type InstanceCell<R> = OnceCell<Arc<R>>;

trait Slot: Send + Sync {
    fn is_ready(&self) -> bool;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<R: Send + Sync + 'static> Slot for InstanceCell<R> {
    fn is_ready(&self) -> bool {
        self.get().is_some()
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Typed instance cache keyed by `TypeId`
#[derive(Default)]
pub struct RepositoryRegistry {
    slots: RwLock<HashMap<TypeId, Arc<dyn Slot>>>,
}

impl RepositoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry living for the whole process
    pub fn global() -> &'static RepositoryRegistry {
        &GLOBAL
    }

    /// Shared instance of `R`, built with `Default` on first request.
    pub fn get_instance<R>(&self) -> Arc<R>
    where
        R: Default + Send + Sync + 'static,
    {
        self.get_or_init(R::default)
    }

    /// Shared instance of `R`, built with `init` on first request.
    ///
    /// `init` runs at most once per registry, even when many threads ask for
    /// `R` at the same time. It runs without holding the registry lock.
    pub fn get_or_init<R, F>(&self, init: F) -> Arc<R>
    where
        R: Send + Sync + 'static,
        F: FnOnce() -> R,
    {
        let cell = self.cell::<R>();
        cell.get_or_init(|| {
            tracing::debug!(
                repository = std::any::type_name::<R>(),
                "Repository instance created"
            );
            Arc::new(init())
        })
        .clone()
    }

    fn cell<R: Send + Sync + 'static>(&self) -> Arc<InstanceCell<R>> {
        let key = TypeId::of::<R>();
        if let Some(cell) = Self::typed_slot::<R>(self.slots.read().get(&key)) {
            return cell;
        }

        let mut slots = self.slots.write();
        if let Some(cell) = Self::typed_slot::<R>(slots.get(&key)) {
            return cell;
        }
        let cell: Arc<InstanceCell<R>> = Arc::new(OnceCell::new());
        slots.insert(key, cell.clone());
        cell
    }

    fn typed_slot<R: Send + Sync + 'static>(
        slot: Option<&Arc<dyn Slot>>,
    ) -> Option<Arc<InstanceCell<R>>> {
        slot.cloned()
            .and_then(|slot| slot.into_any().downcast::<InstanceCell<R>>().ok())
    }

    /// Whether an instance of `R` has been built
    pub fn contains<R: 'static>(&self) -> bool {
        self.slots
            .read()
            .get(&TypeId::of::<R>())
            .is_some_and(|slot| slot.is_ready())
    }

    /// Number of built instances
    pub fn len(&self) -> usize {
        self.slots.read().values().filter(|slot| slot.is_ready()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared instance of `R` from the global registry.
pub fn get_instance<R>() -> Arc<R>
where
    R: Default + Send + Sync + 'static,
{
    RepositoryRegistry::global().get_instance::<R>()
}

/// Types that are only ever used through their registry instance.
pub trait Singleton: Default + Send + Sync + Sized + 'static {
    fn instance() -> Arc<Self> {
        get_instance::<Self>()
    }
}
