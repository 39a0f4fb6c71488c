//! System registry: type-indexed storage of registered systems.
//!
//! Each system type owns one slot in a dense vector, at the index the
//! context's [`TypeIndexer`](crate::TypeIndexer) assigned to it. A slot is
//! only ever filled by the type it belongs to; once a system is destroyed
//! its slot stays empty until the same type registers again.
//!
//! Registration and removal are deferred: registering enqueues a Create
//! action and removing enqueues a Destroy action. The heartbeat performs the
//! actual transitions (see [`scheduler`](crate::scheduler)).

use std::any::{Any, type_name};
use std::cell::{Ref, RefCell, RefMut};
use std::error::Error;
use std::rc::Rc;

use tracing::{debug, error};

use crate::context::Context;
use crate::error::{LookupError, RegistrationError};
use crate::system::{Stage, System, hook_for};

/// Lifecycle state of a registered system.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SystemState {
    /// Registered, waiting for the Create drain.
    PendingCreate,
    /// Created and receiving Tick/Update hooks.
    Created,
    /// Removal requested, waiting for the Destroy drain.
    PendingDestroy { created: bool },
}

impl SystemState {
    /// Returns `true` once the create hook has run.
    pub(crate) fn is_created(self) -> bool {
        matches!(
            self,
            SystemState::Created | SystemState::PendingDestroy { created: true }
        )
    }
}

/// A registered, type-erased system.
pub(crate) struct SystemEntry {
    pub(crate) name: &'static str,
    /// Always a `RefCell<T>` for the system type `T`.
    pub(crate) value: Rc<dyn Any>,
    pub(crate) state: SystemState,
}

/// Dense storage of systems, indexed by type index.
#[derive(Default)]
pub(crate) struct SystemRegistry {
    slots: Vec<Option<SystemEntry>>,
    live: usize,
}

impl SystemRegistry {
    pub(crate) fn get(&self, index: usize) -> Option<&SystemEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub(crate) fn get_mut(&mut self, index: usize) -> Option<&mut SystemEntry> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    /// Fill the slot at `index`. The slot must be empty.
    pub(crate) fn insert(&mut self, index: usize, entry: SystemEntry) {
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        debug_assert!(self.slots[index].is_none());
        self.slots[index] = Some(entry);
        self.live += 1;
    }

    /// Empty the slot at `index`, returning its entry.
    pub(crate) fn remove(&mut self, index: usize) -> Option<SystemEntry> {
        let entry = self.slots.get_mut(index).and_then(Option::take);
        if entry.is_some() {
            self.live -= 1;
        }
        entry
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Iterate occupied slots with their indices.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut SystemEntry)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_mut().map(|entry| (index, entry)))
    }

    /// Empty every slot, returning the entries.
    pub(crate) fn take_all(&mut self) -> Vec<SystemEntry> {
        self.live = 0;
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

/// Shared handle to a registered system.
///
/// Holds the system alive even if it is destroyed while the handle exists.
/// Borrowing follows `RefCell` rules: borrowing a system mutably while one
/// of its own hooks is running panics.
pub struct SystemRef<T>(Rc<RefCell<T>>);

impl<T> SystemRef<T> {
    /// Immutably borrow the system.
    #[must_use]
    pub fn borrow(&self) -> Ref<'_, T> {
        self.0.borrow()
    }

    /// Mutably borrow the system.
    #[must_use]
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.0.borrow_mut()
    }

    /// Mutably borrow the system, or `None` if it is already borrowed.
    #[must_use]
    pub fn try_borrow_mut(&self) -> Option<RefMut<'_, T>> {
        self.0.try_borrow_mut().ok()
    }
}

impl<T> Clone for SystemRef<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl Context {
    /// Register `system`.
    ///
    /// The system's opted-in hooks are bound and a Create action is queued;
    /// the create hook runs on the next heartbeat.
    ///
    /// # Errors
    ///
    /// Fails if a system of the same type is registered or still pending
    /// destruction.
    pub fn register_system<T: System>(&self, system: T) -> Result<(), RegistrationError> {
        let index = self.vacant_system_index::<T>()?;
        self.insert_system(index, system);
        Ok(())
    }

    /// Register a system built by a fallible constructor.
    ///
    /// The constructor only runs if the slot is vacant. If it fails, nothing
    /// is registered.
    ///
    /// # Errors
    ///
    /// Fails if the slot is occupied or the constructor returns an error.
    pub fn register_system_with<T, E, F>(&self, construct: F) -> Result<(), RegistrationError>
    where
        T: System,
        E: Into<Box<dyn Error + Send + Sync>>,
        F: FnOnce(&Context) -> Result<T, E>,
    {
        let index = self.vacant_system_index::<T>()?;
        let system = construct(self).map_err(|source| {
            let source = source.into();
            error!(system = type_name::<T>(), error = %source, "system construction failed");
            RegistrationError::Construction {
                system: type_name::<T>(),
                source,
            }
        })?;
        // The constructor may have registered `T` itself.
        self.vacant_system_index::<T>()?;
        self.insert_system(index, system);
        Ok(())
    }

    /// Returns `true` if a system of type `T` is registered and not yet
    /// destroyed.
    #[must_use]
    pub fn has_system<T: System>(&self) -> bool {
        let index = self.inner.system_types.borrow().get::<T>();
        index.is_some_and(|index| self.inner.systems.borrow().get(index).is_some())
    }

    /// Look up the system of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NotFound`] if `T` is not registered.
    pub fn get_system<T: System>(&self) -> Result<SystemRef<T>, LookupError> {
        let name = type_name::<T>();
        let index = self
            .inner
            .system_types
            .borrow()
            .get::<T>()
            .ok_or(LookupError::NotFound(name))?;
        let value = self
            .inner
            .systems
            .borrow()
            .get(index)
            .map(|entry| Rc::clone(&entry.value))
            .ok_or(LookupError::NotFound(name))?;
        value
            .downcast::<RefCell<T>>()
            .map(SystemRef)
            .map_err(|_| LookupError::TypeMismatch(name))
    }

    /// Run `f` with mutable access to the system of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NotFound`] if `T` is not registered.
    pub fn with_system<T: System, R>(
        &self,
        f: impl FnOnce(&mut T) -> R,
    ) -> Result<R, LookupError> {
        let system = self.get_system::<T>()?;
        let mut guard = system.borrow_mut();
        Ok(f(&mut *guard))
    }

    /// Request destruction of the system of type `T`.
    ///
    /// The destroy hook runs and the system is dropped on the next
    /// heartbeat. Removing a system already pending destruction is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError::NotFound`] if `T` is not registered.
    pub fn remove_system<T: System>(&self) -> Result<(), LookupError> {
        let name = type_name::<T>();
        let index = self
            .inner
            .system_types
            .borrow()
            .get::<T>()
            .ok_or(LookupError::NotFound(name))?;
        if self.mark_for_destroy(index).ok_or(LookupError::NotFound(name))? {
            debug!(system = name, index, "system removal queued");
        }
        Ok(())
    }

    /// Number of registered systems, including those pending creation or
    /// destruction.
    #[must_use]
    pub fn system_count(&self) -> usize {
        self.inner.systems.borrow().len()
    }

    /// Queue every system not already pending destruction for destruction.
    /// Returns how many were queued.
    pub(crate) fn request_destroy_all(&self) -> usize {
        let queued: Vec<usize> = {
            let mut systems = self.inner.systems.borrow_mut();
            systems
                .iter_mut()
                .filter_map(|(index, entry)| match entry.state {
                    SystemState::PendingDestroy { .. } => None,
                    state => {
                        entry.state = SystemState::PendingDestroy {
                            created: state.is_created(),
                        };
                        Some(index)
                    }
                })
                .collect()
        };
        let mut scheduler = self.inner.scheduler.borrow_mut();
        for &index in &queued {
            scheduler.enqueue(Stage::Destroy, index);
        }
        queued.len()
    }

    /// Move the entry at `index` to `PendingDestroy` and queue it.
    ///
    /// Returns `None` if the slot is empty, `Some(false)` if it was already
    /// pending destruction.
    fn mark_for_destroy(&self, index: usize) -> Option<bool> {
        {
            let mut systems = self.inner.systems.borrow_mut();
            let entry = systems.get_mut(index)?;
            match entry.state {
                SystemState::PendingDestroy { .. } => return Some(false),
                state => {
                    entry.state = SystemState::PendingDestroy {
                        created: state.is_created(),
                    }
                }
            }
        }
        self.inner
            .scheduler
            .borrow_mut()
            .enqueue(Stage::Destroy, index);
        Some(true)
    }

    fn vacant_system_index<T: System>(&self) -> Result<usize, RegistrationError> {
        let index = self.inner.system_types.borrow_mut().index_of::<T>();
        let state = self
            .inner
            .systems
            .borrow()
            .get(index)
            .map(|entry| entry.state);
        match state {
            None => Ok(index),
            Some(SystemState::PendingDestroy { .. }) => {
                Err(RegistrationError::PendingDestroy(type_name::<T>()))
            }
            Some(_) => Err(RegistrationError::AlreadyRegistered(type_name::<T>())),
        }
    }

    fn insert_system<T: System>(&self, index: usize, system: T) {
        let name = type_name::<T>();
        self.inner.systems.borrow_mut().insert(
            index,
            SystemEntry {
                name,
                value: Rc::new(RefCell::new(system)),
                state: SystemState::PendingCreate,
            },
        );

        let mut scheduler = self.inner.scheduler.borrow_mut();
        for stage in T::STAGES.iter() {
            scheduler.bind(index, stage, hook_for::<T>(stage));
        }
        scheduler.enqueue(Stage::Create, index);

        debug!(
            context = %self.inner.id,
            system = name,
            index,
            hooks = ?T::STAGES,
            "system registered"
        );
    }
}
