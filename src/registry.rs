//! Handle registry
//!
//! Maps handles to live objects together with their explicit reference
//! counts. One mutex guards the whole table, including the per-context
//! child sets. Objects removed from the table are handed back to the caller
//! so that teardown (closing a queue) happens outside the lock. Children are
//! only admitted while their context is still in the table.

use std::num::NonZeroU64;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::ContextReleasePolicy;
use crate::error::{ClError, Result};
use crate::handle::*;
use crate::runtime::{Buffer, Context, Device, Event, Kernel, Platform, Program, Queue};

/// A registered object
#[derive(Clone)]
pub(crate) enum Object {
    Platform(Arc<Platform>),
    Device(Arc<Device>),
    Context(Arc<Context>),
    Queue(Arc<Queue>),
    Mem(Arc<Buffer>),
    Program(Arc<Program>),
    Kernel(Arc<Kernel>),
    Event(Arc<Event>),
}

impl Object {
    fn kind(&self) -> HandleKind {
        match self {
            Object::Platform(_) => HandleKind::Platform,
            Object::Device(_) => HandleKind::Device,
            Object::Context(_) => HandleKind::Context,
            Object::Queue(_) => HandleKind::Queue,
            Object::Mem(_) => HandleKind::Mem,
            Object::Program(_) => HandleKind::Program,
            Object::Kernel(_) => HandleKind::Kernel,
            Object::Event(_) => HandleKind::Event,
        }
    }

    /// Owning context of a context-scoped child
    ///
    /// Events are deliberately absent: they reference their context but do
    /// not keep it from being released.
    fn parent(&self) -> Option<u64> {
        match self {
            Object::Queue(q) => Some(q.context_id().raw()),
            Object::Mem(m) => Some(m.context_id().raw()),
            Object::Program(p) => Some(p.context_id().raw()),
            Object::Kernel(k) => Some(k.context_id().raw()),
            _ => None,
        }
    }

    /// Final teardown once the object has left the table
    pub(crate) fn destroy(self) {
        if let Object::Queue(queue) = self {
            queue.shutdown();
        }
    }
}

/// Types that can live in the registry
pub(crate) trait Registered: Sized {
    type Id: Handle;

    fn wrap(object: Arc<Self>) -> Object;

    fn unwrap(object: &Object) -> Option<&Arc<Self>>;
}

macro_rules! registered {
    ($ty:ty, $id:ty, $variant:ident) => {
        impl Registered for $ty {
            type Id = $id;

            fn wrap(object: Arc<Self>) -> Object {
                Object::$variant(object)
            }

            fn unwrap(object: &Object) -> Option<&Arc<Self>> {
                match object {
                    Object::$variant(o) => Some(o),
                    _ => None,
                }
            }
        }
    };
}

registered!(Platform, PlatformId, Platform);
registered!(Device, DeviceId, Device);
registered!(Context, ContextId, Context);
registered!(Queue, QueueId, Queue);
registered!(Buffer, MemId, Mem);
registered!(Program, ProgramId, Program);
registered!(Kernel, KernelId, Kernel);
registered!(Event, EventId, Event);

struct Entry {
    object: Object,
    refs: u32,
}

struct Table {
    next: u64,
    entries: FxHashMap<u64, Entry>,
    /// Live children per context handle
    children: FxHashMap<u64, FxHashSet<u64>>,
}

impl Table {
    fn allocate(&mut self) -> NonZeroU64 {
        let raw = NonZeroU64::new(self.next).unwrap_or(NonZeroU64::MIN);
        self.next = raw.get() + 1;
        raw
    }

    fn entry<T: Registered>(&self, id: T::Id) -> Result<(&Entry, &Arc<T>)> {
        self.entries
            .get(&id.raw())
            .and_then(|entry| T::unwrap(&entry.object).map(|object| (entry, object)))
            .ok_or(ClError::InvalidHandle(<T::Id as Handle>::KIND))
    }

    fn register(&mut self, raw: u64, object: Object) {
        trace!("registered {} {:#x}", object.kind(), raw);
        self.entries.insert(raw, Entry { object, refs: 1 });
    }

    fn child_count(&self, context: u64) -> usize {
        self.children.get(&context).map_or(0, FxHashSet::len)
    }

    fn remove(&mut self, raw: u64) -> Option<Object> {
        let entry = self.entries.remove(&raw)?;
        if let Some(parent) = entry.object.parent() {
            if let Some(set) = self.children.get_mut(&parent) {
                set.remove(&raw);
            }
        }
        if matches!(entry.object, Object::Context(_)) {
            self.children.remove(&raw);
        }
        Some(entry.object)
    }
}

/// Outcome of a release
pub(crate) enum Released {
    /// References remain
    Alive(u32),
    /// The object and any force-released children left the table
    Destroyed(Vec<Object>),
}

pub(crate) struct Registry {
    inner: Mutex<Table>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Table {
                next: 1,
                entries: FxHashMap::default(),
                children: FxHashMap::default(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a handle value for an object that needs to know its own id
    pub(crate) fn reserve<I: Handle>(&self) -> I {
        I::from_nonzero(self.lock().allocate())
    }

    /// Register a context-less object with one reference under a fresh handle
    pub(crate) fn insert<T: Registered>(&self, object: Arc<T>) -> T::Id {
        let object = T::wrap(object);
        debug_assert!(object.parent().is_none());
        let mut table = self.lock();
        let id = T::Id::from_nonzero(table.allocate());
        table.register(id.raw(), object);
        id
    }

    /// Register a context-scoped child with one reference under a fresh handle
    pub(crate) fn insert_child<T: Registered>(&self, object: Arc<T>) -> Result<T::Id> {
        let id = self.reserve::<T::Id>();
        self.insert_child_at(id, object)?;
        Ok(id)
    }

    /// Register a child under a handle obtained from [`Registry::reserve`]
    ///
    /// Checked under the table lock: once the owning context has left the
    /// table no child can join it, and the object is handed back to the
    /// caller's drop instead.
    pub(crate) fn insert_child_at<T: Registered>(&self, id: T::Id, object: Arc<T>) -> Result<()> {
        let object = T::wrap(object);
        let parent = object.parent().ok_or(ClError::InvalidContext)?;
        let mut table = self.lock();
        let live = table
            .entries
            .get(&parent)
            .is_some_and(|entry| matches!(entry.object, Object::Context(_)));
        if !live {
            debug!(
                "refusing {} {:#x}: context {:#x} is gone",
                object.kind(),
                id.raw(),
                parent
            );
            return Err(ClError::InvalidContext);
        }
        table.children.entry(parent).or_default().insert(id.raw());
        table.register(id.raw(), object);
        Ok(())
    }

    pub(crate) fn resolve<T: Registered>(&self, id: T::Id) -> Result<Arc<T>> {
        let table = self.lock();
        table.entry::<T>(id).map(|(_, object)| object.clone())
    }

    /// Resolve a raw handle value as handed over by C callers
    pub(crate) fn resolve_raw<T: Registered>(&self, raw: u64) -> Result<Arc<T>> {
        let id = <T::Id as Handle>::from_raw(raw)
            .ok_or(ClError::InvalidHandle(<T::Id as Handle>::KIND))?;
        self.resolve::<T>(id)
    }

    pub(crate) fn contains<T: Registered>(&self, id: T::Id) -> bool {
        self.lock().entry::<T>(id).is_ok()
    }

    pub(crate) fn retain<T: Registered>(&self, id: T::Id) -> Result<()> {
        let mut table = self.lock();
        table.entry::<T>(id)?;
        if let Some(entry) = table.entries.get_mut(&id.raw()) {
            entry.refs = entry.refs.saturating_add(1);
        }
        Ok(())
    }

    /// Reported reference count; a context also counts its live children
    pub(crate) fn ref_count<T: Registered>(&self, id: T::Id) -> Result<u32> {
        let table = self.lock();
        let (entry, _) = table.entry::<T>(id)?;
        let children = match entry.object {
            Object::Context(_) => table.child_count(id.raw()),
            _ => 0,
        };
        Ok(entry
            .refs
            .saturating_add(u32::try_from(children).unwrap_or(u32::MAX)))
    }

    /// Drop one reference of a non-context object
    pub(crate) fn release<T: Registered>(&self, id: T::Id) -> Result<Released> {
        let mut table = self.lock();
        table.entry::<T>(id)?;
        let refs = match table.entries.get_mut(&id.raw()) {
            Some(entry) => {
                entry.refs -= 1;
                entry.refs
            }
            None => return Err(ClError::InvalidHandle(<T::Id as Handle>::KIND)),
        };
        if refs > 0 {
            return Ok(Released::Alive(refs));
        }
        trace!("destroyed {} {:#x}", <T::Id as Handle>::KIND, id.raw());
        Ok(Released::Destroyed(table.remove(id.raw()).into_iter().collect()))
    }

    /// Drop one reference of a context, applying `policy` to live children
    pub(crate) fn release_context(
        &self,
        id: ContextId,
        policy: ContextReleasePolicy,
    ) -> Result<Released> {
        let mut table = self.lock();
        let refs = table.entry::<Context>(id)?.0.refs;
        let children = table.child_count(id.raw());
        if refs > 1 {
            if let Some(entry) = table.entries.get_mut(&id.raw()) {
                entry.refs -= 1;
            }
            return Ok(Released::Alive(refs - 1 + children as u32));
        }
        if children > 0 && policy == ContextReleasePolicy::Strict {
            return Err(ClError::ContextInUse(children));
        }

        let mut destroyed = Vec::with_capacity(children + 1);
        let child_ids: Vec<u64> = table
            .children
            .get(&id.raw())
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if !child_ids.is_empty() {
            debug!(
                "Cascading release of context {:#x}: {} child object(s)",
                id.raw(),
                child_ids.len()
            );
        }
        // queues first so they stop accepting work before their buffers go
        let (queues, others): (Vec<u64>, Vec<u64>) = child_ids.into_iter().partition(|raw| {
            table
                .entries
                .get(raw)
                .is_some_and(|e| matches!(e.object, Object::Queue(_)))
        });
        for raw in queues.into_iter().chain(others) {
            destroyed.extend(table.remove(raw));
        }
        destroyed.extend(table.remove(id.raw()));
        Ok(Released::Destroyed(destroyed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Platform;

    fn platform() -> Arc<Platform> {
        Arc::new(Platform::new("test"))
    }

    #[test]
    fn test_handles_are_monotonic() {
        let registry = Registry::new();
        let a = registry.insert(platform());
        let b = registry.insert(platform());
        assert_eq!(a.raw(), 1);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_wrong_kind_fails_like_unknown() {
        let registry = Registry::new();
        let id = registry.insert(platform());
        let as_context = ContextId::from_raw(id.raw()).unwrap();
        assert_eq!(
            registry.resolve::<Context>(as_context).err(),
            Some(ClError::InvalidHandle(HandleKind::Context))
        );
        let unknown = PlatformId::from_raw(999).unwrap();
        assert_eq!(
            registry.resolve::<Platform>(unknown).err(),
            Some(ClError::InvalidHandle(HandleKind::Platform))
        );
    }

    #[test]
    fn test_retain_release_counts() {
        let registry = Registry::new();
        let id = registry.insert(platform());
        registry.retain::<Platform>(id).unwrap();
        assert_eq!(registry.ref_count::<Platform>(id).unwrap(), 2);
        assert!(matches!(
            registry.release::<Platform>(id).unwrap(),
            Released::Alive(1)
        ));
        assert!(matches!(
            registry.release::<Platform>(id).unwrap(),
            Released::Destroyed(_)
        ));
        assert!(!registry.contains::<Platform>(id));
        assert!(registry.release::<Platform>(id).is_err());
    }

    #[test]
    fn test_raw_null_is_invalid() {
        let registry = Registry::new();
        assert_eq!(
            registry.resolve_raw::<Platform>(0).err(),
            Some(ClError::InvalidHandle(HandleKind::Platform))
        );
    }
}
