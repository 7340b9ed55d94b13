//! Typed object handles
//!
//! Every runtime object is addressed through a handle: an opaque, non-zero
//! 64-bit value issued by the registry. Handles are never reused for the
//! lifetime of a [`Runtime`](crate::Runtime), so a stale handle can only ever
//! fail to resolve.

use std::fmt;
use std::num::NonZeroU64;

/// The kind of object a handle refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Platform,
    Device,
    Context,
    Queue,
    Mem,
    Program,
    Kernel,
    Event,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandleKind::Platform => "platform",
            HandleKind::Device => "device",
            HandleKind::Context => "context",
            HandleKind::Queue => "command queue",
            HandleKind::Mem => "memory object",
            HandleKind::Program => "program",
            HandleKind::Kernel => "kernel",
            HandleKind::Event => "event",
        };
        f.write_str(name)
    }
}

/// Common behaviour of the typed handle wrappers
pub trait Handle: Copy + Eq + std::hash::Hash + fmt::Debug {
    const KIND: HandleKind;

    /// Wrap a raw value; `None` for the null handle
    fn from_raw(raw: u64) -> Option<Self>;

    fn from_nonzero(raw: NonZeroU64) -> Self;

    fn raw(self) -> u64;
}

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident => $kind:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(transparent)]
        pub struct $name(NonZeroU64);

        impl Handle for $name {
            const KIND: HandleKind = HandleKind::$kind;

            fn from_raw(raw: u64) -> Option<Self> {
                NonZeroU64::new(raw).map(Self)
            }

            fn from_nonzero(raw: NonZeroU64) -> Self {
                Self(raw)
            }

            fn raw(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0.get())
            }
        }
    };
}

define_handle!(
    /// Handle of the platform
    PlatformId => Platform
);
define_handle!(
    /// Handle of a compute device
    DeviceId => Device
);
define_handle!(
    /// Handle of a context
    ContextId => Context
);
define_handle!(
    /// Handle of a command queue
    QueueId => Queue
);
define_handle!(
    /// Handle of a buffer
    MemId => Mem
);
define_handle!(
    /// Handle of a program
    ProgramId => Program
);
define_handle!(
    /// Handle of a kernel
    KernelId => Kernel
);
define_handle!(
    /// Handle of an event
    EventId => Event
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handle_is_rejected() {
        assert!(ContextId::from_raw(0).is_none());
        assert_eq!(MemId::from_raw(7).map(Handle::raw), Some(7));
    }

    #[test]
    fn test_handle_kind_display() {
        assert_eq!(QueueId::KIND.to_string(), "command queue");
        assert_eq!(HandleKind::Mem.to_string(), "memory object");
    }
}
