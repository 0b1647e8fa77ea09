//! Causation-id keyed correlation of inbound envelopes to pending waiters.

pub mod registry;
pub mod stream;

pub use registry::{Latch, Promise, Registry, RegistryError, StreamSubscription, WaiterKey};
pub use stream::{FiniteStream, StreamError};
