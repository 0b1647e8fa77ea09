#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::needless_pass_by_value,
    clippy::redundant_closure_for_method_calls,
    clippy::return_self_not_must_use,
    clippy::similar_names,
    clippy::single_match_else,
    clippy::struct_field_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

//! Async correlation bridge between a client process and a long-lived
//! compute kernel.
//!
//! Requests go out on a request/reply channel; replies, results and output
//! come back interleaved on that channel and on a publish/subscribe channel.
//! Each channel owns a [`correlation::Registry`] of pending waiters keyed by
//! causation id, fed by a single delivery task.

pub mod channels;
pub mod client;
pub mod config;
pub mod correlation;
pub mod errors;
pub mod manager;
pub mod message;
pub mod transport;

pub use client::{ClientError, ExecuteRequest, KernelClient};
pub use config::Config;
pub use correlation::{FiniteStream, Registry};
pub use errors::{ExecutionFailure, StreamIntegrityError};
pub use manager::{BurdockManager, ManagerError, ManagerRegistry};
pub use message::{Envelope, Predicate, Session};
