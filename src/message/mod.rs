pub mod envelope;
pub mod literal;
pub mod predicates;
pub mod session;

pub use envelope::{Envelope, EnvelopeError, Header};
pub use predicates::Predicate;
pub use session::Session;
