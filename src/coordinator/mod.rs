//! Streaming response coordination.

pub mod events;
pub mod generation;
pub mod session;

pub use events::{CoordinatorEvent, ExchangeOutcome};
pub use generation::GenerationCoordinator;
pub use session::{ExchangeInProgress, ExchangeState, SessionContext, SessionSnapshot};
