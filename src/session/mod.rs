//! Session layer: correlation, buffering, replay and the async handle
//!
//! [`LiveApi`] is the public entry point. It forwards every operation to a
//! single task that owns a [`SessionCore`], so request bookkeeping and
//! transport events are processed strictly one at a time.

pub mod buffer;
pub mod core;
pub mod correlator;
pub mod events;
pub mod handle;
pub mod state;

pub use buffer::{Action, SendBuffer};
pub use self::core::SessionCore;
pub use correlator::{Correlator, PendingResponse, SettleOutcome, Settlement};
pub use events::{EventBroadcaster, ERROR_CHANNEL};
pub use handle::LiveApi;
pub use state::{AuthReplay, SubscriptionState};
