pub mod calls;
pub mod core;
pub mod history;
pub mod session;

pub use core::{
    config::{FatalPolicy, LiveApiConfig},
    errors::LiveApiError,
    traits::{CallInvoker, Clock, SystemClock},
    types::*,
};
pub use session::{LiveApi, PendingResponse, ERROR_CHANNEL};
