use crate::core::errors::LiveApiError;
use async_trait::async_trait;
use serde_json::Value;

/// Anything that can run a registry call and wait for its response
#[async_trait]
pub trait CallInvoker: Send + Sync {
    /// Invoke a named call with positional arguments and await the response frame
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, LiveApiError>;
}

/// Source of the current wall-clock time in epoch seconds
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock frozen at a fixed instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_epoch(&self) -> i64 {
        self.0
    }
}
