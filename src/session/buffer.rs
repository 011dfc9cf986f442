use crate::session::core::SessionCore;
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

/// Deferred zero-argument action run against the session once it is ready
pub type Action = Box<dyn FnOnce(&mut SessionCore) + Send>;

/// Outgoing work held while the transport is not ready
///
/// Both queues are strictly FIFO. Sends are flushed before executes.
#[derive(Default)]
pub struct SendBuffer {
    sends: VecDeque<Value>,
    executes: VecDeque<Action>,
}

impl fmt::Debug for SendBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendBuffer")
            .field("sends", &self.sends.len())
            .field("executes", &self.executes.len())
            .finish()
    }
}

impl SendBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_send(&mut self, payload: Value) {
        self.sends.push_back(payload);
    }

    /// Put back a payload whose transmission failed, keeping its place
    pub fn requeue_send(&mut self, payload: Value) {
        self.sends.push_front(payload);
    }

    pub fn pop_send(&mut self) -> Option<Value> {
        self.sends.pop_front()
    }

    pub fn push_execute(&mut self, action: Action) {
        self.executes.push_back(action);
    }

    /// Take every queued action, oldest first
    pub fn take_executes(&mut self) -> Vec<Action> {
        self.executes.drain(..).collect()
    }

    pub fn pending_sends(&self) -> usize {
        self.sends.len()
    }

    pub fn pending_executes(&self) -> usize {
        self.executes.len()
    }

    pub fn has_sends(&self) -> bool {
        !self.sends.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sends_are_fifo() {
        let mut buffer = SendBuffer::new();
        buffer.push_send(json!({"n": 1}));
        buffer.push_send(json!({"n": 2}));
        buffer.push_send(json!({"n": 3}));

        let first = buffer.pop_send().unwrap();
        buffer.requeue_send(first);

        let drained: Vec<Value> = std::iter::from_fn(|| buffer.pop_send()).collect();
        assert_eq!(drained, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        assert!(!buffer.has_sends());
    }

    #[test]
    fn test_take_executes_empties_queue() {
        let mut buffer = SendBuffer::new();
        buffer.push_execute(Box::new(|_| {}));
        buffer.push_execute(Box::new(|_| {}));
        assert_eq!(buffer.pending_executes(), 2);
        assert_eq!(buffer.take_executes().len(), 2);
        assert_eq!(buffer.pending_executes(), 0);
    }
}
