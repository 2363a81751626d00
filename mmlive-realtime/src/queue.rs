//! Outbound queue for messages produced while no socket is open.

use crate::protocol::OutboundMessage;
use std::collections::VecDeque;

/// Strict FIFO of outbound messages.
///
/// Drained once per transition into the open state, in insertion order.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message.
    pub fn enqueue(&mut self, message: OutboundMessage) {
        self.messages.push_back(message);
    }

    /// Take every queued message in insertion order.
    pub fn drain(&mut self) -> Vec<OutboundMessage> {
        self.messages.drain(..).collect()
    }

    /// Put messages that could not be transmitted back in front of the
    /// queue, keeping their relative order.
    pub fn requeue_front(&mut self, messages: impl IntoIterator<Item = OutboundMessage>) {
        let messages: Vec<_> = messages.into_iter().collect();
        for message in messages.into_iter().rev() {
            self.messages.push_front(message);
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
