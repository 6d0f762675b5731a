//! Bounded outbound buffer used while the bus is disconnected

use std::collections::VecDeque;

use bytes::Bytes;

use super::transport::QoS;

/// A publish waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination topic
    pub topic: String,
    /// Encoded payload
    pub payload: Bytes,
    /// Delivery guarantee
    pub qos: QoS,
}

/// FIFO of pending publishes that drops the oldest entry when full
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<OutboundMessage>,
    capacity: usize,
    dropped: u64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` messages (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    /// Append a message, returning the evicted oldest one if the queue was full
    pub fn push(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Put a message back at the head after a failed send.
    ///
    /// If the queue is full the newest entry is evicted instead, keeping
    /// the oldest-drop order for everything already queued behind it.
    pub fn requeue(&mut self, message: OutboundMessage) -> Option<OutboundMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.dropped += 1;
            self.items.pop_back()
        } else {
            None
        };
        self.items.push_front(message);
        evicted
    }

    /// Take the oldest message
    pub fn pop(&mut self) -> Option<OutboundMessage> {
        self.items.pop_front()
    }

    /// Number of buffered messages
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Messages dropped for lack of space since creation
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(n: u8) -> OutboundMessage {
        OutboundMessage {
            topic: format!("t/{}", n),
            payload: Bytes::from(vec![n]),
            qos: QoS::AtLeastOnce,
        }
    }

    #[test]
    fn test_drops_oldest_when_full() {
        let mut queue = OutboundQueue::new(2);
        assert!(queue.push(msg(1)).is_none());
        assert!(queue.push(msg(2)).is_none());
        assert_eq!(queue.push(msg(3)), Some(msg(1)));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.pop(), Some(msg(2)));
        assert_eq!(queue.pop(), Some(msg(3)));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_requeue_goes_to_front() {
        let mut queue = OutboundQueue::new(4);
        queue.push(msg(2));
        queue.requeue(msg(1));
        assert_eq!(queue.pop(), Some(msg(1)));
        assert_eq!(queue.pop(), Some(msg(2)));
    }

    #[test]
    fn test_zero_capacity_still_holds_one() {
        let mut queue = OutboundQueue::new(0);
        queue.push(msg(1));
        assert_eq!(queue.len(), 1);
    }
}
