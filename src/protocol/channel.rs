//! Message channel abstraction
//!
//! `post` takes the message by value. Once posted, the sender has no
//! handle left on the message or on any buffer it carries.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::codec::ProtocolError;

/// Fire-and-forget, order-preserving sender side of a channel
pub trait MessageChannel<M> {
    fn post(&mut self, message: M) -> Result<(), ChannelError>;
}

/// Channel failures (never retried)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("Queue '{0}' is not available")]
    Unavailable(String),
    #[error("Host rejected message: {0}")]
    Host(String),
}

/// Create an in-process channel for a single-threaded host
pub fn memory_channel<M>() -> (MemorySender<M>, MemoryReceiver<M>) {
    let queue = Rc::new(RefCell::new(VecDeque::new()));
    (
        MemorySender {
            queue: Rc::clone(&queue),
        },
        MemoryReceiver { queue },
    )
}

/// Sending half of [`memory_channel`]
pub struct MemorySender<M> {
    queue: Rc<RefCell<VecDeque<M>>>,
}

impl<M> MessageChannel<M> for MemorySender<M> {
    fn post(&mut self, message: M) -> Result<(), ChannelError> {
        self.queue.borrow_mut().push_back(message);
        Ok(())
    }
}

/// Receiving half of [`memory_channel`]
pub struct MemoryReceiver<M> {
    queue: Rc<RefCell<VecDeque<M>>>,
}

impl<M> MemoryReceiver<M> {
    pub fn try_recv(&self) -> Option<M> {
        self.queue.borrow_mut().pop_front()
    }

    /// Take every pending message, oldest first
    pub fn drain(&self) -> Vec<M> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
