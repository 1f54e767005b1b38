//! Pending-operation queue.
//!
//! Operations wait here while every session is leased (or the client is not
//! running). With `DispatchOrder::Lifo` the queue is a plain stack: the most
//! recently submitted operation gets the next free session, which keeps a
//! traversal's freshly discovered subdirectories hot but offers no fairness
//! to older requests. `DispatchOrder::Fifo` serves requests in arrival order.

use crate::sftp_pool::types::DispatchOrder;
use std::collections::VecDeque;

pub(crate) struct OperationQueue<T> {
    items: VecDeque<T>,
    order: DispatchOrder,
}

impl<T> OperationQueue<T> {
    pub fn new(order: DispatchOrder) -> Self {
        Self {
            items: VecDeque::new(),
            order,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Next operation to dispatch according to the configured order.
    pub fn pop(&mut self) -> Option<T> {
        match self.order {
            DispatchOrder::Lifo => self.items.pop_back(),
            DispatchOrder::Fifo => self.items.pop_front(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
