//! Hand-off from every worker to the single publisher.
//!
//! Unbounded and FIFO. There is no ordering across senders, but everything
//! one sender enqueues is received in enqueue order.

use tokio::sync::mpsc;

use super::{error::QueueClosed, event::OutboundEvent};

pub fn event_queue() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, EventReceiver { rx })
}

#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl EventSender {
    pub fn send(&self, event: OutboundEvent) -> Result<(), QueueClosed> {
        self.tx.send(event).map_err(|_| QueueClosed)
    }

    /// Enqueues one cycle's events back to back. Stops at the first failure,
    /// which only happens once the receiver is gone.
    pub fn send_batch(&self, events: Vec<OutboundEvent>) -> Result<usize, QueueClosed> {
        let count = events.len();
        for event in events {
            self.send(event)?;
        }
        Ok(count)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<OutboundEvent>,
}

impl EventReceiver {
    /// `None` once every sender is dropped and the queue is empty.
    pub async fn recv(&mut self) -> Option<OutboundEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<OutboundEvent> {
        self.rx.try_recv().ok()
    }

    /// Refuses further sends while keeping already queued events readable.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
