//! Connected clients

use std::collections::{BTreeSet, VecDeque};

use tessera_proto::{ClientId, Event, WindowId};
use tokio::sync::mpsc;

/// Where a client's events go
#[derive(Debug)]
pub enum EventSink {
    /// Kept in memory for in-process clients
    Local(VecDeque<Event>),
    /// Handed to the connection's writer task
    Remote(mpsc::UnboundedSender<Event>),
}

/// Server-side state of one connection
#[derive(Debug)]
pub struct ClientConnection {
    pub id: ClientId,
    pub name: String,
    pub pid: u32,
    sink: EventSink,
    /// Granted ids not yet used for a window
    reserved: BTreeSet<WindowId>,
}

impl ClientConnection {
    pub fn new(id: ClientId, sink: EventSink) -> Self {
        Self {
            id,
            name: String::new(),
            pid: 0,
            sink,
            reserved: BTreeSet::new(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self.sink, EventSink::Local(_))
    }

    /// Queue an event; false when the writer has gone away
    pub fn send(&mut self, event: Event) -> bool {
        match &mut self.sink {
            EventSink::Local(queue) => {
                queue.push_back(event);
                true
            }
            EventSink::Remote(tx) => tx.send(event).is_ok(),
        }
    }

    /// Drain events queued for an in-process client
    pub fn take_events(&mut self) -> Vec<Event> {
        match &mut self.sink {
            EventSink::Local(queue) => queue.drain(..).collect(),
            EventSink::Remote(_) => Vec::new(),
        }
    }

    pub fn reserve(&mut self, first: WindowId, count: u32) {
        self.reserved.extend(first..first + count);
    }

    /// Consume a granted id; false when it was never granted
    pub fn claim(&mut self, window: WindowId) -> bool {
        self.reserved.remove(&window)
    }

    pub fn reserved(&self) -> usize {
        self.reserved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_can_be_claimed_once() {
        let mut client = ClientConnection::new(1, EventSink::Local(VecDeque::new()));
        client.reserve(10, 3);
        assert!(client.claim(11));
        assert!(!client.claim(11));
        assert!(!client.claim(13));
        assert_eq!(client.reserved(), 2);
    }

    #[test]
    fn remote_sink_reports_closed_writer() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut client = ClientConnection::new(1, EventSink::Remote(tx));
        assert!(client.send(Event::SelectionClear { window: 1 }));
        drop(rx);
        assert!(!client.send(Event::SelectionClear { window: 1 }));
        assert!(client.take_events().is_empty());
    }
}
