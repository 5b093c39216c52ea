//! In-memory connection and transport for driving dispatch in tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use super::{Connection, ConnectionId, Transport, TransportEvent};
use crate::error::{Result, SendError};

#[derive(Default)]
struct MockState {
    sent: Vec<Bytes>,
    writable_requests: usize,
    writable_pending: bool,
    closed: bool,
    fail_sends: bool,
    backpressure: bool,
}

pub(crate) struct MockConnection {
    id: ConnectionId,
    state: Arc<Mutex<MockState>>,
}

/// Test-side view of a [`MockConnection`].
#[derive(Clone)]
pub(crate) struct MockProbe {
    id: ConnectionId,
    state: Arc<Mutex<MockState>>,
}

impl MockConnection {
    pub(crate) fn new(raw: u64) -> (Self, MockProbe) {
        let state = Arc::new(Mutex::new(MockState::default()));
        let id = ConnectionId::from(raw);
        (
            Self {
                id,
                state: state.clone(),
            },
            MockProbe { id, state },
        )
    }
}

impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&mut self, payload: &Bytes) -> std::result::Result<(), SendError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(SendError::Closed);
        }
        if state.fail_sends {
            return Err(SendError::Io(std::io::ErrorKind::BrokenPipe.into()));
        }
        if state.backpressure {
            return Err(SendError::Backpressure);
        }
        state.sent.push(payload.clone());
        Ok(())
    }

    fn request_writable(&mut self) {
        let mut state = self.state.lock();
        state.writable_requests += 1;
        state.writable_pending = true;
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}

impl MockProbe {
    pub(crate) fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn sent(&self) -> Vec<Bytes> {
        self.state.lock().sent.clone()
    }

    pub(crate) fn writable_requests(&self) -> usize {
        self.state.lock().writable_requests
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub(crate) fn fail_sends(&self) {
        self.state.lock().fail_sends = true;
    }

    pub(crate) fn set_backpressure(&self, on: bool) {
        self.state.lock().backpressure = on;
    }

    fn take_writable(&self) -> bool {
        let mut state = self.state.lock();
        let ready = state.writable_pending && !state.closed;
        state.writable_pending = false;
        ready
    }
}

/// Scripted transport: tests push events through a [`MockTransportHandle`];
/// connections that requested writability get a `Writable` on every service.
pub(crate) struct MockTransport {
    inbox: Arc<Mutex<VecDeque<TransportEvent>>>,
    probes: Arc<Mutex<Vec<MockProbe>>>,
    shut_down: Arc<AtomicBool>,
}

#[derive(Clone)]
pub(crate) struct MockTransportHandle {
    inbox: Arc<Mutex<VecDeque<TransportEvent>>>,
    probes: Arc<Mutex<Vec<MockProbe>>>,
    shut_down: Arc<AtomicBool>,
}

impl MockTransport {
    pub(crate) fn new() -> (Self, MockTransportHandle) {
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let probes = Arc::new(Mutex::new(Vec::new()));
        let shut_down = Arc::new(AtomicBool::new(false));
        (
            Self {
                inbox: inbox.clone(),
                probes: probes.clone(),
                shut_down: shut_down.clone(),
            },
            MockTransportHandle {
                inbox,
                probes,
                shut_down,
            },
        )
    }
}

impl MockTransportHandle {
    /// Queue an accept for a new connection and return its probe.
    pub(crate) fn accept(&self, raw: u64) -> MockProbe {
        let (conn, probe) = MockConnection::new(raw);
        self.probes.lock().push(probe.clone());
        self.inbox
            .lock()
            .push_back(TransportEvent::Accepted(Box::new(conn)));
        probe
    }

    pub(crate) fn close(&self, probe: &MockProbe) {
        probe.state.lock().closed = true;
        self.inbox
            .lock()
            .push_back(TransportEvent::Closed(probe.id()));
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Transport for MockTransport {
    fn service(&mut self, timeout: Duration, events: &mut Vec<TransportEvent>) -> Result<()> {
        events.extend(self.inbox.lock().drain(..));

        for probe in self.probes.lock().iter() {
            if probe.take_writable() {
                events.push(TransportEvent::Writable(probe.id()));
            }
        }

        if events.is_empty() {
            thread::sleep(timeout.min(Duration::from_millis(1)));
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}
