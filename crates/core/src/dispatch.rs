//! Dispatch loop: transport bookkeeping and on-demand frame delivery.
//!
//! Per connection, delivery is driven entirely by writable notifications:
//!
//! ```text
//! Accepted(c)     -> register c, request writable
//! Writable(c)     -> read slot, send if there is something to send,
//!                    request writable again
//!                    (fatal send error: close + unregister c instead)
//! Closed(c)       -> unregister c (no-op if absent)
//! DataReceived(c) -> ignored, the stream is one-way
//! ```
//!
//! Because every writable opportunity re-arms itself, each client is fed
//! as fast as it drains its socket, and a slow client simply skips the
//! versions it was too slow to see. No per-connection queue exists.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::connection::{ConnectionId, ConnectionRegistry, Transport, TransportEvent};
use crate::frame::FrameSlot;
use crate::producer::pause;
use crate::stats::ServerStats;

/// What to do when a connection becomes writable but the slot still holds
/// the frame it was last sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Re-send the current frame on every writable notification.
    EveryWritable,
    /// Send only versions newer than the last one this connection received.
    #[default]
    ChangedOnly,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Upper bound for one [`Transport::service`] call.
    pub service_timeout: Duration,
    /// Pause between loop iterations.
    pub idle_pause: Duration,
    /// Re-request writability for every open connection each iteration.
    pub liveness_backstop: bool,
    pub policy: DeliveryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            service_timeout: Duration::from_millis(10),
            idle_pause: Duration::from_millis(1),
            liveness_backstop: true,
            policy: DeliveryPolicy::default(),
        }
    }
}

/// Totals returned when the dispatch thread exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub accepted: u64,
    pub closed: u64,
    pub frames_sent: u64,
    pub send_failures: u64,
}

pub struct Dispatcher {
    slot: Arc<FrameSlot>,
    stats: Arc<ServerStats>,
    config: DispatchConfig,
    registry: ConnectionRegistry,
    events: Vec<TransportEvent>,
    report: DispatchReport,
}

impl Dispatcher {
    pub fn new(slot: Arc<FrameSlot>, stats: Arc<ServerStats>, config: DispatchConfig) -> Self {
        Self {
            slot,
            stats,
            config,
            registry: ConnectionRegistry::new(),
            events: Vec::new(),
            report: DispatchReport::default(),
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn report(&self) -> DispatchReport {
        self.report
    }

    /// Apply one transport notification.
    pub fn handle(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Accepted(conn) => {
                let id = conn.id();
                let peer = conn.peer_addr();
                if !self.registry.insert(conn) {
                    return;
                }
                self.report.accepted += 1;
                self.stats.connection_opened();

                match peer {
                    Some(peer) => tracing::info!(conn = %id, %peer, "client connected"),
                    None => tracing::info!(conn = %id, "client connected"),
                }

                // Prime the first delivery instead of waiting for the backstop.
                if let Some(member) = self.registry.get_mut(id) {
                    member.handle().request_writable();
                }
            }
            TransportEvent::Writable(id) => self.deliver(id),
            TransportEvent::Closed(id) => {
                if self.registry.remove(id).is_some() {
                    self.report.closed += 1;
                    self.stats.connection_closed();
                    tracing::info!(conn = %id, "client disconnected");
                } else {
                    tracing::trace!(conn = %id, "close for unregistered connection");
                }
            }
            TransportEvent::DataReceived(id, data) => {
                tracing::debug!(conn = %id, bytes = data.len(), "ignoring client message");
            }
        }
    }

    fn deliver(&mut self, id: ConnectionId) {
        let Some(member) = self.registry.get_mut(id) else {
            tracing::trace!(conn = %id, "writable for unregistered connection");
            return;
        };

        let frame = match self.config.policy {
            DeliveryPolicy::EveryWritable => self.slot.get(),
            DeliveryPolicy::ChangedOnly => self.slot.get_newer(member.last_sent()),
        };

        let Some(frame) = frame else {
            member.handle().request_writable();
            return;
        };

        match member.handle().send(frame.data()) {
            Ok(()) => {
                member.mark_sent(frame.version());
                member.handle().request_writable();
                self.report.frames_sent += 1;
                self.stats.frame_sent();
                tracing::trace!(conn = %id, version = frame.version(), size = frame.len(), "frame sent");
            }
            Err(e) if !e.is_fatal() => {
                member.handle().request_writable();
                tracing::trace!(conn = %id, version = frame.version(), "send deferred: {e}");
            }
            Err(e) => {
                self.report.send_failures += 1;
                self.stats.send_failed();
                tracing::warn!(conn = %id, error = %e, "send failed, dropping connection");

                if let Some(mut handle) = self.registry.remove(id) {
                    handle.close();
                    self.report.closed += 1;
                    self.stats.connection_closed();
                }
            }
        }
    }

    /// One loop iteration: service the transport, apply every notification,
    /// then re-arm writability for all open connections if configured.
    /// Returns the number of notifications handled.
    pub fn cycle(&mut self, transport: &mut dyn Transport) -> usize {
        let mut events = std::mem::take(&mut self.events);

        if let Err(e) = transport.service(self.config.service_timeout, &mut events) {
            tracing::warn!(error = %e, "transport service failed");
        }

        let handled = events.len();
        for event in events.drain(..) {
            self.handle(event);
        }
        self.events = events;

        if self.config.liveness_backstop {
            for member in self.registry.members_mut() {
                member.handle().request_writable();
            }
        }

        handled
    }

    /// Close and unregister every connection.
    pub fn close_all(&mut self) {
        let mut closed = 0u64;
        for mut handle in self.registry.drain() {
            handle.close();
            closed += 1;
        }
        for _ in 0..closed {
            self.stats.connection_closed();
        }
        self.report.closed += closed;
        if closed > 0 {
            tracing::debug!(closed, "closed remaining connections");
        }
    }

    /// Cycle until `running` is cleared, then close every connection.
    pub fn run(mut self, transport: &mut dyn Transport, running: &AtomicBool) -> DispatchReport {
        tracing::debug!(policy = ?self.config.policy, "dispatch loop started");

        while running.load(Ordering::SeqCst) {
            self.cycle(transport);
            pause(running, self.config.idle_pause);
        }

        self.close_all();
        tracing::debug!(
            accepted = self.report.accepted,
            frames_sent = self.report.frames_sent,
            send_failures = self.report.send_failures,
            "dispatch loop exited"
        );
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::mock::{MockConnection, MockProbe, MockTransport};
    use bytes::Bytes;

    fn dispatcher(policy: DeliveryPolicy) -> (Dispatcher, Arc<FrameSlot>) {
        let slot = Arc::new(FrameSlot::new());
        let config = DispatchConfig {
            policy,
            ..DispatchConfig::default()
        };
        let dispatcher = Dispatcher::new(slot.clone(), Arc::new(ServerStats::new()), config);
        (dispatcher, slot)
    }

    fn open(dispatcher: &mut Dispatcher, raw: u64) -> MockProbe {
        let (conn, probe) = MockConnection::new(raw);
        dispatcher.handle(TransportEvent::Accepted(Box::new(conn)));
        probe
    }

    fn sent(probe: &MockProbe) -> Vec<Bytes> {
        probe.sent()
    }

    #[test]
    fn accept_registers_and_primes_writable() {
        let (mut d, _slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let probe = open(&mut d, 1);
        assert!(d.registry().contains(probe.id()));
        assert_eq!(probe.writable_requests(), 1);
    }

    #[test]
    fn writable_on_empty_slot_sends_nothing_but_rearms() {
        let (mut d, _slot) = dispatcher(DeliveryPolicy::EveryWritable);
        let probe = open(&mut d, 1);
        d.handle(TransportEvent::Writable(probe.id()));
        assert!(sent(&probe).is_empty());
        assert_eq!(probe.writable_requests(), 2);
    }

    #[test]
    fn two_clients_see_frames_in_order() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::EveryWritable);
        let a = open(&mut d, 1);
        let b = open(&mut d, 2);

        slot.put(&b"F1"[..]);
        d.handle(TransportEvent::Writable(a.id()));
        d.handle(TransportEvent::Writable(b.id()));
        slot.put(&b"F2"[..]);
        d.handle(TransportEvent::Writable(a.id()));

        assert_eq!(sent(&a), vec![Bytes::from_static(b"F1"), Bytes::from_static(b"F2")]);
        assert_eq!(sent(&b), vec![Bytes::from_static(b"F1")]);
    }

    #[test]
    fn every_writable_resends_unchanged_frame() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::EveryWritable);
        let a = open(&mut d, 1);
        slot.put(&b"F1"[..]);
        d.handle(TransportEvent::Writable(a.id()));
        d.handle(TransportEvent::Writable(a.id()));
        assert_eq!(sent(&a).len(), 2);
    }

    #[test]
    fn changed_only_skips_duplicates() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let a = open(&mut d, 1);

        slot.put(&b"F1"[..]);
        d.handle(TransportEvent::Writable(a.id()));
        d.handle(TransportEvent::Writable(a.id()));
        slot.put(&b"F2"[..]);
        slot.put(&b"F3"[..]);
        d.handle(TransportEvent::Writable(a.id()));
        d.handle(TransportEvent::Writable(a.id()));

        // F2 was overwritten before a could see it.
        assert_eq!(sent(&a), vec![Bytes::from_static(b"F1"), Bytes::from_static(b"F3")]);
        assert_eq!(d.registry().ids(), vec![a.id()]);
    }

    #[test]
    fn send_failure_only_drops_that_connection() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::EveryWritable);
        let a = open(&mut d, 1);
        let b = open(&mut d, 2);
        slot.put(&b"F1"[..]);

        a.fail_sends();
        d.handle(TransportEvent::Writable(a.id()));
        d.handle(TransportEvent::Writable(b.id()));

        assert!(a.is_closed());
        assert!(!d.registry().contains(a.id()));
        assert_eq!(sent(&b), vec![Bytes::from_static(b"F1")]);

        // Later cycles keep serving b; stale writables for a are ignored.
        slot.put(&b"F2"[..]);
        d.handle(TransportEvent::Writable(a.id()));
        d.handle(TransportEvent::Writable(b.id()));
        assert_eq!(sent(&b).len(), 2);
        assert_eq!(d.report().send_failures, 1);
    }

    #[test]
    fn backpressure_keeps_connection_open() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let a = open(&mut d, 1);
        slot.put(&b"F1"[..]);

        a.set_backpressure(true);
        d.handle(TransportEvent::Writable(a.id()));
        assert!(d.registry().contains(a.id()));
        assert!(sent(&a).is_empty());

        // The skipped version is still pending for this connection.
        a.set_backpressure(false);
        d.handle(TransportEvent::Writable(a.id()));
        assert_eq!(sent(&a), vec![Bytes::from_static(b"F1")]);
    }

    #[test]
    fn closed_before_writable_gets_no_sends() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::EveryWritable);
        slot.put(&b"F1"[..]);
        let c = open(&mut d, 7);

        d.handle(TransportEvent::Closed(c.id()));
        d.handle(TransportEvent::Writable(c.id()));

        assert!(d.registry().is_empty());
        assert!(sent(&c).is_empty());
    }

    #[test]
    fn peer_closing_before_first_writable_gets_nothing() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::EveryWritable);
        let (mut transport, handle) = MockTransport::new();
        slot.put(&b"F1"[..]);

        let c = handle.accept(7);
        handle.close(&c);
        d.cycle(&mut transport);
        d.cycle(&mut transport);
        d.cycle(&mut transport);

        assert!(d.registry().is_empty());
        assert!(sent(&c).is_empty());
        assert_eq!(d.report().accepted, 1);
        assert_eq!(d.report().closed, 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut d, _slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let a = open(&mut d, 1);
        d.handle(TransportEvent::Closed(a.id()));
        d.handle(TransportEvent::Closed(a.id()));
        d.handle(TransportEvent::Closed(ConnectionId::from(404)));
        assert_eq!(d.report().closed, 1);
    }

    #[test]
    fn registry_size_matches_open_connections() {
        let (mut d, _slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let probes: Vec<_> = (1..=8).map(|raw| open(&mut d, raw)).collect();
        for probe in &probes[..3] {
            d.handle(TransportEvent::Closed(probe.id()));
        }
        assert_eq!(d.registry().len(), 5);
    }

    #[test]
    fn incoming_data_is_ignored() {
        let (mut d, _slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let a = open(&mut d, 1);
        d.handle(TransportEvent::DataReceived(a.id(), Bytes::from_static(b"pause")));
        assert!(d.registry().contains(a.id()));
        assert!(sent(&a).is_empty());
    }

    #[test]
    fn single_client_observes_every_persisting_version() {
        let (mut d, slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let (mut transport, handle) = MockTransport::new();
        let a = handle.accept(1);

        for i in 0..20u8 {
            slot.put(vec![i]);
            // Each version persists for a couple of cycles.
            d.cycle(&mut transport);
            d.cycle(&mut transport);
        }

        let versions: Vec<u8> = sent(&a).iter().map(|b| b[0]).collect();
        assert_eq!(versions, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn run_closes_connections_on_exit() {
        let (d, slot) = dispatcher(DeliveryPolicy::ChangedOnly);
        let (mut transport, handle) = MockTransport::new();
        let a = handle.accept(1);
        slot.put(&b"F1"[..]);

        let running = AtomicBool::new(true);
        std::thread::scope(|s| {
            let worker = s.spawn(|| d.run(&mut transport, &running));
            let started = std::time::Instant::now();
            while a.sent().is_empty() && started.elapsed() < Duration::from_secs(5) {
                std::thread::sleep(Duration::from_millis(1));
            }
            running.store(false, Ordering::SeqCst);
            let report = worker.join().unwrap();
            assert_eq!(report.accepted, 1);
            assert_eq!(report.closed, 1);
        });

        assert!(a.is_closed());
        assert_eq!(sent(&a), vec![Bytes::from_static(b"F1")]);
    }
}
