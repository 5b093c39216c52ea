use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::connection::Transport;
use crate::dispatch::{DispatchConfig, DispatchReport, Dispatcher};
use crate::error::{CastError, Result};
use crate::frame::FrameSlot;
use crate::producer::{DEFAULT_FRAME_INTERVAL, Producer, ProducerReport};
use crate::source::FrameSource;
use crate::stats::{ServerStats, StatsSnapshot};

/// Server-level timing and delivery configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Pause between producer ticks.
    pub frame_interval: Duration,
    pub dispatch: DispatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            dispatch: DispatchConfig::default(),
        }
    }
}

/// Live frame server.
///
/// Owns the shared [`FrameSlot`] and the two worker threads: the producer,
/// which polls a [`FrameSource`] into the slot, and the dispatcher, which
/// drives a [`Transport`] and feeds every connected client from the slot.
/// Both threads watch one running flag; [`Server::stop`] clears it and
/// joins them. A [`StopHandle`] request is sticky: it also prevents a
/// later [`Server::start`] from spawning anything.
pub struct Server {
    config: ServerConfig,
    slot: Arc<FrameSlot>,
    stats: Arc<ServerStats>,
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    producer: Option<JoinHandle<ProducerReport>>,
    dispatcher: Option<JoinHandle<(DispatchReport, Box<dyn Transport>)>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            slot: Arc::new(FrameSlot::new()),
            stats: Arc::new(ServerStats::new()),
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            producer: None,
            dispatcher: None,
        }
    }

    /// Spawn the producer and dispatch threads.
    ///
    /// Both the source and the transport must already be initialized;
    /// anything that can fail at startup happens before this call. Returns
    /// [`CastError::StopRequested`] (after shutting `transport` down) if a
    /// [`StopHandle`] already asked for a stop.
    pub fn start(
        &mut self,
        source: Box<dyn FrameSource>,
        mut transport: Box<dyn Transport>,
    ) -> Result<()> {
        if self.running.load(Ordering::SeqCst) || self.producer.is_some() {
            return Err(CastError::AlreadyRunning);
        }

        // Set before the check so a concurrent request_stop() always wins.
        self.running.store(true, Ordering::SeqCst);
        if self.stop_requested.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            transport.shutdown();
            tracing::info!("stop requested before start, not starting");
            return Err(CastError::StopRequested);
        }

        let source_name = source.describe();
        let local_addr = transport.local_addr();

        let producer = Producer::new(
            source,
            self.slot.clone(),
            self.stats.clone(),
            self.config.frame_interval,
        );
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("framecast-producer".to_string())
            .spawn(move || producer.run(&running));
        match spawned {
            Ok(handle) => self.producer = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(CastError::ThreadSpawn(e.to_string()));
            }
        }

        let dispatcher = Dispatcher::new(
            self.slot.clone(),
            self.stats.clone(),
            self.config.dispatch.clone(),
        );
        let running = self.running.clone();
        let spawned = thread::Builder::new()
            .name("framecast-dispatch".to_string())
            .spawn(move || {
                let report = dispatcher.run(transport.as_mut(), &running);
                (report, transport)
            });
        match spawned {
            Ok(handle) => self.dispatcher = Some(handle),
            Err(e) => {
                self.stop();
                return Err(CastError::ThreadSpawn(e.to_string()));
            }
        }

        match local_addr {
            Some(addr) => tracing::info!(source = %source_name, %addr, "server started"),
            None => tracing::info!(source = %source_name, "server started"),
        }
        Ok(())
    }

    /// Stop both threads and release the transport. Idempotent, and a
    /// no-op before [`Server::start`].
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if self.producer.is_none() && self.dispatcher.is_none() {
            return;
        }
        tracing::info!("server stopping");

        if let Some(handle) = self.producer.take() {
            match handle.join() {
                Ok(report) => tracing::debug!(
                    ticks = report.ticks,
                    produced = report.produced,
                    skipped = report.skipped,
                    "producer joined"
                ),
                Err(_) => tracing::error!("producer thread panicked"),
            }
        }

        if let Some(handle) = self.dispatcher.take() {
            match handle.join() {
                Ok((report, mut transport)) => {
                    transport.shutdown();
                    tracing::debug!(
                        accepted = report.accepted,
                        frames_sent = report.frames_sent,
                        "dispatcher joined"
                    );
                }
                Err(_) => tracing::error!("dispatch thread panicked"),
            }
        }

        tracing::info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle that can request a stop from another thread or a signal
    /// handler. The owner still has to call [`Server::stop`] to join.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: self.running.clone(),
            stop_requested: self.stop_requested.clone(),
        }
    }

    pub fn slot(&self) -> Arc<FrameSlot> {
        self.slot.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl StopHandle {
    /// Ask the server to stop. Safe from signal handlers and at any point,
    /// including before or during [`Server::start`].
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }
}
