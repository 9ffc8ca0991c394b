//! Async driver that owns an [`AlgoEngine`] inside a single tokio task.

use std::time::Duration;

use chrono::Utc;
use kestrel_core::{AlgoId, MarketSnapshot, OrderUpdate, Trade};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::AlgoEngine;
use crate::instance::{AlgoSnapshot, AlgoStatus, AlgoUpdate};
use crate::parent::ParentOrderSpec;
use crate::{EngineError, EngineResult};

const UPDATE_BUFFER: usize = 1_024;

/// Control requests answered through a oneshot channel.
#[derive(Debug)]
pub enum ControlCommand {
    Start {
        spec: ParentOrderSpec,
        reply: oneshot::Sender<EngineResult<AlgoId>>,
    },
    Pause {
        id: AlgoId,
        reply: oneshot::Sender<EngineResult<AlgoStatus>>,
    },
    Resume {
        id: AlgoId,
        reply: oneshot::Sender<EngineResult<AlgoStatus>>,
    },
    Stop {
        id: AlgoId,
        reply: oneshot::Sender<EngineResult<AlgoStatus>>,
    },
    StopAll {
        reply: oneshot::Sender<usize>,
    },
    Query {
        id: AlgoId,
        reply: oneshot::Sender<EngineResult<AlgoSnapshot>>,
    },
    ListActive {
        reply: oneshot::Sender<Vec<AlgoSnapshot>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Everything the engine task consumes, in arrival order.
#[derive(Debug)]
pub enum EngineEvent {
    Tick(MarketSnapshot),
    OrderUpdate(OrderUpdate),
    Trade(Trade),
    Command(ControlCommand),
}

/// Cloneable front door to a running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
    updates: broadcast::Sender<AlgoUpdate>,
}

impl EngineHandle {
    fn send(&self, event: EngineEvent) -> EngineResult<()> {
        self.tx.send(event).map_err(|_| EngineError::EngineStopped)
    }

    pub fn deliver_tick(&self, snapshot: MarketSnapshot) -> EngineResult<()> {
        self.send(EngineEvent::Tick(snapshot))
    }

    pub fn deliver_order_update(&self, update: OrderUpdate) -> EngineResult<()> {
        self.send(EngineEvent::OrderUpdate(update))
    }

    pub fn deliver_trade(&self, trade: Trade) -> EngineResult<()> {
        self.send(EngineEvent::Trade(trade))
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ControlCommand,
    ) -> EngineResult<T> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineEvent::Command(build(reply)))?;
        rx.await.map_err(|_| EngineError::EngineStopped)
    }

    pub async fn start(&self, spec: ParentOrderSpec) -> EngineResult<AlgoId> {
        self.request(|reply| ControlCommand::Start { spec, reply }).await?
    }

    pub async fn pause(&self, id: AlgoId) -> EngineResult<AlgoStatus> {
        self.request(|reply| ControlCommand::Pause { id, reply }).await?
    }

    pub async fn resume(&self, id: AlgoId) -> EngineResult<AlgoStatus> {
        self.request(|reply| ControlCommand::Resume { id, reply }).await?
    }

    pub async fn stop(&self, id: AlgoId) -> EngineResult<AlgoStatus> {
        self.request(|reply| ControlCommand::Stop { id, reply }).await?
    }

    pub async fn stop_all(&self) -> EngineResult<usize> {
        self.request(|reply| ControlCommand::StopAll { reply }).await
    }

    pub async fn query(&self, id: AlgoId) -> EngineResult<AlgoSnapshot> {
        self.request(|reply| ControlCommand::Query { id, reply }).await?
    }

    pub async fn list_active(&self) -> EngineResult<Vec<AlgoSnapshot>> {
        self.request(|reply| ControlCommand::ListActive { reply }).await
    }

    /// Stop every algo and end the engine task.
    pub async fn shutdown(&self) -> EngineResult<()> {
        self.request(|reply| ControlCommand::Shutdown { reply }).await
    }

    /// Receive every [`AlgoUpdate`] published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AlgoUpdate> {
        self.updates.subscribe()
    }
}

/// Owns the engine and drives it from the event queue and a periodic timer.
pub struct EngineRunner {
    engine: AlgoEngine,
    rx: mpsc::UnboundedReceiver<EngineEvent>,
    updates: broadcast::Sender<AlgoUpdate>,
    timer_interval: Duration,
}

impl EngineRunner {
    /// Move the engine into a background task. The join handle yields it back on exit.
    pub fn spawn(engine: AlgoEngine) -> (EngineHandle, JoinHandle<AlgoEngine>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let runner = Self {
            timer_interval: engine.config().timer_interval(),
            engine,
            rx,
            updates: updates.clone(),
        };
        let handle = EngineHandle { tx, updates };
        (handle, tokio::spawn(runner.run()))
    }

    async fn run(mut self) -> AlgoEngine {
        let mut timer = time::interval(self.timer_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.timer_interval.as_millis() as u64, "algo engine started");

        let mut shutdown_reply = None;
        loop {
            tokio::select! {
                biased;
                event = self.rx.recv() => {
                    match event {
                        Some(EngineEvent::Command(ControlCommand::Shutdown { reply })) => {
                            shutdown_reply = Some(reply);
                            break;
                        }
                        Some(event) => self.handle(event),
                        None => break,
                    }
                }
                _ = timer.tick() => {
                    self.engine.on_timer(Utc::now());
                }
            }
            self.publish();
        }

        let stopped = self.engine.stop_all(Utc::now());
        self.publish();
        info!(stopped, "algo engine shut down");
        if let Some(reply) = shutdown_reply {
            let _ = reply.send(());
        }
        self.engine
    }

    fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Tick(snapshot) => self.engine.on_tick(snapshot),
            EngineEvent::OrderUpdate(update) => {
                self.engine.on_order_update(update);
            }
            EngineEvent::Trade(trade) => {
                self.engine.on_trade(trade);
            }
            EngineEvent::Command(command) => self.handle_command(command),
        }
    }

    fn handle_command(&mut self, command: ControlCommand) {
        let now = Utc::now();
        // A dropped receiver only means the caller stopped waiting.
        match command {
            ControlCommand::Start { spec, reply } => {
                let _ = reply.send(self.engine.start(spec, now));
            }
            ControlCommand::Pause { id, reply } => {
                let _ = reply.send(self.engine.pause(id, now));
            }
            ControlCommand::Resume { id, reply } => {
                let _ = reply.send(self.engine.resume(id, now));
            }
            ControlCommand::Stop { id, reply } => {
                let _ = reply.send(self.engine.stop(id, now));
            }
            ControlCommand::StopAll { reply } => {
                let _ = reply.send(self.engine.stop_all(now));
            }
            ControlCommand::Query { id, reply } => {
                let _ = reply.send(self.engine.query(id));
            }
            ControlCommand::ListActive { reply } => {
                let _ = reply.send(self.engine.list_active());
            }
            ControlCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn publish(&mut self) {
        for update in self.engine.drain_updates() {
            if self.updates.send(update).is_err() {
                debug!("no update subscribers");
            }
        }
    }
}
