//! The event dispatch core.

use crate::{
    BuildDeriver, EngineController, EngineGateway, Metrics, PayloadDeriver, PromoteDeriver,
    ResetDeriver, SyncConfig, SyncError, SyncEvent,
};
use async_trait::async_trait;
use std::{collections::VecDeque, fmt::Debug, sync::Arc};
use tokio::{
    sync::mpsc::{self, error::SendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// The capacity of the inbound event channel.
pub const INBOUND_CHANNEL_SIZE: usize = 1024;

/// A component reacting to [`SyncEvent`]s.
#[async_trait]
pub trait Deriver: Debug + Send {
    /// Handles an event, returning `true` if the event is consumed.
    ///
    /// Consumed events are not offered to the derivers registered after this one. Observers
    /// return `false`.
    async fn on_event(&mut self, event: &SyncEvent, ctx: &mut DeriverContext<'_>) -> bool;
}

/// What a [`Deriver`] can reach while handling an event.
#[derive(Debug)]
pub struct DeriverContext<'a> {
    controller: &'a mut EngineController,
    queue: &'a mut VecDeque<SyncEvent>,
    cancel: &'a CancellationToken,
}

impl DeriverContext<'_> {
    /// Returns the engine controller.
    pub const fn controller(&self) -> &EngineController {
        self.controller
    }

    /// Returns the engine controller for mutation.
    pub const fn controller_mut(&mut self) -> &mut EngineController {
        self.controller
    }

    /// Returns the sync config.
    pub fn cfg(&self) -> &SyncConfig {
        self.controller.cfg()
    }

    /// Returns the shutdown token. Engine calls abort when it fires.
    pub const fn cancellation(&self) -> &CancellationToken {
        self.cancel
    }

    /// Queues an event behind every event already queued.
    pub fn emit(&mut self, event: SyncEvent) {
        trace!(target: "sync_events", kind = event.kind(), "Emitting event");
        self.queue.push_back(event);
    }
}

/// How a drain of the event queue ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The queue is empty.
    Idle,
    /// An event matching the drain target was handled.
    TargetReached,
    /// Shutdown was requested.
    Closed,
}

/// A cloneable handle to inject events into an [`EventSystem`] from other tasks.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<SyncEvent>,
}

impl EventSender {
    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: SyncEvent) -> Result<(), SendError<SyncEvent>> {
        self.tx.send(event).await
    }

    /// Returns `true` if the event system is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owns the [`EngineController`] and the event queue, and feeds every event to the registered
/// [`Deriver`]s in order until the queue is empty.
///
/// Events emitted while handling an event are queued behind it. Handling is sequential: the next
/// event is only dispatched once every deriver is done with the current one.
#[derive(Debug)]
pub struct EventSystem {
    controller: EngineController,
    queue: VecDeque<SyncEvent>,
    derivers: Vec<Box<dyn Deriver>>,
    cancel: CancellationToken,
    inbound: mpsc::Receiver<SyncEvent>,
    max_queued_events: usize,
}

impl EventSystem {
    /// Creates a new [`EventSystem`] without derivers, along with the [`EventSender`] feeding it.
    pub fn new(cfg: Arc<SyncConfig>, cancel: CancellationToken) -> (Self, EventSender) {
        let (tx, inbound) = mpsc::channel(INBOUND_CHANNEL_SIZE);
        let max_queued_events = cfg.max_queued_events;
        let system = Self {
            controller: EngineController::new(cfg),
            queue: VecDeque::new(),
            derivers: Vec::new(),
            cancel,
            inbound,
            max_queued_events,
        };
        (system, EventSender { tx })
    }

    /// Registers a deriver behind the ones already registered.
    pub fn add_deriver(&mut self, deriver: Box<dyn Deriver>) {
        self.derivers.push(deriver);
    }

    /// Registers the build, payload, promotion and reset derivers, sharing `gateway`.
    ///
    /// Observers that must see every event are registered before calling this.
    pub fn add_engine_derivers(&mut self, gateway: Arc<dyn EngineGateway>) {
        self.add_deriver(Box::new(BuildDeriver::new(gateway.clone())));
        self.add_deriver(Box::new(PayloadDeriver::new(gateway.clone())));
        self.add_deriver(Box::new(PromoteDeriver::new()));
        self.add_deriver(Box::new(ResetDeriver::new(gateway)));
    }

    /// Returns the engine controller.
    pub const fn controller(&self) -> &EngineController {
        &self.controller
    }

    /// Returns the engine controller for mutation.
    pub const fn controller_mut(&mut self) -> &mut EngineController {
        &mut self.controller
    }

    /// Returns the shutdown token.
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the number of queued events.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Queues an event.
    pub fn emit(&mut self, event: SyncEvent) {
        self.queue.push_back(event);
    }

    /// Handles queued events until the queue is empty.
    pub async fn drain(&mut self) -> Result<DrainStatus, SyncError> {
        self.drain_until(|_| false).await
    }

    /// Handles queued events until the queue is empty, or until an event matching `target` was
    /// handled.
    pub async fn drain_until<F>(&mut self, mut target: F) -> Result<DrainStatus, SyncError>
    where
        F: FnMut(&SyncEvent) -> bool + Send,
    {
        while let Some(event) = self.queue.pop_front() {
            if self.cancel.is_cancelled() {
                self.queue.push_front(event);
                return Ok(DrainStatus::Closed);
            }

            self.dispatch(&event).await?;

            if self.queue.len() > self.max_queued_events {
                let queued = self.queue.len();
                self.queue.clear();
                error!(target: "sync_events", queued, limit = self.max_queued_events, "Event queue overflow");
                return Err(SyncError::QueueOverflow(queued, self.max_queued_events));
            }

            if target(&event) {
                return Ok(DrainStatus::TargetReached);
            }
        }
        Ok(DrainStatus::Idle)
    }

    /// Receives inbound events and drains the queue after each one, until shutdown.
    pub async fn run(&mut self) -> Result<(), SyncError> {
        info!(target: "sync_events", derivers = self.derivers.len(), "Starting event system");
        if self.drain().await? == DrainStatus::Closed {
            return Ok(());
        }

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!(target: "sync_events", queued = self.queue.len(), "Event system received shutdown signal");
                    return Ok(());
                }
                event = self.inbound.recv() => {
                    let Some(event) = event else {
                        error!(target: "sync_events", "Inbound event channel closed unexpectedly");
                        return Err(SyncError::InboundClosed);
                    };
                    self.emit(event);
                    if self.drain().await? == DrainStatus::Closed {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn dispatch(&mut self, event: &SyncEvent) -> Result<(), SyncError> {
        inc!(counter, Metrics::SYNC_EVENTS, "kind" => event.kind());
        trace!(target: "sync_events", kind = event.kind(), "Dispatching event");

        let mut ctx = DeriverContext {
            controller: &mut self.controller,
            queue: &mut self.queue,
            cancel: &self.cancel,
        };
        for deriver in self.derivers.iter_mut() {
            if deriver.on_event(event, &mut ctx).await {
                break;
            }
        }

        match event {
            SyncEvent::CriticalError { err } => {
                inc!(counter, Metrics::SYNC_ERRORS, "kind" => "critical");
                error!(target: "sync_events", %err, "Critical error, stopping event system");
                self.queue.clear();
                return Err(SyncError::Critical(err.clone()));
            }
            SyncEvent::ResetRequest { err } => {
                inc!(counter, Metrics::SYNC_ERRORS, "kind" => "reset");
                warn!(target: "sync_events", %err, "Reset requested");
            }
            SyncEvent::EngineTemporaryError { err } => {
                inc!(counter, Metrics::SYNC_ERRORS, "kind" => "temporary");
                warn!(target: "sync_events", %err, "Temporary engine error");
            }
            _ => {}
        }
        Ok(())
    }
}

/// Cancels `cancel` when the process receives an interrupt.
pub fn spawn_interrupt_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => {
                    info!(target: "sync_events", "Received interrupt, shutting down");
                    cancel.cancel();
                }
                Err(err) => {
                    error!(target: "sync_events", %err, "Failed to listen for interrupts");
                }
            },
        }
    })
}
