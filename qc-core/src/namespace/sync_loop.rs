//! Sync loop actor
//!
//! A single tokio task owns the event router. Inbound events and handle
//! requests arrive over one channel and are processed in delivery order, so
//! every store keeps exactly one writer and nothing is locked.
//!
//! ```text
//! push(event) ──┐                      ┌── Subscription (per consumer)
//!               v       mpsc (256)     │
//! SyncHandle ─────────> SyncLoop ──────┼── Subscription
//!               ^    router + throttle │
//! subscribe ────┘    sleep_until(dl)   └── errors (mpsc, 64)
//! ```
//!
//! Dropping a subscription wakes the loop, which discards the store once its
//! last subscriber is gone.

use std::sync::Arc;

use qc_protocol::{MachineIdentificationUnique, NamespacedEvent};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::dispatcher::MachineNamespace;
use super::router::EventRouter;
use super::store::Subscription;
use crate::constants::sync::{ERROR_CHANNEL_CAPACITY, INBOUND_CHANNEL_CAPACITY};
use crate::error::{ControlError, Result};

type Command = Box<dyn FnOnce(&mut EventRouter) + Send>;

enum Message {
    Event(NamespacedEvent),
    Command(Command),
    Shutdown,
}

pub struct SyncLoop {
    router: EventRouter,
    inbound: mpsc::Receiver<Message>,
    released: Arc<Notify>,
    errors: mpsc::Sender<ControlError>,
}

/// Clonable handle to a running sync loop
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Message>,
}

impl SyncLoop {
    /// Start the loop on the current runtime.
    ///
    /// Returns the handle, the stream of inbound event errors, and the task.
    /// The error stream holds at most `ERROR_CHANNEL_CAPACITY` undrained
    /// errors; later ones are logged and dropped until it is drained.
    pub fn spawn(
        router: EventRouter,
    ) -> (SyncHandle, mpsc::Receiver<ControlError>, JoinHandle<()>) {
        let (tx, inbound) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        let (errors, error_rx) = mpsc::channel(ERROR_CHANNEL_CAPACITY);
        let released = router.release_notifier();

        let task = tokio::spawn(
            Self {
                router,
                inbound,
                released,
                errors,
            }
            .run(),
        );

        (SyncHandle { tx }, error_rx, task)
    }

    async fn run(mut self) {
        info!("[Sync Loop] Started");

        loop {
            let deadline = self.router.next_deadline();

            tokio::select! {
                message = self.inbound.recv() => match message {
                    Some(Message::Event(event)) => {
                        if let Err(err) = self.router.route(&event, Instant::now()) {
                            self.report(err);
                        }
                    }
                    Some(Message::Command(command)) => {
                        self.release_detached();
                        command(&mut self.router);
                    }
                    Some(Message::Shutdown) | None => break,
                },
                _ = self.released.notified() => self.release_detached(),
                _ = wait_for(deadline) => {
                    let commits = self.router.flush_due(Instant::now());
                    debug!(commits, "[Sync Loop] Flushed throttle window");
                }
            }
        }

        info!("[Sync Loop] Stopped");
    }

    fn release_detached(&mut self) {
        let released = self.router.release_detached();
        if released > 0 {
            debug!(released, "[Sync Loop] Released namespace stores");
        }
    }

    fn report(&self, err: ControlError) {
        match self.errors.try_send(err) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(err)) => {
                warn!(error = %err, "[Sync Loop] Error queue full, dropping error");
            }
            // Nobody listens; the error was already logged where it was raised
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SyncHandle {
    /// Queue an inbound event. Waits only when the inbound queue is full.
    pub async fn push(&self, event: NamespacedEvent) -> Result<()> {
        self.tx
            .send(Message::Event(event))
            .await
            .map_err(|_| ControlError::ChannelClosed)
    }

    pub async fn subscribe<M: MachineNamespace>(
        &self,
        key: MachineIdentificationUnique,
    ) -> Result<Subscription<M::State>> {
        self.request(move |router| router.subscribe::<M>(key)).await?
    }

    pub async fn current<M: MachineNamespace>(
        &self,
        key: MachineIdentificationUnique,
    ) -> Result<Option<Arc<M::State>>> {
        self.request(move |router| router.current::<M>(&key)).await?
    }

    /// Number of live namespace stores
    pub async fn namespace_count(&self) -> Result<usize> {
        self.request(|router| router.namespace_count()).await
    }

    /// Stop the loop. Pending throttled values are discarded.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Message::Shutdown)
            .await
            .map_err(|_| ControlError::ChannelClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut EventRouter) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command: Command = Box::new(move |router| {
            let _ = reply_tx.send(f(router));
        });

        self.tx
            .send(Message::Command(command))
            .await
            .map_err(|_| ControlError::ChannelClosed)?;
        reply_rx.await.map_err(|_| ControlError::ChannelClosed)
    }
}
