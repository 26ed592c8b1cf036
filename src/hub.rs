//! Broadcast hub: fans each control-window frame out to every subscriber.
//!
//! The registry is owned by the hub task; registration, removal and
//! broadcasting are all serialized through it. Each subscriber gets a
//! bounded queue. A subscriber whose queue is full when a frame arrives is
//! evicted on the spot so it cannot hold up delivery to anyone else.

use crate::frame::Frame;
use crate::frame_bus::FrameReceiver;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

pub type SubscriberId = Uuid;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Final message offered to every subscriber when the hub stops.
pub const SHUTDOWN_NOTICE: &str = "server process killed";

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum HubError {
    #[error("Broadcast hub has stopped")]
    Stopped,
}

/// Hub-side end of a subscriber: identity plus the queue's sending half.
///
/// The hub is the only writer. Dropping this value closes the queue, which
/// is how the subscriber's drain task learns it is finished.
#[derive(Debug)]
pub struct Subscriber {
    id: SubscriberId,
    queue: mpsc::Sender<Arc<str>>,
}

impl Subscriber {
    pub fn new(capacity: usize) -> (Subscriber, SubscriberQueue) {
        let id = Uuid::new_v4();
        let (queue, rx) = mpsc::channel(capacity);
        (Subscriber { id, queue }, SubscriberQueue { id, rx })
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

/// Draining end of a subscriber queue.
#[derive(Debug)]
pub struct SubscriberQueue {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<str>>,
}

impl SubscriberQueue {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued message, or `None` once the hub has closed the queue.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }
}

enum HubCommand {
    Register(Subscriber),
    Unregister(SubscriberId),
    SubscriberCount { respond_to: oneshot::Sender<usize> },
    Stop { respond_to: oneshot::Sender<()> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HubPhase {
    Idle,
    Running,
    Stopped,
}

pub struct BroadcastHub {
    registry: HashMap<SubscriberId, Subscriber>,
    frames: FrameReceiver,
    phase: watch::Sender<HubPhase>,
}

impl BroadcastHub {
    pub fn new(frames: FrameReceiver) -> Self {
        let (phase, _) = watch::channel(HubPhase::Idle);
        Self {
            registry: HashMap::new(),
            frames,
            phase,
        }
    }

    pub fn spawn(self) -> HubHandle {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let handle = HubHandle {
            commands: commands_tx,
            phase: self.phase.subscribe(),
        };
        tokio::spawn(self.run(commands));
        handle
    }

    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>) {
        tracing::info!("Starting broadcast hub");
        self.phase.send_replace(HubPhase::Running);
        let mut bus_open = true;
        let mut waiters = Vec::new();

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(HubCommand::Register(subscriber)) => {
                        tracing::info!("Registered subscriber {}", subscriber.id);
                        self.registry.insert(subscriber.id, subscriber);
                    }
                    Some(HubCommand::Unregister(id)) => {
                        if self.registry.remove(&id).is_some() {
                            tracing::info!("Unregistered subscriber {}", id);
                        }
                    }
                    Some(HubCommand::SubscriberCount { respond_to }) => {
                        let _ = respond_to.send(self.registry.len());
                    }
                    Some(HubCommand::Stop { respond_to }) => {
                        waiters.push(respond_to);
                        break;
                    }
                    None => break,
                },
                frame = self.frames.next(), if bus_open => match frame {
                    Some(frame) => self.broadcast(&frame),
                    None => {
                        tracing::info!("Frame bus closed, hub keeps serving subscribers until stopped");
                        bus_open = false;
                    }
                },
            }
        }

        commands.close();
        self.shutdown();
        while let Ok(command) = commands.try_recv() {
            // Late registrations are dropped here, which closes their queues.
            if let HubCommand::Stop { respond_to } = command {
                waiters.push(respond_to);
            }
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    fn broadcast(&mut self, frame: &Frame) {
        let payload: Arc<str> = match frame.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!("Error while serializing frame: {}", e);
                return;
            }
        };
        self.registry.retain(|id, subscriber| {
            match subscriber.queue.try_send(payload.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Subscriber {} fell behind, evicting", id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!("Subscriber {} went away", id);
                    false
                }
            }
        });
        tracing::trace!("Sent out frame: {}", payload);
    }

    fn shutdown(&mut self) {
        let notice: Arc<str> = Arc::from(SHUTDOWN_NOTICE);
        for subscriber in self.registry.values() {
            let _ = subscriber.queue.try_send(notice.clone());
        }
        self.registry.clear();
        self.phase.send_replace(HubPhase::Stopped);
        tracing::info!("Stopped broadcast hub");
    }
}

#[derive(Debug, Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<HubCommand>,
    phase: watch::Receiver<HubPhase>,
}

impl HubHandle {
    pub async fn register(&self, subscriber: Subscriber) -> Result<(), HubError> {
        self.send(HubCommand::Register(subscriber)).await
    }

    pub async fn unregister(&self, id: SubscriberId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(id)).await
    }

    pub async fn subscriber_count(&self) -> Result<usize, HubError> {
        let (respond_to, count) = oneshot::channel();
        self.send(HubCommand::SubscriberCount { respond_to }).await?;
        count.await.map_err(|_| HubError::Stopped)
    }

    /// Notify and disconnect every subscriber, then stop. Safe to call repeatedly.
    pub async fn stop(&self) {
        let (respond_to, stopped) = oneshot::channel();
        if self.send(HubCommand::Stop { respond_to }).await.is_ok() {
            let _ = stopped.await;
        }
        self.wait().await;
    }

    pub async fn wait(&self) {
        let mut phase = self.phase.clone();
        let _ = phase.wait_for(|p| *p == HubPhase::Stopped).await;
    }

    pub fn phase(&self) -> HubPhase {
        *self.phase.borrow()
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Stopped)
    }
}
