//! Sessions: one conversation, at most one running turn, any number of
//! sequential client connections.
//!
//! The conversation outlives sockets. A turn keeps running when its client
//! disconnects; the finished message is stored and replayed in the `history`
//! frame of the next connection. Scheduled-task notices that fire while no
//! client is attached are held and delivered on reconnect.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use deepdive_agent::{ExternalResolution, StepOrchestrator, TurnIo, UiEvent};
use deepdive_core::error::ChannelError;
use deepdive_core::event::{DomainEvent, EventBus};
use deepdive_core::message::{Conversation, ConversationId, Message};
use deepdive_core::session::{ConnectionState, ScheduledTask};
use deepdive_workflow::TaskScheduler;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::frames::{ServerFrame, SessionFrame};

const OUTBOUND_CAPACITY: usize = 256;
const EVENT_CAPACITY: usize = 256;

struct ActiveTurn {
    resolutions: mpsc::Sender<ExternalResolution>,
    cancel: CancellationToken,
}

/// Server-side state for one session id.
pub struct Session {
    id: String,
    conversation: Mutex<Conversation>,
    state: RwLock<ConnectionState>,
    outbound: RwLock<Option<mpsc::Sender<ServerFrame>>>,
    held: Mutex<Vec<ServerFrame>>,
    active: Mutex<Option<ActiveTurn>>,
    scheduler: TaskScheduler,
    event_bus: Arc<EventBus>,
}

impl Session {
    pub fn new(id: impl Into<String>, event_bus: Arc<EventBus>) -> Arc<Self> {
        let id = id.into();
        let (scheduler, mut fired) = TaskScheduler::new(16);
        let session = Arc::new(Self {
            conversation: Mutex::new(Conversation::with_id(ConversationId::from(&id))),
            id,
            state: RwLock::new(ConnectionState::Disconnected),
            outbound: RwLock::new(None),
            held: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            scheduler,
            event_bus,
        });

        let weak: Weak<Session> = Arc::downgrade(&session);
        tokio::spawn(async move {
            while let Some(task) = fired.recv().await {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                session.notify_fired(task).await;
            }
        });

        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_busy(&self) -> bool {
        self.active.lock().await.is_some()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.conversation.lock().await.messages.clone()
    }

    pub async fn scheduled_tasks(&self) -> Vec<ScheduledTask> {
        self.scheduler.list().await
    }

    /// Attach a new client. Any previous client stops receiving frames.
    ///
    /// The returned receiver starts with the `history` frame, followed by
    /// notices held while no client was attached.
    pub async fn attach(&self) -> (mpsc::Sender<ServerFrame>, mpsc::Receiver<ServerFrame>) {
        // Held across the snapshot so no frame is sent between the history
        // being taken and the new client being installed
        let mut outbound = self.outbound.write().await;
        let held = std::mem::take(&mut *self.held.lock().await);

        // Sized so the replay below always fits before the receiver is returned
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY.max(held.len() + 1));
        let history = SessionFrame::History {
            messages: self.messages().await,
        };
        for frame in std::iter::once(history.into()).chain(held) {
            if let Err(e) = tx.try_send(frame) {
                warn!(session_id = %self.id, error = %e, "Dropped frame on attach");
            }
        }

        *outbound = Some(tx.clone());
        drop(outbound);
        *self.state.write().await = ConnectionState::Connected;
        info!(session_id = %self.id, "Client attached");
        (tx, rx)
    }

    /// Detach `connection` if it is still the current client.
    pub async fn detach(&self, connection: &mpsc::Sender<ServerFrame>) {
        let mut outbound = self.outbound.write().await;
        if outbound.as_ref().is_some_and(|tx| tx.same_channel(connection)) {
            *outbound = None;
            *self.state.write().await = ConnectionState::Disconnected;
            info!(session_id = %self.id, "Client detached");
        }
    }

    /// Send a frame to the attached client, if any. Returns whether it was delivered.
    pub async fn send(&self, frame: ServerFrame) -> bool {
        let tx = self.outbound.read().await.clone();
        match tx {
            Some(tx) => tx.send(frame).await.is_ok(),
            None => false,
        }
    }

    async fn notify_fired(&self, task: ScheduledTask) {
        let timestamp = Utc::now();
        self.event_bus.publish(DomainEvent::ScheduledTaskFired {
            session_id: self.id.clone(),
            description: task.description.clone(),
            timestamp,
        });

        let frame: ServerFrame = SessionFrame::ScheduledTask {
            id: task.id.clone(),
            description: task.description,
            timestamp,
        }
        .into();

        // Same lock order as `attach`: outbound, then held
        let outbound = self.outbound.read().await;
        let tx = match outbound.as_ref() {
            Some(tx) => tx.clone(),
            None => {
                debug!(session_id = %self.id, task_id = %task.id, "No client attached, holding notice");
                self.held.lock().await.push(frame);
                return;
            }
        };
        drop(outbound);
        let _ = tx.send(frame).await;
    }

    /// Start a turn for `message`.
    ///
    /// Fails with [`ChannelError::Busy`] while another turn is running. The
    /// turn runs on its own task; its events go to whichever client is
    /// attached at the time.
    pub async fn start_turn(
        self: &Arc<Self>,
        orchestrator: Arc<StepOrchestrator>,
        message: Message,
    ) -> Result<(), ChannelError> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(ChannelError::Busy);
        }

        self.event_bus.publish(DomainEvent::MessageReceived {
            session_id: self.id.clone(),
            content_preview: message.text().chars().take(80).collect(),
            timestamp: Utc::now(),
        });

        let snapshot = {
            let mut conversation = self.conversation.lock().await;
            conversation.push(message);
            conversation.clone()
        };

        let (io, handle) = TurnIo::channel(EVENT_CAPACITY);
        *active = Some(ActiveTurn {
            resolutions: handle.resolutions,
            cancel: handle.cancel,
        });
        drop(active);

        let session = self.clone();
        let mut events = handle.events;
        tokio::spawn(async move {
            let (stored_tx, mut stored_rx) = oneshot::channel::<()>();

            let run = async {
                let outcome = orchestrator.run(&snapshot, io).await;
                session.complete_turn(outcome.message).await;
                let _ = stored_tx.send(());
            };

            let forward = async {
                while let Some(event) = events.recv().await {
                    // The client may react to `finish` immediately; the
                    // message must be stored and the session free by then
                    if matches!(event, UiEvent::Finish { .. }) {
                        let _ = (&mut stored_rx).await;
                    }
                    session.send(event.into()).await;
                }
            };

            tokio::join!(run, forward);
        });

        Ok(())
    }

    async fn complete_turn(&self, message: Message) {
        if !message.parts.is_empty() {
            self.conversation.lock().await.push(message);
        }
        *self.active.lock().await = None;
    }

    /// Route a client answer to the waiting turn.
    ///
    /// Never waits: a turn that is not currently reading answers and has a
    /// full buffer rejects the frame instead of stalling the connection.
    pub async fn resolve(&self, resolution: ExternalResolution) -> Result<(), ChannelError> {
        let tx = self
            .active
            .lock()
            .await
            .as_ref()
            .map(|turn| turn.resolutions.clone());
        let Some(tx) = tx else {
            warn!(session_id = %self.id, ?resolution, "Resolution arrived with no running turn");
            return Err(ChannelError::InvalidPayload(
                "no turn is waiting for a result".into(),
            ));
        };
        tx.try_send(resolution).map_err(|e| {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "too many unanswered results for this turn",
                mpsc::error::TrySendError::Closed(_) => "turn already finished",
            };
            ChannelError::DeliveryFailed {
                session: self.id.clone(),
                reason: reason.into(),
            }
        })
    }

    /// Cancel the running turn. Returns false if nothing was running.
    pub async fn cancel(&self) -> bool {
        match self.active.lock().await.as_ref() {
            Some(turn) => {
                info!(session_id = %self.id, "Cancelling turn");
                turn.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop all messages and pending tasks. Refused while a turn is running.
    pub async fn clear_history(&self) -> Result<(), ChannelError> {
        let active = self.active.lock().await;
        if active.is_some() {
            return Err(ChannelError::Busy);
        }
        self.conversation.lock().await.clear();
        drop(active);

        self.scheduler.cancel_all().await;
        self.held.lock().await.clear();
        info!(session_id = %self.id, "History cleared");
        self.send(SessionFrame::HistoryCleared.into()).await;
        Ok(())
    }

    /// Schedule an out-of-band notice after `delay`.
    pub async fn schedule(
        &self,
        description: String,
        delay: Duration,
    ) -> Result<ScheduledTask, ChannelError> {
        let task = self
            .scheduler
            .schedule_in(description, delay)
            .await
            .map_err(ChannelError::InvalidPayload)?;
        self.send(
            SessionFrame::TaskScheduled {
                id: task.id.clone(),
                description: task.description.clone(),
                fire_at: task.fire_at,
            }
            .into(),
        )
        .await;
        Ok(task)
    }

    /// Drop a pending scheduled task before it fires.
    pub async fn cancel_task(&self, id: &str) -> Result<(), ChannelError> {
        if self.scheduler.cancel(id).await {
            info!(session_id = %self.id, task_id = %id, "Scheduled task cancelled");
            Ok(())
        } else {
            Err(ChannelError::InvalidPayload(format!(
                "no pending scheduled task '{id}'"
            )))
        }
    }
}

/// All live sessions, keyed by client-chosen id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    event_bus: Arc<EventBus>,
}

impl SessionRegistry {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            event_bus,
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Return the session for `id`, creating it on first use.
    pub async fn get_or_create(&self, id: &str) -> Arc<Session> {
        if let Some(session) = self.get(id).await {
            return session;
        }
        self.sessions
            .write()
            .await
            .entry(id.to_string())
            .or_insert_with(|| {
                info!(session_id = %id, "Creating session");
                Session::new(id, self.event_bus.clone())
            })
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
