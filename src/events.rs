// Jaskier Shared Pattern — events
// Live pub/sub event bus for dispatch/lifecycle notifications (spec §6).
//
// Grounded in groblegark-coop's CredentialEvent broadcast pattern: a single
// `broadcast::Sender` held in AppState, subscribers created per SSE/WS
// connection, lagging subscribers simply miss old events instead of blocking
// producers.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const EVENT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrchestratorEvent {
    TargetClaimed { target_id: Uuid, account_id: Uuid },
    TargetCompleted { target_id: Uuid, account_id: Uuid },
    TargetFailed { target_id: Uuid, account_id: Uuid, reason: String },
    AccountStatusChanged { account_id: Uuid, status: String },
    AccountCooldownStarted { account_id: Uuid, until_secs: i64 },
    ScheduledTaskFired { task_id: Uuid, kind: String },
    InboxReplySent { account_id: Uuid, session_key: String },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestratorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.sender.subscribe()
    }

    /// Best-effort publish — a channel with no subscribers is not an error.
    pub fn publish(&self, event: OrchestratorEvent) {
        let _ = self.sender.send(event);
    }
}
