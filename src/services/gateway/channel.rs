use crate::protocol::ServerEvent;
use crate::services::gateway::Metrics;
use axum::extract::ws::Message as WsMessage;
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

pub type ConnectionId = Uuid;

#[derive(Debug)]
struct Member {
    connection_id: ConnectionId,
    user_id: Uuid,
    tx: mpsc::Sender<WsMessage>,
}

/// Live connections per conversation.
///
/// Broadcasts to one conversation run under that channel's exclusive entry
/// lock, so every member observes the channel's events in a single order.
/// Sends never block: a member whose buffer is full is evicted, which closes
/// its session.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: DashMap<Uuid, Vec<Member>>,
    metrics: Metrics,
}

impl ChannelRegistry {
    #[must_use]
    pub(crate) fn new(metrics: Metrics) -> Self {
        Self { channels: DashMap::new(), metrics }
    }

    pub fn join(&self, conversation_id: Uuid, connection_id: ConnectionId, user_id: Uuid, tx: mpsc::Sender<WsMessage>) {
        self.channels.entry(conversation_id).or_default().push(Member { connection_id, user_id, tx });
        tracing::debug!(%conversation_id, %connection_id, "Joined channel");
    }

    /// Removes a connection. Returns `false` if it was not a member, for
    /// example because it had already been evicted.
    pub fn leave(&self, conversation_id: Uuid, connection_id: ConnectionId) -> bool {
        let removed = self.channels.get_mut(&conversation_id).is_some_and(|mut members| {
            let before = members.len();
            members.retain(|m| m.connection_id != connection_id);
            members.len() != before
        });
        self.channels.remove_if(&conversation_id, |_, members| members.is_empty());
        tracing::debug!(%conversation_id, %connection_id, removed, "Left channel");
        removed
    }

    /// Sends `event` to every member except `exclude`. Returns the number of
    /// connections the event was queued for.
    pub fn broadcast(&self, conversation_id: Uuid, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let payload = match serde_json::to_string(event) {
            Ok(json) => WsMessage::Text(json.into()),
            Err(e) => {
                tracing::error!(error = %e, event = event.name(), "Failed to encode event");
                return 0;
            }
        };

        let mut delivered = 0;
        if let Some(mut members) = self.channels.get_mut(&conversation_id) {
            members.retain(|member| {
                if exclude == Some(member.connection_id) {
                    return true;
                }
                match member.tx.try_send(payload.clone()) {
                    Ok(()) => {
                        delivered += 1;
                        true
                    }
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(
                            %conversation_id,
                            connection_id = %member.connection_id,
                            user_id = %member.user_id,
                            "Outbound buffer full, evicting connection"
                        );
                        self.metrics.evictions_total.add(1, &[]);
                        false
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            });
        }
        self.channels.remove_if(&conversation_id, |_, members| members.is_empty());

        delivered
    }
}
