use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DELETED_PLACEHOLDER: &str = "This message was deleted";

/// A message as persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b)
            || (self.sender_id == b && self.receiver_id == a)
    }

    pub fn is_unread_for(&self, user_id: &str) -> bool {
        self.receiver_id == user_id && self.read_at.is_none() && !self.is_deleted
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
}

/// An optimistic entry shown before the store confirms the insert.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMessage {
    pub client_id: Uuid,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocalMessage {
    Pending(PendingMessage),
    Confirmed(Message),
}

impl LocalMessage {
    pub fn sender_id(&self) -> &str {
        match self {
            Self::Pending(pending) => &pending.sender_id,
            Self::Confirmed(message) => &message.sender_id,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Pending(pending) => &pending.content,
            Self::Confirmed(message) => &message.content,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            Self::Pending(pending) => pending.created_at,
            Self::Confirmed(message) => message.created_at,
        }
    }

    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Pending(_) => None,
            Self::Confirmed(message) => Some(&message.id),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// The last send that failed, kept around for automatic and manual retry.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedMessage {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Connecting,
    Subscribed,
    Disconnected,
    Error,
}

/// Change-feed notifications delivered to an open conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Inserted(Message),
    Updated(Message),
    Status(ConnectionStatus),
}

impl ChangeEvent {
    pub fn involves(&self, a: &str, b: &str) -> bool {
        match self {
            Self::Inserted(message) | Self::Updated(message) => message.is_between(a, b),
            Self::Status(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingSignal {
    Typing,
    StoppedTyping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Read,
}

/// Render-ready projection of a [`LocalMessage`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageView {
    pub key: String,
    pub sender_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub own: bool,
    pub deleted: bool,
    pub edited: bool,
}

impl MessageView {
    pub fn from_local(message: &LocalMessage, viewer_id: &str) -> Self {
        match message {
            LocalMessage::Pending(pending) => Self {
                key: pending.client_id.to_string(),
                sender_id: pending.sender_id.clone(),
                content: pending.content.clone(),
                created_at: pending.created_at,
                status: DeliveryStatus::Sending,
                own: pending.sender_id == viewer_id,
                deleted: false,
                edited: false,
            },
            LocalMessage::Confirmed(message) => Self {
                key: message.id.clone(),
                sender_id: message.sender_id.clone(),
                content: if message.is_deleted {
                    DELETED_PLACEHOLDER.to_string()
                } else {
                    message.content.clone()
                },
                created_at: message.created_at,
                status: if message.read_at.is_some() {
                    DeliveryStatus::Read
                } else {
                    DeliveryStatus::Sent
                },
                own: message.sender_id == viewer_id,
                deleted: message.is_deleted,
                edited: message.edited_at.is_some() && !message.is_deleted,
            },
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}
