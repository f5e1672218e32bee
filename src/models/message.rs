use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A stored chat message. Ids and ordering are assigned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub user_id: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

impl ChatRequest {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Wire envelope returned by `GET /history`
#[derive(Debug, Deserialize)]
pub struct HistoryEnvelope {
    #[serde(default)]
    pub messages: Option<Vec<Message>>,
    #[serde(default)]
    pub count: usize,
}

/// The conversation transcript as the client sees it.
///
/// An empty transcript is its own variant so views can show a welcome
/// state instead of an empty list.
#[derive(Debug, Clone, PartialEq)]
pub enum History {
    Empty,
    Messages(Vec<Message>),
}

impl History {
    pub fn messages(&self) -> &[Message] {
        match self {
            History::Empty => &[],
            History::Messages(messages) => messages,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, History::Empty)
    }

    pub fn len(&self) -> usize {
        self.messages().len()
    }
}

impl From<Vec<Message>> for History {
    fn from(messages: Vec<Message>) -> Self {
        if messages.is_empty() {
            History::Empty
        } else {
            History::Messages(messages)
        }
    }
}

impl From<HistoryEnvelope> for History {
    fn from(envelope: HistoryEnvelope) -> Self {
        let messages = envelope.messages.unwrap_or_default();
        if envelope.count != messages.len() {
            tracing::warn!(
                count = envelope.count,
                received = messages.len(),
                "History count does not match message list"
            );
        }
        messages.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_envelope_is_explicit_empty_state() {
        let envelope: HistoryEnvelope =
            serde_json::from_str(r#"{"messages": [], "count": 0}"#).unwrap();
        let history = History::from(envelope);

        assert!(history.is_empty());
        assert_eq!(history, History::Empty);
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn test_null_messages_is_empty_state() {
        let envelope: HistoryEnvelope =
            serde_json::from_str(r#"{"messages": null, "count": 0}"#).unwrap();
        assert_eq!(History::from(envelope), History::Empty);
    }

    #[test]
    fn test_envelope_keeps_server_order() {
        let json = r#"{
            "messages": [
                {"id": 7, "user_id": 42, "role": "user", "content": "hi", "created_at": "2024-05-01T10:00:00.123456Z"},
                {"id": 8, "user_id": 42, "role": "assistant", "content": "hello", "created_at": "2024-05-01T10:00:02+03:00"}
            ],
            "count": 2
        }"#;
        let envelope: HistoryEnvelope = serde_json::from_str(json).unwrap();
        let history = History::from(envelope);

        assert!(!history.is_empty());
        let ids: Vec<i64> = history.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![7, 8]);
        assert_eq!(history.messages()[1].role, Role::Assistant);
    }

    #[test]
    fn test_chat_request_trims() {
        let request = ChatRequest::new("  hello there \n");
        assert_eq!(request.message, "hello there");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"message": "hello there"})
        );
    }
}
