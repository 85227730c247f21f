use super::{SessionId, WorkspaceId};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
    pub timestamp_unix_ms: u64,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp_unix_ms: u64) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            timestamp_unix_ms,
        }
    }

    pub fn assistant(content: impl Into<String>, timestamp_unix_ms: u64) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            timestamp_unix_ms,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub id: SessionId,
    pub workspace_id: WorkspaceId,
    messages: Vec<Message>,
}

impl Session {
    pub(crate) fn new(id: SessionId, workspace_id: WorkspaceId) -> Self {
        Self {
            id,
            workspace_id,
            messages: Vec::new(),
        }
    }

    pub(crate) fn with_messages(
        id: SessionId,
        workspace_id: WorkspaceId,
        messages: Vec<Message>,
    ) -> Self {
        Self {
            id,
            workspace_id,
            messages,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_timestamp_unix_ms(&self) -> Option<u64> {
        self.messages.last().map(|m| m.timestamp_unix_ms)
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}
