use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Client,
    Coach,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Client => "client",
            UserType::Coach => "coach",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Video,
}

/// The account a client instance sends as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: String,
    pub user_type: UserType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(alias = "_id")]
    pub id: String,
    pub client_id: String,
    pub coach_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(alias = "_id")]
    pub id: String,
    pub sender_id: String,
    pub sender_type: UserType,
    pub content: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub video_uri: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub sender_type: UserType,
    pub content: String,
    pub message_type: MessageType,
    pub video_uri: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: Message,
    #[serde(default)]
    pub clips_remaining: Option<i64>,
    #[serde(default)]
    pub daily_messages_remaining: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatExpiryPayload {
    #[serde(default)]
    pub days_remaining: Option<i64>,
    #[serde(default)]
    pub is_expired: bool,
}

/// Body of both quota endpoints; `chat_expiry` only comes with clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    pub remaining: i64,
    pub total: i64,
    pub used: i64,
    #[serde(default)]
    pub chat_expiry: Option<ChatExpiryPayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub daily_limit_reached: bool,
    #[serde(default, alias = "noClipsRemaining")]
    pub clip_limit_reached: bool,
    #[serde(default)]
    pub chat_expired: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConversationsResponse {
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessagesResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MarkReadRequest {
    pub user_type: UserType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub conversation_id: String,
    pub coach_id: String,
    pub client_id: String,
    pub package_kind: String,
    pub package_tier: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    #[serde(alias = "_id")]
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateSessionResponse {
    pub session: SessionPayload,
}
