use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Email accounts
// ---------------------------------------------------------------------------

/// A configured email account. Token columns are deliberately absent from
/// this row type so they can never leak through a list/get response.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailAccount {
    pub id: uuid::Uuid,
    pub email: String,
    pub display_name: String,
    pub provider: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub provider: String,
    /// OAuth tokens, required for gmail / outlook.
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<i64>,
    /// IMAP / SMTP settings, required for the imap provider.
    #[serde(default)]
    pub imap: Option<crate::provider::ImapSettings>,
    #[serde(default)]
    pub smtp: Option<crate::provider::SmtpSettings>,
}

// ---------------------------------------------------------------------------
// Provider-neutral message DTOs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(default)]
    pub message_id: Option<String>,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub date: String,
    pub unread: bool,
    pub has_attachment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub filename: Option<String>,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub envelope: Envelope,
    #[serde(default)]
    pub text_body: Option<String>,
    #[serde(default)]
    pub html_body: Option<String>,
    pub attachments: Vec<AttachmentInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub app: String,
    pub uptime_seconds: u64,
    pub providers: Vec<ProviderInfo>,
}

// ---------------------------------------------------------------------------
// Assistant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub model: String,
    pub tool_calls: u32,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Voice
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    pub text: String,
    #[serde(default)]
    pub voice_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Consent / training data
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ConsentRequest {
    pub consent: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrainingRow {
    pub id: uuid::Uuid,
    pub source: String,
    pub prompt: String,
    pub completion: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
