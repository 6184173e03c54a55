//! Email provider abstraction layer.
//!
//! `create_email_provider` selects the backend for an account based on its
//! provider tag (`gmail` / `outlook` / `imap`); the three implementations
//! expose the same list / get / send surface over provider-neutral DTOs.

pub mod gmail;
pub mod imap;
pub mod outlook;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{EmailMessage, Envelope, OutgoingMessage};
use crate::state::AppState;

pub use gmail::GmailProvider;
pub use imap::ImapProvider;
pub use outlook::OutlookProvider;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Unknown email provider '{0}'")]
    UnknownProvider(String),

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("Account '{0}' has the imap provider but no stored IMAP configuration")]
    MissingImapConfig(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Vendor API error: {0}")]
    Vendor(String),

    #[error("Mail backend error: {0}")]
    Backend(String),

    #[error("Message '{0}' not found")]
    MessageNotFound(String),
}

// ── Stored connection settings (imap provider) ──────────────────────────────

fn default_true() -> bool {
    true
}

/// IMAP connection settings stored (JSON) on the account row.
/// The password field holds an encrypted value ("enc:..." format).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// true = implicit TLS, false = STARTTLS.
    #[serde(default = "default_true")]
    pub tls: bool,
}

/// SMTP connection settings stored (JSON) on the account row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_true")]
    pub tls: bool,
}

// ── Dispatch ────────────────────────────────────────────────────────────────

/// The three provider backends behind one surface. Enum dispatch — the
/// selection is a plain three-way match on the account's provider tag.
pub enum EmailProvider {
    Gmail(GmailProvider),
    Outlook(OutlookProvider),
    Imap(ImapProvider),
}

impl EmailProvider {
    pub async fn list_messages(
        &self,
        folder: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, ProviderError> {
        match self {
            EmailProvider::Gmail(p) => p.list_messages(folder, page, page_size).await,
            EmailProvider::Outlook(p) => p.list_messages(folder, page, page_size).await,
            EmailProvider::Imap(p) => p.list_messages(folder, page, page_size).await,
        }
    }

    pub async fn get_message(&self, id: &str) -> Result<EmailMessage, ProviderError> {
        match self {
            EmailProvider::Gmail(p) => p.get_message(id).await,
            EmailProvider::Outlook(p) => p.get_message(id).await,
            EmailProvider::Imap(p) => p.get_message(id).await,
        }
    }

    pub async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<(), ProviderError> {
        match self {
            EmailProvider::Gmail(p) => p.send_message(outgoing).await,
            EmailProvider::Outlook(p) => p.send_message(outgoing).await,
            EmailProvider::Imap(p) => p.send_message(outgoing).await,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ProviderRow {
    email: String,
    display_name: String,
    provider: String,
    imap_config: Option<String>,
    smtp_config: Option<String>,
}

/// Select the provider backend for an account.
///
/// Failure modes: unrecognized provider tag, or the `imap` tag with no
/// stored IMAP configuration.
pub async fn create_email_provider(
    state: &AppState,
    account_id: &Uuid,
) -> Result<EmailProvider, ProviderError> {
    let row = sqlx::query_as::<_, ProviderRow>(
        "SELECT email, display_name, provider, imap_config, smtp_config \
         FROM ip_email_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| ProviderError::Backend(format!("DB error: {}", e)))?
    .ok_or_else(|| ProviderError::AccountNotFound(account_id.to_string()))?;

    match row.provider.as_str() {
        "gmail" => Ok(EmailProvider::Gmail(GmailProvider::new(
            state.clone(),
            *account_id,
        ))),
        "outlook" => Ok(EmailProvider::Outlook(OutlookProvider::new(
            state.clone(),
            *account_id,
        ))),
        "imap" => {
            let imap: ImapSettings = row
                .imap_config
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok())
                .ok_or_else(|| ProviderError::MissingImapConfig(row.email.clone()))?;
            let smtp: Option<SmtpSettings> = row
                .smtp_config
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok());
            Ok(EmailProvider::Imap(ImapProvider::new(
                row.email,
                row.display_name,
                imap,
                smtp,
            )))
        }
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}

// ── Shared helpers ──────────────────────────────────────────────────────────

/// Build a minimal RFC 822 message for sending.
pub(crate) fn build_rfc822(from: &str, outgoing: &OutgoingMessage) -> String {
    let mut msg = String::new();
    msg.push_str(&format!("From: {}\r\n", from));
    msg.push_str(&format!("To: {}\r\n", outgoing.to.join(", ")));
    if !outgoing.cc.is_empty() {
        msg.push_str(&format!("Cc: {}\r\n", outgoing.cc.join(", ")));
    }
    msg.push_str(&format!("Subject: {}\r\n", outgoing.subject));
    msg.push_str("MIME-Version: 1.0\r\n");
    msg.push_str("Content-Type: text/plain; charset=utf-8\r\n");
    msg.push_str("\r\n");
    msg.push_str(&outgoing.body);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc822_has_headers_and_body() {
        let out = OutgoingMessage {
            to: vec!["a@example.com".into(), "b@example.com".into()],
            cc: vec![],
            subject: "Hi".into(),
            body: "Hello there".into(),
        };
        let raw = build_rfc822("me@example.com", &out);
        assert!(raw.starts_with("From: me@example.com\r\n"));
        assert!(raw.contains("To: a@example.com, b@example.com\r\n"));
        assert!(!raw.contains("Cc:"));
        assert!(raw.ends_with("\r\nHello there"));
    }

    #[test]
    fn imap_settings_default_tls() {
        let s: ImapSettings =
            serde_json::from_str(r#"{"host":"mail.example.com","port":993,"username":"u","password":"p"}"#)
                .unwrap();
        assert!(s.tls);
    }
}
