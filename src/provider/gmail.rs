//! Gmail REST API backend (`gmail.googleapis.com`, API v1).

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{AttachmentInfo, EmailMessage, Envelope, OutgoingMessage};
use crate::state::AppState;

use super::{build_rfc822, ProviderError};

const GMAIL_API: &str = "https://gmail.googleapis.com/gmail/v1/users/me";

pub struct GmailProvider {
    state: AppState,
    account_id: Uuid,
}

impl GmailProvider {
    pub fn new(state: AppState, account_id: Uuid) -> Self {
        Self { state, account_id }
    }

    async fn token(&self) -> Result<String, ProviderError> {
        crate::oauth::ensure_fresh_token(&self.state, &self.account_id)
            .await
            .map_err(ProviderError::Auth)
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ProviderError> {
        let token = self.token().await?;
        let resp = self
            .state
            .client
            .get(url)
            .query(query)
            .bearer_auth(&token)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Gmail request failed: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::MessageNotFound(url.to_string()));
        }
        if !resp.status().is_success() {
            return Err(ProviderError::Vendor(format!(
                "Gmail API returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Gmail response is not valid JSON: {}", e)))
    }

    pub async fn list_messages(
        &self,
        folder: Option<&str>,
        _page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, ProviderError> {
        // Gmail paginates with opaque tokens, not offsets; the first page is
        // what the dashboard shows, so a numeric page is not forwarded.
        let label = folder.unwrap_or("INBOX").to_uppercase();
        let body = self
            .get_json(
                &format!("{}/messages", GMAIL_API),
                &[
                    ("maxResults", page_size.to_string()),
                    ("labelIds", label),
                ],
            )
            .await?;

        let ids: Vec<String> = body["messages"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| m["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let mut envelopes = Vec::with_capacity(ids.len());
        for id in ids {
            let url = format!("{}/messages/{}", GMAIL_API, id);
            match self.get_json(&url, &metadata_query()).await {
                Ok(msg) => envelopes.push(envelope_from_metadata(&id, &msg)),
                Err(e) => tracing::warn!("gmail: skipping message {}: {}", id, e),
            }
        }
        Ok(envelopes)
    }

    pub async fn get_message(&self, id: &str) -> Result<EmailMessage, ProviderError> {
        let url = format!("{}/messages/{}", GMAIL_API, id);
        let msg = self.get_json(&url, &[("format", "full".to_string())]).await?;

        let envelope = envelope_from_metadata(id, &msg);
        let payload = &msg["payload"];

        let mut text_body = None;
        let mut html_body = None;
        let mut attachments = Vec::new();
        collect_parts(payload, &mut text_body, &mut html_body, &mut attachments);

        Ok(EmailMessage {
            envelope,
            text_body,
            html_body,
            attachments,
        })
    }

    pub async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<(), ProviderError> {
        let from = sqlx::query_scalar::<_, String>(
            "SELECT email FROM ip_email_accounts WHERE id = $1",
        )
        .bind(self.account_id)
        .fetch_one(&self.state.db)
        .await
        .map_err(|e| ProviderError::Backend(format!("DB error: {}", e)))?;

        let raw = build_rfc822(&from, outgoing);
        let encoded = URL_SAFE_NO_PAD.encode(raw.as_bytes());

        let token = self.token().await?;
        let resp = self
            .state
            .client
            .post(format!("{}/messages/send", GMAIL_API))
            .bearer_auth(&token)
            .json(&json!({ "raw": encoded }))
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Gmail send failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Vendor(format!(
                "Gmail send returned {}",
                resp.status()
            )));
        }
        tracing::info!(account = %self.account_id, "gmail: message sent");
        Ok(())
    }
}

// ── Response mapping ────────────────────────────────────────────────────────

fn metadata_query() -> Vec<(&'static str, String)> {
    let mut q = vec![("format", "metadata".to_string())];
    for h in ["From", "To", "Subject", "Date", "Message-ID"] {
        q.push(("metadataHeaders", h.to_string()));
    }
    q
}

fn header<'a>(msg: &'a Value, name: &str) -> Option<&'a str> {
    msg["payload"]["headers"].as_array().and_then(|headers| {
        headers
            .iter()
            .find(|h| h["name"].as_str().is_some_and(|n| n.eq_ignore_ascii_case(name)))
            .and_then(|h| h["value"].as_str())
    })
}

fn envelope_from_metadata(id: &str, msg: &Value) -> Envelope {
    let labels: Vec<&str> = msg["labelIds"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|l| l.as_str()).collect())
        .unwrap_or_default();

    Envelope {
        id: id.to_string(),
        message_id: header(msg, "Message-ID").map(String::from),
        from: header(msg, "From").unwrap_or_default().to_string(),
        to: header(msg, "To")
            .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default(),
        subject: header(msg, "Subject").unwrap_or_default().to_string(),
        date: header(msg, "Date").unwrap_or_default().to_string(),
        unread: labels.contains(&"UNREAD"),
        has_attachment: msg["payload"]["parts"]
            .as_array()
            .is_some_and(|parts| parts.iter().any(|p| !p["filename"].as_str().unwrap_or("").is_empty())),
    }
}

/// Walk the MIME part tree collecting text/html bodies and attachment info.
fn collect_parts(
    part: &Value,
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
    attachments: &mut Vec<AttachmentInfo>,
) {
    let mime = part["mimeType"].as_str().unwrap_or("");
    let filename = part["filename"].as_str().unwrap_or("");

    if !filename.is_empty() {
        attachments.push(AttachmentInfo {
            filename: Some(filename.to_string()),
            mime_type: mime.to_string(),
            size: part["body"]["size"].as_u64().unwrap_or(0) as usize,
        });
    } else if let Some(data) = part["body"]["data"].as_str() {
        let decoded = decode_body(data);
        match mime {
            "text/plain" if text_body.is_none() => *text_body = decoded,
            "text/html" if html_body.is_none() => *html_body = decoded,
            _ => {}
        }
    }

    if let Some(children) = part["parts"].as_array() {
        for child in children {
            collect_parts(child, text_body, html_body, attachments);
        }
    }
}

/// Gmail body data is base64url, occasionally padded or in standard alphabet.
fn decode_body(data: &str) -> Option<String> {
    URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .or_else(|_| STANDARD.decode(data))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
}
