//! Outlook backend over Microsoft Graph (`graph.microsoft.com`, v1.0).

use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{AttachmentInfo, EmailMessage, Envelope, OutgoingMessage};
use crate::state::AppState;

use super::ProviderError;

const GRAPH_API: &str = "https://graph.microsoft.com/v1.0";

pub struct OutlookProvider {
    state: AppState,
    account_id: Uuid,
}

impl OutlookProvider {
    pub fn new(state: AppState, account_id: Uuid) -> Self {
        Self { state, account_id }
    }

    async fn token(&self) -> Result<String, ProviderError> {
        crate::oauth::ensure_fresh_token(&self.state, &self.account_id)
            .await
            .map_err(ProviderError::Auth)
    }

    pub async fn list_messages(
        &self,
        folder: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, ProviderError> {
        let folder = folder.unwrap_or("inbox").to_lowercase();
        let skip = page.saturating_sub(1).saturating_mul(page_size);
        let url = format!(
            "{}/me/mailFolders/{}/messages?$top={}&$skip={}&$select=id,internetMessageId,from,toRecipients,subject,receivedDateTime,isRead,hasAttachments&$orderby=receivedDateTime desc",
            GRAPH_API, folder, page_size, skip
        );

        let token = self.token().await?;
        let resp = self
            .state
            .client
            .get(&url)
            .bearer_auth(&token)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Graph request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Vendor(format!(
                "Graph API returned {}",
                resp.status()
            )));
        }

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Graph response is not valid JSON: {}", e)))?;

        Ok(body["value"]
            .as_array()
            .map(|arr| arr.iter().map(envelope_from_graph).collect())
            .unwrap_or_default())
    }

    pub async fn get_message(&self, id: &str) -> Result<EmailMessage, ProviderError> {
        let url = format!(
            "{}/me/messages/{}?$expand=attachments($select=name,contentType,size)",
            GRAPH_API, id
        );

        let token = self.token().await?;
        let resp = self
            .state
            .client
            .get(&url)
            .bearer_auth(&token)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Graph request failed: {}", e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProviderError::MessageNotFound(id.to_string()));
        }
        if !resp.status().is_success() {
            return Err(ProviderError::Vendor(format!(
                "Graph API returned {}",
                resp.status()
            )));
        }

        let msg: Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Graph response is not valid JSON: {}", e)))?;

        let envelope = envelope_from_graph(&msg);
        let content_type = msg["body"]["contentType"].as_str().unwrap_or("text");
        let content = msg["body"]["content"].as_str().map(String::from);

        let (text_body, html_body) = if content_type.eq_ignore_ascii_case("html") {
            (msg["bodyPreview"].as_str().map(String::from), content)
        } else {
            (content, None)
        };

        let attachments = msg["attachments"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .map(|a| AttachmentInfo {
                        filename: a["name"].as_str().map(String::from),
                        mime_type: a["contentType"].as_str().unwrap_or("application/octet-stream").to_string(),
                        size: a["size"].as_u64().unwrap_or(0) as usize,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(EmailMessage {
            envelope,
            text_body,
            html_body,
            attachments,
        })
    }

    pub async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<(), ProviderError> {
        let recipients = |addrs: &[String]| -> Vec<Value> {
            addrs
                .iter()
                .map(|a| json!({ "emailAddress": { "address": a } }))
                .collect()
        };

        let payload = json!({
            "message": {
                "subject": outgoing.subject,
                "body": { "contentType": "Text", "content": outgoing.body },
                "toRecipients": recipients(&outgoing.to),
                "ccRecipients": recipients(&outgoing.cc),
            },
            "saveToSentItems": true
        });

        let token = self.token().await?;
        let resp = self
            .state
            .client
            .post(format!("{}/me/sendMail", GRAPH_API))
            .bearer_auth(&token)
            .json(&payload)
            .timeout(std::time::Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| ProviderError::Vendor(format!("Graph send failed: {}", e)))?;

        // Graph returns 202 Accepted with an empty body on success.
        if !resp.status().is_success() {
            return Err(ProviderError::Vendor(format!(
                "Graph sendMail returned {}",
                resp.status()
            )));
        }
        tracing::info!(account = %self.account_id, "outlook: message sent");
        Ok(())
    }
}

// ── Response mapping ────────────────────────────────────────────────────────

fn address(v: &Value) -> String {
    let name = v["emailAddress"]["name"].as_str().unwrap_or("");
    let addr = v["emailAddress"]["address"].as_str().unwrap_or("");
    if name.is_empty() || name == addr {
        addr.to_string()
    } else {
        format!("{} <{}>", name, addr)
    }
}

fn envelope_from_graph(msg: &Value) -> Envelope {
    Envelope {
        id: msg["id"].as_str().unwrap_or_default().to_string(),
        message_id: msg["internetMessageId"].as_str().map(String::from),
        from: address(&msg["from"]),
        to: msg["toRecipients"]
            .as_array()
            .map(|arr| arr.iter().map(address).collect())
            .unwrap_or_default(),
        subject: msg["subject"].as_str().unwrap_or_default().to_string(),
        date: msg["receivedDateTime"].as_str().unwrap_or_default().to_string(),
        unread: !msg["isRead"].as_bool().unwrap_or(true),
        has_attachment: msg["hasAttachments"].as_bool().unwrap_or(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_maps_graph_fields() {
        let msg = json!({
            "id": "AAMk123",
            "internetMessageId": "<x@example.com>",
            "from": { "emailAddress": { "name": "Alice", "address": "alice@example.com" } },
            "toRecipients": [
                { "emailAddress": { "name": "", "address": "bob@example.com" } }
            ],
            "subject": "Invoice",
            "receivedDateTime": "2026-08-04T10:00:00Z",
            "isRead": false,
            "hasAttachments": true
        });
        let env = envelope_from_graph(&msg);
        assert_eq!(env.id, "AAMk123");
        assert_eq!(env.from, "Alice <alice@example.com>");
        assert_eq!(env.to, vec!["bob@example.com".to_string()]);
        assert!(env.unread);
        assert!(env.has_attachment);
    }
}
