//! IMAP/SMTP backend built on email-lib (pimalaya).
//!
//! Backends are constructed per call from the account's stored settings —
//! the service is stateless between requests, matching the rest of the
//! handler layer.

use std::sync::Arc;

use email::account::config::{passwd::PasswordConfig, AccountConfig};
use email::backend::BackendBuilder;
use email::envelope::list::{ListEnvelopes, ListEnvelopesOptions};
use email::envelope::Id;
use email::flag::Flag;
use email::folder::INBOX;
use email::imap::config::{ImapAuthConfig, ImapConfig};
use email::imap::ImapContextBuilder;
use email::message::get::GetMessages;
use email::message::send::SendMessage;
use email::smtp::config::{SmtpAuthConfig, SmtpConfig};
use email::smtp::SmtpContextBuilder;
use email::tls::{Encryption, Tls};
use secret::Secret;

use crate::models::{AttachmentInfo, EmailMessage, Envelope, OutgoingMessage};

use super::{build_rfc822, ImapSettings, ProviderError, SmtpSettings};

pub struct ImapProvider {
    email: String,
    account_config: Arc<AccountConfig>,
    imap: ImapSettings,
    smtp: Option<SmtpSettings>,
}

impl ImapProvider {
    pub fn new(
        email: String,
        display_name: String,
        imap: ImapSettings,
        smtp: Option<SmtpSettings>,
    ) -> Self {
        let account_config = Arc::new(AccountConfig {
            name: email.clone(),
            email: email.clone(),
            display_name: if display_name.is_empty() {
                None
            } else {
                Some(display_name)
            },
            ..Default::default()
        });
        Self {
            email,
            account_config,
            imap,
            smtp,
        }
    }

    /// Stored passwords use the same at-rest encryption as OAuth tokens.
    fn password(stored: &str) -> Result<String, ProviderError> {
        crate::oauth::decrypt_token(stored).map_err(ProviderError::Auth)
    }

    fn imap_config(&self) -> Result<ImapConfig, ProviderError> {
        let passwd = Self::password(&self.imap.password)?;
        let tls_config = Tls::default();
        let encryption = if self.imap.tls {
            Some(Encryption::Tls(tls_config))
        } else {
            Some(Encryption::StartTls(tls_config))
        };

        Ok(ImapConfig {
            host: self.imap.host.clone(),
            port: self.imap.port,
            encryption,
            login: self.imap.username.clone(),
            auth: ImapAuthConfig::Password(PasswordConfig(Secret::new_raw(passwd))),
            ..Default::default()
        })
    }

    fn smtp_config(&self) -> Result<SmtpConfig, ProviderError> {
        let smtp = self.smtp.as_ref().ok_or_else(|| {
            ProviderError::Backend(format!("Account '{}' has no SMTP configuration", self.email))
        })?;
        let passwd = Self::password(&smtp.password)?;
        let tls_config = Tls::default();
        let encryption = if smtp.tls {
            Some(Encryption::Tls(tls_config))
        } else {
            Some(Encryption::StartTls(tls_config))
        };

        Ok(SmtpConfig {
            host: smtp.host.clone(),
            port: smtp.port,
            encryption,
            login: smtp.username.clone(),
            auth: SmtpAuthConfig::Password(PasswordConfig(Secret::new_raw(passwd))),
            ..Default::default()
        })
    }

    pub async fn list_messages(
        &self,
        folder: Option<&str>,
        page: usize,
        page_size: usize,
    ) -> Result<Vec<Envelope>, ProviderError> {
        let imap_config = self.imap_config()?;
        let folder = folder.unwrap_or(INBOX);

        let ctx = ImapContextBuilder::new(self.account_config.clone(), Arc::new(imap_config));
        let backend = BackendBuilder::new(self.account_config.clone(), ctx)
            .build()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let opts = ListEnvelopesOptions {
            page,
            page_size,
            query: None,
        };

        let envelopes = backend
            .list_envelopes(folder, opts)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        Ok(envelopes
            .into_iter()
            .map(|e| Envelope {
                id: e.id.clone(),
                message_id: if e.message_id.is_empty() {
                    None
                } else {
                    Some(e.message_id.clone())
                },
                from: e.from.to_string(),
                to: vec![e.to.to_string()],
                subject: e.subject.clone(),
                date: e.date.to_rfc3339(),
                unread: !e.flags.contains(&Flag::Seen),
                has_attachment: e.has_attachment,
            })
            .collect())
    }

    pub async fn get_message(&self, id: &str) -> Result<EmailMessage, ProviderError> {
        let imap_config = self.imap_config()?;
        let msg_id = Id::single(id);

        let ctx = ImapContextBuilder::new(self.account_config.clone(), Arc::new(imap_config));
        let backend = BackendBuilder::new(self.account_config.clone(), ctx)
            .build()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let messages = backend
            .get_messages(INBOX, &msg_id)
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let msg = messages
            .first()
            .ok_or_else(|| ProviderError::MessageNotFound(id.to_string()))?;

        let parsed = msg
            .parsed()
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        let text_body = parsed.body_text(0).map(|s| s.to_string());
        let html_body = parsed.body_html(0).map(|s| s.to_string());

        let attachments: Vec<AttachmentInfo> = msg
            .attachments()
            .map_err(|e| ProviderError::Backend(e.to_string()))?
            .into_iter()
            .map(|a| AttachmentInfo {
                filename: a.filename,
                mime_type: a.mime.to_string(),
                size: a.body.len(),
            })
            .collect();

        let from = parsed
            .from()
            .and_then(|a| a.first())
            .map(|a| match a.name() {
                Some(name) => format!("{} <{}>", name, a.address().unwrap_or("")),
                None => a.address().unwrap_or("").to_string(),
            })
            .unwrap_or_default();

        let to: Vec<String> = parsed
            .to()
            .map(|list| {
                list.iter()
                    .map(|a| match a.name() {
                        Some(name) => format!("{} <{}>", name, a.address().unwrap_or("")),
                        None => a.address().unwrap_or("").to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let envelope = Envelope {
            id: id.to_string(),
            message_id: parsed.message_id().map(|s| s.to_string()),
            from,
            to,
            subject: parsed.subject().map(|s| s.to_string()).unwrap_or_default(),
            date: parsed.date().map(|d| d.to_rfc3339()).unwrap_or_default(),
            unread: false,
            has_attachment: !attachments.is_empty(),
        };

        Ok(EmailMessage {
            envelope,
            text_body,
            html_body,
            attachments,
        })
    }

    pub async fn send_message(&self, outgoing: &OutgoingMessage) -> Result<(), ProviderError> {
        let smtp_config = self.smtp_config()?;
        let raw = build_rfc822(&self.email, outgoing);

        let ctx = SmtpContextBuilder::new(self.account_config.clone(), Arc::new(smtp_config));
        let backend = BackendBuilder::new(self.account_config.clone(), ctx)
            .build()
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        backend
            .send_message(raw.as_bytes())
            .await
            .map_err(|e| ProviderError::Backend(e.to_string()))?;

        tracing::info!(account = %self.email, "imap: message sent via SMTP");
        Ok(())
    }
}
