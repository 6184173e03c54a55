//! OAuth token storage for email accounts.
//!
//! Tokens are encrypted at rest with AES-256-GCM when TOKEN_ENCRYPTION_KEY
//! (or AUTH_SECRET) is set, and refreshed against the Google / Microsoft
//! token endpoints when within the expiry buffer.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};

use crate::state::AppState;

const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const MS_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 300;

// ── AES-256-GCM token encryption ────────────────────────────────────────
// Graceful degradation: stores plaintext if no key is available.

/// Derive a 32-byte AES-256 key from a secret string via SHA-256.
fn derive_encryption_key(secret: &str) -> [u8; 32] {
    let hash = Sha256::digest(secret.as_bytes());
    let mut key = [0u8; 32];
    key.copy_from_slice(&hash);
    key
}

/// Get the encryption key from env, if available.
/// Priority: TOKEN_ENCRYPTION_KEY > AUTH_SECRET > None (plaintext).
fn get_encryption_key() -> Option<[u8; 32]> {
    std::env::var("TOKEN_ENCRYPTION_KEY")
        .ok()
        .or_else(|| std::env::var("AUTH_SECRET").ok())
        .filter(|s| !s.is_empty())
        .map(|s| derive_encryption_key(&s))
}

/// Encrypt a plaintext string. Returns hex-encoded "enc:nonce:ciphertext".
/// Returns the original plaintext if no encryption key is available.
pub(crate) fn encrypt_token(plaintext: &str) -> String {
    let Some(key_bytes) = get_encryption_key() else {
        return plaintext.to_string();
    };
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .expect("AES-256-GCM key is always 32 bytes");
    let nonce_bytes: [u8; 12] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    match cipher.encrypt(nonce, plaintext.as_bytes()) {
        Ok(ciphertext) => {
            format!("enc:{}:{}", hex::encode(nonce_bytes), hex::encode(ciphertext))
        }
        Err(e) => {
            tracing::error!("Failed to encrypt token: {}", e);
            plaintext.to_string()
        }
    }
}

/// Decrypt a token string. If it starts with "enc:", parse nonce:ciphertext.
/// Otherwise treat as plaintext (backwards-compatible with unencrypted tokens).
pub(crate) fn decrypt_token(stored: &str) -> Result<String, String> {
    if !stored.starts_with("enc:") {
        return Ok(stored.to_string());
    }
    let Some(key_bytes) = get_encryption_key() else {
        return Err("Encrypted token in DB but no encryption key configured".into());
    };
    let parts: Vec<&str> = stored.splitn(3, ':').collect();
    if parts.len() != 3 {
        return Err("Malformed encrypted token format".into());
    }
    let nonce_bytes = hex::decode(parts[1])
        .map_err(|e| format!("Invalid nonce hex: {}", e))?;
    let ciphertext = hex::decode(parts[2])
        .map_err(|e| format!("Invalid ciphertext hex: {}", e))?;
    if nonce_bytes.len() != 12 {
        return Err(format!("Invalid nonce length: {} (expected 12)", nonce_bytes.len()));
    }
    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .expect("AES-256-GCM key is always 32 bytes");
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|e| format!("Decryption failed (wrong key?): {}", e))?;
    String::from_utf8(plaintext).map_err(|e| format!("Decrypted token is not valid UTF-8: {}", e))
}

// ── Token refresh ───────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct TokenRow {
    provider: String,
    access_token: String,
    refresh_token: String,
    token_expires_at: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: i64,
}

/// Resolve a usable access token for an account, refreshing it through the
/// provider's token endpoint if it expires within the buffer window.
pub async fn ensure_fresh_token(state: &AppState, account_id: &Uuid) -> Result<String, String> {
    let row = sqlx::query_as::<_, TokenRow>(
        "SELECT provider, access_token, refresh_token, token_expires_at \
         FROM ip_email_accounts WHERE id = $1",
    )
    .bind(account_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| format!("DB error loading account tokens: {}", e))?
    .ok_or_else(|| "Account not found".to_string())?;

    let access_token = decrypt_token(&row.access_token)?;
    if access_token.is_empty() {
        return Err("Account has no stored access token".into());
    }

    let now = chrono::Utc::now().timestamp();
    if now < row.token_expires_at - TOKEN_EXPIRY_BUFFER_SECS {
        return Ok(access_token);
    }

    refresh_token(state, account_id, &row).await
}

async fn refresh_token(state: &AppState, account_id: &Uuid, row: &TokenRow) -> Result<String, String> {
    let refresh = match decrypt_token(&row.refresh_token) {
        Ok(t) if !t.is_empty() => t,
        _ => return Err("Access token expired and no refresh token is stored".into()),
    };

    let (token_url, client_id, client_secret) = oauth_client_config(&row.provider)?;

    tracing::info!(account = %account_id, provider = %row.provider, "Refreshing expired OAuth token");

    let mut form = vec![
        ("client_id", client_id),
        ("refresh_token", refresh.clone()),
        ("grant_type", "refresh_token".to_string()),
    ];
    if let Some(secret) = client_secret {
        form.push(("client_secret", secret));
    }
    if row.provider == "outlook" {
        form.push(("scope", "https://graph.microsoft.com/.default offline_access".to_string()));
    }

    let resp = state
        .client
        .post(token_url)
        .form(&form)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
        .map_err(|e| format!("Token refresh request failed: {}", e))?;

    if !resp.status().is_success() {
        return Err(format!("Token endpoint rejected refresh: {}", resp.status()));
    }

    let tokens: TokenResponse = resp
        .json()
        .await
        .map_err(|e| format!("Invalid token response: {}", e))?;

    let now = chrono::Utc::now().timestamp();
    let expires_at = now + tokens.expires_in;
    let new_refresh = tokens.refresh_token.unwrap_or(refresh);

    let encrypted_access = encrypt_token(&tokens.access_token);
    let encrypted_refresh = encrypt_token(&new_refresh);

    sqlx::query(
        "UPDATE ip_email_accounts SET access_token = $1, refresh_token = $2, \
         token_expires_at = $3, updated_at = NOW() WHERE id = $4",
    )
    .bind(&encrypted_access)
    .bind(&encrypted_refresh)
    .bind(expires_at)
    .bind(account_id)
    .execute(&state.db)
    .await
    .map_err(|e| format!("Failed to persist refreshed tokens: {}", e))?;

    tracing::info!(account = %account_id, "OAuth token refreshed");
    Ok(tokens.access_token)
}

/// Token endpoint and client credentials for a provider tag.
fn oauth_client_config(provider: &str) -> Result<(&'static str, String, Option<String>), String> {
    match provider {
        "gmail" => {
            let id = std::env::var("GOOGLE_OAUTH_CLIENT_ID")
                .map_err(|_| "GOOGLE_OAUTH_CLIENT_ID not configured".to_string())?;
            let secret = std::env::var("GOOGLE_OAUTH_CLIENT_SECRET").ok();
            Ok((GOOGLE_TOKEN_URL, id, secret))
        }
        "outlook" => {
            let id = std::env::var("MS_OAUTH_CLIENT_ID")
                .map_err(|_| "MS_OAUTH_CLIENT_ID not configured".to_string())?;
            let secret = std::env::var("MS_OAUTH_CLIENT_SECRET").ok();
            Ok((MS_TOKEN_URL, id, secret))
        }
        other => Err(format!("Provider '{}' does not use OAuth tokens", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_roundtrip_without_key() {
        // No env key in the test environment — passthrough behavior.
        if get_encryption_key().is_none() {
            assert_eq!(encrypt_token("hello"), "hello");
            assert_eq!(decrypt_token("hello").unwrap(), "hello");
        }
    }

    #[test]
    fn malformed_encrypted_token_rejected() {
        assert!(decrypt_token("enc:only-two-parts").is_err());
    }

    #[test]
    fn imap_provider_has_no_oauth_config() {
        assert!(oauth_client_config("imap").is_err());
        assert!(oauth_client_config("bogus").is_err());
    }
}
