use chrono::{DateTime, Duration, Utc};
use reqwest::header::AUTHORIZATION;
use reqwest::RequestBuilder;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{AppError, Result};

/// Edit tokens are short-lived; refresh well before the server drops them.
const EDIT_TOKEN_LIFETIME_SECS: i64 = 1500;

#[derive(Debug, Clone)]
pub(crate) struct EditToken {
    pub value: String,
    expires_at: DateTime<Utc>,
}

impl EditToken {
    pub fn new(value: String) -> Self {
        Self {
            value,
            expires_at: Utc::now() + Duration::seconds(EDIT_TOKEN_LIFETIME_SECS),
        }
    }

    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

/// Credentials obtained by the login flow, which lives outside this crate.
pub struct Auth {
    auth_key: String,
    pub(crate) edit_token: Mutex<Option<EditToken>>,
}

impl Auth {
    pub fn new(auth_key: impl Into<String>) -> Self {
        Self {
            auth_key: auth_key.into(),
            edit_token: Mutex::new(None),
        }
    }

    pub fn with_edit_token(self, token: impl Into<String>) -> Self {
        Self {
            edit_token: Mutex::new(Some(EditToken::new(token.into()))),
            ..self
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let key = config
            .auth_key
            .clone()
            .ok_or_else(|| AppError::Auth("no auth_key configured".to_string()))?;
        let auth = Self::new(key);
        Ok(match &config.edit_token {
            Some(token) => auth.with_edit_token(token.clone()),
            None => auth,
        })
    }

    /// Injects the `GoogleLogin` authorization header.
    pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(AUTHORIZATION, format!("GoogleLogin auth={}", self.auth_key))
    }

    pub async fn invalidate_edit_token(&self) {
        *self.edit_token.lock().await = None;
    }
}
