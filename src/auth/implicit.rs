//! OAuth2 implicit-grant login
//!
//! The host loads [`AuthorizationRequest::url`] in a browser, watches
//! navigations with [`AuthorizationRequest::is_redirect`], and hands the
//! final redirect to [`AuthorizationRequest::complete`]. The `state` nonce is
//! checked on the way back.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use smartlight_shared::{endpoints, now_ms};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Length of the random `state` nonce
const STATE_LEN: usize = 32;

/// OAuth client settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub authorize_url: String,
    pub client_id: String,
    pub redirect_uri: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: endpoints::AUTHORIZE_URL.into(),
            client_id: "<YOUR CLIENT APP ID>".into(),
            redirect_uri: "android-app://redirect".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid authorization endpoint: {0}")]
    InvalidAuthorizeUrl(String),

    #[error("not a redirect to the configured redirect URI")]
    NotRedirect,

    #[error("malformed redirect URL: {0}")]
    MalformedRedirect(String),

    #[error("authorization denied: {error} {description}")]
    Denied { error: String, description: String },

    #[error("redirect carries no state parameter")]
    MissingState,

    #[error("redirect state does not match the request")]
    StateMismatch,

    #[error("redirect carries no access_token")]
    MissingToken,
}

/// Access token returned by the implicit grant
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    token_type: String,
    expires_at_ms: Option<u64>,
}

impl AccessToken {
    /// `expires_in` is in seconds from now, as the redirect reports it
    pub fn new(secret: impl Into<String>, token_type: impl Into<String>, expires_in: Option<u64>) -> Self {
        Self {
            secret: secret.into(),
            token_type: token_type.into(),
            expires_at_ms: expires_in.map(|secs| now_ms().saturating_add(secs.saturating_mul(1000))),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn token_type(&self) -> &str {
        &self.token_type
    }

    pub fn expires_at_ms(&self) -> Option<u64> {
        self.expires_at_ms
    }

    /// A token without a reported lifetime never expires locally
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|at| now_ms >= at)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// One login attempt
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    url: Url,
    state: String,
    redirect_uri: String,
}

impl AuthorizationRequest {
    /// Build a request with a fresh random `state`
    pub fn new(config: &OAuthConfig) -> Result<Self, AuthError> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_LEN)
            .map(char::from)
            .collect();
        Self::with_state(config, state)
    }

    pub fn with_state(config: &OAuthConfig, state: impl Into<String>) -> Result<Self, AuthError> {
        let state = state.into();
        let mut url = Url::parse(&config.authorize_url)
            .map_err(|e| AuthError::InvalidAuthorizeUrl(e.to_string()))?;

        url.query_pairs_mut()
            .append_pair("client", "mobile")
            .append_pair("client_id", &config.client_id)
            .append_pair("response_type", "token")
            .append_pair("redirect_uri", &config.redirect_uri)
            .append_pair("state", &state);

        Ok(Self {
            url,
            state,
            redirect_uri: config.redirect_uri.clone(),
        })
    }

    /// URL to load in the browser
    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    /// Does this navigation end the login flow?
    ///
    /// The redirect URI must be followed by the end of the string or a
    /// `/`, `?` or `#`, so `android-app://redirector.evil` does not match.
    pub fn is_redirect(&self, uri: &str) -> bool {
        match uri.strip_prefix(self.redirect_uri.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
            None => false,
        }
    }

    /// Extract the access token from the final redirect
    ///
    /// The token normally arrives in the fragment
    /// (`android-app://redirect#expires_in=1209600&token_type=bearer&access_token=...`);
    /// query parameters are accepted too.
    pub fn complete(&self, uri: &str) -> Result<AccessToken, AuthError> {
        let uri = uri.trim();
        if !self.is_redirect(uri) {
            return Err(AuthError::NotRedirect);
        }

        let url = Url::parse(uri).map_err(|e| AuthError::MalformedRedirect(e.to_string()))?;

        let mut params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            params.extend(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
        }

        if let Some(error) = params.remove("error") {
            let description = params.remove("error_description").unwrap_or_default();
            return Err(AuthError::Denied { error, description });
        }

        match params.get("state") {
            None => return Err(AuthError::MissingState),
            Some(state) if *state != self.state => return Err(AuthError::StateMismatch),
            Some(_) => {}
        }

        let secret = params
            .remove("access_token")
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;
        let token_type = params
            .remove("token_type")
            .unwrap_or_else(|| "bearer".into());
        let expires_in = params.get("expires_in").and_then(|v| v.parse::<u64>().ok());

        Ok(AccessToken::new(secret, token_type, expires_in))
    }
}
