//! OAuth credentials.
//!
//! The access token is the pipeline's only piece of shared mutable state.
//! It lives behind a replace-not-mutate holder: writers publish a whole new
//! `Arc<Token>`, readers snapshot the current one, and no reader can observe
//! a half-updated token.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};

/// An OAuth token: value, secret, and provider extras such as a session
/// handle carried through refresh exchanges.
#[derive(Clone, Debug)]
pub struct Token {
    value: String,
    secret: SecretString,
    extras: HashMap<String, String>,
}

impl Token {
    pub fn new(value: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: SecretString::from(secret.into()),
            extras: HashMap::new(),
        }
    }

    pub fn with_extra(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extras.insert(name.into(), value.into());
        self
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn secret(&self) -> &str {
        self.secret.expose_secret()
    }

    pub fn extra(&self, name: &str) -> Option<&str> {
        self.extras.get(name).map(String::as_str)
    }
}

/// Atomically-swapped holder for the current access token.
pub struct TokenHolder {
    current: RwLock<Arc<Token>>,
}

impl TokenHolder {
    pub fn new(token: Token) -> Self {
        Self {
            current: RwLock::new(Arc::new(token)),
        }
    }

    /// Snapshot the current token. The snapshot stays valid even if a
    /// replacement is installed while it is in use.
    pub fn current(&self) -> Arc<Token> {
        self.current
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Install a replacement token. In-flight signings keep the snapshot
    /// they already took; later ones see the replacement.
    pub fn replace(&self, token: Token) {
        let token = Arc::new(token);
        match self.current.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }
}
