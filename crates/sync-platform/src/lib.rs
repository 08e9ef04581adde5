use std::sync::{
    Arc, RwLock,
    atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("not signed in")]
    SignedOut,
    #[error("token store unavailable: {0}")]
    Unavailable(String),
}

/// Source of the bearer token attached to every request.
///
/// `request_sign_in` is the host's hook for a rejected token; it must not
/// block.
pub trait AccessTokenProvider: Send + Sync {
    fn access_token(&self) -> Result<String, AuthError>;

    fn request_sign_in(&self);
}

impl<P: AccessTokenProvider + ?Sized> AccessTokenProvider for Arc<P> {
    fn access_token(&self) -> Result<String, AuthError> {
        (**self).access_token()
    }

    fn request_sign_in(&self) {
        (**self).request_sign_in()
    }
}

/// Process-local token slot, shared by clones.
///
/// A sign-in request drops the stored token so later calls fail fast until
/// the host stores a fresh one.
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    token: Arc<RwLock<Option<String>>>,
    sign_in_requests: Arc<AtomicUsize>,
}

impl InMemoryTokenStore {
    pub fn with_token(token: impl Into<String>) -> Self {
        let store = Self::default();
        // A fresh lock cannot be poisoned.
        let _ = store.set_token(token);
        store
    }

    pub fn set_token(&self, token: impl Into<String>) -> Result<(), AuthError> {
        let mut slot = self
            .token
            .write()
            .map_err(|_| AuthError::Unavailable("poisoned lock".to_owned()))?;
        *slot = Some(token.into());
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        let mut slot = self
            .token
            .write()
            .map_err(|_| AuthError::Unavailable("poisoned lock".to_owned()))?;
        *slot = None;
        Ok(())
    }

    /// How many times a sign-in was requested.
    pub fn sign_in_requests(&self) -> usize {
        self.sign_in_requests.load(Ordering::SeqCst)
    }
}

impl AccessTokenProvider for InMemoryTokenStore {
    fn access_token(&self) -> Result<String, AuthError> {
        let slot = self
            .token
            .read()
            .map_err(|_| AuthError::Unavailable("poisoned lock".to_owned()))?;
        slot.clone()
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::SignedOut)
    }

    fn request_sign_in(&self) {
        self.sign_in_requests.fetch_add(1, Ordering::SeqCst);
        let _ = self.clear();
        info!("sign-in requested");
    }
}

/// Fixed token, for tools and tests that never re-authenticate.
#[derive(Clone, Debug)]
pub struct StaticToken(pub String);

impl AccessTokenProvider for StaticToken {
    fn access_token(&self) -> Result<String, AuthError> {
        Ok(self.0.clone())
    }

    fn request_sign_in(&self) {
        info!("sign-in requested for a static token; ignoring");
    }
}
