//! Who the client acts as.
//!
//! The backend trusts whatever user id arrives in the `X-User-Id` header, so
//! this is bookkeeping, not authentication.

use color_eyre::Result;
use std::sync::Arc;

use crate::cache::KeyValueStore;

/// Header value sent on reads when nobody is signed in.
pub const ANONYMOUS: &str = "anonymous";

/// Storage key for the signed-in user id.
const SESSION_USER_KEY: &str = "vboard:session:user_id";

/// Supplies the current user id, if any.
pub trait IdentityProvider: Send + Sync {
  fn user_id(&self) -> Option<String>;

  /// Value for the identity header.
  fn header_value(&self) -> String {
    self.user_id().unwrap_or_else(|| ANONYMOUS.to_string())
  }
}

/// A fixed identity (or none).
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
  pub fn new(user_id: impl Into<String>) -> Self {
    Self(Some(user_id.into()))
  }

  pub fn anonymous() -> Self {
    Self(None)
  }
}

impl IdentityProvider for StaticIdentity {
  fn user_id(&self) -> Option<String> {
    self.0.clone()
  }
}

/// User id remembered in key-value storage between runs.
#[derive(Clone)]
pub struct SessionIdentity {
  storage: Arc<dyn KeyValueStore>,
}

impl SessionIdentity {
  pub fn new(storage: Arc<dyn KeyValueStore>) -> Self {
    Self { storage }
  }

  pub fn sign_in(&self, user_id: &str) -> Result<()> {
    self.storage.set(SESSION_USER_KEY, user_id.trim())
  }

  pub fn sign_out(&self) -> Result<()> {
    self.storage.remove(SESSION_USER_KEY)
  }
}

impl IdentityProvider for SessionIdentity {
  fn user_id(&self) -> Option<String> {
    self
      .storage
      .get(SESSION_USER_KEY)
      .ok()
      .flatten()
      .filter(|id| !id.is_empty())
  }
}

/// First provider that knows a user wins.
pub struct ChainedIdentity(Vec<Box<dyn IdentityProvider>>);

impl ChainedIdentity {
  pub fn new(providers: Vec<Box<dyn IdentityProvider>>) -> Self {
    Self(providers)
  }
}

impl IdentityProvider for ChainedIdentity {
  fn user_id(&self) -> Option<String> {
    self.0.iter().find_map(|p| p.user_id())
  }
}
