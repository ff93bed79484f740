//! Token-table identity verification.

use std::collections::HashMap;

use async_trait::async_trait;

use dyscreen_core::traits::{Identity, IdentityVerifier};

/// Resolves bearer tokens from a fixed table, typically loaded from the
/// `[[identities]]` section of the configuration.
#[derive(Default)]
pub struct StaticIdentityVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticIdentityVerifier {
    pub fn new(tokens: HashMap<String, Identity>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: &str, identity: Identity) -> Self {
        self.tokens.insert(token.to_string(), identity);
        self
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentityVerifier {
    async fn verify(&self, token: &str) -> anyhow::Result<Identity> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown or expired token"))
    }
}
