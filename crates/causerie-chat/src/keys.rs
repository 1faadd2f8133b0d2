//! Key generation, publication and lookup.
//!
//! Each identity owns one long-lived RSA-OAEP key pair (2048-bit, SHA-256).
//! The private key never leaves the owning process; the public key is
//! published to the `users` collection where any peer can fetch it.
//! Looked-up keys are cached for the process lifetime — public keys are
//! immutable for the session (no rotation).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};
use tracing::debug;

use causerie_shared::constants::{RSA_BITS, USERS};
use causerie_shared::UserId;
use causerie_store::DocumentStore;

use crate::error::{ChatError, Result};

/// An identity's asymmetric key pair.  Created once, lives for the process.
pub struct KeyPair {
    pub identity: UserId,
    pub public: RsaPublicKey,
    pub private: RsaPrivateKey,
}

/// Publishes and resolves public keys over the `users` collection.
pub struct KeyDirectory {
    store: Arc<dyn DocumentStore>,
    cache: RwLock<HashMap<UserId, RsaPublicKey>>,
}

impl KeyDirectory {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Generate a fresh RSA key pair for an identity.
    ///
    /// Call this at startup: a [`ChatError::CryptoUnavailable`] here means
    /// messaging cannot work at all, and must not be discovered on first
    /// send.
    pub fn generate_key_pair(identity: impl Into<UserId>) -> Result<KeyPair> {
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| ChatError::CryptoUnavailable(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair {
            identity: identity.into(),
            public,
            private,
        })
    }

    /// Publish a public key (and optionally a display name) under
    /// `users/{identity}`, merging into whatever the outer system already
    /// stores there.
    pub async fn publish(
        &self,
        identity: &UserId,
        display_name: Option<&str>,
        public: &RsaPublicKey,
    ) -> Result<()> {
        let der = public
            .to_public_key_der()
            .map_err(|e| ChatError::CryptoUnavailable(e.to_string()))?;
        let encoded = BASE64.encode(der.as_bytes());
        let name = display_name.map(str::to_string);

        self.store
            .mutate(
                USERS,
                identity.as_str(),
                Box::new(move |current| {
                    let mut fields = match current {
                        Some(v @ Value::Object(_)) => v,
                        _ => json!({}),
                    };
                    fields["publicKey"] = json!(encoded);
                    if let Some(name) = name {
                        fields["displayName"] = json!(name);
                    }
                    Some(fields)
                }),
            )
            .await?;

        self.write_cache(identity.clone(), public.clone());
        debug!(identity = %identity.short(), "Published public key");
        Ok(())
    }

    /// Resolve an identity's public key, consulting the process cache
    /// first.  [`ChatError::KeyNotFound`] means the identity has not
    /// published yet — callers treat that as "cannot encrypt for this
    /// recipient yet", not as a hard failure.
    pub async fn lookup(&self, identity: &UserId) -> Result<RsaPublicKey> {
        if let Some(key) = self.read_cache(identity) {
            return Ok(key);
        }

        let doc = self.store.get(USERS, identity.as_str()).await?;
        let encoded = doc
            .and_then(|d| {
                d.fields
                    .get("publicKey")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| ChatError::KeyNotFound(identity.clone()))?;

        let der = BASE64
            .decode(&encoded)
            .map_err(|e| ChatError::Internal(format!("invalid published key for {identity}: {e}")))?;
        let key = RsaPublicKey::from_public_key_der(&der)
            .map_err(|e| ChatError::Internal(format!("invalid published key for {identity}: {e}")))?;

        self.write_cache(identity.clone(), key.clone());
        Ok(key)
    }

    fn read_cache(&self, identity: &UserId) -> Option<RsaPublicKey> {
        self.cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    fn write_cache(&self, identity: UserId, key: RsaPublicKey) {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity, key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_store::MemoryStore;

    fn small_key_pair(identity: &str) -> KeyPair {
        // 2048-bit generation is slow in debug builds; tests that only
        // exercise publish/lookup plumbing can use a short modulus.
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, 512).unwrap();
        let public = RsaPublicKey::from(&private);
        KeyPair {
            identity: UserId::new(identity),
            public,
            private,
        }
    }

    #[tokio::test]
    async fn test_publish_then_lookup() {
        let store = Arc::new(MemoryStore::new());
        let directory = KeyDirectory::new(store.clone());
        let pair = small_key_pair("u1");

        directory
            .publish(&pair.identity, Some("Alice"), &pair.public)
            .await
            .unwrap();

        let found = directory.lookup(&pair.identity).await.unwrap();
        assert_eq!(found, pair.public);

        // Display name merged into the users document.
        let doc = store
            .get(USERS, "u1")
            .await
            .unwrap()
            .expect("users doc exists");
        assert_eq!(doc.fields["displayName"], "Alice");
    }

    #[tokio::test]
    async fn test_lookup_unknown_identity_is_key_not_found() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()));
        let err = directory.lookup(&UserId::new("ghost")).await.unwrap_err();
        assert!(matches!(err, ChatError::KeyNotFound(id) if id.as_str() == "ghost"));
    }

    #[tokio::test]
    async fn test_lookup_is_cached_for_the_process() {
        let store = Arc::new(MemoryStore::new());
        let directory = KeyDirectory::new(store.clone());
        let pair = small_key_pair("u1");
        directory
            .publish(&pair.identity, None, &pair.public)
            .await
            .unwrap();
        directory.lookup(&pair.identity).await.unwrap();

        // Even with the store gone dark, the cached key resolves.
        store.set_unreachable(true);
        let found = directory.lookup(&pair.identity).await.unwrap();
        assert_eq!(found, pair.public);
    }

    #[tokio::test]
    async fn test_publish_preserves_foreign_user_fields() {
        let store = Arc::new(MemoryStore::new());
        store
            .put(USERS, "u1", json!({ "email": "a@example.org" }))
            .await
            .unwrap();

        let directory = KeyDirectory::new(store.clone());
        let pair = small_key_pair("u1");
        directory
            .publish(&pair.identity, None, &pair.public)
            .await
            .unwrap();

        let doc = store.get(USERS, "u1").await.unwrap().unwrap();
        assert_eq!(doc.fields["email"], "a@example.org");
        assert!(doc.fields.get("publicKey").is_some());
    }
}
