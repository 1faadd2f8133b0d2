//! Per-recipient message encryption.
//!
//! Every message is encrypted independently for each participant with
//! RSA-OAEP (SHA-256) under that participant's public key.  For an
//! exactly-two-party conversation this trades re-encryption per message
//! for zero key-distribution machinery.
//!
//! OAEP bounds one operation at 190 plaintext bytes for a 2048-bit key, so
//! longer plaintexts are chunked: each 190-byte chunk becomes one 256-byte
//! RSA block and the ciphertext is the base64 of the concatenated blocks.
//! Decryption splits on the fixed block size; anything that does not divide
//! evenly is a [`ChatError::DecryptionFailed`], never a panic.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use tracing::warn;

use causerie_shared::constants::{OAEP_BLOCK_SIZE, OAEP_CHUNK_SIZE};
use causerie_shared::UserId;

use crate::error::{ChatError, Result};
use crate::keys::KeyDirectory;

/// Encrypts outgoing messages for each recipient and decrypts the entry
/// addressed to the local identity.
pub struct MessageCipher {
    keys: Arc<KeyDirectory>,
}

impl MessageCipher {
    pub fn new(keys: Arc<KeyDirectory>) -> Self {
        Self { keys }
    }

    /// Encrypt a plaintext once per recipient.
    ///
    /// A recipient whose key lookup fails with [`ChatError::KeyNotFound`]
    /// is skipped — a participant that has not initialised its key pair yet
    /// simply cannot read this message.  Store failures still propagate.
    pub async fn encrypt_for(
        &self,
        plaintext: &str,
        recipients: &[UserId],
    ) -> Result<HashMap<String, String>> {
        let mut out = HashMap::new();
        for recipient in recipients {
            let key = match self.keys.lookup(recipient).await {
                Ok(key) => key,
                Err(ChatError::KeyNotFound(_)) => {
                    warn!(recipient = %recipient.short(), "No published key, skipping recipient");
                    continue;
                }
                Err(e) => return Err(e),
            };
            out.insert(recipient.to_string(), encrypt_with(&key, plaintext.as_bytes())?);
        }
        Ok(out)
    }

    /// Decrypt the entry addressed to `identity`.
    ///
    /// Pure function of its inputs so the subscribe path can call it per
    /// message.  Callers render failures as a placeholder; one bad record
    /// must never blank out a whole conversation.
    pub fn decrypt(
        cipher_map: &HashMap<String, String>,
        identity: &UserId,
        private: &RsaPrivateKey,
    ) -> Result<String> {
        let encoded = cipher_map
            .get(identity.as_str())
            .ok_or_else(|| ChatError::NoCiphertextForSelf(identity.clone()))?;

        let blob = BASE64
            .decode(encoded)
            .map_err(|e| ChatError::DecryptionFailed(e.to_string()))?;
        if blob.is_empty() || blob.len() % OAEP_BLOCK_SIZE != 0 {
            return Err(ChatError::DecryptionFailed(format!(
                "ciphertext of {} bytes is not a whole number of RSA blocks",
                blob.len()
            )));
        }

        let mut plain = Vec::new();
        for block in blob.chunks(OAEP_BLOCK_SIZE) {
            let padding = Oaep::new::<Sha256>();
            plain.extend(
                private
                    .decrypt(padding, block)
                    .map_err(|e| ChatError::DecryptionFailed(e.to_string()))?,
            );
        }

        String::from_utf8(plain).map_err(|e| ChatError::DecryptionFailed(e.to_string()))
    }
}

/// One recipient's ciphertext: chunked RSA-OAEP, base64 of the blocks.
fn encrypt_with(key: &RsaPublicKey, plaintext: &[u8]) -> Result<String> {
    let mut rng = OsRng;
    let mut blob = Vec::new();

    if plaintext.is_empty() {
        // An empty chunk still produces one full RSA block, so "" survives
        // the round trip.
        let padding = Oaep::new::<Sha256>();
        blob.extend(
            key.encrypt(&mut rng, padding, plaintext)
                .map_err(|e| ChatError::CryptoUnavailable(e.to_string()))?,
        );
    } else {
        for chunk in plaintext.chunks(OAEP_CHUNK_SIZE) {
            let padding = Oaep::new::<Sha256>();
            blob.extend(
                key.encrypt(&mut rng, padding, chunk)
                    .map_err(|e| ChatError::CryptoUnavailable(e.to_string()))?,
            );
        }
    }

    Ok(BASE64.encode(blob))
}

#[cfg(test)]
mod tests {
    use super::*;
    use causerie_store::MemoryStore;

    use crate::keys::KeyPair;

    async fn directory_with(pairs: &[&KeyPair]) -> Arc<KeyDirectory> {
        let directory = Arc::new(KeyDirectory::new(Arc::new(MemoryStore::new())));
        for pair in pairs {
            directory
                .publish(&pair.identity, None, &pair.public)
                .await
                .unwrap();
        }
        directory
    }

    fn key_pair(identity: &str) -> KeyPair {
        KeyDirectory::generate_key_pair(identity).unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_short_plaintext() {
        let alice = key_pair("u1");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let map = cipher
            .encrypt_for("Bonjour", &[alice.identity.clone()])
            .await
            .unwrap();
        assert_eq!(map.len(), 1);

        let plain = MessageCipher::decrypt(&map, &alice.identity, &alice.private).unwrap();
        assert_eq!(plain, "Bonjour");
    }

    #[tokio::test]
    async fn test_round_trip_at_oaep_boundary() {
        let alice = key_pair("u1");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let exactly_one_chunk = "x".repeat(OAEP_CHUNK_SIZE);
        let map = cipher
            .encrypt_for(&exactly_one_chunk, &[alice.identity.clone()])
            .await
            .unwrap();

        let blob = BASE64.decode(&map["u1"]).unwrap();
        assert_eq!(blob.len(), OAEP_BLOCK_SIZE);
        assert_eq!(
            MessageCipher::decrypt(&map, &alice.identity, &alice.private).unwrap(),
            exactly_one_chunk
        );
    }

    #[tokio::test]
    async fn test_round_trip_long_plaintext_is_chunked() {
        let alice = key_pair("u1");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let long = "é".repeat(300); // 600 UTF-8 bytes -> 4 blocks
        let map = cipher
            .encrypt_for(&long, &[alice.identity.clone()])
            .await
            .unwrap();

        let blob = BASE64.decode(&map["u1"]).unwrap();
        assert_eq!(blob.len(), 4 * OAEP_BLOCK_SIZE);
        assert_eq!(
            MessageCipher::decrypt(&map, &alice.identity, &alice.private).unwrap(),
            long
        );
    }

    #[tokio::test]
    async fn test_round_trip_empty_plaintext() {
        let alice = key_pair("u1");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let map = cipher.encrypt_for("", &[alice.identity.clone()]).await.unwrap();
        assert_eq!(
            MessageCipher::decrypt(&map, &alice.identity, &alice.private).unwrap(),
            ""
        );
    }

    #[tokio::test]
    async fn test_each_recipient_decrypts_independently() {
        let alice = key_pair("u1");
        let operator = key_pair("operator");
        let cipher = MessageCipher::new(directory_with(&[&alice, &operator]).await);

        let map = cipher
            .encrypt_for("Hello", &[alice.identity.clone(), operator.identity.clone()])
            .await
            .unwrap();
        assert_eq!(map.len(), 2);

        assert_eq!(
            MessageCipher::decrypt(&map, &alice.identity, &alice.private).unwrap(),
            "Hello"
        );
        assert_eq!(
            MessageCipher::decrypt(&map, &operator.identity, &operator.private).unwrap(),
            "Hello"
        );
    }

    #[tokio::test]
    async fn test_unrelated_identity_has_no_ciphertext() {
        let alice = key_pair("u1");
        let mallory = key_pair("u9");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let map = cipher
            .encrypt_for("secret", &[alice.identity.clone()])
            .await
            .unwrap();

        let err = MessageCipher::decrypt(&map, &mallory.identity, &mallory.private).unwrap_err();
        assert!(matches!(err, ChatError::NoCiphertextForSelf(id) if id.as_str() == "u9"));
    }

    #[tokio::test]
    async fn test_wrong_private_key_fails_cleanly() {
        let alice = key_pair("u1");
        let wrong = key_pair("u1"); // same identity, different pair
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let map = cipher
            .encrypt_for("secret", &[alice.identity.clone()])
            .await
            .unwrap();

        let err = MessageCipher::decrypt(&map, &alice.identity, &wrong.private).unwrap_err();
        assert!(matches!(err, ChatError::DecryptionFailed(_)));
    }

    #[tokio::test]
    async fn test_truncated_ciphertext_fails_cleanly() {
        let alice = key_pair("u1");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let mut map = cipher
            .encrypt_for("secret", &[alice.identity.clone()])
            .await
            .unwrap();
        let blob = BASE64.decode(&map["u1"]).unwrap();
        map.insert("u1".into(), BASE64.encode(&blob[..OAEP_BLOCK_SIZE - 1]));

        let err = MessageCipher::decrypt(&map, &alice.identity, &alice.private).unwrap_err();
        assert!(matches!(err, ChatError::DecryptionFailed(_)));
    }

    #[tokio::test]
    async fn test_recipient_without_key_is_skipped() {
        let alice = key_pair("u1");
        let cipher = MessageCipher::new(directory_with(&[&alice]).await);

        let map = cipher
            .encrypt_for(
                "Hello",
                &[alice.identity.clone(), UserId::new("not-registered")],
            )
            .await
            .unwrap();

        // The unknown recipient is silently absent, the known one intact.
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("u1"));
    }
}
