/// Fixed well-known identity key for the operator side of every conversation.
/// All operator sessions share this key for public-key lookup and presence.
pub const OPERATOR_ID: &str = "operator";

/// Default display name for the operator.
pub const OPERATOR_NAME: &str = "Support";

/// Store collections
pub const CONVERSATIONS: &str = "conversations";
pub const MESSAGES: &str = "messages";
pub const PRESENCE: &str = "presence";
pub const TYPING: &str = "typing";
pub const USERS: &str = "users";

/// Presence heartbeat cadence in seconds
pub const HEARTBEAT_SECS: u64 = 30;

/// A record older than this is reported offline regardless of its flag
pub const ONLINE_CUTOFF_SECS: i64 = 120;

/// Typing records older than this are invisible to readers
pub const TYPING_TTL_SECS: i64 = 10;

/// Typing records older than this may be physically deleted by the sweep
pub const TYPING_SWEEP_SECS: i64 = 30;

/// RSA modulus size in bits
pub const RSA_BITS: usize = 2048;

/// Maximum plaintext bytes per RSA-OAEP operation (2048-bit key, SHA-256)
pub const OAEP_CHUNK_SIZE: usize = 190;

/// Ciphertext bytes produced per RSA-OAEP operation (2048-bit key)
pub const OAEP_BLOCK_SIZE: usize = 256;

/// Rendered in place of a message that cannot be decrypted
pub const DECRYPT_PLACEHOLDER: &str = "[déchiffrement impossible]";

/// First message seeded into every new conversation, sent by the operator
pub const WELCOME_TEXT: &str =
    "Bienvenue ! Laissez-nous un message, nous vous répondons au plus vite.";
