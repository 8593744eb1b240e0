use crate::crypto::SignatureScheme;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyserverError {
  #[error(
    "transport error{}: {message}",
    .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
  )]
  Transport {
    status: Option<u16>,
    message: String,
  },

  #[error("decode error: {0}")]
  Decode(String),

  #[error("encode error: {0}")]
  Encode(String),

  #[error("stale document: timestamp {timestamp} is older than current best {best}")]
  StaleDocument { timestamp: u64, best: u64 },

  #[error("document failed trust check: {0}")]
  InvalidSignatureOrBinding(String),

  #[error("invalid key: {0}")]
  InvalidKey(String),

  #[error("invalid signature")]
  InvalidSignature,

  #[error("decryption failed")]
  DecryptionError,

  #[error("unsupported signature scheme {0:?}")]
  UnsupportedScheme(SignatureScheme),

  #[error("server pool is empty")]
  EmptyServerPool,

  #[error("unknown entry kind {0:?}")]
  UnknownEntryKind(String),

  #[error("metadata incomplete: {0}")]
  IncompleteMetadata(&'static str),
}

impl KeyserverError {
  pub fn transport(message: impl Into<String>) -> Self {
    Self::Transport {
      status: None,
      message: message.into(),
    }
  }

  pub fn is_transport(&self) -> bool {
    matches!(self, Self::Transport { .. })
  }
}
