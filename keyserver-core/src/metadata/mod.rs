use crate::crypto::{self, Digest32, SignatureScheme};
use crate::error::KeyserverError;
use crate::wire;
use serde::{Deserialize, Serialize};

pub mod builder;

pub use builder::MetadataBuilder;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
  pub name: String,
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
  pub kind: String,
  #[serde(default)]
  pub headers: Vec<Header>,
  pub entry_data: Vec<u8>,
}

impl Entry {
  pub fn new(kind: impl Into<String>, entry_data: Vec<u8>) -> Self {
    Self {
      kind: kind.into(),
      headers: Vec::new(),
      entry_data,
    }
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|h| h.name == name)
      .map(|h| h.value.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
  pub timestamp: u64,
  pub ttl: u64,
  pub entries: Vec<Entry>,
}

impl Payload {
  pub fn expires_at(&self) -> u64 {
    self.timestamp.saturating_add(self.ttl)
  }

  pub fn is_expired(&self, now_unix_s: u64) -> bool {
    now_unix_s >= self.expires_at()
  }

  pub fn digest(&self) -> Result<Digest32, KeyserverError> {
    Ok(crypto::sha256(&wire::encode(self)?))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataDocument {
  pub pub_key: Vec<u8>,
  pub payload: Payload,
  pub scheme: SignatureScheme,
  pub signature: Vec<u8>,
}

impl MetadataDocument {
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyserverError> {
    wire::decode(bytes)
  }

  pub fn to_bytes(&self) -> Result<Vec<u8>, KeyserverError> {
    wire::encode(self)
  }

  pub fn timestamp(&self) -> u64 {
    self.payload.timestamp
  }
}

/// Trust check applied to every fetched document before it can take part in
/// aggregation.
pub fn validate_document(address: &str, doc: &MetadataDocument) -> Result<(), KeyserverError> {
  let key = crypto::parse_public_key(&doc.pub_key)
    .map_err(|e| KeyserverError::InvalidSignatureOrBinding(e.to_string()))?;
  let digest = doc.payload.digest()?;

  match crypto::verify(doc.scheme, &key, &doc.signature, &digest) {
    Ok(()) => {}
    Err(KeyserverError::UnsupportedScheme(s)) => return Err(KeyserverError::UnsupportedScheme(s)),
    Err(_) => {
      return Err(KeyserverError::InvalidSignatureOrBinding(
        "signature does not verify over payload".to_string(),
      ))
    }
  }

  // TODO: check that `pub_key` actually controls `address` once the wallet
  // exposes address derivation; until then only the payload signature is checked.
  tracing::trace!(address, "document signature verified");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::crypto::KeyPair;

  fn signed(key: &KeyPair, ts: u64) -> MetadataDocument {
    let mut builder = MetadataBuilder::new("qpaddr", 3600);
    builder.set_signer(Box::new(key.clone()));
    builder.add_entry(Entry::new("text_utf8", b"hello".to_vec()));
    builder.build_document_at(ts).unwrap()
  }

  #[test]
  fn validate_accepts_signed_document() {
    let key = KeyPair::generate();
    let doc = signed(&key, 1000);
    assert!(validate_document("qpaddr", &doc).is_ok());
  }

  #[test]
  fn validate_rejects_modified_payload() {
    let key = KeyPair::generate();
    let mut doc = signed(&key, 1000);
    doc.payload.ttl += 1;
    assert!(matches!(
      validate_document("qpaddr", &doc),
      Err(KeyserverError::InvalidSignatureOrBinding(_))
    ));
  }

  #[test]
  fn validate_rejects_garbage_pubkey() {
    let key = KeyPair::generate();
    let mut doc = signed(&key, 1000);
    doc.pub_key = vec![1, 2, 3];
    assert!(matches!(
      validate_document("qpaddr", &doc),
      Err(KeyserverError::InvalidSignatureOrBinding(_))
    ));
  }

  #[test]
  fn validate_reports_schnorr_as_unsupported() {
    let key = KeyPair::generate();
    let mut doc = signed(&key, 1000);
    doc.scheme = SignatureScheme::Schnorr;
    assert!(matches!(
      validate_document("qpaddr", &doc),
      Err(KeyserverError::UnsupportedScheme(SignatureScheme::Schnorr))
    ));
  }

  #[test]
  fn expiry_is_timestamp_plus_ttl() {
    let payload = Payload {
      timestamp: 1000,
      ttl: 3600,
      entries: Vec::new(),
    };
    assert_eq!(payload.expires_at(), 4600);
    assert!(!payload.is_expired(4599));
    assert!(payload.is_expired(4600));
  }

  #[test]
  fn document_bytes_decode_to_equal_document() {
    let key = KeyPair::generate();
    let doc = signed(&key, 42);
    let bytes = doc.to_bytes().unwrap();
    assert_eq!(MetadataDocument::from_bytes(&bytes).unwrap(), doc);
    assert!(MetadataDocument::from_bytes(&bytes[..bytes.len() - 1]).is_err());
  }
}
