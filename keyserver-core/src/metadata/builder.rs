use crate::crypto::AddressSigner;
use crate::error::KeyserverError;
use crate::metadata::{Entry, MetadataDocument, Payload};
use crate::types::now_unix_s;

pub const DEFAULT_TTL_SECONDS: u64 = 3_000;

pub struct MetadataBuilder {
  address: Option<String>,
  ttl: u64,
  entries: Vec<Entry>,
  signer: Option<Box<dyn AddressSigner>>,
}

impl Default for MetadataBuilder {
  fn default() -> Self {
    Self {
      address: None,
      ttl: DEFAULT_TTL_SECONDS,
      entries: Vec::new(),
      signer: None,
    }
  }
}

impl MetadataBuilder {
  pub fn new(address: impl Into<String>, ttl: u64) -> Self {
    Self {
      address: Some(address.into()),
      ttl,
      ..Self::default()
    }
  }

  pub fn set_signer(&mut self, signer: Box<dyn AddressSigner>) {
    self.signer = Some(signer);
  }

  pub fn set_address(&mut self, address: impl Into<String>) {
    self.address = Some(address.into());
  }

  pub fn set_ttl(&mut self, ttl: u64) {
    self.ttl = ttl;
  }

  pub fn add_entry(&mut self, entry: Entry) {
    self.entries.push(entry);
  }

  pub fn add_entries(&mut self, entries: impl IntoIterator<Item = Entry>) {
    self.entries.extend(entries);
  }

  pub fn remove_entry(&mut self, index: usize) -> Option<Entry> {
    if index < self.entries.len() {
      Some(self.entries.remove(index))
    } else {
      None
    }
  }

  pub fn entries(&self) -> &[Entry] {
    &self.entries
  }

  pub fn build_document(&self) -> Result<MetadataDocument, KeyserverError> {
    self.build_document_at(now_unix_s())
  }

  pub fn build_document_at(&self, timestamp: u64) -> Result<MetadataDocument, KeyserverError> {
    let Some(address) = self.address.as_deref() else {
      return Err(KeyserverError::IncompleteMetadata("address not set"));
    };
    let Some(signer) = self.signer.as_ref() else {
      return Err(KeyserverError::IncompleteMetadata("signer not set"));
    };

    let payload = Payload {
      timestamp,
      ttl: self.ttl,
      entries: self.entries.clone(),
    };
    let signed = signer.sign(address, &payload.digest()?)?;

    tracing::debug!(
      address,
      entries = payload.entries.len(),
      ttl = payload.ttl,
      "signed address metadata"
    );

    Ok(MetadataDocument {
      pub_key: signed.pub_key,
      payload,
      scheme: signed.scheme,
      signature: signed.signature,
    })
  }

  pub fn build(&self) -> Result<Vec<u8>, KeyserverError> {
    self.build_document()?.to_bytes()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::crypto::KeyPair;
  use crate::metadata::validate_document;

  #[test]
  fn build_requires_address_and_signer() {
    let mut b = MetadataBuilder::default();
    assert!(matches!(
      b.build(),
      Err(KeyserverError::IncompleteMetadata("address not set"))
    ));

    b.set_address("qpaddr");
    assert!(matches!(
      b.build(),
      Err(KeyserverError::IncompleteMetadata("signer not set"))
    ));

    b.set_signer(Box::new(KeyPair::generate()));
    assert!(b.build().is_ok());
  }

  #[test]
  fn build_signs_entries_in_order() {
    let key = KeyPair::generate();
    let mut b = MetadataBuilder::default();
    b.set_address("qpaddr");
    b.set_signer(Box::new(key.clone()));
    b.add_entry(Entry::new("text_utf8", b"one".to_vec()));
    b.add_entries(vec![
      Entry::new("telegram", b"two".to_vec()),
      Entry::new("text_utf8", b"three".to_vec()),
    ]);
    assert_eq!(b.remove_entry(1).map(|e| e.kind), Some("telegram".to_string()));
    assert!(b.remove_entry(9).is_none());

    let doc = MetadataDocument::from_bytes(&b.build().unwrap()).unwrap();
    assert_eq!(doc.pub_key, key.public_key_bytes());
    assert_eq!(doc.payload.ttl, DEFAULT_TTL_SECONDS);
    let data: Vec<&[u8]> = doc.payload.entries.iter().map(|e| e.entry_data.as_slice()).collect();
    assert_eq!(data, vec![b"one".as_slice(), b"three".as_slice()]);
    assert!(validate_document("qpaddr", &doc).is_ok());
  }

  #[test]
  fn build_stamps_current_time() {
    let mut b = MetadataBuilder::new("qpaddr", 60);
    b.set_signer(Box::new(KeyPair::generate()));
    let before = now_unix_s();
    let doc = b.build_document().unwrap();
    let after = now_unix_s();
    assert!(doc.payload.timestamp >= before && doc.payload.timestamp <= after);
    assert_eq!(doc.payload.expires_at(), doc.payload.timestamp + 60);
  }
}
