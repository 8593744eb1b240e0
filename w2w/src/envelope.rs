use crate::channel;
use keyserver_core::crypto::{self, Digest32, KeyPair, SignatureScheme};
use keyserver_core::metadata::Entry;
use keyserver_core::types::now_unix_s;
use keyserver_core::{wire, KeyserverError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionScheme {
  EphemeralDh,
}

/// Signed part of a message. `entries` holds the ciphertext of the encoded
/// entry list; `secret_seed` is the sender's compressed ephemeral key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePayload {
  pub timestamp: u64,
  pub destination: Vec<u8>,
  pub scheme: EncryptionScheme,
  pub entries: Vec<u8>,
  pub secret_seed: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub payload: Vec<u8>,
  pub sender_pub_key: Vec<u8>,
  pub scheme: SignatureScheme,
  pub signature: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct OpenedMessage {
  pub message: Message,
  pub timestamp: u64,
  pub entries: Vec<Entry>,
}

pub type SignFn = fn(&KeyPair, &Digest32) -> Result<(SignatureScheme, Vec<u8>), KeyserverError>;

pub fn seal_message(
  entries: &[Entry],
  sender: &KeyPair,
  destination: &[u8],
  sign: SignFn,
) -> Result<Vec<u8>, KeyserverError> {
  let plain = wire::encode(&entries)?;
  let (ciphertext, seed) = channel::encrypt(&plain, destination, sender)?;

  let payload = MessagePayload {
    timestamp: now_unix_s(),
    destination: crypto::compressed(&crypto::parse_public_key(destination)?),
    scheme: EncryptionScheme::EphemeralDh,
    entries: ciphertext,
    secret_seed: seed,
  };
  let payload = wire::encode(&payload)?;

  let (scheme, signature) = sign(sender, &crypto::sha256(&payload))?;
  let message = Message {
    payload,
    sender_pub_key: sender.public_key_bytes(),
    scheme,
    signature,
  };

  tracing::debug!(
    entries = entries.len(),
    payload_bytes = message.payload.len(),
    "sealed message"
  );
  wire::encode(&message)
}

/// Authenticates and decrypts a sealed message addressed to `destination`.
/// The signature is checked before any decryption is attempted.
pub fn open_message(
  wire_bytes: &[u8],
  destination: &KeyPair,
) -> Result<OpenedMessage, KeyserverError> {
  let message: Message = wire::decode(wire_bytes)?;

  if message.scheme != SignatureScheme::Ecdsa {
    return Err(KeyserverError::UnsupportedScheme(message.scheme));
  }
  let sender = crypto::parse_public_key(&message.sender_pub_key)?;
  crypto::verify(
    message.scheme,
    &sender,
    &message.signature,
    &crypto::sha256(&message.payload),
  )?;

  let payload: MessagePayload = wire::decode(&message.payload)?;
  let plain = channel::decrypt(
    &payload.entries,
    destination.secret(),
    &message.sender_pub_key,
    &payload.secret_seed,
  )?;
  let entries: Vec<Entry> = wire::decode(&plain)?;

  tracing::debug!(
    sender = %hex::encode(&message.sender_pub_key),
    entries = entries.len(),
    "opened message"
  );
  Ok(OpenedMessage {
    message,
    timestamp: payload.timestamp,
    entries,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use keyserver_core::entries::{self, CodecRegistry, EntryAction};

  fn sample_entries() -> Vec<Entry> {
    vec![
      entries::plain_text_entry("meet at noon"),
      entries::telegram_entry("alice"),
    ]
  }

  fn seal_for(sender: &KeyPair, dest: &KeyPair) -> Vec<u8> {
    seal_message(&sample_entries(), sender, &dest.public_key_bytes(), crypto::sign_ecdsa).unwrap()
  }

  fn reencode<F: FnOnce(&mut Message)>(wire_bytes: &[u8], f: F) -> Vec<u8> {
    let mut message: Message = wire::decode(wire_bytes).unwrap();
    f(&mut message);
    wire::encode(&message).unwrap()
  }

  #[test]
  fn open_returns_sealed_entries() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();

    let before = now_unix_s();
    let sealed = seal_for(&sender, &dest);
    let after = now_unix_s();

    let opened = open_message(&sealed, &dest).unwrap();
    assert_eq!(opened.entries, sample_entries());
    assert!(opened.timestamp >= before && opened.timestamp <= after);
    assert_eq!(opened.message.sender_pub_key, sender.public_key_bytes());
    assert_eq!(opened.message.scheme, SignatureScheme::Ecdsa);
  }

  #[test]
  fn tampered_signature_is_rejected() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();
    let sealed = seal_for(&sender, &dest);

    let forged = reencode(&sealed, |m| {
      let last = m.signature.len() - 1;
      m.signature[last] ^= 0x01;
    });
    assert!(matches!(
      open_message(&forged, &dest),
      Err(KeyserverError::InvalidSignature)
    ));
  }

  #[test]
  fn tampered_ciphertext_fails_signature_check() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();
    let sealed = seal_for(&sender, &dest);

    let forged = reencode(&sealed, |m| {
      let mut payload: MessagePayload = wire::decode(&m.payload).unwrap();
      payload.entries[0] ^= 0x80;
      m.payload = wire::encode(&payload).unwrap();
    });
    assert!(matches!(
      open_message(&forged, &dest),
      Err(KeyserverError::InvalidSignature)
    ));
  }

  #[test]
  fn resigned_by_third_party_is_not_readable() {
    let sender = KeyPair::generate();
    let mallory = KeyPair::generate();
    let dest = KeyPair::generate();
    let sealed = seal_for(&sender, &dest);

    // Re-signing under another key changes the shared secret.
    let claimed = reencode(&sealed, |m| {
      let (scheme, sig) = crypto::sign_ecdsa(&mallory, &crypto::sha256(&m.payload)).unwrap();
      m.scheme = scheme;
      m.signature = sig;
      m.sender_pub_key = mallory.public_key_bytes();
    });
    match open_message(&claimed, &dest) {
      Ok(opened) => assert_ne!(opened.entries, sample_entries()),
      Err(_) => {}
    }
  }

  #[test]
  fn schnorr_is_unsupported_on_both_ends() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();
    assert!(matches!(
      seal_message(&sample_entries(), &sender, &dest.public_key_bytes(), crypto::sign_schnorr),
      Err(KeyserverError::UnsupportedScheme(SignatureScheme::Schnorr))
    ));

    let sealed = seal_for(&sender, &dest);
    let relabeled = reencode(&sealed, |m| m.scheme = SignatureScheme::Schnorr);
    assert!(matches!(
      open_message(&relabeled, &dest),
      Err(KeyserverError::UnsupportedScheme(_))
    ));
  }

  #[test]
  fn invalid_sender_key_is_rejected_before_verification() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();
    let sealed = seal_for(&sender, &dest);
    let broken = reencode(&sealed, |m| m.sender_pub_key = vec![0x02; 10]);
    assert!(matches!(
      open_message(&broken, &dest),
      Err(KeyserverError::InvalidKey(_))
    ));
  }

  #[test]
  fn wrong_recipient_cannot_open() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();
    let other = KeyPair::generate();
    let sealed = seal_for(&sender, &dest);
    match open_message(&sealed, &other) {
      Ok(opened) => assert_ne!(opened.entries, sample_entries()),
      Err(_) => {}
    }
  }

  #[test]
  fn pubkey_entry_serves_as_destination() {
    let sender = KeyPair::generate();
    let dest = KeyPair::generate();
    let published = entries::pubkey_entry(&dest.public_key_bytes());

    let destination = match CodecRegistry::with_defaults().execute(&published).unwrap() {
      Some(EntryAction::EncryptTo(key)) => key,
      other => panic!("unexpected action {other:?}"),
    };
    let sealed =
      seal_message(&sample_entries(), &sender, &destination, crypto::sign_ecdsa).unwrap();
    assert_eq!(open_message(&sealed, &dest).unwrap().entries, sample_entries());
  }

  #[test]
  fn garbage_is_a_decode_error() {
    let dest = KeyPair::generate();
    assert!(matches!(
      open_message(&[1, 2, 3], &dest),
      Err(KeyserverError::Decode(_))
    ));
  }
}
