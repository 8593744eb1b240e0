use crate::error::KeyserverError;
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub const MAX_WIRE_BYTES: u64 = 2 * 1024 * 1024;

fn options() -> impl Options {
  bincode::DefaultOptions::new()
    .with_fixint_encoding()
    .with_little_endian()
    .with_limit(MAX_WIRE_BYTES)
    .reject_trailing_bytes()
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, KeyserverError> {
  options()
    .serialize(value)
    .map_err(|e| KeyserverError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, KeyserverError> {
  options()
    .deserialize(bytes)
    .map_err(|e| KeyserverError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn decode_rejects_trailing_bytes() {
    let mut bytes = encode(&(7u64, "abc".to_string())).unwrap();
    bytes.push(0);
    let out = decode::<(u64, String)>(&bytes);
    assert!(matches!(out, Err(KeyserverError::Decode(_))));
  }

  #[test]
  fn decode_rejects_oversized_length_prefix() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&u64::MAX.to_le_bytes());
    let out = decode::<Vec<u8>>(&bytes);
    assert!(out.is_err());
  }
}
