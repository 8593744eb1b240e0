use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use keyserver_core::KeyserverError;

pub fn armor(bytes: &[u8]) -> String {
  STANDARD.encode(bytes)
}

pub fn dearmor(text: &str) -> Result<Vec<u8>, KeyserverError> {
  let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
  if compact.is_empty() {
    return Err(KeyserverError::Decode("empty armored message".to_string()));
  }
  STANDARD
    .decode(compact.as_bytes())
    .map_err(|e| KeyserverError::Decode(format!("invalid base64: {e}")))
}
