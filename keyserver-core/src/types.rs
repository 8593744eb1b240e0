use crate::error::KeyserverError;

pub type SourceError = (String, KeyserverError);

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

pub fn now_unix_s() -> u64 {
  now_unix_ms() / 1000
}

pub fn short_error(text: &str) -> String {
  let count = text.chars().count();
  if count <= 180 {
    return text.to_string();
  }
  let prefix: String = text.chars().take(180).collect();
  format!("{prefix}...")
}
