use crate::metadata::builder::DEFAULT_TTL_SECONDS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Config {
  pub logging: LoggingConfig,
  pub keyservers: KeyserverConfig,
  pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyserverConfig {
  #[serde(default = "default_trusted_keyservers")]
  pub trusted: Vec<String>,

  #[serde(default)]
  pub extra: Vec<String>,

  #[serde(default = "default_sample_size")]
  pub sample_size: usize,

  #[serde(default = "default_request_timeout_seconds")]
  pub request_timeout_seconds: u64,

  #[serde(default = "default_call_timeout_seconds")]
  pub call_timeout_seconds: u64,

  // Address whose metadata carries the published keyserver list.
  #[serde(default)]
  pub peer_list_address: String,
}

impl Default for KeyserverConfig {
  fn default() -> Self {
    Self {
      trusted: default_trusted_keyservers(),
      extra: Vec::new(),
      sample_size: default_sample_size(),
      request_timeout_seconds: default_request_timeout_seconds(),
      call_timeout_seconds: default_call_timeout_seconds(),
      peer_list_address: String::new(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
  #[serde(default = "default_ttl_seconds")]
  pub default_ttl_seconds: u64,
}

impl Default for MetadataConfig {
  fn default() -> Self {
    Self {
      default_ttl_seconds: default_ttl_seconds(),
    }
  }
}

fn default_trusted_keyservers() -> Vec<String> {
  vec![
    "http://35.232.229.28".to_string(),
    "http://34.67.137.105".to_string(),
  ]
}

fn default_sample_size() -> usize {
  6
}

fn default_request_timeout_seconds() -> u64 {
  10
}

fn default_call_timeout_seconds() -> u64 {
  30
}

fn default_ttl_seconds() -> u64 {
  DEFAULT_TTL_SECONDS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  #[serde(default)]
  pub keyservers: Option<KeyserverConfig>,

  #[serde(default)]
  pub metadata: Option<MetadataConfig>,
}

impl ConfigFile {
  fn normalize(self) -> Config {
    let mut cfg = Config::default();
    if let Some(l) = self.logging {
      cfg.logging = l;
    }
    if let Some(k) = self.keyservers {
      cfg.keyservers = k;
    }
    if let Some(m) = self.metadata {
      cfg.metadata = m;
    }

    sanitize_keyserver_config(&mut cfg.keyservers);
    cfg
  }

  fn needs_upgrade(&self) -> bool {
    self.logging.is_none() || self.keyservers.is_none() || self.metadata.is_none()
  }
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Config> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;

  if !path.exists() {
    let cfg = Config::default();
    save(path, &cfg)?;
    return Ok(cfg);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<ConfigFile>(&raw) {
    Ok(file) => {
      let needs_upgrade = file.needs_upgrade();
      let cfg = file.normalize();
      if needs_upgrade {
        let backup = parent.join(format!("config.toml.bak-{}", crate::types::now_unix_s()));
        let _ = fs::copy(path, &backup);
        if let Err(e) = save(path, &cfg) {
          tracing::warn!(error = %e, "could not rewrite upgraded config");
        }
        eprintln!(
          "keyserver: upgraded config defaults written to {} (backup: {})",
          path.display(),
          backup.display()
        );
      }
      Ok(cfg)
    }
    Err(e) => {
      let cfg = Config::default();
      let backup = parent.join(format!("config.toml.bad-{}", crate::types::now_unix_s()));
      let _ = fs::rename(path, &backup);
      save(path, &cfg)?;
      eprintln!(
        "keyserver: invalid config at {} (backed up to {}): {e}",
        path.display(),
        backup.display()
      );
      Ok(cfg)
    }
  }
}

pub fn parse(raw: &str) -> anyhow::Result<Config> {
  Ok(toml::from_str::<ConfigFile>(raw)?.normalize())
}

pub fn save(path: &Path, cfg: &Config) -> anyhow::Result<()> {
  let file = ConfigFile {
    logging: Some(cfg.logging.clone()),
    keyservers: Some(cfg.keyservers.clone()),
    metadata: Some(cfg.metadata.clone()),
  };
  write_atomic(path, &toml::to_string_pretty(&file)?)
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

fn sanitize_keyserver_config(cfg: &mut KeyserverConfig) {
  let defaults = KeyserverConfig::default();

  cfg.trusted.retain(|u| keep_url(u, "trusted"));
  cfg.extra.retain(|u| keep_url(u, "extra"));

  if cfg.trusted.is_empty() && cfg.extra.is_empty() {
    tracing::warn!("keyservers config lists no usable servers; using built-in trusted servers");
    cfg.trusted = defaults.trusted;
  }
  if cfg.sample_size == 0 {
    tracing::warn!("keyservers.sample_size must be > 0; using default");
    cfg.sample_size = defaults.sample_size;
  }
  if cfg.request_timeout_seconds == 0 {
    tracing::warn!("keyservers.request_timeout_seconds must be > 0; using default");
    cfg.request_timeout_seconds = defaults.request_timeout_seconds;
  }
  if cfg.call_timeout_seconds == 0 {
    tracing::warn!("keyservers.call_timeout_seconds must be > 0; using default");
    cfg.call_timeout_seconds = defaults.call_timeout_seconds;
  }
}

fn keep_url(raw: &str, list: &str) -> bool {
  match validate_keyserver_url(raw) {
    None => true,
    Some(reason) => {
      tracing::warn!(list, reason = %reason, "dropping keyserver URL from config");
      false
    }
  }
}

fn validate_keyserver_url(raw: &str) -> Option<String> {
  let Ok(url) = reqwest::Url::parse(raw) else {
    return Some(format!("invalid keyserver URL: {raw}"));
  };
  if !matches!(url.scheme(), "http" | "https") {
    return Some(format!("keyserver URL must use http or https: {raw}"));
  }
  if url.host_str().is_none() {
    return Some(format!("keyserver URL has no host: {raw}"));
  }
  None
}

#[cfg(test)]
mod tests {
  use super::*;

  fn temp_config_path() -> std::path::PathBuf {
    std::env::temp_dir()
      .join(format!("keyserver-config-{}", uuid::Uuid::new_v4()))
      .join("config.toml")
  }

  #[test]
  fn missing_sections_use_defaults() {
    let cfg = parse("[logging]\nlevel = \"debug\"\n").unwrap();
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.keyservers.sample_size, 6);
    assert_eq!(cfg.keyservers.trusted.len(), 2);
    assert_eq!(cfg.metadata.default_ttl_seconds, 3_000);
  }

  #[test]
  fn invalid_urls_and_zero_values_are_sanitized() {
    let raw = r#"
[keyservers]
trusted = ["ftp://bad.example", "https://ks.example.org"]
extra = ["not a url", "http://10.0.0.1:8080"]
sample_size = 0
call_timeout_seconds = 0
"#;
    let cfg = parse(raw).unwrap();
    assert_eq!(cfg.keyservers.trusted, vec!["https://ks.example.org".to_string()]);
    assert_eq!(cfg.keyservers.extra, vec!["http://10.0.0.1:8080".to_string()]);
    assert_eq!(cfg.keyservers.sample_size, 6);
    assert_eq!(cfg.keyservers.call_timeout_seconds, 30);
  }

  #[test]
  fn empty_server_lists_fall_back_to_builtin_trusted() {
    let cfg = parse("[keyservers]\ntrusted = []\n").unwrap();
    assert_eq!(cfg.keyservers.trusted, default_trusted_keyservers());
  }

  #[test]
  fn load_creates_default_file_then_reads_it_back() {
    let path = temp_config_path();
    let cfg = load_or_create_default(&path).unwrap();
    assert!(path.exists());
    assert_eq!(cfg.keyservers.sample_size, 6);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("[keyservers]"));
    let again = load_or_create_default(&path).unwrap();
    assert_eq!(again.keyservers.trusted, cfg.keyservers.trusted);

    let _ = fs::remove_dir_all(path.parent().unwrap());
  }

  #[test]
  fn unparseable_file_is_backed_up_and_replaced() {
    let path = temp_config_path();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "this is = = not toml").unwrap();

    let cfg = load_or_create_default(&path).unwrap();
    assert_eq!(cfg.logging.level, "info");
    let backups = fs::read_dir(path.parent().unwrap())
      .unwrap()
      .flatten()
      .filter(|e| e.file_name().to_string_lossy().starts_with("config.toml.bad-"))
      .count();
    assert_eq!(backups, 1);

    let _ = fs::remove_dir_all(path.parent().unwrap());
  }
}
