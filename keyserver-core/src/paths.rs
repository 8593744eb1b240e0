use std::path::{Path, PathBuf};

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Some(dir) = std::env::var_os("KEYSERVER_HOME").filter(|v| !v.is_empty()) {
    return Ok(PathBuf::from(dir));
  }
  let home = std::env::var_os("HOME")
    .or_else(|| std::env::var_os("USERPROFILE"))
    .ok_or_else(|| anyhow::anyhow!("cannot locate home directory; set KEYSERVER_HOME"))?;
  Ok(PathBuf::from(home).join(".keyserver"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("config.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}
