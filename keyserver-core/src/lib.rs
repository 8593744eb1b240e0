pub mod aggregator;
pub mod config;
pub mod console;
pub mod crypto;
pub mod entries;
pub mod error;
pub mod logging;
pub mod metadata;
pub mod paths;
pub mod types;
pub mod wire;

pub use error::KeyserverError;

pub fn run_console(args: &[String]) -> anyhow::Result<()> {
  let base = paths::base_dir()?;
  let cfg = config::load_or_create_default(&paths::config_path(&base))?;

  logging::init(&paths::logs_dir(&base), &cfg.logging, true)?;
  tracing::debug!(base = %base.display(), "keyserver console starting");

  console::run_console_command(&cfg, args)
}
