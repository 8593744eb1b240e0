pub mod armor;
pub mod channel;
pub mod envelope;

use anyhow::Context;
use keyserver_core::aggregator::Keyservers;
use keyserver_core::crypto::{self, KeyPair};
use keyserver_core::entries::{self, CodecRegistry, EntryAction, EntryValue};
use keyserver_core::metadata::Entry;
use keyserver_core::{config, paths};
use std::fs;
use std::io::Read;

pub use envelope::{
  open_message, seal_message, EncryptionScheme, Message, MessagePayload, OpenedMessage, SignFn,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
  Keygen,
  Seal,
  Open,
}

impl Command {
  pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
    if args.iter().any(|a| a == "--keygen") {
      return Ok(Self::Keygen);
    }
    if args.iter().any(|a| a == "--seal") {
      return Ok(Self::Seal);
    }
    if args.iter().any(|a| a == "--open") {
      return Ok(Self::Open);
    }
    Err(anyhow::anyhow!("expected `--keygen`, `--seal` or `--open`"))
  }
}

#[derive(Debug, Clone, Default)]
struct MessageOptions {
  key: Option<String>,
  to: Option<String>,
  to_address: Option<String>,
  texts: Vec<String>,
  telegram: Option<String>,
  input: Option<String>,
}

pub fn run(cmd: Command) -> anyhow::Result<()> {
  let args: Vec<String> = std::env::args().collect();
  let opts = parse_options(&args);

  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .with_writer(std::io::stderr)
    .init();

  let out = execute(cmd, &opts, &mut std::io::stdin())?;
  println!("{out}");
  Ok(())
}

fn execute(cmd: Command, opts: &MessageOptions, stdin: &mut dyn Read) -> anyhow::Result<String> {
  match cmd {
    Command::Keygen => {
      let key = KeyPair::generate();
      Ok(format!(
        "secret: {}\npublic: {}",
        hex::encode(key.secret().to_bytes()),
        hex::encode(key.public_key_bytes())
      ))
    }
    Command::Seal => {
      let sender = load_key(opts)?;
      let destination = match (&opts.to, &opts.to_address) {
        (Some(hex_key), _) => hex::decode(hex_key.trim()).context("--to must be hex")?,
        (None, Some(address)) => resolve_destination(address)?,
        (None, None) => anyhow::bail!("--seal needs --to <pubkey-hex> or --to-address <address>"),
      };

      let mut list: Vec<Entry> = opts.texts.iter().map(|t| entries::plain_text_entry(t)).collect();
      if let Some(handle) = &opts.telegram {
        list.push(entries::telegram_entry(handle));
      }
      if list.is_empty() {
        anyhow::bail!("nothing to send; pass --text or --telegram");
      }

      let sealed = seal_message(&list, &sender, &destination, crypto::sign_ecdsa)?;
      Ok(armor::armor(&sealed))
    }
    Command::Open => {
      let recipient = load_key(opts)?;
      let text = match &opts.input {
        Some(path) => fs::read_to_string(path).with_context(|| format!("read {path}"))?,
        None => {
          let mut buf = String::new();
          stdin.read_to_string(&mut buf).context("read stdin")?;
          buf
        }
      };
      let opened = open_message(&armor::dearmor(&text)?, &recipient)?;
      Ok(render(&opened))
    }
  }
}

fn load_key(opts: &MessageOptions) -> anyhow::Result<KeyPair> {
  let secret = opts
    .key
    .as_deref()
    .ok_or_else(|| anyhow::anyhow!("--key <secret-hex> is required"))?;
  let bytes = hex::decode(secret.trim()).context("--key must be hex")?;
  Ok(KeyPair::from_secret_bytes(&bytes)?)
}

fn resolve_destination(address: &str) -> anyhow::Result<Vec<u8>> {
  let base = paths::base_dir()?;
  let cfg = config::load_or_create_default(&paths::config_path(&base))?;
  let ks = Keyservers::from_config(&cfg.keyservers)?;

  let out = ks.uniform_aggregate(address, None)?;
  for (server, err) in &out.errors {
    tracing::warn!(server = %server, error = %err, "keyserver lookup failed");
  }
  let result = out
    .result
    .ok_or_else(|| anyhow::anyhow!("no keyserver returned metadata for {address}"))?;
  tracing::info!(source = %result.source, confidence = result.confidence, "resolved destination");

  destination_from_entries(&result.document.payload.entries)
    .ok_or_else(|| anyhow::anyhow!("{address} does not publish an encryption key"))
}

fn destination_from_entries(list: &[Entry]) -> Option<Vec<u8>> {
  let registry = CodecRegistry::with_defaults();
  list.iter().find_map(|e| match registry.execute(e) {
    Ok(Some(EntryAction::EncryptTo(key))) => Some(key),
    _ => None,
  })
}

fn render(opened: &OpenedMessage) -> String {
  let registry = CodecRegistry::with_defaults();
  let mut lines = vec![
    format!("From: {}", hex::encode(&opened.message.sender_pub_key)),
    format!("Sent: {}", opened.timestamp),
  ];
  for entry in &opened.entries {
    let text = match registry.decode(entry) {
      Ok(EntryValue::Text(t)) => t,
      Ok(EntryValue::Telegram(h)) => format!("telegram @{h}"),
      Ok(EntryValue::PubKey(k)) => format!("pubkey {}", hex::encode(k)),
      Ok(other) => format!("{} entry", other.kind()),
      Err(e) => format!("<{e}>"),
    };
    lines.push(format!("  {text}"));
  }
  lines.join("\n")
}

fn parse_options(args: &[String]) -> MessageOptions {
  let mut opts = MessageOptions::default();
  let mut i = 0;
  while i < args.len() {
    let value = args.get(i + 1).cloned();
    match (args[i].as_str(), value) {
      ("--key", Some(v)) => opts.key = Some(v),
      ("--to", Some(v)) => opts.to = Some(v),
      ("--to-address", Some(v)) => opts.to_address = Some(v),
      ("--text", Some(v)) => opts.texts.push(v),
      ("--telegram", Some(v)) => opts.telegram = Some(v),
      ("--in", Some(v)) => opts.input = Some(v),
      _ => {
        i += 1;
        continue;
      }
    }
    i += 2;
  }
  opts
}
