use crate::aggregator::{AggregateResult, Aggregation, Keyservers};
use crate::config::Config;
use crate::crypto::KeyPair;
use crate::entries::{self, CodecRegistry, EntryAction, EntryValue};
use crate::metadata::MetadataBuilder;
use crate::types::{now_unix_s, short_error};
use anyhow::Context;
use std::fs;
use std::path::PathBuf;

pub fn run_console_command(cfg: &Config, args: &[String]) -> anyhow::Result<()> {
  let args: Vec<String> = args.iter().skip(1).cloned().collect();

  if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
    print_help();
    return Ok(());
  }

  if let Some(i) = args.iter().position(|a| a == "--fetch") {
    return run_fetch(cfg, &args[i + 1..]);
  }

  if args.iter().any(|a| a == "--discover") {
    return run_discover(cfg);
  }

  if args.iter().any(|a| a == "--pool") {
    let ks = Keyservers::from_config(&cfg.keyservers)?;
    for url in ks.urls() {
      let tag = if ks.trusted().contains(url) { " (trusted)" } else { "" };
      println!("{url}{tag}");
    }
    return Ok(());
  }

  if let Some(i) = args.iter().position(|a| a == "--build") {
    return run_build(cfg, &args[i + 1..]);
  }

  anyhow::bail!("unknown command; see --help")
}

fn run_fetch(cfg: &Config, tail: &[String]) -> anyhow::Result<()> {
  let address = tail
    .first()
    .filter(|a| !a.starts_with("--"))
    .ok_or_else(|| anyhow::anyhow!("usage: --fetch <address> [--sample N]"))?;
  let sample = flag_value(tail, "--sample")
    .map(|v| v.parse::<usize>().context("--sample expects a number"))
    .transpose()?;

  let mut ks = Keyservers::from_config(&cfg.keyservers)?;
  if !cfg.keyservers.peer_list_address.is_empty() {
    if let Err(e) = ks.discover(&cfg.keyservers.peer_list_address) {
      tracing::warn!(error = %e, "peer discovery failed; using configured pool");
    }
  }

  let out = ks.uniform_aggregate(address, sample)?;
  print_aggregation(&out);
  if out.result.is_none() {
    anyhow::bail!("no keyserver returned usable metadata for {address}");
  }
  Ok(())
}

fn run_discover(cfg: &Config) -> anyhow::Result<()> {
  let mut ks = Keyservers::from_config(&cfg.keyservers)?;
  let n = ks.discover(&cfg.keyservers.peer_list_address)?;
  println!("Keyserver pool now has {n} servers:");
  for url in ks.urls() {
    println!("  {url}");
  }
  Ok(())
}

const BUILD_FLAGS: &str = "[--text T] [--telegram H] [--pubkey HEX] [--ttl S] [--out FILE]";

fn run_build(cfg: &Config, tail: &[String]) -> anyhow::Result<()> {
  let address = tail
    .first()
    .filter(|a| !a.starts_with("--"))
    .ok_or_else(|| anyhow::anyhow!("usage: --build <address> --key <secret-hex> {BUILD_FLAGS}"))?;
  let secret = flag_value(tail, "--key").ok_or_else(|| anyhow::anyhow!("--key is required"))?;
  let key = KeyPair::from_secret_bytes(&hex::decode(secret.trim()).context("--key must be hex")?)?;

  let ttl = match flag_value(tail, "--ttl") {
    Some(v) => v.parse::<u64>().context("--ttl expects seconds")?,
    None => cfg.metadata.default_ttl_seconds,
  };

  let mut builder = MetadataBuilder::new(address.as_str(), ttl);
  builder.set_signer(Box::new(key));
  if let Some(text) = flag_value(tail, "--text") {
    builder.add_entry(entries::plain_text_entry(text));
  }
  if let Some(handle) = flag_value(tail, "--telegram") {
    builder.add_entry(entries::telegram_entry(handle));
  }
  if let Some(pk) = flag_value(tail, "--pubkey") {
    let pubkey = hex::decode(pk.trim()).context("--pubkey must be hex")?;
    builder.add_entry(entries::pubkey_entry(&pubkey));
  }
  if builder.entries().is_empty() {
    anyhow::bail!("nothing to publish; pass --text, --telegram or --pubkey");
  }

  let raw = builder.build()?;
  match flag_value(tail, "--out") {
    Some(path) => {
      let path = PathBuf::from(path);
      fs::write(&path, &raw).with_context(|| format!("write {}", path.display()))?;
      println!("Wrote {} bytes of signed metadata to {}", raw.len(), path.display());
    }
    None => println!("{}", hex::encode(&raw)),
  }
  Ok(())
}

fn print_aggregation(out: &Aggregation) {
  if let Some(r) = &out.result {
    print_result(r);
  }
  if !out.errors.is_empty() {
    println!("Errors ({}):", out.errors.len());
    for (server, err) in &out.errors {
      println!("  {server}: {}", short_error(&err.to_string()));
    }
  }
}

fn print_result(r: &AggregateResult) {
  let payload = &r.document.payload;
  let expired = if payload.is_expired(now_unix_s()) { " (expired)" } else { "" };
  println!("Source:     {}", r.source);
  println!("Confidence: {:.2}%", r.confidence * 100.0);
  println!("Signed by:  {}", hex::encode(&r.document.pub_key));
  println!("Timestamp:  {}", payload.timestamp);
  println!("Expires:    {}{expired}", payload.expires_at());
  println!("Entries ({}):", payload.entries.len());

  let registry = CodecRegistry::with_defaults();
  for entry in &payload.entries {
    match registry.decode(entry) {
      Ok(value) => println!("  [{}] {}", entry.kind, describe(&value)),
      Err(e) => println!("  [{}] <{}>", entry.kind, e),
    }
    if let Ok(Some(action)) = registry.execute(entry) {
      match action {
        EntryAction::OpenUrl(url) => println!("      open: {url}"),
        EntryAction::AddKeyservers(urls) => println!("      {} keyservers offered", urls.len()),
        EntryAction::EncryptTo(_) => println!("      usable as a w2w message destination"),
      }
    }
  }
}

fn describe(value: &EntryValue) -> String {
  match value {
    EntryValue::Text(t) => t.clone(),
    EntryValue::Telegram(h) => format!("@{h}"),
    EntryValue::KeyserverUrls(urls) => urls.join(", "),
    EntryValue::VCard(card) => {
      let mut parts = vec![card.name.clone()];
      parts.extend(card.email.clone());
      parts.extend(card.mobile.clone());
      parts.join(" / ")
    }
    EntryValue::PubKey(key) => hex::encode(key),
  }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
  let i = args.iter().position(|a| a == flag)?;
  args.get(i + 1).map(String::as_str)
}

fn print_help() {
  println!("keyserver {}", env!("CARGO_PKG_VERSION"));
  println!();
  println!("USAGE:");
  println!("  keyserver --fetch <address> [--sample N]   aggregate metadata for an address");
  println!("  keyserver --discover                       refresh the pool from trusted peers");
  println!("  keyserver --pool                           list configured keyservers");
  println!("  keyserver --build <address> --key <hex> {BUILD_FLAGS}");
  println!("                                             sign a metadata document");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entries::VCard;

  fn args(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn flag_value_reads_following_argument() {
    let a = args(&["qpaddr", "--sample", "3", "--out"]);
    assert_eq!(flag_value(&a, "--sample"), Some("3"));
    assert_eq!(flag_value(&a, "--out"), None);
    assert_eq!(flag_value(&a, "--ttl"), None);
  }

  #[test]
  fn describe_vcard_joins_present_fields() {
    let card = VCard {
      name: "Alice".to_string(),
      email: None,
      mobile: Some("123".to_string()),
    };
    assert_eq!(describe(&EntryValue::VCard(card)), "Alice / 123");
  }

  #[test]
  fn build_writes_signed_document() {
    let out = std::env::temp_dir().join(format!("keyserver-build-{}.bin", uuid::Uuid::new_v4()));
    let key = hex::encode([9u8; 32]);
    let a = args(&[
      "qpaddr",
      "--key",
      key.as_str(),
      "--text",
      "hello",
      "--out",
      out.to_str().unwrap(),
    ]);
    run_build(&Config::default(), &a).unwrap();

    let doc = crate::metadata::MetadataDocument::from_bytes(&fs::read(&out).unwrap()).unwrap();
    assert_eq!(doc.payload.ttl, 3_000);
    assert!(crate::metadata::validate_document("qpaddr", &doc).is_ok());
    let _ = fs::remove_file(&out);
  }

  #[test]
  fn build_requires_entries() {
    let key = hex::encode([9u8; 32]);
    let a = args(&["qpaddr", "--key", key.as_str()]);
    assert!(run_build(&Config::default(), &a).is_err());
  }
}
