use crate::error::KeyserverError;
use crate::metadata::Entry;
use crate::wire;
use reqwest::Url;
use std::collections::BTreeMap;

pub mod vcard;

pub use vcard::VCard;

pub const TEXT_UTF8: &str = "text_utf8";
pub const TELEGRAM: &str = "telegram";
pub const KS_URLS: &str = "ks_urls";
pub const VCARD: &str = "vcard";
pub const PUBKEY: &str = "pubkey";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryValue {
  Text(String),
  Telegram(String),
  KeyserverUrls(Vec<String>),
  VCard(VCard),
  PubKey(Vec<u8>),
}

impl EntryValue {
  pub fn kind(&self) -> &'static str {
    match self {
      Self::Text(_) => TEXT_UTF8,
      Self::Telegram(_) => TELEGRAM,
      Self::KeyserverUrls(_) => KS_URLS,
      Self::VCard(_) => VCARD,
      Self::PubKey(_) => PUBKEY,
    }
  }

  pub fn to_entry(&self) -> Result<Entry, KeyserverError> {
    let data = match self {
      Self::Text(s) | Self::Telegram(s) => s.as_bytes().to_vec(),
      Self::KeyserverUrls(urls) => wire::encode(urls)?,
      Self::VCard(card) => card.to_vcf().into_bytes(),
      Self::PubKey(key) => key.clone(),
    };
    Ok(Entry::new(self.kind(), data))
  }
}

pub fn plain_text_entry(text: &str) -> Entry {
  Entry::new(TEXT_UTF8, text.as_bytes().to_vec())
}

pub fn telegram_entry(handle: &str) -> Entry {
  Entry::new(TELEGRAM, handle.as_bytes().to_vec())
}

pub fn ks_urls_entry(urls: &[String]) -> Result<Entry, KeyserverError> {
  EntryValue::KeyserverUrls(urls.to_vec()).to_entry()
}

pub fn pubkey_entry(pubkey: &[u8]) -> Entry {
  Entry::new(PUBKEY, pubkey.to_vec())
}

pub fn vcard_entry(card: &VCard) -> Entry {
  Entry::new(VCARD, card.to_vcf().into_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryAction {
  OpenUrl(Url),
  AddKeyservers(Vec<String>),
  EncryptTo(Vec<u8>),
}

pub type DecodeFn = Box<dyn Fn(&[u8]) -> Result<EntryValue, KeyserverError> + Send + Sync>;
pub type ExecuteFn = Box<dyn Fn(&EntryValue) -> anyhow::Result<EntryAction> + Send + Sync>;

pub struct EntryCodec {
  pub decode: DecodeFn,
  pub execute: Option<ExecuteFn>,
}

#[derive(Default)]
pub struct CodecRegistry {
  codecs: BTreeMap<String, EntryCodec>,
}

impl CodecRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_defaults() -> Self {
    let mut reg = Self::new();
    reg.register(TEXT_UTF8, Box::new(|b: &[u8]| utf8(b).map(EntryValue::Text)), None);
    reg.register(
      TELEGRAM,
      Box::new(|b: &[u8]| {
        utf8(b).map(|s| EntryValue::Telegram(s.trim().trim_start_matches('@').to_string()))
      }),
      Some(Box::new(telegram_executor)),
    );
    reg.register(
      KS_URLS,
      Box::new(|b: &[u8]| wire::decode::<Vec<String>>(b).map(EntryValue::KeyserverUrls)),
      Some(Box::new(|v: &EntryValue| match v {
        EntryValue::KeyserverUrls(urls) => Ok(EntryAction::AddKeyservers(urls.clone())),
        other => anyhow::bail!("ks_urls executor got {}", other.kind()),
      })),
    );
    reg.register(
      VCARD,
      Box::new(|b: &[u8]| VCard::parse(&utf8(b)?).map(EntryValue::VCard)),
      None,
    );
    reg.register(
      PUBKEY,
      Box::new(|b: &[u8]| Ok(EntryValue::PubKey(b.to_vec()))),
      Some(Box::new(|v: &EntryValue| match v {
        EntryValue::PubKey(key) => Ok(EntryAction::EncryptTo(key.clone())),
        other => anyhow::bail!("pubkey executor got {}", other.kind()),
      })),
    );
    reg
  }

  pub fn register(&mut self, kind: &str, decode: DecodeFn, execute: Option<ExecuteFn>) {
    self
      .codecs
      .insert(kind.to_string(), EntryCodec { decode, execute });
  }

  pub fn kinds(&self) -> impl Iterator<Item = &str> {
    self.codecs.keys().map(String::as_str)
  }

  pub fn decode(&self, entry: &Entry) -> Result<EntryValue, KeyserverError> {
    let codec = self
      .codecs
      .get(&entry.kind)
      .ok_or_else(|| KeyserverError::UnknownEntryKind(entry.kind.clone()))?;
    (codec.decode)(entry.entry_data.as_slice())
  }

  /// Decodes the entry and runs its executor. `Ok(None)` when the kind has
  /// nothing to execute.
  pub fn execute(&self, entry: &Entry) -> anyhow::Result<Option<EntryAction>> {
    let value = self.decode(entry)?;
    let Some(codec) = self.codecs.get(&entry.kind) else {
      return Ok(None);
    };
    match &codec.execute {
      Some(exec) => Ok(Some(exec(&value)?)),
      None => Ok(None),
    }
  }
}

fn utf8(bytes: &[u8]) -> Result<String, KeyserverError> {
  String::from_utf8(bytes.to_vec())
    .map_err(|e| KeyserverError::Decode(format!("entry is not UTF-8: {e}")))
}

fn telegram_executor(value: &EntryValue) -> anyhow::Result<EntryAction> {
  let EntryValue::Telegram(handle) = value else {
    anyhow::bail!("telegram executor got {}", value.kind());
  };
  if handle.is_empty() || !handle.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    anyhow::bail!("invalid telegram handle {handle:?}");
  }
  let url = Url::parse("https://t.me/")?.join(handle)?;
  Ok(EntryAction::OpenUrl(url))
}
