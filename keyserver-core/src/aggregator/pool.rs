use crate::aggregator::{aggregate, Aggregation, HttpFetcher, MetadataFetcher};
use crate::config::KeyserverConfig;
use crate::entries::{CodecRegistry, EntryValue, KS_URLS};
use crate::error::KeyserverError;
use anyhow::Context;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::time::Duration;

/// The set of keyservers a client samples from. Trusted servers come from
/// configuration and are always part of the pool.
pub struct Keyservers {
  trusted: Vec<String>,
  urls: Vec<String>,
  default_sample_size: usize,
  call_timeout: Duration,
  fetcher: Arc<dyn MetadataFetcher>,
}

impl Keyservers {
  pub fn from_config(cfg: &KeyserverConfig) -> anyhow::Result<Self> {
    let fetcher = HttpFetcher::new(Duration::from_secs(cfg.request_timeout_seconds))
      .context("create keyserver HTTP fetcher")?;
    Ok(Self::with_fetcher(cfg, Arc::new(fetcher)))
  }

  pub fn with_fetcher(cfg: &KeyserverConfig, fetcher: Arc<dyn MetadataFetcher>) -> Self {
    let mut out = Self {
      trusted: cfg.trusted.clone(),
      urls: Vec::new(),
      default_sample_size: cfg.sample_size,
      call_timeout: Duration::from_secs(cfg.call_timeout_seconds),
      fetcher,
    };
    out.set_keyservers(&cfg.extra);
    out
  }

  pub fn set_keyservers(&mut self, urls: &[String]) {
    let mut pool = self.trusted.clone();
    for url in urls {
      let url = url.trim();
      if url.is_empty() || pool.iter().any(|u| u == url) {
        continue;
      }
      pool.push(url.to_string());
    }
    self.urls = pool;
  }

  pub fn urls(&self) -> &[String] {
    &self.urls
  }

  pub fn trusted(&self) -> &[String] {
    &self.trusted
  }

  pub fn uniform_sample(&self) -> Option<&str> {
    self.urls.choose(&mut rand::thread_rng()).map(String::as_str)
  }

  pub fn uniform_aggregate(
    &self,
    address: &str,
    sample_size: Option<usize>,
  ) -> Result<Aggregation, KeyserverError> {
    aggregate(
      Arc::clone(&self.fetcher),
      &self.urls,
      address,
      sample_size.unwrap_or(self.default_sample_size),
      self.call_timeout,
    )
  }

  /// Looks up the keyserver list published at `peer_list_address` using only
  /// the trusted servers, then adopts it as the pool. Returns the pool size.
  pub fn discover(&mut self, peer_list_address: &str) -> anyhow::Result<usize> {
    if peer_list_address.trim().is_empty() {
      anyhow::bail!("peer list address is not configured");
    }

    let out = aggregate(
      Arc::clone(&self.fetcher),
      &self.trusted,
      peer_list_address,
      self.default_sample_size,
      self.call_timeout,
    )
    .context("aggregate peer list from trusted keyservers")?;

    let Some(result) = out.result else {
      anyhow::bail!(
        "no trusted keyserver returned a peer list ({} errors)",
        out.errors.len()
      );
    };

    let registry = CodecRegistry::with_defaults();
    let urls = result
      .document
      .payload
      .entries
      .iter()
      .filter(|e| e.kind == KS_URLS)
      .find_map(|e| match registry.decode(e) {
        Ok(EntryValue::KeyserverUrls(urls)) => Some(urls),
        Ok(_) => None,
        Err(err) => {
          tracing::warn!(error = %err, "skipping undecodable ks_urls entry");
          None
        }
      })
      .ok_or_else(|| anyhow::anyhow!("peer list document has no ks_urls entry"))?;

    self.set_keyservers(&urls);
    tracing::info!(
      source = %result.source,
      confidence = result.confidence,
      pool = self.urls.len(),
      "keyserver pool refreshed from trusted peer list"
    );
    Ok(self.urls.len())
  }
}
