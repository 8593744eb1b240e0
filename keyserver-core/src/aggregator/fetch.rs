use crate::error::KeyserverError;
use crate::metadata::MetadataDocument;
use crate::types::short_error;
use anyhow::Context;
use reqwest::blocking::{Client, Response};
use reqwest::header::USER_AGENT;
use reqwest::redirect::Policy;
use reqwest::Url;
use std::io::Read;
use std::time::Duration;

const MAX_DOCUMENT_BYTES: usize = 1024 * 1024;
const MAX_ERROR_BODY_BYTES: usize = 4 * 1024;

pub trait MetadataFetcher: Send + Sync {
  fn fetch(&self, server: &str, address: &str) -> Result<MetadataDocument, KeyserverError>;
}

pub struct HttpFetcher {
  client: Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> anyhow::Result<Self> {
    if timeout.is_zero() {
      anyhow::bail!("request timeout must be > 0");
    }
    let client = Client::builder()
      .timeout(timeout)
      .redirect(Policy::none())
      .build()
      .context("build HTTP client")?;
    Ok(Self { client })
  }
}

impl MetadataFetcher for HttpFetcher {
  fn fetch(&self, server: &str, address: &str) -> Result<MetadataDocument, KeyserverError> {
    let url = keys_url(server, address)?;
    let response = self
      .client
      .get(url.clone())
      .header(USER_AGENT, format!("keyserver-core/{}", env!("CARGO_PKG_VERSION")))
      .send()
      .map_err(|e| KeyserverError::transport(format!("GET {}: {e}", safe_url_label(&url))))?;

    let status = response.status().as_u16();
    if status != 200 {
      let body = read_response_with_limit(response, MAX_ERROR_BODY_BYTES)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
      return Err(KeyserverError::Transport {
        status: Some(status),
        message: short_error(body.trim()),
      });
    }

    let body = read_response_with_limit(response, MAX_DOCUMENT_BYTES)?;
    MetadataDocument::from_bytes(&body)
  }
}

/// `{server}/keys/{address}`; the address is percent-encoded as one path segment.
pub fn keys_url(server: &str, address: &str) -> Result<Url, KeyserverError> {
  let mut url = Url::parse(server)
    .map_err(|e| KeyserverError::transport(format!("invalid keyserver URL {server}: {e}")))?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(KeyserverError::transport(format!(
      "keyserver URL must use http or https: {server}"
    )));
  }
  url
    .path_segments_mut()
    .map_err(|_| KeyserverError::transport(format!("keyserver URL cannot be a base: {server}")))?
    .pop_if_empty()
    .push("keys")
    .push(address);
  Ok(url)
}

fn read_response_with_limit(
  response: Response,
  max_bytes: usize,
) -> Result<Vec<u8>, KeyserverError> {
  let mut out = Vec::new();
  let mut limited = response.take((max_bytes.saturating_add(1)) as u64);
  limited
    .read_to_end(&mut out)
    .map_err(|e| KeyserverError::transport(format!("read response body: {e}")))?;

  if out.len() > max_bytes {
    return Err(KeyserverError::transport(format!(
      "response exceeds max size {max_bytes} bytes"
    )));
  }

  Ok(out)
}

fn safe_url_label(url: &Url) -> String {
  let host = url.host_str().unwrap_or("<no-host>");
  format!("{host}{}", url.path())
}
