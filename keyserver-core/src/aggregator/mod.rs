use crate::error::KeyserverError;
use crate::metadata::{validate_document, MetadataDocument};
use crate::types::SourceError;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub mod fetch;
pub mod pool;

pub use fetch::{HttpFetcher, MetadataFetcher};
pub use pool::Keyservers;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
  pub source: String,
  pub document: MetadataDocument,
  pub confidence: f64,
}

#[derive(Debug, Default)]
pub struct Aggregation {
  pub result: Option<AggregateResult>,
  pub errors: Vec<SourceError>,
}

pub fn aggregate(
  fetcher: Arc<dyn MetadataFetcher>,
  pool: &[String],
  address: &str,
  sample_size: usize,
  call_timeout: Duration,
) -> Result<Aggregation, KeyserverError> {
  aggregate_with_rng(fetcher, pool, address, sample_size, call_timeout, &mut rand::thread_rng())
}

pub fn aggregate_with_rng<R: Rng + ?Sized>(
  fetcher: Arc<dyn MetadataFetcher>,
  pool: &[String],
  address: &str,
  sample_size: usize,
  call_timeout: Duration,
  rng: &mut R,
) -> Result<Aggregation, KeyserverError> {
  if pool.is_empty() {
    return Err(KeyserverError::EmptyServerPool);
  }

  let sample = sample_servers(pool, sample_size, rng);
  tracing::debug!(
    address,
    pool = pool.len(),
    sampled = sample.len(),
    "aggregating keyserver metadata"
  );

  let fetched = fetch_all(fetcher, &sample, address, call_timeout);

  let mut reconciler = Reconciler::new(address);
  for (server, outcome) in sample.iter().zip(fetched) {
    reconciler.observe(server, outcome);
  }
  let out = reconciler.finish(pool.len());

  for (server, err) in &out.errors {
    tracing::warn!(server = %server, error = %err, "keyserver sample rejected");
  }
  match &out.result {
    Some(r) => tracing::info!(
      address,
      source = %r.source,
      confidence = r.confidence,
      errors = out.errors.len(),
      "keyserver aggregation complete"
    ),
    None => tracing::warn!(
      address,
      errors = out.errors.len(),
      "no keyserver returned usable metadata"
    ),
  }

  Ok(out)
}

pub fn sample_servers<R: Rng + ?Sized>(
  pool: &[String],
  sample_size: usize,
  rng: &mut R,
) -> Vec<String> {
  let n = sample_size.min(pool.len());
  pool.choose_multiple(rng, n).cloned().collect()
}

/// Runs one fetch per server concurrently. Results come back in the order of
/// `servers`; anything still outstanding at the deadline becomes a timeout.
fn fetch_all(
  fetcher: Arc<dyn MetadataFetcher>,
  servers: &[String],
  address: &str,
  call_timeout: Duration,
) -> Vec<Result<MetadataDocument, KeyserverError>> {
  let (tx, rx) = mpsc::channel();

  for (idx, server) in servers.iter().enumerate() {
    let thread_tx = tx.clone();
    let fetcher = Arc::clone(&fetcher);
    let server = server.clone();
    let address = address.to_string();
    let spawned = std::thread::Builder::new()
      .name(format!("ks-fetch-{idx}"))
      .spawn(move || {
        let outcome = fetcher.fetch(&server, &address);
        // Receiver is gone once the deadline passed.
        let _ = thread_tx.send((idx, outcome));
      });
    if let Err(e) = spawned {
      let err = KeyserverError::transport(format!("spawn fetch thread: {e}"));
      let _ = tx.send((idx, Err(err)));
    }
  }
  drop(tx);

  let mut slots: Vec<Option<Result<MetadataDocument, KeyserverError>>> =
    servers.iter().map(|_| None).collect();
  let deadline = Instant::now() + call_timeout;
  let mut pending = servers.len();

  while pending > 0 {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(remaining) {
      Ok((idx, outcome)) => {
        slots[idx] = Some(outcome);
        pending -= 1;
      }
      Err(_) => break,
    }
  }

  slots
    .into_iter()
    .map(|slot| {
      slot.unwrap_or_else(|| {
        Err(KeyserverError::transport(format!(
          "timed out after {}s",
          call_timeout.as_secs_f64()
        )))
      })
    })
    .collect()
}

#[derive(Debug)]
struct Best {
  source: String,
  document: MetadataDocument,
  matches: u64,
}

// Confidence counts later samples repeating the best document byte for byte,
// over the whole pool size. Any disagreement replaces the best and resets it.
#[derive(Debug)]
pub struct Reconciler {
  address: String,
  best: Option<Best>,
  errors: Vec<SourceError>,
}

impl Reconciler {
  pub fn new(address: &str) -> Self {
    Self {
      address: address.to_string(),
      best: None,
      errors: Vec::new(),
    }
  }

  pub fn observe(&mut self, server: &str, fetched: Result<MetadataDocument, KeyserverError>) {
    if let Err(e) = fetched.and_then(|doc| self.accept(server, doc)) {
      self.errors.push((server.to_string(), e));
    }
  }

  fn accept(&mut self, server: &str, doc: MetadataDocument) -> Result<(), KeyserverError> {
    if let Some(best) = &self.best {
      if doc.timestamp() < best.document.timestamp() {
        return Err(KeyserverError::StaleDocument {
          timestamp: doc.timestamp(),
          best: best.document.timestamp(),
        });
      }
    }

    validate_document(&self.address, &doc)?;

    match &mut self.best {
      None => {
        self.best = Some(Best {
          source: server.to_string(),
          document: doc,
          matches: 0,
        });
      }
      Some(best) if best.document == doc => {
        // A refreshed copy of the same claim is not independent agreement.
        if doc.timestamp() > best.document.timestamp() {
          best.source = server.to_string();
          best.document = doc;
          best.matches = 0;
        } else {
          best.matches += 1;
        }
      }
      Some(best) => {
        tracing::debug!(
          previous = %best.source,
          replacement = %server,
          "keyserver answers diverge; replacing best candidate"
        );
        *best = Best {
          source: server.to_string(),
          document: doc,
          matches: 0,
        };
      }
    }
    Ok(())
  }

  pub fn finish(self, pool_size: usize) -> Aggregation {
    let result = self.best.map(|best| AggregateResult {
      source: best.source,
      document: best.document,
      confidence: if pool_size == 0 {
        0.0
      } else {
        (best.matches as f64 / pool_size as f64).min(1.0)
      },
    });
    Aggregation {
      result,
      errors: self.errors,
    }
  }
}
