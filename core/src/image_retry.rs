//! Retry bookkeeping for row images that may not be readable yet.
//!
//! A freshly uploaded image can 404 for a while after its user record
//! exists. Each failed load is retried with a cache-busting query parameter
//! after `RetryPolicy::delay`, up to `RetryPolicy::max_retries` times; after
//! that the row shows a placeholder until the table gets a new list.
//!
//! State is keyed by user id. `reset` drops all of it and bumps a
//! generation counter, so a retry loop started before a list refresh stops
//! instead of writing into the new rows.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 10;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1200);
pub const RETRY_PARAM: &str = "_retry";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Append `_retry={attempt}` to `url`, before any fragment.
pub fn cache_busted(url: &str, attempt: u32) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut busted = format!("{base}{separator}{RETRY_PARAM}={attempt}");
    if let Some(fragment) = fragment {
        busted.push('#');
        busted.push_str(fragment);
    }
    busted
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Load `url` again after `delay`.
    Retry {
        url: String,
        delay: Duration,
        attempt: u32,
    },
    /// Budget spent; show the placeholder.
    GiveUp,
}

/// What a row's image cell shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageCell {
    /// Load this URL (cache-busted once retries have started).
    Image(String),
    /// Retries exhausted.
    Placeholder,
    /// The user has no image.
    None,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RowState {
    retries: u32,
    failed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImageRetryTracker {
    policy: RetryPolicy,
    rows: HashMap<String, RowState>,
    row_ids: Vec<String>,
    generation: u64,
}

impl ImageRetryTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rows: HashMap::new(),
            row_ids: Vec::new(),
            generation: 0,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record a failed load of `url` for `user_id`.
    pub fn on_error(&mut self, user_id: &str, url: &str) -> RetryDecision {
        let row = self.rows.entry(user_id.to_string()).or_default();
        if row.failed {
            return RetryDecision::GiveUp;
        }
        if row.retries >= self.policy.max_retries {
            row.failed = true;
            warn!(user_id, retries = row.retries, "Image never became readable, giving up");
            return RetryDecision::GiveUp;
        }
        row.retries += 1;
        debug!(user_id, attempt = row.retries, "Scheduling image retry");
        RetryDecision::Retry {
            url: cache_busted(url, row.retries),
            delay: self.policy.delay,
            attempt: row.retries,
        }
    }

    /// A load finally succeeded; forget this row's bookkeeping.
    pub fn on_load(&mut self, user_id: &str) {
        self.rows.remove(user_id);
    }

    pub fn is_failed(&self, user_id: &str) -> bool {
        self.rows.get(user_id).is_some_and(|row| row.failed)
    }

    pub fn retries(&self, user_id: &str) -> u32 {
        self.rows.get(user_id).map_or(0, |row| row.retries)
    }

    /// URL the row should currently request.
    pub fn current_url(&self, user_id: &str, url: &str) -> String {
        match self.retries(user_id) {
            0 => url.to_string(),
            attempt => cache_busted(url, attempt),
        }
    }

    pub fn image_state(&self, user_id: &str, url: Option<&str>) -> ImageCell {
        match url {
            None | Some("") => ImageCell::None,
            Some(_) if self.is_failed(user_id) => ImageCell::Placeholder,
            Some(url) => ImageCell::Image(self.current_url(user_id, url)),
        }
    }

    /// Reset everything if the ordered set of row ids differs from the last
    /// call. Returns whether a reset happened.
    pub fn sync_rows<'a, I>(&mut self, ids: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ids: Vec<String> = ids.into_iter().map(str::to_string).collect();
        if ids == self.row_ids {
            return false;
        }
        self.reset();
        self.row_ids = ids;
        true
    }

    /// Forget every row; called whenever the table receives a new list.
    pub fn reset(&mut self) {
        self.rows.clear();
        self.generation += 1;
    }
}

/// Checks whether an image URL is readable.
#[async_trait]
pub trait ImageProbe: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// Probe that issues a GET and accepts any 2xx.
#[derive(Debug, Clone, Default)]
pub struct HttpImageProbe {
    http: Client,
}

impl HttpImageProbe {
    pub fn new(http: Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl ImageProbe for HttpImageProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(url, error = %e, "Image request failed");
                false
            }
        }
    }
}

/// Outcome of driving one row's image to a final state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageLoadOutcome {
    /// The image loaded from this URL.
    Loaded(String),
    /// Retries exhausted; the row shows a placeholder.
    Placeholder,
    /// The table was refreshed meanwhile; the result was discarded.
    Superseded,
}

fn lock(tracker: &Mutex<ImageRetryTracker>) -> MutexGuard<'_, ImageRetryTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Load `url` for `user_id`, retrying per the tracker's policy.
pub async fn load_image_with_retry(
    probe: &dyn ImageProbe,
    tracker: &Mutex<ImageRetryTracker>,
    user_id: &str,
    url: &str,
) -> ImageLoadOutcome {
    let generation = lock(tracker).generation();
    let mut current = lock(tracker).current_url(user_id, url);
    loop {
        let loaded = probe.probe(&current).await;
        let decision = {
            let mut tracker = lock(tracker);
            if tracker.generation() != generation {
                return ImageLoadOutcome::Superseded;
            }
            if loaded {
                tracker.on_load(user_id);
                return ImageLoadOutcome::Loaded(current);
            }
            tracker.on_error(user_id, url)
        };
        match decision {
            RetryDecision::Retry { url, delay, .. } => {
                tokio::time::sleep(delay).await;
                current = url;
            }
            RetryDecision::GiveUp => return ImageLoadOutcome::Placeholder,
        }
    }
}
