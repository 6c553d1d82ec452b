//! Feed polling ingestion
//!
//! Polls RSS 2.0 and Atom feeds on an interval and forwards the download link
//! of every item not seen before. Seen item identifiers are persisted
//! immediately under the `feed-history` key, newest last, capped in size.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mg_core::store::{PersistentStore, FEED_HISTORY_KEY};

use super::IngestError;

/// Number of seen item identifiers kept
pub const HISTORY_CAP: usize = 1000;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One feed entry worth forwarding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    /// Stable identifier used for de-duplication
    pub key: String,
    /// Source handed to the orchestrator
    pub link: String,
}

// RSS 2.0

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    guid: Option<Guid>,
    #[serde(default)]
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
}

// Atom

#[derive(Debug, Deserialize)]
struct Atom {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

/// Parse an RSS or Atom document into forwardable items.
///
/// For RSS the enclosure URL is preferred over the item link; for Atom the
/// `enclosure` link is preferred over the first link.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, IngestError> {
    if let Ok(rss) = quick_xml::de::from_str::<Rss>(xml) {
        return Ok(rss
            .channel
            .items
            .into_iter()
            .filter_map(|item| {
                let link = item
                    .enclosure
                    .map(|e| e.url)
                    .or(item.link)
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())?;
                let key = item
                    .guid
                    .map(|g| g.value.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .unwrap_or_else(|| link.clone());
                Some(FeedItem { key, link })
            })
            .collect());
    }

    let atom: Atom =
        quick_xml::de::from_str(xml).map_err(|e| IngestError::Parse(e.to_string()))?;
    Ok(atom
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("enclosure"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.trim().to_string())
                .filter(|l| !l.is_empty())?;
            let key = entry
                .id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| link.clone());
            Some(FeedItem { key, link })
        })
        .collect())
}

/// Seen item identifiers, oldest first
#[derive(Debug, Default)]
pub struct FeedHistory {
    order: Vec<String>,
    seen: HashSet<String>,
}

impl FeedHistory {
    pub fn from_keys(keys: Vec<String>) -> Self {
        let seen = keys.iter().cloned().collect();
        Self { order: keys, seen }
    }

    /// Record `key`, returning whether it was new
    pub fn insert(&mut self, key: &str) -> bool {
        if !self.seen.insert(key.to_string()) {
            return false;
        }
        self.order.push(key.to_string());
        if self.order.len() > HISTORY_CAP {
            let excess = self.order.len() - HISTORY_CAP;
            for old in self.order.drain(..excess) {
                self.seen.remove(&old);
            }
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn keys(&self) -> &[String] {
        &self.order
    }
}

/// Background task polling a fixed set of feeds
pub struct FeedPoller {
    urls: Vec<String>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl FeedPoller {
    /// Poll immediately, then every `interval`. Must be called from within a
    /// tokio runtime.
    pub fn start(
        urls: Vec<String>,
        interval: Duration,
        store: PersistentStore,
        candidates: mpsc::UnboundedSender<String>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = PollTask {
            urls: urls.clone(),
            store,
            candidates,
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .unwrap_or_default(),
        };

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => task.poll_all().await,
                }
            }
            tracing::debug!("Feed poller stopped");
        });

        tracing::info!("Polling {} feeds every {:?}", urls.len(), interval);
        Self {
            urls,
            cancel,
            handle,
        }
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Stop polling and wait for an in-flight poll to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Feed poller task failed: {}", e);
        }
    }
}

struct PollTask {
    urls: Vec<String>,
    store: PersistentStore,
    candidates: mpsc::UnboundedSender<String>,
    client: reqwest::Client,
}

impl PollTask {
    async fn poll_all(&self) {
        let mut history =
            FeedHistory::from_keys(self.store.load(FEED_HISTORY_KEY, Vec::<String>::new()));
        let mut forwarded = 0;

        for url in &self.urls {
            match self.fetch(url).await {
                Ok(items) => {
                    for item in items {
                        if history.insert(&item.key) {
                            tracing::debug!("Feed candidate {} from {}", item.link, url);
                            if self.candidates.send(item.link).is_ok() {
                                forwarded += 1;
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!("Feed {} failed: {}", url, e),
            }
        }

        if forwarded > 0 {
            self.store.save_now(FEED_HISTORY_KEY, history.keys()).await;
            tracing::info!("Feeds produced {} new items", forwarded);
        }
    }

    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>, IngestError> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        parse_feed(&body)
    }
}
