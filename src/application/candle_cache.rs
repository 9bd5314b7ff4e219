use crate::domain::candle::{Candle, Interval};
use crate::domain::errors::ExchangeError;
use crate::domain::frame::FrameWindow;
use crate::domain::ports::ExchangeAdapter;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Candles per cached page. Pages are interval-aligned so a backtest frame
/// prefetch maps to a predictable set of adapter calls.
const PAGE_CANDLES: i64 = 500;

const RETRY_BASE_DELAY_MS: u64 = 500;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PageKey {
    symbol: String,
    interval: Interval,
    bucket_start: i64,
}

struct PageRecord {
    candles: Vec<Candle>,
    last_access: AtomicU64,
}

/// Memoizes candle fetches by (symbol, interval, bucket) and synthesizes
/// coarser candles from finer cached history. Never over-fetches: synthesis
/// reads only what is already cached.
///
/// Concurrent readers are permitted; page insertion serializes on the map
/// write lock. Eviction is LRU with a soft cap, skipping pages that still
/// overlap the replay horizon.
pub struct CandleCache {
    adapter: Arc<dyn ExchangeAdapter>,
    max_retries: u32,
    max_pages: usize,
    pages: RwLock<HashMap<PageKey, Arc<PageRecord>>>,
    access_seq: AtomicU64,
    horizon_start: AtomicI64,
}

impl CandleCache {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, max_retries: u32, max_pages: usize) -> Self {
        Self {
            adapter,
            max_retries,
            max_pages,
            pages: RwLock::new(HashMap::new()),
            access_seq: AtomicU64::new(0),
            horizon_start: AtomicI64::new(i64::MAX),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.adapter
    }

    /// Pages whose candles end before this point become evictable.
    pub fn set_replay_horizon(&self, start_time: i64) {
        self.horizon_start.store(start_time, Ordering::SeqCst);
    }

    fn page_span(interval: Interval) -> i64 {
        interval.as_millis() * PAGE_CANDLES
    }

    fn bucket_start(interval: Interval, timestamp: i64) -> i64 {
        let span = Self::page_span(interval);
        timestamp - timestamp.rem_euclid(span)
    }

    fn touch(&self, record: &PageRecord) {
        let seq = self.access_seq.fetch_add(1, Ordering::SeqCst) + 1;
        record.last_access.store(seq, Ordering::SeqCst);
    }

    /// Up to `limit` candles ending at `ending_at` (inclusive), served from
    /// cached pages, fetching missing pages on demand. `ending_at: None`
    /// bypasses the cache and asks the adapter for the latest candles.
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        ending_at: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let Some(ending_at) = ending_at else {
            return self
                .fetch_with_retry(symbol, interval, limit, None)
                .await;
        };

        let span = Self::page_span(interval);
        let mut bucket = Self::bucket_start(interval, ending_at);
        let mut collected: Vec<Candle> = Vec::new();

        while collected.len() < limit {
            let page = self.page(symbol, interval, bucket).await?;
            if page.candles.is_empty() {
                break;
            }
            let mut chunk: Vec<Candle> = page
                .candles
                .iter()
                .filter(|c| c.open_time <= ending_at)
                .cloned()
                .collect();
            chunk.extend(collected);
            collected = chunk;
            // A short page marks the start of the symbol's history.
            if page.candles.len() < PAGE_CANDLES as usize
                && page.candles.first().map(|c| c.open_time) != Some(bucket)
            {
                break;
            }
            if bucket < span {
                break;
            }
            bucket -= span;
        }

        let skip = collected.len().saturating_sub(limit);
        Ok(collected.split_off(skip))
    }

    /// All candles of a backtest frame, prefetched page by page.
    pub async fn frame_candles(
        &self,
        symbol: &str,
        frame: &FrameWindow,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.prefetch_frame(symbol, frame).await?;

        let span = Self::page_span(frame.interval);
        let mut out = Vec::with_capacity(frame.candle_count());
        let mut bucket = Self::bucket_start(frame.interval, frame.start_time);
        while bucket < frame.end_time {
            let page = self.page(symbol, frame.interval, bucket).await?;
            out.extend(
                page.candles
                    .iter()
                    .filter(|c| c.open_time >= frame.start_time && c.open_time < frame.end_time)
                    .cloned(),
            );
            bucket += span;
        }
        Ok(out)
    }

    /// Warm the cache with every page the frame window touches.
    pub async fn prefetch_frame(
        &self,
        symbol: &str,
        frame: &FrameWindow,
    ) -> Result<(), ExchangeError> {
        self.set_replay_horizon(frame.start_time);
        let span = Self::page_span(frame.interval);
        let mut bucket = Self::bucket_start(frame.interval, frame.start_time);
        let mut fetched = 0usize;
        while bucket < frame.end_time {
            self.page(symbol, frame.interval, bucket).await?;
            fetched += 1;
            bucket += span;
        }
        debug!(
            "CandleCache [{}]: prefetched {} page(s) for frame {}..{}",
            symbol, fetched, frame.start_time, frame.end_time
        );
        Ok(())
    }

    /// Synthesize the `interval` candle containing `instant` from finer
    /// cached history. Returns `None` unless a finer interval fully covers
    /// the period up to `instant` in cache; no fetch is ever issued.
    pub async fn synthesize(
        &self,
        symbol: &str,
        interval: Interval,
        instant: i64,
    ) -> Option<Candle> {
        let period_start = interval.period_start(instant);
        let pages = self.pages.read().await;

        for finer in interval.finer() {
            let step = finer.as_millis();
            let mut parts: Vec<Candle> = Vec::new();
            let mut cursor = period_start;
            let mut complete = true;
            while cursor <= instant && cursor < period_start + interval.as_millis() {
                let key = PageKey {
                    symbol: symbol.to_string(),
                    interval: finer,
                    bucket_start: Self::bucket_start(finer, cursor),
                };
                let Some(record) = pages.get(&key) else {
                    complete = false;
                    break;
                };
                self.touch(record);
                match record.candles.iter().find(|c| c.open_time == cursor) {
                    Some(c) => parts.push(c.clone()),
                    None => {
                        complete = false;
                        break;
                    }
                }
                cursor += step;
            }
            if complete && !parts.is_empty() {
                return Some(Candle {
                    open_time: period_start,
                    open: parts.first().map(|c| c.open).unwrap_or(Decimal::ZERO),
                    high: parts.iter().map(|c| c.high).max().unwrap_or(Decimal::ZERO),
                    low: parts.iter().map(|c| c.low).min().unwrap_or(Decimal::ZERO),
                    close: parts.last().map(|c| c.close).unwrap_or(Decimal::ZERO),
                    volume: parts.iter().map(|c| c.volume).sum(),
                });
            }
        }
        None
    }

    async fn page(
        &self,
        symbol: &str,
        interval: Interval,
        bucket_start: i64,
    ) -> Result<Arc<PageRecord>, ExchangeError> {
        let key = PageKey {
            symbol: symbol.to_string(),
            interval,
            bucket_start,
        };

        {
            let pages = self.pages.read().await;
            if let Some(record) = pages.get(&key) {
                self.touch(record);
                return Ok(Arc::clone(record));
            }
        }

        let span = Self::page_span(interval);
        let last_open = bucket_start + span - interval.as_millis();
        let fetched = self
            .fetch_with_retry(symbol, interval, PAGE_CANDLES as usize, Some(last_open))
            .await?;
        let candles: Vec<Candle> = fetched
            .into_iter()
            .filter(|c| c.open_time >= bucket_start && c.open_time < bucket_start + span)
            .collect();

        let record = Arc::new(PageRecord {
            candles,
            last_access: AtomicU64::new(self.access_seq.fetch_add(1, Ordering::SeqCst) + 1),
        });

        let mut pages = self.pages.write().await;
        let entry = pages.entry(key).or_insert_with(|| Arc::clone(&record));
        let result = Arc::clone(entry);
        self.evict_locked(&mut pages);
        Ok(result)
    }

    fn evict_locked(&self, pages: &mut HashMap<PageKey, Arc<PageRecord>>) {
        let horizon = self.horizon_start.load(Ordering::SeqCst);
        while pages.len() > self.max_pages {
            let candidate = pages
                .iter()
                .filter(|(key, _)| key.bucket_start + Self::page_span(key.interval) <= horizon)
                .min_by_key(|(_, record)| record.last_access.load(Ordering::SeqCst))
                .map(|(key, _)| key.clone());
            match candidate {
                Some(key) => {
                    pages.remove(&key);
                    debug!(
                        "CandleCache [{}]: evicted page {} {}",
                        key.symbol, key.interval, key.bucket_start
                    );
                }
                // Every remaining page is inside the replay horizon; the
                // cap is soft, so stop here.
                None => break,
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
        ending_at: Option<i64>,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut attempt = 0u32;
        loop {
            match self
                .adapter
                .get_candles(symbol, interval, limit, ending_at)
                .await
            {
                Ok(candles) => return Ok(candles),
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    let delay = RETRY_BASE_DELAY_MS * 2u64.pow(attempt.min(6));
                    warn!(
                        "CandleCache [{}]: fetch failed ({}), retry {}/{} in {}ms",
                        symbol,
                        e,
                        attempt + 1,
                        self.max_retries,
                        delay
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
