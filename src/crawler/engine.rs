//! Crawl engine: walks the category tree, paginates listings, and
//! harvests every product detail page
//!
//! Listing pages are walked sequentially per category; detail pages are
//! fetched concurrently up to the configured limit, with the fetcher's
//! politeness gate spacing actual dispatches. Progress checkpoints are
//! written as the crawl advances and cleared only after a run with no
//! failures, so an interrupted or partially failed run resumes where it
//! left off.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use url::Url;

use crate::changes::ChangeDetector;
use crate::config::Config;
use crate::crawler::extract::{
    extract_categories, extract_item_links, extract_record, next_page_url,
};
use crate::crawler::fetcher::Fetcher;
use crate::model::{CatalogRecord, RunStats};
use crate::store::{Repository, SharedStore};
use crate::{Result, ShelfError};

/// Checkpoint kind for the listing page the crawl last advanced past
pub const CHECKPOINT_PAGE: &str = "page";
/// Checkpoint kind for the category being crawled
pub const CHECKPOINT_CATEGORY: &str = "category";

pub struct CrawlEngine {
    config: Arc<Config>,
    fetcher: Fetcher,
    store: SharedStore,
    detector: ChangeDetector,
    semaphore: Arc<Semaphore>,
    seen: Mutex<HashSet<String>>,
    failed: Mutex<HashSet<String>>,
    processed: AtomicU64,
}

impl CrawlEngine {
    pub fn new(config: Arc<Config>, store: SharedStore, detector: ChangeDetector) -> Result<Self> {
        let fetcher = Fetcher::new(&config.crawler, &config.site.user_agent)?;
        let semaphore = Arc::new(Semaphore::new(config.crawler.max_concurrent_fetches as usize));
        Ok(Self {
            config,
            fetcher,
            store,
            detector,
            semaphore,
            seen: Mutex::new(HashSet::new()),
            failed: Mutex::new(HashSet::new()),
            processed: AtomicU64::new(0),
        })
    }

    /// Runs one full crawl over the catalog
    ///
    /// With `resume` set, records already in the store are not refetched
    /// and the walk restarts from the persisted checkpoints.
    pub async fn run(self: Arc<Self>, resume: bool) -> Result<RunStats> {
        let started = Instant::now();
        let base_url = Url::parse(&self.config.site.base_url)?;

        let (category_checkpoint, page_checkpoint) = if resume {
            let store = self.store.lock().unwrap();
            let urls = store.record_urls()?;
            self.seen.lock().unwrap().extend(urls);
            (
                store.get_checkpoint(CHECKPOINT_CATEGORY)?.map(|c| c.value),
                store.get_checkpoint(CHECKPOINT_PAGE)?.map(|c| c.value),
            )
        } else {
            (None, None)
        };

        // The index page is the one fetch the whole run depends on
        let index = self.fetcher.fetch(base_url.as_str()).await?;
        let index_url = Url::parse(&index.final_url)?;
        let categories = extract_categories(&index.body, &index_url);
        if categories.is_empty() {
            return Err(ShelfError::Crawl(format!(
                "no categories found at {base_url}"
            )));
        }

        let start = start_index(&categories, category_checkpoint.as_deref());
        if start > 0 {
            info!(
                category = %categories[start].0,
                skipped = start,
                "resuming from checkpointed category"
            );
        }

        let mut categories_processed = 0u64;
        for (i, (name, url)) in categories.iter().enumerate().skip(start) {
            self.store
                .lock()
                .unwrap()
                .set_checkpoint(CHECKPOINT_CATEGORY, name)?;

            // The page checkpoint only applies inside the category it was
            // written in
            let first_page = match (&page_checkpoint, i == start && category_checkpoint.is_some()) {
                (Some(page), true) => Url::parse(page)?,
                _ => url.clone(),
            };

            Arc::clone(&self).crawl_category(name, first_page).await?;
            categories_processed += 1;
        }

        let total_items = self.processed.load(Ordering::Relaxed);
        let failed = self.failed.lock().unwrap().len() as u64;
        let stats = RunStats {
            total_items,
            failed,
            categories_processed,
            duration: started.elapsed(),
        };

        if stats.successful() {
            self.store.lock().unwrap().clear_checkpoints()?;
            info!(
                total_items,
                categories = categories_processed,
                duration_secs = stats.duration.as_secs_f64(),
                "crawl completed, checkpoints cleared"
            );
        } else {
            warn!(
                total_items,
                failed, "crawl completed with failures, checkpoints retained"
            );
        }

        Ok(stats)
    }

    /// Walks a category's listing pages, harvesting items page by page
    async fn crawl_category(self: Arc<Self>, category: &str, first_page: Url) -> Result<()> {
        let mut page_url = Some(first_page);

        while let Some(url) = page_url {
            let listing = match self.fetcher.fetch(url.as_str()).await {
                Ok(listing) => listing,
                Err(e) => {
                    error!(category, url = %url, error = %e, "listing page failed");
                    self.failed.lock().unwrap().insert(url.to_string());
                    return Ok(());
                }
            };

            let listing_url = Url::parse(&listing.final_url)?;
            let links = extract_item_links(&listing.body, &listing_url);

            let mut handles: Vec<JoinHandle<()>> = Vec::new();
            for link in links {
                let is_new = self.seen.lock().unwrap().insert(link.to_string());
                if !is_new {
                    continue;
                }
                let engine = Arc::clone(&self);
                let category = category.to_string();
                let listing_url = listing_url.clone();
                handles.push(tokio::spawn(async move {
                    engine.crawl_item(link, category, listing_url).await;
                }));
            }
            for handle in handles {
                // Item tasks never panic in normal operation; a join error
                // still only costs this one item
                if let Err(e) = handle.await {
                    error!(error = %e, "item task panicked");
                }
            }

            page_url = next_page_url(&listing.body, &listing_url);
        }

        Ok(())
    }

    /// Fetches, extracts, and upserts one product detail page
    async fn crawl_item(&self, url: Url, category: String, listing_page: Url) {
        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let response = match self.fetcher.fetch(url.as_str()).await {
            Ok(response) => response,
            Err(e) => {
                warn!(url = %url, error = %e, "item fetch failed");
                self.failed.lock().unwrap().insert(url.to_string());
                return;
            }
        };

        let mut record = match extract_record(&response.body, &url) {
            Ok(record) => record,
            Err(e) => {
                warn!(url = %url, error = %e, "item extraction failed");
                self.failed.lock().unwrap().insert(url.to_string());
                return;
            }
        };

        // Crawl context wins over what the markup claims
        record.category = Some(category);
        record.http_status = Some(response.status);
        record.response_time_secs = Some(response.response_time.as_secs_f64());

        if let Err(e) = self.persist(&record, response.body.as_bytes(), &listing_page) {
            error!(url = %url, error = %e, "failed to persist record");
            self.failed.lock().unwrap().insert(url.to_string());
        }
    }

    fn persist(
        &self,
        record: &CatalogRecord,
        snapshot: &[u8],
        listing_page: &Url,
    ) -> Result<()> {
        let (id, diff) = self
            .store
            .lock()
            .unwrap()
            .upsert(record, Some(snapshot))?;

        if let Some(diff) = diff {
            self.detector.detect_and_record(id, record, &diff)?;
        }

        let processed = self.processed.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % self.config.crawler.checkpoint_interval as u64 == 0 {
            self.store
                .lock()
                .unwrap()
                .set_checkpoint(CHECKPOINT_PAGE, listing_page.as_str())?;
        }
        Ok(())
    }
}

/// Position to resume the category walk from
fn start_index(categories: &[(String, Url)], checkpoint: Option<&str>) -> usize {
    checkpoint
        .and_then(|name| categories.iter().position(|(n, _)| n == name))
        .unwrap_or(0)
}
