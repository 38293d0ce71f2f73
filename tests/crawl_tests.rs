//! Integration tests for the crawl engine
//!
//! These tests run the full harvest cycle against a wiremock catalog:
//! index sidebar, paginated category listings, and product detail pages.

use std::sync::Arc;

use chrono::Utc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shelfwatch::changes::{ChangeDetector, ReportBuilder};
use shelfwatch::config::{
    ChangesConfig, Config, CrawlerConfig, NotifyConfig, ScheduleConfig, SiteConfig, StorageConfig,
};
use shelfwatch::crawler::{CrawlEngine, CHECKPOINT_CATEGORY, CHECKPOINT_PAGE};
use shelfwatch::model::{CatalogRecord, RecordStatus, TrackedField};
use shelfwatch::notify::Notifier;
use shelfwatch::store::{shared, Repository, SharedStore, SqliteStore};

struct TestHarness {
    config: Arc<Config>,
    store: SharedStore,
    notifier: Notifier,
    _dir: tempfile::TempDir,
}

impl TestHarness {
    fn new(base_url: &str) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(Config {
            site: SiteConfig {
                base_url: format!("{base_url}/"),
                user_agent: "shelfwatch-test/0.1".to_string(),
            },
            crawler: CrawlerConfig {
                max_concurrent_fetches: 5,
                request_timeout_secs: 5,
                retry_attempts: 3,
                min_request_interval_ms: 10,
                checkpoint_interval: 2,
            },
            storage: StorageConfig {
                database_path: dir.path().join("test.db").display().to_string(),
                reports_dir: dir.path().join("reports").display().to_string(),
            },
            changes: ChangesConfig::default(),
            schedule: ScheduleConfig::default(),
            notify: NotifyConfig::default(),
        });

        let store = SqliteStore::new(dir.path().join("test.db").as_path()).expect("open store");
        let store = shared(store);
        let notifier = Notifier::new(&config.notify);

        Self {
            config,
            store,
            notifier,
            _dir: dir,
        }
    }

    fn engine(&self) -> Arc<CrawlEngine> {
        let detector = ChangeDetector::new(
            self.store.clone(),
            self.notifier.clone(),
            self.config.changes.price_change_threshold,
        );
        Arc::new(
            CrawlEngine::new(Arc::clone(&self.config), self.store.clone(), detector)
                .expect("create engine"),
        )
    }
}

fn index_html() -> String {
    r#"<html><body><div class="side_categories"><ul class="nav nav-list">
    <li><a href="cat/books/index.html">Books</a><ul>
      <li><a href="cat/poetry/index.html"> Poetry </a></li>
      <li><a href="cat/travel/index.html"> Travel </a></li>
    </ul></li></ul></div></body></html>"#
        .to_string()
}

fn listing_html(items: &[&str], next: Option<&str>) -> String {
    let mut body = String::new();
    for item in items {
        body.push_str(&format!(
            r#"<article class="product_pod"><h3><a href="../../item/{item}.html">{item}</a></h3></article>"#
        ));
    }
    if let Some(next) = next {
        body.push_str(&format!(
            r#"<ul class="pager"><li class="next"><a href="{next}">next</a></li></ul>"#
        ));
    }
    format!("<html><body>{body}</body></html>")
}

fn detail_html(title: &str, price: f64) -> String {
    format!(
        r#"<html><body>
<ul class="breadcrumb">
  <li><a href="/">Home</a></li>
  <li><a href="/cat/books/index.html">Books</a></li>
  <li><a href="/cat/poetry/index.html">Poetry</a></li>
</ul>
<article class="product_page">
  <div class="item active"><img src="/media/{title}.jpg"/></div>
  <div class="product_main"><h1>{title}</h1><p class="star-rating Four"></p></div>
  <div id="product_description"><h2>Product Description</h2></div>
  <p>Description of {title}.</p>
  <table class="table table-striped">
    <tr><th>Price (excl. tax)</th><td>£{price:.2}</td></tr>
    <tr><th>Price (incl. tax)</th><td>£{price:.2}</td></tr>
    <tr><th>Availability</th><td>In stock (9 available)</td></tr>
    <tr><th>Number of reviews</th><td>2</td></tr>
  </table>
</article>
</body></html>"#
    )
}

async fn mount_html(server: &MockServer, url_path: &str, body: String) {
    Mock::given(method("GET"))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts the standard two-category, six-item catalog
async fn mount_catalog(server: &MockServer, price: f64) {
    mount_html(server, "/", index_html()).await;
    mount_html(
        server,
        "/cat/poetry/index.html",
        listing_html(&["p1", "p2"], Some("page-2.html")),
    )
    .await;
    mount_html(server, "/cat/poetry/page-2.html", listing_html(&["p3"], None)).await;
    mount_html(
        server,
        "/cat/travel/index.html",
        listing_html(&["t1", "t2", "t3"], None),
    )
    .await;
    for item in ["p1", "p2", "p3", "t1", "t2", "t3"] {
        mount_html(server, &format!("/item/{item}.html"), detail_html(item, price)).await;
    }
}

#[tokio::test]
async fn test_full_scan_harvests_all_items() {
    let server = MockServer::start().await;
    mount_catalog(&server, 50.0).await;

    let harness = TestHarness::new(&server.uri());
    let stats = harness.engine().run(false).await.expect("crawl failed");

    assert_eq!(stats.total_items, 6);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.categories_processed, 2);

    let store = harness.store.lock().unwrap();
    assert_eq!(store.count_records().unwrap(), 6);

    let record = store
        .get_by_url(&format!("{}/item/p1.html", server.uri()))
        .unwrap()
        .expect("p1 stored");
    assert_eq!(record.record.title, "p1");
    // Crawl context wins over the breadcrumb
    assert_eq!(record.record.category.as_deref(), Some("Poetry"));
    assert_eq!(record.record.price_incl_tax, Some(50.0));
    assert_eq!(record.record.rating, Some(4));
    assert_eq!(record.record.status, RecordStatus::Success);
    assert!(record.record.snapshot_ref.is_some());

    // A fully successful run clears its checkpoints
    assert!(store.get_checkpoint(CHECKPOINT_PAGE).unwrap().is_none());
    assert!(store.get_checkpoint(CHECKPOINT_CATEGORY).unwrap().is_none());
}

#[tokio::test]
async fn test_item_in_two_categories_fetched_once() {
    let server = MockServer::start().await;
    mount_html(&server, "/", index_html()).await;

    // The same item is linked from both category listings
    mount_html(
        &server,
        "/cat/poetry/index.html",
        listing_html(&["shared"], None),
    )
    .await;
    mount_html(
        &server,
        "/cat/travel/index.html",
        listing_html(&["shared"], None),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/item/shared.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("shared", 50.0)))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new(&server.uri());
    let stats = harness.engine().run(false).await.expect("crawl failed");

    assert_eq!(stats.total_items, 1);
    assert_eq!(stats.categories_processed, 2);
    let store = harness.store.lock().unwrap();
    assert_eq!(store.count_records().unwrap(), 1);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = MockServer::start().await;
    mount_html(&server, "/", index_html()).await;
    mount_html(
        &server,
        "/cat/poetry/index.html",
        listing_html(&["p1"], None),
    )
    .await;
    mount_html(&server, "/cat/travel/index.html", listing_html(&[], None)).await;

    // First hit fails with a 500, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/item/p1.html"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_html(&server, "/item/p1.html", detail_html("p1", 50.0)).await;

    let harness = TestHarness::new(&server.uri());
    let stats = harness.engine().run(false).await.expect("crawl failed");

    assert_eq!(stats.total_items, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_retry_budget_and_client_errors() {
    let server = MockServer::start().await;
    mount_html(&server, "/", index_html()).await;
    mount_html(
        &server,
        "/cat/poetry/index.html",
        listing_html(&["p1", "p2"], None),
    )
    .await;
    mount_html(&server, "/cat/travel/index.html", listing_html(&[], None)).await;

    // Persistent 503: exactly retry_attempts requests, then give up
    Mock::given(method("GET"))
        .and(path("/item/p1.html"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    // 404 is permanent: exactly one request
    Mock::given(method("GET"))
        .and(path("/item/p2.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::new(&server.uri());
    let stats = harness.engine().run(false).await.expect("crawl failed");

    assert_eq!(stats.total_items, 0);
    assert_eq!(stats.failed, 2);

    // Failed run keeps its checkpoints for resumption
    let store = harness.store.lock().unwrap();
    assert!(store.get_checkpoint(CHECKPOINT_CATEGORY).unwrap().is_some());
}

#[tokio::test]
async fn test_repeat_scan_produces_no_changes() {
    let server = MockServer::start().await;
    mount_catalog(&server, 50.0).await;

    let harness = TestHarness::new(&server.uri());
    harness.engine().run(false).await.expect("first crawl");
    harness.engine().run(false).await.expect("second crawl");

    let store = harness.store.lock().unwrap();
    assert_eq!(store.count_records().unwrap(), 6);
    assert!(store.recent_changes(100).unwrap().is_empty());
}

#[tokio::test]
async fn test_price_change_is_detected_and_reported() {
    let server = MockServer::start().await;
    mount_catalog(&server, 50.0).await;

    let harness = TestHarness::new(&server.uri());
    harness.engine().run(false).await.expect("first crawl");

    // Same catalog, every price up 80%
    server.reset().await;
    mount_catalog(&server, 90.0).await;
    harness.engine().run(false).await.expect("second crawl");

    {
        let store = harness.store.lock().unwrap();
        let changes = store.recent_changes(100).unwrap();
        assert_eq!(changes.len(), 6);
        let diff = changes[0]
            .field_diffs
            .get(TrackedField::PriceInclTax)
            .expect("price diff");
        assert_eq!(diff.new, serde_json::json!(90.0));
    }

    // Both price fields notified per item, above the 20% threshold
    assert_eq!(harness.notifier.sent_count(), 12);

    let reporter = ReportBuilder::new(
        harness.store.clone(),
        harness.config.storage.reports_dir.clone(),
    );
    let report = reporter
        .build_daily_report(Utc::now().date_naive())
        .expect("build report");
    assert_eq!(report.updated_records, 6);
    assert_eq!(report.total_changes, 12);
    assert_eq!(report.new_records, 6);

    let (json_path, csv_path) = reporter.write_report(&report).expect("write report");
    assert!(json_path.exists());
    assert!(csv_path.exists());
}

#[tokio::test]
async fn test_resume_skips_completed_work() {
    let server = MockServer::start().await;
    mount_html(&server, "/", index_html()).await;

    // The Poetry category was finished before the interruption
    Mock::given(method("GET"))
        .and(path("/cat/poetry/index.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing_html(&["p1"], None)))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/item/p1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("p1", 50.0)))
        .expect(0)
        .mount(&server)
        .await;

    mount_html(
        &server,
        "/cat/travel/index.html",
        listing_html(&["t1", "t2"], None),
    )
    .await;

    // t1 was already harvested; only t2 should be fetched
    Mock::given(method("GET"))
        .and(path("/item/t1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(detail_html("t1", 50.0)))
        .expect(0)
        .mount(&server)
        .await;
    mount_html(&server, "/item/t2.html", detail_html("t2", 50.0)).await;

    let harness = TestHarness::new(&server.uri());
    {
        let mut store = harness.store.lock().unwrap();
        let seeded = CatalogRecord {
            source_url: format!("{}/item/t1.html", server.uri()),
            title: "t1".to_string(),
            category: Some("Travel".to_string()),
            description: None,
            price_incl_tax: Some(50.0),
            price_excl_tax: Some(50.0),
            availability: Some("In stock (9 available)".to_string()),
            num_reviews: Some(2),
            rating: Some(4),
            image_url: None,
            content_fingerprint: "seeded".to_string(),
            snapshot_ref: None,
            last_crawled_at: Utc::now(),
            status: RecordStatus::Success,
            http_status: Some(200),
            response_time_secs: None,
        };
        store.upsert(&seeded, None).unwrap();
        store.set_checkpoint(CHECKPOINT_CATEGORY, "Travel").unwrap();
    }

    let stats = harness.engine().run(true).await.expect("resume crawl");

    assert_eq!(stats.total_items, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.categories_processed, 1);

    let store = harness.store.lock().unwrap();
    assert_eq!(store.count_records().unwrap(), 2);
    assert!(store.get_checkpoint(CHECKPOINT_CATEGORY).unwrap().is_none());
}
