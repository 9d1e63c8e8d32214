//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and test the full
//! crawl cycle end-to-end. Timing properties use a scripted in-process
//! fetcher so they do not depend on network jitter.

use async_trait::async_trait;
use kumo_harvest::config::{parse_config, SpiderConfig};
use kumo_harvest::crawler::{Engine, FetchOutcome, PageFetcher};
use kumo_harvest::storage::{MemoryStorage, SqliteStorage, Storage};
use kumo_harvest::{CrawlRules, CrawlTask, FieldSelectors, TaskStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Spider defaults with short timings for tests
fn test_spider() -> SpiderConfig {
    SpiderConfig {
        concurrency: 2,
        delay_ms: 0,
        timeout_secs: 5,
        retries: 3,
        retry_backoff_ms: 20,
        user_agent: "KumoTest/1.0".to_string(),
        ..SpiderConfig::default()
    }
}

/// Creates a task seeded with `seeds` under `rules`
fn create_test_task(base_url: &str, seeds: Vec<String>, rules: CrawlRules) -> CrawlTask {
    CrawlTask::new("test-task", "test", base_url, seeds).with_rules(rules)
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_string(body.to_string())
        .insert_header("content-type", "text/html; charset=utf-8")
}

#[tokio::test]
async fn test_full_crawl_single_domain() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            r#"<html><head><title>Home</title></head><body>
            <a href="{base}/page1">Page 1</a>
            <a href="/page2">Page 2</a>
            <a href="/page1#comments">Page 1 again</a>
            </body></html>"#,
            base = base_url
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(html(
            r#"<html lang="en"><head><title>Page 1</title>
            <meta name="description" content="First page">
            <meta name="keywords" content="alpha, beta"></head>
            <body><article><p>Hello from page one.</p></article>
            <a href="/">Home</a></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(html(
            r#"<html><head><title>Page 2</title></head><body><p>Second</p></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let engine = Engine::new(test_spider(), storage.clone());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/", base_url)],
        CrawlRules {
            max_depth: 2,
            ..CrawlRules::default()
        },
    );

    let done = engine.run(task).await.expect("crawl should finish");

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.counters.total_urls, 3);
    assert_eq!(done.counters.processed_urls, 3);
    assert_eq!(done.counters.success_urls, 3);
    assert_eq!(done.counters.failed_urls, 0);
    assert_eq!(done.counters.items_count, 3);
    assert!(done.start_time.is_some());
    assert!(done.end_time.is_some());

    // Every URL was requested exactly once
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let page1 = storage
        .get(&format!("{}/page1", base_url))
        .expect("page1 should be stored");
    assert_eq!(page1.title, "Page 1");
    assert_eq!(page1.description, "First page");
    assert_eq!(page1.keywords, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(page1.language, "en");
    assert_eq!(page1.source, "127.0.0.1");
    assert_eq!(page1.get_metadata("depth"), Some(&serde_json::json!(1)));
}

#[tokio::test]
async fn test_max_depth_zero_fetches_seed_only() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Seed</title></head><body>
            <a href="/a">a</a><a href="/b">b</a><a href="/c">c</a>
            </body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/", base_url)],
        CrawlRules {
            max_depth: 0,
            ..CrawlRules::default()
        },
    );

    let done = Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(done.counters.total_urls, 1);
    assert_eq!(done.counters.processed_urls, 1);
    assert_eq!(storage.len(), 1);
}

#[tokio::test]
async fn test_transient_errors_then_success() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    // Two 500s, then the regular page
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .with_priority(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(html(
            r#"<html><head><title>Recovered</title></head><body>ok</body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/flaky", base_url)],
        CrawlRules::default(),
    );

    let done = Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.counters.success_urls, 1);
    assert_eq!(done.counters.failed_urls, 0);
    assert_eq!(done.counters.items_count, 1);

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);

    let item = storage.get(&format!("{}/flaky", base_url)).unwrap();
    assert_eq!(item.title, "Recovered");
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/down", base_url)],
        CrawlRules::default(),
    );

    let done = Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    // First attempt plus three retries
    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    assert_eq!(done.counters.failed_urls, 1);
    assert_eq!(done.counters.success_urls, 0);
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_permanent_failures_are_not_retried() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/image"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47])
                .insert_header("content-type", "image/png"),
        )
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![
            format!("{}/missing", base_url),
            format!("{}/image", base_url),
        ],
        CrawlRules {
            content_types: ["text/html".to_string()].into_iter().collect(),
            ..CrawlRules::default()
        },
    );

    let done = Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(done.counters.failed_urls, 2);
    assert_eq!(done.counters.processed_urls, 2);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_forbidden_domain_is_never_counted() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Links</title></head><body>
            <a href="/local">local</a>
            <a href="http://ads.forbidden.test/track">ad</a>
            <a href="https://forbidden.test/">other</a>
            </body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/local"))
        .respond_with(html(
            r#"<html><head><title>Local</title></head><body></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/", base_url)],
        CrawlRules {
            max_depth: 1,
            forbidden_domains: ["forbidden.test".to_string(), "*.forbidden.test".to_string()]
                .into_iter()
                .collect(),
            ..CrawlRules::default()
        },
    );

    let done = Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    assert_eq!(done.counters.total_urls, 2);
    assert_eq!(done.counters.processed_urls, 2);
    assert_eq!(done.counters.failed_urls, 0);
    assert!(storage
        .items()
        .iter()
        .all(|item| !item.url.contains("forbidden.test")));
}

#[tokio::test]
async fn test_page_budget_limits_processing() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    let links: String = (0..10)
        .map(|i| format!(r#"<a href="/p/{}">{}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            "<html><head><title>Index</title></head><body>{}</body></html>",
            links
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/p/\d+$"))
        .respond_with(html(
            "<html><head><title>Leaf</title></head><body></body></html>",
        ))
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/", base_url)],
        CrawlRules {
            max_depth: 3,
            max_pages: 4,
            ..CrawlRules::default()
        },
    );

    let done = Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    let requests = mock_server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 4);
    assert_eq!(done.counters.total_urls, 4);
    assert_eq!(done.counters.processed_urls, 4);
    assert_eq!(storage.len(), 4);
}

#[tokio::test]
async fn test_stop_mid_run() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    let links: String = (0..30)
        .map(|i| format!(r#"<a href="/slow/{}">{}</a>"#, i, i))
        .collect();
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(&format!(
            "<html><head><title>Index</title></head><body>{}</body></html>",
            links
        )))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/slow/\d+$"))
        .respond_with(
            html("<html><head><title>Slow</title></head><body></body></html>")
                .set_delay(Duration::from_millis(100)),
        )
        .mount(&mock_server)
        .await;

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/", base_url)],
        CrawlRules {
            max_depth: 1,
            concurrency: Some(1),
            delay_ms: Some(0),
            ..CrawlRules::default()
        },
    );

    let engine = Engine::new(test_spider(), storage.clone());
    let handle = engine.start(task).unwrap();
    assert_eq!(handle.status(), TaskStatus::Running);

    tokio::time::sleep(Duration::from_millis(350)).await;
    handle.stop();
    assert_eq!(handle.status(), TaskStatus::Stopped);
    let requests_at_stop = mock_server.received_requests().await.unwrap().len();

    let done = handle.wait().await.unwrap();
    let requests_at_end = mock_server.received_requests().await.unwrap().len();

    assert_eq!(done.status, TaskStatus::Stopped);
    assert!(done.end_time.is_some());
    assert!(done.counters.processed_urls < done.counters.total_urls);
    // At most the single in-flight fetch completes after stop
    assert!(requests_at_end <= requests_at_stop + 1);
}

#[tokio::test]
async fn test_custom_selectors() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/story"))
        .respond_with(html(
            r#"<html><head><title>Site name</title></head><body>
            <div class="story">
              <h2 class="headline">The real headline</h2>
              <span class="byline">Jane Doe</span>
              <div class="text"><p>Story  body</p><p>continues</p></div>
            </div>
            </body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let mut selectors = FieldSelectors::default();
    selectors.item = Some("div.story".to_string());
    selectors.title = Some(".headline".to_string());
    selectors.author = Some(".byline".to_string());
    selectors.content = Some(".text".to_string());

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(
        &base_url,
        vec![format!("{}/story", base_url)],
        CrawlRules::default(),
    )
    .with_selectors(selectors);

    Engine::new(test_spider(), storage.clone())
        .run(task)
        .await
        .unwrap();

    let item = storage.get(&format!("{}/story", base_url)).unwrap();
    assert_eq!(item.title, "The real headline");
    assert_eq!(item.author, "Jane Doe");
    assert!(item.content.contains("Story body"));
}

#[tokio::test]
async fn test_invalid_task_makes_no_requests() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    let storage = Arc::new(MemoryStorage::new());
    let task = create_test_task(&base_url, vec![], CrawlRules::default());

    let result = Engine::new(test_spider(), storage).start(task);
    assert!(result.is_err());

    let requests = mock_server.received_requests().await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn test_crawl_into_sqlite() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Stored</title></head><body><p>persisted</p></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("items.db");
    let storage = Arc::new(SqliteStorage::new(&db_path).unwrap());

    let task = create_test_task(
        &base_url,
        vec![format!("{}/", base_url)],
        CrawlRules::default(),
    );

    // Crawling twice upserts the same row
    let engine = Engine::new(test_spider(), storage.clone()).with_batch_size(5);
    let first = engine.run(task.clone()).await.unwrap();
    let second = engine.run(task).await.unwrap();
    assert_eq!(first.counters.items_count, 1);
    assert_eq!(second.counters.items_count, 1);

    assert_eq!(storage.count_items().unwrap(), 1);
    let item = storage
        .get_item(&format!("{}/", base_url))
        .unwrap()
        .unwrap();
    assert_eq!(item.title, "Stored");

    storage.close().unwrap();
}

#[tokio::test]
async fn test_task_from_config_file() {
    let mock_server = MockServer::start().await;
    let base_url = mock_server.uri();

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<html><head><title>Configured</title></head><body>
            <h1 class="headline">Configured headline</h1></body></html>"#,
        ))
        .mount(&mock_server)
        .await;

    let toml = format!(
        r#"
        [spider]
        concurrency = 2
        delay-ms = 0
        retries = 1
        retry-backoff-ms = 10

        [[site]]
        name = "configured"
        base-url = "{base}"
        start-urls = ["{base}/"]

        [site.selectors]
        title = "h1.headline"

        [site.rules]
        max-depth = 0
        "#,
        base = base_url
    );
    let config = parse_config(&toml).expect("config should parse");
    let site = &config.sites[0];
    let task = CrawlTask::from_site("configured-1", site, &config.spider);
    assert_eq!(task.rules.max_depth, 0);

    let storage = Arc::new(MemoryStorage::new());
    let done = Engine::new(config.spider.clone(), storage.clone())
        .run(task)
        .await
        .unwrap();

    assert_eq!(done.status, TaskStatus::Completed);
    let item = storage.get(&format!("{}/", base_url)).unwrap();
    assert_eq!(item.title, "Configured headline");
}

/// Records per-domain overlap and dispatch times
#[derive(Default)]
struct TimingFetcher {
    state: Mutex<TimingState>,
}

#[derive(Default)]
struct TimingState {
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
    dispatches: HashMap<String, Vec<Instant>>,
}

#[async_trait]
impl PageFetcher for TimingFetcher {
    async fn fetch(&self, url: &Url) -> FetchOutcome {
        let domain = url.host_str().unwrap_or_default().to_string();
        {
            let mut state = self.state.lock().unwrap();
            let active = {
                let active = state.active.entry(domain.clone()).or_default();
                *active += 1;
                *active
            };
            let max = state.max_active.entry(domain.clone()).or_default();
            *max = (*max).max(active);
            state
                .dispatches
                .entry(domain.clone())
                .or_default()
                .push(Instant::now());
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        *self
            .state
            .lock()
            .unwrap()
            .active
            .get_mut(&domain)
            .unwrap() -= 1;

        FetchOutcome::Success {
            status_code: 200,
            content_type: "text/html".to_string(),
            body: "<html><head><title>t</title></head><body></body></html>".to_string(),
            final_url: url.clone(),
        }
    }
}

#[tokio::test]
async fn test_politeness_across_two_domains() {
    let fetcher = Arc::new(TimingFetcher::default());
    let storage = Arc::new(MemoryStorage::new());

    let seeds: Vec<String> = ["a.test", "b.test"]
        .iter()
        .flat_map(|domain| (1..=3).map(move |i| format!("https://{}/{}", domain, i)))
        .collect();
    let task = create_test_task(
        "https://a.test",
        seeds,
        CrawlRules {
            max_depth: 0,
            concurrency: Some(1),
            delay_ms: Some(1000),
            ..CrawlRules::default()
        },
    );

    let started = Instant::now();
    let done = Engine::new(test_spider(), storage)
        .with_fetcher(fetcher.clone())
        .run(task)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(done.counters.success_urls, 6);
    // Three requests per domain need two full delay windows
    assert!(elapsed >= Duration::from_millis(2000), "elapsed {:?}", elapsed);

    let state = fetcher.state.lock().unwrap();
    for domain in ["a.test", "b.test"] {
        assert_eq!(state.max_active[domain], 1, "overlap on {}", domain);

        let times = &state.dispatches[domain];
        assert_eq!(times.len(), 3);
        for pair in times.windows(2) {
            // Dispatch is stamped by the limiter slightly before fetch starts
            let gap = pair[1].duration_since(pair[0]);
            assert!(gap >= Duration::from_millis(950), "gap {:?} on {}", gap, domain);
        }
    }
}
