use canopy::core::aoi::AreaOfInterest;
use canopy::io::catalog::{
    CatalogBackend, DatasetSelector, SceneQuery, StacCatalogClient, SENTINEL_COLLECTION,
};
use canopy::MonitorError;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

type Handler = dyn Fn(&str, &str) -> (u16, String) + Send + Sync;

/// Minimal HTTP/1.1 responder on a local port; records every request line
struct LocalCatalog {
    base: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl LocalCatalog {
    fn start(handler: Box<Handler>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                serve(stream, handler.as_ref(), &seen);
            }
        });

        Self { base, requests }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn serve(mut stream: TcpStream, handler: &Handler, seen: &Mutex<Vec<String>>) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }
    let mut body = vec![0u8; content_length];
    let _ = reader.read_exact(&mut body);

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let path = parts.next().unwrap_or("").to_string();
    seen.lock().unwrap().push(format!("{} {}", method, path));

    let (status, body) = handler(&method, &path);
    let response = format!(
        "HTTP/1.1 {} Status\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes());
}

fn items(ids: &[&str]) -> Vec<Value> {
    ids.iter()
        .map(|id| {
            json!({
                "id": id,
                "collection": SENTINEL_COLLECTION,
                "properties": {"datetime": "2024-06-10T19:00:00Z", "eo:cloud_cover": 3.0},
                "assets": {
                    "B04": {"href": format!("https://data/{}/B04.tif", id)},
                    "B8A": {"href": format!("https://data/{}/B8A.tif", id)},
                    "B02": {"href": format!("https://data/{}/B02.tif", id)}
                }
            })
        })
        .collect()
}

fn page(ids: &[&str], next: Option<String>) -> String {
    let links: Vec<Value> = next
        .map(|href| json!({"rel": "next", "href": href, "method": "GET"}))
        .into_iter()
        .collect();
    json!({"type": "FeatureCollection", "features": items(ids), "links": links}).to_string()
}

fn query() -> SceneQuery {
    SceneQuery::new(
        AreaOfInterest::new(-122.15, 47.55, -122.04, 47.66).unwrap(),
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        NaiveDate::from_ymd_opt(2024, 7, 31).unwrap(),
        30.0,
        DatasetSelector::Sentinel,
    )
    .unwrap()
}

fn client(base: &str, max_items: usize, max_retries: u32) -> StacCatalogClient {
    StacCatalogClient::new(base, 2, max_items, Duration::from_secs(5), max_retries).unwrap()
}

/// Serves `/search` then `/page2`, `/page3`, ... from the given pages
fn paged_catalog(pages: Vec<Vec<&'static str>>) -> LocalCatalog {
    let base = Arc::new(Mutex::new(String::new()));
    let base_for_handler = base.clone();
    let total = pages.len();
    let catalog = LocalCatalog::start(Box::new(move |_method, path| {
        let index = match path {
            "/search" => 0,
            other => match other.trim_start_matches("/page").parse::<usize>() {
                Ok(n) if n >= 2 && n <= total => n - 1,
                _ => return (404, "{}".to_string()),
            },
        };
        let next = (index + 1 < total)
            .then(|| format!("{}/page{}", base_for_handler.lock().unwrap(), index + 2));
        (200, page(&pages[index], next))
    }));
    *base.lock().unwrap() = catalog.base.clone();
    catalog
}

#[test]
fn test_next_links_followed_across_pages() {
    let _ = env_logger::builder().is_test(true).try_init();
    let catalog = paged_catalog(vec![vec!["a", "b"], vec!["c", "d"], vec!["e"]]);

    let found = client(&catalog.base, 100, 0)
        .search(SENTINEL_COLLECTION, &query(), None)
        .unwrap();
    let ids: Vec<&str> = found.iter().map(|i| i.id.as_str()).collect();

    assert_eq!(ids, vec!["a", "b", "c", "d", "e"]);
    assert_eq!(
        catalog.requests(),
        vec!["POST /search", "GET /page2", "GET /page3"]
    );
}

#[test]
fn test_results_truncated_at_max_items() {
    let catalog = paged_catalog(vec![vec!["a", "b"], vec!["c", "d"], vec!["e", "f"]]);

    let found = client(&catalog.base, 3, 0)
        .search(SENTINEL_COLLECTION, &query(), None)
        .unwrap();

    assert_eq!(found.len(), 3);
    assert_eq!(found[2].id, "c");
    // The third page is never requested
    assert_eq!(catalog.requests().len(), 2);
}

#[test]
fn test_client_error_not_retried() {
    let catalog = LocalCatalog::start(Box::new(|_, _| {
        (400, r#"{"description": "bad bbox"}"#.to_string())
    }));

    let result = client(&catalog.base, 100, 3).search(SENTINEL_COLLECTION, &query(), None);
    match result {
        Err(MonitorError::CatalogQueryFailed(message)) => assert!(message.contains("400")),
        other => panic!("expected a catalog failure, got {:?}", other),
    }
    assert_eq!(catalog.requests().len(), 1);
}

#[test]
fn test_server_error_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let catalog = LocalCatalog::start(Box::new(move |_, _| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            (503, "{}".to_string())
        } else {
            (200, page(&["a"], None))
        }
    }));

    let found = client(&catalog.base, 100, 2)
        .search(SENTINEL_COLLECTION, &query(), None)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
