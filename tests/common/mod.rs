#![allow(dead_code)]

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use pebble_relay::models::{CreatedEndpoint, NewEndpoint};
use pebble_relay::services::dispatcher::{Dispatcher, DispatcherSettings};
use pebble_relay::services::endpoints;
use pebble_relay::Database;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

pub const ORG: &str = "org_acme";
pub const OTHER_ORG: &str = "org_globex";

pub fn create_test_db() -> Database {
    let db = Database::open_memory().expect("Failed to create test database");
    db.migrate().expect("Failed to run migrations");
    db
}

pub fn create_endpoint(db: &Database, url: &str, events: &[&str]) -> CreatedEndpoint {
    endpoints::create_endpoint(db, ORG, NewEndpoint::new(url, events)).expect("Failed to create endpoint")
}

pub fn test_settings() -> DispatcherSettings {
    DispatcherSettings {
        request_timeout: Duration::from_millis(500),
        backoff_base: Duration::from_millis(1),
        response_body_limit: 64,
        user_agent: "pebble-relay-test".to_string(),
        max_in_flight: 8,
    }
}

/// Dispatcher with a millisecond backoff so retries come due almost at once.
pub fn fast_dispatcher(db: &Database) -> Dispatcher {
    Dispatcher::new(db.clone(), test_settings()).expect("Failed to build dispatcher")
}

/// Long enough for a millisecond backoff to elapse.
pub async fn wait_for_backoff() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[derive(Debug, Clone)]
pub struct Received {
    pub headers: HeaderMap,
    pub body: String,
}

impl Received {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[derive(Clone, Default)]
struct ReceiverState {
    requests: Arc<Mutex<Vec<Received>>>,
    statuses: Arc<Mutex<VecDeque<u16>>>,
    fallback: u16,
    delay: Option<Duration>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Local HTTP receiver that records every request it gets.
pub struct TestReceiver {
    pub url: String,
    state: ReceiverState,
}

impl TestReceiver {
    /// Replies with `statuses` in order, then with `fallback`.
    pub async fn start(statuses: &[u16], fallback: u16) -> Self {
        Self::spawn(ReceiverState {
            statuses: Arc::new(Mutex::new(statuses.iter().copied().collect())),
            fallback,
            ..Default::default()
        })
        .await
    }

    pub async fn ok() -> Self {
        Self::start(&[], 200).await
    }

    pub async fn failing(status: u16) -> Self {
        Self::start(&[], status).await
    }

    /// Sleeps `delay` before answering 200.
    pub async fn slow(delay: Duration) -> Self {
        Self::spawn(ReceiverState {
            fallback: 200,
            delay: Some(delay),
            ..Default::default()
        })
        .await
    }

    async fn spawn(state: ReceiverState) -> Self {
        let app = Router::new()
            .route("/hook", post(receive))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind receiver");
        let addr = listener.local_addr().expect("receiver addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Self {
            url: format!("http://{}/hook", addr),
            state,
        }
    }

    pub fn requests(&self) -> Vec<Received> {
        self.state.requests.lock().unwrap().clone()
    }

    /// Most requests that were being handled at the same moment.
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }
}

async fn receive(State(state): State<ReceiverState>, headers: HeaderMap, body: String) -> StatusCode {
    let now_active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
    state.peak.fetch_max(now_active, Ordering::SeqCst);
    if let Some(delay) = state.delay {
        tokio::time::sleep(delay).await;
    }
    state.active.fetch_sub(1, Ordering::SeqCst);
    state.requests.lock().unwrap().push(Received { headers, body });
    let status = state.statuses.lock().unwrap().pop_front().unwrap_or(state.fallback);
    StatusCode::from_u16(status).unwrap()
}

/// A URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{}/hook", addr)
}

/// A URL whose server answers `status` and then streams a body that never
/// ends, until the client hangs up.
pub async fn endless_body_url(status: u16) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = vec![0u8; 16 * 1024];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 {} Whatever\r\ncontent-type: text/plain\r\nconnection: close\r\n\r\n",
                    status
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }
                let chunk = vec![b'x'; 64 * 1024];
                while socket.write_all(&chunk).await.is_ok() {}
            });
        }
    });
    format!("http://{}/hook", addr)
}
