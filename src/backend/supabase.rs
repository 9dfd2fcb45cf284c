// Supabase backend: PostgREST for queries and writes, a polling change feed

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Sender},
    },
    thread,
    time::Duration,
};

use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::runtime::Runtime;

use crate::{
    RidewatchError,
    config::AppConfig,
    records::{ID_COLUMN, Row},
};

use super::{Backend, ChangeEvent, ChangeRequest, Query, Subscription};

const REST_PATH: &str = "rest/v1";
/// Most recent rows inspected on every poll of a change feed
const POLL_WINDOW: usize = 200;

struct RestClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
    runtime: Runtime,
    poll_interval: Duration,
    channels: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

/// Talks to a Supabase project over its REST interface.
///
/// Supabase pushes changes over a websocket protocol; this adapter instead
/// polls the most recent rows of a table and emits the ones it has not seen,
/// which only needs the REST endpoint and gives the same insert-only feed.
#[derive(Clone)]
pub struct SupabaseBackend {
    inner: Arc<RestClient>,
}

impl SupabaseBackend {
    pub fn new(config: &AppConfig) -> Result<Self, RidewatchError> {
        let base_url = config
            .backend_url
            .clone()
            .ok_or(RidewatchError::MissingBackendUrl)?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| RidewatchError::backend("build_client", e))?;
        let runtime = Runtime::new().map_err(|e| RidewatchError::BackendRuntime { source: e })?;

        info!("Using Supabase backend at {base_url}");
        if config.backend_key.is_none() {
            warn!("No API key configured, requests may be rejected");
        }
        Ok(Self {
            inner: Arc::new(RestClient {
                base_url,
                api_key: config.backend_key.clone(),
                client,
                runtime,
                poll_interval: config.poll_interval(),
                channels: Mutex::new(HashMap::new()),
            }),
        })
    }
}

impl RestClient {
    fn table_url(&self, table: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, table)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request
                .header("apikey", key)
                .header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }

    fn fetch(&self, query: &Query) -> Result<Vec<Row>, RidewatchError> {
        let request = self.authorize(
            self.client
                .get(self.table_url(&query.table))
                .query(&query_params(query)),
        );
        self.runtime.block_on(async {
            let response = request
                .send()
                .await
                .map_err(|e| RidewatchError::backend("query", e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(status_error("query", status, &body));
            }
            response
                .json::<Vec<Row>>()
                .await
                .map_err(|e| RidewatchError::backend("query", e))
        })
    }

    fn write(&self, table: &str, record: &Row) -> Result<(), RidewatchError> {
        let request = self.authorize(
            self.client
                .post(self.table_url(table))
                .header("Prefer", "return=minimal")
                .json(record),
        );
        self.runtime.block_on(async {
            let response = request
                .send()
                .await
                .map_err(|e| RidewatchError::backend("insert", e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(status_error("insert", status, &body));
            }
            Ok(())
        })
    }

    fn deactivate(&self, channel: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = channels.remove(channel) {
            active.store(false, Ordering::Release);
        }
    }
}

fn status_error(operation: &str, status: StatusCode, body: &str) -> RidewatchError {
    RidewatchError::backend(operation, format!("HTTP {status}: {}", body.trim()))
}

/// PostgREST query string for a [`Query`].
fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    for filter in &query.filters {
        params.push((filter.column.clone(), format!("eq.{}", filter.value)));
    }
    if let Some(order) = &query.order {
        // nulls count as the smallest value, like the in-memory backend
        let direction = if order.descending {
            "desc.nullslast"
        } else {
            "asc.nullsfirst"
        };
        params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn feed_query(request: &ChangeRequest) -> Query {
    let mut query = Query::new(&request.table);
    if let Some(filter) = &request.filter {
        query.filters.push(filter.clone());
    }
    match &request.recent_by {
        Some(column) => query.order_by(column, true).limit(Some(POLL_WINDOW)),
        None => query,
    }
}

fn row_key(row: &Row) -> String {
    match row.get(ID_COLUMN) {
        Some(Value::String(id)) => id.clone(),
        Some(id) => id.to_string(),
        None => row.to_string(),
    }
}

/// Polls `query` until `active` goes false or the receiver is dropped. The
/// first window is delivered too, since rows may land between the snapshot
/// and the first poll; consumers drop the ids they already hold.
fn poll_feed(
    client: Arc<RestClient>,
    channel: String,
    query: Query,
    sender: Sender<ChangeEvent>,
    active: Arc<AtomicBool>,
) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut failing = false;

    while active.load(Ordering::Acquire) {
        match client.fetch(&query) {
            Ok(rows) => {
                failing = false;
                let keys: HashSet<String> = rows.iter().map(row_key).collect();
                // newest-first window, deliver oldest first
                for row in rows.into_iter().rev() {
                    if !seen.contains(&row_key(&row))
                        && sender.send(ChangeEvent::Inserted(row)).is_err()
                    {
                        debug!("Receiver for {channel} dropped, stopping poller");
                        return;
                    }
                }
                seen = if query.limit.is_some() {
                    keys
                } else {
                    seen.union(&keys).cloned().collect()
                };
            }
            Err(e) => {
                // report the first failure of a streak, not every retry
                if !failing {
                    warn!("Polling {channel} failed: {e}");
                    if sender.send(ChangeEvent::Error(e.to_string())).is_err() {
                        break;
                    }
                }
                failing = true;
            }
        }
        thread::sleep(client.poll_interval);
    }
    debug!("Poller for {channel} stopped");
}

impl Backend for SupabaseBackend {
    fn query(&self, query: &Query) -> Result<Vec<Row>, RidewatchError> {
        self.inner.fetch(query)
    }

    fn subscribe(
        &self,
        channel: &str,
        request: &ChangeRequest,
    ) -> Result<Subscription, RidewatchError> {
        self.inner.deactivate(channel);

        let (sender, receiver) = mpsc::channel();
        let active = Arc::new(AtomicBool::new(true));
        self.inner
            .channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel.to_string(), active.clone());

        let client = self.inner.clone();
        let query = feed_query(request);
        let thread_channel = channel.to_string();
        let thread_active = active.clone();
        thread::Builder::new()
            .name(format!("feed-{channel}"))
            .spawn(move || poll_feed(client, thread_channel, query, sender, thread_active))
            .map_err(|e| RidewatchError::SubscriptionFailed {
                channel: channel.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Subscription::new(channel, receiver, active))
    }

    fn unsubscribe(&self, channel: &str) {
        self.inner.deactivate(channel);
    }

    fn insert(&self, table: &str, record: Row) -> Result<(), RidewatchError> {
        self.inner.write(table, &record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Filter;
    use serde_json::json;
    use std::{
        io::{Read, Write},
        net::TcpListener,
        time::Instant,
    };

    #[test]
    fn test_query_params() {
        let query = Query::new("pothole_detections")
            .eq("rider_id", "R1")
            .eq("session_id", "F1")
            .order_by("detected_at", true)
            .limit(Some(20));
        assert_eq!(
            query_params(&query),
            vec![
                ("select".to_string(), "*".to_string()),
                ("rider_id".to_string(), "eq.R1".to_string()),
                ("session_id".to_string(), "eq.F1".to_string()),
                ("order".to_string(), "detected_at.desc.nullslast".to_string()),
                ("limit".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_ascending_order_puts_nulls_first() {
        let query = Query::new("uploads").order_by("uploaded_at", false);
        assert!(query_params(&query).contains(&(
            "order".to_string(),
            "uploaded_at.asc.nullsfirst".to_string()
        )));
    }

    /// Answers every request on a local port with the same JSON body.
    fn serve_rows(body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else {
                    break;
                };
                let mut request = [0u8; 4096];
                let _ = stream.read(&mut request);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{address}")
    }

    #[test]
    fn test_feed_delivers_rows_present_at_first_poll() {
        let url = serve_rows(
            r#"[{"id": "p1", "detected_at": "2024-03-01T10:00:00Z", "rider_id": "R1", "session_id": "F1"}]"#,
        );
        let config = AppConfig {
            backend_url: Some(url),
            poll_interval_ms: 50,
            ..Default::default()
        };
        let backend = SupabaseBackend::new(&config).unwrap();
        let request = ChangeRequest::inserts("pothole_detections")
            .filter(Filter::eq("rider_id", "R1"))
            .recent_by("created_at");
        let feed = backend.subscribe("potholes:R1:F1", &request).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let row = loop {
            match feed.try_next() {
                Some(ChangeEvent::Inserted(row)) => break row,
                Some(other) => panic!("unexpected feed event {other:?}"),
                None => {
                    assert!(Instant::now() < deadline, "p1 was never delivered");
                    thread::sleep(Duration::from_millis(10));
                }
            }
        };
        assert_eq!(row["id"], "p1");

        // later polls return the same row, it is not delivered again
        thread::sleep(Duration::from_millis(300));
        assert!(feed.try_next().is_none());
    }

    #[test]
    fn test_feed_query_windows_recent_rows() {
        let request = ChangeRequest::inserts("sensor_data")
            .filter(Filter::eq("rider_id", "R1"))
            .recent_by("created_at");
        let query = feed_query(&request);
        assert_eq!(query.limit, Some(POLL_WINDOW));
        assert!(query.order.as_ref().unwrap().descending);

        let unordered = feed_query(&ChangeRequest::inserts("sensor_data"));
        assert!(unordered.order.is_none());
        assert!(unordered.limit.is_none());
    }

    #[test]
    fn test_row_key() {
        assert_eq!(row_key(&json!({"id": "abc"})), "abc");
        assert_eq!(row_key(&json!({"id": 12})), "12");
    }

    #[test]
    fn test_missing_url_is_rejected() {
        assert!(matches!(
            SupabaseBackend::new(&AppConfig::default()),
            Err(RidewatchError::MissingBackendUrl)
        ));
    }
}
