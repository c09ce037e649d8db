//! Firebase Realtime Database adapter.
//!
//! Reads and writes go through the REST API (`{db}/{path}.json`). Subscriptions
//! hold a streaming GET with `Accept: text/event-stream` open and re-read the
//! subscribed node whenever the server reports a change.

use async_trait::async_trait;
use bytes::BytesMut;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{CatalogRepository, RepositoryError, Snapshot, SnapshotStream, SubscriptionQuery};
use crate::catalog::model::{StoredVideo, VideoKey, VideoPatch};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct FirebaseRepository {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: Client,
    base_url: Url,
    auth: Option<SecretString>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    name: String,
}

/// Body of a `put`/`patch` event.
#[derive(Debug, Deserialize)]
struct ChangeEvent {
    path: String,
    #[serde(default)]
    data: Value,
}

impl From<reqwest::Error> for RepositoryError {
    fn from(err: reqwest::Error) -> Self {
        let error_type = match &err {
            e if e.is_timeout() => "Request Timeout",
            e if e.is_connect() => "Connection Failed",
            e if e.is_decode() => "Response Decode Failed",
            e if e.is_redirect() => "Redirect Loop or Invalid Redirect",
            e if e.is_request() => "Invalid Request",
            e if e.is_body() => "Request Body Error",
            _ => "Unknown HTTP Error",
        };

        error!(
            error = %err,
            error_type = error_type,
            url = ?err.url().map(redacted),
            status = ?err.status(),
            is_timeout = err.is_timeout(),
            is_connect = err.is_connect(),
            "Repository request failed"
        );

        RepositoryError::Transport(err.without_url())
    }
}

fn not_a_base() -> RepositoryError {
    RepositoryError::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase)
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Strips the query string, which carries the `auth` credential.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}

impl FirebaseRepository {
    pub fn new(
        database_url: &str,
        auth: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        let mut base = database_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)?;
        if base_url.cannot_be_a_base() {
            return Err(not_a_base());
        }
        let http_client = Client::builder().build()?;

        info!(database = %base_url, "Using Firebase realtime database");

        Ok(Self {
            inner: Arc::new(Inner {
                http_client,
                base_url,
                auth,
                timeout,
            }),
        })
    }
}

impl Inner {
    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url, RepositoryError> {
        self.url_for(segments(path), params)
    }

    /// URL of one child of `path`. The key is always a single segment.
    fn child_url(&self, path: &str, key: &VideoKey) -> Result<Url, RepositoryError> {
        let mut segments = segments(path);
        segments.push(key.as_str());
        self.url_for(segments, &[])
    }

    fn url_for(
        &self,
        mut segments: Vec<&str>,
        params: &[(&str, String)],
    ) -> Result<Url, RepositoryError> {
        let leaf = format!("{}.json", segments.pop().unwrap_or_default());
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| not_a_base())?
            .pop_if_empty()
            .extend(segments)
            .push(&leaf);

        if !params.is_empty() || self.auth.is_some() {
            let mut query = url.query_pairs_mut();
            for (name, value) in params {
                query.append_pair(name, value);
            }
            if let Some(auth) = &self.auth {
                query.append_pair("auth", auth.expose_secret());
            }
        }
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> RequestBuilder {
        self.http_client.request(method, url).timeout(self.timeout)
    }

    async fn read_json(response: Response) -> Result<Value, RepositoryError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "Repository returned an error status");
            return Err(RepositoryError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn get(&self, path: &str, params: &[(&str, String)]) -> Result<Value, RepositoryError> {
        let url = self.url(path, params)?;
        let response = self.request(reqwest::Method::GET, url).send().await?;
        Self::read_json(response).await
    }

    async fn read_snapshot(
        &self,
        path: &str,
        query: &SubscriptionQuery,
    ) -> Result<Snapshot, RepositoryError> {
        match query {
            SubscriptionQuery::All => Ok(Snapshot::from_json(&self.get(path, &[]).await?)),
            SubscriptionQuery::Ordered { order_field, limit } => {
                let params = [
                    ("orderBy", format!("\"{}\"", order_field)),
                    ("limitToLast", limit.to_string()),
                ];
                let value = match self.get(path, &params).await {
                    Err(RepositoryError::Status { status: 400, body }) => {
                        warn!(
                            path = %path,
                            order_field = %order_field,
                            body = %body,
                            "Ordered query refused, add an .indexOn rule; reading the full node"
                        );
                        self.get(path, &[]).await?
                    }
                    other => other?,
                };
                Ok(Snapshot::ordered_window(&value, order_field, *limit))
            }
        }
    }

    async fn run_subscription(
        self: Arc<Self>,
        path: String,
        query: SubscriptionQuery,
        tx: mpsc::Sender<Result<Snapshot, RepositoryError>>,
    ) {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match self.stream_changes(&path, &query, &tx, &mut backoff).await {
                Ok(()) => {
                    debug!(path = %path, "Subscriber went away, closing event stream");
                    return;
                }
                Err(err) => {
                    warn!(
                        path = %path,
                        error = %err,
                        retry_in = ?backoff,
                        "Event stream interrupted"
                    );
                    if tx.send(Err(err)).await.is_err() {
                        return;
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = tx.closed() => return,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Runs one event-stream connection. Returns `Ok` only once the receiving
    /// side is gone.
    async fn stream_changes(
        &self,
        path: &str,
        query: &SubscriptionQuery,
        tx: &mpsc::Sender<Result<Snapshot, RepositoryError>>,
        backoff: &mut Duration,
    ) -> Result<(), RepositoryError> {
        let url = self.url(path, &[])?;
        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RepositoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        info!(path = %path, "Event stream connected");
        *backoff = INITIAL_BACKOFF;

        let mut body = std::pin::pin!(response.bytes_stream());
        let mut parser = SseParser::default();

        loop {
            let chunk = tokio::select! {
                chunk = body.next() => chunk,
                _ = tx.closed() => return Ok(()),
            };
            let chunk = match chunk {
                Some(chunk) => chunk?,
                None => return Err(RepositoryError::Closed),
            };

            for event in parser.push(&chunk) {
                match event.event.as_str() {
                    "put" | "patch" => {
                        let snapshot = self.snapshot_for(path, query, &event).await?;
                        debug!(path = %path, records = snapshot.len(), "Publishing snapshot");
                        if tx.send(Ok(snapshot)).await.is_err() {
                            return Ok(());
                        }
                    }
                    "keep-alive" => {
                        if tx.is_closed() {
                            return Ok(());
                        }
                    }
                    "cancel" | "auth_revoked" => {
                        return Err(RepositoryError::Cancelled(event.event.clone()));
                    }
                    other => debug!(event = other, "Ignoring event"),
                }
            }
        }
    }

    /// A `put` at the root of an unfiltered subscription carries the whole
    /// collection. Everything else triggers a fresh read.
    async fn snapshot_for(
        &self,
        path: &str,
        query: &SubscriptionQuery,
        event: &SseEvent,
    ) -> Result<Snapshot, RepositoryError> {
        if event.event == "put" && *query == SubscriptionQuery::All {
            if let Ok(change) = serde_json::from_str::<ChangeEvent>(&event.data) {
                if change.path == "/" {
                    return Ok(Snapshot::from_json(&change.data));
                }
            }
        }
        self.read_snapshot(path, query).await
    }
}

#[async_trait]
impl CatalogRepository for FirebaseRepository {
    fn subscribe(&self, path: &str, query: SubscriptionQuery) -> SnapshotStream {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(self.inner.clone().run_subscription(path.to_string(), query, tx));

        futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        })
        .boxed()
    }

    #[tracing::instrument(
        name = "firebase_create",
        skip(self, record),
        fields(title = %record.title)
    )]
    async fn create(&self, path: &str, record: &StoredVideo) -> Result<VideoKey, RepositoryError> {
        let url = self.inner.url(path, &[])?;
        let response = self
            .inner
            .request(reqwest::Method::POST, url)
            .json(record)
            .send()
            .await?;
        let pushed: PushResponse = serde_json::from_value(Inner::read_json(response).await?)?;
        Ok(VideoKey::new(pushed.name))
    }

    #[tracing::instrument(name = "firebase_update", skip(self, patch))]
    async fn update(
        &self,
        path: &str,
        key: &VideoKey,
        patch: &VideoPatch,
    ) -> Result<(), RepositoryError> {
        let url = self.inner.child_url(path, key)?;
        let response = self
            .inner
            .request(reqwest::Method::PATCH, url)
            .json(patch)
            .send()
            .await?;
        Inner::read_json(response).await.map(|_| ())
    }

    #[tracing::instrument(name = "firebase_delete", skip(self))]
    async fn delete(&self, path: &str, key: &VideoKey) -> Result<(), RepositoryError> {
        let url = self.inner.child_url(path, key)?;
        let response = self
            .inner
            .request(reqwest::Method::DELETE, url)
            .send()
            .await?;
        Inner::read_json(response).await.map(|_| ())
    }

    async fn read_value(&self, path: &str) -> Result<Option<Value>, RepositoryError> {
        let value = self.inner.get(path, &[]).await?;
        Ok((!value.is_null()).then_some(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` framing.
#[derive(Debug, Default)]
struct SseParser {
    buffer: BytesMut,
}

impl SseParser {
    fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let frame = self.buffer.split_to(end + 2);
            if let Some(event) = parse_frame(&String::from_utf8_lossy(&frame)) {
                events.push(event);
            }
        }
        events
    }
}

fn parse_frame(frame: &str) -> Option<SseEvent> {
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();

    for line in frame.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);
        match field {
            "event" => event = Some(value.to_string()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseEvent {
        event: event.unwrap_or_else(|| "message".to_string()),
        data: data.join("\n"),
    })
}
