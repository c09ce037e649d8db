//! HTTP surface.

pub mod common;
pub mod v1;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::api::common::tracing::{
    make_custom_span, on_custom_failure, on_custom_request, on_custom_response,
};
use crate::system::create_system_router;
use crate::InnerState;

/// Creates the main API router with every route and the shared layers.
#[tracing::instrument(name = "create_api_router", skip(state))]
pub fn create_api_router(state: InnerState) -> Router {
    tracing::info!("Creating API router");

    Router::new()
        .merge(create_system_router())
        .merge(v1::create_v1_router(state.clone()))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| make_custom_span(request))
                .on_request(|request: &Request<Body>, span: &Span| on_custom_request(request, span))
                .on_response(|response: &Response<Body>, latency: Duration, span: &Span| {
                    on_custom_response(response, latency, span)
                })
                .on_failure(
                    |error: ServerErrorsFailureClass, latency: Duration, span: &Span| {
                        on_custom_failure(error, latency, span)
                    },
                ),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1::events::HeroSessions;
    use crate::catalog::model::{StoredVideo, VideoKey};
    use crate::catalog::CatalogCache;
    use crate::identity::tests::{token_for, SECRET};
    use crate::identity::JwtIdentity;
    use crate::repository::{CatalogRepository, InMemoryRepository, SubscriptionQuery};
    use crate::settings::Settings;
    use axum::http::{header, Method, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        repository: Arc<InMemoryRepository>,
        state: InnerState,
    }

    impl TestApp {
        async fn new() -> Self {
            let repository = Arc::new(InMemoryRepository::new());
            repository.set_value("roles/boss", json!("admin")).await;
            repository.set_value("roles/fan", json!("viewer")).await;

            let shared: crate::repository::SharedRepository = repository.clone();
            let catalog = CatalogCache::new(shared.clone(), "videos", SubscriptionQuery::All);
            let latest = CatalogCache::new(
                shared.clone(),
                "videos",
                SubscriptionQuery::ordered("createdAt", 15),
            );
            let state = InnerState {
                repository: shared.clone(),
                identity: Arc::new(JwtIdentity::new(SECRET.as_bytes(), shared)),
                catalog: catalog.subscribe(),
                latest: latest.subscribe(),
                hero_sessions: HeroSessions::default(),
                settings: Arc::new(Settings::default()),
            };
            Self { repository, state }
        }

        async fn seed(&self, title: &str, kind: &str, created_at: i64) -> String {
            let stored = StoredVideo {
                title: title.to_string(),
                link: format!("https://youtu.be/{title}"),
                thumbnail_url: "https://img.example.com/t.jpg".to_string(),
                kind: Some(kind.to_string()),
                created_at: Some(created_at),
                ..StoredVideo::default()
            };
            let key = self.repository.create("videos", &stored).await.unwrap();
            key.to_string()
        }

        /// Waits until both caches reflect every write made so far.
        async fn settle(&self, expected: usize) {
            let mut catalog = self.state.catalog.clone();
            let mut latest = self.state.latest.clone();
            while catalog.current().len() != expected {
                catalog.changed().await;
            }
            while latest.current().len() != expected.min(15) {
                latest.changed().await;
            }
        }

        /// Same router and state, with a different hero rotation period.
        fn with_rotation(&self, period: Duration) -> InnerState {
            let mut state = self.state.clone();
            state.settings = Arc::new(Settings {
                hero_rotation: period,
                ..Settings::default()
            });
            state
        }

        async fn call(
            &self,
            method: Method,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            let request = match body {
                Some(body) => builder
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };

            let response = create_api_router(self.state.clone())
                .oneshot(request)
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, body)
        }
    }

    /// Reads `data:` payloads off an event stream response.
    struct EventReader {
        body: axum::body::BodyDataStream,
        buffer: String,
    }

    impl EventReader {
        async fn open(state: InnerState, uri: &str) -> Self {
            let response = create_api_router(state)
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            Self {
                body: response.into_body().into_data_stream(),
                buffer: String::new(),
            }
        }

        async fn next_data(&mut self) -> Value {
            use futures::StreamExt;

            loop {
                if let Some(end) = self.buffer.find("\n\n") {
                    let frame: String = self.buffer.drain(..end + 2).collect();
                    if let Some(data) = frame.lines().find_map(|l| l.strip_prefix("data: ")) {
                        return serde_json::from_str(data).unwrap();
                    }
                    continue;
                }
                let chunk = tokio::time::timeout(Duration::from_secs(10), self.body.next())
                    .await
                    .expect("no event within 10s")
                    .expect("event stream ended")
                    .unwrap();
                self.buffer.push_str(&String::from_utf8_lossy(&chunk));
            }
        }

        async fn until(&mut self, done: impl Fn(&Value) -> bool) -> Value {
            for _ in 0..20 {
                let data = self.next_data().await;
                if done(&data) {
                    return data;
                }
            }
            panic!("no matching event in 20 events");
        }
    }

    async fn seed_episodes(app: &TestApp, count: i64) -> Vec<String> {
        let mut keys = Vec::new();
        for i in 0..count {
            keys.push(app.seed(&format!("Ep{i}"), "Episode", i).await);
        }
        app.settle(count as usize).await;
        keys
    }

    fn admin_token() -> String {
        token_for("boss", "boss@mojiflix.dev", SECRET)
    }

    #[tokio::test]
    async fn health_is_ok() {
        let app = TestApp::new().await;
        let (status, _) = app.call(Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_routes_require_an_admin() {
        let app = TestApp::new().await;

        let (status, body) = app.call(Method::GET, "/api/v1/admin/videos", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);

        let (status, _) = app
            .call(Method::GET, "/api/v1/admin/videos", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let fan = token_for("fan", "fan@mojiflix.dev", SECRET);
        let (status, _) = app.call(Method::GET, "/api/v1/admin/videos", Some(&fan), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .call(Method::GET, "/api/v1/admin/videos", Some(&admin_token()), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn admin_create_update_delete_round() {
        let app = TestApp::new().await;
        let token = admin_token();

        let (status, body) = app
            .call(
                Method::POST,
                "/api/v1/admin/videos",
                Some(&token),
                Some(json!({
                    "title": "Pilot",
                    "description": "",
                    "link": "https://www.youtube.com/watch?v=p1&t=3",
                    "thumbnailUrl": "https://img.example.com/p1.jpg",
                    "type": "Episode",
                    "series": "Night Shift"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["link"], "https://www.youtube.com/embed/p1");
        assert_eq!(body["data"]["language"], "Other");
        let key = body["data"]["key"].as_str().unwrap().to_string();

        let (status, body) = app
            .call(
                Method::PATCH,
                &format!("/api/v1/admin/videos/{key}"),
                Some(&token),
                Some(json!({ "title": "Pilot (cut)" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["title"], "Pilot (cut)");
        assert_eq!(body["data"]["series"], "Night Shift");

        let (status, _) = app
            .call(Method::DELETE, &format!("/api/v1/admin/videos/{key}"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .call(Method::DELETE, &format!("/api/v1/admin/videos/{key}"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_upload_returns_field_errors() {
        let app = TestApp::new().await;
        let (status, body) = app
            .call(
                Method::POST,
                "/api/v1/admin/videos",
                Some(&admin_token()),
                Some(json!({ "title": "", "link": "nope", "type": "Cartoon" })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["title"].is_array());
        assert!(body["errors"]["link"].is_array());
        assert!(body["errors"]["type"].is_array());
        assert!(app.repository.read_value("videos").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn admin_list_rejects_unknown_filters() {
        let app = TestApp::new().await;
        let (status, _) = app
            .call(Method::GET, "/api/v1/admin/videos?type=Cartoon", Some(&admin_token()), None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn browsing_views_follow_the_catalog() {
        let app = TestApp::new().await;
        let movie = app.seed("Monsoon", "Movie", 1).await;
        app.seed("Haunt", "Horror", 2).await;
        let episode = app.seed("Pilot", "Episode", 3).await;
        app.settle(3).await;

        let (status, body) = app.call(Method::GET, "/api/v1/dashboard", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["hero"]["slides"][0]["key"], episode.as_str());
        assert_eq!(body["data"]["categories"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"]["isEmpty"], false);

        let (_, body) = app.call(Method::GET, "/api/v1/search?prefix=mon", None, None).await;
        assert_eq!(body["data"]["mode"], "results");
        assert_eq!(body["data"]["suggestions"][0], "Monsoon");

        let (_, body) = app.call(Method::GET, "/api/v1/search", None, None).await;
        assert_eq!(body["data"]["mode"], "latest");
        assert_eq!(body["data"]["results"][0]["key"], episode.as_str());

        let (status, body) = app
            .call(Method::GET, &format!("/api/v1/watch/{movie}"), None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["video"]["title"], "Monsoon");

        let (status, _) = app.call(Method::GET, "/api/v1/series/pilot", None, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_keys_and_series_are_not_found() {
        let app = TestApp::new().await;
        let (status, body) = app.call(Method::GET, "/api/v1/watch/-nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], 404);

        let (status, _) = app.call(Method::GET, "/api/v1/series/ghosts", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn event_streams_open_with_a_first_event() {
        use futures::StreamExt;

        let app = TestApp::new().await;
        for (uri, event) in [
            ("/api/v1/events/catalog", "event: snapshot"),
            ("/api/v1/events/hero", "event: hero"),
        ] {
            let response = create_api_router(app.state.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");

            let mut body = response.into_body().into_data_stream();
            let first = body.next().await.unwrap().unwrap();
            assert!(String::from_utf8_lossy(&first).contains(event), "{uri}");
        }
    }

    #[tokio::test]
    async fn me_reports_admin_affordance() {
        let app = TestApp::new().await;

        let (_, body) = app.call(Method::GET, "/api/v1/me", None, None).await;
        assert_eq!(body["data"]["user"], Value::Null);
        assert_eq!(body["data"]["isAdmin"], false);

        let (_, body) = app
            .call(Method::GET, "/api/v1/me", Some(&admin_token()), None)
            .await;
        assert_eq!(body["data"]["user"]["id"], "boss");
        assert_eq!(body["data"]["isAdmin"], true);
    }

    #[tokio::test]
    async fn encoded_traversal_keys_are_not_found() {
        let app = TestApp::new().await;
        let token = admin_token();

        for uri in [
            "/api/v1/admin/videos/..%2Froles",
            "/api/v1/admin/videos/x%3Fprint=silent",
        ] {
            let (status, _) = app.call(Method::DELETE, uri, Some(&token), None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");

            let patch = Some(json!({ "title": "hijacked" }));
            let (status, _) = app.call(Method::PATCH, uri, Some(&token), patch).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        }

        assert_eq!(
            app.repository.read_value("roles/boss").await.unwrap(),
            Some(json!("admin"))
        );
        let (status, _) = app
            .call(Method::GET, "/api/v1/admin/videos", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn series_page_follows_playback_signals() {
        let app = TestApp::new().await;
        for (i, title) in ["Night Shift 1", "Night Shift 2"].into_iter().enumerate() {
            let stored = StoredVideo {
                title: title.to_string(),
                link: "https://www.youtube.com/embed/ns".to_string(),
                thumbnail_url: "https://img.example.com/ns.jpg".to_string(),
                kind: Some("Episode".to_string()),
                series: Some("Night Shift".to_string()),
                created_at: Some(i as i64),
                ..StoredVideo::default()
            };
            app.repository.create("videos", &stored).await.unwrap();
        }
        app.settle(2).await;

        let (status, body) = app
            .call(Method::GET, "/api/v1/series/night%20shift?signal=finished", None, None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["currentEpisodeIndex"], 1);
        assert_eq!(body["data"]["currentEpisode"]["title"], "Night Shift 2");

        let (_, body) = app
            .call(Method::GET, "/api/v1/series/Night%20Shift?episode=1&signal=next", None, None)
            .await;
        assert_eq!(body["data"]["currentEpisodeIndex"], 1);
    }

    #[tokio::test]
    async fn hero_stream_rotates_on_its_timer() {
        let app = TestApp::new().await;
        seed_episodes(&app, 3).await;

        let state = app.with_rotation(Duration::from_millis(50));
        let mut hero = EventReader::open(state, "/api/v1/events/hero").await;
        let first = hero.next_data().await;
        assert_eq!(first["activeIndex"], 0);
        assert_eq!(first["slides"].as_array().unwrap().len(), 3);

        let advanced = hero.until(|data| data["activeIndex"] == 1).await;
        assert_eq!(advanced["active"], advanced["slides"][1]);
    }

    #[tokio::test]
    async fn hero_selection_reaches_the_open_stream() {
        let app = TestApp::new().await;
        seed_episodes(&app, 3).await;

        let state = app.with_rotation(Duration::from_secs(3600));
        let mut hero = EventReader::open(state, "/api/v1/events/hero").await;
        let first = hero.next_data().await;
        let session = first["session"].as_str().unwrap().to_string();

        let uri = format!("/api/v1/events/hero/{session}/select");
        let (status, _) = app
            .call(Method::POST, &uri, None, Some(json!({ "index": 2 })))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let selected = hero.until(|data| data["activeIndex"] == 2).await;
        assert_eq!(selected["session"], session.as_str());

        let (status, _) = app
            .call(
                Method::POST,
                "/api/v1/events/hero/not-a-session/select",
                None,
                Some(json!({ "index": 0 })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn hero_stream_clamps_when_slides_shrink() {
        let app = TestApp::new().await;
        let keys = seed_episodes(&app, 3).await;

        let state = app.with_rotation(Duration::from_secs(3600));
        let mut hero = EventReader::open(state, "/api/v1/events/hero?start=2").await;
        assert_eq!(hero.next_data().await["activeIndex"], 2);

        for key in &keys[..2] {
            app.repository
                .delete("videos", &VideoKey::from(key.as_str()))
                .await
                .unwrap();
        }

        let shrunk = hero
            .until(|data| data["slides"].as_array().is_some_and(|s| s.len() == 1))
            .await;
        assert_eq!(shrunk["activeIndex"], 0);
        assert_eq!(shrunk["active"], keys[2].as_str());
    }
}
