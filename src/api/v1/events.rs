//! Server-sent event streams.
//!
//! Each stream owns its timers. Axum drops the stream when the client goes
//! away, which drops the interval and the cache handle with it.
//!
//! Hero streams are registered in [`HeroSessions`] under the id announced in
//! every `hero` event, so the page can pick a slide without reconnecting.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use uuid::Uuid;

use crate::catalog::cache::CachedSnapshot;
use crate::catalog::carousel::{HeroCarousel, HeroRotation};
use crate::catalog::model::VideoKey;
use crate::catalog::CatalogHandle;
use crate::errors::AppError;
use crate::InnerState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotNotice {
    version: u64,
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

impl From<&CachedSnapshot> for SnapshotNotice {
    fn from(cached: &CachedSnapshot) -> Self {
        Self {
            version: cached.version,
            count: cached.snapshot.len(),
            last_error: cached.last_error.clone(),
        }
    }
}

/// Open hero streams by session id.
#[derive(Clone, Default)]
pub struct HeroSessions {
    streams: Arc<Mutex<HashMap<Uuid, mpsc::Sender<usize>>>>,
}

impl HeroSessions {
    fn streams(&self) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<usize>>> {
        self.streams.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn open(&self) -> (HeroSession, mpsc::Receiver<usize>) {
        let (sender, selections) = mpsc::channel(8);
        let id = Uuid::new_v4();
        self.streams().insert(id, sender);
        let session = HeroSession {
            id,
            sessions: self.clone(),
        };
        (session, selections)
    }

    fn sender(&self, id: &Uuid) -> Option<mpsc::Sender<usize>> {
        self.streams().get(id).cloned()
    }
}

/// Unregisters the stream when it is dropped.
struct HeroSession {
    id: Uuid,
    sessions: HeroSessions,
}

impl Drop for HeroSession {
    fn drop(&mut self) {
        self.sessions.streams().remove(&self.id);
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeroNotice {
    session: String,
    active_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    active: Option<VideoKey>,
    slides: Vec<VideoKey>,
}

impl HeroNotice {
    fn new(session: &HeroSession, rotation: &HeroRotation) -> Self {
        let carousel = rotation.carousel();
        Self {
            session: session.id.to_string(),
            active_index: rotation.active_index(),
            active: carousel.active().map(|slide| slide.key.clone()),
            slides: carousel.slides.iter().map(|slide| slide.key.clone()).collect(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HeroParams {
    pub start: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HeroSelection {
    pub index: usize,
}

/// One `snapshot` event now, then one per published snapshot.
#[tracing::instrument(name = "Catalog events", skip(state))]
pub async fn catalog_events(
    State(state): State<InnerState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    tracing::info!("Catalog event stream opened");
    let handle = state.catalog.clone();

    let stream = futures::stream::unfold((handle, true), |(mut handle, first)| async move {
        let cached = if first {
            handle.state()
        } else {
            handle.changed().await
        };
        let event = Event::default()
            .event("snapshot")
            .json_data(SnapshotNotice::from(&cached));
        Some((event, (handle, false)))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

struct HeroStream {
    handle: CatalogHandle,
    rotation: HeroRotation,
    ticker: Interval,
    selections: mpsc::Receiver<usize>,
    session: HeroSession,
    first: bool,
}

/// Emits the hero `activeIndex` on every rotation tick and every selection.
/// Slides are re-derived whenever the catalog publishes a new snapshot.
/// Selections leave the rotation timer untouched.
#[tracing::instrument(name = "Hero events", skip(state))]
pub async fn hero_events(
    State(state): State<InnerState>,
    Query(params): Query<HeroParams>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let handle = state.catalog.clone();
    let period = state.settings.hero_rotation;

    let slides = HeroCarousel::from_records(&handle.current().records).slides;
    let rotation = HeroRotation::new(slides, params.start.unwrap_or_default());
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let (session, selections) = state.hero_sessions.open();
    tracing::info!(session = %session.id, "Hero event stream opened");

    let initial = HeroStream {
        handle,
        rotation,
        ticker,
        selections,
        session,
        first: true,
    };

    let stream = futures::stream::unfold(initial, |mut hero| async move {
        if !hero.first {
            tokio::select! {
                _ = hero.ticker.tick() => {
                    hero.rotation.tick();
                }
                Some(index) = hero.selections.recv() => {
                    hero.rotation.select(index);
                }
                cached = hero.handle.changed() => {
                    let carousel = HeroCarousel::from_records(&cached.snapshot.records);
                    hero.rotation.replace_slides(carousel.slides);
                }
            }
        }
        hero.first = false;
        let event = Event::default()
            .event("hero")
            .json_data(HeroNotice::new(&hero.session, &hero.rotation));
        Some((event, hero))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Jumps an open hero stream to `index`. Out of range indexes are ignored by
/// the stream.
#[tracing::instrument(name = "Select hero slide", skip(state))]
pub async fn select_hero(
    State(state): State<InnerState>,
    Path(session): Path<String>,
    Json(selection): Json<HeroSelection>,
) -> Result<StatusCode, AppError> {
    let not_found = || AppError::NotFound(format!("Hero stream {} not found", session));
    let sender = Uuid::parse_str(&session)
        .ok()
        .and_then(|id| state.hero_sessions.sender(&id))
        .ok_or_else(not_found)?;
    sender.send(selection.index).await.map_err(|_| not_found())?;
    Ok(StatusCode::ACCEPTED)
}
