//! Page level view composition.
//!
//! Each function assembles one render-ready structure out of a single
//! snapshot. Nothing here talks to the repository.

use serde::{Deserialize, Serialize};

use super::carousel::HeroCarousel;
use super::model::{UnknownVariant, VideoKey, VideoRecord, VideoType};
use super::query::{
    filter_by_language, filter_by_text, filter_by_type, find_by_key, find_series,
    group_by_series, group_by_type, next_in_series, prefix_search, related_by_type,
    title_suggestions, CategorySection, LanguageFilter, SeriesGroup, TypeFilter,
};

pub const SEARCH_RESULT_LIMIT: usize = 15;
pub const SUGGESTION_LIMIT: usize = 6;
pub const RELATED_LIMIT: usize = 6;

/// Conjunctive text/type/language filters shared by the admin list and the
/// dashboard.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CatalogFilters {
    pub query: String,
    pub kind: TypeFilter,
    pub language: LanguageFilter,
}

impl CatalogFilters {
    pub fn parse(
        query: Option<&str>,
        kind: Option<&str>,
        language: Option<&str>,
    ) -> Result<Self, UnknownVariant> {
        Ok(Self {
            query: query.unwrap_or_default().trim().to_string(),
            kind: kind.unwrap_or_default().parse()?,
            language: language.unwrap_or_default().parse()?,
        })
    }

    pub fn apply(&self, records: &[VideoRecord]) -> Vec<VideoRecord> {
        let matched = filter_by_text(records, &self.query);
        let matched = filter_by_type(&matched, self.kind);
        filter_by_language(&matched, self.language)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminListView {
    pub total: usize,
    pub videos: Vec<VideoRecord>,
}

pub fn admin_list(records: &[VideoRecord], filters: &CatalogFilters) -> AdminListView {
    AdminListView {
        total: records.len(),
        videos: filters.apply(records),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub hero: HeroCarousel,
    pub hero_next_index: usize,
    pub rotation_ms: u64,
    pub series: Vec<SeriesGroup>,
    pub categories: Vec<CategorySection>,
    pub is_empty: bool,
}

/// The hero always comes from the unfiltered catalog; the filters only narrow
/// the series and category sections below it.
pub fn dashboard(
    records: &[VideoRecord],
    filters: &CatalogFilters,
    hero_index: usize,
    rotation_ms: u64,
) -> DashboardView {
    let hero = HeroCarousel::from_records(records).with_active(hero_index);
    let filtered = filters.apply(records);

    let categories: Vec<CategorySection> = group_by_type(&filtered, &VideoType::CATEGORIES)
        .into_iter()
        .filter(|section| !section.members.is_empty())
        .collect();

    DashboardView {
        hero_next_index: hero.next_index(),
        hero,
        rotation_ms,
        series: group_by_series(&filtered),
        categories,
        is_empty: filtered.is_empty(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Latest,
    Results,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchView {
    pub mode: SearchMode,
    pub prefix: String,
    pub results: Vec<VideoRecord>,
    pub suggestions: Vec<String>,
}

/// `window` is the ordered subscription, ascending by `createdAt`. Results
/// are presented newest first.
pub fn search(window: &[VideoRecord], prefix: &str) -> SearchView {
    let newest_first: Vec<VideoRecord> = window.iter().rev().cloned().collect();
    let prefix = prefix.trim();

    SearchView {
        mode: if prefix.is_empty() {
            SearchMode::Latest
        } else {
            SearchMode::Results
        },
        prefix: prefix.to_string(),
        results: prefix_search(&newest_first, prefix, SEARCH_RESULT_LIMIT),
        suggestions: title_suggestions(&newest_first, prefix, SUGGESTION_LIMIT),
    }
}

/// Episode cursor for the series page. It only moves on an explicit signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesPlayback {
    episode_count: usize,
    current: usize,
}

impl SeriesPlayback {
    pub fn new(episode_count: usize, current: usize) -> Self {
        Self {
            episode_count,
            current: if current < episode_count { current } else { 0 },
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn next_index(&self) -> Option<usize> {
        let next = self.current + 1;
        (next < self.episode_count).then_some(next)
    }

    /// The current episode ended. Advances when there is a next one.
    pub fn finished(&mut self) -> Option<usize> {
        self.next()
    }

    pub fn next(&mut self) -> Option<usize> {
        let next = self.next_index()?;
        self.current = next;
        Some(next)
    }

    pub fn select(&mut self, index: usize) -> bool {
        if index < self.episode_count {
            self.current = index;
            true
        } else {
            false
        }
    }
}

/// Explicit playback signal sent by the series page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackSignal {
    /// The current episode played to the end.
    Finished,
    Next,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesView {
    pub series: SeriesGroup,
    pub current_episode_index: usize,
    pub current_episode: VideoRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_episode_index: Option<usize>,
}

/// `episode` is selected first, then `signal` is applied to it. An episode
/// out of range falls back to the first one.
pub fn series(
    records: &[VideoRecord],
    name: &str,
    episode: usize,
    signal: Option<PlaybackSignal>,
) -> Option<SeriesView> {
    let group = find_series(records, name)?;
    let mut playback = SeriesPlayback::new(group.episodes.len(), 0);
    playback.select(episode);
    match signal {
        Some(PlaybackSignal::Finished) => {
            playback.finished();
        }
        Some(PlaybackSignal::Next) => {
            playback.next();
        }
        None => {}
    }
    let current_episode = group.episodes.get(playback.current())?.clone();

    Some(SeriesView {
        current_episode_index: playback.current(),
        next_episode_index: playback.next_index(),
        current_episode,
        series: group,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchView {
    pub video: VideoRecord,
    pub related: Vec<VideoRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_episode: Option<VideoRecord>,
}

pub fn watch(records: &[VideoRecord], key: &VideoKey) -> Option<WatchView> {
    let video = find_by_key(records, key)?.clone();

    Some(WatchView {
        related: related_by_type(records, &video, RELATED_LIMIT),
        next_episode: next_in_series(records, &video),
        video,
    })
}
