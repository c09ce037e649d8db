//! Catalog record model
//!
//! `StoredVideo` is the wire form kept under `videos/{key}` in the realtime
//! database. `VideoRecord` is the normalized form every view works with: the
//! language is always one of the four known values, the link is always an
//! embeddable URL and an unknown `type` is carried as `None`.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const EMBED_BASE_URL: &str = "https://www.youtube.com/embed/";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoType {
    Movie,
    Episode,
    Horror,
    Clip,
    Trailer,
    Action,
    Song,
}

impl VideoType {
    pub const ALL: [VideoType; 7] = [
        VideoType::Movie,
        VideoType::Episode,
        VideoType::Horror,
        VideoType::Clip,
        VideoType::Trailer,
        VideoType::Action,
        VideoType::Song,
    ];

    /// Dashboard carousel order. Episodes are shown per series, not here.
    pub const CATEGORIES: [VideoType; 6] = [
        VideoType::Movie,
        VideoType::Horror,
        VideoType::Clip,
        VideoType::Trailer,
        VideoType::Action,
        VideoType::Song,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Movie => "Movie",
            VideoType::Episode => "Episode",
            VideoType::Horror => "Horror",
            VideoType::Clip => "Clip",
            VideoType::Trailer => "Trailer",
            VideoType::Action => "Action",
            VideoType::Song => "Song",
        }
    }
}

impl fmt::Display for VideoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        VideoType::ALL
            .into_iter()
            .find(|kind| kind.as_str() == trimmed)
            .ok_or_else(|| UnknownVariant {
                kind: "video type",
                value: s.to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    Telugu,
    Hindi,
    Tamil,
    #[default]
    Other,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Telugu,
        Language::Hindi,
        Language::Tamil,
        Language::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Telugu => "Telugu",
            Language::Hindi => "Hindi",
            Language::Tamil => "Tamil",
            Language::Other => "Other",
        }
    }

    /// Maps any raw value onto the closed set. Absent, blank and unrecognized
    /// values all become `Other`.
    pub fn from_raw(raw: Option<&str>) -> Language {
        match raw.map(str::trim) {
            Some("Telugu") => Language::Telugu,
            Some("Hindi") => Language::Hindi,
            Some("Tamil") => Language::Tamil,
            _ => Language::Other,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Language::ALL
            .into_iter()
            .find(|language| language.as_str() == trimmed)
            .ok_or_else(|| UnknownVariant {
                kind: "language",
                value: s.to_string(),
            })
    }
}

/// Opaque repository key. Records are addressed by key only, never by their
/// position in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoKey(String);

impl VideoKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key addresses exactly one child of a collection.
    pub fn is_valid(&self) -> bool {
        is_valid_segment(&self.0)
    }
}

/// A single database path segment: not empty, no control characters and
/// none of the characters the database reserves for paths and queries.
pub fn is_valid_segment(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.chars().any(|c| {
            c.is_control() || matches!(c, '/' | '.' | '#' | '$' | '[' | ']' | '?')
        })
}

impl fmt::Display for VideoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VideoKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for VideoKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A record exactly as it is persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredVideo {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    // early dashboard builds wrote `thumbnail`
    #[serde(default, alias = "thumbnail")]
    pub thumbnail_url: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

/// Partial update sent to the repository. `None` leaves a field untouched,
/// `series: Some(None)` removes the series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<VideoType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<Option<String>>,
}

impl VideoPatch {
    pub fn is_empty(&self) -> bool {
        *self == VideoPatch::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub key: VideoKey,
    pub title: String,
    pub description: String,
    pub link: String,
    pub thumbnail_url: String,
    #[serde(rename = "type")]
    pub kind: Option<VideoType>,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl VideoRecord {
    /// Read path normalization. Runs on every record coming out of the
    /// repository, so legacy rows are handled the same as fresh ones.
    pub fn from_stored(key: VideoKey, stored: StoredVideo) -> Self {
        let stored = normalize_language(stored);
        let kind = stored
            .kind
            .as_deref()
            .and_then(|raw| raw.parse::<VideoType>().ok());
        let series = stored
            .series
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Self {
            key,
            title: stored.title,
            description: stored.description,
            link: canonicalize_link(&stored.link),
            thumbnail_url: stored.thumbnail_url,
            kind,
            language: Language::from_raw(stored.language.as_deref()),
            series,
            created_at: stored.created_at,
        }
    }

    pub fn is_episode(&self) -> bool {
        self.kind == Some(VideoType::Episode)
    }
}

/// Rewrites `language` onto the closed set. Idempotent.
pub fn normalize_language(mut record: StoredVideo) -> StoredVideo {
    let language = Language::from_raw(record.language.as_deref());
    record.language = Some(language.as_str().to_string());
    record
}

/// Turns YouTube watch and share links into the embeddable form. Anything
/// else, including links that are already embeds, is returned unchanged.
pub fn canonicalize_link(url: &str) -> String {
    if url.contains("/embed/") {
        return url.to_string();
    }

    if let Some((_, rest)) = url.split_once("watch?v=") {
        let id = rest.split('&').next().unwrap_or_default();
        return embed_or_original(url, id);
    }

    if let Some((_, rest)) = url.split_once("youtu.be/") {
        let id = rest.split('?').next().unwrap_or_default();
        return embed_or_original(url, id);
    }

    url.to_string()
}

fn embed_or_original(url: &str, id: &str) -> String {
    let id = id.trim();
    if id.is_empty() {
        url.to_string()
    } else {
        format!("{}{}", EMBED_BASE_URL, id)
    }
}
