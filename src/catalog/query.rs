//! Catalog query engine
//!
//! Every page derives its lists from these functions. They are pure: they take
//! one snapshot of records and return new, owned sequences in a deterministic
//! order. Composition is conjunctive (text AND type AND language).

use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;

use super::model::{Language, UnknownVariant, VideoKey, VideoRecord, VideoType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(VideoType),
}

impl FromStr for TypeFilter {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "All" => Ok(TypeFilter::All),
            other => other.parse().map(TypeFilter::Only),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageFilter {
    #[default]
    All,
    Only(Language),
}

impl FromStr for LanguageFilter {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "All" => Ok(LanguageFilter::All),
            other => other.parse().map(LanguageFilter::Only),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySection {
    #[serde(rename = "type")]
    pub kind: VideoType,
    pub members: Vec<VideoRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesGroup {
    pub display_name: String,
    pub normalized_key: String,
    pub episodes: Vec<VideoRecord>,
}

pub fn filter_by_text(records: &[VideoRecord], query: &str) -> Vec<VideoRecord> {
    let needle = query.to_lowercase();
    records
        .iter()
        .filter(|r| needle.is_empty() || r.title.to_lowercase().contains(&needle))
        .cloned()
        .collect()
}

pub fn filter_by_type(records: &[VideoRecord], filter: TypeFilter) -> Vec<VideoRecord> {
    records
        .iter()
        .filter(|r| match filter {
            TypeFilter::All => true,
            TypeFilter::Only(kind) => r.kind == Some(kind),
        })
        .cloned()
        .collect()
}

/// `Only(Other)` matches everything that is not Telugu, Hindi or Tamil. Since
/// records are normalized on read that is plain equality with `Other`.
pub fn filter_by_language(records: &[VideoRecord], filter: LanguageFilter) -> Vec<VideoRecord> {
    records
        .iter()
        .filter(|r| match filter {
            LanguageFilter::All => true,
            LanguageFilter::Only(language) => r.language == language,
        })
        .cloned()
        .collect()
}

/// Buckets records per type, in the order of `types`.
///
/// `Episode` never gets a bucket even when listed: episodes are presented
/// through [`group_by_series`]. Records without a type land in no bucket.
pub fn group_by_type(records: &[VideoRecord], types: &[VideoType]) -> Vec<CategorySection> {
    types
        .iter()
        .copied()
        .filter(|kind| *kind != VideoType::Episode)
        .map(|kind| CategorySection {
            kind,
            members: records
                .iter()
                .filter(|r| r.kind == Some(kind))
                .cloned()
                .collect(),
        })
        .collect()
}

/// Normalized series key of an episode: its `series`, else its own title.
pub fn series_key(record: &VideoRecord) -> String {
    normalize_series_name(series_display_name(record))
}

pub fn normalize_series_name(name: &str) -> String {
    name.trim().to_lowercase()
}

fn series_display_name(record: &VideoRecord) -> &str {
    record
        .series
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(&record.title)
        .trim()
}

pub fn group_by_series(records: &[VideoRecord]) -> Vec<SeriesGroup> {
    let mut groups: Vec<SeriesGroup> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for record in records.iter().filter(|r| r.is_episode()) {
        let key = series_key(record);
        match positions.get(&key) {
            Some(&position) => groups[position].episodes.push(record.clone()),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push(SeriesGroup {
                    display_name: series_display_name(record).to_string(),
                    normalized_key: key,
                    episodes: vec![record.clone()],
                });
            }
        }
    }

    groups
}

/// The series whose normalized key matches `name`, if any.
pub fn find_series(records: &[VideoRecord], name: &str) -> Option<SeriesGroup> {
    let wanted = normalize_series_name(name);
    group_by_series(records)
        .into_iter()
        .find(|group| group.normalized_key == wanted)
}

/// Case-insensitive starts-with on the title. An empty prefix is browse mode
/// and returns the first `limit` records.
pub fn prefix_search(records: &[VideoRecord], prefix: &str, limit: usize) -> Vec<VideoRecord> {
    let prefix = prefix.to_lowercase();
    records
        .iter()
        .filter(|r| prefix.is_empty() || r.title.to_lowercase().starts_with(&prefix))
        .take(limit)
        .cloned()
        .collect()
}

pub fn title_suggestions(records: &[VideoRecord], prefix: &str, limit: usize) -> Vec<String> {
    if prefix.is_empty() {
        return Vec::new();
    }
    prefix_search(records, prefix, limit)
        .into_iter()
        .map(|r| r.title)
        .collect()
}

/// Most recent `n` records of `kind`, newest first. A missing `createdAt`
/// counts as the oldest possible value.
pub fn latest_n(records: &[VideoRecord], kind: VideoType, n: usize) -> Vec<VideoRecord> {
    let mut matching: Vec<&VideoRecord> = records.iter().filter(|r| r.kind == Some(kind)).collect();
    // stable, and `None < Some(_)`
    matching.sort_by_key(|r| r.created_at);
    matching.into_iter().rev().take(n).cloned().collect()
}

/// "More like this": same type, never the subject itself (compared by key).
pub fn related_by_type(
    records: &[VideoRecord],
    subject: &VideoRecord,
    n: usize,
) -> Vec<VideoRecord> {
    let Some(kind) = subject.kind else {
        return Vec::new();
    };
    records
        .iter()
        .filter(|r| r.kind == Some(kind) && r.key != subject.key)
        .take(n)
        .cloned()
        .collect()
}

pub fn find_by_key<'a>(records: &'a [VideoRecord], key: &VideoKey) -> Option<&'a VideoRecord> {
    records.iter().find(|r| &r.key == key)
}

/// The episode after `subject` in its series, by key position.
pub fn next_in_series(records: &[VideoRecord], subject: &VideoRecord) -> Option<VideoRecord> {
    if !subject.is_episode() {
        return None;
    }
    let key = series_key(subject);
    let group = group_by_series(records)
        .into_iter()
        .find(|group| group.normalized_key == key)?;
    let position = group.episodes.iter().position(|e| e.key == subject.key)?;
    group.episodes.get(position + 1).cloned()
}
