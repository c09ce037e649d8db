//! Admin mutation flows: validate a submitted form, then write through the
//! repository. Nothing is written unless the whole form is valid.

use serde::Deserialize;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use url::Url;

use crate::catalog::model::{
    canonicalize_link, Language, StoredVideo, VideoKey, VideoPatch, VideoRecord, VideoType,
};
use crate::errors::AppError;
use crate::repository::{CatalogRepository, RepositoryError};

const MUTATION_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoForm {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default, alias = "thumbnail")]
    pub thumbnail_url: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub language: Option<String>,
    pub series: Option<String>,
}

/// Every field is optional. An empty `series` removes the series.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoUpdateForm {
    pub title: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    #[serde(alias = "thumbnail")]
    pub thumbnail_url: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub language: Option<String>,
    pub series: Option<String>,
}

#[derive(Debug, Default)]
struct FieldErrors(HashMap<String, Vec<String>>);

impl FieldErrors {
    fn add(&mut self, field: &str, message: impl Into<String>) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    fn into_result(self) -> Result<(), AppError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::ValidationErrors(self.0))
        }
    }
}

fn check_title(errors: &mut FieldErrors, title: &str) -> String {
    let title = title.trim();
    if title.is_empty() {
        errors.add("title", "Title is required");
    }
    title.to_string()
}

fn check_url(errors: &mut FieldErrors, field: &str, label: &str, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.add(field, format!("{} is required", label));
    } else if let Err(e) = Url::parse(raw) {
        errors.add(field, format!("{} is not a valid URL: {}", label, e));
    }
    raw.to_string()
}

fn check_type(errors: &mut FieldErrors, raw: &str) -> Option<VideoType> {
    if raw.trim().is_empty() {
        errors.add("type", "Type is required");
        return None;
    }
    match raw.parse() {
        Ok(kind) => Some(kind),
        Err(e) => {
            errors.add("type", format!("Type must be one of the catalog types ({})", e));
            None
        }
    }
}

fn clean_series(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl VideoForm {
    /// The record to persist. `created_at` is stamped with `now_ms`.
    pub fn validate(&self, now_ms: i64) -> Result<StoredVideo, AppError> {
        let mut errors = FieldErrors::default();
        let title = check_title(&mut errors, &self.title);
        let link = check_url(&mut errors, "link", "Link", &self.link);
        let thumbnail_url =
            check_url(&mut errors, "thumbnailUrl", "Thumbnail", &self.thumbnail_url);
        let kind = check_type(&mut errors, &self.kind);
        errors.into_result()?;

        Ok(StoredVideo {
            title,
            description: self.description.trim().to_string(),
            link: canonicalize_link(&link),
            thumbnail_url,
            kind: kind.map(|k| k.as_str().to_string()),
            language: Some(Language::from_raw(self.language.as_deref()).as_str().to_string()),
            series: clean_series(self.series.as_deref()),
            created_at: Some(now_ms),
        })
    }
}

impl VideoUpdateForm {
    pub fn validate(&self) -> Result<VideoPatch, AppError> {
        let mut errors = FieldErrors::default();

        let title = self.title.as_deref().map(|t| check_title(&mut errors, t));
        let link = self
            .link
            .as_deref()
            .map(|l| canonicalize_link(&check_url(&mut errors, "link", "Link", l)));
        let thumbnail_url = self
            .thumbnail_url
            .as_deref()
            .map(|t| check_url(&mut errors, "thumbnailUrl", "Thumbnail", t));
        let kind = match self.kind.as_deref() {
            Some(raw) => check_type(&mut errors, raw),
            None => None,
        };
        errors.into_result()?;

        let patch = VideoPatch {
            title,
            description: self.description.as_ref().map(|d| d.trim().to_string()),
            link,
            thumbnail_url,
            kind,
            language: self
                .language
                .as_deref()
                .map(|l| Language::from_raw(Some(l))),
            series: self.series.as_deref().map(|s| clean_series(Some(s))),
        };

        if patch.is_empty() {
            return Err(AppError::Validation("Nothing to update".to_string()));
        }
        Ok(patch)
    }
}

async fn with_timeout<T>(
    operation: impl Future<Output = Result<T, RepositoryError>>,
) -> Result<T, AppError> {
    Ok(tokio::time::timeout(MUTATION_TIMEOUT, operation).await??)
}

fn record_path(path: &str, key: &VideoKey) -> String {
    format!("{}/{}", path.trim_end_matches('/'), key)
}

async fn load(
    repository: &dyn CatalogRepository,
    path: &str,
    key: &VideoKey,
) -> Result<VideoRecord, AppError> {
    if !key.is_valid() {
        tracing::warn!(key = ?key.as_str(), "Refusing malformed video key");
        return Err(AppError::NotFound(format!("Video {} not found", key)));
    }
    let value = with_timeout(repository.read_value(&record_path(path, key)))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Video {} not found", key)))?;
    let stored: StoredVideo = serde_json::from_value(value).map_err(RepositoryError::from)?;
    Ok(VideoRecord::from_stored(key.clone(), stored))
}

#[tracing::instrument(name = "Create video", skip(repository, form), fields(title = %form.title))]
pub async fn create_video(
    repository: &dyn CatalogRepository,
    path: &str,
    form: &VideoForm,
) -> Result<VideoRecord, AppError> {
    let stored = form.validate(chrono::Utc::now().timestamp_millis())?;
    let key = with_timeout(repository.create(path, &stored)).await?;
    tracing::info!(key = %key, "Video created");
    Ok(VideoRecord::from_stored(key, stored))
}

#[tracing::instrument(name = "Update video", skip(repository, form))]
pub async fn update_video(
    repository: &dyn CatalogRepository,
    path: &str,
    key: &VideoKey,
    form: &VideoUpdateForm,
) -> Result<VideoRecord, AppError> {
    let patch = form.validate()?;
    load(repository, path, key).await?;
    with_timeout(repository.update(path, key, &patch)).await?;
    tracing::info!("Video updated");
    load(repository, path, key).await
}

#[tracing::instrument(name = "Delete video", skip(repository))]
pub async fn delete_video(
    repository: &dyn CatalogRepository,
    path: &str,
    key: &VideoKey,
) -> Result<(), AppError> {
    load(repository, path, key).await?;
    with_timeout(repository.delete(path, key)).await?;
    tracing::info!("Video deleted");
    Ok(())
}
