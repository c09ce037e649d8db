//! Hero carousel selection and rotation.

use serde::Serialize;

use super::model::{VideoRecord, VideoType};
use super::query::latest_n;

pub const HERO_SLIDE_COUNT: usize = 5;
pub const DEFAULT_ROTATION_MS: u64 = 6000;

pub fn next_index(slide_count: usize, active: usize) -> usize {
    if slide_count == 0 {
        0
    } else {
        (active + 1) % slide_count
    }
}

pub fn clamp_index(slide_count: usize, active: usize) -> usize {
    if active < slide_count {
        active
    } else {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeroCarousel {
    pub slides: Vec<VideoRecord>,
    pub active_index: usize,
}

impl HeroCarousel {
    pub fn from_records(records: &[VideoRecord]) -> Self {
        Self {
            slides: latest_n(records, VideoType::Episode, HERO_SLIDE_COUNT),
            active_index: 0,
        }
    }

    pub fn with_active(mut self, active: usize) -> Self {
        self.active_index = clamp_index(self.slides.len(), active);
        self
    }

    pub fn active(&self) -> Option<&VideoRecord> {
        self.slides.get(self.active_index)
    }

    pub fn next_index(&self) -> usize {
        next_index(self.slides.len(), self.active_index)
    }
}

/// Stateful rotation driven by an external timer.
#[derive(Debug, Clone)]
pub struct HeroRotation {
    carousel: HeroCarousel,
}

impl HeroRotation {
    pub fn new(slides: Vec<VideoRecord>, start: usize) -> Self {
        Self {
            carousel: HeroCarousel {
                slides,
                active_index: 0,
            }
            .with_active(start),
        }
    }

    pub fn carousel(&self) -> &HeroCarousel {
        &self.carousel
    }

    pub fn active_index(&self) -> usize {
        self.carousel.active_index
    }

    pub fn tick(&mut self) -> usize {
        self.carousel.active_index = self.carousel.next_index();
        self.carousel.active_index
    }

    /// Jumps straight to `index`. Out of range selections are ignored.
    pub fn select(&mut self, index: usize) -> usize {
        if index < self.carousel.slides.len() {
            self.carousel.active_index = index;
        }
        self.carousel.active_index
    }

    pub fn replace_slides(&mut self, slides: Vec<VideoRecord>) {
        let active = clamp_index(slides.len(), self.carousel.active_index);
        self.carousel = HeroCarousel {
            slides,
            active_index: active,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::query::tests::{episode, video};

    fn dated(key: &str, created_at: i64) -> VideoRecord {
        let mut record = episode(key, None, key);
        record.created_at = Some(created_at);
        record
    }

    #[test]
    fn index_arithmetic() {
        assert_eq!(next_index(0, 0), 0);
        assert_eq!(next_index(5, 0), 1);
        assert_eq!(next_index(5, 4), 0);
        assert_eq!(clamp_index(3, 2), 2);
        assert_eq!(clamp_index(3, 3), 0);
        assert_eq!(clamp_index(0, 0), 0);
    }

    #[test]
    fn auto_advance_sequence_is_deterministic() {
        let slides: Vec<VideoRecord> = (1..=3).map(|i| dated(&i.to_string(), i)).collect();
        let mut rotation = HeroRotation::new(slides, 1);
        let sequence: Vec<usize> = (0..6).map(|_| rotation.tick()).collect();
        assert_eq!(sequence, vec![2, 0, 1, 2, 0, 1]);

        let mut empty = HeroRotation::new(Vec::new(), 4);
        assert_eq!(empty.tick(), 0);
        assert_eq!(HeroRotation::new(vec![dated("x", 1)], 9).active_index(), 0);
    }

    #[test]
    fn hero_takes_latest_five_episodes() {
        let mut records: Vec<VideoRecord> = (1..=7).map(|i| dated(&format!("e{i}"), i)).collect();
        records.push(video("m", Some(VideoType::Movie), "movie"));

        let hero = HeroCarousel::from_records(&records);
        let keys: Vec<&str> = hero.slides.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["e7", "e6", "e5", "e4", "e3"]);
        assert_eq!(hero.active_index, 0);
        assert_eq!(hero.clone().with_active(9).active_index, 0);
        assert_eq!(hero.with_active(4).next_index(), 0);
    }

    #[test]
    fn empty_carousel_has_no_active_slide() {
        let hero = HeroCarousel::from_records(&[]);
        assert!(hero.active().is_none());
        assert_eq!(hero.next_index(), 0);
    }

    #[test]
    fn rotation_ticks_selects_and_clamps() {
        let slides: Vec<VideoRecord> = (1..=3).map(|i| dated(&i.to_string(), i)).collect();
        let mut rotation = HeroRotation::new(slides.clone(), 1);

        assert_eq!(rotation.tick(), 2);
        assert_eq!(rotation.tick(), 0);
        assert_eq!(rotation.select(2), 2);
        assert_eq!(rotation.select(7), 2);
        assert_eq!(rotation.tick(), 0);

        rotation.select(2);
        rotation.replace_slides(slides[..2].to_vec());
        assert_eq!(rotation.active_index(), 0);

        rotation.select(1);
        rotation.replace_slides(slides);
        assert_eq!(rotation.active_index(), 1);
        assert_eq!(rotation.carousel().slides.len(), 3);
    }
}
