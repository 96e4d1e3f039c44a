//! Scene discovery and classification.
//!
//! Normalizes the loosely-typed scene list reported by a [`SlideSource`]
//! into strongly-typed [`Scene`] records, groups pyramid levels, and
//! validates level numbering. Malformed entries are rejected here rather
//! than downstream.
use thiserror::Error;
use tracing::info;

use crate::core::metadata::PhysicalPixelSize;
use crate::io::source::{SlideSource, SourceError};
use crate::types::{PixelType, SceneCategory};

/// Canonical plane dimensions: planes x channels x height x width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneShape {
    pub planes: usize,
    pub channels: usize,
    pub height: u64,
    pub width: u64,
}

impl SceneShape {
    pub fn pixel_count(&self) -> u64 {
        self.height * self.width
    }

    /// Bytes of one fully materialized plane set (all planes, all channels).
    pub fn total_bytes(&self, pixel_type: PixelType) -> u128 {
        self.pixel_count() as u128
            * self.planes as u128
            * self.channels as u128
            * pixel_type.bytes_per_sample() as u128
    }
}

impl std::fmt::Display for SceneShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}x{}x{}",
            self.planes, self.channels, self.height, self.width
        )
    }
}

/// One classified scene of the source file.
#[derive(Debug, Clone)]
pub struct Scene {
    /// Stable index assigned by the source.
    pub scene_index: usize,
    /// Raw scene name as reported by the source.
    pub name: String,
    pub category: SceneCategory,
    /// 0 = highest resolution; derived from the ` #N` name suffix.
    pub pyramid_level: u32,
    pub shape: SceneShape,
    pub pixel_type: PixelType,
    pub physical_pixel_size: Option<PhysicalPixelSize>,
    /// Key grouping the levels of one pyramid. Unknown scenes never share
    /// a key, even when their base names coincide.
    series_key: String,
}

impl Scene {
    pub fn series_key(&self) -> &str {
        &self.series_key
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("inconsistent pyramid numbering in series `{series}`: {detail}")]
    Inconsistency { series: String, detail: String },

    #[error("malformed scene entry {index} (`{name}`): {detail}")]
    MalformedScene {
        index: usize,
        name: String,
        detail: String,
    },

    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

/// Ordered, validated view of every scene the source reports.
#[derive(Debug, Clone)]
pub struct SceneCatalog {
    scenes: Vec<Scene>,
}

impl SceneCatalog {
    /// Enumerate the source (exactly once) and classify its scenes.
    pub fn from_source(source: &dyn SlideSource) -> Result<Self, CatalogError> {
        let raw = source.enumerate()?;
        let file_name = source
            .source_path()
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = source
            .source_path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut scenes = Vec::with_capacity(raw.len());
        for entry in raw {
            if entry.shape.width == 0 || entry.shape.height == 0 {
                return Err(CatalogError::MalformedScene {
                    index: entry.index,
                    name: entry.name,
                    detail: "zero-sized spatial dimensions".into(),
                });
            }
            if entry.shape.channels == 0 || entry.shape.planes == 0 {
                return Err(CatalogError::MalformedScene {
                    index: entry.index,
                    name: entry.name,
                    detail: "zero channel or plane count".into(),
                });
            }

            let (base, suffix) = split_level_suffix(&entry.name);
            let lowered = entry.name.to_lowercase();
            let (category, level, series_key) = if base == file_name || base == stem {
                (SceneCategory::MainImage, suffix.unwrap_or(0), base.to_string())
            } else if lowered.contains("overview") {
                (SceneCategory::Overview, suffix.unwrap_or(0), base.to_string())
            } else if lowered.contains("label") {
                (SceneCategory::Label, suffix.unwrap_or(0), base.to_string())
            } else if lowered.contains("macro") {
                (SceneCategory::Macro, suffix.unwrap_or(0), base.to_string())
            } else {
                // Unknown scenes stay selectable but are never merged into a
                // pyramid, including the identical-base-name case.
                (
                    SceneCategory::Unknown,
                    0,
                    format!("{}#unknown-{}", entry.name, entry.index),
                )
            };

            scenes.push(Scene {
                scene_index: entry.index,
                name: entry.name,
                category,
                pyramid_level: level,
                shape: entry.shape,
                pixel_type: entry.pixel_type,
                physical_pixel_size: entry.physical_pixel_size,
                series_key,
            });
        }

        let catalog = SceneCatalog { scenes };
        catalog.validate_series()?;
        info!(
            "catalog: {} scene(s), {} series",
            catalog.scenes.len(),
            catalog.series_keys().len()
        );
        Ok(catalog)
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }

    pub fn scene(&self, scene_index: usize) -> Option<&Scene> {
        self.scenes.iter().find(|s| s.scene_index == scene_index)
    }

    /// All members of the series containing `scene`, sorted by level.
    pub fn series_of(&self, scene: &Scene) -> Vec<&Scene> {
        let mut members: Vec<&Scene> = self
            .scenes
            .iter()
            .filter(|s| s.category == scene.category && s.series_key == scene.series_key)
            .collect();
        members.sort_by_key(|s| s.pyramid_level);
        members
    }

    /// Independent series (pyramids) of one category, each sorted by level.
    pub fn series_by_category(&self, category: SceneCategory) -> Vec<Vec<&Scene>> {
        let mut keys: Vec<&str> = Vec::new();
        for s in self.scenes.iter().filter(|s| s.category == category) {
            if !keys.contains(&s.series_key.as_str()) {
                keys.push(&s.series_key);
            }
        }
        keys.into_iter()
            .map(|key| {
                let mut members: Vec<&Scene> = self
                    .scenes
                    .iter()
                    .filter(|s| s.category == category && s.series_key == key)
                    .collect();
                members.sort_by_key(|s| s.pyramid_level);
                members
            })
            .collect()
    }

    fn series_keys(&self) -> Vec<(SceneCategory, &str)> {
        let mut keys: Vec<(SceneCategory, &str)> = Vec::new();
        for s in &self.scenes {
            if !keys.contains(&(s.category, s.series_key.as_str())) {
                keys.push((s.category, &s.series_key));
            }
        }
        keys
    }

    /// Levels must be contiguous from 0 and strictly decreasing in pixel
    /// count within every series.
    fn validate_series(&self) -> Result<(), CatalogError> {
        for (category, key) in self.series_keys() {
            let mut members: Vec<&Scene> = self
                .scenes
                .iter()
                .filter(|s| s.category == category && s.series_key == key)
                .collect();
            members.sort_by_key(|s| s.pyramid_level);

            for (expected, member) in members.iter().enumerate() {
                let level = member.pyramid_level as usize;
                if level < expected {
                    return Err(CatalogError::Inconsistency {
                        series: key.to_string(),
                        detail: format!("duplicate level {}", level),
                    });
                }
                if level > expected {
                    return Err(CatalogError::Inconsistency {
                        series: key.to_string(),
                        detail: format!("missing level {} (found {})", expected, level),
                    });
                }
            }
            for pair in members.windows(2) {
                if pair[1].shape.pixel_count() >= pair[0].shape.pixel_count() {
                    return Err(CatalogError::Inconsistency {
                        series: key.to_string(),
                        detail: format!(
                            "level {} ({} px) is not smaller than level {} ({} px)",
                            pair[1].pyramid_level,
                            pair[1].shape.pixel_count(),
                            pair[0].pyramid_level,
                            pair[0].shape.pixel_count()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Split a trailing ` #N` numeric suffix off a scene name.
/// `"slide.vsi #2"` -> `("slide.vsi", Some(2))`; names with non-numeric
/// suffixes (`"slide.vsi #overview"`) are returned whole.
fn split_level_suffix(name: &str) -> (&str, Option<u32>) {
    if let Some(pos) = name.rfind(" #") {
        let suffix = &name[pos + 2..];
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(n) = suffix.parse::<u32>() {
                return (&name[..pos], Some(n));
            }
        }
    }
    (name, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::memory::{MemoryScene, MemorySource};

    fn source(scenes: Vec<MemoryScene>) -> MemorySource {
        MemorySource::new("slide.vsi", scenes)
    }

    #[test]
    fn suffix_splitting() {
        assert_eq!(split_level_suffix("slide.vsi"), ("slide.vsi", None));
        assert_eq!(split_level_suffix("slide.vsi #2"), ("slide.vsi", Some(2)));
        assert_eq!(
            split_level_suffix("slide.vsi #overview"),
            ("slide.vsi #overview", None)
        );
        assert_eq!(split_level_suffix("x #12"), ("x", Some(12)));
    }

    #[test]
    fn classifies_main_pyramid_and_auxiliaries() {
        let src = source(vec![
            MemoryScene::ramp_u8("slide.vsi", 1, 3, 64, 64),
            MemoryScene::ramp_u8("slide.vsi #1", 1, 3, 32, 32),
            MemoryScene::ramp_u8("slide.vsi #2", 1, 3, 16, 16),
            MemoryScene::ramp_u8("slide.vsi #overview", 1, 3, 8, 8),
            MemoryScene::ramp_u8("slide.vsi #label", 1, 3, 4, 4),
        ]);
        let catalog = SceneCatalog::from_source(&src).unwrap();

        let main: Vec<_> = catalog
            .scenes()
            .iter()
            .filter(|s| s.category == SceneCategory::MainImage)
            .collect();
        assert_eq!(main.len(), 3);
        assert_eq!(main[0].pyramid_level, 0);
        assert_eq!(main[2].pyramid_level, 2);

        assert_eq!(
            catalog.scene(3).unwrap().category,
            SceneCategory::Overview
        );
        assert_eq!(catalog.scene(4).unwrap().category, SceneCategory::Label);
    }

    #[test]
    fn unmatched_scene_is_unknown_but_listed() {
        let src = source(vec![
            MemoryScene::ramp_u8("slide.vsi", 1, 1, 16, 16),
            MemoryScene::ramp_u8("20x_BF_01", 1, 1, 8, 8),
        ]);
        let catalog = SceneCatalog::from_source(&src).unwrap();
        let unknown = catalog.scene(1).unwrap();
        assert_eq!(unknown.category, SceneCategory::Unknown);
        assert_eq!(unknown.pyramid_level, 0);
    }

    #[test]
    fn identical_unknown_names_stay_independent() {
        let src = source(vec![
            MemoryScene::ramp_u8("region", 1, 1, 16, 16),
            MemoryScene::ramp_u8("region", 1, 1, 16, 16),
        ]);
        let catalog = SceneCatalog::from_source(&src).unwrap();
        let series = catalog.series_by_category(SceneCategory::Unknown);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn gap_in_levels_is_inconsistency() {
        let src = source(vec![
            MemoryScene::ramp_u8("slide.vsi", 1, 1, 64, 64),
            MemoryScene::ramp_u8("slide.vsi #2", 1, 1, 16, 16),
        ]);
        let err = SceneCatalog::from_source(&src).unwrap_err();
        assert!(matches!(err, CatalogError::Inconsistency { .. }));
    }

    #[test]
    fn duplicate_level_is_inconsistency() {
        let src = source(vec![
            MemoryScene::ramp_u8("slide.vsi", 1, 1, 64, 64),
            MemoryScene::ramp_u8("slide.vsi #1", 1, 1, 32, 32),
            MemoryScene::ramp_u8("slide.vsi #1", 1, 1, 16, 16),
        ]);
        let err = SceneCatalog::from_source(&src).unwrap_err();
        assert!(matches!(err, CatalogError::Inconsistency { .. }));
    }

    #[test]
    fn non_decreasing_levels_are_inconsistency() {
        let src = source(vec![
            MemoryScene::ramp_u8("slide.vsi", 1, 1, 32, 32),
            MemoryScene::ramp_u8("slide.vsi #1", 1, 1, 32, 32),
        ]);
        let err = SceneCatalog::from_source(&src).unwrap_err();
        assert!(matches!(err, CatalogError::Inconsistency { .. }));
    }

    #[test]
    fn zero_sized_scene_is_malformed() {
        let src = source(vec![MemoryScene::ramp_u8("slide.vsi", 1, 1, 0, 16)]);
        let err = SceneCatalog::from_source(&src).unwrap_err();
        assert!(matches!(err, CatalogError::MalformedScene { .. }));
    }
}
