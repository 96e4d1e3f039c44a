//! Resolution selection.
//!
//! Resolves a user- or caller-supplied request (explicit index pair, or
//! category plus level) against a [`SceneCatalog`] into the concrete
//! scene and plane shape the pipeline will stream.
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::catalog::{SceneCatalog, SceneShape};
use crate::types::{PixelType, SceneCategory};

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionRequest {
    /// A concrete scene index plus a level within that scene's series.
    Explicit { scene_index: usize, level: u32 },
    /// A category plus a level; fails if the category holds more than one
    /// independent series.
    Category { category: SceneCategory, level: u32 },
}

impl std::fmt::Display for SelectionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SelectionRequest::Explicit { scene_index, level } => {
                write!(f, "scene {} level {}", scene_index, level)
            }
            SelectionRequest::Category { category, level } => {
                write!(f, "{} level {}", category, level)
            }
        }
    }
}

/// A resolved (scene, level) pair and the plane it yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionSelection {
    pub scene_index: usize,
    pub pyramid_level: u32,
    pub shape: SceneShape,
    pub pixel_type: PixelType,
}

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("no scene/level matches {request}")]
    NotFound { request: String },

    #[error(
        "category {category} maps to {} independent series ({}); pass an explicit scene index",
        .candidates.len(),
        .candidates.join(", ")
    )]
    Ambiguous {
        category: SceneCategory,
        candidates: Vec<String>,
    },
}

/// Resolve `request` against `catalog`. No side effects.
pub fn resolve(
    catalog: &SceneCatalog,
    request: &SelectionRequest,
) -> Result<ResolutionSelection, SelectionError> {
    let not_found = || SelectionError::NotFound {
        request: request.to_string(),
    };

    let (series, level) = match request {
        SelectionRequest::Explicit { scene_index, level } => {
            let scene = catalog.scene(*scene_index).ok_or_else(not_found)?;
            (catalog.series_of(scene), *level)
        }
        SelectionRequest::Category { category, level } => {
            let mut series = catalog.series_by_category(*category);
            match series.len() {
                0 => return Err(not_found()),
                1 => (series.remove(0), *level),
                _ => {
                    return Err(SelectionError::Ambiguous {
                        category: *category,
                        candidates: series
                            .iter()
                            .map(|members| members[0].name.clone())
                            .collect(),
                    });
                }
            }
        }
    };

    // Overview/Label/Macro/Unknown scenes admit level 0 only; never fall
    // back to level 0 for an out-of-range request.
    let category = series[0].category;
    if !category.is_pyramidal() && level > 0 {
        return Err(not_found());
    }

    let scene = series
        .iter()
        .find(|s| s.pyramid_level == level)
        .ok_or_else(not_found)?;

    Ok(ResolutionSelection {
        scene_index: scene.scene_index,
        pyramid_level: scene.pyramid_level,
        shape: scene.shape,
        pixel_type: scene.pixel_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::SceneCatalog;
    use crate::io::memory::{MemoryScene, MemorySource};

    fn three_scene_catalog() -> SceneCatalog {
        let src = MemorySource::new(
            "slide.vsi",
            vec![
                MemoryScene::ramp_u8("slide.vsi", 1, 3, 128, 128),
                MemoryScene::ramp_u8("slide.vsi #1", 1, 3, 64, 64),
                MemoryScene::ramp_u8("slide.vsi #2", 1, 3, 32, 32),
                MemoryScene::ramp_u8("slide.vsi #overview", 1, 3, 16, 16),
                MemoryScene::ramp_u8("slide.vsi #label", 1, 3, 8, 8),
            ],
        );
        SceneCatalog::from_source(&src).unwrap()
    }

    #[test]
    fn category_selects_main_level() {
        let catalog = three_scene_catalog();
        let sel = resolve(
            &catalog,
            &SelectionRequest::Category {
                category: SceneCategory::MainImage,
                level: 1,
            },
        )
        .unwrap();
        assert_eq!(sel.scene_index, 1);
        assert_eq!(sel.pyramid_level, 1);
        assert_eq!(sel.shape.width, 64);
    }

    #[test]
    fn explicit_index_selects_within_series() {
        let catalog = three_scene_catalog();
        // Index 0 names the series; level 2 resolves to scene 2.
        let sel = resolve(
            &catalog,
            &SelectionRequest::Explicit {
                scene_index: 0,
                level: 2,
            },
        )
        .unwrap();
        assert_eq!(sel.scene_index, 2);
        assert_eq!(sel.shape.width, 32);
    }

    #[test]
    fn overview_level_one_is_not_found() {
        let catalog = three_scene_catalog();
        let err = resolve(
            &catalog,
            &SelectionRequest::Category {
                category: SceneCategory::Overview,
                level: 1,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SelectionError::NotFound { .. }));
    }

    #[test]
    fn missing_level_is_not_found() {
        let catalog = three_scene_catalog();
        let err = resolve(
            &catalog,
            &SelectionRequest::Category {
                category: SceneCategory::MainImage,
                level: 3,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SelectionError::NotFound { .. }));
    }

    #[test]
    fn unknown_scene_index_is_not_found() {
        let catalog = three_scene_catalog();
        let err = resolve(
            &catalog,
            &SelectionRequest::Explicit {
                scene_index: 42,
                level: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SelectionError::NotFound { .. }));
    }

    #[test]
    fn two_unknown_series_are_ambiguous() {
        let src = MemorySource::new(
            "slide.vsi",
            vec![
                MemoryScene::ramp_u8("region_a", 1, 1, 16, 16),
                MemoryScene::ramp_u8("region_a", 1, 1, 8, 8),
            ],
        );
        let catalog = SceneCatalog::from_source(&src).unwrap();
        let err = resolve(
            &catalog,
            &SelectionRequest::Category {
                category: SceneCategory::Unknown,
                level: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, SelectionError::Ambiguous { .. }));

        // Explicit index still works.
        let sel = resolve(
            &catalog,
            &SelectionRequest::Explicit {
                scene_index: 1,
                level: 0,
            },
        )
        .unwrap();
        assert_eq!(sel.scene_index, 1);
    }
}
