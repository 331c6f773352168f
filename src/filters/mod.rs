//! Built-in filter catalog.
//!
//! A filter is a vertex/fragment program pair animated by the `time`
//! uniform, plus the metadata the exporter needs: how long one loop of the
//! motion lasts and which color should become transparent in the GIF.

mod shaders;

use crate::error::{FilterError, Result};
use crate::frame::Rgb;
use std::f64::consts::PI;
use std::fmt;

/// Period after which a filter's motion repeats exactly. Always > 0.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct LoopDuration(f64);

impl LoopDuration {
    /// Returns `None` unless `secs` is finite and strictly positive.
    pub fn new(secs: f64) -> Option<Self> {
        (secs.is_finite() && secs > 0.0).then_some(Self(secs))
    }

    /// Unchecked constructor for the static catalog; the catalog tests
    /// verify every entry is positive.
    const fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for LoopDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.0)
    }
}

/// Transparency policy of an exported animation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromaKey {
    /// Pixels of exactly this color become transparent.
    Color(Rgb),
    /// No keying; the shader's alpha channel decides.
    None,
}

impl ChromaKey {
    pub fn color(&self) -> Option<Rgb> {
        match self {
            ChromaKey::Color(rgb) => Some(*rgb),
            ChromaKey::None => None,
        }
    }
}

/// An immutable filter definition.
#[derive(Debug)]
pub struct FilterDefinition {
    pub name: &'static str,
    pub vertex_source: &'static str,
    pub fragment_source: &'static str,
    pub loop_duration: LoopDuration,
    pub chroma_key: ChromaKey,
}

impl FilterDefinition {
    /// Clear color behind the animated image: the opaque key color, or
    /// transparent black for unkeyed filters.
    pub fn background(&self) -> [f32; 4] {
        background_for(self.chroma_key)
    }
}

pub(crate) fn background_for(key: ChromaKey) -> [f32; 4] {
    match key {
        ChromaKey::Color(rgb) => {
            let [r, g, b] = rgb.to_unit();
            [r, g, b, 1.0]
        }
        ChromaKey::None => [0.0, 0.0, 0.0, 0.0],
    }
}

const GREEN_SCREEN: ChromaKey = ChromaKey::Color(Rgb::from_packed(0x00FF00));

static CATALOG: [FilterDefinition; 14] = [
    FilterDefinition {
        name: "Hop",
        vertex_source: shaders::HOP_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(0.85 * 2.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Hopper",
        vertex_source: shaders::HOPPER_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(0.85),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Overheat",
        vertex_source: shaders::OVERHEAT_VERT,
        fragment_source: shaders::OVERHEAT_FRAG,
        loop_duration: LoopDuration::from_secs(0.85 / 8.0 * 2.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Bounce",
        vertex_source: shaders::BOUNCE_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(PI / 5.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Circle",
        vertex_source: shaders::CIRCLE_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(PI / 4.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Slide",
        vertex_source: shaders::SLIDE_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(0.85 * 2.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Laughing",
        vertex_source: shaders::LAUGHING_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(PI / 12.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Blob",
        vertex_source: shaders::BLOB_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(PI / 3.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Go",
        vertex_source: shaders::FULLSCREEN_VERT,
        fragment_source: shaders::GO_FRAG,
        loop_duration: LoopDuration::from_secs(1.0 / 4.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Elevator",
        vertex_source: shaders::FULLSCREEN_VERT,
        fragment_source: shaders::ELEVATOR_FRAG,
        loop_duration: LoopDuration::from_secs(1.0 / 4.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Rain",
        vertex_source: shaders::FULLSCREEN_VERT,
        fragment_source: shaders::RAIN_FRAG,
        loop_duration: LoopDuration::from_secs(1.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Pride",
        vertex_source: shaders::FULLSCREEN_VERT,
        fragment_source: shaders::PRIDE_FRAG,
        loop_duration: LoopDuration::from_secs(2.0),
        chroma_key: ChromaKey::None,
    },
    FilterDefinition {
        name: "Hard",
        vertex_source: shaders::HARD_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(2.0 * PI / 32.0),
        chroma_key: GREEN_SCREEN,
    },
    FilterDefinition {
        name: "Peek",
        vertex_source: shaders::PEEK_VERT,
        fragment_source: shaders::EMOTE_FRAG,
        loop_duration: LoopDuration::from_secs(2.0 * PI),
        chroma_key: GREEN_SCREEN,
    },
];

/// Looks up a filter by its exact name.
pub fn lookup(name: &str) -> Result<&'static FilterDefinition> {
    CATALOG
        .iter()
        .find(|filter| filter.name == name)
        .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))
}

/// All filters in definition order. The order is stable and drives the
/// gallery grid layout.
pub fn all() -> &'static [FilterDefinition] {
    &CATALOG
}

pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|filter| filter.name)
}

pub fn index_of(name: &str) -> Option<usize> {
    CATALOG.iter().position(|filter| filter.name == name)
}

/// The filter selected when nothing else is requested.
pub fn default_filter() -> &'static FilterDefinition {
    &CATALOG[0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_order_is_stable() {
        let names: Vec<_> = names().collect();
        assert_eq!(
            names,
            [
                "Hop", "Hopper", "Overheat", "Bounce", "Circle", "Slide", "Laughing", "Blob", "Go",
                "Elevator", "Rain", "Pride", "Hard", "Peek"
            ]
        );
        assert_eq!(index_of("Go"), Some(8));
        assert_eq!(default_filter().name, "Hop");
    }

    #[test]
    fn test_names_are_unique_and_durations_positive() {
        let mut seen = HashSet::new();
        for filter in all() {
            assert!(seen.insert(filter.name), "duplicate filter {}", filter.name);
            assert!(LoopDuration::new(filter.loop_duration.as_secs()).is_some());
        }
    }

    #[test]
    fn test_lookup() {
        let hop = lookup("Hop").unwrap();
        assert!((hop.loop_duration.as_secs() - 1.7).abs() < 1e-12);
        assert_eq!(hop.chroma_key, ChromaKey::Color(Rgb(0, 255, 0)));
        assert_eq!(hop.background(), [0.0, 1.0, 0.0, 1.0]);

        let pride = lookup("Pride").unwrap();
        assert_eq!(pride.chroma_key, ChromaKey::None);
        assert_eq!(pride.background(), [0.0; 4]);

        assert!(matches!(lookup("hop"), Err(FilterError::UnknownFilter(name)) if name == "hop"));
    }

    #[test]
    fn test_sources_are_versioned_glsl() {
        for filter in all() {
            assert!(filter.vertex_source.starts_with("#version 450\n"));
            assert!(filter.fragment_source.starts_with("#version 450\n"));
            assert!(filter.vertex_source.contains("void main()"));
        }
        assert!(lookup("Overheat").unwrap().fragment_source.contains("#define TINT"));
    }

    #[test]
    fn test_loop_duration_validation() {
        assert!(LoopDuration::new(0.0).is_none());
        assert!(LoopDuration::new(-1.0).is_none());
        assert!(LoopDuration::new(f64::NAN).is_none());
        assert_eq!(LoopDuration::new(0.25).map(|d| d.as_secs()), Some(0.25));
    }
}
