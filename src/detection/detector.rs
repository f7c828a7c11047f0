use std::collections::HashMap;
use std::time::Duration;

use image::{DynamicImage, Rgb};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Detection;

#[derive(Debug, thiserror::Error)]
pub enum DetectorError {
    #[error("detection backend failed: {0}")]
    Backend(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    #[error("detector panicked: {0}")]
    Panicked(String),

    #[error("detection did not finish within {0:?}")]
    Timeout(Duration),
}

/// A vision backend.
///
/// Implementations are shared by every connection task and called from the
/// blocking pool, so `detect` may run concurrently with itself. Backends that
/// cannot do that must serialize access internally.
pub trait Detector: Send + Sync + 'static {
    /// Returns every object scoring at least `confidence_threshold`. Must not
    /// modify `image`.
    fn detect(
        &self,
        image: &DynamicImage,
        confidence_threshold: f32,
    ) -> Result<Vec<Detection>, DetectorError>;

    /// Display color for a class, `None` for classes this detector doesn't know.
    fn color_for_class(&self, class_name: &str) -> Option<Rgb<u8>>;
}

/// Stable per-class colors, drawn once from a seeded generator.
#[derive(Debug, Clone, Default)]
pub struct ClassPalette {
    colors: HashMap<String, Rgb<u8>>,
}

impl ClassPalette {
    pub fn new<I, S>(class_names: I, seed: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rng = StdRng::seed_from_u64(seed);
        let colors = class_names
            .into_iter()
            .map(|name| (name.into(), Rgb([rng.gen(), rng.gen(), rng.gen()])))
            .collect();
        ClassPalette { colors }
    }

    pub fn color(&self, class_name: &str) -> Option<Rgb<u8>> {
        self.colors.get(class_name).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}
