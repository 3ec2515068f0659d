use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Bounding box for a detected face region, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl BoundingBox {
    /// Clamp the box to a `width × height` frame and round to whole pixels.
    ///
    /// Returns `(x, y, w, h)`, or `None` if nothing of the box lies inside the frame.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.max(0.0).round() as u32;
        let y0 = self.y.max(0.0).round() as u32;
        let x1 = ((self.x + self.width).round().max(0.0) as u32).min(width);
        let y1 = ((self.y + self.height).round().max(0.0) as u32).min(height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0, y0, x1 - x0, y1 - y0))
    }
}

/// Numeric key assigned to one enrolled person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(pub u32);

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("identifier must be a non-negative integer, got {0:?}")]
pub struct InvalidIdentifier(pub String);

impl FromStr for Identifier {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Identifier)
            .map_err(|_| InvalidIdentifier(s.to_string()))
    }
}

/// Metadata carried by a stored sample's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleMeta {
    pub name: String,
    /// Position within the enrollment run, starting at 1.
    pub sequence: u32,
    pub identifier: Identifier,
}

/// Nearest-match output of the model. Lower distance = closer match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    /// `None` only when the model holds no training samples.
    pub identifier: Option<Identifier>,
    pub distance: f64,
}

/// Outcome of thresholding a prediction against the label map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    Identified(String),
    Unknown,
}

impl Identity {
    pub fn is_unknown(&self) -> bool {
        matches!(self, Identity::Unknown)
    }

    /// Text shown next to the face region.
    pub fn display_name(&self) -> &str {
        match self {
            Identity::Identified(name) => name,
            Identity::Unknown => "Unknown",
        }
    }
}

/// Identifier → display name, rebuilt from the sample store at recognition start.
#[derive(Debug, Clone, Default)]
pub struct LabelMap {
    names: HashMap<Identifier, String>,
}

impl LabelMap {
    /// Insert a mapping unless the identifier is already bound.
    ///
    /// Returns the existing name when it differs from `name`.
    pub fn insert(&mut self, identifier: Identifier, name: &str) -> Option<&str> {
        let existing = self
            .names
            .entry(identifier)
            .or_insert_with(|| name.to_string());
        if existing.as_str() != name {
            Some(existing.as_str())
        } else {
            None
        }
    }

    pub fn get(&self, identifier: Identifier) -> Option<&str> {
        self.names.get(&identifier).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
