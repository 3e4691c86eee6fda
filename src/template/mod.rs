// src/template/mod.rs - Wells, ledges and the obstacle-height field of the sample tray
pub mod parser;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("Well '{0}' not found in template")]
    WellNotFound(String),
    #[error("Ledge '{name}' has negative height {height}")]
    NegativeHeight { name: String, height: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Outline of a well or ledge in stage coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shape {
    Circle { center: Point2, radius: f64 },
    Rectangle { center: Point2, width: f64, height: f64 },
}

impl Shape {
    pub fn circle(x: f64, y: f64, radius: f64) -> Self {
        Shape::Circle {
            center: Point2::new(x, y),
            radius,
        }
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Shape::Rectangle {
            center: Point2::new(x, y),
            width,
            height,
        }
    }

    pub fn center(&self) -> Point2 {
        match self {
            Shape::Circle { center, .. } | Shape::Rectangle { center, .. } => *center,
        }
    }

    /// Axis-aligned box enclosing the shape.
    pub fn bounding_box(&self) -> Bounds {
        match *self {
            Shape::Circle { center, radius } => Bounds::new(
                center.x - radius,
                center.y - radius,
                center.x + radius,
                center.y + radius,
            ),
            Shape::Rectangle {
                center,
                width,
                height,
            } => Bounds::new(
                center.x - width / 2.0,
                center.y - height / 2.0,
                center.x + width / 2.0,
                center.y + height / 2.0,
            ),
        }
    }

    /// Boundary points count as inside.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match *self {
            Shape::Circle { center, radius } => {
                (x - center.x).hypot(y - center.y) <= radius
            }
            Shape::Rectangle {
                center,
                width,
                height,
            } => (x - center.x).abs() <= width / 2.0 && (y - center.y).abs() <= height / 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Well {
    pub name: String,
    pub shape: Shape,
}

impl Well {
    pub fn position(&self) -> Point2 {
        self.shape.center()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ledge {
    pub name: String,
    pub shape: Shape,
    /// Height of the obstacle top above the capillary zero (mm), never negative.
    pub height: f64,
}

/// Extent of the tray: lower-left and upper-right corners.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub lower_x: f64,
    pub lower_y: f64,
    pub upper_x: f64,
    pub upper_y: f64,
}

impl Bounds {
    pub fn new(lower_x: f64, lower_y: f64, upper_x: f64, upper_y: f64) -> Self {
        Self {
            lower_x,
            lower_y,
            upper_x,
            upper_y,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.lower_x && x <= self.upper_x && y >= self.lower_y && y <= self.upper_y
    }

    /// Touching edges count as overlapping.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.lower_x <= other.upper_x
            && other.lower_x <= self.upper_x
            && self.lower_y <= other.upper_y
            && other.lower_y <= self.upper_y
    }
}

/// Spatial template of one tray. Built once and read-only while a run uses it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub bounds: Bounds,
    wells: BTreeMap<String, Well>,
    ledges: BTreeMap<String, Ledge>,
}

impl Template {
    pub fn new(bounds: Bounds) -> Self {
        Self {
            bounds,
            ..Self::default()
        }
    }

    pub fn with_well(mut self, name: &str, shape: Shape) -> Self {
        self.insert_well(name, shape);
        self
    }

    pub fn with_ledge(mut self, name: &str, shape: Shape, height: f64) -> Result<Self, TemplateError> {
        self.insert_ledge(name, shape, height)?;
        Ok(self)
    }

    /// Adds or replaces a well.
    pub fn insert_well(&mut self, name: &str, shape: Shape) {
        self.wells.insert(
            name.to_string(),
            Well {
                name: name.to_string(),
                shape,
            },
        );
    }

    /// Adds or replaces a ledge.
    pub fn insert_ledge(&mut self, name: &str, shape: Shape, height: f64) -> Result<(), TemplateError> {
        if !(height >= 0.0) {
            return Err(TemplateError::NegativeHeight {
                name: name.to_string(),
                height,
            });
        }
        self.ledges.insert(
            name.to_string(),
            Ledge {
                name: name.to_string(),
                shape,
                height,
            },
        );
        Ok(())
    }

    pub fn wells(&self) -> impl Iterator<Item = &Well> {
        self.wells.values()
    }

    pub fn ledges(&self) -> impl Iterator<Item = &Ledge> {
        self.ledges.values()
    }

    /// Obstacle height under `(x, y)`.
    ///
    /// Overlapping ledges stack: the result is the sum of the heights of every ledge that
    /// contains the point, not their maximum.
    pub fn height_at(&self, x: f64, y: f64) -> f64 {
        self.ledges
            .values()
            .filter(|ledge| ledge.shape.contains(x, y))
            .fold(0.0, |total, ledge| total + ledge.height)
    }

    /// `height_at` for every sample of a path. Extra samples of the longer slice are ignored.
    pub fn height_along_path(&self, xs: &[f64], ys: &[f64]) -> Vec<f64> {
        xs.iter()
            .zip(ys)
            .map(|(&x, &y)| self.height_at(x, y))
            .collect()
    }

    pub fn resolve_well(&self, name: &str) -> Result<Point2, TemplateError> {
        self.wells
            .get(name)
            .map(Well::position)
            .ok_or_else(|| TemplateError::WellNotFound(name.to_string()))
    }

    /// Tallest single ledge, or 0 for a template without ledges.
    pub fn max_ledge_height(&self) -> f64 {
        self.ledges.values().map(|l| l.height).fold(0.0, f64::max)
    }

    /// Upper bound of [`height_at`](Self::height_at) anywhere on the tray.
    ///
    /// Ledges that share a point have pairwise overlapping bounding boxes, so for every
    /// stack the sum over the ledges whose boxes touch one of its members is at least the
    /// stacked height.
    pub fn stacked_height_bound(&self) -> f64 {
        let boxes: Vec<(Bounds, f64)> = self
            .ledges
            .values()
            .map(|l| (l.shape.bounding_box(), l.height))
            .collect();
        boxes
            .iter()
            .map(|(outer, _)| {
                boxes
                    .iter()
                    .filter(|(inner, _)| outer.intersects(inner))
                    .fold(0.0, |total, (_, height)| total + height)
            })
            .fold(0.0, f64::max)
    }
}
