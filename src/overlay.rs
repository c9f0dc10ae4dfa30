// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Annotation overlay geometry and drag repositioning
//!
//! Annotations are stored in natural image pixels. The overlay shows them in
//! a container of some other width, so every coordinate is multiplied by
//! `container_width / natural_width` on the way out and pointer deltas are
//! divided by the same ratio on the way back in.

use serde::Serialize;

use crate::models::{format_confidence, BoundingBox, FractureAnnotation};

/// Gap between a box and its tooltip, in container pixels
pub const TOOLTIP_OFFSET: f64 = 10.0;

/// Container pixels per natural image pixel
pub fn scale_ratio(container_width: f64, natural_width: f64) -> f64 {
    if natural_width > 0.0 && container_width > 0.0 {
        container_width / natural_width
    } else {
        1.0
    }
}

/// A box in container coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaledBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl ScaledBox {
    pub fn from_bounds(bounds: BoundingBox, ratio: f64) -> Self {
        Self {
            x: bounds.x * ratio,
            y: bounds.y * ratio,
            width: bounds.width * ratio,
            height: bounds.height * ratio,
        }
    }

    /// Tooltip position: centred under the box
    pub fn tooltip_anchor(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height + TOOLTIP_OFFSET)
    }

    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Low,
}

impl ConfidenceLevel {
    pub fn of(confidence: f64) -> Self {
        if confidence > 0.5 {
            ConfidenceLevel::High
        } else {
            ConfidenceLevel::Low
        }
    }

    /// Badge colour
    pub fn colour(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "red",
            ConfidenceLevel::Low => "yellow",
        }
    }
}

/// What the overlay draws for one annotation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedBox {
    pub id: String,
    pub rect: ScaledBox,
    pub badge: String,
    pub level: ConfidenceLevel,
    pub selected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<(f64, f64)>,
}

/// Move an annotation by a pointer delta given in container pixels.
///
/// The first move of an uncorrected annotation remembers where the
/// detector put it.
pub fn translate(annotation: &mut FractureAnnotation, dx: f64, dy: f64, ratio: f64) {
    if !annotation.corrected {
        annotation.original_coordinates = Some(annotation.bounds());
        annotation.corrected = true;
    }
    annotation.x += dx / ratio;
    annotation.y += dy / ratio;
}

#[derive(Debug, Clone)]
struct Drag {
    annotation_id: String,
    last: (f64, f64),
}

/// Interactive state for one annotated image
#[derive(Debug, Clone)]
pub struct Overlay {
    annotations: Vec<FractureAnnotation>,
    natural_width: f64,
    container_width: f64,
    editable: bool,
    selected: Option<String>,
    drag: Option<Drag>,
}

impl Overlay {
    pub fn new(
        annotations: Vec<FractureAnnotation>,
        natural_width: f64,
        container_width: f64,
        editable: bool,
    ) -> Self {
        Self {
            annotations,
            natural_width,
            container_width,
            editable,
            selected: None,
            drag: None,
        }
    }

    pub fn ratio(&self) -> f64 {
        scale_ratio(self.container_width, self.natural_width)
    }

    /// Container resized
    pub fn set_container_width(&mut self, width: f64) {
        self.container_width = width;
    }

    pub fn annotations(&self) -> &[FractureAnnotation] {
        &self.annotations
    }

    pub fn into_annotations(self) -> Vec<FractureAnnotation> {
        self.annotations
    }

    pub fn selected(&self) -> Option<&FractureAnnotation> {
        let id = self.selected.as_deref()?;
        self.annotations.iter().find(|a| a.id == id)
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    /// Everything a renderer needs, in container coordinates
    pub fn render(&self) -> Vec<RenderedBox> {
        let ratio = self.ratio();
        self.annotations
            .iter()
            .map(|a| {
                let rect = ScaledBox::from_bounds(a.bounds(), ratio);
                let selected = self.selected.as_deref() == Some(a.id.as_str());
                RenderedBox {
                    id: a.id.clone(),
                    rect,
                    badge: format_confidence(a.confidence),
                    level: ConfidenceLevel::of(a.confidence),
                    selected,
                    tooltip: selected.then(|| rect.tooltip_anchor()),
                }
            })
            .collect()
    }

    /// Pointer pressed on an annotation. Starts a drag when editable,
    /// toggles selection otherwise. Unknown ids are ignored.
    pub fn pointer_down(&mut self, annotation_id: &str, pointer: (f64, f64)) {
        if !self.annotations.iter().any(|a| a.id == annotation_id) {
            return;
        }
        if self.editable {
            self.selected = Some(annotation_id.to_string());
            self.drag = Some(Drag {
                annotation_id: annotation_id.to_string(),
                last: pointer,
            });
        } else if self.selected.as_deref() == Some(annotation_id) {
            self.selected = None;
        } else {
            self.selected = Some(annotation_id.to_string());
        }
    }

    /// Pointer moved. Returns the updated annotation while dragging.
    pub fn pointer_move(&mut self, pointer: (f64, f64)) -> Option<&FractureAnnotation> {
        let ratio = self.ratio();
        let drag = self.drag.as_mut()?;
        let (dx, dy) = (pointer.0 - drag.last.0, pointer.1 - drag.last.1);
        drag.last = pointer;

        let annotation = self.annotations.iter_mut().find(|a| a.id == drag.annotation_id)?;
        translate(annotation, dx, dy, ratio);
        Some(annotation)
    }

    /// Pointer released or left the container
    pub fn pointer_up(&mut self) {
        self.drag = None;
    }

    /// Annotations that have been moved away from the detector's placement
    pub fn corrected(&self) -> impl Iterator<Item = &FractureAnnotation> {
        self.annotations.iter().filter(|a| a.corrected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(id: &str, confidence: f64) -> FractureAnnotation {
        FractureAnnotation {
            id: id.into(),
            x: 120.0,
            y: 150.0,
            width: 60.0,
            height: 40.0,
            fracture_type: "Distal radius fracture".into(),
            confidence,
            corrected: false,
            original_coordinates: None,
        }
    }

    #[test]
    fn test_scaling() {
        let overlay = Overlay::new(vec![annotation("a", 0.94)], 800.0, 400.0, false);
        assert_eq!(overlay.ratio(), 0.5);

        let rendered = overlay.render();
        assert_eq!(rendered[0].rect, ScaledBox { x: 60.0, y: 75.0, width: 30.0, height: 20.0 });
        assert_eq!(rendered[0].badge, "94%");
        assert_eq!(rendered[0].level, ConfidenceLevel::High);
        assert!(rendered[0].tooltip.is_none());
    }

    #[test]
    fn test_zero_width_image_does_not_divide_by_zero() {
        assert_eq!(scale_ratio(400.0, 0.0), 1.0);
    }

    #[test]
    fn test_confidence_threshold() {
        assert_eq!(ConfidenceLevel::of(0.5), ConfidenceLevel::Low);
        assert_eq!(ConfidenceLevel::of(0.51).colour(), "red");
    }

    #[test]
    fn test_drag_translates_in_natural_pixels() {
        let mut overlay = Overlay::new(vec![annotation("a", 0.94)], 800.0, 400.0, true);
        overlay.pointer_down("a", (100.0, 100.0));
        assert!(overlay.is_dragging());

        let moved = overlay.pointer_move((110.0, 95.0)).unwrap().clone();
        assert_eq!((moved.x, moved.y), (140.0, 140.0));
        assert!(moved.corrected);
        assert_eq!(
            moved.original_coordinates,
            Some(BoundingBox { x: 120.0, y: 150.0, width: 60.0, height: 40.0 })
        );

        // Deltas are relative to the previous pointer position
        let moved = overlay.pointer_move((112.0, 95.0)).unwrap().clone();
        assert_eq!(moved.x, 144.0);
        assert_eq!(moved.original_coordinates.unwrap().x, 120.0);

        overlay.pointer_up();
        assert!(overlay.pointer_move((200.0, 200.0)).is_none());
        assert_eq!(overlay.corrected().count(), 1);
    }

    #[test]
    fn test_read_only_toggles_selection() {
        let mut overlay = Overlay::new(vec![annotation("a", 0.3), annotation("b", 0.8)], 100.0, 100.0, false);
        overlay.pointer_down("a", (0.0, 0.0));
        assert_eq!(overlay.selected().map(|a| a.id.as_str()), Some("a"));
        assert!(!overlay.is_dragging());
        assert!(overlay.pointer_move((50.0, 50.0)).is_none());
        assert_eq!(overlay.annotations()[0].x, 120.0);

        overlay.pointer_down("a", (0.0, 0.0));
        assert!(overlay.selected().is_none());
    }

    #[test]
    fn test_tooltip_anchor() {
        let mut overlay = Overlay::new(vec![annotation("a", 0.94)], 100.0, 100.0, false);
        overlay.pointer_down("a", (0.0, 0.0));
        let rendered = overlay.render();
        assert_eq!(rendered[0].tooltip, Some((150.0, 200.0)));
    }

    #[test]
    fn test_resize_changes_ratio_only() {
        let mut overlay = Overlay::new(vec![annotation("a", 0.94)], 600.0, 600.0, true);
        overlay.set_container_width(300.0);
        assert_eq!(overlay.render()[0].rect.x, 60.0);
        assert_eq!(overlay.annotations()[0].x, 120.0);
    }
}
