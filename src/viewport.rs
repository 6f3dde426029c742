//! Pan/zoom state of a layer and animated camera moves.

use crate::constants::{AREA_FILL, DEFAULT_ZOOM, FOCUS_SETTLE, SCALE_STEP_DURATION};
use crate::diagram::Diagram;
use crate::layers::LayerKey;
use crate::types::Transform;
use eframe::egui::{pos2, Pos2, Rect, Vec2};
use std::time::Duration;
use tokio::time::Instant;

/// An in-flight camera animation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: Transform,
    pub to: Transform,
    pub start: Instant,
    pub duration: Duration,
}

impl Transition {
    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.start);
        let t = (elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0);
        // cubic in-out
        if t < 0.5 {
            4.0 * t * t * t
        } else {
            1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
        }
    }
}

/// Transform of one layer plus the constraints applied to it.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub transform: Transform,
    /// Size of the drawing area in screen pixels
    pub size: Vec2,
    /// Allowed `(min, max)` scale
    pub scale_extent: (f32, f32),
    /// World area the visible region must stay within, if restricted
    pub translate_extent: Option<Rect>,
    transition: Option<Transition>,
}

impl Viewport {
    pub fn new(size: Vec2, scale_extent: (f32, f32)) -> Self {
        Self {
            transform: Transform::IDENTITY,
            size,
            scale_extent,
            translate_extent: None,
            transition: None,
        }
    }

    /// Transform used when nothing is stored: origin centered, zoomed out.
    pub fn default_transform(size: Vec2) -> Transform {
        Transform::new(size.x / 2.0, size.y / 2.0, DEFAULT_ZOOM)
    }

    /// Screen-space center of the drawing area.
    pub fn center(&self) -> Pos2 {
        pos2(self.size.x / 2.0, self.size.y / 2.0)
    }

    /// Transform that centers `point` at `scale`.
    pub fn focus_target(&self, point: Pos2, scale: f32) -> Transform {
        self.constrain(Transform::new(
            self.size.x / 2.0 - point.x * scale,
            self.size.y / 2.0 - point.y * scale,
            scale,
        ))
    }

    /// Scale at which `area` fills the drawing area up to the fill margin.
    pub fn area_scale(&self, area: Rect) -> f32 {
        let fit = (area.width() / self.size.x).max(area.height() / self.size.y);
        if fit > 0.0 && fit.is_finite() {
            AREA_FILL / fit
        } else {
            self.transform.k
        }
    }

    /// Clamps a transform to the scale extent and, if set, the translate extent.
    pub fn constrain(&self, transform: Transform) -> Transform {
        let (min, max) = self.scale_extent;
        let k = transform.k.clamp(min.min(max), max.max(min));
        let mut t = Transform { k, ..transform };

        if let Some(extent) = self.translate_extent {
            let dx0 = (0.0 - t.x) / t.k - extent.min.x;
            let dx1 = (self.size.x - t.x) / t.k - extent.max.x;
            let dy0 = (0.0 - t.y) / t.k - extent.min.y;
            let dy1 = (self.size.y - t.y) / t.k - extent.max.y;
            let shift = |d0: f32, d1: f32| {
                if d1 > d0 {
                    (d0 + d1) / 2.0
                } else if d0 < 0.0 {
                    d0
                } else {
                    d1.max(0.0)
                }
            };
            t.x += t.k * shift(dx0, dx1);
            t.y += t.k * shift(dy0, dy1);
        }
        t
    }

    /// Jumps to `transform`, cancelling any animation.
    pub fn set_transform(&mut self, transform: Transform) {
        self.transition = None;
        self.transform = self.constrain(transform);
    }

    /// Animates to `target`; a zero duration jumps immediately.
    pub fn animate_to(&mut self, target: Transform, now: Instant, duration: Duration) {
        let to = self.constrain(target);
        if duration.is_zero() {
            self.set_transform(to);
            return;
        }
        self.transition = Some(Transition {
            from: self.transform,
            to,
            start: now,
            duration,
        });
    }

    /// Advances the running animation. Returns true if the transform changed.
    pub fn advance(&mut self, now: Instant) -> bool {
        let Some(transition) = &self.transition else {
            return false;
        };
        let t = transition.progress(now);
        let next = if t >= 1.0 {
            let to = transition.to;
            self.transition = None;
            to
        } else {
            transition.from.lerp(&transition.to, t)
        };
        let changed = next != self.transform;
        self.transform = next;
        changed
    }

    /// Completes the running animation immediately.
    pub fn finish(&mut self) {
        if let Some(transition) = self.transition.take() {
            self.transform = transition.to;
        }
    }

    pub fn is_animating(&self) -> bool {
        self.transition.is_some()
    }

    /// The transform the viewport is heading to.
    pub fn target(&self) -> Transform {
        self.transition
            .as_ref()
            .map_or(self.transform, |transition| transition.to)
    }

    /// Pans by a screen-space delta.
    pub fn pan(&mut self, delta: Vec2) {
        let t = self.target();
        self.set_transform(Transform::new(t.x + delta.x, t.y + delta.y, t.k));
    }

    /// Zooms by `factor` keeping the screen point `anchor` fixed.
    pub fn zoom_about(&mut self, anchor: Pos2, factor: f32) {
        let t = self.target();
        let world = t.invert(anchor);
        let (min, max) = self.scale_extent;
        let k = (t.k * factor).clamp(min.min(max), max.max(min));
        self.set_transform(Transform::new(anchor.x - world.x * k, anchor.y - world.y * k, k));
    }

    /// Animates a zoom by `factor` around the center of the drawing area.
    pub fn scale_by(&mut self, factor: f32, now: Instant) {
        let k = self.target().k * factor;
        self.scale_to(k, now);
    }

    /// Animates to scale `k` around the center of the drawing area.
    pub fn scale_to(&mut self, k: f32, now: Instant) {
        let t = self.target();
        let center = self.center();
        let world = t.invert(center);
        let (min, max) = self.scale_extent;
        let k = k.clamp(min.min(max), max.max(min));
        let target = Transform::new(center.x - world.x * k, center.y - world.y * k, k);
        self.animate_to(target, now, SCALE_STEP_DURATION);
    }

    /// World-space rectangle currently visible.
    pub fn visible_world_rect(&self) -> Rect {
        let t = self.target();
        Rect::from_min_max(t.invert(Pos2::ZERO), t.invert(self.size.to_pos2()))
    }

    /// Restricts panning to the currently visible world area.
    pub fn restrict_to_visible(&mut self) {
        self.translate_extent = Some(self.visible_world_rect());
    }

    /// Replaces the scale extent and re-constrains the transform.
    pub fn set_scale_extent(&mut self, min: f32, max: f32) {
        self.scale_extent = (min, max);
        self.finish();
        self.transform = self.constrain(self.transform);
    }

    pub fn resize(&mut self, size: Vec2) {
        self.size = size;
    }
}

/// Animates the layer `key` so `point` is centered at `scale`.
///
/// Resolves once the animation plus a short settle delay has elapsed, leaving the viewport at
/// its target.
pub async fn focus(diagram: &Diagram, key: LayerKey, point: Pos2, scale: f32, duration: Duration) {
    let target = {
        let mut state = diagram.state_mut();
        let Some(layer) = state.layers.get_mut(key) else {
            return;
        };
        let target = layer.viewport.focus_target(point, scale);
        layer.viewport.animate_to(target, Instant::now(), duration);
        target
    };

    tokio::time::sleep(duration + FOCUS_SETTLE).await;

    let mut state = diagram.state_mut();
    if let Some(layer) = state.layers.get_mut(key) {
        if layer.viewport.target() == target {
            layer.viewport.finish();
        }
    }
    state.viewport_interaction_ended(Instant::now());
}

/// Stops the layer's simulations, then centers `point` at `scale`.
pub async fn focus_on_node(
    diagram: &Diagram,
    key: LayerKey,
    point: Pos2,
    scale: f32,
    duration: Duration,
) {
    diagram.stop_simulations(key);
    focus(diagram, key, point, scale, duration).await;
}

/// Stops the layer's simulations, then frames `area`.
pub async fn focus_on_area(diagram: &Diagram, key: LayerKey, area: Rect, duration: Duration) {
    diagram.stop_simulations(key);
    let scale = {
        let state = diagram.state();
        match state.layers.get(key) {
            Some(layer) => layer.viewport.area_scale(area),
            None => return,
        }
    };
    focus(diagram, key, area.center(), scale, duration).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use eframe::egui::vec2;

    fn viewport() -> Viewport {
        Viewport::new(vec2(800.0, 600.0), (0.1, 8.0))
    }

    #[test]
    fn test_focus_target_centers_point() {
        let viewport = viewport();
        let target = viewport.focus_target(pos2(100.0, 50.0), 2.0);
        assert_eq!(target, Transform::new(200.0, 200.0, 2.0));
        assert_eq!(target.apply(pos2(100.0, 50.0)), viewport.center());
    }

    #[test]
    fn test_area_scale_fills_viewport() {
        let viewport = viewport();
        let area = Rect::from_min_size(Pos2::ZERO, vec2(400.0, 100.0));
        assert!((viewport.area_scale(area) - 1.8).abs() < 1e-5);
    }

    #[test]
    fn test_scale_is_clamped_to_extent() {
        let mut viewport = viewport();
        viewport.set_transform(Transform::new(0.0, 0.0, 20.0));
        assert_eq!(viewport.transform.k, 8.0);
        viewport.set_scale_extent(0.5, 4.0);
        assert_eq!(viewport.transform.k, 4.0);
    }

    #[test]
    fn test_transition_reaches_target() {
        let mut viewport = viewport();
        let start = Instant::now();
        viewport.animate_to(Transform::new(10.0, 20.0, 2.0), start, Duration::from_millis(250));
        assert!(viewport.is_animating());

        viewport.advance(start + Duration::from_millis(125));
        assert!(viewport.transform.k > 1.0 && viewport.transform.k < 2.0);

        viewport.advance(start + Duration::from_millis(250));
        assert_eq!(viewport.transform, Transform::new(10.0, 20.0, 2.0));
        assert!(!viewport.is_animating());
    }

    #[test]
    fn test_scale_to_keeps_center_fixed() {
        let mut viewport = viewport();
        viewport.set_transform(Transform::new(100.0, 100.0, 1.0));
        let center_world = viewport.transform.invert(viewport.center());

        viewport.scale_to(0.25, Instant::now());
        viewport.finish();

        assert_eq!(viewport.transform.k, 0.25);
        let after = viewport.transform.apply(center_world);
        assert!((after - viewport.center()).length() < 1e-3);
    }

    #[test]
    fn test_translate_extent_keeps_area_visible() {
        let mut viewport = viewport();
        viewport.restrict_to_visible();
        viewport.pan(vec2(500.0, 0.0));
        assert_eq!(viewport.transform, Transform::IDENTITY);
    }

    #[test]
    fn test_zoom_about_keeps_anchor() {
        let mut viewport = viewport();
        let anchor = pos2(200.0, 150.0);
        let world = viewport.transform.invert(anchor);
        viewport.zoom_about(anchor, 2.0);
        assert_eq!(viewport.transform.k, 2.0);
        assert!((viewport.transform.apply(world) - anchor).length() < 1e-3);
    }
}
