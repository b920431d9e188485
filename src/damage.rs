//! Per-output damage accumulation.
//!
//! Damage is tracked in output pixels, in the output's transformed
//! orientation (what the user sees). The render pass converts it back to
//! buffer orientation when scissoring and when handing it to presentation.

use smithay::utils::{Physical, Point, Rectangle, Size, Transform};

/// Past this many rectangles the region collapses into its bounding box.
const MAX_RECTS: usize = 64;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DamageRegion {
    bounds: Size<i32, Physical>,
    rects: Vec<Rectangle<i32, Physical>>,
}

impl DamageRegion {
    pub fn new(bounds: Size<i32, Physical>) -> Self {
        Self {
            bounds,
            rects: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Size<i32, Physical> {
        self.bounds
    }

    /// Change the clipping bounds, dropping anything that now lies outside.
    pub fn set_bounds(&mut self, bounds: Size<i32, Physical>) {
        self.bounds = bounds;
        let full = self.full_rect();
        self.rects = self
            .rects
            .iter()
            .filter_map(|rect| rect.intersection(full))
            .filter(|rect| !rect.is_empty())
            .collect();
    }

    pub fn full_rect(&self) -> Rectangle<i32, Physical> {
        Rectangle::new(Point::from((0, 0)), self.bounds)
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rectangle<i32, Physical>] {
        &self.rects
    }

    /// Union `rect` into the region.
    ///
    /// Only the parts of `rect` not already covered are stored, so the
    /// stored rectangles never overlap.
    pub fn add(&mut self, rect: Rectangle<i32, Physical>) {
        if rect.is_empty() {
            return;
        }
        let Some(rect) = rect.intersection(self.full_rect()) else {
            return;
        };

        let pieces = rect.subtract_rects(self.rects.iter().copied());
        self.rects
            .extend(pieces.into_iter().filter(|piece| !piece.is_empty()));

        if self.rects.len() > MAX_RECTS
            && let Some(bbox) = self.bounding_box()
        {
            self.rects = vec![bbox];
        }
    }

    pub fn add_whole(&mut self) {
        let full = self.full_rect();
        if full.is_empty() {
            return;
        }
        self.rects = vec![full];
    }

    pub fn extend(&mut self, other: &DamageRegion) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    /// Hand out the accumulated region and reset to empty.
    pub fn take(&mut self) -> DamageRegion {
        DamageRegion {
            bounds: self.bounds,
            rects: std::mem::take(&mut self.rects),
        }
    }

    /// The parts of the region that fall inside `rect`.
    pub fn intersect(&self, rect: Rectangle<i32, Physical>) -> Vec<Rectangle<i32, Physical>> {
        self.rects
            .iter()
            .filter_map(|damaged| damaged.intersection(rect))
            .filter(|piece| !piece.is_empty())
            .collect()
    }

    pub fn intersects(&self, rect: Rectangle<i32, Physical>) -> bool {
        self.rects.iter().any(|damaged| damaged.overlaps(rect))
    }

    /// Whether every pixel of `rect` is damaged.
    pub fn covers(&self, rect: Rectangle<i32, Physical>) -> bool {
        if rect.is_empty() {
            return true;
        }
        let covered: i64 = self
            .intersect(rect)
            .iter()
            .map(|piece| piece.size.w as i64 * piece.size.h as i64)
            .sum();
        covered == rect.size.w as i64 * rect.size.h as i64
    }

    pub fn bounding_box(&self) -> Option<Rectangle<i32, Physical>> {
        let (first, rest) = self.rects.split_first()?;
        Some(rest.iter().fold(*first, |bbox, rect| bbox.merge(*rect)))
    }

    /// The region as seen through `transform`.
    ///
    /// The result is bounded by the transformed size of this region's
    /// bounds.
    pub fn transformed(&self, transform: Transform) -> DamageRegion {
        DamageRegion {
            bounds: transform.transform_size(self.bounds),
            rects: self
                .rects
                .iter()
                .map(|rect| transform.transform_rect_in(*rect, &self.bounds))
                .collect(),
        }
    }
}
