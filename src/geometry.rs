//! Axis-aligned bounding boxes in frame pixel coordinates.

use serde::{Deserialize, Serialize};

/// A box described by its left, top, right and bottom edges (pixels).
///
/// `BoundingBox::new` normalizes swapped corners, so `left <= right` and
/// `top <= bottom` hold for every constructed value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    pub fn diagonal(&self) -> f32 {
        self.width().hypot(self.height())
    }

    /// Euclidean distance between the two box centers.
    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).hypot(ay - by)
    }

    /// Overlapping region, or `None` when the boxes only touch or are disjoint.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let left = self.left.max(other.left);
        let top = self.top.max(other.top);
        let right = self.right.min(other.right);
        let bottom = self.bottom.min(other.bottom);
        if right <= left || bottom <= top {
            return None;
        }
        Some(BoundingBox {
            left,
            top,
            right,
            bottom,
        })
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        self.intersection(other)
            .map(|overlap| overlap.area())
            .unwrap_or(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            return 0.0;
        }
        intersection / union
    }

    /// Smallest box enclosing both boxes.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }

    /// True when all four corners of `other` lie within this box (edges inclusive).
    pub fn contains(&self, other: &BoundingBox) -> bool {
        self.left <= other.left
            && other.right <= self.right
            && self.top <= other.top
            && other.bottom <= self.bottom
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        self.left <= x && x <= self.right && self.top <= y && y <= self.bottom
    }

    /// Grow the box by `ratio` of its width and height on every side.
    pub fn expand(&self, ratio: f32) -> BoundingBox {
        let margin_x = self.width() * ratio;
        let margin_y = self.height() * ratio;
        BoundingBox {
            left: self.left - margin_x,
            top: self.top - margin_y,
            right: self.right + margin_x,
            bottom: self.bottom + margin_y,
        }
    }

    /// Clip the box to a `width` x `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> BoundingBox {
        let (w, h) = (width as f32, height as f32);
        BoundingBox::new(
            self.left.clamp(0.0, w),
            self.top.clamp(0.0, h),
            self.right.clamp(0.0, w),
            self.bottom.clamp(0.0, h),
        )
    }

    /// Component-wise mean of a set of boxes.
    pub fn average<'a, I>(boxes: I) -> Option<BoundingBox>
    where
        I: IntoIterator<Item = &'a BoundingBox>,
    {
        let mut count = 0usize;
        let mut sum = [0.0f64; 4];
        for b in boxes {
            sum[0] += b.left as f64;
            sum[1] += b.top as f64;
            sum[2] += b.right as f64;
            sum[3] += b.bottom as f64;
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(BoundingBox::new(
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
            (sum[3] / n) as f32,
        ))
    }
}
