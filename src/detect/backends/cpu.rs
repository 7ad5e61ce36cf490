use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, ObjectClass};
use crate::geometry::BoundingBox;

const DEFAULT_LUMA_THRESHOLD: u8 = 200;
const DEFAULT_GRID_STEP: u32 = 4;
const DEFAULT_MIN_CELLS: usize = 12;

/// CPU backend that reports bright connected regions as people.
///
/// Intended for synthetic `stub://` scenes, where actors are painted as bright
/// rectangles on a dark background. The frame is sampled on a square grid and
/// 4-connected bright cells are grouped into one detection each.
pub struct CpuBackend {
    luma_threshold: u8,
    grid_step: u32,
    min_cells: usize,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
            grid_step: DEFAULT_GRID_STEP,
            min_cells: DEFAULT_MIN_CELLS,
        }
    }

    fn bright_cells(&self, pixels: &[u8], width: u32, height: u32) -> (Vec<bool>, usize, usize) {
        let step = self.grid_step as usize;
        let cols = (width as usize).div_ceil(step);
        let rows = (height as usize).div_ceil(step);
        let mut cells = vec![false; cols * rows];
        for row in 0..rows {
            for col in 0..cols {
                let x = col * step;
                let y = row * step;
                let idx = (y * width as usize + x) * 3;
                let luma = luma(pixels[idx], pixels[idx + 1], pixels[idx + 2]);
                cells[row * cols + col] = luma >= self.luma_threshold;
            }
        }
        (cells, cols, rows)
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn supports(&self, class: ObjectClass) -> bool {
        matches!(class, ObjectClass::Person)
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<Detection>> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                expected,
                pixels.len()
            ));
        }

        let (mut cells, cols, rows) = self.bright_cells(pixels, width, height);
        let step = self.grid_step as f32;
        let mut detections = Vec::new();
        let mut stack = Vec::new();

        for start in 0..cells.len() {
            if !cells[start] {
                continue;
            }
            cells[start] = false;
            stack.push(start);

            let (mut min_c, mut max_c) = (start % cols, start % cols);
            let (mut min_r, mut max_r) = (start / cols, start / cols);
            let mut count = 0usize;

            while let Some(cell) = stack.pop() {
                count += 1;
                let (c, r) = (cell % cols, cell / cols);
                min_c = min_c.min(c);
                max_c = max_c.max(c);
                min_r = min_r.min(r);
                max_r = max_r.max(r);

                let mut visit = |next: usize| {
                    if cells[next] {
                        cells[next] = false;
                        stack.push(next);
                    }
                };
                if c > 0 {
                    visit(cell - 1);
                }
                if c + 1 < cols {
                    visit(cell + 1);
                }
                if r > 0 {
                    visit(cell - cols);
                }
                if r + 1 < rows {
                    visit(cell + cols);
                }
            }

            if count < self.min_cells {
                continue;
            }

            let span = ((max_c - min_c + 1) * (max_r - min_r + 1)) as f32;
            let bbox = BoundingBox::new(
                min_c as f32 * step,
                min_r as f32 * step,
                (max_c + 1) as f32 * step,
                (max_r + 1) as f32 * step,
            )
            .clamp_to(width, height);
            detections.push(Detection::person(bbox, (count as f32 / span).min(1.0)));
        }

        Ok(detections)
    }
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000) as u8
}
