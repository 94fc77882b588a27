use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Tuning for the CPU contrast-blob backend.
#[derive(Clone, Debug, PartialEq)]
pub struct CpuBackendConfig {
    /// Side of one analysis cell in pixels.
    pub cell_size: u32,
    /// Minimum absolute luma deviation (0..255) from the background for a cell to count.
    pub luma_threshold: f32,
    /// Clusters smaller than this many cells are discarded as noise.
    pub min_cells: usize,
}

impl Default for CpuBackendConfig {
    fn default() -> Self {
        Self {
            cell_size: 16,
            luma_threshold: 40.0,
            min_cells: 2,
        }
    }
}

/// Stateless CPU backend: finds regions that stand out from the background.
///
/// The frame is split into a grid of cells. The background level is the
/// median cell luma; cells deviating from it by more than the threshold are
/// grouped into 4-connected clusters, and every large-enough cluster becomes
/// one bounding box (clipped to the frame).
#[derive(Default)]
pub struct CpuBackend {
    config: CpuBackendConfig,
}

impl CpuBackend {
    pub fn new(config: CpuBackendConfig) -> Self {
        Self { config }
    }

    fn cell_means(frame: &RgbImage, cell: usize, grid_w: usize, grid_h: usize) -> Vec<f32> {
        let mut sums = vec![0.0f32; grid_w * grid_h];
        let mut counts = vec![0u32; grid_w * grid_h];
        for (x, y, pixel) in frame.enumerate_pixels() {
            let [r, g, b] = pixel.0;
            let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
            let idx = (y as usize / cell) * grid_w + x as usize / cell;
            sums[idx] += luma;
            counts[idx] += 1;
        }
        sums.iter()
            .zip(&counts)
            .map(|(sum, &count)| if count == 0 { 0.0 } else { sum / count as f32 })
            .collect()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let (width, height) = frame.dimensions();
        let cell = self.config.cell_size.max(1);
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }
        let grid_w = width.div_ceil(cell) as usize;
        let grid_h = height.div_ceil(cell) as usize;
        let means = Self::cell_means(frame, cell as usize, grid_w, grid_h);

        let mut sorted = means.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let background = sorted[sorted.len() / 2];

        let deviation: Vec<f32> = means.iter().map(|m| (m - background).abs()).collect();
        let active: Vec<bool> = deviation
            .iter()
            .map(|d| *d > self.config.luma_threshold)
            .collect();

        let mut visited = vec![false; active.len()];
        let mut detections = Vec::new();
        for seed in 0..active.len() {
            if !active[seed] || visited[seed] {
                continue;
            }
            visited[seed] = true;
            let mut stack = vec![seed];
            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut cells = 0usize;
            let mut heat = 0.0f32;

            while let Some(idx) = stack.pop() {
                let (cx, cy) = (idx % grid_w, idx / grid_w);
                min_x = min_x.min(cx);
                min_y = min_y.min(cy);
                max_x = max_x.max(cx);
                max_y = max_y.max(cy);
                cells += 1;
                heat += deviation[idx];

                let mut neighbours = Vec::with_capacity(4);
                if cx > 0 {
                    neighbours.push(idx - 1);
                }
                if cx + 1 < grid_w {
                    neighbours.push(idx + 1);
                }
                if cy > 0 {
                    neighbours.push(idx - grid_w);
                }
                if cy + 1 < grid_h {
                    neighbours.push(idx + grid_w);
                }
                for next in neighbours {
                    if active[next] && !visited[next] {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }

            if cells < self.config.min_cells {
                continue;
            }
            let cell = cell as usize;
            let left = min_x * cell;
            let top = min_y * cell;
            let right = ((max_x + 1) * cell).min(width as usize);
            let bottom = ((max_y + 1) * cell).min(height as usize);
            let confidence = (heat / cells as f32 / 255.0).clamp(0.0, 1.0);
            detections.push(
                Detection::new(
                    left as f32,
                    top as f32,
                    (right - left) as f32,
                    (bottom - top) as f32,
                )
                .with_confidence(confidence),
            );
        }

        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame_with_squares(size: u32, squares: &[(u32, u32, u32)]) -> RgbImage {
        let mut frame = RgbImage::from_pixel(size, size, Rgb([10, 10, 10]));
        for &(x0, y0, side) in squares {
            for y in y0..y0 + side {
                for x in x0..x0 + side {
                    frame.put_pixel(x, y, Rgb([250, 250, 250]));
                }
            }
        }
        frame
    }

    fn backend() -> CpuBackend {
        CpuBackend::new(CpuBackendConfig {
            cell_size: 8,
            luma_threshold: 40.0,
            min_cells: 2,
        })
    }

    #[test]
    fn cpu_backend_boxes_bright_square() {
        let frame = frame_with_squares(64, &[(16, 16, 32)]);
        let detections = backend().detect(&frame).unwrap();
        assert_eq!(detections.len(), 1);
        let d = detections[0];
        assert_eq!((d.x, d.y, d.w, d.h), (16.0, 16.0, 32.0, 32.0));
        assert!(d.confidence > 0.9);
    }

    #[test]
    fn cpu_backend_separates_disjoint_regions() {
        let frame = frame_with_squares(64, &[(0, 0, 16), (40, 40, 16)]);
        let detections = backend().detect(&frame).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!((detections[0].x, detections[0].y), (0.0, 0.0));
        assert_eq!((detections[1].x, detections[1].y), (40.0, 40.0));
    }

    #[test]
    fn cpu_backend_ignores_uniform_frames_and_small_noise() {
        let uniform = RgbImage::from_pixel(64, 64, Rgb([128, 128, 128]));
        assert!(backend().detect(&uniform).unwrap().is_empty());

        let speck = frame_with_squares(64, &[(8, 8, 8)]);
        assert!(backend().detect(&speck).unwrap().is_empty());
    }

    #[test]
    fn cpu_backend_is_stateless() {
        let mut backend = backend();
        let frame = frame_with_squares(64, &[(16, 16, 32)]);
        let first = backend.detect(&frame).unwrap();
        let second = backend.detect(&frame).unwrap();
        assert_eq!(first, second);
    }
}
