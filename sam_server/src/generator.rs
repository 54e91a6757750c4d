//! "Segment everything": prompt the model with a regular grid of points and
//! keep the confident, stable, non-duplicate masks.

use anyhow::Result;
use image::RgbImage;
use ndarray::{Array2, ArrayView2};
use tracing::{debug, info};

use crate::codec;
use crate::model::{Prompt, SegmentModel, MASK_THRESHOLD};
use crate::shared::MaskRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Grid points along each image side.
    pub points_per_side: usize,
    /// Minimum model-predicted IoU for a mask to be kept.
    pub pred_iou_thresh: f32,
    /// Minimum stability score for a mask to be kept.
    pub stability_score_thresh: f32,
    /// Logit offset used when computing the stability score.
    pub stability_score_offset: f32,
    /// Box IoU above which the lower-scoring mask is dropped.
    pub box_nms_thresh: f32,
    pub min_mask_area: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            points_per_side: 16,
            pred_iou_thresh: 0.88,
            stability_score_thresh: 0.95,
            stability_score_offset: 1.0,
            box_nms_thresh: 0.7,
            min_mask_area: 0,
        }
    }
}

struct Candidate {
    mask: Array2<bool>,
    predicted_iou: f32,
    stability: f32,
    bbox: [u32; 4],
    area: u64,
    point: [f32; 2],
}

pub struct AutomaticMaskGenerator {
    config: GeneratorConfig,
}

impl AutomaticMaskGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate masks for the whole image. Records come back unranked.
    pub fn generate(
        &self,
        model: &mut dyn SegmentModel,
        image: &RgbImage,
    ) -> Result<Vec<MaskRecord>> {
        let (w, h) = (image.width(), image.height());
        model.set_image(image)?;

        let grid = point_grid(self.config.points_per_side, w as f32, h as f32);
        let mut candidates = Vec::new();
        for &[x, y] in &grid {
            let pred = model.predict(&Prompt::point(x, y, 1), true)?;
            for ((mask, logits), &score) in pred.masks.into_iter().zip(&pred.logits).zip(&pred.scores) {
                if score <= self.config.pred_iou_thresh {
                    continue;
                }
                let stability = stability_score(
                    logits.view(),
                    MASK_THRESHOLD,
                    self.config.stability_score_offset,
                );
                if stability <= self.config.stability_score_thresh {
                    continue;
                }
                let area = codec::area(mask.view());
                if area == 0 || area < self.config.min_mask_area {
                    continue;
                }
                let bbox = codec::bbox(mask.view());
                candidates.push(Candidate {
                    mask,
                    predicted_iou: score,
                    stability,
                    bbox,
                    area,
                    point: [x, y],
                });
            }
        }
        let total = candidates.len();
        let kept = box_nms(candidates, self.config.box_nms_thresh);
        info!(
            "generate: grid={} candidates={} kept={}",
            grid.len(),
            total,
            kept.len()
        );

        Ok(kept
            .into_iter()
            .map(|c| MaskRecord {
                segmentation: codec::encode_mask(c.mask.view()),
                stability_score: c.stability as f64,
                bbox: c.bbox,
                area: c.area,
                predicted_iou: Some(c.predicted_iou as f64),
                point_coords: Some(vec![[c.point[0] as f64, c.point[1] as f64]]),
                crop_box: Some([0, 0, w, h]),
            })
            .collect())
    }
}

/// `n x n` points at the centres of a regular grid over a `w x h` image.
pub fn point_grid(n: usize, w: f32, h: f32) -> Vec<[f32; 2]> {
    let step = 1.0 / n as f32;
    let offset = step / 2.0;
    let mut points = Vec::with_capacity(n * n);
    for j in 0..n {
        for i in 0..n {
            points.push([
                (offset + i as f32 * step) * w,
                (offset + j as f32 * step) * h,
            ]);
        }
    }
    points
}

/// IoU between the masks obtained by thresholding `logits` at
/// `threshold + offset` and `threshold - offset`.
pub fn stability_score(logits: ArrayView2<'_, f32>, threshold: f32, offset: f32) -> f32 {
    let mut intersection = 0u64;
    let mut union = 0u64;
    for &v in logits.iter() {
        if v > threshold + offset {
            intersection += 1;
        }
        if v > threshold - offset {
            union += 1;
        }
    }
    if union == 0 {
        return 0.0;
    }
    intersection as f32 / union as f32
}

/// IoU of two `[x, y, w, h]` boxes.
pub fn box_iou(a: [u32; 4], b: [u32; 4]) -> f32 {
    let (ax2, ay2) = (a[0] + a[2], a[1] + a[3]);
    let (bx2, by2) = (b[0] + b[2], b[1] + b[3]);
    let iw = ax2.min(bx2).saturating_sub(a[0].max(b[0])) as f64;
    let ih = ay2.min(by2).saturating_sub(a[1].max(b[1])) as f64;
    let inter = iw * ih;
    let union = (a[2] as f64 * a[3] as f64) + (b[2] as f64 * b[3] as f64) - inter;
    if union <= 0.0 {
        return 0.0;
    }
    (inter / union) as f32
}

/// Greedy NMS by predicted IoU, highest first.
fn box_nms(mut candidates: Vec<Candidate>, thresh: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.predicted_iou.total_cmp(&a.predicted_iou));
    let mut kept: Vec<Candidate> = Vec::new();
    for c in candidates {
        if kept.iter().all(|k| box_iou(k.bbox, c.bbox) <= thresh) {
            kept.push(c);
        } else {
            debug!("nms: dropped box {:?}", c.bbox);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Prediction;

    /// Returns the image quadrant containing the click as a confident mask.
    struct QuadrantModel {
        size: Option<(usize, usize)>,
        score: f32,
    }

    impl SegmentModel for QuadrantModel {
        fn set_image(&mut self, image: &RgbImage) -> Result<()> {
            self.size = Some((image.height() as usize, image.width() as usize));
            Ok(())
        }

        fn predict(&mut self, prompt: &Prompt, _multimask: bool) -> Result<Prediction> {
            let (h, w) = self.size.ok_or_else(|| anyhow::anyhow!("no image"))?;
            let [px, py] = prompt.coords[0];
            let qx = (px as usize) < w / 2;
            let qy = (py as usize) < h / 2;
            let logits = Array2::from_shape_fn((h, w), |(y, x)| {
                if (x < w / 2) == qx && (y < h / 2) == qy {
                    5.0
                } else {
                    -5.0
                }
            });
            Ok(Prediction {
                masks: vec![logits.mapv(|v| v > MASK_THRESHOLD)],
                scores: vec![self.score],
                logits: vec![logits],
            })
        }
    }

    #[test]
    fn test_point_grid() {
        let pts = point_grid(2, 8.0, 4.0);
        assert_eq!(pts, vec![[2.0, 1.0], [6.0, 1.0], [2.0, 3.0], [6.0, 3.0]]);
    }

    #[test]
    fn test_stability_score() {
        let logits = ndarray::array![[2.0f32, 0.5], [-0.5, -2.0]];
        // > 1.0: one pixel; > -1.0: three pixels
        let s = stability_score(logits.view(), 0.0, 1.0);
        assert!((s - 1.0 / 3.0).abs() < 1e-6);
        let empty = Array2::from_elem((2, 2), -9.0f32);
        assert_eq!(stability_score(empty.view(), 0.0, 1.0), 0.0);
    }

    #[test]
    fn test_box_iou() {
        assert_eq!(box_iou([0, 0, 2, 2], [0, 0, 2, 2]), 1.0);
        assert_eq!(box_iou([0, 0, 2, 2], [2, 2, 2, 2]), 0.0);
        assert!((box_iou([0, 0, 2, 2], [1, 0, 2, 2]) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_generate_dedupes_quadrants() {
        let image = RgbImage::new(8, 8);
        let mut model = QuadrantModel {
            size: None,
            score: 0.95,
        };
        let generator = AutomaticMaskGenerator::new(GeneratorConfig {
            points_per_side: 4,
            ..GeneratorConfig::default()
        });
        let records = generator.generate(&mut model, &image).unwrap();
        assert_eq!(records.len(), 4);
        for r in &records {
            assert_eq!(r.area, 16);
            assert_eq!(r.segmentation.len(), 8);
            assert_eq!(r.stability_score, 1.0);
            assert_eq!(r.crop_box, Some([0, 0, 8, 8]));
        }
        let mut boxes: Vec<[u32; 4]> = records.iter().map(|r| r.bbox).collect();
        boxes.sort();
        assert_eq!(
            boxes,
            vec![[0, 0, 3, 3], [0, 4, 3, 3], [4, 0, 3, 3], [4, 4, 3, 3]]
        );
    }

    #[test]
    fn test_generate_drops_low_confidence() {
        let image = RgbImage::new(8, 8);
        let mut model = QuadrantModel {
            size: None,
            score: 0.5,
        };
        let generator = AutomaticMaskGenerator::new(GeneratorConfig::default());
        assert!(generator.generate(&mut model, &image).unwrap().is_empty());
    }

    #[test]
    fn test_generate_drops_scores_at_threshold() {
        let image = RgbImage::new(8, 8);
        let mut model = QuadrantModel {
            size: None,
            score: 0.88,
        };
        let generator = AutomaticMaskGenerator::new(GeneratorConfig::default());
        assert!(generator.generate(&mut model, &image).unwrap().is_empty());

        // quadrant logits are saturated, so stability is exactly 1.0
        let strict = AutomaticMaskGenerator::new(GeneratorConfig {
            stability_score_thresh: 1.0,
            ..GeneratorConfig::default()
        });
        model.score = 0.95;
        assert!(strict.generate(&mut model, &image).unwrap().is_empty());
    }
}
