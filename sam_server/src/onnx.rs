//! [`SegmentModel`] backed by an exported SAM2 ONNX graph.
//!
//! The graph takes `image [1,3,1024,1024]`, `point_coords [1,N,2]` and
//! `point_labels [1,N]` and returns `masks [1,K,h,w]` (logits) plus
//! `iou_predictions [1,K]`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{s, Array, Array2, Array4, ArrayView2, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use tracing::{debug, info};

use crate::model::{Prediction, Prompt, SegmentModel, MASK_THRESHOLD};

/// Side length of the square model input.
pub const MODEL_SIZE: usize = 1024;

const LABEL_BOX_TOP_LEFT: f32 = 2.0;
const LABEL_BOX_BOTTOM_RIGHT: f32 = 3.0;

// ImageNet mean/std as used by most SAM/SAM2 pipelines
const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

struct EncodedImage {
    tensor: Array4<f32>,
    width: usize,
    height: usize,
}

pub struct OnnxSam {
    session: Session,
    image: Option<EncodedImage>,
}

impl OnnxSam {
    /// Load the graph at `path`. `threads` caps intra-op parallelism; by
    /// default half the available cores are used.
    pub fn load(path: impl AsRef<Path>, threads: Option<usize>) -> Result<Self> {
        let path = path.as_ref();
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let intra = threads.unwrap_or_else(|| std::cmp::max(1, cpus / 2));

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra)?
            .with_inter_threads(1)?
            .with_memory_pattern(true)?
            .with_config_entry("session.set_denormal_as_zero", "1")?
            .commit_from_file(path)
            .with_context(|| format!("loading model from {}", path.display()))?;

        info!("model loaded from {} (intra_threads={})", path.display(), intra);
        Ok(Self {
            session,
            image: None,
        })
    }
}

impl SegmentModel for OnnxSam {
    fn set_image(&mut self, image: &RgbImage) -> Result<()> {
        let (width, height) = (image.width() as usize, image.height() as usize);
        if width == 0 || height == 0 {
            bail!("image has no pixels");
        }
        self.image = Some(EncodedImage {
            tensor: preprocess_image(image),
            width,
            height,
        });
        debug!("set_image: {}x{} preprocessed", width, height);
        Ok(())
    }

    fn predict(&mut self, prompt: &Prompt, multimask: bool) -> Result<Prediction> {
        let Some(encoded) = self.image.as_ref() else {
            bail!("predict called before set_image");
        };
        let (width, height) = (encoded.width, encoded.height);
        let (coords, labels) = prompt_to_model_space(prompt, width, height);
        let n = labels.len();
        if n == 0 {
            bail!("prompt has no points");
        }

        let point_coords = Array::from_shape_vec((1, n, 2), coords)?.into_dyn();
        let point_labels = Array::from_shape_vec((1, n), labels)?.into_dyn();
        let t_image = Tensor::from_array(encoded.tensor.clone())?;
        let t_coords = Tensor::from_array(point_coords)?;
        let t_labels = Tensor::from_array(point_labels)?;

        let outs = self.session.run(ort::inputs![
            "image" => t_image,
            "point_coords" => t_coords,
            "point_labels" => t_labels,
        ])?;

        let scores: Vec<f32> = outs["iou_predictions"]
            .try_extract_array::<f32>()?
            .iter()
            .copied()
            .collect();
        let masks4 = outs["masks"]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?;
        let k = masks4.shape()[1];
        if scores.len() != k {
            bail!("model returned {} masks but {} scores", k, scores.len());
        }

        let mut prediction = Prediction::default();
        for (i, &score) in scores.iter().enumerate() {
            let logits = resize_bilinear(masks4.slice(s![0, i, .., ..]), height, width);
            prediction.masks.push(logits.mapv(|v| v > MASK_THRESHOLD));
            prediction.logits.push(logits);
            prediction.scores.push(score);
        }

        if !multimask {
            prediction = keep_best(prediction);
        }
        debug!("predict: points={} masks={}", n, prediction.len());
        Ok(prediction)
    }
}

/// Keep only the highest-scoring mask.
fn keep_best(mut p: Prediction) -> Prediction {
    let Some(best) = p
        .scores
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
    else {
        return p;
    };
    Prediction {
        masks: vec![p.masks.swap_remove(best)],
        scores: vec![p.scores[best]],
        logits: vec![p.logits.swap_remove(best)],
    }
}

/// Resize to the square model input, convert to CHW and normalize.
pub(crate) fn preprocess_image(img: &RgbImage) -> Array4<f32> {
    let side = MODEL_SIZE as u32;
    let resized = image::imageops::resize(img, side, side, FilterType::Lanczos3);
    let mut arr: Array4<f32> = Array::zeros((1, 3, MODEL_SIZE, MODEL_SIZE));
    for (x, y, p) in resized.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            arr[[0, c, y, x]] = (p[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    arr
}

/// Flatten prompt points (and box corners) into model-space coords + labels.
pub(crate) fn prompt_to_model_space(
    prompt: &Prompt,
    width: usize,
    height: usize,
) -> (Vec<f32>, Vec<f32>) {
    let sx = MODEL_SIZE as f32 / width as f32;
    let sy = MODEL_SIZE as f32 / height as f32;
    let mut coords = Vec::with_capacity(prompt.coords.len() * 2 + 4);
    let mut labels = Vec::with_capacity(prompt.labels.len() + 2);
    for (&[x, y], &label) in prompt.coords.iter().zip(&prompt.labels) {
        coords.push(x * sx);
        coords.push(y * sy);
        labels.push(label as f32);
    }
    if let Some([x1, y1, x2, y2]) = prompt.bbox {
        coords.extend([x1 * sx, y1 * sy, x2 * sx, y2 * sy]);
        labels.extend([LABEL_BOX_TOP_LEFT, LABEL_BOX_BOTTOM_RIGHT]);
    }
    (coords, labels)
}

/// Bilinear resample with half-pixel centres and edge clamping.
pub(crate) fn resize_bilinear(src: ArrayView2<'_, f32>, out_h: usize, out_w: usize) -> Array2<f32> {
    let (h, w) = src.dim();
    let mut out = Array2::<f32>::zeros((out_h, out_w));
    if h == 0 || w == 0 {
        return out;
    }
    for y in 0..out_h {
        let v = (y as f32 + 0.5) / out_h as f32 * h as f32 - 0.5;
        let y1 = v.floor().clamp(0.0, (h - 1) as f32) as usize;
        let y2 = (y1 + 1).min(h - 1);
        let fy = (v - y1 as f32).clamp(0.0, 1.0);
        for x in 0..out_w {
            let u = (x as f32 + 0.5) / out_w as f32 * w as f32 - 0.5;
            let x1 = u.floor().clamp(0.0, (w - 1) as f32) as usize;
            let x2 = (x1 + 1).min(w - 1);
            let fx = (u - x1 as f32).clamp(0.0, 1.0);
            let top = src[(y1, x1)] * (1.0 - fx) + src[(y1, x2)] * fx;
            let bot = src[(y2, x1)] * (1.0 - fx) + src[(y2, x2)] * fx;
            out[(y, x)] = top * (1.0 - fy) + bot * fy;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use ndarray::array;

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let img = RgbImage::from_pixel(8, 4, Rgb([255, 0, 128]));
        let arr = preprocess_image(&img);
        assert_eq!(arr.shape(), &[1, 3, MODEL_SIZE, MODEL_SIZE]);
        let r = arr[[0, 0, 10, 10]];
        let g = arr[[0, 1, 10, 10]];
        assert!((r - (1.0 - MEAN[0]) / STD[0]).abs() < 0.05);
        assert!((g - (0.0 - MEAN[1]) / STD[1]).abs() < 0.05);
    }

    #[test]
    fn test_prompt_scaled_to_model_space() {
        let prompt = Prompt::point(256.0, 128.0, 1);
        let (coords, labels) = prompt_to_model_space(&prompt, 512, 256);
        assert_eq!(coords, vec![512.0, 512.0]);
        assert_eq!(labels, vec![1.0]);
    }

    #[test]
    fn test_box_becomes_corner_points() {
        let prompt = Prompt {
            coords: vec![[50.0, 50.0]],
            labels: vec![1],
            bbox: Some([0.0, 0.0, 100.0, 100.0]),
        };
        let (coords, labels) = prompt_to_model_space(&prompt, 1024, 1024);
        assert_eq!(coords, vec![50.0, 50.0, 0.0, 0.0, 100.0, 100.0]);
        assert_eq!(labels, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_resize_bilinear() {
        let flat = Array2::from_elem((4, 4), 2.5f32);
        let up = resize_bilinear(flat.view(), 7, 9);
        assert_eq!(up.dim(), (7, 9));
        assert!(up.iter().all(|&v| (v - 2.5).abs() < 1e-6));

        let src = array![[0.0f32, 1.0], [2.0, 3.0]];
        let same = resize_bilinear(src.view(), 2, 2);
        assert_eq!(same, src);
    }

    #[test]
    fn test_keep_best() {
        let p = Prediction {
            masks: vec![Array2::from_elem((1, 1), false), Array2::from_elem((1, 1), true)],
            scores: vec![0.2, 0.8],
            logits: vec![Array2::from_elem((1, 1), -1.0), Array2::from_elem((1, 1), 1.0)],
        };
        let best = keep_best(p);
        assert_eq!(best.scores, vec![0.8]);
        assert!(best.masks[0][(0, 0)]);
    }
}
