//! Boundary to the segmentation model.
//!
//! The server talks to the model only through [`SegmentModel`]; the ONNX
//! backed implementation lives in [`crate::onnx`].

use image::RgbImage;
use ndarray::Array2;

use crate::shared::{BoxPrompt, Points};

/// Logits above this value are foreground.
pub const MASK_THRESHOLD: f32 = 0.0;

/// Conditioning input for one prediction, in original image pixel space.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub coords: Vec<[f32; 2]>,
    /// 1 = foreground, 0 = background.
    pub labels: Vec<i32>,
    /// `[x1, y1, x2, y2]`.
    pub bbox: Option<[f32; 4]>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("at least one point required")]
    NoPoints,
    #[error("{points} points but {labels} labels")]
    LabelCount { points: usize, labels: usize },
}

impl Prompt {
    pub fn point(x: f32, y: f32, label: i32) -> Self {
        Self {
            coords: vec![[x, y]],
            labels: vec![label],
            bbox: None,
        }
    }

    /// A box plus its centre as a foreground click.
    pub fn from_box(b: &BoxPrompt) -> Self {
        let [cx, cy] = b.center();
        Self {
            coords: vec![[cx, cy]],
            labels: vec![1],
            bbox: Some([b.x1 as f32, b.y1 as f32, b.x2 as f32, b.y2 as f32]),
        }
    }
}

impl TryFrom<&Points> for Prompt {
    type Error = PromptError;

    fn try_from(p: &Points) -> Result<Self, Self::Error> {
        if p.points.is_empty() {
            return Err(PromptError::NoPoints);
        }
        if p.points.len() != p.points_labels.len() {
            return Err(PromptError::LabelCount {
                points: p.points.len(),
                labels: p.points_labels.len(),
            });
        }
        Ok(Self {
            coords: p.points.iter().map(|pt| [pt.x as f32, pt.y as f32]).collect(),
            labels: p.points_labels.clone(),
            bbox: None,
        })
    }
}

/// Model output for one prompt: `K` masks at image resolution with their
/// scores and the logits they were thresholded from.
#[derive(Debug, Clone, Default)]
pub struct Prediction {
    pub masks: Vec<Array2<bool>>,
    pub scores: Vec<f32>,
    pub logits: Vec<Array2<f32>>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

/// A promptable segmentation model.
///
/// `set_image` is called once per request; `predict` may follow any number of
/// times against that image.
pub trait SegmentModel: Send {
    fn set_image(&mut self, image: &RgbImage) -> anyhow::Result<()>;

    fn predict(&mut self, prompt: &Prompt, multimask: bool) -> anyhow::Result<Prediction>;
}
