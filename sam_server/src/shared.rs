use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Click prompt in original image pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Point {
    #[schema(example = 320)]
    pub x: i32,
    #[schema(example = 240)]
    pub y: i32,
}

/// `points` form field of `/api/point`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Points {
    /// Click positions.
    #[schema(example = json!([{"x": 320, "y": 240}]))]
    pub points: Vec<Point>,
    /// One label per point: 1 = foreground, 0 = background.
    #[schema(example = json!([1]))]
    pub points_labels: Vec<i32>,
}

/// `box` form field of `/api/box`, corners in image pixel coordinates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct BoxPrompt {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoxPrompt {
    pub fn center(&self) -> [f32; 2] {
        [
            (self.x1 as f32 + self.x2 as f32) / 2.0,
            (self.y1 as f32 + self.y2 as f32) / 2.0,
        ]
    }
}

/// Run-length compressed mask: one `<count><T|F>...` string per image row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
#[serde(transparent)]
#[schema(example = json!(["3F2T1F", "6T"]))]
pub struct CompressedMask(pub Vec<String>);

impl CompressedMask {
    pub fn rows(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One candidate segmentation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct MaskRecord {
    pub segmentation: CompressedMask,
    /// Model confidence, used only as a sort key.
    #[schema(example = 0.97)]
    pub stability_score: f64,
    /// `[x, y, w, h]`; all zeros when the prompt path does not compute it.
    #[schema(example = json!([0, 0, 0, 0]))]
    pub bbox: [u32; 4],
    /// Number of foreground pixels.
    #[schema(example = 1532)]
    pub area: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicted_iou: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_coords: Option<Vec<[f64; 2]>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_box: Option<[u32; 4]>,
}

/// Envelope returned by the mask endpoints. `code` is 0 on success.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MasksResponse {
    #[schema(example = 0)]
    pub code: i32,
    pub data: Vec<MaskRecord>,
}

impl MasksResponse {
    pub fn ok(data: Vec<MaskRecord>) -> Self {
        Self { code: 0, data }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HelloResponse {
    #[schema(example = 0)]
    pub code: i32,
    #[schema(example = "Hello World")]
    pub data: String,
}
