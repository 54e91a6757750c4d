use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

use crate::generator::GeneratorConfig;

/// Segment Anything HTTP server.
#[derive(Parser, Debug, Clone)]
#[command(name = "sam_server", version, about)]
pub struct ServerConfig {
    /// Address to bind.
    #[arg(long, env = "SAM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "SAM_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Path to the SAM2 ONNX graph.
    #[arg(long, env = "SAM_MODEL", default_value = "model/sam2_tiny.onnx")]
    pub model: PathBuf,

    /// Intra-op threads for inference (default: half the cores).
    #[arg(long, env = "SAM_THREADS")]
    pub threads: Option<usize>,

    /// Directory with the web front-end, served for unknown paths.
    #[arg(long, env = "SAM_STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// Maximum upload size in MiB.
    #[arg(long, env = "SAM_BODY_LIMIT_MB", default_value_t = 50)]
    pub body_limit_mb: usize,

    /// Return at most this many masks per request.
    #[arg(long, env = "SAM_MAX_MASKS")]
    pub max_masks: Option<usize>,

    /// Grid density for /api/everything.
    #[arg(long, env = "SAM_POINTS_PER_SIDE", default_value_t = 16)]
    pub points_per_side: usize,

    #[arg(long, env = "SAM_PRED_IOU_THRESH", default_value_t = 0.88)]
    pub pred_iou_thresh: f32,

    #[arg(long, env = "SAM_STABILITY_THRESH", default_value_t = 0.95)]
    pub stability_score_thresh: f32,

    #[arg(long, env = "SAM_BOX_NMS_THRESH", default_value_t = 0.7)]
    pub box_nms_thresh: f32,
}

impl ServerConfig {
    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }

    pub fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }

    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            points_per_side: self.points_per_side,
            pred_iou_thresh: self.pred_iou_thresh,
            stability_score_thresh: self.stability_score_thresh,
            box_nms_thresh: self.box_nms_thresh,
            ..GeneratorConfig::default()
        }
    }
}
