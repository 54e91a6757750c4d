//! Segment Anything over HTTP with run-length compressed masks.

pub mod codec;
pub mod config;
pub mod error;
pub mod generator;
pub mod model;
pub mod onnx;
pub mod ranker;
pub mod server;
pub mod shared;

pub use codec::{decode, decode_mask, encode, encode_mask};
pub use error::{AppError, CodecError};
pub use model::{Prediction, Prompt, SegmentModel};
pub use ranker::{rank, Scored};
pub use shared::{CompressedMask, MaskRecord};
