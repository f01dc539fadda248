use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("invalid input: {0}")]
    InputInvalid(String),

    #[error("output prefix escapes the output directory: {0}")]
    InvalidOutputPath(String),

    #[error("frame {index} is {actual_width}x{actual_height}, expected {width}x{height}")]
    FrameSizeMismatch {
        index: usize,
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("no frames to write")]
    EmptyBatch,

    #[error("ffmpeg not found; install it on PATH or set MATRIX_FFMPEG")]
    FfmpegNotFound,

    #[error("ffmpeg exited with {status}: {stderr}")]
    EncoderFailed { status: String, stderr: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
