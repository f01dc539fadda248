use std::env;
use std::path::PathBuf;

pub const OUTPUT_DIR_ENV: &str = "MATRIX_OUTPUT_DIR";
pub const TEMP_DIR_ENV: &str = "MATRIX_TEMP_DIR";
pub const FFMPEG_ENV: &str = "MATRIX_FFMPEG";
pub const FONT_ENV: &str = "MATRIX_FONT";

const DEFAULT_OUTPUT_DIR: &str = "output";
const TEMP_SUBDIR: &str = "matrix";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    /// Explicit encoder binary; otherwise `ffmpeg` is searched for.
    pub ffmpeg: Option<PathBuf>,
    /// Explicit label font; otherwise well-known system fonts are tried.
    pub font: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        Self {
            output_dir: read(OUTPUT_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            temp_dir: read(TEMP_DIR_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| env::temp_dir().join(TEMP_SUBDIR)),
            ffmpeg: read(FFMPEG_ENV).map(PathBuf::from),
            font: read(FONT_ENV).map(PathBuf::from),
        }
    }

    pub fn with_output_dir(mut self, output_dir: Option<PathBuf>) -> Self {
        if let Some(output_dir) = output_dir {
            self.output_dir = output_dir;
        }
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        if let Some(temp_dir) = temp_dir {
            self.temp_dir = temp_dir;
        }
        self
    }

    pub fn with_ffmpeg(mut self, ffmpeg: Option<PathBuf>) -> Self {
        if ffmpeg.is_some() {
            self.ffmpeg = ffmpeg;
        }
        self
    }

    pub fn with_font(mut self, font: Option<PathBuf>) -> Self {
        if font.is_some() {
            self.font = font;
        }
        self
    }
}
