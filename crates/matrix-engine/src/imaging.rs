use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, Rgb, Rgb32FImage, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// RGB frame with channels normalised to `[0, 1]`.
pub type Frame = Rgb32FImage;

pub const CANVAS_SIZE: u32 = 512;

const ERROR_BACKGROUND: Rgb<u8> = Rgb([128, 128, 128]);
const ERROR_TEXT: Rgb<u8> = Rgb([255, 0, 0]);
const ERROR_FONT_SIZE: f32 = 60.0;

static EMBEDDED_FONT: LazyLock<FontArc> = LazyLock::new(|| {
    FontArc::try_from_slice(include_bytes!("../assets/DejaVuSansMono.ttf"))
        .expect("embedded DejaVu Sans Mono should parse")
});

const FONT_FILES: &[&str] = &[
    "arial.ttf",
    "segoeui.ttf",
    "Roboto-Regular.ttf",
    "msyh.ttf",
    "simhei.ttf",
    "DejaVuSans.ttf",
    "LiberationSans-Regular.ttf",
];

const FONT_DIRS: &[&str] = &[
    "C:/Windows/Fonts",
    "/Library/Fonts",
    "/System/Library/Fonts/Supplemental",
    "/usr/share/fonts/truetype/msttcorefonts",
    "/usr/share/fonts/truetype/dejavu",
    "/usr/share/fonts/truetype/liberation",
    "/usr/share/fonts/TTF",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyStyle {
    #[default]
    White,
    Black,
}

impl FromStr for EmptyStyle {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "white" => Ok(Self::White),
            "black" => Ok(Self::Black),
            other => Err(format!("unknown empty style '{other}' (expected white or black)")),
        }
    }
}

pub fn load_image_file(path: &Path) -> Result<Frame> {
    let decode_error = |source| EngineError::Decode {
        path: path.to_path_buf(),
        source,
    };
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let mut decoder = reader.into_decoder().map_err(decode_error)?;
    let orientation = decoder
        .orientation()
        .unwrap_or(Orientation::NoTransforms);
    let mut image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    image.apply_orientation(orientation);
    Ok(image.to_rgb32f())
}

pub fn placeholder(style: EmptyStyle) -> Frame {
    let value = match style {
        EmptyStyle::White => 1.0,
        EmptyStyle::Black => 0.0,
    };
    Rgb32FImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, Rgb([value; 3]))
}

/// Clips to `[0, 1]`, scales by 255 and truncates.
pub fn to_rgb8(frame: &Frame) -> RgbImage {
    RgbImage::from_fn(frame.width(), frame.height(), |x, y| {
        let Rgb(channels) = *frame.get_pixel(x, y);
        Rgb(channels.map(|value| (value * 255.0).clamp(0.0, 255.0) as u8))
    })
}

pub fn from_rgb8(image: RgbImage) -> Frame {
    DynamicImage::ImageRgb8(image).to_rgb32f()
}

#[derive(Clone)]
pub struct LabelRenderer {
    font: FontArc,
    origin: Option<PathBuf>,
}

impl fmt::Debug for LabelRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LabelRenderer")
            .field("origin", &self.origin)
            .finish()
    }
}

impl LabelRenderer {
    pub fn new(explicit: Option<&Path>) -> Self {
        let found = font_candidates(explicit)
            .into_iter()
            .find_map(|path| read_font(&path).map(|font| (font, path)));
        match found {
            Some((font, path)) => Self {
                font,
                origin: Some(path),
            },
            None => {
                debug!("no system label font found; using the embedded font");
                Self::embedded()
            }
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.font.as_deref())
    }

    pub fn embedded() -> Self {
        Self {
            font: EMBEDDED_FONT.clone(),
            origin: None,
        }
    }

    /// Font file in use; `None` for the embedded font.
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn draw(
        &self,
        canvas: &mut RgbImage,
        x: i32,
        y: i32,
        size: f32,
        color: Rgb<u8>,
        text: &str,
    ) {
        draw_text_mut(canvas, color, x, y, PxScale::from(size), &self.font, text);
    }

    pub fn draw_centered(
        &self,
        canvas: &mut RgbImage,
        center: (f32, f32),
        size: f32,
        color: Rgb<u8>,
        text: &str,
    ) {
        let scale = PxScale::from(size);
        let scaled = self.font.as_scaled(scale);
        let line_height = scaled.height() + scaled.line_gap();
        let lines: Vec<&str> = text.split('\n').collect();
        let mut top = center.1 - line_height * lines.len() as f32 / 2.0;
        for line in lines {
            if !line.is_empty() {
                let (width, _) = text_size(scale, &self.font, line);
                let left = center.0 - width as f32 / 2.0;
                draw_text_mut(
                    canvas,
                    color,
                    left.round() as i32,
                    top.round() as i32,
                    scale,
                    &self.font,
                    line,
                );
            }
            top += line_height;
        }
    }

    pub fn error_image(&self, label: &str) -> Frame {
        let mut canvas = RgbImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, ERROR_BACKGROUND);
        let text = format!("MISSING\nFILE:\n\n{label}");
        let center = CANVAS_SIZE as f32 / 2.0;
        self.draw_centered(&mut canvas, (center, center), ERROR_FONT_SIZE, ERROR_TEXT, &text);
        from_rgb8(canvas)
    }
}

fn font_candidates(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = explicit.map(Path::to_path_buf).into_iter().collect();
    for name in FONT_FILES {
        candidates.push(PathBuf::from(name));
        candidates.extend(FONT_DIRS.iter().map(|dir| Path::new(dir).join(name)));
    }
    candidates
}

fn read_font(path: &Path) -> Option<FontArc> {
    let bytes = fs::read(path).ok()?;
    let font = FontArc::try_from_vec(bytes).ok()?;
    debug!(path = %path.display(), "loaded label font");
    Some(font)
}
