use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::ImageEncoder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{EngineError, Result};
use crate::imaging::{to_rgb8, Frame};
use crate::output::SaveTarget;

pub const DEFAULT_PREFIX: &str = "train_data/img";
pub const DEFAULT_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetFormat {
    #[default]
    Png,
    Jpg,
    Webp,
}

impl DatasetFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Webp => "webp",
        }
    }
}

impl FromStr for DatasetFormat {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpg),
            "webp" => Ok(Self::Webp),
            other => Err(format!("unknown dataset format '{other}' (expected png, jpg or webp)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetRequest<'a> {
    pub frames: &'a [Frame],
    pub text: &'a str,
    pub filename_prefix: &'a str,
    pub format: DatasetFormat,
    /// Lossy quality for jpg and webp, clamped to 1..=100.
    pub quality: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavedSample {
    pub image: PathBuf,
    pub caption: PathBuf,
    pub subfolder: String,
}

pub fn save_dataset(output_dir: &Path, request: &DatasetRequest<'_>) -> Result<Vec<SavedSample>> {
    if request.frames.is_empty() {
        return Err(EngineError::EmptyBatch);
    }
    let target = SaveTarget::resolve(output_dir, request.filename_prefix)?;
    let quality = request.quality.clamp(1, 100);

    let mut saved = Vec::with_capacity(request.frames.len());
    for (offset, frame) in request.frames.iter().enumerate() {
        let counter = target.counter + offset as u32;
        let image_path = target.path(counter, request.format.extension());
        write_image(&image_path, frame, request.format, quality)?;

        let caption_path = target.path(counter, "txt");
        fs::write(&caption_path, request.text)?;

        info!(image = %image_path.display(), "saved dataset sample");
        saved.push(SavedSample {
            image: image_path,
            caption: caption_path,
            subfolder: target.subfolder.clone(),
        });
    }
    Ok(saved)
}

fn write_image(path: &Path, frame: &Frame, format: DatasetFormat, quality: u8) -> Result<()> {
    let pixels = to_rgb8(frame);
    let (width, height) = pixels.dimensions();
    let color = image::ExtendedColorType::Rgb8;
    match format {
        DatasetFormat::Png => PngEncoder::new(BufWriter::new(File::create(path)?))
            .write_image(pixels.as_raw(), width, height, color)?,
        DatasetFormat::Jpg => {
            JpegEncoder::new_with_quality(BufWriter::new(File::create(path)?), quality)
                .write_image(pixels.as_raw(), width, height, color)?
        }
        DatasetFormat::Webp => {
            let encoded = webp::Encoder::from_rgb(pixels.as_raw(), width, height)
                .encode(f32::from(quality));
            fs::write(path, &*encoded)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{Rgb, Rgb32FImage};

    use crate::error::EngineError;

    use super::{save_dataset, DatasetFormat, DatasetRequest};

    fn frames(count: usize) -> Vec<Rgb32FImage> {
        (0..count)
            .map(|index| Rgb32FImage::from_pixel(16, 12, Rgb([index as f32 / 4.0, 0.5, 1.0])))
            .collect()
    }

    #[test]
    fn writes_image_and_caption_per_frame() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let frames = frames(2);
        let saved = save_dataset(
            temp.path(),
            &DatasetRequest {
                frames: &frames,
                text: "a red fox, studio light",
                filename_prefix: "train_data/img",
                format: DatasetFormat::Png,
                quality: 95,
            },
        )?;

        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].image, temp.path().join("train_data/img_00001_.png"));
        assert_eq!(saved[1].caption, temp.path().join("train_data/img_00002_.txt"));
        assert_eq!(saved[0].subfolder, "train_data");
        assert_eq!(
            fs::read_to_string(&saved[1].caption)?,
            "a red fox, studio light"
        );
        assert_eq!(image::image_dimensions(&saved[0].image)?, (16, 12));
        Ok(())
    }

    #[test]
    fn later_batches_continue_the_counter() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let frames = frames(1);
        for format in [DatasetFormat::Jpg, DatasetFormat::Webp] {
            save_dataset(
                temp.path(),
                &DatasetRequest {
                    frames: &frames,
                    text: "",
                    filename_prefix: "set",
                    format,
                    quality: 0,
                },
            )?;
        }
        assert!(temp.path().join("set_00001_.jpg").is_file());
        assert!(temp.path().join("set_00002_.webp").is_file());
        assert_eq!(image::image_dimensions(temp.path().join("set_00002_.webp"))?, (16, 12));
        Ok(())
    }

    #[test]
    fn webp_quality_controls_lossy_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let noisy = vec![Rgb32FImage::from_fn(64, 64, |x, y| {
            let value = ((x * 37 + y * 91) ^ (x * y)) % 256;
            Rgb([value as f32 / 255.0, (255 - value) as f32 / 255.0, 0.5])
        })];
        let mut sizes = Vec::new();
        for (prefix, quality) in [("low", 5), ("high", 100)] {
            let saved = save_dataset(
                temp.path(),
                &DatasetRequest {
                    frames: &noisy,
                    text: "",
                    filename_prefix: prefix,
                    format: DatasetFormat::Webp,
                    quality,
                },
            )?;
            assert_eq!(image::image_dimensions(&saved[0].image)?, (64, 64));
            sizes.push(fs::read(&saved[0].image)?);
        }
        assert_ne!(sizes[0], sizes[1]);
        assert!(sizes[0].len() < sizes[1].len());
        Ok(())
    }

    #[test]
    fn empty_batches_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let result = save_dataset(
            temp.path(),
            &DatasetRequest {
                frames: &[],
                text: "x",
                filename_prefix: "img",
                format: DatasetFormat::Png,
                quality: 95,
            },
        );
        assert!(matches!(result, Err(EngineError::EmptyBatch)));
        assert_eq!("JPEG".parse::<DatasetFormat>(), Ok(DatasetFormat::Jpg));
        Ok(())
    }
}
