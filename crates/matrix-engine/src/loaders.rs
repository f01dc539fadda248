use std::path::{Path, PathBuf};

use matrix_contracts::identifiers::{resolve, resolve_indexed};
use matrix_contracts::slots::EMPTY_SLOT;
use serde::Serialize;
use tracing::{debug, warn};

use crate::imaging::{load_image_file, placeholder, EmptyStyle, Frame, LabelRenderer};

pub const LOADER_SLOTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum SlotSource {
    Loaded(PathBuf),
    Placeholder,
    Missing,
    DecodeFailed(PathBuf),
}

#[derive(Debug, Clone)]
pub struct SlotImage {
    pub frame: Frame,
    pub source: SlotSource,
}

impl SlotImage {
    fn placeholder(style: EmptyStyle) -> Self {
        Self {
            frame: placeholder(style),
            source: SlotSource::Placeholder,
        }
    }
}

/// One `prefix` + `index` request for the index loader; index 0 means empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSlot {
    pub prefix: String,
    pub index: u32,
}

impl IndexSlot {
    pub fn new(prefix: impl Into<String>, index: u32) -> Self {
        Self {
            prefix: prefix.into(),
            index,
        }
    }
}

pub fn load_indexed(
    directory: &Path,
    slots: &[IndexSlot],
    style: EmptyStyle,
    labels: &LabelRenderer,
) -> Vec<SlotImage> {
    (0..LOADER_SLOTS)
        .map(|position| match slots.get(position) {
            Some(slot) if slot.index != 0 => load_index_slot(directory, slot, labels),
            _ => SlotImage::placeholder(style),
        })
        .collect()
}

fn load_index_slot(directory: &Path, slot: &IndexSlot, labels: &LabelRenderer) -> SlotImage {
    let label = format!("{}{}", slot.prefix, slot.index);
    let Some(path) = resolve_indexed(directory, &slot.prefix, slot.index) else {
        warn!(slot = %label, directory = %directory.display(), "no file for indexed slot");
        return SlotImage {
            frame: labels.error_image(&label),
            source: SlotSource::Missing,
        };
    };
    match load_image_file(&path) {
        Ok(frame) => {
            debug!(slot = %label, path = %path.display(), "loaded indexed slot");
            SlotImage {
                frame,
                source: SlotSource::Loaded(path),
            }
        }
        Err(err) => {
            warn!(slot = %label, error = %err, "failed to load indexed slot");
            SlotImage {
                frame: labels.error_image(&label),
                source: SlotSource::DecodeFailed(path),
            }
        }
    }
}

pub fn load_direct<S: AsRef<str>>(
    directory: &Path,
    inputs: &[S],
    style: EmptyStyle,
    labels: &LabelRenderer,
) -> Vec<SlotImage> {
    (0..LOADER_SLOTS)
        .map(|position| {
            let input = inputs.get(position).map(|raw| raw.as_ref().trim()).unwrap_or("");
            if is_empty_reference(input) {
                SlotImage::placeholder(style)
            } else {
                load_direct_slot(directory, input, labels)
            }
        })
        .collect()
}

fn is_empty_reference(input: &str) -> bool {
    input.is_empty() || input == EMPTY_SLOT || input.eq_ignore_ascii_case("none")
}

fn load_direct_slot(directory: &Path, input: &str, labels: &LabelRenderer) -> SlotImage {
    let Some(path) = resolve(directory, input) else {
        warn!(input, directory = %directory.display(), "no file for direct slot");
        return SlotImage {
            frame: labels.error_image(input),
            source: SlotSource::Missing,
        };
    };
    match load_image_file(&path) {
        Ok(frame) => SlotImage {
            frame,
            source: SlotSource::Loaded(path),
        },
        Err(err) => {
            warn!(input, error = %err, "failed to load direct slot");
            SlotImage {
                frame: labels.error_image(&format!("Error Loading:\n{input}")),
                source: SlotSource::DecodeFailed(path),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use image::{Rgb, RgbImage};
    use serde_json::json;

    use crate::imaging::{to_rgb8, EmptyStyle, LabelRenderer, CANVAS_SIZE};

    use super::{load_direct, load_indexed, IndexSlot, SlotSource, LOADER_SLOTS};

    fn write_png(path: &std::path::Path, color: [u8; 3]) -> anyhow::Result<()> {
        RgbImage::from_pixel(8, 8, Rgb(color)).save(path)?;
        Ok(())
    }

    #[test]
    fn indexed_loader_fills_ten_slots() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("x1.png"), [255, 0, 0])?;
        write_png(&temp.path().join("y02.png"), [0, 255, 0])?;

        let slots = vec![
            IndexSlot::new("x", 1),
            IndexSlot::new("y", 2),
            IndexSlot::new("x", 0),
            IndexSlot::new("z", 4),
        ];
        let labels = LabelRenderer::embedded();
        let loaded = load_indexed(temp.path(), &slots, EmptyStyle::Black, &labels);

        assert_eq!(loaded.len(), LOADER_SLOTS);
        assert_eq!(loaded[0].source, SlotSource::Loaded(temp.path().join("x1.png")));
        assert_eq!(to_rgb8(&loaded[0].frame).get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(loaded[1].source, SlotSource::Loaded(temp.path().join("y02.png")));
        assert_eq!(loaded[2].source, SlotSource::Placeholder);
        assert_eq!(to_rgb8(&loaded[2].frame).get_pixel(5, 5).0, [0, 0, 0]);
        assert_eq!(loaded[3].source, SlotSource::Missing);
        assert_eq!(loaded[3].frame.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
        assert!(loaded[4..]
            .iter()
            .all(|slot| slot.source == SlotSource::Placeholder));
        Ok(())
    }

    #[test]
    fn direct_loader_handles_sentinels_misses_and_broken_files() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        write_png(&temp.path().join("hero shot.png"), [9, 9, 9])?;
        fs::write(temp.path().join("b7.png"), b"not an image")?;

        let inputs = ["0", " NONE ", "", "hero shot", "b7", "missing42"];
        let labels = LabelRenderer::embedded();
        let loaded = load_direct(temp.path(), &inputs, EmptyStyle::White, &labels);

        assert_eq!(loaded.len(), LOADER_SLOTS);
        assert!(loaded[..3]
            .iter()
            .all(|slot| slot.source == SlotSource::Placeholder));
        assert_eq!(to_rgb8(&loaded[0].frame).get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(
            loaded[3].source,
            SlotSource::Loaded(temp.path().join("hero shot.png"))
        );
        assert_eq!(
            loaded[4].source,
            SlotSource::DecodeFailed(temp.path().join("b7.png"))
        );
        assert_eq!(to_rgb8(&loaded[4].frame).get_pixel(0, 0).0, [128, 128, 128]);
        assert_ne!(to_rgb8(&loaded[4].frame), to_rgb8(&loaded[5].frame));
        assert_eq!(loaded[5].source, SlotSource::Missing);
        Ok(())
    }

    #[test]
    fn slot_source_serializes_with_kind_tag() -> anyhow::Result<()> {
        assert_eq!(
            serde_json::to_value(SlotSource::Placeholder)?,
            json!({"kind": "placeholder"})
        );
        assert_eq!(
            serde_json::to_value(SlotSource::Loaded("/a/x1.png".into()))?,
            json!({"kind": "loaded", "path": "/a/x1.png"})
        );
        Ok(())
    }
}
