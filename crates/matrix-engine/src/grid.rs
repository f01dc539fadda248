use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use matrix_contracts::slots::SlotCount;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::imaging::{from_rgb8, to_rgb8, Frame, LabelRenderer, CANVAS_SIZE};

pub const MIN_THUMBNAIL: u32 = 64;
pub const MAX_THUMBNAIL: u32 = 1024;

const BACKGROUND: Rgb<u8> = Rgb([20, 20, 20]);
const LABEL_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const LABEL_BAND: u32 = 30;
const LABEL_SIZE: f32 = 20.0;
const LABEL_CHAR_WIDTH: i32 = 10;
const CELL_PADDING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridOptions {
    pub thumbnail_size: u32,
    pub columns: u32,
    pub add_labels: bool,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            thumbnail_size: 256,
            columns: 5,
            add_labels: true,
        }
    }
}

pub fn compose_grid(
    frames: &[Option<Frame>],
    options: &GridOptions,
    slots: SlotCount,
    labels: &LabelRenderer,
) -> Frame {
    let present: Vec<(usize, &Frame)> = frames
        .iter()
        .take(slots.len())
        .enumerate()
        .filter_map(|(index, frame)| frame.as_ref().map(|frame| (index + 1, frame)))
        .collect();
    if present.is_empty() {
        return Frame::new(CANVAS_SIZE, CANVAS_SIZE);
    }

    let cell = options.thumbnail_size.clamp(MIN_THUMBNAIL, MAX_THUMBNAIL);
    let columns = options.columns.clamp(1, slots.len() as u32);
    let rows = (present.len() as u32).div_ceil(columns);
    let band = if options.add_labels { LABEL_BAND } else { 0 };
    let mut canvas = RgbImage::from_pixel(columns * cell, rows * (cell + band), BACKGROUND);
    debug!(
        frames = present.len(),
        columns,
        rows,
        width = canvas.width(),
        height = canvas.height(),
        "composing grid"
    );

    for (position, (slot, frame)) in present.into_iter().enumerate() {
        let row = position as u32 / columns;
        let column = position as u32 % columns;
        let x_offset = column * cell;
        let y_offset = row * (cell + band);

        let source = to_rgb8(frame);
        let (width, height) =
            thumbnail_dims(source.width(), source.height(), cell - CELL_PADDING);
        let thumb = if (width, height) == source.dimensions() {
            source
        } else {
            imageops::resize(&source, width, height, FilterType::CatmullRom)
        };
        let paste_x = x_offset + (cell - width) / 2;
        let paste_y = y_offset + (cell - height) / 2 + band;
        imageops::overlay(&mut canvas, &thumb, i64::from(paste_x), i64::from(paste_y));

        if options.add_labels {
            let label = format!("Img {slot}");
            let text_width = label.chars().count() as i32 * LABEL_CHAR_WIDTH;
            let text_x = x_offset as i32 + (cell as i32 - text_width) / 2;
            labels.draw(
                &mut canvas,
                text_x,
                y_offset as i32 + 5,
                LABEL_SIZE,
                LABEL_COLOR,
                &label,
            );
        }
    }
    from_rgb8(canvas)
}

/// Shrinks `(width, height)` to fit a `bound`-sized square, keeping the
/// aspect ratio. Images already inside the bound are left alone.
pub(crate) fn thumbnail_dims(width: u32, height: u32, bound: u32) -> (u32, u32) {
    if width == 0 || height == 0 || (width <= bound && height <= bound) {
        return (width, height);
    }
    let aspect = f64::from(width) / f64::from(height);
    let bound_f = f64::from(bound);
    if aspect <= 1.0 {
        let x = closest_side(bound_f * aspect, |n| (aspect - n / bound_f).abs());
        (x, bound)
    } else {
        let y = closest_side(bound_f / aspect, |n| (aspect - bound_f / n).abs());
        (bound, y)
    }
}

fn closest_side(value: f64, error: impl Fn(f64) -> f64) -> u32 {
    let (floor, ceil) = (value.floor(), value.ceil());
    let best = if error(ceil) < error(floor) { ceil } else { floor };
    (best as u32).max(1)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, Rgb32FImage};
    use matrix_contracts::slots::SlotCount;

    use crate::imaging::{to_rgb8, LabelRenderer, CANVAS_SIZE};

    use super::{compose_grid, thumbnail_dims, GridOptions};

    fn solid(width: u32, height: u32, color: [f32; 3]) -> Rgb32FImage {
        Rgb32FImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn empty_input_yields_black_canvas() {
        let grid = compose_grid(
            &[None, None],
            &GridOptions::default(),
            SlotCount::Five,
            &LabelRenderer::embedded(),
        );
        assert_eq!(grid.dimensions(), (CANVAS_SIZE, CANVAS_SIZE));
        assert_eq!(grid.get_pixel(100, 100).0, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn thumbnails_shrink_but_never_enlarge() {
        assert_eq!(thumbnail_dims(100, 50, 54), (54, 27));
        assert_eq!(thumbnail_dims(50, 100, 54), (27, 54));
        assert_eq!(thumbnail_dims(30, 20, 54), (30, 20));
        assert_eq!(thumbnail_dims(1000, 1, 54), (54, 1));
    }

    #[test]
    fn frames_are_centred_in_cells_and_skip_empty_slots() {
        let frames = vec![
            Some(solid(100, 50, [1.0, 0.0, 0.0])),
            None,
            Some(solid(20, 20, [0.0, 1.0, 0.0])),
            Some(solid(20, 20, [0.0, 0.0, 1.0])),
        ];
        let options = GridOptions {
            thumbnail_size: 64,
            columns: 2,
            add_labels: false,
        };
        let grid = to_rgb8(&compose_grid(
            &frames,
            &options,
            SlotCount::Five,
            &LabelRenderer::embedded(),
        ));

        assert_eq!(grid.dimensions(), (128, 128));
        assert_eq!(grid.get_pixel(0, 0).0, [20, 20, 20]);
        // 54x27 thumbnail pasted at (5, 18).
        assert_eq!(grid.get_pixel(32, 31).0, [255, 0, 0]);
        assert_eq!(grid.get_pixel(32, 10).0, [20, 20, 20]);
        // Slot 3 lands in the second cell, slot 4 wraps to the next row.
        assert_eq!(grid.get_pixel(64 + 32, 32).0, [0, 255, 0]);
        assert_eq!(grid.get_pixel(32, 64 + 32).0, [0, 0, 255]);
    }

    #[test]
    fn labels_add_a_band_per_row_and_options_are_clamped() {
        let frames = vec![Some(solid(10, 10, [1.0, 1.0, 1.0])); 3];
        let options = GridOptions {
            thumbnail_size: 8,
            columns: 40,
            add_labels: true,
        };
        let grid = to_rgb8(&compose_grid(
            &frames,
            &options,
            SlotCount::Five,
            &LabelRenderer::embedded(),
        ));
        // Thumbnail clamps to 64, columns to the five slots.
        assert_eq!(grid.dimensions(), (5 * 64, 64 + 30));
        assert_eq!(grid.get_pixel(32, 30 + 32).0, [255, 255, 255]);
        let band_lit = (0..64)
            .flat_map(|x| (0..30).map(move |y| (x, y)))
            .any(|(x, y)| grid.get_pixel(x, y).0[0] > 100);
        assert!(band_lit);
    }
}
