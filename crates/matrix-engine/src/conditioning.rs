use std::str::FromStr;

use image::imageops::{self, FilterType};
use matrix_contracts::slots::SlotCount;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::imaging::Frame;

pub const DEFAULT_VISION_SIZE: u32 = 384;
pub const LATENT_AREA_SIDE: u32 = 1024;
const LATENT_MULTIPLE: f64 = 8.0;

pub const CHAT_TEMPLATE: &str = "<|im_start|>system\nDescribe the key features of the input image (color, shape, size, texture, objects, background), then explain how the user's text instruction should alter or modify the image. Generate a new image that meets the user's requirements while maintaining consistency with the original input where appropriate.<|im_end|>\n<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatentAlignment {
    Disabled,
    #[default]
    #[serde(rename = "image1_only")]
    Image1Only,
    All,
}

impl FromStr for LatentAlignment {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "image1_only" => Ok(Self::Image1Only),
            "all" => Ok(Self::All),
            other => Err(format!(
                "unknown latent alignment '{other}' (expected disabled, image1_only or all)"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LatentPlan {
    Reference,
    Rescaled { width: u32, height: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImagePlan {
    /// Input slot the image came from, 1-based.
    pub slot: usize,
    pub width: u32,
    pub height: u32,
    pub vision_width: u32,
    pub vision_height: u32,
    /// `None` when no latent encoder is attached.
    pub latent: Option<LatentPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncodePlan {
    pub vision_size: u32,
    pub images: Vec<ImagePlan>,
    pub positive: String,
    pub negative: String,
    /// Slot whose full-resolution encoding becomes the output latent.
    pub output_latent_slot: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct EncodeRequest<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub smart_input: bool,
    pub alignment: LatentAlignment,
    pub has_vae: bool,
    /// Per-slot image dimensions; `None` for unconnected slots.
    pub image_sizes: &'a [Option<(u32, u32)>],
    pub slots: SlotCount,
}

pub fn vision_size(smart_input: bool, image_count: usize) -> u32 {
    if !smart_input {
        return DEFAULT_VISION_SIZE;
    }
    match image_count {
        0 | 1 => 1024,
        2 => 512,
        _ => DEFAULT_VISION_SIZE,
    }
}

pub fn vision_dims(width: u32, height: u32, size: u32) -> (u32, u32) {
    let scale = area_scale(width, height, size);
    (
        scaled_side(width, scale, 1.0),
        scaled_side(height, scale, 1.0),
    )
}

pub fn rescaled_latent_dims(width: u32, height: u32) -> (u32, u32) {
    let scale = area_scale(width, height, LATENT_AREA_SIDE);
    (
        scaled_side(width, scale, LATENT_MULTIPLE),
        scaled_side(height, scale, LATENT_MULTIPLE),
    )
}

fn area_scale(width: u32, height: u32, side: u32) -> f64 {
    let total = f64::from(side) * f64::from(side);
    (total / (f64::from(width) * f64::from(height))).sqrt()
}

fn scaled_side(side: u32, scale: f64, multiple: f64) -> u32 {
    let snapped = (f64::from(side) * scale / multiple).round_ties_even() * multiple;
    (snapped as u32).max(multiple as u32)
}

pub fn chat_prompt(text: &str) -> String {
    CHAT_TEMPLATE.replacen("{}", text, 1)
}

pub fn image_prompt(count: usize) -> String {
    (1..=count)
        .map(|index| format!("Picture {index}: <|vision_start|><|image_pad|><|vision_end|>"))
        .collect()
}

pub fn plan_encode(request: &EncodeRequest<'_>) -> Result<EncodePlan> {
    let present: Vec<(usize, (u32, u32))> = request
        .image_sizes
        .iter()
        .take(request.slots.len())
        .enumerate()
        .filter_map(|(index, size)| size.map(|size| (index + 1, size)))
        .collect();
    if let Some((slot, _)) = present.iter().find(|(_, (w, h))| *w == 0 || *h == 0) {
        return Err(EngineError::InputInvalid(format!("image {slot} has no pixels")));
    }

    let size = vision_size(request.smart_input, present.len());
    let images: Vec<ImagePlan> = present
        .iter()
        .enumerate()
        .map(|(position, &(slot, (width, height)))| {
            let (vision_width, vision_height) = vision_dims(width, height, size);
            let latent = request
                .has_vae
                .then(|| latent_plan(request.alignment, position, width, height));
            ImagePlan {
                slot,
                width,
                height,
                vision_width,
                vision_height,
                latent,
            }
        })
        .collect();

    let pictures = image_prompt(images.len());
    let output_latent_slot = if request.has_vae {
        images.first().map(|image| image.slot)
    } else {
        None
    };
    debug!(vision_size = size, images = images.len(), "planned encode");
    Ok(EncodePlan {
        vision_size: size,
        positive: chat_prompt(&format!("{pictures}{}", request.prompt)),
        negative: chat_prompt(&format!("{pictures}{}", request.negative_prompt)),
        images,
        output_latent_slot,
    })
}

fn latent_plan(alignment: LatentAlignment, position: usize, width: u32, height: u32) -> LatentPlan {
    let aligned = match alignment {
        LatentAlignment::All => true,
        LatentAlignment::Image1Only => position == 0,
        LatentAlignment::Disabled => false,
    };
    if aligned {
        LatentPlan::Reference
    } else {
        let (width, height) = rescaled_latent_dims(width, height);
        LatentPlan::Rescaled { width, height }
    }
}

pub fn resize_for_vision(frame: &Frame, plan: &ImagePlan) -> Frame {
    if frame.dimensions() == (plan.vision_width, plan.vision_height) {
        return frame.clone();
    }
    imageops::resize(
        frame,
        plan.vision_width,
        plan.vision_height,
        FilterType::Triangle,
    )
}
