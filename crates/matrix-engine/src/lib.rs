pub mod conditioning;
pub mod config;
pub mod dataset;
pub mod error;
pub mod grid;
pub mod imaging;
pub mod loaders;
pub mod output;
pub mod video;

use std::path::Path;

use anyhow::{Context, Result};
use matrix_contracts::events::EventWriter;
use matrix_contracts::slots::SlotCount;
use serde::Serialize;
use serde_json::json;

pub use conditioning::{plan_encode, EncodePlan, EncodeRequest, LatentAlignment, LatentPlan};
pub use config::EngineConfig;
pub use dataset::{save_dataset, DatasetFormat, DatasetRequest, SavedSample};
pub use error::EngineError;
pub use grid::{compose_grid, GridOptions};
pub use imaging::{EmptyStyle, Frame, LabelRenderer};
pub use loaders::{load_direct, load_indexed, IndexSlot, SlotImage, SlotSource};
pub use video::{combine_video, VideoFormat, VideoOutput, VideoRequest};

const INDEX_LOADER: &str = "MatrixImageLoader_Index";
const DIRECT_LOADER: &str = "MatrixImageLoader_Direct";
const DATASET_SAVER: &str = "MatrixDatasetSaver";
const VIDEO_COMBINE: &str = "MatrixVideoCombine";

fn grid_node(slots: SlotCount) -> &'static str {
    match slots {
        SlotCount::Five => "MatrixAssetGrid5",
        SlotCount::Ten => "MatrixAssetGrid10",
    }
}

fn encode_node(slots: SlotCount) -> &'static str {
    match slots {
        SlotCount::Five => "MatrixTextEncodeQwen5",
        SlotCount::Ten => "MatrixTextEncodeQwen10",
    }
}

#[derive(Debug)]
pub struct MatrixEngine {
    config: EngineConfig,
    labels: LabelRenderer,
    events: Option<EventWriter>,
}

impl MatrixEngine {
    pub fn new(config: EngineConfig, events: Option<EventWriter>) -> Result<Self> {
        let labels = LabelRenderer::from_config(&config);
        if let Some(events) = &events {
            events.emit(
                "run_started",
                map_object(json!({
                    "output_dir": config.output_dir.to_string_lossy(),
                    "label_font": labels.origin().map(|path| path.to_string_lossy().into_owned()),
                })),
            )?;
        }
        Ok(Self {
            config,
            labels,
            events,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn load_index(
        &self,
        directory: &Path,
        slots: &[IndexSlot],
        style: EmptyStyle,
    ) -> Result<Vec<SlotImage>> {
        let images = load_indexed(directory, slots, style, &self.labels);
        self.record_sources(INDEX_LOADER, &images)?;
        Ok(images)
    }

    pub fn load_direct<S: AsRef<str>>(
        &self,
        directory: &Path,
        inputs: &[S],
        style: EmptyStyle,
    ) -> Result<Vec<SlotImage>> {
        let images = load_direct(directory, inputs, style, &self.labels);
        self.record_sources(DIRECT_LOADER, &images)?;
        Ok(images)
    }

    pub fn asset_grid(
        &self,
        frames: &[Option<Frame>],
        options: &GridOptions,
        slots: SlotCount,
    ) -> Result<Frame> {
        let grid = compose_grid(frames, options, slots, &self.labels);
        self.record(
            grid_node(slots),
            &json!({"width": grid.width(), "height": grid.height()}),
        )?;
        Ok(grid)
    }

    pub fn save_dataset(&self, request: &DatasetRequest<'_>) -> Result<Vec<SavedSample>> {
        let saved = save_dataset(&self.config.output_dir, request)
            .with_context(|| format!("failed to save dataset '{}'", request.filename_prefix))?;
        for sample in &saved {
            self.record_artifact(DATASET_SAVER, &sample.image)?;
            self.record_artifact(DATASET_SAVER, &sample.caption)?;
        }
        self.record(DATASET_SAVER, &saved)?;
        Ok(saved)
    }

    pub fn combine_video(&self, request: &VideoRequest<'_>) -> Result<VideoOutput> {
        let output = combine_video(&self.config, request)
            .with_context(|| format!("failed to encode '{}'", request.filename_prefix))?;
        self.record_artifact(VIDEO_COMBINE, &output.path)?;
        self.record(VIDEO_COMBINE, &output)?;
        Ok(output)
    }

    pub fn plan_encode(&self, request: &EncodeRequest<'_>) -> Result<EncodePlan> {
        let plan = plan_encode(request)?;
        self.record(encode_node(request.slots), &plan)?;
        Ok(plan)
    }

    /// Logs a node run for results computed outside the engine, such as the
    /// text nodes.
    pub fn record<T: Serialize>(&self, node_id: &str, outputs: &T) -> Result<()> {
        if let Some(events) = &self.events {
            events.node_executed(node_id, outputs)?;
        }
        Ok(())
    }

    pub fn record_artifact(&self, node_id: &str, path: &Path) -> Result<()> {
        if let Some(events) = &self.events {
            events.artifact_written(node_id, path)?;
        }
        Ok(())
    }

    fn record_sources(&self, node_id: &str, images: &[SlotImage]) -> Result<()> {
        let sources: Vec<&SlotSource> = images.iter().map(|image| &image.source).collect();
        self.record(node_id, &sources)
    }
}

fn map_object(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}
