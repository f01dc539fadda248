use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use matrix_contracts::events::EventWriter;
use matrix_contracts::identifiers::{has_supported_extension, resolve};
use matrix_contracts::nodes::NodeRegistry;
use matrix_contracts::slots::SlotCount;
use matrix_contracts::text::{
    chop, extract, segment, BracketPair, CharRule, ExtractMode, BRACKET_STYLES, SEPARATORS,
};
use matrix_engine::imaging::{load_image_file, to_rgb8};
use matrix_engine::output::SaveTarget;
use matrix_engine::{
    DatasetFormat, DatasetRequest, EmptyStyle, EncodeRequest, EngineConfig, Frame, GridOptions,
    IndexSlot, LatentAlignment, MatrixEngine, SlotImage, VideoFormat, VideoRequest,
};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "matrix-rs", version, about = "Matrix asset nodes from the command line")]
struct Cli {
    /// Append node runs and written files to this JSONL run log.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Output directory; overrides MATRIX_OUTPUT_DIR.
    #[arg(long, visible_alias = "output-dir", global = true)]
    out: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(long, global = true)]
    log_json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered nodes.
    Nodes(NodesArgs),
    /// Resolve a token to a file the way the direct loader does.
    Resolve(ResolveArgs),
    LoadIndex(LoadIndexArgs),
    LoadDirect(LoadDirectArgs),
    /// Split a bracket group into 5 or 10 slots.
    Split(SplitArgs),
    /// List the splitter's bracket styles and separators.
    Presets,
    Extract(ExtractArgs),
    Chop(ChopArgs),
    Grid(GridArgs),
    SaveDataset(SaveDatasetArgs),
    Video(VideoArgs),
    EncodePlan(EncodePlanArgs),
}

#[derive(Debug, Parser)]
struct NodesArgs {
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Parser)]
struct ResolveArgs {
    #[arg(long)]
    dir: PathBuf,
    token: String,
}

#[derive(Debug, Args)]
struct LoaderOutput {
    #[arg(long, default_value = "white")]
    empty: EmptyStyle,
    #[arg(long, default_value = "loader/slot")]
    prefix: String,
}

#[derive(Debug, Parser)]
struct LoadIndexArgs {
    #[arg(long)]
    dir: PathBuf,
    /// `PREFIX:INDEX`, up to ten; index 0 leaves the slot empty.
    #[arg(long = "slot", value_parser = parse_index_slot)]
    slots: Vec<IndexSlot>,
    #[command(flatten)]
    output: LoaderOutput,
}

#[derive(Debug, Parser)]
struct LoadDirectArgs {
    #[arg(long)]
    dir: PathBuf,
    /// Identifiers, file names or stems; `0` or `none` leaves a slot empty.
    inputs: Vec<String>,
    #[command(flatten)]
    output: LoaderOutput,
}

#[derive(Debug, Parser)]
struct SplitArgs {
    text: String,
    #[arg(long, default_value = "[]")]
    brackets: String,
    /// Opening delimiter of any length; overrides `--brackets`.
    #[arg(long, requires = "close")]
    open: Option<String>,
    #[arg(long, requires = "open")]
    close: Option<String>,
    #[arg(long, default_value_t = 1)]
    group: usize,
    #[arg(long, default_value = "|")]
    separator: String,
    #[arg(long, default_value = "10")]
    slots: SlotCount,
}

#[derive(Debug, Parser)]
struct ExtractArgs {
    text: String,
    /// Five comma-separated rules (any, letter, upper, lower, digit,
    /// ignore); omitted means the built-in heuristic.
    #[arg(long)]
    template: Option<String>,
    #[arg(long, default_value_t = 1)]
    match_index: usize,
    /// 0 keeps the whole remainder.
    #[arg(long, default_value_t = 0)]
    remainder_length: usize,
}

#[derive(Debug, Parser)]
struct ChopArgs {
    text: String,
    #[arg(long, allow_hyphen_values = true)]
    left: String,
    #[arg(long, allow_hyphen_values = true)]
    right: String,
    #[arg(long, default_value_t = 1)]
    match_index: usize,
    #[arg(long)]
    include_delimiters: bool,
}

#[derive(Debug, Parser)]
struct GridArgs {
    /// Image paths in slot order; `-` leaves a slot empty.
    images: Vec<String>,
    #[arg(long, default_value = "5")]
    slots: SlotCount,
    #[arg(long, default_value_t = 256)]
    thumbnail_size: u32,
    #[arg(long, default_value_t = 5)]
    columns: u32,
    #[arg(long)]
    no_labels: bool,
    #[arg(long, default_value = "grid/grid")]
    prefix: String,
}

#[derive(Debug, Parser)]
struct SaveDatasetArgs {
    #[arg(required = true)]
    images: Vec<PathBuf>,
    #[arg(long, conflicts_with = "text_file")]
    text: Option<String>,
    #[arg(long)]
    text_file: Option<PathBuf>,
    #[arg(long, default_value = matrix_engine::dataset::DEFAULT_PREFIX)]
    prefix: String,
    #[arg(long, default_value = "png")]
    format: DatasetFormat,
    #[arg(long, default_value_t = matrix_engine::dataset::DEFAULT_QUALITY)]
    quality: u8,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    /// Frame files in order.
    images: Vec<PathBuf>,
    /// Read every image in this directory, sorted by name, after `images`.
    #[arg(long)]
    frames_dir: Option<PathBuf>,
    #[arg(long, default_value_t = matrix_engine::video::DEFAULT_FRAME_RATE)]
    frame_rate: u32,
    #[arg(long, default_value_t = 0)]
    loop_count: u32,
    #[arg(long, default_value = matrix_engine::video::DEFAULT_PREFIX)]
    prefix: String,
    #[arg(long, default_value = "video/h264-mp4")]
    format: VideoFormat,
    #[arg(long, default_value_t = matrix_engine::video::DEFAULT_CRF)]
    crf: u32,
    #[arg(long)]
    no_preview: bool,
    #[arg(long)]
    audio: Option<PathBuf>,
    /// Encoder binary; overrides MATRIX_FFMPEG.
    #[arg(long)]
    ffmpeg: Option<PathBuf>,
    /// Preview directory; overrides MATRIX_TEMP_DIR.
    #[arg(long)]
    temp_dir: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct EncodePlanArgs {
    /// Reference images in slot order; `-` leaves a slot empty.
    images: Vec<String>,
    #[arg(long, default_value = "")]
    prompt: String,
    #[arg(long, default_value = "")]
    negative: String,
    #[arg(long)]
    smart_input: bool,
    #[arg(long, default_value = "image1_only")]
    align: LatentAlignment,
    /// Plan as if a latent encoder were attached.
    #[arg(long)]
    vae: bool,
    #[arg(long, default_value = "5")]
    slots: SlotCount,
    /// Also write the resized vision inputs under this prefix.
    #[arg(long)]
    resize_prefix: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("matrix-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let mut config = EngineConfig::from_env().with_output_dir(cli.out.clone());
    if let Command::Video(args) = &cli.command {
        config = config
            .with_ffmpeg(args.ffmpeg.clone())
            .with_temp_dir(args.temp_dir.clone());
    }
    let events = cli
        .events
        .as_ref()
        .map(|path| EventWriter::new(path, uuid::Uuid::new_v4().to_string()));
    if let Some(events) = &events {
        info!(run_id = events.run_id(), log = %events.path().display(), "recording run");
    }
    let engine = MatrixEngine::new(config, events)?;

    match cli.command {
        Command::Nodes(args) => run_nodes(args),
        Command::Resolve(args) => run_resolve(&engine, args),
        Command::LoadIndex(args) => run_load_index(&engine, args),
        Command::LoadDirect(args) => run_load_direct(&engine, args),
        Command::Split(args) => run_split(&engine, args),
        Command::Presets => run_presets(),
        Command::Extract(args) => run_extract(&engine, args),
        Command::Chop(args) => run_chop(&engine, args),
        Command::Grid(args) => run_grid(&engine, args),
        Command::SaveDataset(args) => run_save_dataset(&engine, args),
        Command::Video(args) => run_video(&engine, args),
        Command::EncodePlan(args) => run_encode_plan(&engine, args),
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run_nodes(args: NodesArgs) -> Result<i32> {
    let registry = NodeRegistry::default();
    let nodes = match &args.category {
        Some(category) => registry.by_category(category),
        None => registry.list().cloned().collect(),
    };
    print_json(&nodes)?;
    Ok(0)
}

fn run_resolve(engine: &MatrixEngine, args: ResolveArgs) -> Result<i32> {
    let path = resolve(&args.dir, &args.token);
    let result = json!({"token": args.token, "path": path});
    engine.record("resolve", &result)?;
    print_json(&result)?;
    Ok(if path.is_some() { 0 } else { 2 })
}

fn run_load_index(engine: &MatrixEngine, args: LoadIndexArgs) -> Result<i32> {
    if args.slots.len() > matrix_engine::loaders::LOADER_SLOTS {
        bail!("at most {} slots", matrix_engine::loaders::LOADER_SLOTS);
    }
    let images = engine.load_index(&args.dir, &args.slots, args.output.empty)?;
    report_slots(engine, "MatrixImageLoader_Index", &args.output.prefix, &images)
}

fn run_load_direct(engine: &MatrixEngine, args: LoadDirectArgs) -> Result<i32> {
    if args.inputs.len() > matrix_engine::loaders::LOADER_SLOTS {
        bail!("at most {} inputs", matrix_engine::loaders::LOADER_SLOTS);
    }
    let images = engine.load_direct(&args.dir, &args.inputs, args.output.empty)?;
    report_slots(engine, "MatrixImageLoader_Direct", &args.output.prefix, &images)
}

fn report_slots(
    engine: &MatrixEngine,
    node_id: &str,
    prefix: &str,
    images: &[SlotImage],
) -> Result<i32> {
    let paths = write_frames(engine, node_id, prefix, images.iter().map(|image| &image.frame))?;
    let report: Vec<_> = images
        .iter()
        .zip(&paths)
        .map(|(image, path)| json!({"file": path, "source": image.source}))
        .collect();
    print_json(&report)?;
    Ok(0)
}

fn split_brackets(args: &SplitArgs) -> Result<BracketPair> {
    if let (Some(open), Some(close)) = (&args.open, &args.close) {
        if open.is_empty() || close.is_empty() {
            bail!("--open and --close must not be empty");
        }
        return Ok(BracketPair {
            open: open.clone(),
            close: close.clone(),
        });
    }
    match BracketPair::from_style(&args.brackets) {
        Some(pair) => Ok(pair),
        None => bail!(
            "bracket style must be two characters, got '{}'; use --open/--close for longer delimiters",
            args.brackets
        ),
    }
}

fn run_split(engine: &MatrixEngine, args: SplitArgs) -> Result<i32> {
    let pair = split_brackets(&args)?;
    let result = segment(
        &args.text,
        &pair.open,
        &pair.close,
        args.group,
        &args.separator,
        args.slots,
    );
    let node_id = match args.slots {
        SlotCount::Five => "MatrixPromptSplitter5",
        SlotCount::Ten => "MatrixPromptSplitter",
    };
    engine.record(node_id, &result)?;
    print_json(&result)?;
    Ok(0)
}

fn run_presets() -> Result<i32> {
    print_json(&json!({"brackets": BRACKET_STYLES, "separators": SEPARATORS}))?;
    Ok(0)
}

fn run_extract(engine: &MatrixEngine, args: ExtractArgs) -> Result<i32> {
    let mode = match &args.template {
        Some(raw) => ExtractMode::Template(parse_template(raw)?),
        None => ExtractMode::Heuristic,
    };
    let result = extract(&args.text, &mode, args.match_index, args.remainder_length);
    engine.record("MatrixTextExtractor", &result)?;
    print_json(&result)?;
    Ok(0)
}

fn run_chop(engine: &MatrixEngine, args: ChopArgs) -> Result<i32> {
    let result = chop(
        &args.text,
        &args.left,
        &args.right,
        args.match_index,
        args.include_delimiters,
    );
    engine.record("MatrixStringChopper", &result)?;
    print_json(&result)?;
    Ok(0)
}

fn run_grid(engine: &MatrixEngine, args: GridArgs) -> Result<i32> {
    if args.images.len() > args.slots.len() {
        bail!("at most {} images for a {}-slot grid", args.slots.len(), args.slots);
    }
    let frames = load_optional_frames(&args.images)?;
    let options = GridOptions {
        thumbnail_size: args.thumbnail_size,
        columns: args.columns,
        add_labels: !args.no_labels,
    };
    let grid = engine.asset_grid(&frames, &options, args.slots)?;
    let node_id = match args.slots {
        SlotCount::Five => "MatrixAssetGrid5",
        SlotCount::Ten => "MatrixAssetGrid10",
    };
    let paths = write_frames(engine, node_id, &args.prefix, [&grid])?;
    print_json(&paths)?;
    Ok(0)
}

fn run_save_dataset(engine: &MatrixEngine, args: SaveDatasetArgs) -> Result<i32> {
    let text = match (&args.text, &args.text_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read caption {}", path.display()))?,
        (None, None) => String::new(),
    };
    let frames = load_frames(&args.images)?;
    let saved = engine.save_dataset(&DatasetRequest {
        frames: &frames,
        text: &text,
        filename_prefix: &args.prefix,
        format: args.format,
        quality: args.quality,
    })?;
    print_json(&saved)?;
    Ok(0)
}

fn run_video(engine: &MatrixEngine, args: VideoArgs) -> Result<i32> {
    let mut paths = args.images.clone();
    if let Some(dir) = &args.frames_dir {
        paths.extend(image_files_in(dir)?);
    }
    if paths.is_empty() {
        bail!("no frames given; pass image paths or --frames-dir");
    }
    let frames = load_frames(&paths)?;
    info!(frames = frames.len(), format = %args.format, "encoding video");
    let output = engine.combine_video(&VideoRequest {
        frames: &frames,
        frame_rate: args.frame_rate,
        loop_count: args.loop_count,
        filename_prefix: &args.prefix,
        format: args.format,
        crf: args.crf,
        preview: !args.no_preview,
        audio: args.audio.as_deref(),
    })?;
    print_json(&output)?;
    Ok(0)
}

fn run_encode_plan(engine: &MatrixEngine, args: EncodePlanArgs) -> Result<i32> {
    if args.images.len() > args.slots.len() {
        bail!("at most {} images for the {}-image encoder", args.slots.len(), args.slots);
    }
    let sizes: Vec<Option<(u32, u32)>> = args
        .images
        .iter()
        .map(|raw| {
            optional_path(raw)
                .map(|path| {
                    image::image_dimensions(path)
                        .with_context(|| format!("failed to read {}", path.display()))
                })
                .transpose()
        })
        .collect::<Result<_>>()?;
    let plan = engine.plan_encode(&EncodeRequest {
        prompt: &args.prompt,
        negative_prompt: &args.negative,
        smart_input: args.smart_input,
        alignment: args.align,
        has_vae: args.vae,
        image_sizes: &sizes,
        slots: args.slots,
    })?;

    if let Some(prefix) = &args.resize_prefix {
        let present: Vec<&Path> = args.images.iter().filter_map(|raw| optional_path(raw)).collect();
        let resized = plan
            .images
            .iter()
            .zip(present)
            .map(|(image, path)| -> Result<Frame> {
                let frame = load_image_file(path)
                    .with_context(|| format!("failed to load {}", path.display()))?;
                Ok(matrix_engine::conditioning::resize_for_vision(&frame, image))
            })
            .collect::<Result<Vec<Frame>>>()?;
        let node_id = match args.slots {
            SlotCount::Five => "MatrixTextEncodeQwen5",
            SlotCount::Ten => "MatrixTextEncodeQwen10",
        };
        write_frames(engine, node_id, prefix, &resized)?;
    }
    print_json(&plan)?;
    Ok(0)
}

fn write_frames<'a>(
    engine: &MatrixEngine,
    node_id: &str,
    prefix: &str,
    frames: impl IntoIterator<Item = &'a Frame>,
) -> Result<Vec<PathBuf>> {
    let target = SaveTarget::resolve(&engine.config().output_dir, prefix)?;
    let mut paths = Vec::new();
    for (offset, frame) in frames.into_iter().enumerate() {
        let path = target.path(target.counter + offset as u32, "png");
        to_rgb8(frame)
            .save(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        engine.record_artifact(node_id, &path)?;
        paths.push(path);
    }
    Ok(paths)
}

fn load_frames(paths: &[PathBuf]) -> Result<Vec<Frame>> {
    paths
        .iter()
        .map(|path| {
            load_image_file(path).with_context(|| format!("failed to load {}", path.display()))
        })
        .collect()
}

fn load_optional_frames(raw: &[String]) -> Result<Vec<Option<Frame>>> {
    raw.iter()
        .map(|raw| {
            optional_path(raw)
                .map(|path| {
                    load_image_file(path)
                        .with_context(|| format!("failed to load {}", path.display()))
                })
                .transpose()
        })
        .collect()
}

fn optional_path(raw: &str) -> Option<&Path> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        None
    } else {
        Some(Path::new(raw))
    }
}

fn image_files_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && has_supported_extension(path))
        .collect();
    files.sort();
    Ok(files)
}

fn parse_index_slot(raw: &str) -> std::result::Result<IndexSlot, String> {
    let (prefix, index) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PREFIX:INDEX, got '{raw}'"))?;
    let index = index
        .trim()
        .parse::<u32>()
        .map_err(|err| format!("invalid index in '{raw}': {err}"))?;
    Ok(IndexSlot::new(prefix.trim(), index))
}

fn parse_template(raw: &str) -> Result<[CharRule; 5]> {
    let rules = raw
        .split(',')
        .map(|part| part.parse::<CharRule>().map_err(anyhow::Error::msg))
        .collect::<Result<Vec<_>>>()?;
    match <[CharRule; 5]>::try_from(rules) {
        Ok(rules) => Ok(rules),
        Err(rules) => bail!("template needs 5 rules, got {}", rules.len()),
    }
}
