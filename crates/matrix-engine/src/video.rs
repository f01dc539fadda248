use std::env;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread;

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::grid::thumbnail_dims;
use crate::imaging::{to_rgb8, Frame};
use crate::output::SaveTarget;

pub const DEFAULT_PREFIX: &str = "Matrix_Video";
pub const DEFAULT_FRAME_RATE: u32 = 24;
pub const DEFAULT_CRF: u32 = 20;
pub const MAX_CRF: u32 = 51;

const MAX_FRAME_RATE: u32 = 120;
const MAX_LOOP_COUNT: u32 = 100;
const PREVIEW_MAX_FRAMES: usize = 20;
const PREVIEW_SIZE: u32 = 256;
const PREVIEW_DELAY_MS: u32 = 100;
const STDERR_TAIL: usize = 2000;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum VideoFormat {
    #[default]
    #[serde(rename = "video/h264-mp4")]
    H264Mp4,
    #[serde(rename = "video/webp")]
    Webp,
    #[serde(rename = "image/gif")]
    Gif,
}

impl VideoFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::H264Mp4 => "mp4",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::H264Mp4 => "video/h264-mp4",
            Self::Webp => "video/webp",
            Self::Gif => "image/gif",
        }
    }
}

impl fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

impl FromStr for VideoFormat {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "video/h264-mp4" | "h264-mp4" | "mp4" => Ok(Self::H264Mp4),
            "video/webp" | "webp" => Ok(Self::Webp),
            "image/gif" | "gif" => Ok(Self::Gif),
            other => Err(format!(
                "unknown video format '{other}' (expected video/h264-mp4, video/webp or image/gif)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoRequest<'a> {
    pub frames: &'a [Frame],
    pub frame_rate: u32,
    /// 0 loops forever.
    pub loop_count: u32,
    pub filename_prefix: &'a str,
    pub format: VideoFormat,
    pub crf: u32,
    pub preview: bool,
    pub audio: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoOutput {
    pub path: PathBuf,
    pub preview: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSettings<'a> {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub loop_count: u32,
    pub format: VideoFormat,
    pub crf: u32,
    pub audio: Option<&'a Path>,
}

pub fn combine_video(config: &EngineConfig, request: &VideoRequest<'_>) -> Result<VideoOutput> {
    let (width, height) = common_size(request.frames)?;
    let ffmpeg = locate_ffmpeg(config.ffmpeg.as_deref())?;

    let (width, height) = match request.format {
        VideoFormat::H264Mp4 => (width - width % 2, height - height % 2),
        _ => (width, height),
    };
    if width == 0 || height == 0 {
        return Err(EngineError::InputInvalid(format!(
            "frames of {width}x{height} cannot be encoded"
        )));
    }
    let frames: Vec<RgbImage> = request
        .frames
        .iter()
        .map(|frame| {
            let pixels = to_rgb8(frame);
            if pixels.dimensions() == (width, height) {
                pixels
            } else {
                imageops::crop_imm(&pixels, 0, 0, width, height).to_image()
            }
        })
        .collect();

    let target = SaveTarget::resolve(&config.output_dir, request.filename_prefix)?;
    let path = target.path(target.counter, request.format.extension());
    let settings = EncoderSettings {
        width,
        height,
        frame_rate: request.frame_rate,
        loop_count: request.loop_count,
        format: request.format,
        crf: request.crf,
        audio: request.audio,
    };
    run_encoder(&ffmpeg, &encoder_args(&settings, &path), &frames)?;
    info!(path = %path.display(), frames = frames.len(), "encoded video");

    let preview = if request.preview {
        match write_preview(&config.temp_dir, target.counter, &frames) {
            Ok(preview) => Some(preview),
            Err(err) => {
                warn!(error = %err, "failed to write preview");
                None
            }
        }
    } else {
        None
    };
    Ok(VideoOutput { path, preview })
}

fn common_size(frames: &[Frame]) -> Result<(u32, u32)> {
    let first = frames.first().ok_or(EngineError::EmptyBatch)?;
    let (width, height) = first.dimensions();
    for (index, frame) in frames.iter().enumerate().skip(1) {
        let (actual_width, actual_height) = frame.dimensions();
        if (actual_width, actual_height) != (width, height) {
            return Err(EngineError::FrameSizeMismatch {
                index,
                width,
                height,
                actual_width,
                actual_height,
            });
        }
    }
    Ok((width, height))
}

/// Finds the encoder: explicit path, then `PATH`, then bundled copies next
/// to the executable or in the working directory.
pub fn locate_ffmpeg(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        warn!(path = %path.display(), "configured ffmpeg does not exist; searching");
    }
    if let Ok(path) = which::which("ffmpeg") {
        return Ok(path);
    }
    bundled_candidates()
        .into_iter()
        .find(|path| path.is_file())
        .ok_or(EngineError::FfmpegNotFound)
}

fn bundled_candidates() -> Vec<PathBuf> {
    let binary = if cfg!(windows) { "ffmpeg.exe" } else { "ffmpeg" };
    let mut roots = Vec::new();
    if let Some(dir) = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        roots.push(dir);
    }
    if let Ok(cwd) = env::current_dir() {
        roots.push(cwd);
    }
    roots
        .iter()
        .flat_map(|root| {
            [
                root.join("ffmpeg").join("bin").join(binary),
                root.join("ffmpeg").join(binary),
                root.join(binary),
            ]
        })
        .collect()
}

pub fn encoder_args(settings: &EncoderSettings<'_>, output: &Path) -> Vec<String> {
    let frame_rate = settings.frame_rate.clamp(1, MAX_FRAME_RATE);
    let loop_count = settings.loop_count.min(MAX_LOOP_COUNT);
    let crf = settings.crf.min(MAX_CRF);

    let mut args: Vec<String> = [
        "-y",
        "-f",
        "rawvideo",
        "-vcodec",
        "rawvideo",
        "-s",
        &format!("{}x{}", settings.width, settings.height),
        "-pix_fmt",
        "rgb24",
        "-r",
        &frame_rate.to_string(),
        "-i",
        "-",
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect();

    if let Some(audio) = settings.audio {
        args.push("-i".to_string());
        args.push(audio.to_string_lossy().into_owned());
        args.extend(["-c:a", "aac", "-shortest"].map(String::from));
    }

    match settings.format {
        VideoFormat::H264Mp4 => {
            args.extend(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-crf"].map(String::from));
            args.push(crf.to_string());
            args.extend(["-preset", "slow"].map(String::from));
        }
        VideoFormat::Webp => {
            args.extend(["-c:v", "libwebp", "-loop"].map(String::from));
            args.push(loop_count.to_string());
            args.extend(["-lossless", "0", "-quality"].map(String::from));
            args.push(100u32.saturating_sub(crf * 2).to_string());
        }
        VideoFormat::Gif => {
            args.extend(["-f", "gif", "-loop"].map(String::from));
            args.push(loop_count.to_string());
        }
    }

    args.push(output.to_string_lossy().into_owned());
    args
}

fn run_encoder(ffmpeg: &Path, args: &[String], frames: &[RgbImage]) -> Result<()> {
    debug!(ffmpeg = %ffmpeg.display(), ?args, "spawning encoder");
    let mut cmd = Command::new(ffmpeg);
    cmd.args(args);
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::null());
    cmd.stderr(Stdio::piped());
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    let mut child = cmd.spawn()?;
    // Drained on its own thread so a chatty encoder cannot block our writes.
    let stderr = child.stderr.take();
    let stderr_reader = thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buffer);
        }
        buffer
    });

    let written = match child.stdin.take() {
        Some(mut stdin) => frames
            .iter()
            .try_for_each(|frame| stdin.write_all(frame.as_raw())),
        None => Ok(()),
    };
    let status = child.wait()?;
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(EngineError::EncoderFailed {
            status: status.to_string(),
            stderr: stderr_tail(&stderr),
        });
    }
    written?;
    Ok(())
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    match text.char_indices().rev().nth(STDERR_TAIL - 1) {
        Some((start, _)) => text[start..].to_string(),
        None => text.to_string(),
    }
}

fn write_preview(temp_dir: &Path, counter: u32, frames: &[RgbImage]) -> Result<PathBuf> {
    fs::create_dir_all(temp_dir)?;
    let id = Uuid::new_v4().simple().to_string();
    let path = temp_dir.join(format!("matrix_pre_{counter}_{}.gif", &id[..8]));

    let step = (frames.len() / PREVIEW_MAX_FRAMES).max(1);
    let mut encoder = GifEncoder::new(BufWriter::new(File::create(&path)?));
    encoder.set_repeat(Repeat::Infinite)?;
    for frame in frames.iter().step_by(step) {
        let (width, height) = thumbnail_dims(frame.width(), frame.height(), PREVIEW_SIZE);
        let thumb = if (width, height) == frame.dimensions() {
            frame.clone()
        } else {
            imageops::resize(frame, width, height, FilterType::Triangle)
        };
        let rgba = DynamicImage::ImageRgb8(thumb).into_rgba8();
        encoder.encode_frame(image::Frame::from_parts(
            rgba,
            0,
            0,
            Delay::from_numer_denom_ms(PREVIEW_DELAY_MS, 1),
        ))?;
    }
    drop(encoder);
    debug!(path = %path.display(), "wrote preview");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::BufReader;
    use std::path::{Path, PathBuf};

    use image::codecs::gif::GifDecoder;
    use image::{AnimationDecoder, Rgb, Rgb32FImage, RgbImage};

    use crate::config::EngineConfig;
    use crate::error::EngineError;

    use super::{
        combine_video, encoder_args, locate_ffmpeg, stderr_tail, write_preview, EncoderSettings,
        VideoFormat, VideoRequest,
    };

    fn settings(format: VideoFormat) -> EncoderSettings<'static> {
        EncoderSettings {
            width: 64,
            height: 48,
            frame_rate: 24,
            loop_count: 0,
            format,
            crf: 20,
            audio: None,
        }
    }

    fn request<'a>(frames: &'a [Rgb32FImage], format: VideoFormat) -> VideoRequest<'a> {
        VideoRequest {
            frames,
            frame_rate: 24,
            loop_count: 0,
            filename_prefix: "clips/run",
            format,
            crf: 20,
            preview: true,
            audio: None,
        }
    }

    #[test]
    fn mp4_arguments_stream_raw_rgb_into_x264() {
        let args = encoder_args(&settings(VideoFormat::H264Mp4), Path::new("/out/a.mp4"));
        assert_eq!(
            args.join(" "),
            "-y -f rawvideo -vcodec rawvideo -s 64x48 -pix_fmt rgb24 -r 24 -i - \
             -c:v libx264 -pix_fmt yuv420p -crf 20 -preset slow /out/a.mp4"
        );
    }

    #[test]
    fn webp_and_gif_arguments_carry_loop_and_quality() {
        let mut webp = settings(VideoFormat::Webp);
        webp.crf = 51;
        webp.loop_count = 3;
        let args = encoder_args(&webp, Path::new("a.webp"));
        assert!(args.join(" ").ends_with("-c:v libwebp -loop 3 -lossless 0 -quality 0 a.webp"));

        let audio = PathBuf::from("/tmp/track.wav");
        let mut gif = settings(VideoFormat::Gif);
        gif.audio = Some(&audio);
        gif.frame_rate = 500;
        let args = encoder_args(&gif, Path::new("a.gif")).join(" ");
        assert!(args.contains("-r 120 -i - -i /tmp/track.wav -c:a aac -shortest -f gif -loop 0"));
    }

    #[test]
    fn formats_parse_from_mime_names() {
        assert_eq!("video/h264-mp4".parse::<VideoFormat>(), Ok(VideoFormat::H264Mp4));
        assert_eq!("IMAGE/GIF".parse::<VideoFormat>(), Ok(VideoFormat::Gif));
        assert_eq!(VideoFormat::Webp.to_string(), "video/webp");
        assert!("video/av1".parse::<VideoFormat>().is_err());
    }

    #[test]
    fn frames_must_exist_and_share_one_size() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let config = EngineConfig::default().with_output_dir(Some(temp.path().to_path_buf()));

        let empty: Vec<Rgb32FImage> = Vec::new();
        assert!(matches!(
            combine_video(&config, &request(&empty, VideoFormat::Gif)),
            Err(EngineError::EmptyBatch)
        ));

        let mixed = vec![Rgb32FImage::new(8, 8), Rgb32FImage::new(8, 6)];
        assert!(matches!(
            combine_video(&config, &request(&mixed, VideoFormat::Gif)),
            Err(EngineError::FrameSizeMismatch { index: 1, actual_height: 6, .. })
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn encoder_failures_surface_exit_status_and_stderr() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        // `sh` rejects the first encoder flag and exits non-zero.
        let config = EngineConfig::default()
            .with_output_dir(Some(temp.path().to_path_buf()))
            .with_ffmpeg(Some(PathBuf::from("/bin/sh")));
        let frames = vec![Rgb32FImage::new(9, 7); 3];

        match combine_video(&config, &request(&frames, VideoFormat::H264Mp4)) {
            Err(EngineError::EncoderFailed { stderr, .. }) => assert!(!stderr.is_empty()),
            other => panic!("expected encoder failure, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn explicit_encoder_path_wins_when_present() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let fake = temp.path().join("ffmpeg-custom");
        std::fs::write(&fake, b"")?;
        assert_eq!(locate_ffmpeg(Some(&fake))?, fake);
        Ok(())
    }

    #[test]
    fn preview_samples_frames_and_shrinks_them() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let frames: Vec<RgbImage> = (0..45)
            .map(|index| RgbImage::from_pixel(300, 100, Rgb([index as u8 * 5, 0, 0])))
            .collect();

        let path = write_preview(&temp.path().join("previews"), 4, &frames)?;
        let name = path.file_name().and_then(|name| name.to_str()).unwrap_or("");
        assert!(name.starts_with("matrix_pre_4_") && name.ends_with(".gif"));

        let decoder = GifDecoder::new(BufReader::new(File::open(&path)?))?;
        let decoded = decoder.into_frames().collect_frames()?;
        assert_eq!(decoded.len(), 23);
        assert_eq!(decoded[0].buffer().dimensions(), (256, 85));
        Ok(())
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = format!("{}tail", "x".repeat(5000));
        let tail = stderr_tail(long.as_bytes());
        assert_eq!(tail.chars().count(), 2000);
        assert!(tail.ends_with("tail"));
        assert_eq!(stderr_tail(b"  short \n"), "short");
    }
}
