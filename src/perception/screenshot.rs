use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;

use crate::config::VerifierConfig;
use crate::errors::{AgentlyError, AgentlyResult};

/// Writes a full-resolution screenshot to `output`.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self, output: &Path) -> AgentlyResult<()>;
}

/// Runs a capture program with the output path appended, e.g. `screencapture -x <path>`.
pub struct CommandCapture {
    program: String,
    args: Vec<String>,
}

impl CommandCapture {
    pub fn new(command: &[String]) -> AgentlyResult<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| AgentlyError::Config("capture_command is empty".into()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl ScreenCapture for CommandCapture {
    async fn capture(&self, output: &Path) -> AgentlyResult<()> {
        let result = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(output)
            .output()
            .await
            .map_err(|e| AgentlyError::Perception(format!("spawn {}: {e}", self.program)))?;
        if !result.status.success() {
            return Err(AgentlyError::Perception(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DownscaleOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub jpeg_quality: u8,
}

impl From<&VerifierConfig> for DownscaleOptions {
    fn from(cfg: &VerifierConfig) -> Self {
        Self {
            max_width: cfg.max_screenshot_width,
            max_height: cfg.max_screenshot_height,
            jpeg_quality: cfg.jpeg_quality,
        }
    }
}

/// Captures into `run_dir` and returns the path of the downscaled
/// `verification_screenshot_<epoch>.jpg`. The temporary full-size capture is always removed.
pub async fn capture_verification_screenshot(
    capture: &dyn ScreenCapture,
    run_dir: &Path,
    opts: DownscaleOptions,
) -> AgentlyResult<PathBuf> {
    let epoch = chrono::Utc::now().timestamp();
    let temp_path = run_dir.join(format!("temp_screenshot_{epoch}.png"));
    let final_path = run_dir.join(format!("verification_screenshot_{epoch}.jpg"));

    let result = async {
        capture.capture(&temp_path).await?;
        let (src, dest) = (temp_path.clone(), final_path.clone());
        let (from, to) = tokio::task::spawn_blocking(move || downscale_to_jpeg(&src, &dest, opts))
            .await
            .map_err(|e| AgentlyError::Perception(format!("resize task: {e}")))??;
        tracing::debug!(?from, ?to, "resized screenshot");
        Ok::<_, AgentlyError>(final_path)
    }
    .await;

    if temp_path.exists() {
        if let Err(e) = tokio::fs::remove_file(&temp_path).await {
            tracing::warn!(path = %temp_path.display(), error = %e, "failed to remove temp screenshot");
        }
    }
    if let Ok(path) = &result {
        tracing::info!(path = %path.display(), "screenshot captured and resized");
    }
    result
}

/// Shrinks `src` to fit the bounds, keeping aspect ratio (never enlarges), and writes a JPEG.
/// Returns the original and final dimensions.
pub fn downscale_to_jpeg(
    src: &Path,
    dest: &Path,
    opts: DownscaleOptions,
) -> AgentlyResult<((u32, u32), (u32, u32))> {
    let img = image::open(src)?;
    let (w, h) = (img.width(), img.height());
    let img = if w > opts.max_width || h > opts.max_height {
        img.resize(opts.max_width, opts.max_height, FilterType::Lanczos3)
    } else {
        img
    };

    let file = std::fs::File::create(dest)?;
    let mut writer = std::io::BufWriter::new(file);
    let encoder = JpegEncoder::new_with_quality(&mut writer, opts.jpeg_quality);
    img.to_rgb8().write_with_encoder(encoder)?;
    Ok(((w, h), (img.width(), img.height())))
}

/// Reads an image file into a `data:` URL for an image content part.
pub async fn image_data_url(path: &Path) -> AgentlyResult<String> {
    let bytes = tokio::fs::read(path).await?;
    let mime = match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        _ => "image/jpeg",
    };
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:{mime};base64,{encoded}"))
}
