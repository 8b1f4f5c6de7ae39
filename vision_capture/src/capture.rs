use crate::client::InferenceServer;
use crate::frame::{encode_jpeg, Frame, FrameError};
use crate::pipeline::{write_result, InferencePipeline};
use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

const CAPTURE_JPEG_QUALITY: u8 = 95;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Frame source failed: {0}")]
    Source(#[source] BoxError),
    #[error("Preview failed: {0}")]
    Preview(#[source] BoxError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Capture store I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode capture: {0}")]
    Frame(#[from] FrameError),
}

/// Blocking supplier of camera frames. `Ok(None)` means the device stopped
/// delivering frames.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;
}

/// Live preview window plus the keyboard attached to it.
pub trait Preview {
    fn show(&mut self, frame: &Frame) -> Result<(), CaptureError>;

    /// Non-blocking poll for the last key pressed, if it maps to a command.
    fn poll_key(&mut self) -> Result<Option<KeyCommand>, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCommand {
    Analyze,
    Quit,
}

impl KeyCommand {
    /// Maps a raw key code as returned by a GUI toolkit. Only the low byte is
    /// significant; `-1` (no key) maps to nothing.
    pub fn from_key_code(code: i32) -> Option<Self> {
        match (code & 0xFF) as u8 {
            b' ' => Some(KeyCommand::Analyze),
            b'q' | b'Q' => Some(KeyCommand::Quit),
            _ => None,
        }
    }
}

/// Directory receiving one JPEG per analysed capture.
#[derive(Debug, Clone)]
pub struct CaptureStore {
    dir: PathBuf,
}

impl CaptureStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `frame` as `capture_<unix seconds>.jpg`. Two captures within
    /// the same second share a name and the later one wins.
    pub fn save(&self, frame: &Frame) -> Result<PathBuf, StoreError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let path = self.dir.join(format!("capture_{}.jpg", timestamp));

        let jpg = encode_jpeg(&frame.to_rgb_image()?, CAPTURE_JPEG_QUALITY)?;
        fs::write(&path, jpg)?;
        Ok(path)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    pub frames: u64,
    pub analyses: u64,
    pub last_response: Option<String>,
}

/// Shows frames until the source runs dry or the user quits, analysing the
/// current frame whenever asked to. Inference runs inline, so the preview
/// freezes until the answer is in. Every answer, the failure sentinel
/// included, is echoed to stdout.
pub async fn run_capture_loop<F, P, S>(
    source: &mut F,
    preview: &mut P,
    pipeline: &InferencePipeline<S>,
    store: &CaptureStore,
    prompt: &str,
) -> Result<CaptureSummary, CaptureError>
where
    F: FrameSource + ?Sized,
    P: Preview + ?Sized,
    S: InferenceServer + ?Sized,
{
    run_capture_loop_to(source, preview, pipeline, store, prompt, &mut io::stdout()).await
}

/// [`run_capture_loop`] echoing answers to `out` instead of stdout.
pub async fn run_capture_loop_to<F, P, S, W>(
    source: &mut F,
    preview: &mut P,
    pipeline: &InferencePipeline<S>,
    store: &CaptureStore,
    prompt: &str,
    out: &mut W,
) -> Result<CaptureSummary, CaptureError>
where
    F: FrameSource + ?Sized,
    P: Preview + ?Sized,
    S: InferenceServer + ?Sized,
    W: Write + ?Sized,
{
    let mut summary = CaptureSummary::default();

    loop {
        let frame = match source.next_frame()? {
            Some(frame) => frame,
            None => {
                tracing::warn!("Dropped frame from camera.");
                break;
            }
        };
        summary.frames += 1;

        preview.show(&frame)?;

        match preview.poll_key()? {
            Some(KeyCommand::Quit) => {
                tracing::info!("Exiting application...");
                break;
            }
            Some(KeyCommand::Analyze) => {
                match store.save(&frame) {
                    Ok(path) => tracing::info!("Image captured: {}", path.display()),
                    Err(e) => tracing::warn!("Failed to save capture: {}", e),
                }

                let response = pipeline.analyze(&frame, prompt).await;
                if let Err(e) = write_result(out, "AI RESPONSE", &response) {
                    tracing::warn!("Failed to echo response: {}", e);
                }
                summary.analyses += 1;
                summary.last_response = Some(response);
            }
            None => {}
        }
    }

    Ok(summary)
}
