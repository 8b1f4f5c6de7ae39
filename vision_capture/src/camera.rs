use crate::capture::{CaptureError, FrameSource, KeyCommand, Preview};
use crate::frame::{Frame, FrameError};
use opencv::{core::Mat, highgui, prelude::*, videoio};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Failed to open camera: {0}")]
    OpenCameraFailed(opencv::Error),
    #[error("No video devices found among indices 0..{0}")]
    NoDevice(i32),
    #[error("Failed to read frame: {0}")]
    ReadFrameFailed(opencv::Error),
    #[error("Unsupported frame layout: {0}")]
    FrameLayout(#[from] FrameError),
    #[error("OpenCV error: {0}")]
    OpenCvError(opencv::Error),
}

impl From<opencv::Error> for CameraError {
    fn from(err: opencv::Error) -> Self {
        CameraError::OpenCvError(err)
    }
}

pub struct OpenCvCamera {
    capture: videoio::VideoCapture,
    index: i32,
}

impl OpenCvCamera {
    /// Opens the first device in `0..max_index` that answers.
    pub fn open(max_index: i32) -> Result<Self, CameraError> {
        for index in 0..max_index {
            let capture = videoio::VideoCapture::new(index, videoio::CAP_ANY)
                .map_err(CameraError::OpenCameraFailed)?;
            if capture.is_opened()? {
                tracing::info!("Connected to camera device /dev/video{}", index);
                return Ok(Self { capture, index });
            }
            tracing::debug!("No camera behind index {}", index);
        }
        Err(CameraError::NoDevice(max_index))
    }

    pub fn index(&self) -> i32 {
        self.index
    }

    pub fn read(&mut self) -> Result<Option<Frame>, CameraError> {
        let mut mat = Mat::default();
        let grabbed = self
            .capture
            .read(&mut mat)
            .map_err(CameraError::ReadFrameFailed)?;
        if !grabbed || mat.empty() {
            return Ok(None);
        }
        Ok(Some(mat_to_frame(&mat)?))
    }
}

impl FrameSource for OpenCvCamera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        self.read().map_err(|e| CaptureError::Source(Box::new(e)))
    }
}

fn mat_to_frame(mat: &Mat) -> Result<Frame, CameraError> {
    let owned;
    let mat = if mat.is_continuous() {
        mat
    } else {
        owned = mat.try_clone()?;
        &owned
    };

    let data = mat.data_bytes()?.to_vec();
    Ok(Frame::new(
        mat.rows() as u32,
        mat.cols() as u32,
        mat.channels() as u8,
        data,
    )?)
}

fn frame_to_mat(frame: &Frame) -> Result<Mat, CameraError> {
    let flat = Mat::from_slice(frame.data())?;
    let shaped = flat.reshape(frame.channels() as i32, frame.height() as i32)?;
    Ok(shaped.try_clone()?)
}

/// HighGUI window showing the live feed; key presses are polled with a 1ms
/// wait so the window keeps refreshing.
pub struct HighGuiPreview {
    window: String,
}

impl HighGuiPreview {
    pub fn new(window: &str) -> Result<Self, CameraError> {
        highgui::named_window(window, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            window: window.to_string(),
        })
    }
}

impl Preview for HighGuiPreview {
    fn show(&mut self, frame: &Frame) -> Result<(), CaptureError> {
        frame_to_mat(frame)
            .and_then(|mat| Ok(highgui::imshow(&self.window, &mat)?))
            .map_err(|e| CaptureError::Preview(Box::new(e)))
    }

    fn poll_key(&mut self) -> Result<Option<KeyCommand>, CaptureError> {
        let code = highgui::wait_key(1).map_err(|e| CaptureError::Preview(Box::new(e)))?;
        Ok(KeyCommand::from_key_code(code))
    }
}

impl Drop for HighGuiPreview {
    fn drop(&mut self) {
        if let Err(e) = highgui::destroy_all_windows() {
            tracing::warn!("Failed to close preview windows: {}", e);
        }
    }
}
