use opencv::core::Size;

use opencv::imgproc::resize;
use opencv::imgproc::INTER_LINEAR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;

use opencv::prelude::VideoCaptureTrait;
use opencv::prelude::VideoCaptureTraitConst;
use opencv::videoio::VideoCapture;

use opencv::videoio::CAP_ANY;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;
use tracing::info;

use crate::config::CameraConfig;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot open video source {0}")]
    Unavailable(String),
    #[error("opencv error while reading frame: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Pull-based producer of BGR frames. `Ok(None)` means the stream has ended.
pub trait FrameSource {
    fn read(&mut self) -> Result<Option<Mat>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoInput {
    Device(i32),
    File(PathBuf),
}

impl fmt::Display for VideoInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VideoInput::Device(index) => write!(f, "camera #{index}"),
            VideoInput::File(path) => write!(f, "file {}", path.display()),
        }
    }
}

impl VideoInput {
    /// Numbers select a capture device, anything else is a video file path.
    pub fn parse(source: &str) -> Self {
        match source.parse::<i32>() {
            Ok(index) => VideoInput::Device(index),
            Err(_) => VideoInput::File(PathBuf::from(source)),
        }
    }
}

fn make_video(input: &VideoInput) -> Result<VideoCapture, SourceError> {
    let capture = match input {
        VideoInput::Device(index) => VideoCapture::new(*index, CAP_ANY)?,
        VideoInput::File(path) => VideoCapture::from_file(&path.to_string_lossy(), CAP_ANY)?,
    };

    if !capture.is_opened()? {
        return Err(SourceError::Unavailable(input.to_string()));
    }
    Ok(capture)
}

pub struct VideoReader {
    input: VideoInput,
    capture: VideoCapture,
    resize: Option<Size>,
    fps_control: Instant,
    fps_wait: Option<Duration>,
    do_loop: bool,
}

impl VideoReader {
    pub fn new(config: &CameraConfig) -> Result<Self, SourceError> {
        let input = config.input();
        let capture = make_video(&input)?;
        info!(source = %input, "video source opened");

        // Live cameras deliver at their own rate, only files need pacing.
        let fps_wait = match (&input, config.fps) {
            (VideoInput::File(_), fps) if fps > 0 => Some(Duration::from_millis(1000 / fps)),
            _ => None,
        };

        Ok(Self {
            input,
            capture,
            resize: config.resize.map(|[w, h]| Size::new(w, h)),
            fps_control: Instant::now(),
            fps_wait,
            do_loop: config.loop_file,
        })
    }

    fn pace(&mut self) {
        if let Some(fps_wait) = self.fps_wait {
            let elapsed = self.fps_control.elapsed();
            if fps_wait > elapsed {
                spin_sleep::sleep(fps_wait - elapsed);
            }
        }
        self.fps_control = Instant::now();
    }
}

impl FrameSource for VideoReader {
    fn read(&mut self) -> Result<Option<Mat>, SourceError> {
        let mut image = Mat::default();
        let mut grabbed = self.capture.read(&mut image)?;

        if (!grabbed || image.empty()) && self.do_loop {
            if let VideoInput::File(_) = self.input {
                debug!(source = %self.input, "rewinding video");
                self.capture = make_video(&self.input)?;
                grabbed = self.capture.read(&mut image)?;
            }
        }

        if !grabbed || image.empty() {
            return Ok(None);
        }

        let image = match self.resize {
            Some(size) => {
                let mut image_resized = Mat::default();
                resize(&image, &mut image_resized, size, 0.0, 0.0, INTER_LINEAR)?;
                image_resized
            }
            None => image,
        };

        self.pace();
        Ok(Some(image))
    }
}
