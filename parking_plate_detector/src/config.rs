use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;

use crate::plate_detection::object_detector::YoloLayout;
use crate::plate_detection::plate_validator::PlateGrammar;
use crate::plate_detection::plate_validator::DEFAULT_PLATE_PATTERN;
use crate::plate_detection::video_reader::VideoInput;

/// Environment variable consulted when `[store] api_key` is not set.
pub const STORE_KEY_ENV: &str = "PLATE_STORE_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub preprocess: PreprocessConfig,
    #[serde(default)]
    pub plate: PlateConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_device")]
    pub device: i32,
    /// A video file to read instead of the capture device.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_fps")]
    pub fps: u64,
    #[serde(default)]
    pub resize: Option<[i32; 2]>,
    #[serde(default)]
    pub loop_file: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_model")]
    pub model: PathBuf,
    #[serde(default = "default_layout")]
    pub layout: YoloLayout,
    #[serde(default = "default_classes")]
    pub classes: usize,
    #[serde(default = "default_input_size")]
    pub input_size: i32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_nms_threshold")]
    pub nms_threshold: f32,
    #[serde(default)]
    pub use_gpu: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_tessdata")]
    pub tessdata: PathBuf,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub whitelist: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessConfig {
    #[serde(default = "default_scale")]
    pub scale: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlateConfig {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    /// Unset means requests may block indefinitely.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    Window,
    Rtp,
    Headless,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_mode")]
    pub mode: PreviewMode,
    #[serde(default = "default_match_hold_ms")]
    pub match_hold_ms: i32,
    #[serde(default = "default_rtp_host")]
    pub rtp_host: String,
    #[serde(default = "default_rtp_port")]
    pub rtp_port: u16,
    #[serde(default = "default_rtp_size")]
    pub rtp_size: [u32; 2],
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            file: None,
            fps: default_fps(),
            resize: None,
            loop_file: false,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            layout: default_layout(),
            classes: default_classes(),
            input_size: default_input_size(),
            confidence: default_confidence(),
            nms_threshold: default_nms_threshold(),
            use_gpu: false,
        }
    }
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            tessdata: default_tessdata(),
            language: default_language(),
            whitelist: None,
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            scale: default_scale(),
        }
    }
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self {
            pattern: default_pattern(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            mode: default_preview_mode(),
            match_hold_ms: default_match_hold_ms(),
            rtp_host: default_rtp_host(),
            rtp_port: default_rtp_port(),
            rtp_size: default_rtp_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CameraConfig {
    pub fn input(&self) -> VideoInput {
        match &self.file {
            Some(path) => VideoInput::File(path.clone()),
            None => VideoInput::Device(self.device),
        }
    }

    /// Applies a `--source` override: a device index or a video file path.
    pub fn set_source(&mut self, source: &str) {
        match VideoInput::parse(source) {
            VideoInput::Device(index) => {
                self.device = index;
                self.file = None;
            }
            VideoInput::File(path) => self.file = Some(path),
        }
    }
}

impl StoreConfig {
    /// The configured key, falling back to the environment.
    pub fn api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var(STORE_KEY_ENV).ok())
            .filter(|key| !key.is_empty())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        PlateGrammar::new(&self.plate.pattern)?;
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(ConfigError::Invalid(format!(
                "detector.confidence must be within [0, 1], got {}",
                self.detector.confidence
            )));
        }
        if self.detector.classes == 0 || self.detector.input_size <= 0 {
            return Err(ConfigError::Invalid(
                "detector.classes and detector.input_size must be positive".into(),
            ));
        }
        if !(self.preprocess.scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "preprocess.scale must be positive, got {}",
                self.preprocess.scale
            )));
        }
        if self.store.url.trim().is_empty() {
            return Err(ConfigError::Invalid("store.url must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid plate pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_device() -> i32 {
    1
}
fn default_fps() -> u64 {
    20
}
fn default_model() -> PathBuf {
    PathBuf::from("models/plate_best.onnx")
}
fn default_layout() -> YoloLayout {
    YoloLayout::Yolov8
}
fn default_classes() -> usize {
    1
}
fn default_input_size() -> i32 {
    640
}
fn default_confidence() -> f32 {
    0.5
}
fn default_nms_threshold() -> f32 {
    0.45
}
fn default_tessdata() -> PathBuf {
    PathBuf::from("models")
}
fn default_language() -> String {
    "eng".into()
}
fn default_scale() -> f64 {
    crate::plate_detection::roi_preprocessor::DEFAULT_SCALE
}
fn default_pattern() -> String {
    DEFAULT_PLATE_PATTERN.into()
}
fn default_table() -> String {
    "parking_records".into()
}
fn default_preview_mode() -> PreviewMode {
    PreviewMode::Window
}
fn default_match_hold_ms() -> i32 {
    2000
}
fn default_rtp_host() -> String {
    "127.0.0.1".into()
}
fn default_rtp_port() -> u16 {
    5000
}
fn default_rtp_size() -> [u32; 2] {
    [640, 480]
}
fn default_log_level() -> String {
    "info".into()
}
