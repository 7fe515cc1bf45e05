use leptess::tesseract::TessApi;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use std::ffi::CString;
use std::fmt::Debug;
use thiserror::Error;
use tracing::info;

use crate::config::OcrConfig;

/// Tesseract page segmentation mode for a single line of text.
const SINGLE_LINE_MODE: &str = "7";

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("cannot initialise tesseract: {0}")]
    Init(String),
    #[error("recognizer expects a single channel 8 bit image, got type {0}")]
    UnsupportedImage(i32),
    #[error("opencv error while preparing text image: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("tesseract error: {0}")]
    Backend(String),
}

fn backend<E: Debug>(error: E) -> RecognizerError {
    RecognizerError::Backend(format!("{error:?}"))
}

/// Best-effort transcription of a normalized plate image. The text is returned raw.
pub trait TextRecognizer {
    fn recognize(&mut self, image: &Mat) -> Result<String, RecognizerError>;
}

pub struct TesseractReader {
    ocr: TessApi,
}

impl TesseractReader {
    pub fn new(config: &OcrConfig) -> Result<Self, RecognizerError> {
        let tessdata = config.tessdata.to_string_lossy().to_string();
        let mut api = TessApi::new(Some(&tessdata), &config.language)
            .map_err(|e| RecognizerError::Init(format!("{e:?}")))?;

        let mut variables = vec![("tessedit_pageseg_mode", SINGLE_LINE_MODE.to_string())];
        if let Some(whitelist) = &config.whitelist {
            variables.push(("tessedit_char_whitelist", whitelist.clone()));
        }
        for (name, value) in variables {
            let name = CString::new(name).map_err(|e| RecognizerError::Init(e.to_string()))?;
            let value = CString::new(value).map_err(|e| RecognizerError::Init(e.to_string()))?;
            api.raw
                .set_variable(&name, &value)
                .map_err(|e| RecognizerError::Init(format!("{e:?}")))?;
        }
        info!(tessdata = %tessdata, language = %config.language, "tesseract ready");

        Ok(Self { ocr: api })
    }
}

impl TextRecognizer for TesseractReader {
    fn recognize(&mut self, image: &Mat) -> Result<String, RecognizerError> {
        if image.channels() != 1 || image.depth() != opencv::core::CV_8U {
            return Err(RecognizerError::UnsupportedImage(image.typ()));
        }

        let contiguous;
        let image = if image.is_continuous() {
            image
        } else {
            contiguous = image.try_clone()?;
            &contiguous
        };

        let cols = image.cols();
        let rows = image.rows();
        self.ocr
            .raw
            .set_image(image.data_bytes()?, cols, rows, 1, cols)
            .map_err(backend)?;
        self.ocr.get_utf8_text().map_err(backend)
    }
}
