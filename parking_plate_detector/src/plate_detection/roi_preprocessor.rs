use opencv::core::Point;
use opencv::core::Size;
use opencv::core::BORDER_DEFAULT;
use opencv::imgproc::cvt_color;
use opencv::imgproc::filter_2d;
use opencv::imgproc::resize;
use opencv::imgproc::threshold;
use opencv::imgproc::COLOR_BGR2GRAY;
use opencv::imgproc::INTER_CUBIC;
use opencv::imgproc::THRESH_BINARY;
use opencv::imgproc::THRESH_OTSU;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use thiserror::Error;
use tracing::trace;

use super::Region;

pub const DEFAULT_SCALE: f64 = 2.5;

const SHARPEN_KERNEL: [[f32; 3]; 3] = [[-1.0, -1.0, -1.0], [-1.0, 9.0, -1.0], [-1.0, -1.0, -1.0]];

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("opencv error while preprocessing plate: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Crops `region` out of `frame` as an owned, contiguous image. Zero-area crops yield `None`.
pub fn crop_roi(frame: &Mat, region: &Region) -> Result<Option<Mat>, PreprocessError> {
    let region = region.clamped(frame.cols(), frame.rows());
    if region.is_empty() {
        return Ok(None);
    }

    let cropped = frame.apply_1(region.to_rect())?;
    Ok(Some(cropped.try_clone()?))
}

/// Turns a plate crop into a binary single-channel image sized for the text recognizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiPreprocessor {
    scale: f64,
}

impl Default for RoiPreprocessor {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
        }
    }
}

impl RoiPreprocessor {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Grayscale, cubic upscale, 3x3 sharpen, then Otsu binarization, in that order.
    /// An empty ROI is not an error: it returns `None` so recognition is skipped.
    pub fn normalize(&self, roi: &Mat) -> Result<Option<Mat>, PreprocessError> {
        if roi.empty() || roi.rows() == 0 || roi.cols() == 0 {
            return Ok(None);
        }

        let grey = if roi.channels() == 1 {
            roi.try_clone()?
        } else {
            let mut grey = Mat::default();
            cvt_color(roi, &mut grey, COLOR_BGR2GRAY, 0)?;
            grey
        };

        let target = Size::new(
            ((grey.cols() as f64 * self.scale) as i32).max(1),
            ((grey.rows() as f64 * self.scale) as i32).max(1),
        );
        let mut resized = Mat::default();
        resize(&grey, &mut resized, target, 0.0, 0.0, INTER_CUBIC)?;

        let kernel = Mat::from_slice_2d(&SHARPEN_KERNEL)?;
        let mut sharpened = Mat::default();
        filter_2d(
            &resized,
            &mut sharpened,
            -1,
            &kernel,
            Point::new(-1, -1),
            0.0,
            BORDER_DEFAULT,
        )?;

        let mut binary = Mat::default();
        let level = threshold(
            &sharpened,
            &mut binary,
            0.0,
            255.0,
            THRESH_BINARY | THRESH_OTSU,
        )?;
        trace!(level, cols = binary.cols(), rows = binary.rows(), "plate binarized");

        Ok(Some(binary))
    }
}

/// Normalizes with the default 2.5x upscale.
pub fn normalize(roi: &Mat) -> Result<Option<Mat>, PreprocessError> {
    RoiPreprocessor::default().normalize(roi)
}
