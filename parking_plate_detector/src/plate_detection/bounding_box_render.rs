use opencv::core::Point;
use opencv::core::Scalar;
use opencv::imgproc::put_text;
use opencv::imgproc::FONT_HERSHEY_SIMPLEX;
use opencv::imgproc::LINE_8;
use opencv::imgproc::{rectangle, LineTypes};
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use thiserror::Error;

use super::plate_validator::PlateCandidate;
use super::Region;

#[derive(Debug, Error)]
pub enum PreviewError {
    #[error("opencv error while drawing preview: {0}")]
    OpenCv(#[from] opencv::Error),
    #[error("preview stream error: {0}")]
    Stream(String),
}

/// Operator feedback surface. Marks are collected during a frame and drawn on `present`.
pub trait OperatorPreview {
    fn mark_candidate(&mut self, region: &Region);

    fn mark_accepted(&mut self, region: &Region, plate: &PlateCandidate);

    /// Shows the frame with its marks. Returns `true` when the operator asked to quit.
    fn present(&mut self, frame: &Mat) -> Result<bool, PreviewError>;
}

impl<T: OperatorPreview + ?Sized> OperatorPreview for Box<T> {
    fn mark_candidate(&mut self, region: &Region) {
        (**self).mark_candidate(region)
    }

    fn mark_accepted(&mut self, region: &Region, plate: &PlateCandidate) {
        (**self).mark_accepted(region, plate)
    }

    fn present(&mut self, frame: &Mat) -> Result<bool, PreviewError> {
        (**self).present(frame)
    }
}

/// BGR red, drawn around every region under evaluation.
pub fn candidate_color() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}

/// BGR green, drawn around the accepted plate.
pub fn accepted_color() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

#[derive(Debug, Default)]
pub struct BoundingBoxRender {
    candidates: Vec<Region>,
    accepted: Option<(Region, String)>,
}

impl BoundingBoxRender {
    pub fn candidate(&mut self, region: &Region) {
        self.candidates.push(*region);
    }

    pub fn accepted(&mut self, region: &Region, plate: &PlateCandidate) {
        self.accepted = Some((*region, plate.to_string()));
    }

    /// Draws the pending marks on a copy of `frame` and clears them.
    /// Returns the canvas and whether a plate was accepted on this frame.
    pub fn render(&mut self, frame: &Mat) -> Result<(Mat, bool), PreviewError> {
        let mut canvas = frame.try_clone()?;
        let thickness_px = 2;

        for region in self.candidates.drain(..) {
            rectangle(
                &mut canvas,
                region.to_rect(),
                candidate_color(),
                thickness_px,
                LineTypes::LINE_4 as i32,
                0,
            )?;
        }

        let accepted = self.accepted.take();
        if let Some((region, plate_text)) = &accepted {
            rectangle(
                &mut canvas,
                region.to_rect(),
                accepted_color(),
                thickness_px,
                LineTypes::LINE_4 as i32,
                0,
            )?;
            put_text(
                &mut canvas,
                plate_text,
                Point::new(region.x1, (region.y1 - 10).max(0)),
                FONT_HERSHEY_SIMPLEX,
                0.9,
                accepted_color(),
                2,
                LINE_8,
                false,
            )?;
        }

        Ok((canvas, accepted.is_some()))
    }

    pub fn pending(&self) -> usize {
        self.candidates.len() + usize::from(self.accepted.is_some())
    }
}
