pub mod bounding_box_render;
pub mod object_detector;
pub mod plate_validator;
pub mod preview;
pub mod record_sink;
pub mod roi_preprocessor;
pub mod rtp_sink;
pub mod tesseract_ocr;
pub mod video_reader;

use opencv::core::Rect;
use serde::Serialize;

use plate_validator::PlateCandidate;

/// A detector-reported rectangle in frame coordinates, corners as (x1, y1) inclusive
/// and (x2, y2) exclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl Region {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            confidence,
        }
    }

    pub fn from_rect(rect: Rect, confidence: f32) -> Self {
        Self::new(
            rect.x,
            rect.y,
            rect.x.saturating_add(rect.width),
            rect.y.saturating_add(rect.height),
            confidence,
        )
    }

    /// Clamps all corners into `[0, cols] x [0, rows]`. The result may have zero area.
    pub fn clamped(&self, cols: i32, rows: i32) -> Self {
        let x1 = self.x1.clamp(0, cols.max(0));
        let y1 = self.y1.clamp(0, rows.max(0));
        Self {
            x1,
            y1,
            x2: self.x2.clamp(x1, cols.max(x1)),
            y2: self.y2.clamp(y1, rows.max(y1)),
            confidence: self.confidence,
        }
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(self.x1, self.y1, self.width(), self.height())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlateStatus {
    Entered,
}

/// The row written to the parking records table for an accepted plate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlateRecord {
    pub license_plate: String,
    pub status: PlateStatus,
}

impl PlateRecord {
    pub fn entered(plate: &PlateCandidate) -> Self {
        Self {
            license_plate: plate.as_str().to_string(),
            status: PlateStatus::Entered,
        }
    }
}
