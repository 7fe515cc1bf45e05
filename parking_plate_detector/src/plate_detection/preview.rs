use opencv::highgui;
use opencv::prelude::Mat;
use tracing::debug;
use tracing::warn;

use super::bounding_box_render::BoundingBoxRender;
use super::bounding_box_render::OperatorPreview;
use super::bounding_box_render::PreviewError;
use super::plate_validator::PlateCandidate;
use super::Region;

pub const LIVE_WINDOW: &str = "Smart Parking System";
pub const MATCH_WINDOW: &str = "Plate Detected!";
const QUIT_KEY: i32 = 'q' as i32;

/// Desktop preview in OpenCV highgui windows; `q` in the live window quits.
pub struct WindowPreview {
    render: BoundingBoxRender,
    match_hold_ms: i32,
}

impl WindowPreview {
    pub fn new(match_hold_ms: i32) -> Self {
        Self {
            render: BoundingBoxRender::default(),
            match_hold_ms,
        }
    }
}

impl OperatorPreview for WindowPreview {
    fn mark_candidate(&mut self, region: &Region) {
        self.render.candidate(region);
    }

    fn mark_accepted(&mut self, region: &Region, plate: &PlateCandidate) {
        self.render.accepted(region, plate);
    }

    fn present(&mut self, frame: &Mat) -> Result<bool, PreviewError> {
        let (canvas, matched) = self.render.render(frame)?;

        if matched {
            // Hold the annotated match on screen before the session closes.
            highgui::imshow(MATCH_WINDOW, &canvas)?;
            highgui::wait_key(self.match_hold_ms)?;
        }

        highgui::imshow(LIVE_WINDOW, &canvas)?;
        let key = highgui::wait_key(1)?;
        Ok(key >= 0 && key & 0xFF == QUIT_KEY)
    }
}

impl Drop for WindowPreview {
    fn drop(&mut self) {
        debug!("Closing preview windows");
        if let Err(e) = highgui::destroy_all_windows() {
            warn!(error = %e, "cannot close preview windows");
        }
    }
}

/// No operator surface; marks are dropped and quit is never requested.
#[derive(Debug, Default)]
pub struct HeadlessPreview;

impl OperatorPreview for HeadlessPreview {
    fn mark_candidate(&mut self, _: &Region) {}

    fn mark_accepted(&mut self, _: &Region, _: &PlateCandidate) {}

    fn present(&mut self, _: &Mat) -> Result<bool, PreviewError> {
        Ok(false)
    }
}
