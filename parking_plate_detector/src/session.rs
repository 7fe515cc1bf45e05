//! The per-frame recognition loop.
//!
//! One frame is fully handled (detection, every region up to the first accepted plate, at
//! most one store write, preview) before the next one is read. The session ends on the
//! first accepted plate, on an operator quit, or when the video source stops delivering.

use opencv::prelude::Mat;
use thiserror::Error;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics;
use crate::plate_detection::bounding_box_render::OperatorPreview;
use crate::plate_detection::object_detector::RegionDetector;
use crate::plate_detection::plate_validator::prefilter;
use crate::plate_detection::plate_validator::PlateCandidate;
use crate::plate_detection::plate_validator::PlateGrammar;
use crate::plate_detection::record_sink::PersistenceError;
use crate::plate_detection::record_sink::PersistenceSink;
use crate::plate_detection::roi_preprocessor::crop_roi;
use crate::plate_detection::roi_preprocessor::PreprocessError;
use crate::plate_detection::roi_preprocessor::RoiPreprocessor;
use crate::plate_detection::tesseract_ocr::RecognizerError;
use crate::plate_detection::tesseract_ocr::TextRecognizer;
use crate::plate_detection::video_reader::FrameSource;
use crate::plate_detection::PlateRecord;
use crate::plate_detection::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    SourceExhausted,
    QuitRequested,
}

/// The accepted plate and what the store said about it.
#[derive(Debug)]
pub struct SessionMatch {
    pub record: PlateRecord,
    pub persistence: Result<(), PersistenceError>,
}

#[derive(Debug)]
pub enum SessionState {
    Scanning,
    Matched(SessionMatch),
    Stopped(StopReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionState::Scanning)
    }

    pub fn found_plate(&self) -> bool {
        matches!(self, SessionState::Matched(_))
    }
}

#[derive(Debug)]
pub struct SessionReport {
    pub state: SessionState,
    pub frames_read: u64,
    pub regions_evaluated: u64,
}

#[derive(Debug, Error)]
enum RegionError {
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

pub struct SessionController<S, D, R, P, V> {
    source: S,
    detector: D,
    recognizer: R,
    sink: P,
    preview: V,
    preprocessor: RoiPreprocessor,
    grammar: PlateGrammar,
    confidence: f32,
    frames_read: u64,
    regions_evaluated: u64,
}

impl<S, D, R, P, V> SessionController<S, D, R, P, V>
where
    S: FrameSource,
    D: RegionDetector,
    R: TextRecognizer,
    P: PersistenceSink,
    V: OperatorPreview,
{
    pub fn new(source: S, detector: D, recognizer: R, sink: P, preview: V) -> Self {
        Self {
            source,
            detector,
            recognizer,
            sink,
            preview,
            preprocessor: RoiPreprocessor::default(),
            grammar: PlateGrammar::default(),
            confidence: 0.5,
            frames_read: 0,
            regions_evaluated: 0,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: RoiPreprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    pub fn with_grammar(mut self, grammar: PlateGrammar) -> Self {
        self.grammar = grammar;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Ticks from `Scanning` until the session reaches a terminal state.
    pub fn run(&mut self) -> SessionReport {
        let mut state = SessionState::Scanning;
        while !state.is_terminal() {
            state = self.tick(state);
        }

        SessionReport {
            state,
            frames_read: self.frames_read,
            regions_evaluated: self.regions_evaluated,
        }
    }

    /// Processes one frame and returns the next state. Terminal states are returned as is.
    pub fn tick(&mut self, state: SessionState) -> SessionState {
        if state.is_terminal() {
            return state;
        }

        let frame = match self.source.read() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                info!(frames = self.frames_read, "video source ended");
                return SessionState::Stopped(StopReason::SourceExhausted);
            }
            Err(e) => {
                error!(error = %e, frames = self.frames_read, "cannot read frame from video source");
                return SessionState::Stopped(StopReason::SourceExhausted);
            }
        };
        self.frames_read += 1;
        metrics::FRAMES.inc();

        let found = self.scan_frame(&frame);

        let quit = match self.preview.present(&frame) {
            Ok(quit) => quit,
            Err(e) => {
                warn!(error = %e, "preview failed");
                false
            }
        };

        match found {
            Some(found) => SessionState::Matched(found),
            None if quit => {
                info!("quit requested by operator");
                SessionState::Stopped(StopReason::QuitRequested)
            }
            None => SessionState::Scanning,
        }
    }

    fn scan_frame(&mut self, frame: &Mat) -> Option<SessionMatch> {
        let regions = match self.detector.detect(frame, self.confidence) {
            Ok(regions) => regions,
            Err(e) => {
                warn!(error = %e, frame = self.frames_read, "plate detection failed");
                return None;
            }
        };
        debug!(frame = self.frames_read, regions = regions.len(), "detection pass");

        for region in &regions {
            self.regions_evaluated += 1;
            metrics::REGIONS.inc();
            self.preview.mark_candidate(region);

            let plate = match self.read_region(frame, region) {
                Ok(Some(plate)) => plate,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, ?region, "plate recognition failed");
                    continue;
                }
            };

            metrics::ACCEPTED.inc();
            info!(plate = %plate, confidence = region.confidence, "valid plate found, logging to store");
            let record = PlateRecord::entered(&plate);
            let persistence = self.sink.persist(&record);
            match &persistence {
                Ok(()) => info!(plate = %plate, "store entry successful"),
                Err(e) => {
                    metrics::PERSIST_FAILURES.inc();
                    error!(plate = %plate, error = %e, "store insert failed, plate not recorded");
                }
            }

            self.preview.mark_accepted(region, &plate);
            return Some(SessionMatch {
                record,
                persistence,
            });
        }

        None
    }

    fn read_region(
        &mut self,
        frame: &Mat,
        region: &Region,
    ) -> Result<Option<PlateCandidate>, RegionError> {
        let normalized = match crop_roi(frame, region)? {
            Some(roi) => self.preprocessor.normalize(&roi)?,
            None => None,
        };
        let Some(normalized) = normalized else {
            metrics::EMPTY_REGIONS.inc();
            debug!(?region, "empty plate region");
            return Ok(None);
        };

        let raw = self.recognizer.recognize(&normalized)?;
        debug!(raw = raw.trim(), "ocr output");

        match self.grammar.normalize_and_validate(&raw) {
            Some(plate) => Ok(Some(plate)),
            None => {
                metrics::REJECTED.inc();
                debug!(cleaned = %prefilter(&raw), "invalid plate format");
                Ok(None)
            }
        }
    }
}
