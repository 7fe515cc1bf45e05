use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use opencv::core::Scalar;
use opencv::core::CV_8UC3;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use parking_plate_detector::plate_detection::bounding_box_render::OperatorPreview;
use parking_plate_detector::plate_detection::bounding_box_render::PreviewError;
use parking_plate_detector::plate_detection::object_detector::DetectorError;
use parking_plate_detector::plate_detection::object_detector::RegionDetector;
use parking_plate_detector::plate_detection::plate_validator::PlateCandidate;
use parking_plate_detector::plate_detection::record_sink::PersistenceError;
use parking_plate_detector::plate_detection::record_sink::PersistenceSink;
use parking_plate_detector::plate_detection::tesseract_ocr::RecognizerError;
use parking_plate_detector::plate_detection::tesseract_ocr::TextRecognizer;
use parking_plate_detector::plate_detection::video_reader::FrameSource;
use parking_plate_detector::plate_detection::video_reader::SourceError;
use parking_plate_detector::plate_detection::PlateRecord;
use parking_plate_detector::plate_detection::PlateStatus;
use parking_plate_detector::plate_detection::Region;
use parking_plate_detector::session::SessionController;
use parking_plate_detector::session::SessionState;
use parking_plate_detector::session::StopReason;

fn frame() -> Mat {
    Mat::new_rows_cols_with_default(120, 160, CV_8UC3, Scalar::all(180.0)).unwrap()
}

/// Yields scripted reads, then end of stream.
struct ScriptedSource {
    reads: VecDeque<Result<Option<Mat>, SourceError>>,
}

impl ScriptedSource {
    fn frames(count: usize) -> Self {
        Self {
            reads: (0..count).map(|_| Ok(Some(frame()))).collect(),
        }
    }

    fn failing_after(count: usize) -> Self {
        let mut source = Self::frames(count);
        source
            .reads
            .push_back(Err(SourceError::Unavailable("camera unplugged".into())));
        source
    }
}

impl FrameSource for ScriptedSource {
    fn read(&mut self) -> Result<Option<Mat>, SourceError> {
        self.reads.pop_front().unwrap_or(Ok(None))
    }
}

/// Reports the same regions on every frame.
struct FixedRegions(Vec<Region>);

impl RegionDetector for FixedRegions {
    fn detect(&mut self, frame: &Mat, threshold: f32) -> Result<Vec<Region>, DetectorError> {
        assert!(!frame.empty());
        assert_eq!(threshold, 0.5);
        Ok(self.0.clone())
    }
}

/// Returns scripted texts in order and counts calls.
/// Fails on the first frame, then reports the given region.
struct FlakyDetector {
    calls: usize,
    region: Region,
}

impl RegionDetector for FlakyDetector {
    fn detect(&mut self, _: &Mat, _: f32) -> Result<Vec<Region>, DetectorError> {
        self.calls += 1;
        if self.calls == 1 {
            return Err(DetectorError::OpenCv(opencv::Error::new(
                opencv::core::StsError,
                "forward pass failed",
            )));
        }
        Ok(vec![self.region])
    }
}

#[derive(Clone, Default)]
struct ScriptedOcr {
    texts: Rc<RefCell<VecDeque<&'static str>>>,
    calls: Rc<RefCell<usize>>,
}

impl ScriptedOcr {
    fn new(texts: &[&'static str]) -> Self {
        Self {
            texts: Rc::new(RefCell::new(texts.iter().copied().collect())),
            calls: Rc::default(),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl TextRecognizer for ScriptedOcr {
    fn recognize(&mut self, image: &Mat) -> Result<String, RecognizerError> {
        assert_eq!(image.channels(), 1);
        *self.calls.borrow_mut() += 1;
        Ok(self.texts.borrow_mut().pop_front().unwrap_or("").to_string())
    }
}

#[derive(Clone, Default)]
struct RecordingSink {
    records: Rc<RefCell<Vec<PlateRecord>>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn records(&self) -> Vec<PlateRecord> {
        self.records.borrow().clone()
    }
}

impl PersistenceSink for RecordingSink {
    fn persist(&self, record: &PlateRecord) -> Result<(), PersistenceError> {
        self.records.borrow_mut().push(record.clone());
        if self.fail {
            return Err(PersistenceError::Rejected {
                status: 503,
                body: "store unavailable".into(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
struct RecordingPreview {
    candidates: Rc<RefCell<Vec<Region>>>,
    accepted: Rc<RefCell<Vec<(Region, String)>>>,
    presented: Rc<RefCell<usize>>,
    quit_after: Option<usize>,
}

impl OperatorPreview for RecordingPreview {
    fn mark_candidate(&mut self, region: &Region) {
        self.candidates.borrow_mut().push(*region);
    }

    fn mark_accepted(&mut self, region: &Region, plate: &PlateCandidate) {
        self.accepted
            .borrow_mut()
            .push((*region, plate.as_str().to_string()));
    }

    fn present(&mut self, _: &Mat) -> Result<bool, PreviewError> {
        *self.presented.borrow_mut() += 1;
        Ok(self
            .quit_after
            .map_or(false, |limit| *self.presented.borrow() >= limit))
    }
}

fn plate_region() -> Region {
    Region::new(20, 30, 100, 60, 0.92)
}

#[test]
fn accepted_plate_is_persisted_once_and_session_matches() {
    let ocr = ScriptedOcr::new(&[" mh-12 AB 1234 "]);
    let sink = RecordingSink::default();
    let preview = RecordingPreview::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(10),
        FixedRegions(vec![plate_region()]),
        ocr.clone(),
        sink.clone(),
        preview.clone(),
    );
    let report = controller.run();

    match &report.state {
        SessionState::Matched(found) => {
            assert_eq!(found.record.license_plate, "MH12AB1234");
            assert!(found.persistence.is_ok());
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert!(report.state.found_plate());
    assert_eq!(report.frames_read, 1);
    assert_eq!(
        sink.records(),
        vec![PlateRecord {
            license_plate: "MH12AB1234".into(),
            status: PlateStatus::Entered,
        }]
    );
    assert_eq!(
        *preview.accepted.borrow(),
        vec![(plate_region(), "MH12AB1234".to_string())]
    );
    assert_eq!(*preview.presented.borrow(), 1);
}

#[test]
fn rejected_text_keeps_scanning_without_persisting() {
    let ocr = ScriptedOcr::new(&["XYZ"]);
    let sink = RecordingSink::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(1),
        FixedRegions(vec![plate_region()]),
        ocr.clone(),
        sink.clone(),
        RecordingPreview::default(),
    );

    let state = controller.tick(SessionState::Scanning);
    assert!(matches!(state, SessionState::Scanning));
    assert!(sink.records().is_empty());
    assert_eq!(ocr.calls(), 1);
}

#[test]
fn source_failure_on_third_tick_stops_session() {
    let sink = RecordingSink::default();
    let ocr = ScriptedOcr::new(&["XYZ", "MH12", "not a plate"]);

    let mut controller = SessionController::new(
        ScriptedSource::failing_after(2),
        FixedRegions(vec![plate_region()]),
        ocr.clone(),
        sink.clone(),
        RecordingPreview::default(),
    );

    let mut state = SessionState::Scanning;
    for _ in 0..2 {
        state = controller.tick(state);
        assert!(matches!(state, SessionState::Scanning));
    }
    state = controller.tick(state);

    assert!(matches!(
        state,
        SessionState::Stopped(StopReason::SourceExhausted)
    ));
    assert!(sink.records().is_empty());
    assert_eq!(ocr.calls(), 2);
}

#[test]
fn persistence_failure_is_surfaced_and_session_still_matches() {
    let sink = RecordingSink::failing();
    let ocr = ScriptedOcr::new(&["MH12AB1234", "KA01AB1"]);

    let mut controller = SessionController::new(
        ScriptedSource::frames(5),
        FixedRegions(vec![plate_region()]),
        ocr.clone(),
        sink.clone(),
        RecordingPreview::default(),
    );
    let report = controller.run();

    match &report.state {
        SessionState::Matched(found) => {
            assert_eq!(found.record.license_plate, "MH12AB1234");
            assert!(matches!(
                found.persistence,
                Err(PersistenceError::Rejected { status: 503, .. })
            ));
        }
        other => panic!("unexpected state {other:?}"),
    }
    assert_eq!(sink.records().len(), 1);
    assert_eq!(report.frames_read, 1);
    assert_eq!(ocr.calls(), 1);
}

#[test]
fn empty_region_is_skipped_and_first_valid_region_wins() {
    let empty = Region::new(50, 50, 50, 80, 0.95);
    let valid = plate_region();
    let never = Region::new(110, 70, 150, 100, 0.6);
    let ocr = ScriptedOcr::new(&["MH12AB1234", "KA01AB1"]);
    let sink = RecordingSink::default();
    let preview = RecordingPreview::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(3),
        FixedRegions(vec![empty, valid, never]),
        ocr.clone(),
        sink.clone(),
        preview.clone(),
    );
    let report = controller.run();

    assert!(report.state.found_plate());
    assert_eq!(report.regions_evaluated, 2);
    assert_eq!(ocr.calls(), 1);
    assert_eq!(sink.records()[0].license_plate, "MH12AB1234");
    assert_eq!(*preview.candidates.borrow(), vec![empty, valid]);
    assert_eq!(preview.accepted.borrow()[0].0, valid);
}

#[test]
fn regions_are_tried_in_detector_order() {
    let first = Region::new(10, 10, 60, 30, 0.55);
    let second = Region::new(70, 40, 150, 80, 0.99);
    let ocr = ScriptedOcr::new(&["garbage", "DL01CA9"]);
    let sink = RecordingSink::default();
    let preview = RecordingPreview::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(1),
        FixedRegions(vec![first, second]),
        ocr.clone(),
        sink.clone(),
        preview.clone(),
    );
    let report = controller.run();

    assert!(report.state.found_plate());
    assert_eq!(ocr.calls(), 2);
    assert_eq!(sink.records()[0].license_plate, "DL01CA9");
    assert_eq!(preview.accepted.borrow()[0].0, second);
}

#[test]
fn operator_quit_stops_session() {
    let preview = RecordingPreview {
        quit_after: Some(2),
        ..RecordingPreview::default()
    };
    let sink = RecordingSink::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(10),
        FixedRegions(vec![plate_region()]),
        ScriptedOcr::new(&["XYZ", "XYZ", "MH12AB1234"]),
        sink.clone(),
        preview.clone(),
    );
    let report = controller.run();

    assert!(matches!(
        report.state,
        SessionState::Stopped(StopReason::QuitRequested)
    ));
    assert_eq!(report.frames_read, 2);
    assert!(sink.records().is_empty());
}

#[test]
fn match_wins_over_quit_on_the_same_frame() {
    let preview = RecordingPreview {
        quit_after: Some(1),
        ..RecordingPreview::default()
    };

    let mut controller = SessionController::new(
        ScriptedSource::frames(1),
        FixedRegions(vec![plate_region()]),
        ScriptedOcr::new(&["MH12AB1234"]),
        RecordingSink::default(),
        preview,
    );

    assert!(controller.run().state.found_plate());
}

#[test]
fn frames_without_regions_keep_scanning_until_source_ends() {
    let ocr = ScriptedOcr::new(&[]);
    let mut controller = SessionController::new(
        ScriptedSource::frames(4),
        FixedRegions(vec![]),
        ocr.clone(),
        RecordingSink::default(),
        RecordingPreview::default(),
    );
    let report = controller.run();

    assert!(matches!(
        report.state,
        SessionState::Stopped(StopReason::SourceExhausted)
    ));
    assert_eq!(report.frames_read, 4);
    assert_eq!(report.regions_evaluated, 0);
    assert_eq!(ocr.calls(), 0);
}

#[test]
fn detector_failure_skips_frame_and_session_continues() {
    let ocr = ScriptedOcr::new(&["MH12AB1234"]);
    let sink = RecordingSink::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(5),
        FlakyDetector {
            calls: 0,
            region: plate_region(),
        },
        ocr.clone(),
        sink.clone(),
        RecordingPreview::default(),
    );
    let report = controller.run();

    assert!(report.state.found_plate());
    assert_eq!(report.frames_read, 2);
    assert_eq!(report.regions_evaluated, 1);
    assert_eq!(ocr.calls(), 1);
    assert_eq!(sink.records()[0].license_plate, "MH12AB1234");
}

#[test]
fn stray_non_ascii_letter_is_rejected_not_stripped() {
    let ocr = ScriptedOcr::new(&["MH12AB1234é"]);
    let sink = RecordingSink::default();

    let mut controller = SessionController::new(
        ScriptedSource::frames(1),
        FixedRegions(vec![plate_region()]),
        ocr.clone(),
        sink.clone(),
        RecordingPreview::default(),
    );
    let report = controller.run();

    assert!(matches!(
        report.state,
        SessionState::Stopped(StopReason::SourceExhausted)
    ));
    assert_eq!(ocr.calls(), 1);
    assert!(sink.records().is_empty());
}
