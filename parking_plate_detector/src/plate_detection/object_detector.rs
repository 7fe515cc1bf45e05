use opencv::core::Rect;
use opencv::core::Scalar;
use opencv::core::Size;
use opencv::core::Vector;

use opencv::core::CV_32F;
use opencv::dnn;
use opencv::dnn::blob_from_image;
use opencv::dnn::nms_boxes;

use opencv::dnn::Net;
use opencv::dnn::DNN_BACKEND_CUDA;
use opencv::dnn::DNN_BACKEND_OPENCV;

use opencv::dnn::DNN_TARGET_CPU;
use opencv::dnn::DNN_TARGET_CUDA;

use opencv::prelude::Mat;

use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;

use opencv::prelude::NetTrait;
use opencv::prelude::NetTraitConst;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use tracing::info;

use super::Region;
use crate::config::DetectorConfig;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("cannot load detection model {path}: {source}")]
    Model {
        path: String,
        source: opencv::Error,
    },
    #[error("opencv error during detection: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Maps a frame to plate-shaped regions scoring at least `threshold`, in detector order.
pub trait RegionDetector {
    fn detect(&mut self, frame: &Mat, threshold: f32) -> Result<Vec<Region>, DetectorError>;
}

/// Output tensor layout of the exported YOLO model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YoloLayout {
    /// `[1, N, 5 + classes]`: box, objectness, class scores per row.
    Yolov5,
    /// `[1, 4 + classes, N]`: box and class scores per column, no objectness.
    Yolov8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    rect: Rect,
    score: f32,
}

trait YoloProcessor {
    fn decode(&self, data: &[f32], x_factor: f32, y_factor: f32, threshold: f32)
        -> Vec<Candidate>;
}

fn to_rect(cx: f32, cy: f32, w: f32, h: f32, x_factor: f32, y_factor: f32) -> Rect {
    let left = (cx - 0.5 * w) * x_factor;
    let top = (cy - 0.5 * h) * y_factor;
    let width = w * x_factor;
    let height = h * y_factor;
    Rect::new(
        left.round() as i32,
        top.round() as i32,
        width.round() as i32,
        height.round() as i32,
    )
}

struct YoloProcessorV5 {
    classes: usize,
}

impl YoloProcessor for YoloProcessorV5 {
    fn decode(
        &self,
        data: &[f32],
        x_factor: f32,
        y_factor: f32,
        threshold: f32,
    ) -> Vec<Candidate> {
        let stride = 5 + self.classes;
        let mut candidates = vec![];

        for row in data.chunks_exact(stride) {
            let objectness = row[4];
            if objectness < threshold {
                continue;
            }
            let class_score = row[5..].iter().copied().fold(0.0f32, f32::max);
            let score = objectness * class_score;
            if score >= threshold {
                candidates.push(Candidate {
                    rect: to_rect(row[0], row[1], row[2], row[3], x_factor, y_factor),
                    score,
                });
            }
        }
        candidates
    }
}

struct YoloProcessorV8 {
    classes: usize,
}

impl YoloProcessor for YoloProcessorV8 {
    fn decode(
        &self,
        data: &[f32],
        x_factor: f32,
        y_factor: f32,
        threshold: f32,
    ) -> Vec<Candidate> {
        let attributes = 4 + self.classes;
        let anchors = data.len() / attributes;
        let at = |attribute: usize, anchor: usize| data[attribute * anchors + anchor];
        let mut candidates = vec![];

        for j in 0..anchors {
            let score = (4..attributes).map(|a| at(a, j)).fold(0.0f32, f32::max);
            if score >= threshold {
                candidates.push(Candidate {
                    rect: to_rect(at(0, j), at(1, j), at(2, j), at(3, j), x_factor, y_factor),
                    score,
                });
            }
        }
        candidates
    }
}

/// Keeps the best-scoring box of every overlapping cluster, best first.
fn suppress(
    candidates: &[Candidate],
    threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Candidate>, DetectorError> {
    if candidates.is_empty() {
        return Ok(vec![]);
    }
    let boxes: Vector<Rect> = candidates.iter().map(|c| c.rect).collect();
    let confidences: Vector<f32> = candidates.iter().map(|c| c.score).collect();

    let mut indices = Vector::<i32>::default();
    nms_boxes(
        &boxes,
        &confidences,
        threshold,
        nms_threshold,
        &mut indices,
        1.0,
        0,
    )?;

    Ok(indices
        .iter()
        .filter_map(|i| candidates.get(i as usize).copied())
        .collect())
}

pub struct ObjectDetector {
    classifier: Net,
    input_size: i32,
    nms_threshold: f32,
    post_processor: Box<dyn YoloProcessor>,
}

impl ObjectDetector {
    pub fn plate_detector(config: &DetectorConfig) -> Result<Self, DetectorError> {
        let path = config.model.to_string_lossy().to_string();
        let mut classifier =
            dnn::read_net_from_onnx(&path).map_err(|source| DetectorError::Model {
                path: path.clone(),
                source,
            })?;

        if config.use_gpu {
            classifier.set_preferable_backend(DNN_BACKEND_CUDA)?;
            classifier.set_preferable_target(DNN_TARGET_CUDA)?;
        } else {
            classifier.set_preferable_backend(DNN_BACKEND_OPENCV)?;
            classifier.set_preferable_target(DNN_TARGET_CPU)?;
        }

        let post_processor: Box<dyn YoloProcessor> = match config.layout {
            YoloLayout::Yolov5 => Box::new(YoloProcessorV5 {
                classes: config.classes,
            }),
            YoloLayout::Yolov8 => Box::new(YoloProcessorV8 {
                classes: config.classes,
            }),
        };
        info!(model = %path, layout = ?config.layout, gpu = config.use_gpu, "plate detector loaded");

        Ok(ObjectDetector {
            classifier,
            input_size: config.input_size,
            nms_threshold: config.nms_threshold,
            post_processor,
        })
    }
}

impl RegionDetector for ObjectDetector {
    fn detect(&mut self, frame: &Mat, threshold: f32) -> Result<Vec<Region>, DetectorError> {
        let mut blob = blob_from_image(
            frame,
            1.0 / 255.0,
            Size::new(self.input_size, self.input_size),
            Scalar::default(),
            true,
            false,
            CV_32F,
        )?;

        // Set the input of the network
        self.classifier
            .set_input(&mut blob, "", 1.0, Scalar::default())?;

        let output_names = self.classifier.get_unconnected_out_layers_names()?;
        let mut output_values = Vector::<Mat>::default();
        self.classifier
            .forward(&mut output_values, &output_names)?;

        let x_factor = frame.cols() as f32 / self.input_size as f32;
        let y_factor = frame.rows() as f32 / self.input_size as f32;

        let mut candidates = vec![];
        for output in output_values.iter() {
            let data = output.data_typed::<f32>()?;
            candidates.extend(
                self.post_processor
                    .decode(data, x_factor, y_factor, threshold),
            );
        }

        let kept = suppress(&candidates, threshold, self.nms_threshold)?;
        debug!(raw = candidates.len(), kept = kept.len(), "plate detection");

        Ok(kept
            .into_iter()
            .map(|c| Region::from_rect(c.rect, c.score).clamped(frame.cols(), frame.rows()))
            .collect())
    }
}
