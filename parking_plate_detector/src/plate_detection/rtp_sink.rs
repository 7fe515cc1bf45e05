use gstreamer::parse_launch;
use gstreamer::prelude::Cast;
use gstreamer::prelude::CastNone;
use gstreamer::prelude::ElementExt;
use gstreamer::prelude::GstBinExt;
use gstreamer::prelude::MulDiv;
use gstreamer::Buffer;
use gstreamer::Caps;
use gstreamer::ClockTime;
use gstreamer_video::VideoCapsBuilder;
use gstreamer_video::VideoFormat;
use opencv::core::Size;
use opencv::imgproc::resize;
use opencv::imgproc::INTER_LINEAR;
use opencv::prelude::Mat;
use opencv::prelude::MatTraitConst;
use opencv::prelude::MatTraitConstManual;
use std::sync::mpsc::sync_channel;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::SyncSender;
use std::sync::mpsc::TrySendError;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::bounding_box_render::BoundingBoxRender;
use super::bounding_box_render::OperatorPreview;
use super::bounding_box_render::PreviewError;
use super::plate_validator::PlateCandidate;
use super::Region;
use crate::config::PreviewConfig;

fn stream_error<E: std::fmt::Display>(error: E) -> PreviewError {
    PreviewError::Stream(error.to_string())
}

/// Frames waiting for the encoder. Anything beyond this is dropped, the preview is live.
const QUEUED_FRAMES: usize = 2;

/// Bounded hand-off from the session thread to the appsrc streaming thread.
pub struct FrameQueue<T> {
    sender: Option<SyncSender<T>>,
}

impl<T> FrameQueue<T> {
    pub fn bounded(capacity: usize) -> (Self, Receiver<T>) {
        let (sender, receiver) = sync_channel(capacity);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Queues `item` without blocking. Returns `false` if the queue was full and it was dropped.
    pub fn offer(&self, item: T) -> Result<bool, PreviewError> {
        let Some(sender) = &self.sender else {
            return Err(PreviewError::Stream("frame queue closed".to_string()));
        };
        match sender.try_send(item) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => {
                Err(PreviewError::Stream("rtp pipeline stopped".to_string()))
            }
        }
    }

    /// Drops the sender so a consumer blocked in `recv` returns.
    pub fn close(&mut self) {
        self.sender.take();
    }
}

pub fn create_caps(width: usize, height: usize, fps: usize) -> Caps {
    VideoCapsBuilder::new()
        .width(width as i32)
        .height(height as i32)
        .framerate(gstreamer::Fraction::new(fps as i32, 1))
        .format(VideoFormat::Bgr)
        .build()
}

/// Streams BGR frames as RTP/H.264 over UDP.
pub struct RtpSink {
    pipeline: gstreamer::Pipeline,
    size: Size,
    fps: usize,
    frames: u64,
    queue: FrameQueue<Buffer>,
}

impl RtpSink {
    pub fn new(
        width: usize,
        height: usize,
        fps: usize,
        host: &str,
        port: u16,
    ) -> Result<Self, PreviewError> {
        gstreamer::init().map_err(stream_error)?;
        let pipeline_str = format!(
            "appsrc name=src ! videoconvert ! x264enc tune=zerolatency bitrate=500 speed-preset=superfast ! rtph264pay ! udpsink host={host} port={port}"
        );

        let pipeline = parse_launch(&pipeline_str)
            .map_err(stream_error)?
            .dynamic_cast::<gstreamer::Pipeline>()
            .map_err(|_| PreviewError::Stream(format!("not a pipeline: {pipeline_str}")))?;

        let app_src = pipeline
            .by_name("src")
            .and_dynamic_cast::<gstreamer_app::AppSrc>()
            .map_err(|_| PreviewError::Stream("cannot find appsrc".to_string()))?;

        app_src.set_caps(Some(&create_caps(width, height, fps)));
        app_src.set_format(gstreamer::Format::Time);

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(stream_error)?;

        let (queue, buffer_r) = FrameQueue::bounded(QUEUED_FRAMES);
        Self::init(app_src, buffer_r);
        info!(%host, port, width, height, fps, "rtp preview streaming");

        Ok(Self {
            pipeline,
            size: Size::new(width as i32, height as i32),
            fps: fps.max(1),
            frames: 0,
            queue,
        })
    }

    fn init(app_src: gstreamer_app::AppSrc, receiver: Receiver<Buffer>) {
        // The appsrc pulls: every need-data callback blocks until the next frame is queued
        // or the queue is closed.
        app_src.set_callbacks(
            gstreamer_app::AppSrcCallbacks::builder()
                .need_data(move |appsrc, _| {
                    if let Ok(buffer) = receiver.recv() {
                        if let Err(e) = appsrc.push_buffer(buffer) {
                            warn!(error = ?e, "cannot push buffer to appsrc");
                        }
                    }
                })
                .build(),
        );
    }

    pub fn push(&mut self, frame: &Mat) -> Result<(), PreviewError> {
        let mut resized = Mat::default();
        let frame = if frame.size()? == self.size && frame.is_continuous() {
            frame
        } else {
            resize(frame, &mut resized, self.size, 0.0, 0.0, INTER_LINEAR)?;
            &resized
        };

        let duration = ClockTime::SECOND
            .mul_div_floor(1, self.fps as u64)
            .ok_or_else(|| PreviewError::Stream("frame duration overflow".to_string()))?;
        let pts = duration * self.frames;

        let data = frame.data_bytes()?;
        let mut buffer = Buffer::with_size(data.len()).map_err(stream_error)?;
        {
            let buffer = buffer.make_mut();
            buffer
                .copy_from_slice(0, data)
                .map_err(|_| PreviewError::Stream("cannot copy frame to buffer".to_string()))?;
            buffer.set_duration(duration);
            buffer.set_pts(pts);
            buffer.set_dts(pts);
        }

        if self.queue.offer(buffer)? {
            trace!(frame = self.frames, "rtp frame queued");
        } else {
            trace!(frame = self.frames, "encoder behind, rtp frame dropped");
        }
        self.frames += 1;
        Ok(())
    }
}

impl Drop for RtpSink {
    fn drop(&mut self) {
        // The streaming thread may be parked in need_data; release it before the
        // state change joins it.
        self.queue.close();
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = ?e, "cannot stop rtp pipeline");
        }
    }
}

/// Headless preview for gate hardware: annotated frames go out over RTP, quit is never requested.
pub struct RtpPreview {
    render: BoundingBoxRender,
    sink: RtpSink,
}

impl RtpPreview {
    pub fn new(config: &PreviewConfig, fps: u64) -> Result<Self, PreviewError> {
        let [width, height] = config.rtp_size;
        let sink = RtpSink::new(
            width as usize,
            height as usize,
            fps as usize,
            &config.rtp_host,
            config.rtp_port,
        )?;
        Ok(Self {
            render: BoundingBoxRender::default(),
            sink,
        })
    }
}

impl OperatorPreview for RtpPreview {
    fn mark_candidate(&mut self, region: &Region) {
        self.render.candidate(region);
    }

    fn mark_accepted(&mut self, region: &Region, plate: &PlateCandidate) {
        self.render.accepted(region, plate);
    }

    fn present(&mut self, frame: &Mat) -> Result<bool, PreviewError> {
        let (canvas, _) = self.render.render(frame)?;
        self.sink.push(&canvas)?;
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn full_queue_drops_newest_frame() {
        let (queue, receiver) = FrameQueue::bounded(2);
        assert!(queue.offer(1).unwrap());
        assert!(queue.offer(2).unwrap());
        assert!(!queue.offer(3).unwrap());

        assert_eq!(receiver.try_recv(), Ok(1));
        assert_eq!(receiver.try_recv(), Ok(2));
        assert!(receiver.try_recv().is_err());
        assert!(queue.offer(4).unwrap());
    }

    #[test]
    fn closing_releases_a_blocked_consumer() {
        let (mut queue, receiver) = FrameQueue::<u64>::bounded(2);
        let consumer = thread::spawn(move || receiver.recv());

        queue.close();

        assert!(consumer.join().unwrap().is_err());
        assert!(queue.offer(7).is_err());
    }

    #[test]
    fn stopped_consumer_is_an_error() {
        let (queue, receiver) = FrameQueue::bounded(2);
        drop(receiver);
        assert!(matches!(queue.offer(1), Err(PreviewError::Stream(_))));
    }
}
