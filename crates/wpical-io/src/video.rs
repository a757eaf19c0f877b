use std::path::Path;

use gst::prelude::*;
use gstreamer as gst;
use gstreamer_app as gst_app;

use crate::error::IoError;
use crate::frame::{FrameSource, GrayFrame};

fn gst_err(context: &str, err: impl std::fmt::Display) -> IoError {
    IoError::Gstreamer(format!("{context}: {err}"))
}

/// Decodes a video file to grayscale frames with a GStreamer pipeline.
pub struct VideoReader {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    size: (usize, usize),
    fps: f64,
    total_frames: Option<usize>,
    next_index: usize,
}

impl VideoReader {
    /// Open `path`, preroll the pipeline and read the stream metadata.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IoError> {
        gst::init().map_err(|e| gst_err("init", e))?;
        let path = path.as_ref();
        if !path.exists() {
            return Err(IoError::FileNotFound(path.to_path_buf()));
        }

        let location = if cfg!(windows) {
            path.to_string_lossy().replace('\\', "/")
        } else {
            path.to_string_lossy().into_owned()
        };
        let pipeline_str = format!(
            "filesrc location=\"{location}\" ! \
            decodebin ! \
            videoconvert ! \
            video/x-raw,format=GRAY8 ! \
            appsink name=sink sync=false max-buffers=8 drop=false"
        );
        log::debug!("Reader Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| gst_err("failed to parse pipeline", e))?
            .dynamic_cast::<gst::Pipeline>()
            .map_err(|_| IoError::Gstreamer("failed to downcast pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| IoError::Gstreamer("failed to get appsink by name".to_string()))?
            .dynamic_cast::<gst_app::AppSink>()
            .map_err(|_| IoError::Gstreamer("failed to downcast appsink".to_string()))?;

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| gst_err("failed to start pipeline", e))?;

        let mut reader = Self {
            pipeline,
            appsink,
            size: (0, 0),
            fps: 0.0,
            total_frames: None,
            next_index: 0,
        };
        reader.read_metadata()?;
        Ok(reader)
    }

    fn read_metadata(&mut self) -> Result<(), IoError> {
        let preroll_timeout = gst::ClockTime::from_seconds(15);
        let sample = self
            .appsink
            .try_pull_preroll(preroll_timeout)
            .ok_or_else(|| IoError::Gstreamer("timeout waiting for preroll sample".to_string()))?;

        let caps = sample
            .caps()
            .ok_or_else(|| IoError::Gstreamer("preroll sample has no caps".to_string()))?;
        let structure = caps
            .structure(0)
            .ok_or_else(|| IoError::Gstreamer("caps have no structure".to_string()))?;
        let width = structure
            .get::<i32>("width")
            .map_err(|e| gst_err("width", e))?;
        let height = structure
            .get::<i32>("height")
            .map_err(|e| gst_err("height", e))?;
        self.size = (width.max(0) as usize, height.max(0) as usize);

        match structure.get::<gst::Fraction>("framerate") {
            Ok(fps) if fps.numer() > 0 && fps.denom() > 0 => {
                self.fps = fps.numer() as f64 / fps.denom() as f64;
            }
            _ => log::warn!("Could not determine video framerate from caps"),
        }

        self.total_frames = self
            .pipeline
            .query_duration::<gst::ClockTime>()
            .filter(|_| self.fps > 0.0)
            .map(|d| (d.nseconds() as f64 * 1e-9 * self.fps).round() as usize);

        log::info!(
            "VideoReader opened: {}x{}, {:.2} fps, {:?} frames",
            self.size.0,
            self.size.1,
            self.fps,
            self.total_frames
        );
        Ok(())
    }

    /// Frames per second from the stream caps, `0.0` when unknown.
    pub fn fps(&self) -> f64 {
        self.fps
    }

    fn pipeline_error(&self) -> Option<IoError> {
        let bus = self.pipeline.bus()?;
        let msg = bus.pop_filtered(&[gst::MessageType::Error])?;
        match msg.view() {
            gst::MessageView::Error(err) => Some(gst_err("pipeline error", err.error())),
            _ => None,
        }
    }
}

impl FrameSource for VideoReader {
    fn frame_size(&self) -> (usize, usize) {
        self.size
    }

    fn total_frames(&self) -> Option<usize> {
        self.total_frames
    }

    fn next_frame(&mut self) -> Result<Option<GrayFrame>, IoError> {
        let timeout = gst::ClockTime::from_seconds(5);
        let Some(sample) = self.appsink.try_pull_sample(timeout) else {
            if let Some(err) = self.pipeline_error() {
                return Err(err);
            }
            if !self.appsink.is_eos() {
                log::warn!("try_pull_sample timed out before end of stream");
            }
            return Ok(None);
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| IoError::Gstreamer("sample has no buffer".to_string()))?;
        let map = buffer
            .map_readable()
            .map_err(|e| gst_err("failed to map buffer", e))?;
        let data = map.as_slice();

        let (width, height) = self.size;
        if height == 0 || data.len() < width * height {
            return Err(IoError::InvalidBuffer {
                width,
                height,
                expected: width * height,
                actual: data.len(),
            });
        }
        // rows are padded to the pipeline stride
        let stride = data.len() / height;
        let mut pixels = Vec::with_capacity(width * height);
        for row in data.chunks(stride).take(height) {
            pixels.extend_from_slice(&row[..width]);
        }

        let frame = GrayFrame::new(self.next_index, width, height, pixels)?;
        self.next_index += 1;
        Ok(Some(frame))
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            log::error!("Error setting reader pipeline NULL in drop: {}", e);
        }
    }
}
