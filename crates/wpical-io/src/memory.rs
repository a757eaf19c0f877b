use std::collections::VecDeque;

use crate::error::IoError;
use crate::frame::{FrameSource, GrayFrame};

/// Frames held in memory, yielded in insertion order.
#[derive(Debug, Clone)]
pub struct MemorySource {
    width: usize,
    height: usize,
    total: usize,
    frames: VecDeque<GrayFrame>,
}

impl MemorySource {
    /// Create a source of `width` x `height` frames.
    ///
    /// Frames are re-indexed in order; all must share the given size.
    pub fn new(width: usize, height: usize, frames: Vec<GrayFrame>) -> Result<Self, IoError> {
        let mut queue = VecDeque::with_capacity(frames.len());
        for (index, mut frame) in frames.into_iter().enumerate() {
            if frame.size() != (width, height) {
                return Err(IoError::FrameSizeMismatch {
                    expected: (width, height),
                    actual: frame.size(),
                });
            }
            frame.index = index;
            queue.push_back(frame);
        }
        Ok(Self {
            width,
            height,
            total: queue.len(),
            frames: queue,
        })
    }

    /// `count` black frames, useful when only the frame index matters.
    pub fn blank(width: usize, height: usize, count: usize) -> Self {
        let frames = (0..count)
            .map(|index| GrayFrame {
                index,
                width,
                height,
                data: vec![0; width * height],
            })
            .collect::<VecDeque<_>>();
        Self {
            width,
            height,
            total: count,
            frames,
        }
    }
}

impl FrameSource for MemorySource {
    fn frame_size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn total_frames(&self) -> Option<usize> {
        Some(self.total)
    }

    fn next_frame(&mut self) -> Result<Option<GrayFrame>, IoError> {
        Ok(self.frames.pop_front())
    }
}
