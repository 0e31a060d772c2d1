use log::warn;

use crate::device::Image;

/// Captured frames of one temporal session, in frame order.
///
/// Append-only while the capture runs; sealed once it completes.
#[derive(Debug)]
pub struct FrameCache {
    frames: Vec<Image>,
    expected: usize,
    sealed: bool,
}

impl FrameCache {
    pub fn new(expected: usize) -> Self {
        Self {
            frames: Vec::with_capacity(expected),
            expected,
            sealed: false,
        }
    }

    /// Appends the next frame; returns its index.
    pub fn push(&mut self, image: Image) -> Option<usize> {
        if self.sealed || self.frames.len() >= self.expected {
            warn!("frame cache full, dropping captured image");
            return None;
        }
        self.frames.push(image);
        Some(self.frames.len() - 1)
    }

    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn get(&self, frame: usize) -> Option<&Image> {
        self.frames.get(frame)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn is_complete(&self) -> bool {
        self.frames.len() == self.expected
    }

    pub fn byte_len(&self) -> usize {
        self.frames.iter().map(Image::byte_len).sum()
    }
}
