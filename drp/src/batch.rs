//! Batches of co-indexed images and metadata records.

use crate::error::{Error, Result};
use crate::image::Image;
use crate::metadata::Metadata;

/// One image with its metadata record.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: Image,
    pub metadata: Metadata,
}

impl Frame {
    pub fn new(image: Image, metadata: Metadata) -> Self {
        Self { image, metadata }
    }
}

/// Unit moved through the processor chain atomically.
///
/// Images and records are stored together, so their index correspondence
/// cannot be broken by reordering one side. An empty batch means "no
/// matching data" and is legal everywhere.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    frames: Vec<Frame>,
}

/// The sequence actually threaded through a pipeline.
pub type BatchList = Vec<Batch>;

impl Batch {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Pairs two equal-length sequences.
    pub fn from_parts(images: Vec<Image>, metadata: Vec<Metadata>) -> Result<Self> {
        if images.len() != metadata.len() {
            return Err(Error::LengthMismatch {
                images: images.len(),
                metadata: metadata.len(),
            });
        }
        let frames = images
            .into_iter()
            .zip(metadata)
            .map(|(image, metadata)| Frame::new(image, metadata))
            .collect();
        Ok(Self { frames })
    }

    pub fn into_parts(self) -> (Vec<Image>, Vec<Metadata>) {
        self.frames
            .into_iter()
            .map(|frame| (frame.image, frame.metadata))
            .unzip()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn into_frames(self) -> Vec<Frame> {
        self.frames
    }

    pub fn images(&self) -> impl Iterator<Item = &Image> {
        self.frames.iter().map(|frame| &frame.image)
    }

    pub fn metadata(&self) -> impl Iterator<Item = &Metadata> {
        self.frames.iter().map(|frame| &frame.metadata)
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn retain(&mut self, f: impl FnMut(&Frame) -> bool) {
        self.frames.retain(f);
    }
}

impl FromIterator<Frame> for Batch {
    fn from_iter<I: IntoIterator<Item = Frame>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for Batch {
    type Item = Frame;
    type IntoIter = std::vec::IntoIter<Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.into_iter()
    }
}

impl Extend<Frame> for Batch {
    fn extend<I: IntoIterator<Item = Frame>>(&mut self, iter: I) {
        self.frames.extend(iter);
    }
}

/// Number of frames across every batch in the list.
pub fn total_frames(batches: &[Batch]) -> usize {
    batches.iter().map(Batch::len).sum()
}
