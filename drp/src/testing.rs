//! Synthetic frames and stand-in processors shared by unit tests.

use std::path::PathBuf;

use crate::batch::{Batch, Frame};
use crate::error::Result;
use crate::image::{Image, ImageDimensions};
use crate::io::{HistoryEntry, HistorySource};
use crate::metadata::{
    Metadata, Value, BASENAME_KEY, CALSTEPS_KEY, OBSCLASS_KEY, TARGET_KEY, UTCTIME_KEY,
};
use crate::processor::{Capability, Processor, StepContext};

pub(crate) const TEST_DIMS: ImageDimensions = ImageDimensions {
    width: 4,
    height: 4,
    channels: 1,
};

pub(crate) fn core_metadata(name: &str) -> Metadata {
    Metadata::new()
        .with(OBSCLASS_KEY, "science")
        .with(TARGET_KEY, "m39")
        .with(UTCTIME_KEY, "2023-06-01T04:00:00")
        .with(BASENAME_KEY, name)
        .with(CALSTEPS_KEY, "")
}

/// 4x4 single-channel frame filled with `value`.
pub(crate) fn frame(name: &str, value: f32) -> Frame {
    Frame::new(Image::filled(TEST_DIMS, value), core_metadata(name))
}

pub(crate) fn frame_with<V: Into<Value>>(
    name: &str,
    value: f32,
    fields: impl IntoIterator<Item = (&'static str, V)>,
) -> Frame {
    let mut frame = frame(name, value);
    for (key, value) in fields {
        frame.metadata.set(key, value);
    }
    frame
}

pub(crate) fn names(batch: &Batch) -> Vec<String> {
    batch
        .metadata()
        .map(|meta| meta.get_str(BASENAME_KEY).unwrap_or_default().to_string())
        .collect()
}

/// Appends its name to `CALSTEPS` of every frame.
pub(crate) struct Tagger {
    name: String,
    provides: Vec<Capability>,
    requires: Vec<Capability>,
    replayable: bool,
}

impl Tagger {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            provides: Vec::new(),
            requires: Vec::new(),
            replayable: false,
        }
    }

    pub(crate) fn providing(mut self, capability: &str) -> Self {
        self.provides.push(Capability::new(capability));
        self
    }

    pub(crate) fn requiring(mut self, capability: &str) -> Self {
        self.requires.push(Capability::new(capability));
        self
    }

    pub(crate) fn replayable(mut self) -> Self {
        self.replayable = true;
        self
    }

    fn tag(&self, mut batch: Batch) -> Batch {
        for frame in batch.frames_mut() {
            frame.metadata.append_step(&self.name);
        }
        batch
    }
}

impl Processor for Tagger {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self) -> Vec<Capability> {
        self.provides.clone()
    }

    fn requires(&self) -> Vec<Capability> {
        self.requires.clone()
    }

    fn apply_to_batch(&mut self, batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        Ok(self.tag(batch))
    }

    fn replay(&mut self, batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        if self.replayable {
            Ok(self.tag(batch))
        } else {
            Ok(batch)
        }
    }
}

/// Tags frames like [`Tagger`] but fails on the `fail_on`-th batch it sees.
pub(crate) struct FailOn {
    name: String,
    fail_on: usize,
    calls: usize,
}

impl FailOn {
    pub(crate) fn new(name: &str, fail_on: usize) -> Self {
        Self {
            name: name.to_string(),
            fail_on,
            calls: 0,
        }
    }
}

impl Processor for FailOn {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply_to_batch(&mut self, mut batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        let call = self.calls;
        self.calls += 1;
        if call == self.fail_on {
            return Err(anyhow::anyhow!("synthetic failure on batch {}", call).into());
        }
        for frame in batch.frames_mut() {
            frame.metadata.append_step(&self.name);
        }
        Ok(batch)
    }
}

/// History held in memory; paths are `memory/<index>`.
pub(crate) struct MemoryHistory {
    frames: Vec<Frame>,
}

impl MemoryHistory {
    pub(crate) fn new(frames: Vec<Frame>) -> Self {
        Self { frames }
    }
}

impl HistorySource for MemoryHistory {
    fn entries(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .frames
            .iter()
            .enumerate()
            .map(|(idx, frame)| HistoryEntry {
                path: PathBuf::from(format!("memory/{idx}")),
                metadata: frame.metadata.clone(),
            })
            .collect())
    }

    fn load(&self, entry: &HistoryEntry) -> Result<Frame> {
        let idx: usize = entry
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse().ok())
            .ok_or_else(|| anyhow::anyhow!("not a memory path: {}", entry.path.display()))?;
        self.frames
            .get(idx)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no frame at {idx}").into())
    }
}
