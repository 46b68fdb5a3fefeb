use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::batch::Batch;
use crate::error::Result;
use crate::io::FrameCodec;
use crate::metadata::BASENAME_KEY;
use crate::processor::{Processor, StepContext};

#[derive(Debug, Clone, Deserialize)]
pub struct SaverParams {
    pub output_dir_name: String,
}

/// Writes every frame to `<night dir>/<output_dir_name>`, named after its
/// `BASENAME`. Batches pass through unchanged.
///
/// Frames without a `BASENAME` are named `frame_<n>`, where `n` counts every
/// frame this saver has seen across all batches.
pub struct FrameSaver {
    output_dir_name: PathBuf,
    codec: Arc<dyn FrameCodec>,
    frames_seen: usize,
}

impl FrameSaver {
    pub const NAME: &'static str = "save";

    pub fn new(output_dir_name: impl Into<PathBuf>, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            output_dir_name: output_dir_name.into(),
            codec,
            frames_seen: 0,
        }
    }

    pub fn from_params(params: SaverParams, codec: Arc<dyn FrameCodec>) -> Self {
        Self::new(params.output_dir_name, codec)
    }

    fn file_name(&self, base_name: Option<&str>, index: usize) -> String {
        let stem = base_name
            .and_then(|name| Path::new(name).file_stem())
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("frame_{index}"));
        self.codec.file_name(&stem)
    }
}

impl Processor for FrameSaver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply_to_batch(&mut self, batch: Batch, ctx: &mut StepContext<'_>) -> Result<Batch> {
        let output_dir = ctx.run.output_dir(&self.output_dir_name);

        for frame in batch.frames() {
            let index = self.frames_seen;
            self.frames_seen += 1;
            let name = self.file_name(frame.metadata.get_str(BASENAME_KEY), index);
            let path = output_dir.join(name);
            self.codec.save(frame, &path)?;
            tracing::debug!(path = %path.display(), "Saved frame");
        }

        Ok(batch)
    }
}
