use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::batch::{Batch, BatchList, Frame};
use crate::error::{Error, Result};
use crate::error_stack::{ErrorReport, ErrorStack};
use crate::io::FrameCodec;
use crate::metadata::{BASENAME_KEY, CALSTEPS_KEY, RAW_IMAGE_PATH_KEY};
use crate::processor::{ErrorPolicy, Processor, StepContext, StepOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// One batch per file.
    #[default]
    PerItem,
    /// All files in one batch.
    Single,
}

fn default_input_sub_dir() -> String {
    "raw".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderParams {
    #[serde(default = "default_input_sub_dir")]
    pub input_sub_dir: String,
    #[serde(default)]
    pub mode: LoadMode,
}

/// Starts a chain by reading every frame under `<night dir>/<input_sub_dir>`.
///
/// Incoming batches are discarded. Files are read in name order.
pub struct ImageLoader {
    input_sub_dir: PathBuf,
    codec: Arc<dyn FrameCodec>,
    mode: LoadMode,
}

impl ImageLoader {
    pub const NAME: &'static str = "load";

    pub fn new(input_sub_dir: impl Into<PathBuf>, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            input_sub_dir: input_sub_dir.into(),
            codec,
            mode: LoadMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn from_params(params: LoaderParams, codec: Arc<dyn FrameCodec>) -> Self {
        Self::new(params.input_sub_dir, codec).with_mode(params.mode)
    }

    /// Decodes one raw frame and stamps the loader bookkeeping keys.
    pub fn open_raw(&self, path: &Path) -> Result<Frame> {
        let mut frame = self.codec.load(path)?;
        frame.metadata.validate_core_fields()?;

        let base_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        frame.metadata.set(BASENAME_KEY, base_name);
        frame
            .metadata
            .set(RAW_IMAGE_PATH_KEY, path.display().to_string());
        if !frame.metadata.contains(CALSTEPS_KEY) {
            frame.metadata.set(CALSTEPS_KEY, "");
        }

        Ok(frame)
    }
}

impl Processor for ImageLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(
        &mut self,
        _batches: BatchList,
        ctx: &mut StepContext<'_>,
        policy: ErrorPolicy,
    ) -> StepOutput {
        let input_dir = ctx.run.output_dir(&self.input_sub_dir);
        let mut errors = ErrorStack::new();

        let paths = match common::file_utils::files_with_extensions(
            &input_dir,
            &[self.codec.extension()],
        ) {
            Ok(paths) => paths,
            Err(e) => {
                errors.push(ErrorReport::new(Self::NAME, 0, Error::io(&input_dir, e)));
                return StepOutput {
                    batches: Vec::new(),
                    errors,
                };
            }
        };

        tracing::info!(
            "Loading {} frames from {}",
            paths.len(),
            input_dir.display()
        );

        let mut frames = Vec::with_capacity(paths.len());
        for (item_index, path) in paths.iter().enumerate() {
            match self.open_raw(path) {
                Ok(frame) => frames.push(frame),
                Err(error) => {
                    errors.push(ErrorReport::new(Self::NAME, item_index, error));
                    if policy == ErrorPolicy::FailFast {
                        break;
                    }
                }
            }
        }

        let batches = match self.mode {
            LoadMode::PerItem => frames
                .into_iter()
                .map(|frame| Batch::new(vec![frame]))
                .collect(),
            LoadMode::Single => vec![Batch::new(frames)],
        };

        StepOutput { batches, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::BinFrameCodec;
    use crate::metadata::{Metadata, TARGET_KEY};
    use crate::processor::RunContext;
    use crate::testing::{frame, names};

    fn write_raw(run: &RunContext, name: &str, frame: &Frame) {
        BinFrameCodec
            .save(frame, &run.output_dir("raw").join(name))
            .unwrap();
    }

    fn load(run: &RunContext, loader: &mut ImageLoader, policy: ErrorPolicy) -> StepOutput {
        let mut ctx = StepContext {
            preceding: &mut [],
            run,
        };
        loader.apply(vec![Batch::empty()], &mut ctx, policy)
    }

    #[test]
    fn test_loads_sorted_and_stamps_keys() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new("winter", "20230601", dir.path());

        let mut raw = frame("ignored", 1.0);
        raw.metadata.remove(CALSTEPS_KEY);
        write_raw(&run, "b.frame", &raw);
        write_raw(&run, "a.frame", &frame("ignored", 2.0));

        let mut loader = ImageLoader::new("raw", Arc::new(BinFrameCodec));
        let output = load(&run, &mut loader, ErrorPolicy::FailFast);

        assert!(output.errors.is_empty());
        assert_eq!(output.batches.len(), 2);
        assert_eq!(names(&output.batches[0]), vec!["a.frame"]);
        assert_eq!(names(&output.batches[1]), vec!["b.frame"]);

        let meta = &output.batches[1].frames()[0].metadata;
        assert_eq!(meta.get_str(CALSTEPS_KEY), Some(""));
        assert!(meta
            .get_str(RAW_IMAGE_PATH_KEY)
            .unwrap()
            .ends_with("raw/b.frame"));
    }

    #[test]
    fn test_single_mode_returns_one_batch() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new("winter", "20230601", dir.path());
        for name in ["a.frame", "b.frame", "c.frame"] {
            write_raw(&run, name, &frame(name, 0.0));
        }

        let mut loader =
            ImageLoader::new("raw", Arc::new(BinFrameCodec)).with_mode(LoadMode::Single);
        let output = load(&run, &mut loader, ErrorPolicy::FailFast);

        assert_eq!(output.batches.len(), 1);
        assert_eq!(output.batches[0].len(), 3);
    }

    #[test]
    fn test_missing_core_field_reports_item_and_skips_it() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new("winter", "20230601", dir.path());

        let mut incomplete = frame("x", 0.0);
        let fields: Metadata = incomplete
            .metadata
            .iter()
            .filter(|(key, _)| *key != TARGET_KEY)
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect();
        incomplete.metadata = fields;

        write_raw(&run, "a.frame", &frame("a", 0.0));
        write_raw(&run, "b.frame", &incomplete);
        write_raw(&run, "c.frame", &frame("c", 0.0));

        let mut loader = ImageLoader::new("raw", Arc::new(BinFrameCodec));
        let output = load(&run, &mut loader, ErrorPolicy::ContinueOnError);

        assert_eq!(output.batches.len(), 2);
        assert_eq!(output.errors.len(), 1);
        let report = &output.errors.reports()[0];
        assert_eq!(report.batch_index, 1);
        assert_eq!(report.error_type(), "MissingFieldError");
        assert!(matches!(
            &report.error,
            Error::MissingField { field, .. } if field == TARGET_KEY
        ));
    }

    #[test]
    fn test_missing_input_dir_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new("winter", "20230601", dir.path());
        let mut loader = ImageLoader::new("raw", Arc::new(BinFrameCodec));

        let output = load(&run, &mut loader, ErrorPolicy::FailFast);
        assert!(output.batches.is_empty());
        assert!(output.errors.is_empty());
    }

    #[test]
    fn test_params_defaults() {
        let params: LoaderParams = serde_yml::from_str("{}").unwrap();
        assert_eq!(params.input_sub_dir, "raw");
        assert_eq!(params.mode, LoadMode::PerItem);

        let params: LoaderParams =
            serde_yml::from_str("{ input_sub_dir: reduced, mode: single }").unwrap();
        assert_eq!(params.mode, LoadMode::Single);
    }
}
