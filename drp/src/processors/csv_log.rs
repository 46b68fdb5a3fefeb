use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::batch::{Batch, BatchList};
use crate::error::{Error, Result};
use crate::error_stack::{ErrorReport, ErrorStack};
use crate::processor::{ErrorPolicy, Processor, StepContext, StepOutput};

fn default_output_name() -> String {
    "log.csv".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsvLogParams {
    pub export_keys: Vec<String>,
    #[serde(default = "default_output_name")]
    pub output_name: String,
}

/// Writes one CSV row per frame across every batch to
/// `<night dir>/<output_name>`. Absent keys become empty cells.
#[derive(Debug, Clone)]
pub struct CsvLog {
    export_keys: Vec<String>,
    output_name: PathBuf,
}

impl CsvLog {
    pub const NAME: &'static str = "csv_log";

    pub fn new(
        export_keys: impl IntoIterator<Item = impl Into<String>>,
        output_name: impl Into<PathBuf>,
    ) -> Self {
        Self {
            export_keys: export_keys.into_iter().map(Into::into).collect(),
            output_name: output_name.into(),
        }
    }

    pub fn from_params(params: CsvLogParams) -> Self {
        Self::new(params.export_keys, params.output_name)
    }

    pub fn write(&self, batches: &[Batch], path: &Path) -> Result<usize> {
        common::file_utils::ensure_parent_dir(path).map_err(|e| Error::io(path, e))?;

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        writer
            .write_record(&self.export_keys)
            .context("Failed to write CSV header")?;

        let mut rows = 0;
        for metadata in batches.iter().flat_map(Batch::metadata) {
            let row: Vec<String> = self
                .export_keys
                .iter()
                .map(|key| metadata.render(key).unwrap_or_default())
                .collect();
            writer.write_record(&row).context("Failed to write CSV row")?;
            rows += 1;
        }

        writer.flush().map_err(|e| Error::io(path, e))?;
        Ok(rows)
    }
}

impl Processor for CsvLog {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(
        &mut self,
        batches: BatchList,
        ctx: &mut StepContext<'_>,
        _policy: ErrorPolicy,
    ) -> StepOutput {
        let path = ctx.run.night_dir().join(&self.output_name);
        let mut errors = ErrorStack::new();

        match self.write(&batches, &path) {
            Ok(rows) => tracing::info!("Exported {} rows to {}", rows, path.display()),
            Err(error) => errors.push(ErrorReport::new(Self::NAME, 0, error)),
        }

        StepOutput { batches, errors }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{FILTER_KEY, UTCTIME_KEY};
    use crate::processor::RunContext;
    use crate::testing::{frame, frame_with};

    #[test]
    fn test_missing_keys_render_as_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunContext::new("winter", "20230601", dir.path());
        let mut ctx = StepContext {
            preceding: &mut [],
            run: &run,
        };

        let batches = vec![
            Batch::new(vec![frame_with("a", 0.0, [(FILTER_KEY, "J")])]),
            Batch::empty(),
            Batch::new(vec![frame("b", 0.0)]),
        ];
        let mut log = CsvLog::new([FILTER_KEY, UTCTIME_KEY], "log.csv");
        let output = log.apply(batches.clone(), &mut ctx, ErrorPolicy::FailFast);

        assert!(output.errors.is_empty());
        assert_eq!(output.batches, batches);

        let text = std::fs::read_to_string(run.night_dir().join("log.csv")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "FILTER,UTCTIME",
                "J,2023-06-01T04:00:00",
                ",2023-06-01T04:00:00"
            ]
        );
    }

    #[test]
    fn test_params_default_output_name() {
        let params: CsvLogParams = serde_yml::from_str("export_keys: [FILTER]").unwrap();
        assert_eq!(CsvLog::from_params(params).output_name, PathBuf::from("log.csv"));
    }
}
