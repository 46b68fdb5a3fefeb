//! Calibration steps backed by on-disk master artifacts.
//!
//! A calibrator looks up the artifact matching each frame's key fields and
//! builds missing ones from history, replaying the candidates through every
//! preceding step so they receive the same corrections as the science frames.

mod combine;
mod kinds;


use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;

pub use combine::median_combine;
pub use kinds::{CalibrationKind, DarkKind, DarkParams, FlatKind, FlatParams, Region};

use crate::batch::{Batch, BatchList, Frame};
use crate::error::{Error, Result};
use crate::error_stack::{ErrorReport, ErrorStack};
use crate::image::Image;
use crate::io::{FrameCodec, HistoryEntry, HistorySource};
use crate::metadata::{Metadata, Value, OBSTYPE_KEY};
use crate::processor::{Capability, ErrorPolicy, Processor, RunContext, StepContext, StepOutput};

/// Picks the history entries used to build artifacts.
pub type CandidateSelector = Arc<dyn Fn(&[HistoryEntry]) -> Vec<HistoryEntry>>;

/// Number of candidates combined into an artifact.
pub const NCOMBINE_KEY: &str = "NCOMBINE";

pub const DEFAULT_CACHE_SUB_DIR: &str = "calibration";

/// Selects entries whose `OBSTYPE` equals `category`, ignoring case.
pub fn select_by_category(category: impl Into<String>) -> CandidateSelector {
    let category = category.into();
    Arc::new(move |entries: &[HistoryEntry]| {
        entries
            .iter()
            .filter(|entry| {
                entry
                    .metadata
                    .get_str(OBSTYPE_KEY)
                    .is_some_and(|obstype| obstype.eq_ignore_ascii_case(&category))
            })
            .cloned()
            .collect()
    })
}

/// `<cache_dir>/<base_name>_<v1>_<v2>....<extension>`.
///
/// Values are rendered as text with whitespace and path separators replaced
/// by `_`, so `Int(30)` and `Float(30.0)` name the same artifact.
pub fn cache_path<K: CalibrationKind + ?Sized>(
    kind: &K,
    cache_dir: &Path,
    metadata: &Metadata,
    extension: &str,
) -> Result<PathBuf> {
    let mut name = kind.base_name().to_string();
    for key in kind.key_fields() {
        let value = metadata.require(key)?;
        name.push('_');
        name.push_str(&file_token(value));
    }
    Ok(cache_dir.join(format!("{name}.{extension}")))
}

fn file_token(value: &Value) -> String {
    value
        .to_string()
        .chars()
        .map(|c| {
            if c.is_whitespace() || c == '/' || c == '\\' {
                '_'
            } else {
                c
            }
        })
        .collect()
}

pub struct CacheCalibrator<K> {
    kind: K,
    cache_sub_dir: PathBuf,
    nan_threshold: Option<f32>,
    selector: CandidateSelector,
    history: Arc<dyn HistorySource>,
    codec: Arc<dyn FrameCodec>,
    // masked masters already read during this run, by artifact path
    resident: HashMap<PathBuf, Image>,
    // artifacts whose build failed, with the reason
    build_failures: HashMap<PathBuf, String>,
    built: bool,
}

pub type FlatCalibrator = CacheCalibrator<FlatKind>;
pub type DarkCalibrator = CacheCalibrator<DarkKind>;

impl<K: CalibrationKind> CacheCalibrator<K> {
    pub fn new(kind: K, history: Arc<dyn HistorySource>, codec: Arc<dyn FrameCodec>) -> Self {
        let selector = select_by_category(kind.category());
        Self {
            kind,
            cache_sub_dir: PathBuf::from(DEFAULT_CACHE_SUB_DIR),
            nan_threshold: None,
            selector,
            history,
            codec,
            resident: HashMap::new(),
            build_failures: HashMap::new(),
            built: false,
        }
    }

    pub fn with_cache_sub_dir(mut self, cache_sub_dir: impl Into<PathBuf>) -> Self {
        self.cache_sub_dir = cache_sub_dir.into();
        self
    }

    /// Master pixels below `threshold` become NaN before correction.
    pub fn with_nan_threshold(mut self, threshold: Option<f32>) -> Self {
        self.nan_threshold = threshold;
        self
    }

    pub fn with_selector(mut self, selector: CandidateSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn kind(&self) -> &K {
        &self.kind
    }

    pub fn cache_dir(&self, run: &RunContext) -> PathBuf {
        run.output_dir(&self.cache_sub_dir)
    }

    pub fn cache_path(&self, run: &RunContext, metadata: &Metadata) -> Result<PathBuf> {
        cache_path(
            &self.kind,
            &self.cache_dir(run),
            metadata,
            self.codec.extension(),
        )
    }

    /// Builds every artifact the selected history supports and returns the
    /// written paths.
    ///
    /// Each artifact is built on its own. Candidates that lack a key field,
    /// cannot be loaded or fail preparation are skipped; an artifact left
    /// without usable candidates is remembered as a build failure.
    pub fn make_cache_files(&mut self, ctx: &mut StepContext<'_>) -> Result<Vec<PathBuf>> {
        let entries = self.history.entries()?;
        let candidates = (self.selector)(&entries);
        self.built = true;
        tracing::info!(
            "Found {} {} candidates in {} history entries",
            candidates.len(),
            self.kind.category(),
            entries.len()
        );

        let cache_dir = self.cache_dir(ctx.run);
        let mut written = Vec::new();

        for (path, group) in self.group_candidates(candidates, &cache_dir) {
            match self.build_artifact(&path, &group, ctx) {
                Ok(()) => {
                    self.build_failures.remove(&path);
                    written.push(path);
                }
                Err(error) => {
                    let reason = format!("{error:#}");
                    tracing::warn!("Failed to build {}: {}", path.display(), reason);
                    self.build_failures.insert(path, reason);
                }
            }
        }

        Ok(written)
    }

    /// Partitions candidates by artifact path in first-encounter order.
    fn group_candidates(
        &self,
        candidates: Vec<HistoryEntry>,
        cache_dir: &Path,
    ) -> Vec<(PathBuf, Vec<HistoryEntry>)> {
        let mut index: HashMap<PathBuf, usize> = HashMap::new();
        let mut groups: Vec<(PathBuf, Vec<HistoryEntry>)> = Vec::new();

        for entry in candidates {
            let path = match cache_path(
                &self.kind,
                cache_dir,
                &entry.metadata,
                self.codec.extension(),
            ) {
                Ok(path) => path,
                Err(error) => {
                    tracing::warn!(
                        "Skipping {} candidate {}: {}",
                        self.kind.category(),
                        entry.path.display(),
                        error
                    );
                    continue;
                }
            };
            let slot = *index.entry(path.clone()).or_insert_with(|| {
                groups.push((path, Vec::new()));
                groups.len() - 1
            });
            groups[slot].1.push(entry);
        }

        groups
    }

    fn build_artifact(
        &self,
        path: &Path,
        group: &[HistoryEntry],
        ctx: &mut StepContext<'_>,
    ) -> Result<()> {
        let mut images = Vec::with_capacity(group.len());
        for entry in group {
            match self.load_candidate(entry, ctx) {
                Ok(image) => images.push(image),
                Err(error) => tracing::warn!(
                    "Skipping {} candidate {}: {:#}",
                    self.kind.category(),
                    entry.path.display(),
                    error
                ),
            }
        }
        let Some(first) = group.first() else {
            return Ok(());
        };
        if images.is_empty() {
            return Err(anyhow::anyhow!(
                "none of the {} {} candidates could be used",
                group.len(),
                self.kind.category()
            )
            .into());
        }

        tracing::info!("Median combining {} {} frames", images.len(), self.kind.category());
        let master = median_combine(&images)?;

        let metadata = self.artifact_metadata(&first.metadata, images.len());
        tracing::info!(
            "Saving '{}' to {}",
            self.kind.base_name(),
            path.display()
        );
        self.codec.save(&Frame::new(master, metadata), path)
    }

    /// Loads one candidate and gives it the corrections of the preceding steps.
    fn load_candidate(&self, entry: &HistoryEntry, ctx: &mut StepContext<'_>) -> Result<Image> {
        let frame = self.history.load(entry)?;
        let replayed = ctx.replay_through_preceding(Batch::new(vec![frame]))?;
        let frame = replayed
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("candidate was dropped by a preceding step"))?;
        self.kind.prepare_candidate(frame.image)
    }

    fn artifact_metadata(&self, key_metadata: &Metadata, count: usize) -> Metadata {
        let mut metadata = Metadata::new()
            .with(OBSTYPE_KEY, self.kind.base_name())
            .with(NCOMBINE_KEY, count as i64);
        for key in self.kind.key_fields() {
            if let Some(value) = key_metadata.get(key) {
                metadata.set(key.as_str(), value.clone());
            }
        }
        metadata
    }

    fn mask(&self, image: Image) -> Image {
        match self.nan_threshold {
            Some(threshold) => image.map(|v| if v < threshold { f32::NAN } else { v }),
            None => image,
        }
    }

    /// Resident artifact, else the one on disk, else builds artifacts once.
    fn master_for(&mut self, path: &Path, ctx: &mut StepContext<'_>) -> Result<Image> {
        if let Some(master) = self.resident.get(path) {
            return Ok(master.clone());
        }

        if !path.exists() && !self.built {
            self.make_cache_files(ctx)?;
        }
        if !path.exists() {
            if let Some(reason) = self.build_failures.get(path) {
                return Err(Error::CacheBuild {
                    path: path.to_path_buf(),
                    reason: reason.clone(),
                });
            }
            return Err(Error::CacheMiss {
                category: self.kind.category().to_string(),
                path: path.to_path_buf(),
            });
        }

        let artifact = self.codec.load(path)?;
        let master = self.mask(artifact.image);
        self.resident.insert(path.to_path_buf(), master.clone());
        Ok(master)
    }

    fn correct(&mut self, mut frame: Frame, path: &Path, ctx: &mut StepContext<'_>) -> Result<Frame> {
        let master = self.master_for(path, ctx)?;
        frame.image = self.kind.correct(&frame.image, &master)?;
        frame.metadata.append_step(self.kind.step_marker());
        Ok(frame)
    }

    /// Corrects every frame it can. Frames whose artifact is unavailable stay
    /// uncorrected; one error is returned per failing artifact. With
    /// `FailFast` the frames after the first failure are left untouched.
    fn correct_batch(
        &mut self,
        batch: Batch,
        ctx: &mut StepContext<'_>,
        policy: ErrorPolicy,
    ) -> (Batch, Vec<Error>) {
        let mut failures = Vec::new();
        let mut failed_paths: Vec<PathBuf> = Vec::new();
        let mut output = Batch::empty();
        let mut frames = batch.into_iter();

        for frame in frames.by_ref() {
            let result = match self.cache_path(ctx.run, &frame.metadata) {
                Ok(path) if failed_paths.contains(&path) => {
                    output.push(frame);
                    continue;
                }
                Ok(path) => self.correct(frame.clone(), &path, ctx).map_err(|error| {
                    failed_paths.push(path);
                    error
                }),
                Err(error) => Err(error),
            };

            match result {
                Ok(corrected) => output.push(corrected),
                Err(error) => {
                    failures.push(error);
                    output.push(frame);
                    if policy == ErrorPolicy::FailFast {
                        break;
                    }
                }
            }
        }

        output.extend(frames);
        (output, failures)
    }
}

impl<K: CalibrationKind> Processor for CacheCalibrator<K> {
    fn name(&self) -> &str {
        self.kind.step_marker()
    }

    fn provides(&self) -> Vec<Capability> {
        vec![Capability::new(self.kind.step_marker())]
    }

    fn apply_to_batch(&mut self, batch: Batch, ctx: &mut StepContext<'_>) -> Result<Batch> {
        let mut output = Batch::empty();
        for frame in batch {
            let path = self.cache_path(ctx.run, &frame.metadata)?;
            output.push(self.correct(frame, &path, ctx)?);
        }
        Ok(output)
    }

    fn apply(
        &mut self,
        batches: BatchList,
        ctx: &mut StepContext<'_>,
        policy: ErrorPolicy,
    ) -> StepOutput {
        let mut errors = ErrorStack::new();
        let mut output = Vec::with_capacity(batches.len());
        let mut remaining = batches.into_iter().enumerate();

        for (batch_index, batch) in remaining.by_ref() {
            let (corrected, failures) = self.correct_batch(batch, ctx, policy);
            let failed = !failures.is_empty();
            for error in failures {
                errors.push(ErrorReport::new(self.kind.step_marker(), batch_index, error));
            }
            output.push(corrected);
            if failed && policy == ErrorPolicy::FailFast {
                break;
            }
        }

        output.extend(remaining.map(|(_, batch)| batch));

        StepOutput {
            batches: output,
            errors,
        }
    }

    fn replay(&mut self, batch: Batch, ctx: &mut StepContext<'_>) -> Result<Batch> {
        self.apply_to_batch(batch, ctx)
    }
}
