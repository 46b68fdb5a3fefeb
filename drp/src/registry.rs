//! Explicit table of constructible processor types.

use std::sync::Arc;

use hashbrown::HashMap;
use serde::de::DeserializeOwned;

use crate::calibration::{CacheCalibrator, DarkKind, DarkParams, FlatKind, FlatParams};
use crate::error::{Error, Result};
use crate::io::{BinFrameCodec, DirectoryHistory, FrameCodec, HistorySource};
use crate::processor::{Processor, RunContext};
use crate::processors::batching::BatcherParams;
use crate::processors::csv_log::CsvLogParams;
use crate::processors::load::LoaderParams;
use crate::processors::save::SaverParams;
use crate::processors::select::SelectorParams;
use crate::processors::{
    CsvLog, FrameSaver, ImageBatcher, ImageDebatcher, ImageLoader, ImageSelector,
};

/// Sub directory of every night scanned for calibration history by default.
pub const DEFAULT_HISTORY_SUB_DIR: &str = "raw";

/// Shared resources handed to processor constructors.
#[derive(Clone)]
pub struct BuildContext {
    pub run: RunContext,
    pub codec: Arc<dyn FrameCodec>,
    pub history: Arc<dyn HistorySource>,
}

impl BuildContext {
    /// Uses `.frame` files and reads history from the `raw` directory of
    /// every night of the pipeline.
    pub fn new(run: RunContext) -> Self {
        Self::with_codec(run, Arc::new(BinFrameCodec))
    }

    pub fn with_codec(run: RunContext, codec: Arc<dyn FrameCodec>) -> Self {
        let history = Arc::new(DirectoryHistory::new(
            run.output_root.join(&run.pipeline_name),
            DEFAULT_HISTORY_SUB_DIR,
            codec.clone(),
        ));
        Self {
            run,
            codec,
            history,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistorySource>) -> Self {
        self.history = history;
        self
    }
}

pub type Constructor =
    Box<dyn Fn(&serde_yml::Value, &BuildContext) -> Result<Box<dyn Processor>>>;

/// Deserializes constructor parameters, naming the processor type on failure.
pub fn parse_params<T: DeserializeOwned>(processor: &str, params: &serde_yml::Value) -> Result<T> {
    let params = match params {
        serde_yml::Value::Null => serde_yml::Value::Mapping(serde_yml::Mapping::new()),
        other => other.clone(),
    };
    serde_yml::from_value(params).map_err(|source| Error::InvalidParameters {
        processor: processor.to_string(),
        source,
    })
}

#[derive(Default)]
pub struct ProcessorRegistry {
    constructors: HashMap<String, Constructor>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.insert(ImageLoader::NAME, |params, ctx| {
            let params: LoaderParams = parse_params(ImageLoader::NAME, params)?;
            Ok(Box::new(ImageLoader::from_params(params, ctx.codec.clone())))
        });
        registry.insert(ImageSelector::NAME, |params, _ctx| {
            let params: SelectorParams = parse_params(ImageSelector::NAME, params)?;
            Ok(Box::new(ImageSelector::from_params(params)))
        });
        registry.insert(ImageBatcher::NAME, |params, _ctx| {
            let params: BatcherParams = parse_params(ImageBatcher::NAME, params)?;
            Ok(Box::new(ImageBatcher::from_params(params)))
        });
        registry.insert(ImageDebatcher::NAME, |_params, _ctx| {
            Ok(Box::new(ImageDebatcher))
        });
        registry.insert("flat", |params, ctx| {
            let params: FlatParams = parse_params("flat", params)?;
            let calibrator = CacheCalibrator::new(
                FlatKind::new(params.region()),
                ctx.history.clone(),
                ctx.codec.clone(),
            )
            .with_cache_sub_dir(params.cache_sub_dir)
            .with_nan_threshold(params.nan_threshold);
            Ok(Box::new(calibrator))
        });
        registry.insert("dark", |params, ctx| {
            let params: DarkParams = parse_params("dark", params)?;
            let calibrator =
                CacheCalibrator::new(DarkKind::default(), ctx.history.clone(), ctx.codec.clone())
                    .with_cache_sub_dir(params.cache_sub_dir)
                    .with_nan_threshold(params.nan_threshold);
            Ok(Box::new(calibrator))
        });
        registry.insert(FrameSaver::NAME, |params, ctx| {
            let params: SaverParams = parse_params(FrameSaver::NAME, params)?;
            Ok(Box::new(FrameSaver::from_params(params, ctx.codec.clone())))
        });
        registry.insert(CsvLog::NAME, |params, _ctx| {
            let params: CsvLogParams = parse_params(CsvLog::NAME, params)?;
            Ok(Box::new(CsvLog::from_params(params)))
        });
        registry
    }

    fn insert<F>(&mut self, processor_type: &str, constructor: F)
    where
        F: Fn(&serde_yml::Value, &BuildContext) -> Result<Box<dyn Processor>> + 'static,
    {
        self.constructors
            .insert(processor_type.to_string(), Box::new(constructor));
    }

    /// Adds a constructor. Type ids must be unique.
    pub fn register<F>(&mut self, processor_type: &str, constructor: F) -> Result<()>
    where
        F: Fn(&serde_yml::Value, &BuildContext) -> Result<Box<dyn Processor>> + 'static,
    {
        if self.constructors.contains_key(processor_type) {
            return Err(Error::DuplicateRegistration(processor_type.to_string()));
        }
        self.insert(processor_type, constructor);
        Ok(())
    }

    pub fn contains(&self, processor_type: &str) -> bool {
        self.constructors.contains_key(processor_type)
    }

    /// Registered type ids, sorted.
    pub fn processor_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn build(
        &self,
        processor_type: &str,
        params: &serde_yml::Value,
        ctx: &BuildContext,
    ) -> Result<Box<dyn Processor>> {
        let constructor = self
            .constructors
            .get(processor_type)
            .ok_or_else(|| Error::UnknownProcessor(processor_type.to_string()))?;
        constructor(params, ctx)
    }
}
