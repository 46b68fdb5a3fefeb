use std::collections::BTreeMap;

use serde::Deserialize;

use crate::batch::Batch;
use crate::error::Result;
use crate::metadata::{Metadata, Value};
use crate::processor::{Processor, StepContext};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SelectorParams {
    /// Key to accepted values. YAML scalars are compared by their rendering.
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<serde_yml::Value>>,
}

/// Keeps frames whose metadata matches every filter.
///
/// Within one key any listed value is accepted. Values are compared by their
/// rendered text, case-sensitively; a record without the key never matches.
#[derive(Debug, Clone)]
pub struct ImageSelector {
    filters: Vec<(String, Vec<String>)>,
}

impl ImageSelector {
    pub const NAME: &'static str = "select";

    pub fn new<K, V>(filters: impl IntoIterator<Item = (K, Vec<V>)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let filters = filters
            .into_iter()
            .map(|(key, values)| {
                let accepted = values
                    .into_iter()
                    .map(|value| value.into().to_string())
                    .collect();
                (key.into(), accepted)
            })
            .collect();
        Self { filters }
    }

    pub fn from_params(params: SelectorParams) -> Self {
        let filters = params
            .filters
            .into_iter()
            .map(|(key, values)| {
                let accepted = values.iter().filter_map(render_yaml_scalar).collect();
                (key, accepted)
            })
            .collect();
        Self { filters }
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.filters.iter().all(|(key, accepted)| {
            metadata
                .render(key)
                .is_some_and(|value| accepted.contains(&value))
        })
    }
}

fn render_yaml_scalar(value: &serde_yml::Value) -> Option<String> {
    Value::from_yaml(value).map(|value| value.to_string())
}

impl Processor for ImageSelector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply_to_batch(&mut self, mut batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        let before = batch.len();
        batch.retain(|frame| self.matches(&frame.metadata));
        tracing::debug!("Selected {} of {} frames", batch.len(), before);
        Ok(batch)
    }
}
