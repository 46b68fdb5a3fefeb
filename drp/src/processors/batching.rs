//! Regrouping of frames across batches.

use std::fmt;

use hashbrown::HashMap;
use serde::Deserialize;

use crate::batch::{Batch, BatchList};
use crate::metadata::{Metadata, Value};
use crate::processor::{ErrorPolicy, Processor, StepContext, StepOutput};

/// One component of a group key. Records lacking the key all share `Unset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupValue {
    Set(Value),
    Unset,
}

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupValue::Set(value) => write!(f, "{}", value),
            GroupValue::Unset => f.write_str("Unset"),
        }
    }
}

pub fn group_key(metadata: &Metadata, keys: &[String]) -> Vec<GroupValue> {
    keys.iter()
        .map(|key| match metadata.get(key) {
            Some(value) => GroupValue::Set(value.clone()),
            None => GroupValue::Unset,
        })
        .collect()
}

/// Concatenates every batch into one, keeping relative order.
pub fn debatch(mut batches: BatchList) -> Batch {
    if batches.len() == 1 {
        return batches.pop().unwrap_or_default();
    }
    batches.into_iter().flatten().collect()
}

/// Flattens the list and partitions it by the values of `keys`.
///
/// Groups appear in the order their first frame is encountered, and frames
/// keep their relative order within a group. No frames yields no batches.
pub fn batch_by_keys(batches: BatchList, keys: &[String]) -> BatchList {
    let mut index: HashMap<Vec<GroupValue>, usize> = HashMap::new();
    let mut groups: BatchList = Vec::new();

    for frame in debatch(batches) {
        let key = group_key(&frame.metadata, keys);
        let slot = *index.entry(key).or_insert_with(|| {
            groups.push(Batch::empty());
            groups.len() - 1
        });
        groups[slot].push(frame);
    }

    groups
}

/// Merges the whole list into a single batch.
#[derive(Debug, Default)]
pub struct ImageDebatcher;

impl ImageDebatcher {
    pub const NAME: &'static str = "debatch";
}

impl Processor for ImageDebatcher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(
        &mut self,
        batches: BatchList,
        _ctx: &mut StepContext<'_>,
        _policy: ErrorPolicy,
    ) -> StepOutput {
        StepOutput {
            batches: vec![debatch(batches)],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatcherParams {
    pub keys: Vec<String>,
}

/// Regroups frames so each batch shares the values of `keys`.
#[derive(Debug)]
pub struct ImageBatcher {
    keys: Vec<String>,
}

impl ImageBatcher {
    pub const NAME: &'static str = "batch";

    pub fn new(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_params(params: BatcherParams) -> Self {
        Self { keys: params.keys }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }
}

impl Processor for ImageBatcher {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn apply(
        &mut self,
        batches: BatchList,
        _ctx: &mut StepContext<'_>,
        _policy: ErrorPolicy,
    ) -> StepOutput {
        let batches = batch_by_keys(batches, &self.keys);
        tracing::debug!(keys = ?self.keys, groups = batches.len(), "Regrouped frames");
        StepOutput {
            batches,
            ..Default::default()
        }
    }
}
