//! Processors built from closures, for tools living outside the engine.

use crate::batch::Batch;
use crate::error::Result;
use crate::image::Image;
use crate::metadata::Metadata;
use crate::processor::{Capability, Processor, StepContext};

pub type ExternalFn =
    Box<dyn FnMut(Vec<Image>, Vec<Metadata>) -> anyhow::Result<(Vec<Image>, Vec<Metadata>)>>;

pub type FrameFn = Box<dyn Fn(&Image, &Metadata) -> anyhow::Result<Image>>;

/// Hands the whole batch to an external routine, e.g. an astrometric solver.
///
/// The routine may change frame count, but must return as many images as
/// metadata records.
pub struct ExternalStep {
    name: String,
    provides: Vec<Capability>,
    requires: Vec<Capability>,
    func: ExternalFn,
}

impl ExternalStep {
    pub fn new(name: impl Into<String>, func: ExternalFn) -> Self {
        Self {
            name: name.into(),
            provides: Vec::new(),
            requires: Vec::new(),
            func,
        }
    }

    pub fn providing(mut self, capability: impl Into<String>) -> Self {
        self.provides.push(Capability::new(capability));
        self
    }

    pub fn requiring(mut self, capability: impl Into<String>) -> Self {
        self.requires.push(Capability::new(capability));
        self
    }
}

impl Processor for ExternalStep {
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
        let (images, metadata) = batch.into_parts();
        let (images, metadata) = (self.func)(images, metadata)?;
        Batch::from_parts(images, metadata)
    }

    fn replay(&mut self, batch: Batch, ctx: &mut StepContext<'_>) -> Result<Batch> {
        self.apply_to_batch(batch, ctx)
    }
}

/// Replaces every image with the closure's output and records the step name
/// in `CALSTEPS`.
pub struct MapFrames {
    name: String,
    func: FrameFn,
}

impl MapFrames {
    pub fn new(name: impl Into<String>, func: FrameFn) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl Processor for MapFrames {
    fn name(&self) -> &str {
        &self.name
    }

    fn provides(&self) -> Vec<Capability> {
        vec![Capability::new(self.name.as_str())]
    }

    fn apply_to_batch(&mut self, mut batch: Batch, _ctx: &mut StepContext<'_>) -> Result<Batch> {
        for frame in batch.frames_mut() {
            frame.image = (self.func)(&frame.image, &frame.metadata)?;
            frame.metadata.append_step(&self.name);
        }
        Ok(batch)
    }

    fn replay(&mut self, batch: Batch, ctx: &mut StepContext<'_>) -> Result<Batch> {
        self.apply_to_batch(batch, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::processor::{ErrorPolicy, RunContext, Step};
    use crate::testing::frame;

    fn run_step(processor: impl Processor + 'static, batch: Batch) -> crate::processor::StepOutput {
        let mut step = Step::new(Box::new(processor));
        let run = RunContext::new("p", "n", "/tmp");
        step.base_apply(vec![batch], &mut [], &run, ErrorPolicy::ContinueOnError)
    }

    #[test]
    fn test_external_step_declares_capabilities() {
        let step = ExternalStep::new(
            "anet",
            Box::new(|images: Vec<Image>, metadata: Vec<Metadata>| Ok((images, metadata))),
        )
        .providing("astrometry")
        .requiring("flat");
        assert_eq!(step.provides(), vec![Capability::new("astrometry")]);
        assert_eq!(step.requires(), vec![Capability::new("flat")]);
    }

    #[test]
    fn test_external_step_rejects_length_mismatch() {
        let step = ExternalStep::new(
            "broken",
            Box::new(|images: Vec<Image>, _metadata: Vec<Metadata>| Ok((images, Vec::new()))),
        );
        let batch = Batch::new(vec![frame("a", 1.0)]);
        let output = run_step(step, batch.clone());

        assert_eq!(output.batches, vec![batch]);
        assert!(matches!(
            output.errors.reports()[0].error,
            Error::LengthMismatch {
                images: 1,
                metadata: 0
            }
        ));
    }

    #[test]
    fn test_external_step_may_drop_frames() {
        let step = ExternalStep::new(
            "reject",
            Box::new(|mut images: Vec<Image>, mut metadata: Vec<Metadata>| {
                images.truncate(1);
                metadata.truncate(1);
                Ok((images, metadata))
            }),
        );
        let output = run_step(step, Batch::new(vec![frame("a", 1.0), frame("b", 2.0)]));
        assert!(output.errors.is_empty());
        assert_eq!(output.batches[0].len(), 1);
    }

    #[test]
    fn test_map_frames_records_step() {
        let step = MapFrames::new(
            "scale",
            Box::new(|image: &Image, _: &Metadata| Ok(image.map(|v| v * 2.0))),
        );
        let output = run_step(step, Batch::new(vec![frame("a", 1.5)]));

        let frame = &output.batches[0].frames()[0];
        assert_eq!(frame.image.pixels()[0], 3.0);
        assert_eq!(frame.metadata.steps(), vec!["scale"]);
    }
}
