//! Sequential evaluation loops: one batch (or one image, in variance mode) is
//! fully processed before the next is pulled from the dataset.

use std::fs;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ndarray::{Array4, Axis};
use serde::Serialize;
use tracing::{debug, info};

use crate::artifacts::ArtifactWriter;
use crate::error::{EditError, Result};
use crate::extractor::gather_selected_frames;
use crate::observer::SampleObserver;
use crate::policy::{Policy, TrajectoryRunner};
use crate::selector::select_terminal_steps;
use crate::stats::RunningStat;
use crate::types::{Sample, SampleOutcome};
use crate::variance::VarianceEstimator;
use crate::vocab::Vocabulary;

pub const SUMMARY_FILE_NAME: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub end_id: i64,
    pub batch_size: usize,
    pub print_every: usize,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Inference,
    Variance,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub mode: RunMode,
    pub samples: usize,
    pub iterations: u64,
    pub avg_latency_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_init_l1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_l1: Option<f64>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub fn with_distances(mut self, init: &RunningStat, pred: &RunningStat) -> Self {
        self.avg_init_l1 = init.value();
        self.avg_l1 = pred.value();
        self
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_string_pretty(self)
            .map_err(|err| EditError::io("encode", path, err.into()))?;
        fs::write(path, encoded).map_err(|err| EditError::io("write", path, err))
    }
}

pub struct EditPipeline<P> {
    runner: TrajectoryRunner<P>,
    vocab: Vocabulary,
    writer: ArtifactWriter,
    settings: PipelineSettings,
}

impl<P: Policy> EditPipeline<P> {
    pub fn new(
        runner: TrajectoryRunner<P>,
        vocab: Vocabulary,
        writer: ArtifactWriter,
        settings: PipelineSettings,
    ) -> Result<Self> {
        if settings.batch_size == 0 {
            return Err(EditError::config("batch_size must be at least 1"));
        }
        if settings.print_every == 0 {
            return Err(EditError::config("print_every must be at least 1"));
        }
        Ok(Self {
            runner,
            vocab,
            writer,
            settings,
        })
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    /// Run every sample once with its own instruction and write artifacts.
    ///
    /// Artifact directories are numbered by global sample position, so a
    /// batch of `B` fills `B` consecutive indices.
    pub fn run_inference<I>(
        &mut self,
        samples: I,
        total_samples: Option<usize>,
        observer: &mut dyn SampleObserver,
    ) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Sample>>,
    {
        let limit = self.settings.limit.unwrap_or(usize::MAX);
        let total_samples = total_samples.map(|total| total.min(limit));
        let total_iterations =
            total_samples.map(|total| total.div_ceil(self.settings.batch_size));
        let mut samples = samples.into_iter().take(limit);

        let mut latency = RunningStat::new();
        let mut next_index = 0_usize;
        loop {
            let batch = samples
                .by_ref()
                .take(self.settings.batch_size)
                .collect::<Result<Vec<_>>>()?;
            if batch.is_empty() {
                break;
            }

            let started = Instant::now();
            self.process_batch(&batch, next_index, observer)?;
            next_index += batch.len();
            latency.update(started.elapsed().as_secs_f64());

            let iteration = latency.count();
            if iteration % self.settings.print_every as u64 == 0 {
                info!(
                    iteration,
                    total = ?total_iterations,
                    samples = next_index,
                    time = latency.average(),
                    "Inference progress"
                );
            }
        }
        observer.on_finish();

        info!(
            samples = next_index,
            avg_time = latency.average(),
            "Inference finished"
        );
        Ok(RunSummary {
            mode: RunMode::Inference,
            samples: next_index,
            iterations: latency.count(),
            avg_latency_secs: latency.average(),
            avg_variance: None,
            avg_init_l1: None,
            avg_l1: None,
            finished_at: Utc::now(),
        })
    }

    /// For every image, estimate how much the final edit varies over
    /// `prompts` and keep a running average of that variance.
    pub fn run_variance<I>(
        &mut self,
        samples: I,
        total_samples: Option<usize>,
        prompts: &[String],
    ) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<Sample>>,
    {
        if prompts.len() < 2 {
            return Err(EditError::config(format!(
                "variance mode needs at least 2 prompts, got {}",
                prompts.len()
            )));
        }

        let limit = self.settings.limit.unwrap_or(usize::MAX);
        let total_samples = total_samples.map(|total| total.min(limit));
        let estimator = VarianceEstimator::new(&self.vocab, self.settings.end_id);

        let mut variance = RunningStat::new();
        let mut latency = RunningStat::new();
        for sample in samples.into_iter().take(limit) {
            let sample = sample?;
            let started = Instant::now();
            let value = estimator.estimate(&mut self.runner, sample.image.view(), prompts)?;
            variance.update(value);
            latency.update(started.elapsed().as_secs_f64());

            let iteration = variance.count();
            debug!(iteration, variance = value, "Variance sample");
            if iteration % self.settings.print_every as u64 == 0 {
                info!(
                    iteration,
                    total = ?total_samples,
                    var = variance.average(),
                    time = latency.average(),
                    "Variance progress"
                );
            }
        }

        info!(avg_var = variance.average(), "Variance finished");
        Ok(RunSummary {
            mode: RunMode::Variance,
            samples: variance.count() as usize,
            iterations: variance.count(),
            avg_latency_secs: latency.average(),
            avg_variance: Some(variance.average()),
            avg_init_l1: None,
            avg_l1: None,
            finished_at: Utc::now(),
        })
    }

    fn process_batch(
        &mut self,
        batch: &[Sample],
        first_index: usize,
        observer: &mut dyn SampleObserver,
    ) -> Result<()> {
        let images = stack_images(batch)?;
        let instructions: Vec<&str> = batch
            .iter()
            .map(|sample| sample.instruction.as_str())
            .collect();
        let ids = self
            .vocab
            .encode_batch(&instructions, self.runner.max_tokens());

        let trajectory = self.runner.run(ids.view(), images.view())?;
        let selected = select_terminal_steps(trajectory.action_codes.view(), self.settings.end_id);
        let finals = gather_selected_frames(trajectory.frames.view(), &selected)?;

        for (offset, sample) in batch.iter().enumerate() {
            let index = first_index + offset;
            let prediction = finals.index_axis(Axis(0), offset);
            self.writer.write(index, sample.image.view(), prediction)?;

            observer.on_sample(&SampleOutcome {
                index,
                input: sample.image.view(),
                prediction,
                target: sample.target.as_ref().map(|target| target.view()),
                selected_step: selected[offset],
                action_codes: trajectory.action_codes.index_axis(Axis(0), offset),
            })?;
            debug!(index, selected_step = selected[offset], "Sample finalized");
        }
        Ok(())
    }
}

fn stack_images(batch: &[Sample]) -> Result<Array4<f32>> {
    let (channels, height, width) = batch[0].image.dim();
    let mut images = Array4::<f32>::zeros((batch.len(), channels, height, width));
    for (mut slot, sample) in images.axis_iter_mut(Axis(0)).zip(batch) {
        if sample.image.dim() != (channels, height, width) {
            return Err(EditError::config(format!(
                "batched images must share a shape: {:?} vs {:?}",
                sample.image.dim(),
                (channels, height, width)
            )));
        }
        slot.assign(&sample.image);
    }
    Ok(images)
}
