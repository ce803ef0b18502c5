use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::bail;
use image::{Rgb, RgbImage};
use ndarray::{arr2, s, Array2, Array3, Array5, ArrayD, ArrayView2, ArrayView4, Axis, IxDyn};
use tempfile::tempdir;

use t2o_core::archive::archive_concatenated;
use t2o_core::artifacts::{ArtifactWriter, CONCAT_FILE_NAME, INPUT_FILE_NAME, PRED_FILE_NAME};
use t2o_core::dataset::ManifestDataset;
use t2o_core::extractor::gather_selected_frames;
use t2o_core::observer::NoopObserver;
use t2o_core::pipeline::{EditPipeline, PipelineSettings, RunMode, SUMMARY_FILE_NAME};
use t2o_core::policy::{Policy, TrajectoryRunner};
use t2o_core::selector::select_terminal_steps;
use t2o_core::types::{SamplingMode, TrajectoryBatch};
use t2o_core::vocab::Vocabulary;

const END_ID: i64 = 9;

/// Replays fixed action codes; frame `(b, l)` is filled with `b + l / 10`.
struct ReplayPolicy {
    episodes: Vec<Array2<i64>>,
}

impl Policy for ReplayPolicy {
    fn name(&self) -> &str {
        "replay"
    }

    fn episode_forward(
        &mut self,
        _instruction_ids: ArrayView2<'_, i64>,
        images: ArrayView4<'_, f32>,
        _sampling: SamplingMode,
    ) -> anyhow::Result<TrajectoryBatch> {
        if self.episodes.is_empty() {
            bail!("no episodes left");
        }
        let codes = self.episodes.remove(0);
        let (batch, channels, height, width) = images.dim();
        let steps = codes.ncols();
        let mut frames = Array5::<f32>::zeros((batch, steps, channels, height, width));
        for b in 0..batch {
            for l in 0..steps {
                frames
                    .slice_mut(s![b, l, .., .., ..])
                    .fill(b as f32 * 0.5 + l as f32 / 10.0);
            }
        }
        Ok(TrajectoryBatch {
            state: ArrayD::zeros(IxDyn(&[batch])),
            frames,
            action_codes: codes,
            params: Array3::zeros((batch, steps, 2)),
        })
    }
}

fn vocabulary() -> Vocabulary {
    let map: HashMap<String, i64> = [("<pad>", 0), ("<unk>", 1), ("brighter", 2), ("warmer", 3)]
        .into_iter()
        .map(|(token, id)| (token.to_string(), id))
        .collect();
    Vocabulary::from_map(map).expect("vocabulary")
}

fn seed_manifest(dir: &Path) -> std::path::PathBuf {
    RgbImage::from_pixel(8, 8, Rgb([40, 80, 120]))
        .save(dir.join("a.png"))
        .expect("save a");
    RgbImage::from_pixel(8, 8, Rgb([200, 10, 10]))
        .save(dir.join("b.png"))
        .expect("save b");
    let manifest = dir.join("manifest.json");
    fs::write(
        &manifest,
        r#"[
            {"image": "a.png", "instruction": "make it brighter"},
            {"image": "b.png", "instruction": "warmer please"}
        ]"#,
    )
    .expect("write manifest");
    manifest
}

#[test]
fn terminal_frames_follow_first_end_marker() {
    let codes = arr2(&[[3, 3, END_ID, 3, 3], [3, 3, 3, 3, 3]]);
    let selected = select_terminal_steps(codes.view(), END_ID);
    assert_eq!(selected, vec![2, 4]);

    let mut policy = ReplayPolicy {
        episodes: vec![codes],
    };
    let trajectory = policy
        .episode_forward(
            Array2::<i64>::zeros((2, 4)).view(),
            ndarray::Array4::<f32>::zeros((2, 3, 2, 2)).view(),
            SamplingMode::Greedy,
        )
        .expect("episode");
    let finals = gather_selected_frames(trajectory.frames.view(), &selected).expect("gather");

    assert_eq!(finals.dim(), (2, 3, 2, 2));
    assert_eq!(
        finals.index_axis(Axis(0), 0),
        trajectory.frames.slice(s![0, 2, .., .., ..])
    );
    assert_eq!(
        finals.index_axis(Axis(0), 1),
        trajectory.frames.slice(s![1, 4, .., .., ..])
    );
}

#[test]
fn batched_inference_writes_artifacts_summary_and_archive() {
    let temp = tempdir().expect("tempdir");
    let manifest = seed_manifest(temp.path());
    let dataset = ManifestDataset::load(&manifest, 16).expect("dataset");
    let results = temp.path().join("results");

    let policy = ReplayPolicy {
        episodes: vec![arr2(&[[3, 3, END_ID, 3, 3], [3, 3, 3, 3, 3]])],
    };
    let runner = TrajectoryRunner::new(policy, SamplingMode::Greedy, 6);
    let settings = PipelineSettings {
        end_id: END_ID,
        batch_size: 2,
        print_every: 1,
        limit: None,
    };
    let mut pipeline =
        EditPipeline::new(runner, vocabulary(), ArtifactWriter::new(&results), settings)
            .expect("pipeline");

    let summary = pipeline
        .run_inference(dataset.iter(), Some(dataset.len()), &mut NoopObserver)
        .expect("inference run");
    assert_eq!(summary.mode, RunMode::Inference);
    assert_eq!(summary.samples, 2);
    assert_eq!(summary.iterations, 1);

    for index in ["000", "001"] {
        for name in [INPUT_FILE_NAME, PRED_FILE_NAME, CONCAT_FILE_NAME] {
            assert!(results.join(index).join(name).is_file(), "{index}/{name}");
        }
    }

    // Sample 1 terminates at step 4: fill 0.5 + 0.4 = 0.9 -> ~229.
    let pred = image::open(results.join("001").join(PRED_FILE_NAME))
        .expect("open pred")
        .to_rgb8();
    let value = pred.get_pixel(256, 256)[0];
    assert!((225..=233).contains(&value), "pred pixel {value}");

    summary
        .save_json(&results.join(SUMMARY_FILE_NAME))
        .expect("summary");
    assert!(results.join(SUMMARY_FILE_NAME).is_file());

    let bundle = temp.path().join("bundle.zip");
    let archived = archive_concatenated(&results, &bundle, 25).expect("archive");
    assert_eq!(archived.len(), 2);
    assert!(bundle.is_file());
}

#[test]
fn variance_run_reports_spread_over_prompts() {
    let temp = tempdir().expect("tempdir");
    let manifest = seed_manifest(temp.path());
    let dataset = ManifestDataset::load(&manifest, 4).expect("dataset");

    // Per image: prompt 1 stops at step 0, prompt 2 at step 2 -> frames 0.0 and 0.2.
    let episodes = (0..2)
        .flat_map(|_| [arr2(&[[END_ID, 3, 3]]), arr2(&[[3, 3, END_ID]])])
        .collect();
    let runner = TrajectoryRunner::new(ReplayPolicy { episodes }, SamplingMode::Greedy, 6);
    let settings = PipelineSettings {
        end_id: END_ID,
        batch_size: 1,
        print_every: 10,
        limit: None,
    };
    let results = temp.path().join("results");
    let mut pipeline =
        EditPipeline::new(runner, vocabulary(), ArtifactWriter::new(&results), settings)
            .expect("pipeline");

    let prompts = vec!["brighter".to_string(), "more brighter".to_string()];
    let summary = pipeline
        .run_variance(dataset.iter(), Some(dataset.len()), &prompts)
        .expect("variance run");

    assert_eq!(summary.mode, RunMode::Variance);
    assert_eq!(summary.samples, 2);
    let avg = summary.avg_variance.expect("variance");
    assert!((avg - 0.02).abs() < 1e-6, "avg variance {avg}");
}
