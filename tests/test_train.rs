mod common;
use cliprest::{load_f32_tensors, load_results, results_path, save_results, Mode, TrainConfig, TrainEvalLoop};
use common::synthetic_table;

/// Three subjects, classes "0" and "1", four TRs each.
fn small_config() -> TrainConfig {
    TrainConfig {
        train_size: 2,
        k_hidden: 4,
        k_layers: 1,
        k_class: 2,
        batch_size: 16,
        num_epochs: 1,
        learning_rate: 1e-2,
        seed: 330,
        time_window: None,
        ..TrainConfig::default()
    }
}

fn table() -> cliprest::ActivationTable {
    synthetic_table(&["s1", "s2", "s3"], &["0", "1"], 4, 3, 21)
}

#[test]
fn one_epoch_one_batch_is_one_step() {
    let run = TrainEvalLoop::new(small_config()).run(&table()).unwrap();
    assert_eq!(run.optimizer_steps, 1);
    assert_eq!(run.train_subjects, vec!["s1", "s2"]);
    assert_eq!(run.test_subjects, vec!["s3"]);

    let r = &run.results;
    assert_eq!(r.train.len(), 2);
    assert_eq!(r.val, vec![0.0]);
    assert_eq!(r.test.len(), 1);
    assert_eq!(r.losses.len(), 1);
    assert!(r.losses[0].is_finite());
    assert_eq!(r.clip_time, vec![4, 4]);
    for class in 0..2 {
        assert_eq!(r.t_train[&class].len(), 2);
        assert_eq!(r.t_train[&class][0].len(), 4);
        assert_eq!(r.t_test[&class].len(), 1);
    }
    assert_eq!(r.test_conf_mtx.len(), 2);
    assert_eq!(r.test_conf_mtx.iter().flatten().sum::<u64>(), 8);
    assert!(r.test.iter().chain(&r.train).all(|a| (0.0..=1.0).contains(a)));
    assert!(run.activations.is_none());
}

#[test]
fn small_batches_step_per_chunk() {
    let cfg = TrainConfig { batch_size: 3, num_epochs: 2, ..small_config() };
    // 2 training subjects × 2 clips = 4 sequences → 2 batches per epoch
    let run = TrainEvalLoop::new(cfg).run(&table()).unwrap();
    assert_eq!(run.optimizer_steps, 4);
    assert_eq!(run.results.losses.len(), 2);
}

#[test]
fn same_seed_same_run() {
    let cfg = TrainConfig { num_epochs: 3, batch_size: 2, reshuffle_each_epoch: true, ..small_config() };
    let a = TrainEvalLoop::new(cfg.clone()).run(&table()).unwrap();
    let b = TrainEvalLoop::new(cfg).run(&table()).unwrap();
    assert_eq!(a.results, b.results);
}

#[test]
fn time_window_shortens_clips() {
    let cfg = TrainConfig { time_window: Some(1..3), ..small_config() };
    let run = TrainEvalLoop::new(cfg).run(&table()).unwrap();
    assert_eq!(run.results.clip_time, vec![2, 2]);
    assert_eq!(run.results.t_test[&0][0].len(), 2);
}

#[test]
fn results_and_activations_persist() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainConfig { save_activations: true, ..small_config() };
    let run = TrainEvalLoop::new(cfg).run(&table()).unwrap();

    let path = results_path(dir.path(), "lstm", Mode::Clips);
    save_results(&run.record(Mode::Clips), &path).unwrap();
    let back = load_results(&path).unwrap();
    assert_eq!(back.mode, Mode::Clips);
    assert_eq!(back.test_mode.clip_time, run.results.clip_time);
    assert_eq!(back.test_mode.test_conf_mtx, run.results.test_conf_mtx);

    let acts = run.activations.as_ref().unwrap();
    let path = dir.path().join("acts.safetensors");
    acts.write(&path).unwrap();
    let tensors = load_f32_tensors(&path).unwrap();
    // 1 test subject × 2 clips, 4 TRs
    assert_eq!(tensors["lstm"].shape(), &[2, 4, 4]);
    assert_eq!(tensors["linear"].shape(), &[2, 4, 2]);
}

#[test]
fn too_few_subjects_fails() {
    let cfg = TrainConfig { train_size: 3, ..small_config() };
    assert!(TrainEvalLoop::new(cfg).run(&table()).is_err());
}

#[test]
fn zero_sizes_are_rejected_by_name() {
    let cases = [
        ("batch_size", TrainConfig { batch_size: 0, ..small_config() }),
        ("k_hidden", TrainConfig { k_hidden: 0, ..small_config() }),
        ("k_layers", TrainConfig { k_layers: 0, ..small_config() }),
        ("k_class", TrainConfig { k_class: 0, ..small_config() }),
    ];
    for (field, cfg) in cases {
        let err = TrainEvalLoop::new(cfg).run(&table()).unwrap_err();
        assert!(err.to_string().contains(field), "{field}: {err:#}");
    }
}
