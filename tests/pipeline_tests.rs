//! End-to-end pipeline tests with closure processors writing real files.

use shardpipe::engine::{EngineCode, ProcessError, Processor};
use shardpipe::pipeline::{Pipeline, RunContext, Stage, StageInput, run_stage};
use shardpipe::{FailureKind, Opts, ShardManager, run_stages};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn test_opts() -> Opts {
    Opts {
        max_tasks: 3,
        shard_capacity: 1_000_000,
        admission_backoff: Duration::from_millis(2),
        admission_timeout: Some(Duration::from_secs(30)),
        stage_poll: Duration::from_millis(2),
        ..Opts::default()
    }
}

fn write_inputs(dir: &Path, names: &[&str]) {
    fs::create_dir_all(dir).unwrap();
    for name in names {
        fs::write(dir.join(name), format!("1 2 3\n{name}\n")).unwrap();
    }
}

/// Copies the input into `<stem><tag>.<ext>` in the output dir and counts calls.
fn tagging_processor(tag: &'static str, calls: Arc<AtomicUsize>) -> Arc<dyn Processor> {
    Arc::new(
        move |input: &Path, out_dir: &Path| -> Result<(), ProcessError> {
            calls.fetch_add(1, Ordering::SeqCst);
            let stem = input.file_stem().unwrap().to_string_lossy();
            let ext = input
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            fs::copy(input, out_dir.join(format!("{stem}{tag}.{ext}")))
                .map_err(anyhow::Error::from)?;
            Ok(())
        },
    )
}

fn raw_input(root: &Path, ext: &str) -> StageInput {
    StageInput::Enumerate {
        root: root.to_path_buf(),
        extension: Some(ext.to_string()),
    }
}

fn files_in(dir: &Path) -> Vec<PathBuf> {
    let mut v: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    v.sort();
    v
}

#[test]
fn test_end_to_end_two_files_then_idempotent_rerun() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["a.csv", "b.csv"]);
    let opts = test_opts();
    let calls = Arc::new(AtomicUsize::new(0));

    let shards = Arc::new(ShardManager::new(&output, "class", opts.shard_capacity).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(&input, ".csv"),
        shards,
        tagging_processor("_proc", Arc::clone(&calls)),
    );
    let reports = run_stages(vec![stage], &opts).unwrap();
    assert_eq!(reports[0].succeeded, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(
        files_in(&output.join("class0")),
        vec![
            output.join("class0").join("a_proc.csv"),
            output.join("class0").join("b_proc.csv")
        ]
    );

    // Fresh manager, as a new process invocation would build.
    let shards = Arc::new(ShardManager::new(&output, "class", opts.shard_capacity).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(&input, "csv"),
        shards,
        tagging_processor("_proc", Arc::clone(&calls)),
    );
    let reports = run_stages(vec![stage], &opts).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(reports[0].candidates, 2);
    assert_eq!(reports[0].already_done, 2);
    assert_eq!(reports[0].processed(), 0);
    assert!(!output.join("class1").exists());
}

#[test]
fn test_engine_failure_on_one_item_does_not_stop_others() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(
        &input,
        &["item1.csv", "item2.csv", "item3.csv", "item4.csv", "item5.csv"],
    );
    let opts = test_opts();

    let processor: Arc<dyn Processor> = Arc::new(
        |input: &Path, out_dir: &Path| -> Result<(), ProcessError> {
            let stem = input.file_stem().unwrap().to_string_lossy().into_owned();
            if stem == "item3" {
                return Err(ProcessError::Engine {
                    code: EngineCode::new("000210"),
                    message: "ERROR 000210: Cannot create output".to_string(),
                });
            }
            fs::write(out_dir.join(format!("{stem}_proc.csv")), b"x,y,z\n")
                .map_err(anyhow::Error::from)?;
            Ok(())
        },
    );
    let shards = Arc::new(ShardManager::new(&output, "class", opts.shard_capacity).unwrap());
    let stage = Stage::new("headers", raw_input(&input, "csv"), shards, processor);
    let report = run_stages(vec![stage], &opts).unwrap().remove(0);

    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].path, input.join("item3.csv"));
    assert_eq!(
        report.failed[0].kind,
        FailureKind::Engine {
            code: "000210".to_string()
        }
    );
    for stem in ["item1", "item2", "item4", "item5"] {
        assert!(output.join("class0").join(format!("{stem}_proc.csv")).is_file());
    }
    assert!(!output.join("class0").join("item3_proc.csv").exists());
}

#[test]
fn test_runtime_failure_and_panic_are_isolated() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["ok.csv", "bad.csv", "boom.csv"]);
    let opts = test_opts();

    let processor: Arc<dyn Processor> = Arc::new(
        |input: &Path, out_dir: &Path| -> Result<(), ProcessError> {
            match input.file_stem().unwrap().to_str().unwrap() {
                "bad" => Err(anyhow::anyhow!("disk hiccup").into()),
                "boom" => panic!("engine crashed"),
                stem => {
                    fs::write(out_dir.join(format!("{stem}_proc.csv")), b"1")
                        .map_err(anyhow::Error::from)?;
                    Ok(())
                }
            }
        },
    );
    let shards = Arc::new(ShardManager::new(&output, "class", opts.shard_capacity).unwrap());
    let stage = Stage::new("headers", raw_input(&input, "csv"), shards, processor);
    let report = run_stages(vec![stage], &opts).unwrap().remove(0);

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(
        &report.failed[0].kind,
        FailureKind::Runtime { message } if message.contains("disk hiccup")
    ));
    assert!(output.join("class0").join("ok_proc.csv").is_file());
}

#[test]
fn test_stages_run_in_order_behind_a_barrier() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    let names = ["s1.csv", "s2.csv", "s3.csv", "s4.csv", "s5.csv", "s6.csv"];
    write_inputs(&input, &names);
    let opts = test_opts();

    let slow_calls = Arc::new(AtomicUsize::new(0));
    let slow_counter = Arc::clone(&slow_calls);
    let slow: Arc<dyn Processor> = Arc::new(
        move |input: &Path, out_dir: &Path| -> Result<(), ProcessError> {
            std::thread::sleep(Duration::from_millis(20));
            slow_counter.fetch_add(1, Ordering::SeqCst);
            let stem = input.file_stem().unwrap().to_string_lossy();
            fs::write(out_dir.join(format!("{stem}_hdr.csv")), b"x,y,z\n")
                .map_err(anyhow::Error::from)?;
            Ok(())
        },
    );
    let second_calls = Arc::new(AtomicUsize::new(0));

    let headers = Arc::new(ShardManager::new(output.join("headers"), "hdr", 1_000_000).unwrap());
    let converted =
        Arc::new(ShardManager::new(output.join("converted"), "shp", 1_000_000).unwrap());
    let stages = vec![
        Stage::new(
            "headers",
            raw_input(&input, "csv"),
            Arc::clone(&headers),
            slow,
        ),
        Stage::new(
            "convert",
            StageInput::Shards(Arc::clone(&headers)),
            converted,
            tagging_processor("_shp", Arc::clone(&second_calls)),
        ),
    ];
    let reports = run_stages(stages, &opts).unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(slow_calls.load(Ordering::SeqCst), names.len());
    assert_eq!(reports[1].candidates, names.len());
    assert_eq!(second_calls.load(Ordering::SeqCst), names.len());
    assert_eq!(reports[1].succeeded, names.len());
}

#[test]
fn test_required_extension_skips_wrong_format() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["keep.shp", "keep.dbf", "other.txt"]);
    let opts = test_opts();
    let calls = Arc::new(AtomicUsize::new(0));

    let shards = Arc::new(ShardManager::new(&output, "prj", opts.shard_capacity).unwrap());
    let stage = Stage::new(
        "project",
        StageInput::Enumerate {
            root: input.clone(),
            extension: None,
        },
        shards,
        tagging_processor("_AA", Arc::clone(&calls)),
    )
    .with_required_extension(".shp");
    let report = run_stages(vec![stage], &opts).unwrap().remove(0);

    assert_eq!(report.candidates, 3);
    assert_eq!(report.wrong_format, 2);
    assert_eq!(report.succeeded, 1);
    assert!(output.join("prj0").join("keep_AA.shp").is_file());
}

#[test]
fn test_dry_run_calls_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["a.csv", "b.csv", "c.txt"]);
    let opts = Opts {
        dry_run: true,
        ..test_opts()
    };
    let calls = Arc::new(AtomicUsize::new(0));

    let shards = Arc::new(ShardManager::new(&output, "class", opts.shard_capacity).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(&input, "csv"),
        shards,
        tagging_processor("_proc", Arc::clone(&calls)),
    );
    let report = run_stages(vec![stage], &opts).unwrap().remove(0);

    assert!(report.dry_run);
    assert_eq!(report.submitted, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(files_in(&output.join("class0")).is_empty());
}

#[test]
fn test_rotation_across_a_stage() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["r1.csv", "r2.csv", "r3.csv"]);
    let one_output = fs::metadata(input.join("r1.csv")).unwrap().len();
    let opts = Opts {
        max_tasks: 1,
        ..test_opts()
    };
    let calls = Arc::new(AtomicUsize::new(0));

    let shards = Arc::new(ShardManager::new(&output, "class", one_output).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(&input, "csv"),
        Arc::clone(&shards),
        tagging_processor("_proc", Arc::clone(&calls)),
    );
    run_stages(vec![stage], &opts).unwrap();

    for i in 0..3 {
        assert_eq!(files_in(&output.join(format!("class{i}"))).len(), 1);
    }
    assert_eq!(shards.current_counter(), 2);
}

#[test]
fn test_unusable_output_directory_fails_the_run() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["a.csv"]);
    let opts = test_opts();

    let shards = Arc::new(ShardManager::new(&output, "class", 5).unwrap());
    fs::write(output.join("class0").join("fill.bin"), b"12345").unwrap();
    fs::write(output.join("class1"), b"not a dir").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let stage = Stage::new(
        "headers",
        raw_input(&input, "csv"),
        shards,
        tagging_processor("_proc", Arc::clone(&calls)),
    );

    let err = run_stages(vec![stage], &opts).unwrap_err();
    assert!(format!("{err:#}").contains("stage `headers` failed"), "got {err:#}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_input_root_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let opts = test_opts();
    let shards = Arc::new(ShardManager::new(tmp.path().join("out"), "class", 10).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(&tmp.path().join("nope"), "csv"),
        shards,
        tagging_processor("_proc", Arc::new(AtomicUsize::new(0))),
    );
    assert!(run_stages(vec![stage], &opts).is_err());
}

#[test]
fn test_cancel_flag_stops_dispatch() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["a.csv", "b.csv"]);
    let opts = test_opts();
    let calls = Arc::new(AtomicUsize::new(0));

    let shards = Arc::new(ShardManager::new(&output, "class", opts.shard_capacity).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(&input, "csv"),
        shards,
        tagging_processor("_proc", Arc::clone(&calls)),
    );
    let pipeline = Pipeline::from_opts(&opts, vec![stage]);
    pipeline
        .cancel_flag()
        .store(true, Ordering::Relaxed);
    let reports = pipeline.run_all().unwrap();

    assert!(reports.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_run_stage_returns_before_tasks_finish() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    write_inputs(&input, &["a.csv"]);
    let opts = test_opts();
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let processor: Arc<dyn Processor> = Arc::new(
        move |_: &Path, _: &Path| -> Result<(), ProcessError> {
            let _ = release_rx.recv();
            Ok(())
        },
    );
    let shards = Arc::new(ShardManager::new(tmp.path().join("out"), "class", 100).unwrap());
    let stage = Stage::new("wait", raw_input(&input, "csv"), shards, processor);
    let pipeline = Pipeline::from_opts(&opts, vec![]);
    let executor = pipeline.executor();

    let progress = run_stage(&stage, executor, &RunContext::default()).unwrap();
    assert!(executor.is_busy());
    release_tx.send(()).unwrap();
    executor.wait_idle(opts.stage_poll).unwrap();
    let report = progress.finish().unwrap();
    assert_eq!(report.succeeded, 1);
}

#[test]
fn test_stuck_task_fails_the_run_within_the_admission_timeout() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    write_inputs(&input, &["a.csv", "b.csv"]);
    let opts = Opts {
        max_tasks: 1,
        admission_timeout: Some(Duration::from_millis(200)),
        ..test_opts()
    };
    // Never sent on; the first task blocks until the test drops it.
    let (hold_tx, hold_rx) = crossbeam_channel::bounded::<()>(0);
    let processor: Arc<dyn Processor> = Arc::new(
        move |_: &Path, _: &Path| -> Result<(), ProcessError> {
            let _ = hold_rx.recv();
            Ok(())
        },
    );
    let shards = Arc::new(ShardManager::new(tmp.path().join("out"), "class", 100).unwrap());
    let stage = Stage::new("stuck", raw_input(&input, "csv"), shards, processor);

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = done_tx.send(run_stages(vec![stage], &opts));
    });
    let result = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("run did not return while a task was stuck");
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("no executor slot freed up"), "got {err:#}");
    drop(hold_tx);
}

#[test]
fn test_shard_input_honours_exclude_patterns() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("input");
    let output = tmp.path().join("output");
    write_inputs(&input, &["a.csv", "b.csv"]);
    let opts = Opts {
        walk: shardpipe::WalkOpts {
            exclude: vec!["*.xml".to_string()],
            ..Default::default()
        },
        ..test_opts()
    };

    // Writes data plus a sidecar that later stages must not see.
    let with_sidecar: Arc<dyn Processor> = Arc::new(
        |input: &Path, out_dir: &Path| -> Result<(), ProcessError> {
            let stem = input.file_stem().unwrap().to_string_lossy();
            fs::write(out_dir.join(format!("{stem}_hdr.csv")), b"x\n")
                .map_err(anyhow::Error::from)?;
            fs::write(out_dir.join(format!("{stem}_hdr.xml")), b"<meta/>")
                .map_err(anyhow::Error::from)?;
            Ok(())
        },
    );
    let second_calls = Arc::new(AtomicUsize::new(0));
    let headers = Arc::new(ShardManager::new(output.join("headers"), "hdr", 1_000_000).unwrap());
    let converted = Arc::new(ShardManager::new(output.join("converted"), "c", 1_000_000).unwrap());
    let stages = vec![
        Stage::new("headers", raw_input(&input, "csv"), Arc::clone(&headers), with_sidecar),
        Stage::new(
            "convert",
            StageInput::Shards(headers),
            converted,
            tagging_processor("_c", Arc::clone(&second_calls)),
        ),
    ];
    let reports = run_stages(stages, &opts).unwrap();

    assert_eq!(reports[1].candidates, 2);
    assert_eq!(second_calls.load(Ordering::SeqCst), 2);
    assert_eq!(reports[1].wrong_format, 0);
}

#[test]
fn test_output_inside_input_root_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    write_inputs(tmp.path(), &["a.csv"]);
    let calls = Arc::new(AtomicUsize::new(0));
    let shards = Arc::new(ShardManager::new(tmp.path().join("out"), "class", 100).unwrap());
    let stage = Stage::new(
        "headers",
        raw_input(tmp.path(), "csv"),
        shards,
        tagging_processor("_proc", Arc::clone(&calls)),
    );

    let err = run_stages(vec![stage], &test_opts()).unwrap_err();
    assert!(format!("{err:#}").contains("is inside input root"), "got {err:#}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[cfg(unix)]
mod command_engine {
    use super::*;
    use shardpipe::{BoundedExecutor, CommandEngine, ExecutorConfig};

    fn sh(script: &str) -> CommandEngine {
        CommandEngine::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    #[test]
    fn test_engine_error_code_is_parsed_from_stderr() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = sh("echo 'ERROR 000732: Dataset {input} does not exist' >&2; exit 1");
        let err = engine
            .process(&tmp.path().join("site.csv"), tmp.path())
            .unwrap_err();
        match err {
            ProcessError::Engine { code, message } => {
                assert_eq!(code.as_str(), "000732");
                assert!(message.contains("site.csv"));
            }
            other => panic!("expected engine error, got {other:?}"),
        }
    }

    #[test]
    fn test_unclassified_exit_is_runtime_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = sh("exit 3")
            .process(&tmp.path().join("a.csv"), tmp.path())
            .unwrap_err();
        assert!(matches!(err, ProcessError::Other(_)), "got {err:?}");
    }

    #[test]
    fn test_missing_program_is_runtime_error() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = CommandEngine::new("/nonexistent/shardpipe-engine", vec![]);
        let err = engine
            .process(&tmp.path().join("a.csv"), tmp.path())
            .unwrap_err();
        assert!(format!("{err:#}").contains("spawn engine command"), "got {err:#}");
    }

    #[test]
    fn test_command_stage_copies_every_input() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("input");
        let output = tmp.path().join("output");
        write_inputs(&input, &["a.csv", "b.csv", "c.csv"]);

        let shards = Arc::new(ShardManager::new(&output, "class", 1_000_000).unwrap());
        let engine: Arc<dyn Processor> =
            Arc::new(sh("cp '{input}' '{output_dir}/{stem}_cp.csv'"));
        let executor = BoundedExecutor::new(ExecutorConfig {
            max_tasks: 2,
            admission_backoff: Duration::from_millis(2),
            admission_timeout: None,
        });
        let mut pipeline = Pipeline::new(executor, Duration::from_millis(2));
        pipeline.add_stage(Stage::new("copy", raw_input(&input, "csv"), shards, engine));
        let report = pipeline.run_all().unwrap().remove(0);

        assert_eq!(report.succeeded, 3);
        assert_eq!(files_in(&output.join("class0")).len(), 3);
        assert!(output.join("class0").join("b_cp.csv").is_file());
    }
}
