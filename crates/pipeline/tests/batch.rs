use std::sync::Arc;

use assert_matches::assert_matches;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use refine_core::naming::BATCH_REPORT_FILE;
use refine_core::prompts::PromptCollection;
use refine_core::templates::TemplateRegistry;
use refine_core::{StepSchedule, Verdict};
use refine_critic::{CritiqueOracle, EchoBackend};
use refine_engine::{SimulatedConfig, SimulatedEngine};
use refine_events::EventBus;
use refine_pipeline::{
    BatchReport, BatchRunner, BatchSettings, EntryStatus, RefinementController, TerminalState,
};
use refine_store::MemoryCheckpointStore;

const COLLECTION: &str = r#"{
    "single_object": [
        { "prompt": "A photo of a potted plant", "line_number": 1 },
        { "prompt": "A photo of a DIVERGE bench", "line_number": 2 },
        { "prompt": 42 }
    ],
    "colors": [
        { "prompt": "A photo of a blue cow", "line_number": 5, "restart_steps": [150] },
        { "prompt": "A photo of a purple car", "line_number": 6, "restart_steps": [30] }
    ]
}"#;

fn runner(dir: &TempDir, verdict: Verdict, concurrency: usize, cancel: CancellationToken) -> BatchRunner {
    let engine = Arc::new(SimulatedEngine::new(SimulatedConfig {
        diverge_marker: Some("DIVERGE".to_string()),
        ..SimulatedConfig::default()
    }));
    let oracle = Arc::new(CritiqueOracle::new(
        Arc::new(EchoBackend::new(verdict)),
        TemplateRegistry::builtin(),
    ));
    let controller = Arc::new(RefinementController::new(
        engine,
        oracle,
        Arc::new(MemoryCheckpointStore::new()),
        Arc::new(EventBus::default()),
    ));
    BatchRunner::new(
        controller,
        BatchSettings {
            output_dir: dir.path().to_path_buf(),
            defaults: StepSchedule {
                checkpoint_steps: vec![20, 10],
                ..StepSchedule::default()
            },
            concurrency,
        },
        cancel,
    )
}

fn status_of<'a>(report: &'a BatchReport, run_dir: &str) -> &'a EntryStatus {
    &report
        .entries
        .iter()
        .find(|e| e.run_dir == run_dir)
        .unwrap_or_else(|| panic!("{run_dir} not in report"))
        .status
}

#[tokio::test]
async fn failing_prompts_do_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let collection = PromptCollection::from_json(COLLECTION).unwrap();

    let report = runner(&dir, Verdict::Continue, 1, CancellationToken::new())
        .run(&collection)
        .await
        .unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.failed, 3);
    assert_eq!(report.exhausted, 2);
    assert_eq!(report.succeeded(), 2);

    // Categories in lexicographic order, entries in file order.
    let order: Vec<_> = report.entries.iter().map(|e| e.run_dir.as_str()).collect();
    assert_eq!(
        order,
        vec![
            "colors/prompt_005",
            "colors/prompt_006",
            "single_object/prompt_001",
            "single_object/prompt_002",
            "single_object/prompt_003"
        ]
    );

    assert_matches!(status_of(&report, "colors/prompt_005"), EntryStatus::Failed { error } if error.contains("150"));
    assert_matches!(
        status_of(&report, "colors/prompt_006"),
        EntryStatus::Completed { terminal: TerminalState::Exhausted, resumes: 1, .. }
    );
    assert_matches!(
        status_of(&report, "single_object/prompt_001"),
        EntryStatus::Completed { resumes: 2, images_produced: 3, .. }
    );
    assert_matches!(status_of(&report, "single_object/prompt_002"), EntryStatus::Failed { .. });
    assert_matches!(status_of(&report, "single_object/prompt_003"), EntryStatus::Failed { .. });

    let plant = dir.path().join("single_object/prompt_001");
    assert!(plant.join("final_2_from_10.png").is_file());
    assert!(plant.join("report.json").is_file());
    // The diverging prompt still left its directory behind.
    assert!(dir.path().join("single_object/prompt_002").is_dir());
}

#[tokio::test]
async fn report_is_written_to_output_dir() {
    let dir = tempfile::tempdir().unwrap();
    let collection = PromptCollection::from_json(COLLECTION).unwrap();

    let report = runner(&dir, Verdict::Accept, 1, CancellationToken::new())
        .run(&collection)
        .await
        .unwrap();

    let written: BatchReport = serde_json::from_slice(
        &std::fs::read(dir.path().join(BATCH_REPORT_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(written, report);
    assert_eq!(written.accepted, 2);
    assert_matches!(
        status_of(&written, "single_object/prompt_001"),
        EntryStatus::Completed { terminal: TerminalState::Accepted { round: 0 }, resumes: 0, .. }
    );
}

#[tokio::test]
async fn concurrent_batch_matches_sequential_outcomes() {
    let sequential_dir = tempfile::tempdir().unwrap();
    let concurrent_dir = tempfile::tempdir().unwrap();
    let collection = PromptCollection::from_json(COLLECTION).unwrap();

    let sequential = runner(&sequential_dir, Verdict::Continue, 1, CancellationToken::new())
        .run(&collection)
        .await
        .unwrap();
    let concurrent = runner(&concurrent_dir, Verdict::Continue, 4, CancellationToken::new())
        .run(&collection)
        .await
        .unwrap();

    assert_eq!(sequential.entries, concurrent.entries);
    let image = "single_object/prompt_001/final_2_from_10.png";
    assert_eq!(
        std::fs::read(sequential_dir.path().join(image)).unwrap(),
        std::fs::read(concurrent_dir.path().join(image)).unwrap()
    );
}

#[tokio::test]
async fn cancelled_batch_skips_remaining_prompts() {
    let dir = tempfile::tempdir().unwrap();
    let collection = PromptCollection::from_json(COLLECTION).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = runner(&dir, Verdict::Continue, 2, cancel)
        .run(&collection)
        .await
        .unwrap();

    assert_eq!(report.skipped, 5);
    assert!(report
        .entries
        .iter()
        .all(|e| matches!(e.status, EntryStatus::Skipped { .. })));
    assert!(!dir.path().join("single_object/prompt_001").exists());
    assert!(dir.path().join(BATCH_REPORT_FILE).is_file());
}
