mod common;

use std::sync::Arc;

use assert_matches::assert_matches;

use common::*;
use refine_core::templates::{extract_prompt, TemplateRegistry};
use refine_core::Verdict;
use refine_critic::{CritiqueOracle, ScriptedBackend, ScriptedReply};
use refine_engine::{EngineError, SimulatedConfig, SimulatedEngine};
use refine_events::{EventBus, EventKind};
use refine_pipeline::{PipelineError, RefinementController, RunArtifacts, TerminalState};
use refine_store::{FsCheckpointStore, StoreError};

#[tokio::test]
async fn continue_every_round_exhausts_all_checkpoints() {
    let mut harness = Harness::new(
        vec![
            continue_with("A white dog lying on a couch in sunlight"),
            continue_with("A fluffy white dog on a beige couch, sunny room"),
            continue_with("A white dog clearly visible on a couch, bright sun"),
        ],
        0,
    );
    let config = dog_config(&[20, 10, 0]);
    let artifacts = harness.artifacts(&config).await;

    let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

    assert_eq!(outcome.terminal, TerminalState::Exhausted);
    assert_eq!(outcome.resume_count(), 3);
    assert_eq!(outcome.images_produced(), 4);
    assert_eq!(
        outcome.images,
        vec![
            "final_0.png",
            "final_1_from_20.png",
            "final_2_from_10.png",
            "final_3_from_0.png"
        ]
    );
    assert_eq!(outcome.final_image, "final_3_from_0.png");
    assert!(outcome.unconsumed_steps.is_empty());
    assert!(outcome.early_stop_image.is_none());
    for name in &outcome.images {
        assert!(harness.run_file(&config, name).is_file(), "{name} missing");
    }
    assert!(harness.run_file(&config, "report.json").is_file());
    assert!(harness.run_file(&config, "latents_10.safetensors").is_file());

    // Engine saw one generate and three resumes, each with the new prompt.
    let calls = harness.engine.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[0].kind, "generate");
    assert_eq!(calls[1].executed, 21..100);
    assert_eq!(calls[2].executed, 11..100);
    assert_eq!(calls[3].executed, 1..100);
    assert_eq!(calls[1].prompt, "A white dog lying on a couch in sunlight");

    let events = harness.drain_events();
    assert_matches!(events.last().map(|e| &e.kind), Some(EventKind::Exhausted { rounds: 3 }));
}

#[tokio::test]
async fn accept_on_second_round_stops_early() {
    let mut harness = Harness::new(
        vec![continue_with("A white dog sitting on a couch in the sun"), accept()],
        0,
    );
    let config = dog_config(&[20, 10, 0]);
    let artifacts = harness.artifacts(&config).await;

    let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

    assert_eq!(outcome.terminal, TerminalState::Accepted { round: 1 });
    assert_eq!(outcome.resume_count(), 1);
    assert_eq!(outcome.unconsumed_steps, vec![10, 0]);
    assert_eq!(outcome.early_stop_image.as_deref(), Some("early_stop_round_1.png"));

    let early_stop = std::fs::read(harness.run_file(&config, "early_stop_round_1.png")).unwrap();
    let accepted = std::fs::read(harness.run_file(&config, "final_1_from_20.png")).unwrap();
    assert_eq!(early_stop, accepted);

    assert_eq!(harness.engine.calls().len(), 2);
    assert_eq!(harness.backend.instructions().len(), 2);

    let events = harness.drain_events();
    assert_matches!(events.last().map(|e| &e.kind), Some(EventKind::Accepted { round: 1 }));
}

#[tokio::test]
async fn accept_on_first_round_copies_initial_image() {
    let harness = Harness::new(vec![accept()], 0);
    let config = dog_config(&[20, 10, 0]);
    let artifacts = harness.artifacts(&config).await;

    let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

    assert_eq!(outcome.accepted_round(), Some(0));
    assert_eq!(outcome.unconsumed_steps, vec![20, 10, 0]);
    let early_stop = std::fs::read(harness.run_file(&config, "early_stop_round_0.png")).unwrap();
    let initial = std::fs::read(harness.run_file(&config, "final_0.png")).unwrap();
    assert_eq!(early_stop, initial);
}

#[tokio::test]
async fn critique_always_uses_original_prompt() {
    let harness = Harness::new(
        vec![
            continue_with("first refinement"),
            continue_with("second refinement"),
            continue_with("third refinement"),
        ],
        0,
    );
    let config = dog_config(&[20, 10, 0]);
    let artifacts = harness.artifacts(&config).await;

    harness.controller.run(&config, &artifacts).await.unwrap();

    let instructions = harness.backend.instructions();
    assert_eq!(instructions.len(), 3);
    for instruction in &instructions {
        assert_eq!(extract_prompt(instruction), Some(DOG_PROMPT));
    }
}

#[tokio::test]
async fn rounds_never_exceed_checkpoint_count_plus_one() {
    for steps in [vec![], vec![5], vec![50, 30, 20, 10, 0]] {
        let replies = (0..10).map(|i| continue_with(&format!("prompt {i}"))).collect();
        let harness = Harness::new(replies, 0);
        let config = dog_config(&steps);
        let artifacts = harness.artifacts(&config).await;

        let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

        assert_eq!(outcome.terminal, TerminalState::Exhausted);
        assert!(outcome.rounds.len() <= steps.len() + 1);
        assert_eq!(outcome.resume_count(), steps.len());
        assert_eq!(harness.engine.calls().len(), steps.len() + 1);
    }
}

#[tokio::test]
async fn missing_refined_prompt_reuses_previous_prompt() {
    let harness = Harness::new(
        vec![
            continue_with("A white dog on a red couch"),
            no_refinement(),
            no_refinement(),
        ],
        1,
    );
    let config = dog_config(&[20, 10]);
    let artifacts = harness.artifacts(&config).await;

    let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

    assert_eq!(outcome.placeholder_rounds(), vec![1]);
    let round = &outcome.rounds[1];
    assert_eq!(round.critique_file, "critique_1_no_refinement.txt");
    assert_eq!(round.refined_prompt, "None");
    assert_eq!(
        round.resume.as_ref().map(|r| r.prompt.as_str()),
        Some("A white dog on a red couch")
    );
    assert!(harness
        .run_file(&config, "critique_1_no_refinement.txt")
        .is_file());

    let calls = harness.engine.calls();
    assert!(calls.iter().all(|c| c.prompt != "None"));
    // One retry for the placeholder round.
    assert_eq!(harness.backend.instructions().len(), 3);
}

#[tokio::test]
async fn critique_backend_failure_continues_refinement() {
    let harness = Harness::new(
        vec![
            ScriptedReply::Fail("model server down".to_string()),
            accept(),
        ],
        0,
    );
    let config = dog_config(&[20, 10]);
    let artifacts = harness.artifacts(&config).await;

    let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

    assert_eq!(outcome.terminal, TerminalState::Accepted { round: 1 });
    assert!(outcome.rounds[0].placeholder_fallback);
    assert_eq!(outcome.rounds[0].verdict, Verdict::Continue);
    let text =
        std::fs::read_to_string(harness.run_file(&config, "critique_0_no_refinement.txt")).unwrap();
    assert!(text.contains("model server down"));
}

#[tokio::test]
async fn missing_checkpoint_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let events = Arc::new(EventBus::default());
    let mut receiver = events.subscribe();
    let controller = RefinementController::new(
        Arc::new(ForgetfulEngine(SimulatedEngine::default())),
        Arc::new(CritiqueOracle::new(
            Arc::new(ScriptedBackend::new(vec![continue_with("x")])),
            TemplateRegistry::builtin(),
        )),
        Arc::new(FsCheckpointStore::new(dir.path())),
        events,
    );
    let config = dog_config(&[20]);
    let artifacts = RunArtifacts::create(dir.path(), config.run_id()).await.unwrap();

    let result = controller.run(&config, &artifacts).await;

    assert_matches!(
        result,
        Err(PipelineError::Store(StoreError::CheckpointNotFound { step: 20, .. }))
    );
    let mut last = None;
    while let Ok(event) = receiver.try_recv() {
        last = Some(event.kind);
    }
    assert_matches!(last, Some(EventKind::RunFailed { .. }));
}

#[tokio::test]
async fn diverged_generation_fails_the_run() {
    let harness = Harness::with_engine_config(
        vec![continue_with("DIVERGE please")],
        0,
        SimulatedConfig {
            diverge_marker: Some("DIVERGE".to_string()),
            ..SimulatedConfig::default()
        },
    );
    let config = dog_config(&[20]);
    let artifacts = harness.artifacts(&config).await;

    let result = harness.controller.run(&config, &artifacts).await;

    assert_matches!(result, Err(PipelineError::Generation(EngineError::Diverged(_))));
    assert!(harness.run_file(&config, "final_0.png").is_file());
    assert!(!harness.run_file(&config, "report.json").exists());
}

#[tokio::test]
async fn refinement_step_after_resume_point_critiques_final_image() {
    let harness = Harness::new(vec![continue_with("a"), continue_with("b")], 0);
    let config = refine_core::RunConfiguration::new(
        refine_core::RunId::new("counting", 9).unwrap(),
        "A photo of four dogs",
        refine_core::StepSchedule {
            total_steps: 30,
            guidance_scale: 7.5,
            refinement_step: 5,
            checkpoint_steps: vec![20, 2],
        },
    )
    .unwrap();
    let artifacts = harness.artifacts(&config).await;

    let outcome = harness.controller.run(&config, &artifacts).await.unwrap();

    assert_eq!(outcome.rounds[0].critiqued_image, "preview_0_step_5.png");
    // Resume from 21 skips step 5, so round 1 critiqued the final image.
    assert_eq!(outcome.rounds[1].critiqued_image, "final_1_from_20.png");
    assert_eq!(
        outcome.rounds[1].resume.as_ref().and_then(|r| r.preview.clone()),
        Some("preview_2_step_5.png".to_string())
    );
}

#[tokio::test]
async fn events_follow_state_transitions() {
    let mut harness = Harness::new(vec![continue_with("a dog on a couch"), accept()], 0);
    let config = dog_config(&[20, 10, 0]);
    let artifacts = harness.artifacts(&config).await;

    harness.controller.run(&config, &artifacts).await.unwrap();

    let events = harness.drain_events();
    assert!(events.iter().all(|e| e.run_id == "single_object/prompt_001"));
    let types: Vec<_> = events.iter().map(|e| e.kind.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "run.started",
            "checkpoint.saved",
            "checkpoint.saved",
            "checkpoint.saved",
            "critique.received",
            "run.resumed",
            "critique.received",
            "run.accepted"
        ]
    );
    assert_matches!(
        &events[5].kind,
        EventKind::Resumed { round: 0, from_step: 21, prompt } if prompt == "a dog on a couch"
    );
    assert_eq!(events.iter().filter(|e| e.kind.is_terminal()).count(), 1);
}
