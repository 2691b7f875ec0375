//! End-to-end pipeline tests against an in-memory database and a
//! deterministic generator.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tutor_common::curriculum::CurriculumStyle;
use tutor_common::db::models::{Student, TurnResult, UndiagnosedMiss};
use tutor_common::db::{history, students};
use tutor_common::events::{
    ErrorKind, EventPayload, ProblemVariant, SessionEvent, Stage,
};
use tutor_ps::bank::ProblemBank;
use tutor_ps::channel::EventChannel;
use tutor_ps::config::Config;
use tutor_ps::error::{Error, Result};
use tutor_ps::generator::{
    DirectionPlan, GeneratedProblem, GenerationRequest, Generator, Misconception,
};
use tutor_ps::grading;
use tutor_ps::pipeline::{self, PipelineDeps};
use tutor_ps::registry::SessionRegistry;

#[derive(Default)]
struct MockGenerator {
    generate_calls: AtomicUsize,
    fail_generate: bool,
    fail_diagnose: bool,
    generate_delay_ms: u64,
}

#[async_trait]
impl Generator for MockGenerator {
    async fn analyze_direction(
        &self,
        _student: &Student,
        _history_summary: &str,
        requested_topic: Option<&str>,
    ) -> Result<DirectionPlan> {
        Ok(DirectionPlan {
            topic: requested_topic.unwrap_or("Addition").to_string(),
            guidance: Some("practice two-digit sums".to_string()),
        })
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedProblem> {
        let n = self.generate_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.generate_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.generate_delay_ms)).await;
        }
        if self.fail_generate {
            return Err(Error::Generator("backend down".to_string()));
        }
        Ok(GeneratedProblem {
            question: format!("What is {n} + {n}?"),
            answer: Some((n + n).to_string()),
            hint: "Count up".to_string(),
            topic: Some(request.topic.clone()),
        })
    }

    async fn compose_walkthrough(
        &self,
        _grade: i64,
        _style: CurriculumStyle,
        _question: &str,
        _answer: Option<&str>,
        _hint: &str,
    ) -> Result<String> {
        Ok("Step 1: count the first group. Step 2: count on.".to_string())
    }

    async fn diagnose(
        &self,
        _grade: i64,
        _style: CurriculumStyle,
        _miss: &UndiagnosedMiss,
    ) -> Result<Misconception> {
        if self.fail_diagnose {
            return Err(Error::Generator("diagnostics down".to_string()));
        }
        Ok(Misconception {
            misconception_type: "computational".to_string(),
            misconception_detail: Some("dropped a carry".to_string()),
            scaffold_topic: Some("Addition".to_string()),
            scaffold_hint: Some("Line up the digits".to_string()),
        })
    }

    async fn explain_result(
        &self,
        _grade: i64,
        _question: &str,
        _correct_answer: Option<&str>,
        _student_answer: &str,
        is_correct: bool,
    ) -> Result<String> {
        Ok(if is_correct {
            "Nice work!".to_string()
        } else {
            "Almost! Let's look at it together.".to_string()
        })
    }
}

async fn setup(generator: MockGenerator, config: Config) -> (PipelineDeps, Arc<MockGenerator>) {
    let pool = tutor_common::db::init_memory_database()
        .await
        .expect("memory db");
    let generator = Arc::new(generator);
    let deps = PipelineDeps {
        pool: pool.clone(),
        bank: Arc::new(ProblemBank::with_seed(pool, 42)),
        registry: Arc::new(SessionRegistry::new()),
        channel: Arc::new(EventChannel::new(32)),
        generator: generator.clone(),
        config: Arc::new(config),
    };
    (deps, generator)
}

async fn add_student(deps: &PipelineDeps, name: &str) -> Student {
    let id = students::create_student(&deps.pool, name, 4, CurriculumStyle::CommonCore)
        .await
        .expect("create student");
    students::get_student(&deps.pool, id).await.expect("fetch student")
}

async fn next_event(rx: &mut broadcast::Receiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Collect pipeline events until (and including) the terminal one
async fn collect_run(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let terminal = matches!(
            &event,
            SessionEvent::Pipeline { event } if event.stage.is_terminal()
        );
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn sequences(events: &[SessionEvent]) -> Vec<u64> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Pipeline { event } => Some(event.sequence),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn standard_run_emits_gapless_events_and_completes() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student,
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");

    let events = collect_run(&mut rx).await;
    assert_eq!(sequences(&events), vec![1, 2, 3, 4]);

    let stages: Vec<Stage> = events
        .iter()
        .map(|e| match e {
            SessionEvent::Pipeline { event } => event.stage,
            other => panic!("unexpected event {other:?}"),
        })
        .collect();
    assert_eq!(
        stages,
        vec![Stage::Direction, Stage::Acquisition, Stage::Feedback, Stage::Done]
    );

    match &events[3] {
        SessionEvent::Pipeline { event } => match &event.payload {
            EventPayload::Completed { problem, walkthrough, .. } => {
                assert!(!problem.cache_hit);
                assert!(problem.problem_id.is_some());
                assert_eq!(problem.topic, "Addition");
                assert!(walkthrough.is_some());
            }
            other => panic!("expected Completed, got {other:?}"),
        },
        _ => unreachable!(),
    }

    let snapshot = deps.registry.status_of("s1").expect("snapshot");
    assert_eq!(snapshot.stage, Stage::Done);
    assert!(snapshot.error.is_none());
}

#[tokio::test]
async fn acquisition_reports_cache_hit_flag() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student,
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    let events = collect_run(&mut rx).await;

    match &events[1] {
        SessionEvent::Pipeline { event } => {
            assert_eq!(event.stage, Stage::Acquisition);
            match event.payload {
                EventPayload::StageCompleted { cache_hit } => {
                    assert_eq!(cache_hit, Some(false))
                }
                ref other => panic!("expected StageCompleted, got {other:?}"),
            }
        }
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn second_learner_reuses_banked_problem_without_generator() {
    let (deps, mock) = setup(MockGenerator::default(), Config::default()).await;
    let first = add_student(&deps, "Hyunji").await;
    let second = add_student(&deps, "Mina").await;

    let mut rx1 = deps.channel.subscribe("s1");
    pipeline::start_run(deps.clone(), "s1", first, ProblemVariant::Standard, None, None)
        .expect("admitted");
    collect_run(&mut rx1).await;

    let mut rx2 = deps.channel.subscribe("s2");
    pipeline::start_run(deps.clone(), "s2", second, ProblemVariant::Standard, None, None)
        .expect("admitted");
    let events = collect_run(&mut rx2).await;

    let last = events.last().expect("terminal event");
    match last {
        SessionEvent::Pipeline { event } => match &event.payload {
            EventPayload::Completed { problem, .. } => {
                assert!(problem.cache_hit);
                assert!(problem.problem_id.is_some());
            }
            other => panic!("expected Completed, got {other:?}"),
        },
        _ => unreachable!(),
    }

    // Only the first run paid a generation call; the hit bumped the
    // serve counter
    let served: i64 = sqlx::query_scalar("SELECT MAX(times_served) FROM problem_bank")
        .fetch_one(&deps.pool)
        .await
        .expect("query");
    assert_eq!(served, 1);
    assert_eq!(mock.generate_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recent_window_suppresses_repeats_for_same_learner() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;

    let mut rx = deps.channel.subscribe("s1");
    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    let events = collect_run(&mut rx).await;
    let first_id = match events.last().expect("terminal") {
        SessionEvent::Pipeline { event } => match &event.payload {
            EventPayload::Completed { problem, .. } => problem.problem_id.expect("cached"),
            other => panic!("expected Completed, got {other:?}"),
        },
        _ => unreachable!(),
    };

    // Record the serve in history so the dedup window sees it
    let turn = TurnResult {
        student_id: student.id,
        problem_id: Some(first_id),
        question: "What is 1 + 1?".to_string(),
        correct_answer: Some("2".to_string()),
        student_answer: "2".to_string(),
        is_correct: true,
        topic: Some("Addition".to_string()),
        requested_topic: None,
        weakness: None,
        scaffold_level: 0,
        scaffold_parent_id: None,
    };
    history::persist_turn_result(&deps.pool, &turn)
        .await
        .expect("persist");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student,
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    let events = collect_run(&mut rx).await;
    match events.last().expect("terminal") {
        SessionEvent::Pipeline { event } => match &event.payload {
            EventPayload::Completed { problem, .. } => {
                assert!(!problem.cache_hit, "windowed problem must not be re-served");
                assert_ne!(problem.problem_id, Some(first_id));
            }
            other => panic!("expected Completed, got {other:?}"),
        },
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn busy_session_rejects_concurrent_run() {
    let generator = MockGenerator {
        generate_delay_ms: 500,
        ..Default::default()
    };
    let (deps, _) = setup(generator, Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");

    let rejected = pipeline::start_run(
        deps.clone(),
        "s1",
        student,
        ProblemVariant::Standard,
        None,
        None,
    );
    assert!(matches!(rejected, Err(Error::PipelineBusy(_))));
}

#[tokio::test]
async fn rejected_admission_leaves_scaffold_context_armed() {
    let generator = MockGenerator {
        generate_delay_ms: 500,
        ..Default::default()
    };
    let (deps, _) = setup(generator, Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");

    deps.registry.set_scaffold(
        "s1",
        tutor_ps::registry::ScaffoldContext {
            topic: "Fractions".to_string(),
            misconception_type: Some("conceptual".to_string()),
            misconception_detail: None,
            scaffold_hint: None,
            level: 1,
            parent_history_id: Some(1),
            original_question: "What is 1/2 + 1/4?".to_string(),
        },
    );

    // The 409 path must not consume the armed remediation chain
    let rejected = pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    );
    assert!(matches!(rejected, Err(Error::PipelineBusy(_))));
    assert!(deps.registry.scaffold_of("s1").is_some());

    // An admitted standard run is what abandons it
    deps.registry.cancel("s1");
    pipeline::start_run(deps.clone(), "s1", student, ProblemVariant::Standard, None, None)
        .expect("re-admitted");
    assert!(deps.registry.scaffold_of("s1").is_none());
}

#[tokio::test]
async fn failed_diagnosis_sends_notice_instead_of_arming_scaffold() {
    let generator = MockGenerator {
        fail_diagnose: true,
        ..Default::default()
    };
    let (deps, _) = setup(generator, Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    collect_run(&mut rx).await;

    grading::start_grading(deps.clone(), "s1".to_string(), student, "5".to_string())
        .expect("grading started");

    match next_event(&mut rx).await {
        SessionEvent::Graded { is_correct, .. } => assert!(!is_correct),
        other => panic!("expected Graded, got {other:?}"),
    }
    // No ScaffoldReady follows; the client gets a notice instead
    match next_event(&mut rx).await {
        SessionEvent::ErrorMessage { message } => {
            assert!(message.contains("new problem"));
        }
        other => panic!("expected ErrorMessage, got {other:?}"),
    }
    assert!(deps.registry.scaffold_of("s1").is_none());
}

#[tokio::test]
async fn skip_cancels_run_and_frees_slot_immediately() {
    let generator = MockGenerator {
        generate_delay_ms: 2_000,
        ..Default::default()
    };
    let (deps, _) = setup(generator, Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");

    // Wait until the run is inside acquisition, then skip
    let first = next_event(&mut rx).await;
    match &first {
        SessionEvent::Pipeline { event } => assert_eq!(event.stage, Stage::Direction),
        other => panic!("unexpected event {other:?}"),
    }
    assert!(deps.registry.cancel("s1"));

    // The snapshot flips to Failed/Skipped synchronously
    let snapshot = deps.registry.status_of("s1").expect("snapshot");
    assert_eq!(snapshot.stage, Stage::Failed);
    assert_eq!(snapshot.error, Some(ErrorKind::Skipped));

    // The cancelled task still emits its own terminal event, in sequence
    let terminal = next_event(&mut rx).await;
    match terminal {
        SessionEvent::Pipeline { event } => {
            assert_eq!(event.sequence, 2);
            assert_eq!(event.stage, Stage::Failed);
            match event.payload {
                EventPayload::Failed { kind, .. } => assert_eq!(kind, ErrorKind::Skipped),
                other => panic!("expected Failed, got {other:?}"),
            }
        }
        other => panic!("unexpected event {other:?}"),
    }

    // And the slot is free for the next request
    pipeline::start_run(
        deps.clone(),
        "s1",
        student,
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("re-admitted after skip");
}

#[tokio::test]
async fn generation_failure_is_terminal_and_releases_slot() {
    let generator = MockGenerator {
        fail_generate: true,
        ..Default::default()
    };
    let (deps, _) = setup(generator, Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    let events = collect_run(&mut rx).await;

    assert_eq!(sequences(&events), vec![1, 2]);
    match events.last().expect("terminal") {
        SessionEvent::Pipeline { event } => {
            assert_eq!(event.stage, Stage::Failed);
            match &event.payload {
                EventPayload::Failed { kind, .. } => {
                    assert_eq!(*kind, ErrorKind::GenerationFailure)
                }
                other => panic!("expected Failed, got {other:?}"),
            }
        }
        _ => unreachable!(),
    }

    // Nothing entered the bank, and the session can run again
    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM problem_bank")
        .fetch_one(&deps.pool)
        .await
        .expect("query");
    assert_eq!(rows, 0);
    pipeline::start_run(deps.clone(), "s1", student, ProblemVariant::Standard, None, None)
        .expect("re-admitted after failure");
}

#[tokio::test]
async fn slow_stage_times_out() {
    let generator = MockGenerator {
        generate_delay_ms: 400,
        ..Default::default()
    };
    let config = Config {
        stage_timeout_secs: 0,
        ..Default::default()
    };
    let (deps, _) = setup(generator, config).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(deps.clone(), "s1", student, ProblemVariant::Standard, None, None)
        .expect("admitted");
    let events = collect_run(&mut rx).await;

    match events.last().expect("terminal") {
        SessionEvent::Pipeline { event } => {
            assert_eq!(event.stage, Stage::Failed);
            match &event.payload {
                EventPayload::Failed { kind, .. } => assert_eq!(*kind, ErrorKind::Timeout),
                other => panic!("expected Failed, got {other:?}"),
            }
        }
        _ => unreachable!(),
    }
    let snapshot = deps.registry.status_of("s1").expect("snapshot");
    assert_eq!(snapshot.error, Some(ErrorKind::Timeout));
}

#[tokio::test]
async fn scaffold_run_skips_direction_and_banks_scaffold_variant() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    let ctx = tutor_ps::registry::ScaffoldContext {
        topic: "Fractions".to_string(),
        misconception_type: Some("conceptual".to_string()),
        misconception_detail: Some("confused numerator and denominator".to_string()),
        scaffold_hint: Some("Draw the pieces".to_string()),
        level: 1,
        parent_history_id: None,
        original_question: "What is 1/2 + 1/4?".to_string(),
    };
    deps.registry.set_scaffold("s1", ctx.clone());

    pipeline::start_run(
        deps.clone(),
        "s1",
        student,
        ProblemVariant::Scaffold,
        None,
        Some(ctx),
    )
    .expect("admitted");
    let events = collect_run(&mut rx).await;

    assert_eq!(sequences(&events), vec![1, 2, 3]);
    match &events[0] {
        SessionEvent::Pipeline { event } => assert_eq!(event.stage, Stage::Acquisition),
        _ => unreachable!(),
    }
    match events.last().expect("terminal") {
        SessionEvent::Pipeline { event } => match &event.payload {
            EventPayload::Completed { problem, .. } => {
                assert_eq!(problem.variant, ProblemVariant::Scaffold);
                assert_eq!(problem.topic, "Fractions");
            }
            other => panic!("expected Completed, got {other:?}"),
        },
        _ => unreachable!(),
    }

    let variant: String = sqlx::query_scalar("SELECT variant FROM problem_bank LIMIT 1")
        .fetch_one(&deps.pool)
        .await
        .expect("query");
    assert_eq!(variant, "scaffold");
}

#[tokio::test]
async fn correct_answer_grades_and_persists() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    collect_run(&mut rx).await;

    // First generated problem is "What is 1 + 1?" with answer 2
    grading::start_grading(deps.clone(), "s1".to_string(), student.clone(), "2".to_string())
        .expect("grading started");
    let event = next_event(&mut rx).await;
    match event {
        SessionEvent::Graded {
            is_correct,
            scaffold_available,
            scaffold_complete,
            ..
        } => {
            assert!(is_correct);
            assert!(!scaffold_available);
            assert!(!scaffold_complete);
        }
        other => panic!("expected Graded, got {other:?}"),
    }

    let stats = history::get_stats(&deps.pool, student.id).await.expect("stats");
    assert_eq!(stats.total, 1);
    assert_eq!(stats.correct, 1);
}

#[tokio::test]
async fn wrong_answer_arms_scaffold_context() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    collect_run(&mut rx).await;

    grading::start_grading(deps.clone(), "s1".to_string(), student.clone(), "5".to_string())
        .expect("grading started");

    match next_event(&mut rx).await {
        SessionEvent::Graded {
            is_correct,
            scaffold_available,
            ..
        } => {
            assert!(!is_correct);
            assert!(scaffold_available);
        }
        other => panic!("expected Graded, got {other:?}"),
    }
    match next_event(&mut rx).await {
        SessionEvent::ScaffoldReady {
            misconception_type,
            scaffold_level,
            ..
        } => {
            assert_eq!(misconception_type, "computational");
            assert_eq!(scaffold_level, 1);
        }
        other => panic!("expected ScaffoldReady, got {other:?}"),
    }

    let ctx = deps.registry.scaffold_of("s1").expect("scaffold armed");
    assert_eq!(ctx.level, 1);
    assert!(ctx.parent_history_id.is_some());

    // The miss was diagnosed during grading; nothing left for analysis
    let miss = history::latest_undiagnosed_miss(&deps.pool, student.id)
        .await
        .expect("query");
    assert!(miss.is_none());
}

#[tokio::test]
async fn non_numeric_answer_is_rejected_without_persisting() {
    let (deps, _) = setup(MockGenerator::default(), Config::default()).await;
    let student = add_student(&deps, "Hyunji").await;
    let mut rx = deps.channel.subscribe("s1");

    pipeline::start_run(
        deps.clone(),
        "s1",
        student.clone(),
        ProblemVariant::Standard,
        None,
        None,
    )
    .expect("admitted");
    collect_run(&mut rx).await;

    grading::start_grading(deps.clone(), "s1".to_string(), student.clone(), "seven".to_string())
        .expect("grading started");
    match next_event(&mut rx).await {
        SessionEvent::ErrorMessage { message } => {
            assert!(message.contains("number"));
        }
        other => panic!("expected ErrorMessage, got {other:?}"),
    }

    let stats = history::get_stats(&deps.pool, student.id).await.expect("stats");
    assert_eq!(stats.total, 0);
}
