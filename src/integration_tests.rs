//! End-to-end tests that wire the real engine, ledger, metrics, and context
//! assembler against an in-memory SQLite store, with a canned model provider
//! standing in for the network.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;

use crate::config::{ChatConfig, ContextConfig, FlowsConfig, GamificationConfig, MetricsConfig};
use crate::context::ContextAssembler;
use crate::error::CoreError;
use crate::flows::{StartPolicy, StepEngine};
use crate::gamify::GamificationLedger;
use crate::metrics::MetricsEngine;
use crate::orchestrator::{Orchestrator, FALLBACK_REPLY};
use crate::state::SqliteStore;
use crate::traits::{
    CheckinStore, DataStore, GoalStore, MessageStore, ModelProvider, ProfileStore, SessionStore,
    TaskStore, TransactionStore,
};
use crate::types::{
    CheckinType, CheckinValue, ConversationTurn, FlowKind, FlowSession, Goal, Task, Transaction,
    UserProfile,
};

struct CannedProvider {
    reply: Option<&'static str>,
}

#[async_trait]
impl ModelProvider for CannedProvider {
    async fn chat(&self, _system: &str, _context: &str, _user: &str) -> anyhow::Result<String> {
        self.reply
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("provider down"))
    }
}

async fn mem_store() -> Arc<dyn DataStore> {
    Arc::new(SqliteStore::in_memory().await.unwrap())
}

fn mk_engine(store: &Arc<dyn DataStore>) -> Arc<StepEngine> {
    let ledger = Arc::new(GamificationLedger::new(store.clone()));
    Arc::new(StepEngine::new(
        store.clone(),
        ledger,
        &FlowsConfig::default(),
        GamificationConfig::default(),
    ))
}

fn mk_orchestrator(store: &Arc<dyn DataStore>, reply: Option<&'static str>) -> Orchestrator {
    let metrics = Arc::new(MetricsEngine::new(store.clone(), MetricsConfig::default()));
    let assembler = Arc::new(ContextAssembler::new(
        store.clone(),
        metrics.clone(),
        ContextConfig::default(),
    ));
    Orchestrator::new(
        store.clone(),
        mk_engine(store),
        assembler,
        metrics,
        Arc::new(CannedProvider { reply }),
        &ChatConfig::default(),
    )
}

#[tokio::test]
async fn onboarding_completes_classifies_and_grants() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    engine
        .start_flow("u1", FlowKind::Onboarding, None, StartPolicy::Overwrite)
        .await
        .unwrap();

    // goal=income, structured, morning, good sleep, 5 workouts, two
    // blockers, grow income, skipped motivation.
    let answers = ["4", "1", "1", "2", "5", "1,2", "1", "-"];
    let mut last = None;
    for answer in answers {
        last = Some(
            engine
                .submit_answer("u1", FlowKind::Onboarding, answer)
                .await
                .unwrap(),
        );
    }

    let result = last.unwrap();
    assert!(result.done);
    let outcome = result.outcome.unwrap();
    assert_eq!(outcome.archetype, Some("hustler"));
    assert_eq!(outcome.grant.new_xp, 100);
    assert_eq!(outcome.grant.new_level, 2);
    assert!(outcome.grant.leveled_up);
    assert!(outcome.message.contains("+100 XP"));

    let profile = store.get_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.archetype.as_deref(), Some("hustler"));
    assert_eq!(profile.xp, 100);
    assert_eq!(profile.level, 2);
    assert_eq!(profile.quiz_answers["training_frequency"], json!(5));
    assert_eq!(
        profile.quiz_answers["primary_goal"],
        json!(["Grow my income"])
    );
    assert_eq!(profile.quiz_answers["motivation"], json!({ "skipped": true }));

    // The session is gone once the flow completes.
    assert!(engine.any_active_session("u1").await.unwrap().is_none());
}

#[tokio::test]
async fn completion_grant_is_idempotent_per_session() {
    let store = mem_store().await;
    let ledger = GamificationLedger::new(store.clone());

    let first = ledger
        .grant("u1", 25, "checkin_complete", Some("flow:s1"))
        .await
        .unwrap();
    assert_eq!(first.new_xp, 25);

    let replay = ledger
        .grant("u1", 25, "checkin_complete", Some("flow:s1"))
        .await
        .unwrap();
    assert_eq!(replay.new_xp, 25);
    assert!(!replay.leveled_up);

    let profile = store.get_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.xp, 25);
}

#[tokio::test]
async fn workout_checkin_records_one_structured_event() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    engine
        .start_flow("u1", FlowKind::CheckinWorkout, None, StartPolicy::Overwrite)
        .await
        .unwrap();
    for answer in ["1", "45", "3", "-"] {
        engine
            .submit_answer("u1", FlowKind::CheckinWorkout, answer)
            .await
            .unwrap();
    }

    let events = store
        .recent_checkins("u1", CheckinType::Workout, 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].value,
        CheckinValue::Workout {
            kind: "cardio".to_string(),
            duration_minutes: 45,
            intensity: "high".to_string(),
        }
    );
    assert_eq!(events[0].note, None);

    let profile = store.get_profile("u1").await.unwrap().unwrap();
    assert_eq!(profile.xp, 25);
}

#[tokio::test]
async fn metrics_are_neutral_without_any_data() {
    let store = mem_store().await;
    let metrics = MetricsEngine::new(store, MetricsConfig::default());
    let snapshot = metrics.snapshot("nobody").await.unwrap();
    for metric in snapshot.all() {
        assert_eq!(metric.value, 50.0, "{} should default neutral", metric.name);
        assert_eq!(metric.sample_count, 0);
    }
}

#[tokio::test]
async fn expired_session_reads_as_absent_and_is_deleted() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    let mut session = FlowSession::new("u1", FlowKind::CheckinMood);
    session.last_activity = Utc::now() - Duration::minutes(31);
    store.put_session(&session).await.unwrap();

    assert!(engine
        .active_session("u1", FlowKind::CheckinMood)
        .await
        .unwrap()
        .is_none());
    // Expiry also cleans up the row.
    assert!(store
        .get_session("u1", FlowKind::CheckinMood)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn invalid_answers_do_not_advance_the_flow() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    engine
        .start_flow("u1", FlowKind::CheckinMood, None, StartPolicy::Overwrite)
        .await
        .unwrap();

    let err = engine
        .submit_answer("u1", FlowKind::CheckinMood, "eleven")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let err = engine
        .submit_answer("u1", FlowKind::CheckinMood, "11")
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let session = engine
        .active_session("u1", FlowKind::CheckinMood)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.current_step, 0);

    let result = engine
        .submit_answer("u1", FlowKind::CheckinMood, "7")
        .await
        .unwrap();
    assert!(!result.done);
    assert_eq!(result.next_prompt.unwrap().step_index, 1);
}

#[tokio::test]
async fn starting_a_flow_again_replaces_the_old_session() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    engine
        .start_flow("u1", FlowKind::CheckinMood, None, StartPolicy::Overwrite)
        .await
        .unwrap();
    engine
        .submit_answer("u1", FlowKind::CheckinMood, "7")
        .await
        .unwrap();

    // Restart: progress resets to step zero.
    let (session, _) = engine
        .start_flow("u1", FlowKind::CheckinMood, None, StartPolicy::Overwrite)
        .await
        .unwrap();
    assert_eq!(session.current_step, 0);
    assert!(session.answers.is_empty());

    let err = engine
        .start_flow("u1", FlowKind::CheckinMood, None, StartPolicy::FailIfActive)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::FlowAlreadyActive(_)));
}

#[tokio::test]
async fn seed_variant_is_recorded_on_the_session() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    let (session, _) = engine
        .start_flow("u1", FlowKind::CheckinMood, Some("evening"), StartPolicy::Overwrite)
        .await
        .unwrap();
    assert_eq!(session.seed_variant.as_deref(), Some("evening"));

    // Survives the round-trip through the store.
    let stored = engine
        .active_session("u1", FlowKind::CheckinMood)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.seed_variant.as_deref(), Some("evening"));

    let (unseeded, _) = engine
        .start_flow("u1", FlowKind::CheckinEnergy, None, StartPolicy::Overwrite)
        .await
        .unwrap();
    assert!(unseeded.seed_variant.is_none());
}

#[tokio::test]
async fn lock_registry_does_not_grow_past_finished_flows() {
    let store = mem_store().await;
    let engine = mk_engine(&store);

    engine
        .start_flow("u1", FlowKind::CheckinMood, None, StartPolicy::Overwrite)
        .await
        .unwrap();
    engine
        .submit_answer("u1", FlowKind::CheckinMood, "7")
        .await
        .unwrap();
    let done = engine
        .submit_answer("u1", FlowKind::CheckinMood, "-")
        .await
        .unwrap();
    assert!(done.done);
    assert_eq!(engine.lock_count().await, 0);

    engine
        .start_flow("u2", FlowKind::CheckinEnergy, None, StartPolicy::Overwrite)
        .await
        .unwrap();
    engine
        .cancel_flow("u2", FlowKind::CheckinEnergy)
        .await
        .unwrap();
    assert_eq!(engine.lock_count().await, 0);
}

#[tokio::test]
async fn orchestrator_routes_plain_text_into_the_active_flow() {
    let store = mem_store().await;
    let orchestrator = mk_orchestrator(&store, Some("chat reply"));

    let prompt = orchestrator.handle_message("7", "/checkin mood").await;
    assert!(prompt.contains("1-10"));

    let note_prompt = orchestrator.handle_message("7", "7").await;
    assert!(note_prompt.contains("note"));

    let done = orchestrator.handle_message("7", "-").await;
    assert!(done.contains("Mood logged"));
    assert!(done.contains("+25 XP"));

    // Flow finished; plain text goes back to free chat.
    let chat = orchestrator.handle_message("7", "how am I doing?").await;
    assert_eq!(chat, "chat reply");
}

#[tokio::test]
async fn orchestrator_reprompts_on_invalid_flow_input() {
    let store = mem_store().await;
    let orchestrator = mk_orchestrator(&store, None);

    orchestrator.handle_message("7", "/checkin energy").await;
    let reply = orchestrator.handle_message("7", "lots").await;
    // Explanation plus the same question again.
    assert!(reply.contains("number"));
    assert!(reply.contains("1-10"));
}

#[tokio::test]
async fn orchestrator_degrades_to_fallback_when_provider_fails() {
    let store = mem_store().await;
    let orchestrator = mk_orchestrator(&store, None);

    let reply = orchestrator.handle_message("7", "hello").await;
    assert_eq!(reply, FALLBACK_REPLY);
}

#[tokio::test]
async fn free_chat_turns_are_logged_for_future_context() {
    let store = mem_store().await;
    let orchestrator = mk_orchestrator(&store, Some("Sure thing."));

    let reply = orchestrator.handle_message("7", "hello").await;
    assert_eq!(reply, "Sure thing.");

    let turns = store.recent_turns("7", 10).await.unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, "assistant");
    assert_eq!(turns[1].role, "user");
    assert_eq!(turns[1].content, "hello");
}

#[tokio::test]
async fn context_sections_come_back_in_fixed_priority_order() {
    let store = mem_store().await;

    let mut profile = UserProfile::new("u1");
    profile.archetype = Some("hustler".to_string());
    profile
        .quiz_answers
        .insert("primary_goal".to_string(), json!(["Grow my income"]));
    store.upsert_profile(&profile).await.unwrap();

    store
        .append_turn(&ConversationTurn::new("u1", "user", "hi"))
        .await
        .unwrap();
    store
        .add_task(&Task {
            id: "t1".to_string(),
            user_id: "u1".to_string(),
            title: "ship the report".to_string(),
            priority: 3,
            due_at: None,
            completed_at: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .add_goal(&Goal {
            id: "g1".to_string(),
            user_id: "u1".to_string(),
            description: "run a marathon".to_string(),
            status: "active".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    store
        .add_transaction(&Transaction {
            id: "x1".to_string(),
            user_id: "u1".to_string(),
            amount: 1200.0,
            description: "invoice".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();

    let metrics = Arc::new(MetricsEngine::new(store.clone(), MetricsConfig::default()));
    let assembler = ContextAssembler::new(store.clone(), metrics, ContextConfig::default());

    let payload = assembler.assemble("u1", "how am I doing?").await.unwrap();
    let labels: Vec<&str> = payload.sections.iter().map(|s| s.label).collect();
    assert_eq!(
        labels,
        vec![
            "Profile",
            "Quiz answers",
            "Recent conversation",
            "Performance signals",
            "Pending tasks",
            "Active goals",
            "Finances",
        ]
    );
    assert!(payload.sections[0].text.contains("hustler"));

    // Identical data renders identical bytes.
    let again = assembler.assemble("u1", "how am I doing?").await.unwrap();
    assert_eq!(payload.render(), again.render());
}

#[tokio::test]
async fn context_for_a_new_user_has_only_mandatory_sections() {
    let store = mem_store().await;
    let metrics = Arc::new(MetricsEngine::new(store.clone(), MetricsConfig::default()));
    let assembler = ContextAssembler::new(store.clone(), metrics, ContextConfig::default());

    let payload = assembler.assemble("stranger", "hi").await.unwrap();
    let labels: Vec<&str> = payload.sections.iter().map(|s| s.label).collect();
    assert_eq!(labels, vec!["Profile", "Performance signals"]);
    assert!(payload.sections[0].text.contains("New user"));
}
