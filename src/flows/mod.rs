//! Generic multi-step flow engine.
//!
//! Drives any single-answer-per-turn wizard (onboarding quiz, check-in
//! flows) without flow-specific code paths. Session state is an explicit
//! `FlowSession` record, serialized per (user, flow kind) through a keyed
//! lock so two concurrent messages cannot corrupt the step index.

pub mod defs;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::config::{FlowsConfig, GamificationConfig};
use crate::error::{CoreError, ValidationReason};
use crate::gamify::GamificationLedger;
use crate::traits::{CheckinStore, DataStore, ProfileStore, SessionStore};
use crate::types::{Answer, AnswerEntry, FlowKind, FlowSession, GrantOutcome};

use defs::{flow_def, FlowDef, StepDef, StepKind};

/// What to do when a flow of the same kind is already active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPolicy {
    /// Replace the active session atomically (the default in §callers).
    Overwrite,
    /// Fail with `FlowAlreadyActive` instead.
    FailIfActive,
}

/// A rendered question for the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub flow: FlowKind,
    pub step_index: usize,
    pub total_steps: usize,
    pub text: String,
}

/// Outcome of a completed flow.
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub kind: FlowKind,
    pub archetype: Option<&'static str>,
    pub grant: GrantOutcome,
    pub message: String,
}

/// Result of one answer submission.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub done: bool,
    pub next_prompt: Option<Prompt>,
    pub outcome: Option<FlowOutcome>,
}

type LockKey = (String, FlowKind);

pub struct StepEngine {
    store: Arc<dyn DataStore>,
    ledger: Arc<GamificationLedger>,
    session_timeout: chrono::Duration,
    gamify_cfg: GamificationConfig,
    /// Per-(user, kind) write locks. Cross-user operations stay parallel.
    locks: tokio::sync::Mutex<HashMap<LockKey, Arc<tokio::sync::Mutex<()>>>>,
}

fn store_err(e: anyhow::Error) -> CoreError {
    CoreError::StoreUnavailable(e.to_string())
}

impl StepEngine {
    pub fn new(
        store: Arc<dyn DataStore>,
        ledger: Arc<GamificationLedger>,
        flows_cfg: &FlowsConfig,
        gamify_cfg: GamificationConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            session_timeout: chrono::Duration::minutes(flows_cfg.session_timeout_mins),
            gamify_cfg,
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, user_id: &str, kind: FlowKind) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry((user_id.to_string(), kind))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop the registry entry once nothing is waiting on it, so the map
    /// does not grow with every user that ever ran a flow.
    async fn evict_lock(&self, user_id: &str, kind: FlowKind) {
        let mut locks = self.locks.lock().await;
        let key = (user_id.to_string(), kind);
        if locks.get(&key).map(Arc::strong_count) == Some(1) {
            locks.remove(&key);
        }
    }

    #[cfg(test)]
    pub async fn lock_count(&self) -> usize {
        self.locks.lock().await.len()
    }

    /// The active (non-expired) session for (user, kind). An expired
    /// session is deleted here and reported as absent — stale state must
    /// never be silently resumed.
    pub async fn active_session(
        &self,
        user_id: &str,
        kind: FlowKind,
    ) -> Result<Option<FlowSession>, CoreError> {
        let session = self
            .store
            .get_session(user_id, kind)
            .await
            .map_err(store_err)?;
        match session {
            Some(s) if s.is_expired(self.session_timeout) => {
                debug!(user_id, kind = %kind, "expired session dropped");
                self.store
                    .delete_session(user_id, kind)
                    .await
                    .map_err(store_err)?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// The most recently active non-expired session of any kind, if one
    /// exists. Used by the orchestrator to decide flow vs. free chat.
    pub async fn any_active_session(
        &self,
        user_id: &str,
    ) -> Result<Option<FlowSession>, CoreError> {
        let sessions = self
            .store
            .sessions_for_user(user_id)
            .await
            .map_err(store_err)?;
        let mut best: Option<FlowSession> = None;
        for s in sessions {
            if s.is_expired(self.session_timeout) {
                self.store
                    .delete_session(user_id, s.kind)
                    .await
                    .map_err(store_err)?;
                continue;
            }
            if best
                .as_ref()
                .map(|b| s.last_activity > b.last_activity)
                .unwrap_or(true)
            {
                best = Some(s);
            }
        }
        Ok(best)
    }

    /// Start a flow. Default policy replaces any active session of the same
    /// kind (no merge); `FailIfActive` errors instead. The optional seed
    /// variant is recorded on the session for prompt-wording variants.
    pub async fn start_flow(
        &self,
        user_id: &str,
        kind: FlowKind,
        seed_variant: Option<&str>,
        policy: StartPolicy,
    ) -> Result<(FlowSession, Prompt), CoreError> {
        let lock = self.lock_for(user_id, kind).await;
        let _guard = lock.lock().await;

        if policy == StartPolicy::FailIfActive
            && self.active_session(user_id, kind).await?.is_some()
        {
            return Err(CoreError::FlowAlreadyActive(kind));
        }

        let session = FlowSession::new(user_id, kind).with_seed(seed_variant);
        self.store.put_session(&session).await.map_err(store_err)?;
        info!(user_id, kind = %kind, session_id = %session.id, "flow started");

        let def = flow_def(kind);
        let prompt = render_prompt(def, 0);
        Ok((session, prompt))
    }

    /// Pure projection of the session's step index onto the flow's step
    /// list. Never mutates state.
    pub fn current_prompt(&self, session: &FlowSession) -> Prompt {
        render_prompt(flow_def(session.kind), session.current_step)
    }

    /// Prompt for the active session, if any. An expired session behaves as
    /// if no flow were active.
    pub async fn active_prompt(
        &self,
        user_id: &str,
        kind: FlowKind,
    ) -> Result<Option<Prompt>, CoreError> {
        Ok(self
            .active_session(user_id, kind)
            .await?
            .map(|s| self.current_prompt(&s)))
    }

    /// Validate and record one answer. On validation failure the session is
    /// not mutated and the caller re-prompts with the same step.
    pub async fn submit_answer(
        &self,
        user_id: &str,
        kind: FlowKind,
        raw_input: &str,
    ) -> Result<StepResult, CoreError> {
        let result = {
            let lock = self.lock_for(user_id, kind).await;
            let _guard = lock.lock().await;
            self.submit_answer_locked(user_id, kind, raw_input).await
        };
        if matches!(&result, Ok(r) if r.done) {
            self.evict_lock(user_id, kind).await;
        }
        result
    }

    async fn submit_answer_locked(
        &self,
        user_id: &str,
        kind: FlowKind,
        raw_input: &str,
    ) -> Result<StepResult, CoreError> {
        let mut session = self
            .active_session(user_id, kind)
            .await?
            .ok_or(CoreError::FlowExpired)?;

        let def = flow_def(kind);
        let step = def
            .steps
            .get(session.current_step)
            .ok_or(CoreError::FlowExpired)?;

        let answer = validate_answer(step, raw_input)?;

        session.answers.push(AnswerEntry {
            key: step.key.to_string(),
            answer,
        });
        session.current_step += 1;
        session.last_activity = Utc::now();
        self.store.put_session(&session).await.map_err(store_err)?;

        if session.current_step >= def.steps.len() {
            let outcome = self.complete_flow(def, &session).await?;
            return Ok(StepResult {
                done: true,
                next_prompt: None,
                outcome: Some(outcome),
            });
        }

        Ok(StepResult {
            done: false,
            next_prompt: Some(render_prompt(def, session.current_step)),
            outcome: None,
        })
    }

    /// Delete the session unconditionally. No error if none exists.
    pub async fn cancel_flow(&self, user_id: &str, kind: FlowKind) -> Result<(), CoreError> {
        {
            let lock = self.lock_for(user_id, kind).await;
            let _guard = lock.lock().await;
            self.store
                .delete_session(user_id, kind)
                .await
                .map_err(store_err)?;
        }
        self.evict_lock(user_id, kind).await;
        info!(user_id, kind = %kind, "flow cancelled");
        Ok(())
    }

    /// Completion side effects: onboarding classifies and grants; check-ins
    /// record an event and grant. Grants are idempotent per session id, and
    /// the completed flag is checked-and-set so a replay runs nothing twice.
    async fn complete_flow(
        &self,
        def: &FlowDef,
        session: &FlowSession,
    ) -> Result<FlowOutcome, CoreError> {
        let newly_completed = self
            .store
            .mark_session_completed(&session.id)
            .await
            .map_err(store_err)?;
        let dedupe_key = format!("flow:{}", session.id);

        let mut archetype = None;
        if newly_completed {
            match def.kind {
                FlowKind::Onboarding => {
                    let answers = defs::answers_to_map(&session.answers);
                    let label = crate::archetype::classify(&answers);
                    self.store
                        .merge_quiz_answers(&session.user_id, &answers)
                        .await
                        .map_err(store_err)?;
                    self.store
                        .set_archetype(&session.user_id, label)
                        .await
                        .map_err(store_err)?;
                    info!(user_id = %session.user_id, archetype = label, "onboarding classified");
                    archetype = Some(label);
                }
                _ => {
                    if let Some(event) =
                        defs::checkin_event(def.kind, &session.user_id, &session.answers)
                    {
                        self.store.record_checkin(&event).await.map_err(store_err)?;
                        info!(
                            user_id = %session.user_id,
                            checkin = event.kind.as_str(),
                            "check-in recorded"
                        );
                    }
                }
            }
        }

        let (amount, reason) = match def.kind {
            FlowKind::Onboarding => (self.gamify_cfg.onboarding_bonus, "onboarding_complete"),
            _ => (self.gamify_cfg.checkin_bonus, "checkin_complete"),
        };
        let grant = self
            .ledger
            .grant(&session.user_id, amount, reason, Some(&dedupe_key))
            .await
            .map_err(store_err)?;

        self.store
            .delete_session(&session.user_id, def.kind)
            .await
            .map_err(store_err)?;

        let mut message = def.completion_text.to_string();
        message.push_str(&format!(" +{} XP", amount));
        if grant.leveled_up {
            message.push_str(&format!(" — level {}!", grant.new_level));
        }

        Ok(FlowOutcome {
            kind: def.kind,
            archetype,
            grant,
            message,
        })
    }
}

fn render_prompt(def: &FlowDef, step_index: usize) -> Prompt {
    let step = &def.steps[step_index.min(def.steps.len() - 1)];
    let mut text = String::new();
    if step_index == 0 {
        text.push_str(def.intro);
        text.push_str("\n\n");
    }
    text.push_str(step.prompt);
    match &step.kind {
        StepKind::Choice {
            options,
            allow_custom_text,
            max_selections,
            ..
        } => {
            for (i, opt) in options.iter().enumerate() {
                text.push_str(&format!("\n{}) {}", i + 1, opt));
            }
            if *max_selections > 1 {
                text.push_str(&format!(
                    "\n(up to {}, comma-separated)",
                    max_selections
                ));
            }
            if *allow_custom_text {
                text.push_str("\n(or type your own)");
            }
        }
        StepKind::NumericRange { min, max } => {
            text.push_str(&format!(" ({}-{})", min, max));
        }
        StepKind::FreeText { .. } => {}
    }
    Prompt {
        flow: def.kind,
        step_index,
        total_steps: def.steps.len(),
        text,
    }
}

/// Validate a raw answer against one step's contract. Pure.
///
/// Choice resolution tie-break, in fixed priority order: 1-based numeric
/// index into the displayed options, then case-insensitive exact label
/// match, then literal custom text when the step allows it.
fn validate_answer(step: &StepDef, raw_input: &str) -> Result<Answer, CoreError> {
    match &step.kind {
        StepKind::Choice {
            options,
            allow_custom_text,
            min_selections,
            max_selections,
        } => {
            let tokens: Vec<&str> = raw_input
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
            if tokens.is_empty() {
                return Err(CoreError::Validation(ValidationReason::EmptyAnswer));
            }

            let mut resolved: Vec<String> = Vec::new();
            for token in tokens {
                let selection = if let Ok(idx) = token.parse::<usize>() {
                    if idx >= 1 && idx <= options.len() {
                        options[idx - 1].to_string()
                    } else if *allow_custom_text {
                        token.to_string()
                    } else {
                        return Err(CoreError::Validation(ValidationReason::NotAnOption {
                            input: token.to_string(),
                        }));
                    }
                } else if let Some(label) = options
                    .iter()
                    .find(|o| o.eq_ignore_ascii_case(token))
                {
                    label.to_string()
                } else if *allow_custom_text {
                    token.to_string()
                } else {
                    return Err(CoreError::Validation(ValidationReason::NotAnOption {
                        input: token.to_string(),
                    }));
                };
                if !resolved.iter().any(|r| r.eq_ignore_ascii_case(&selection)) {
                    resolved.push(selection);
                }
            }

            if resolved.len() < *min_selections {
                return Err(CoreError::Validation(ValidationReason::TooFewSelections {
                    min: *min_selections,
                }));
            }
            // Saturating, not rejecting: extra selections are dropped in
            // input order rather than failing the whole submission.
            resolved.truncate(*max_selections);
            Ok(Answer::Selections(resolved))
        }
        StepKind::FreeText {
            skippable,
            validator,
        } => {
            let trimmed = raw_input.trim();
            if trimmed.is_empty() || trimmed == "-" {
                return if *skippable {
                    Ok(Answer::Skipped)
                } else {
                    Err(CoreError::Validation(ValidationReason::EmptyAnswer))
                };
            }
            if let Some(check) = validator {
                if let Err(hint) = check(trimmed) {
                    return Err(CoreError::Validation(
                        ValidationReason::RejectedByValidator { hint },
                    ));
                }
            }
            Ok(Answer::Text(trimmed.to_string()))
        }
        StepKind::NumericRange { min, max } => {
            let n: i64 = raw_input
                .trim()
                .parse()
                .map_err(|_| CoreError::Validation(ValidationReason::NotANumber))?;
            if n < *min || n > *max {
                return Err(CoreError::Validation(ValidationReason::OutOfRange {
                    min: *min,
                    max: *max,
                }));
            }
            Ok(Answer::Number(n))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn choice_step(
        options: &'static [&'static str],
        allow_custom_text: bool,
        min: usize,
        max: usize,
    ) -> StepDef {
        StepDef {
            key: "test",
            prompt: "pick",
            kind: StepKind::Choice {
                options,
                allow_custom_text,
                min_selections: min,
                max_selections: max,
            },
        }
    }

    #[test]
    fn numeric_index_beats_label_match() {
        // "2" is both a valid index (-> "Blue") and an exact label
        // (options[0]). Index wins by the documented tie-break.
        let step = choice_step(&["2", "Blue"], false, 1, 1);
        assert_eq!(
            validate_answer(&step, "2").unwrap(),
            Answer::Selections(vec!["Blue".into()])
        );
    }

    #[test]
    fn label_match_is_case_insensitive() {
        let step = choice_step(&["Cardio", "Strength"], false, 1, 1);
        assert_eq!(
            validate_answer(&step, "cardio").unwrap(),
            Answer::Selections(vec!["Cardio".into()])
        );
    }

    #[test]
    fn custom_text_only_when_allowed() {
        let open = choice_step(&["Cardio"], true, 1, 1);
        assert_eq!(
            validate_answer(&open, "swimming").unwrap(),
            Answer::Selections(vec!["swimming".into()])
        );

        let closed = choice_step(&["Cardio"], false, 1, 1);
        assert!(matches!(
            validate_answer(&closed, "swimming"),
            Err(CoreError::Validation(ValidationReason::NotAnOption { .. }))
        ));
    }

    #[test]
    fn max_selections_saturates_instead_of_rejecting() {
        let step = choice_step(&["A", "B", "C", "D", "E"], false, 1, 3);
        assert_eq!(
            validate_answer(&step, "1, 2, 3, 4, 5").unwrap(),
            Answer::Selections(vec!["A".into(), "B".into(), "C".into()])
        );
    }

    #[test]
    fn duplicate_selections_collapse() {
        let step = choice_step(&["A", "B"], false, 1, 2);
        assert_eq!(
            validate_answer(&step, "1, a, A").unwrap(),
            Answer::Selections(vec!["A".into()])
        );
    }

    #[test]
    fn numeric_range_bounds_are_inclusive() {
        let step = StepDef {
            key: "n",
            prompt: "num",
            kind: StepKind::NumericRange { min: 1, max: 10 },
        };
        assert_eq!(validate_answer(&step, "1").unwrap(), Answer::Number(1));
        assert_eq!(validate_answer(&step, "10").unwrap(), Answer::Number(10));
        assert!(matches!(
            validate_answer(&step, "11"),
            Err(CoreError::Validation(ValidationReason::OutOfRange { .. }))
        ));
        assert!(matches!(
            validate_answer(&step, "abc"),
            Err(CoreError::Validation(ValidationReason::NotANumber))
        ));
    }

    #[test]
    fn empty_free_text_skips_only_when_skippable() {
        let skippable = StepDef {
            key: "t",
            prompt: "say",
            kind: StepKind::FreeText {
                skippable: true,
                validator: None,
            },
        };
        assert_eq!(validate_answer(&skippable, "   ").unwrap(), Answer::Skipped);
        assert_eq!(validate_answer(&skippable, "-").unwrap(), Answer::Skipped);

        let required = StepDef {
            key: "t",
            prompt: "say",
            kind: StepKind::FreeText {
                skippable: false,
                validator: None,
            },
        };
        assert!(matches!(
            validate_answer(&required, ""),
            Err(CoreError::Validation(ValidationReason::EmptyAnswer))
        ));
    }

    #[test]
    fn prompt_rendering_lists_numbered_options() {
        let def = flow_def(FlowKind::CheckinWorkout);
        let prompt = render_prompt(def, 0);
        assert!(prompt.text.contains("1) Cardio"));
        assert!(prompt.text.contains("(or type your own)"));
        assert_eq!(prompt.total_steps, 4);
    }
}
