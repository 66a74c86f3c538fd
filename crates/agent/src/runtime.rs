use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use toolgate_core::approvals::{ApprovalDecision, ApprovalGate};
use toolgate_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use toolgate_core::catalog::ToolCatalog;
use toolgate_core::config::AgentConfig;
use toolgate_core::conversation::{resulted_call_ids, ConversationStats};
use toolgate_core::domain::{
    Checkpoint, ConversationState, Message, PendingApproval, ThreadId, ToolCall, ToolClaim,
};
use toolgate_core::errors::{ApplicationError, DomainError};
use toolgate_core::flows::{FlowEngine, FlowEvent, FlowState, FlowTransitionError};
use toolgate_db::{CheckpointStore, RepositoryError};

use crate::executor::ToolExecutor;
use crate::intent::IntentFilter;
use crate::llm::{LlmClient, LlmError};
use crate::response::ResponseGenerator;
use crate::tools::{ToolOutcome, ToolRegistry};

const ACTOR: &str = "orchestrator";
/// Slack on top of the tool timeout before a claimed call is presumed abandoned.
const CLAIM_GRACE_SECS: u64 = 10;

/// Incremental output of a turn, in the order it happened.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnEvent {
    Content(String),
    ToolStarted { call_id: String, tool_name: String },
    SuspendedForApproval { calls: Vec<ToolCall> },
    Done { answer: String },
}

pub type TurnEvents = mpsc::UnboundedSender<TurnEvent>;

/// Where a turn invocation left the thread.
#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Done { answer: String },
    Suspended { calls: Vec<ToolCall> },
}

#[derive(Clone, Debug)]
pub enum TurnInput {
    Resume,
    Message(String),
    Decision(ApprovalDecision),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("thread `{0}` already has a turn in progress")]
    TurnInProgress(ThreadId),
    #[error("thread `{0}` not found")]
    ThreadNotFound(ThreadId),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
}

impl From<OrchestratorError> for ApplicationError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::TurnInProgress(thread) => {
                Self::Domain(DomainError::TurnInProgress(thread.to_string()))
            }
            OrchestratorError::ThreadNotFound(thread) => {
                Self::Domain(DomainError::InvariantViolation(format!("unknown thread `{thread}`")))
            }
            OrchestratorError::Transition(error) => Self::Domain(DomainError::FlowTransition(error)),
            OrchestratorError::Repository(error) => Self::Persistence(error.to_string()),
            OrchestratorError::Llm(error) => Self::Integration(error.to_string()),
        }
    }
}

/// Drives each thread through the turn state machine, checkpointing every transition.
pub struct Orchestrator {
    store: Arc<dyn CheckpointStore>,
    catalog: ToolCatalog,
    intent: IntentFilter,
    responder: ResponseGenerator,
    executor: ToolExecutor,
    gate: ApprovalGate,
    engine: FlowEngine,
    audit: Arc<dyn AuditSink>,
    approval_by_default: bool,
    claim_lease: chrono::Duration,
    thread_locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

/// A thread's working state and the checkpoint sequence it was read from or last saved as.
/// Every commit is conditional on that sequence still being the latest.
struct Session {
    thread_id: ThreadId,
    sequence: u64,
    state: ConversationState,
}

impl Orchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        registry: ToolRegistry,
        store: Arc<dyn CheckpointStore>,
        settings: &AgentConfig,
    ) -> Self {
        let catalog = registry.catalog();
        Self {
            store,
            catalog,
            intent: IntentFilter::new(
                llm.clone(),
                settings.max_schema_retries,
                settings.intent_classifier_turns,
            ),
            responder: ResponseGenerator::new(llm, settings.max_schema_retries),
            executor: ToolExecutor::new(registry, Duration::from_secs(settings.tool_timeout_secs)),
            gate: ApprovalGate::new(settings.tools_requiring_approval.iter().cloned()),
            engine: FlowEngine::new(),
            audit: Arc::new(TracingAuditSink),
            approval_by_default: false,
            claim_lease: i64::try_from(settings.tool_timeout_secs.saturating_add(CLAIM_GRACE_SECS))
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
            thread_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Approval setting for threads created by this orchestrator.
    pub fn with_approval_by_default(mut self, enabled: bool) -> Self {
        self.approval_by_default = enabled;
        self
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// Starts a turn with `message`, or continues the thread from its last checkpoint.
    pub async fn start_or_resume_turn(
        &self,
        thread_id: &ThreadId,
        message: Option<String>,
        events: &TurnEvents,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let lock = self.thread_lock(thread_id);
        let outcome = match lock.try_lock() {
            Ok(_guard) => self.run_turn(thread_id, message, events).await,
            Err(_) => Err(OrchestratorError::TurnInProgress(thread_id.clone())),
        };
        self.release_lock(thread_id, lock);
        outcome
    }

    /// Resumes a suspended thread with a human decision. Not suspended means nothing to decide:
    /// an at-rest thread reports its current outcome unchanged, any other phase just resumes.
    pub async fn submit_approval_decision(
        &self,
        thread_id: &ThreadId,
        decision: ApprovalDecision,
        events: &TurnEvents,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let lock = self.thread_lock(thread_id);
        let outcome = match lock.try_lock() {
            Ok(_guard) => self.apply_decision(thread_id, decision, events).await,
            Err(_) => Err(OrchestratorError::TurnInProgress(thread_id.clone())),
        };
        self.release_lock(thread_id, lock);
        outcome
    }

    /// Runs the turn on a background task, streaming its events through the returned receiver.
    pub fn stream(
        self: &Arc<Self>,
        thread_id: ThreadId,
        input: TurnInput,
    ) -> (mpsc::UnboundedReceiver<TurnEvent>, JoinHandle<Result<TurnOutcome, OrchestratorError>>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move {
            match input {
                TurnInput::Resume => orchestrator.start_or_resume_turn(&thread_id, None, &sender).await,
                TurnInput::Message(text) => {
                    orchestrator.start_or_resume_turn(&thread_id, Some(text), &sender).await
                }
                TurnInput::Decision(decision) => {
                    orchestrator.submit_approval_decision(&thread_id, decision, &sender).await
                }
            }
        });
        (receiver, handle)
    }

    /// Applies from the next tool-producing response on. Creates the thread when unknown.
    pub async fn set_approval_enabled(
        &self,
        thread_id: &ThreadId,
        enabled: bool,
    ) -> Result<ConversationState, OrchestratorError> {
        let lock = self.thread_lock(thread_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.update(thread_id, true, |state| state.human_approval_enabled = enabled).await
        };
        self.release_lock(thread_id, lock);
        outcome
    }

    pub async fn set_title(
        &self,
        thread_id: &ThreadId,
        title: impl Into<String>,
    ) -> Result<ConversationState, OrchestratorError> {
        let title = title.into();
        let lock = self.thread_lock(thread_id);
        let outcome = {
            let _guard = lock.lock().await;
            self.update(thread_id, false, |state| state.title = Some(title)).await
        };
        self.release_lock(thread_id, lock);
        outcome
    }

    pub async fn get_state(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Option<ConversationState>, OrchestratorError> {
        Ok(self.load(thread_id).await?.map(|session| session.state))
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadId>, OrchestratorError> {
        Ok(self.store.list_threads().await?)
    }

    pub async fn history(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, OrchestratorError> {
        Ok(self.store.history(thread_id).await?)
    }

    pub async fn stats(&self, thread_id: &ThreadId) -> Result<ConversationStats, OrchestratorError> {
        let Some(session) = self.load(thread_id).await? else {
            return Err(OrchestratorError::ThreadNotFound(thread_id.clone()));
        };
        Ok(ConversationStats::from_messages(&session.state.messages))
    }

    async fn run_turn(
        &self,
        thread_id: &ThreadId,
        message: Option<String>,
        events: &TurnEvents,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let audit = AuditContext::for_thread(thread_id.as_str(), ACTOR);
        let mut session = self.load_or_new(thread_id).await?;

        if let Some(text) = message {
            if !session.state.accepts_new_message() {
                warn!(
                    event_name = "orchestrator.turn.rejected",
                    thread_id = %thread_id,
                    phase = session.state.phase.as_str(),
                    "new message while a turn is in progress"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        &audit,
                        "turn.message_received",
                        AuditCategory::Ingress,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("phase", session.state.phase.as_str()),
                );
                return Err(OrchestratorError::TurnInProgress(thread_id.clone()));
            }
            session.state.push_user_message(text);
            session.state.allowed_tools.clear();
            session.state.pending_approval = PendingApproval::none();
            self.advance(&mut session.state, FlowEvent::UserMessageReceived, &audit)?;
            self.commit(&mut session, &audit).await?;
            self.audit.emit(AuditEvent::from_context(
                &audit,
                "turn.message_received",
                AuditCategory::Ingress,
                AuditOutcome::Success,
            ));
            info!(
                event_name = "orchestrator.turn.started",
                thread_id = %thread_id,
                correlation_id = %audit.correlation_id,
                "turn started"
            );
        }

        self.drive(&mut session, events, &audit).await
    }

    async fn apply_decision(
        &self,
        thread_id: &ThreadId,
        decision: ApprovalDecision,
        events: &TurnEvents,
    ) -> Result<TurnOutcome, OrchestratorError> {
        let audit = AuditContext::for_thread(thread_id.as_str(), ACTOR);
        let Some(mut session) = self.load(thread_id).await? else {
            return Err(OrchestratorError::ThreadNotFound(thread_id.clone()));
        };

        if session.state.phase != FlowState::SuspendedForApproval {
            debug!(
                event_name = "orchestrator.decision.ignored",
                thread_id = %thread_id,
                phase = session.state.phase.as_str(),
                "decision submitted while not suspended"
            );
            return self.drive(&mut session, events, &audit).await;
        }

        let state = &mut session.state;
        let rejected = decision.effective_rejections(&state.pending_approval);
        let batch = state.last_tool_request().map(|request| request.tool_calls.clone()).unwrap_or_default();
        let resulted = resulted_call_ids(&state.messages);
        let rejections = ToolExecutor::reject(&batch, &rejected, &resulted);
        for result in &rejections {
            state.push(result.clone());
        }
        state.pending_approval = PendingApproval::none();
        self.advance(state, FlowEvent::DecisionSubmitted, &audit)?;
        // Conditional on the suspended snapshot: a second decision racing this one fails here,
        // before either runs a tool.
        self.commit(&mut session, &audit).await?;

        info!(
            event_name = "orchestrator.decision.applied",
            thread_id = %thread_id,
            correlation_id = %audit.correlation_id,
            approved = ?decision.approved,
            rejected = ?rejected,
            "approval decision applied"
        );
        self.audit.emit(
            AuditEvent::from_context(
                &audit,
                "approval.decision_applied",
                AuditCategory::Approval,
                AuditOutcome::Success,
            )
            .with_metadata("approved", join_names(decision.approved.iter()))
            .with_metadata("rejected", join_names(rejected.iter())),
        );
        for result in &rejections {
            self.audit.emit(
                AuditEvent::from_context(&audit, "tool.rejected", AuditCategory::Tool, AuditOutcome::Rejected)
                    .with_metadata("call_id", result.call_id.clone())
                    .with_metadata("tool_name", result.tool_name.clone()),
            );
        }

        self.drive(&mut session, events, &audit).await
    }

    async fn update(
        &self,
        thread_id: &ThreadId,
        create: bool,
        apply: impl FnOnce(&mut ConversationState),
    ) -> Result<ConversationState, OrchestratorError> {
        let audit = AuditContext::for_thread(thread_id.as_str(), ACTOR);
        let mut session = match self.load(thread_id).await? {
            Some(session) => session,
            None if create => self.new_session(thread_id),
            None => return Err(OrchestratorError::ThreadNotFound(thread_id.clone())),
        };
        apply(&mut session.state);
        self.commit(&mut session, &audit).await?;
        Ok(session.state)
    }

    async fn drive(
        &self,
        session: &mut Session,
        events: &TurnEvents,
        audit: &AuditContext,
    ) -> Result<TurnOutcome, OrchestratorError> {
        loop {
            match session.state.phase {
                FlowState::Idle | FlowState::Done => {
                    let answer = latest_answer(&session.state);
                    let _ = events.send(TurnEvent::Done { answer: answer.clone() });
                    return Ok(TurnOutcome::Done { answer });
                }
                FlowState::IntentFiltering => {
                    let state = &mut session.state;
                    state.allowed_tools = self.intent.select(&state.messages, &self.catalog).await;
                    self.advance(state, FlowEvent::ToolsSelected, audit)?;
                    self.commit(session, audit).await?;
                }
                FlowState::Responding => {
                    let state = &mut session.state;
                    let on_delta = |delta: &str| {
                        let _ = events.send(TurnEvent::Content(delta.to_string()));
                    };
                    let response = self
                        .responder
                        .generate(&state.messages, &state.allowed_tools, &self.catalog, &on_delta)
                        .await?;
                    let event = if response.has_tool_calls() {
                        FlowEvent::ToolCallsRequested
                    } else {
                        FlowEvent::FinalAnswerProduced
                    };
                    state.push(response);
                    self.advance(state, event, audit)?;
                    self.commit(session, audit).await?;
                }
                FlowState::ApprovalChecking => {
                    let state = &mut session.state;
                    let pending = unresulted_calls(state);
                    let decision = self.gate.gate(&pending, state.human_approval_enabled);
                    if decision.needs_approval {
                        state.pending_approval = decision.into_pending();
                        self.advance(state, FlowEvent::ApprovalRequired, audit)?;
                        info!(
                            event_name = "orchestrator.turn.suspended",
                            thread_id = %session.thread_id,
                            correlation_id = %audit.correlation_id,
                            tools = ?state.pending_approval.tool_names(),
                            "waiting for approval"
                        );
                    } else {
                        self.advance(state, FlowEvent::ApprovalNotRequired, audit)?;
                    }
                    self.commit(session, audit).await?;
                }
                FlowState::SuspendedForApproval => {
                    let calls = session.state.pending_approval.calls.clone();
                    let _ = events.send(TurnEvent::SuspendedForApproval { calls: calls.clone() });
                    return Ok(TurnOutcome::Suspended { calls });
                }
                FlowState::Executing => {
                    while let Some(call) = unresulted_calls(&session.state).into_iter().next() {
                        self.claim(session, &call, audit).await?;
                        let _ = events.send(TurnEvent::ToolStarted {
                            call_id: call.id.clone(),
                            tool_name: call.name.clone(),
                        });
                        let outcome = self.executor.execute_call(&call).await;
                        self.audit.emit(tool_audit_event(audit, &call, &outcome));
                        session.state.push(outcome.to_result(&call));
                        session.state.in_flight = None;
                        // Committed before the next call runs, so a crash never re-executes a
                        // call whose result was saved.
                        self.commit(session, audit).await?;
                    }
                    self.advance(&mut session.state, FlowEvent::ToolsExecuted, audit)?;
                    self.commit(session, audit).await?;
                }
            }
        }
    }

    /// Commits a claim on `call` before it runs. Of several resumers holding the same snapshot
    /// only one commits the claim; a live claim from another turn stops this one.
    async fn claim(
        &self,
        session: &mut Session,
        call: &ToolCall,
        audit: &AuditContext,
    ) -> Result<(), OrchestratorError> {
        if let Some(claim) = session.state.in_flight.as_ref().filter(|claim| claim.call_id == call.id) {
            if claim.is_live(self.claim_lease, Utc::now()) {
                warn!(
                    event_name = "orchestrator.tool.claimed_elsewhere",
                    thread_id = %session.thread_id,
                    call_id = %call.id,
                    claimed_at = %claim.claimed_at,
                    "tool call is being run by another turn"
                );
                return Err(OrchestratorError::TurnInProgress(session.thread_id.clone()));
            }
            warn!(
                event_name = "orchestrator.tool.claim_expired",
                thread_id = %session.thread_id,
                call_id = %call.id,
                claimed_at = %claim.claimed_at,
                "abandoned tool call runs again"
            );
        }
        session.state.in_flight = Some(ToolClaim::new(call.id.clone()));
        self.commit(session, audit).await
    }

    fn advance(
        &self,
        state: &mut ConversationState,
        event: FlowEvent,
        audit: &AuditContext,
    ) -> Result<(), OrchestratorError> {
        let outcome = self.engine.apply_with_audit(&state.phase, &event, self.audit.as_ref(), audit)?;
        debug!(
            event_name = "orchestrator.transition",
            correlation_id = %audit.correlation_id,
            from = outcome.from.as_str(),
            to = outcome.to.as_str(),
            actions = ?outcome.actions,
            "state advanced"
        );
        state.phase = outcome.to;
        Ok(())
    }

    /// Saves the session as the successor of the snapshot it holds. Losing that race to
    /// another writer means another turn advanced the thread; this one stops.
    async fn commit(&self, session: &mut Session, audit: &AuditContext) -> Result<(), OrchestratorError> {
        match self.store.save(&session.thread_id, session.sequence, &session.state).await {
            Ok(checkpoint) => {
                session.sequence = checkpoint.sequence_number;
                debug!(
                    event_name = "orchestrator.checkpoint.saved",
                    thread_id = %session.thread_id,
                    sequence_number = checkpoint.sequence_number,
                    phase = session.state.phase.as_str(),
                    "checkpoint saved"
                );
                Ok(())
            }
            Err(RepositoryError::SequenceConflict(thread_id)) => {
                warn!(
                    event_name = "orchestrator.checkpoint.conflict",
                    thread_id = %thread_id,
                    correlation_id = %audit.correlation_id,
                    expected_sequence = session.sequence,
                    "thread advanced by another writer"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        audit,
                        "persistence.checkpoint_conflict",
                        AuditCategory::Persistence,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("expected_sequence", session.sequence.to_string()),
                );
                Err(OrchestratorError::TurnInProgress(thread_id))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Session>, OrchestratorError> {
        Ok(self.store.load(thread_id).await?.map(|checkpoint| Session {
            thread_id: thread_id.clone(),
            sequence: checkpoint.sequence_number,
            state: checkpoint.state,
        }))
    }

    async fn load_or_new(&self, thread_id: &ThreadId) -> Result<Session, OrchestratorError> {
        Ok(match self.load(thread_id).await? {
            Some(session) => session,
            None => self.new_session(thread_id),
        })
    }

    fn new_session(&self, thread_id: &ThreadId) -> Session {
        Session {
            thread_id: thread_id.clone(),
            sequence: 0,
            state: ConversationState::new(self.approval_by_default),
        }
    }

    fn thread_lock(&self, thread_id: &ThreadId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.thread_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        locks.entry(thread_id.clone()).or_default().clone()
    }

    /// Drops the caller's handle and forgets the lock once no other caller holds one.
    fn release_lock(&self, thread_id: &ThreadId, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = match self.thread_locks.lock() {
            Ok(locks) => locks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if locks.get(thread_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(thread_id);
        }
    }

    #[cfg(test)]
    fn tracked_locks(&self) -> usize {
        match self.thread_locks.lock() {
            Ok(locks) => locks.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

fn unresulted_calls(state: &ConversationState) -> Vec<ToolCall> {
    let resulted = resulted_call_ids(&state.messages);
    state
        .last_tool_request()
        .map(|request| ToolExecutor::plan(request, &resulted).tool_calls)
        .unwrap_or_default()
}

fn tool_audit_event(audit: &AuditContext, call: &ToolCall, outcome: &ToolOutcome) -> AuditEvent {
    let event = match outcome {
        ToolOutcome::Success(_) => {
            AuditEvent::from_context(audit, "tool.executed", AuditCategory::Tool, AuditOutcome::Success)
        }
        ToolOutcome::Error { kind, .. } => {
            AuditEvent::from_context(audit, "tool.failed", AuditCategory::Tool, AuditOutcome::Failed)
                .with_metadata("error_type", kind.as_str())
        }
    };
    event.with_metadata("call_id", call.id.clone()).with_metadata("tool_name", call.name.clone())
}

fn join_names<'a>(names: impl Iterator<Item = &'a String>) -> String {
    names.map(String::as_str).collect::<Vec<_>>().join(",")
}

fn latest_answer(state: &ConversationState) -> String {
    match state.last_message() {
        Some(Message::Assistant(message)) if message.is_final => message.text.clone(),
        _ => String::new(),
    }
}
