pub mod approve;
pub mod chat;
pub mod config;
pub mod doctor;
pub mod migrate;
pub mod show;
pub mod stats;
pub mod threads;

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use toolgate_agent::{
    default_registry, OpenAiCompatibleClient, Orchestrator, OrchestratorError, TurnEvent, TurnInput,
    TurnOutcome,
};
use toolgate_core::config::{AppConfig, LoadOptions};
use toolgate_core::domain::ThreadId;
use toolgate_core::errors::ApplicationError;
use toolgate_db::{connect_with_settings, migrations, CheckpointStore, SqlCheckpointStore};

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_data(command, message, None)
    }

    pub fn success_with_data(command: &str, message: impl Into<String>, data: Option<Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn from_failure(command: &str, failure: Failure) -> Self {
        Self::failure(command, failure.error_class, failure.message, failure.exit_code)
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Classified command failure: `error_class` for machines, `exit_code` for shells.
#[derive(Debug)]
pub(crate) struct Failure {
    error_class: &'static str,
    message: String,
    exit_code: u8,
}

impl Failure {
    pub(crate) fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }
}

pub(crate) fn load_config(options: LoadOptions) -> Result<AppConfig, Failure> {
    AppConfig::load(options)
        .map_err(|error| Failure::new("config_validation", format!("configuration issue: {error}"), 2))
}

/// Runs `task` on a fresh current-thread runtime; the CLI itself stays synchronous.
pub(crate) fn block_on<T>(task: impl Future<Output = Result<T, Failure>>) -> Result<T, Failure> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|error| {
            Failure::new("runtime_init", format!("failed to initialize async runtime: {error}"), 3)
        })?;
    runtime.block_on(task)
}

/// Connects and migrates, so every command sees the current schema.
pub(crate) async fn open_store(config: &AppConfig) -> Result<Arc<dyn CheckpointStore>, Failure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| Failure::new("db_connectivity", error.to_string(), 4))?;
    migrations::run_pending(&pool)
        .await
        .map_err(|error| Failure::new("migration", error.to_string(), 5))?;
    Ok(Arc::new(SqlCheckpointStore::new(pool)))
}

pub(crate) async fn open_orchestrator(config: &AppConfig) -> Result<Arc<Orchestrator>, Failure> {
    if !config.llm.has_api_key() {
        return Err(Failure::new(
            "llm_unconfigured",
            "no model API key configured; set TOOLGATE_LLM_API_KEY or GROQ_API_KEY",
            2,
        ));
    }
    let llm = OpenAiCompatibleClient::from_config(&config.llm)
        .map_err(|error| Failure::new("llm_client", error.to_string(), 3))?;
    let store = open_store(config).await?;
    let registry = default_registry(config.agent.workspace_dir.clone());
    Ok(Arc::new(Orchestrator::new(Arc::new(llm), registry, store, &config.agent)))
}

pub(crate) fn orchestrator_failure(error: OrchestratorError, thread_id: &ThreadId) -> Failure {
    let (error_class, exit_code) = match &error {
        OrchestratorError::TurnInProgress(_) => ("turn_in_progress", 6),
        OrchestratorError::ThreadNotFound(_) => ("thread_not_found", 7),
        OrchestratorError::Repository(_) => ("persistence", 4),
        OrchestratorError::Llm(_) => ("llm", 8),
        OrchestratorError::Transition(_) => ("state_machine", 9),
    };
    let detail = error.to_string();
    let interface = ApplicationError::from(error).into_interface(thread_id.as_str());
    Failure::new(error_class, format!("{} ({detail})", interface.user_message()), exit_code)
}

/// Streams a turn to the terminal: text to stdout as it arrives, tool activity to stderr.
pub(crate) async fn run_streamed(
    orchestrator: &Arc<Orchestrator>,
    thread_id: &ThreadId,
    input: TurnInput,
) -> Result<TurnOutcome, Failure> {
    let (mut receiver, handle) = orchestrator.stream(thread_id.clone(), input);
    let mut stdout = std::io::stdout();
    let mut streamed = false;

    while let Some(event) = receiver.recv().await {
        match event {
            TurnEvent::Content(delta) => {
                streamed = true;
                let _ = write!(stdout, "{delta}");
                let _ = stdout.flush();
            }
            TurnEvent::ToolStarted { call_id, tool_name } => {
                if streamed {
                    let _ = writeln!(stdout);
                    streamed = false;
                }
                eprintln!("[tool] {tool_name} ({call_id})");
            }
            TurnEvent::SuspendedForApproval { calls } => {
                for call in calls {
                    eprintln!("[approval required] {} ({})", call.name, call.id);
                }
            }
            TurnEvent::Done { answer } => {
                if !streamed && !answer.is_empty() {
                    let _ = write!(stdout, "{answer}");
                    streamed = true;
                }
            }
        }
    }
    if streamed {
        let _ = writeln!(stdout);
    }

    handle
        .await
        .map_err(|error| Failure::new("runtime", format!("turn task failed: {error}"), 3))?
        .map_err(|error| orchestrator_failure(error, thread_id))
}

pub(crate) fn outcome_result(command: &str, thread_id: &ThreadId, outcome: TurnOutcome) -> CommandResult {
    match outcome {
        TurnOutcome::Done { answer } => CommandResult::success_with_data(
            command,
            "turn complete",
            Some(json!({"thread_id": thread_id, "status": "done", "answer": answer})),
        ),
        TurnOutcome::Suspended { calls } => {
            let names = calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>().join(", ");
            CommandResult::success_with_data(
                command,
                format!("awaiting approval for: {names}"),
                Some(json!({"thread_id": thread_id, "status": "suspended", "calls": calls})),
            )
        }
    }
}
