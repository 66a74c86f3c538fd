use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use toml::Value;

use toolgate_core::config::{AppConfig, LoadOptions, DEFAULT_CONFIG_FILE};

pub fn run(options: LoadOptions) -> String {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let flag_database_url = options.overrides.database_url.is_some();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let approval_tools =
        config.agent.tools_requiring_approval.iter().cloned().collect::<Vec<_>>().join(",");
    let api_key = if config.llm.has_api_key() { "<redacted>" } else { "<unset>" };
    let entries: [(&str, String, &[&str]); 15] = [
        ("database.url", config.database.url.clone(), &["TOOLGATE_DATABASE_URL"]),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["TOOLGATE_DATABASE_MAX_CONNECTIONS"],
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["TOOLGATE_DATABASE_TIMEOUT_SECS"],
        ),
        ("llm.base_url", config.llm.base_url.clone(), &["TOOLGATE_LLM_BASE_URL"]),
        ("llm.api_key", api_key.to_string(), &["TOOLGATE_LLM_API_KEY", "GROQ_API_KEY"]),
        ("llm.model", config.llm.model.clone(), &["TOOLGATE_LLM_MODEL"]),
        ("llm.temperature", config.llm.temperature.to_string(), &["TOOLGATE_LLM_TEMPERATURE"]),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["TOOLGATE_LLM_TIMEOUT_SECS"]),
        (
            "agent.max_schema_retries",
            config.agent.max_schema_retries.to_string(),
            &["TOOLGATE_AGENT_MAX_SCHEMA_RETRIES"],
        ),
        (
            "agent.intent_classifier_turns",
            config.agent.intent_classifier_turns.to_string(),
            &["TOOLGATE_AGENT_INTENT_CLASSIFIER_TURNS"],
        ),
        (
            "agent.tools_requiring_approval",
            approval_tools,
            &["TOOLGATE_AGENT_TOOLS_REQUIRING_APPROVAL"],
        ),
        (
            "agent.tool_timeout_secs",
            config.agent.tool_timeout_secs.to_string(),
            &["TOOLGATE_AGENT_TOOL_TIMEOUT_SECS"],
        ),
        (
            "agent.workspace_dir",
            config.agent.workspace_dir.display().to_string(),
            &["TOOLGATE_AGENT_WORKSPACE_DIR"],
        ),
        ("logging.level", config.logging.level.clone(), &["TOOLGATE_LOGGING_LEVEL", "TOOLGATE_LOG_LEVEL"]),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["TOOLGATE_LOGGING_FORMAT", "TOOLGATE_LOG_FORMAT"],
        ),
    ];

    let mut lines =
        vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for (key, value, env_keys) in entries {
        let source = if key == "database.url" && flag_database_url {
            "flag (--database-url)".to_string()
        } else {
            field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref())
        };
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    let root = PathBuf::from(DEFAULT_CONFIG_FILE);
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config").join(DEFAULT_CONFIG_FILE);
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
