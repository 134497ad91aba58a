use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadroute_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, env_key, config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "LEADROUTE_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "LEADROUTE_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "LEADROUTE_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "routing.engine",
        &format!("{:?}", config.routing.engine),
        source("routing.engine", "LEADROUTE_ROUTING_ENGINE"),
    ));
    lines.push(render_line(
        "routing.max_cross_sell",
        &config.routing.max_cross_sell.to_string(),
        source("routing.max_cross_sell", "LEADROUTE_ROUTING_MAX_CROSS_SELL"),
    ));
    lines.push(render_line(
        "routing.min_cross_sell_score",
        &config.routing.min_cross_sell_score.to_string(),
        source("routing.min_cross_sell_score", "LEADROUTE_ROUTING_MIN_CROSS_SELL_SCORE"),
    ));
    lines.push(render_line(
        "routing.step_pacing_ms",
        &config.routing.step_pacing_ms.to_string(),
        source("routing.step_pacing_ms", "LEADROUTE_ROUTING_STEP_PACING_MS"),
    ));

    lines.push(render_line(
        "llm.enabled",
        &config.llm.enabled.to_string(),
        source("llm.enabled", "LEADROUTE_LLM_ENABLED"),
    ));
    lines.push(render_line(
        "llm.model",
        &config.llm.model,
        source("llm.model", "LEADROUTE_LLM_MODEL"),
    ));
    lines.push(render_line(
        "llm.base_url",
        &config.llm.base_url,
        source("llm.base_url", "LEADROUTE_LLM_BASE_URL"),
    ));
    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "llm.api_key",
        llm_api_key,
        source("llm.api_key", "LEADROUTE_LLM_API_KEY"),
    ));

    lines.push(render_line(
        "delegation.base_url",
        config.delegation.base_url.as_deref().unwrap_or("<unset>"),
        source("delegation.base_url", "LEADROUTE_DELEGATION_BASE_URL"),
    ));
    let delegation_token =
        if config.delegation.auth_token.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "delegation.auth_token",
        delegation_token,
        source("delegation.auth_token", "LEADROUTE_DELEGATION_AUTH_TOKEN"),
    ));
    lines.push(render_line(
        "delegation.timeout_secs",
        &config.delegation.timeout_secs.to_string(),
        source("delegation.timeout_secs", "LEADROUTE_DELEGATION_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "LEADROUTE_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "LEADROUTE_SERVER_PORT"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "LEADROUTE_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "LEADROUTE_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("leadroute.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/leadroute.toml");
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
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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
