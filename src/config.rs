//! Configuration: a single flat `Config`
//! aggregating the whole env-var surface, built via `Config::from_env()`
//! the way `backend/src/config/mod.rs`'s `MiraConfig` aggregates domain
//! sub-configs — except threaded once through `Arc<AppState>` at startup
//! rather than a `lazy_static!` global, since the HTTP server constructs
//! it exactly once. `clap::Parser` CLI flags follow `mira-chat/src/main.rs`'s
//! `Args`, but env vars take precedence here, treating them as the
//! primary bootstrap channel and CLI flags as an override convenience.

use clap::Parser;
use std::env;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

/// CLI entry point. Env vars win over CLI flags over defaults
/// — flags exist for override convenience at the shell, not as the
/// primary channel.
#[derive(Parser, Debug)]
#[command(name = "conduit")]
#[command(about = "Conversational retrieval-augmented answering orchestrator")]
pub struct Args {
    #[arg(long, env = "api_host")]
    pub host: Option<String>,

    #[arg(long, env = "api_port")]
    pub port: Option<u16>,

    #[arg(long, env = "log_level")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub environment: String,
    pub debug: bool,

    // Logging
    pub log_level: String,
    pub log_format: String,
    pub log_file_path: Option<String>,
    pub log_max_size: u64,
    pub log_backup_count: u32,

    // Server
    pub api_host: String,
    pub api_port: u16,
    pub request_timeout: u64,
    pub stream_chunk_size: usize,
    pub max_concurrent_tasks: usize,
    pub cors_origins: Vec<String>,
    pub cors_methods: Vec<String>,
    pub cors_headers: Vec<String>,

    // Chat adapter
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub openai_temperature: f32,
    pub openai_max_tokens: u32,

    // Document-retrieval adapter
    pub knowledge_api_url: String,
    pub knowledge_api_key: Option<String>,
    pub knowledge_timeout: u64,
    pub openwebui_base_url: Option<String>,

    // Graph-RAG adapter
    pub lightrag_api_url: String,
    pub lightrag_api_key: Option<String>,
    pub lightrag_timeout: u64,
    pub lightrag_default_mode: String,

    // Web-search adapter
    pub search_engine_api_key: Option<String>,
    pub search_engine_url: Option<String>,
    pub search_timeout: u64,
    pub search_max_results: usize,

    // Checkpoint store (agent mode, optional remote KV)
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: u32,
    pub redis_password: Option<String>,
    pub redis_timeout: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            environment: env_string("environment", "development"),
            debug: env_bool("debug", false),

            log_level: env_string("log_level", "info"),
            log_format: env_string("log_format", "plain"),
            log_file_path: env_opt_string("log_file_path"),
            log_max_size: env_parsed("log_max_size", 10 * 1024 * 1024),
            log_backup_count: env_parsed("log_backup_count", 5),

            api_host: env_string("api_host", "0.0.0.0"),
            api_port: env_parsed("api_port", 8080),
            request_timeout: env_parsed("request_timeout", 120),
            stream_chunk_size: env_parsed("stream_chunk_size", 1024),
            max_concurrent_tasks: env_parsed("max_concurrent_tasks", 3),
            cors_origins: env_csv("cors_origins", &["*"]),
            cors_methods: env_csv("cors_methods", &["GET", "POST", "DELETE", "OPTIONS"]),
            cors_headers: env_csv("cors_headers", &["*"]),

            openai_api_key: env_string("openai_api_key", ""),
            openai_base_url: env_string("openai_base_url", "https://api.openai.com/v1"),
            openai_model: env_string("openai_model", "gpt-4o"),
            openai_temperature: env_parsed("openai_temperature", 0.3),
            openai_max_tokens: env_parsed("openai_max_tokens", 2048),

            knowledge_api_url: env_string("knowledge_api_url", "http://localhost:8000/api"),
            knowledge_api_key: env_opt_string("knowledge_api_key"),
            knowledge_timeout: env_parsed("knowledge_timeout", 30),
            openwebui_base_url: env_opt_string("openwebui_base_url"),

            lightrag_api_url: env_string("lightrag_api_url", "http://localhost:9000"),
            lightrag_api_key: env_opt_string("lightrag_api_key"),
            lightrag_timeout: env_parsed("lightrag_timeout", 45),
            lightrag_default_mode: env_string("lightrag_default_mode", "hybrid"),

            search_engine_api_key: env_opt_string("search_engine_api_key"),
            search_engine_url: env_opt_string("search_engine_url"),
            search_timeout: env_parsed("search_timeout", 30),
            search_max_results: env_parsed("search_max_results", 5),

            redis_host: env_string("redis_host", "localhost"),
            redis_port: env_parsed("redis_port", 6379),
            redis_db: env_parsed("redis_db", 0),
            redis_password: env_opt_string("redis_password"),
            redis_timeout: env_parsed("redis_timeout", 5),
        }
    }

    /// Applies CLI overrides (lower precedence than the env vars already
    /// baked into `self` by `from_env`, since clap's own `env = "..."`
    /// bindings already absorbed the matching variables — these only take
    /// effect when the corresponding env var was unset).
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(host) = &args.host {
            if env::var("api_host").is_err() {
                self.api_host = host.clone();
            }
        }
        if let Some(port) = args.port {
            if env::var("api_port").is_err() {
                self.api_port = port;
            }
        }
        if let Some(level) = &args.log_level {
            if env::var("log_level").is_err() {
                self.log_level = level.clone();
            }
        }
        self
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn chat_configured(&self) -> bool {
        !self.openai_api_key.is_empty()
    }

    pub fn web_search_configured(&self) -> bool {
        self.search_engine_api_key.is_some() && self.search_engine_url.is_some()
    }

    pub fn doc_retrieval_configured(&self) -> bool {
        self.knowledge_api_key.is_some()
    }

    pub fn graph_rag_configured(&self) -> bool {
        self.lightrag_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_when_env_is_empty() {
        // SAFETY: single-threaded test, no concurrent env mutation.
        for key in ["api_port", "max_concurrent_tasks"] {
            unsafe { env::remove_var(key) };
        }
        let cfg = Config::from_env();
        assert_eq!(cfg.max_concurrent_tasks, 3);
        assert_eq!(cfg.stream_chunk_size, 1024);
    }

    #[test]
    fn bind_address_combines_host_and_port() {
        let mut cfg = Config::from_env();
        cfg.api_host = "127.0.0.1".to_string();
        cfg.api_port = 9999;
        assert_eq!(cfg.bind_address(), "127.0.0.1:9999");
    }
}
