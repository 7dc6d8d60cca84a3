use std::env;
use std::path::PathBuf;

pub const DEFAULT_OBJECT_BASE_URL: &str = "http://localhost:9000/school";
pub const DEFAULT_TAKE: i64 = 1000;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub log_filter: String,
    pub log_json: bool,
    pub workspace: Option<PathBuf>,
    pub object_base_url: String,
    pub default_take: i64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_filter: "info".to_string(),
            log_json: false,
            workspace: None,
            object_base_url: DEFAULT_OBJECT_BASE_URL.to_string(),
            default_take: DEFAULT_TAKE,
        }
    }
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let log_filter = env::var("SCHOOLD_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or(defaults.log_filter);
        let object_base_url = env::var("SCHOOLD_OBJECT_BASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.object_base_url);
        let default_take = env_i64("SCHOOLD_DEFAULT_TAKE", defaults.default_take);
        Self {
            log_filter,
            log_json: env_bool("SCHOOLD_LOG_JSON", defaults.log_json),
            workspace: env::var("SCHOOLD_WORKSPACE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            object_base_url,
            default_take: if default_take > 0 {
                default_take
            } else {
                DEFAULT_TAKE
            },
        }
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" => Some(false),
        _ => None,
    }
}
