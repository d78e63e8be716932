use std::path::PathBuf;

/// Process-level configuration, read from the environment (and `.env`).
///
/// Everything the user edits at runtime lives in the settings document;
/// this only says where to find it and how to run.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub settings_path: PathBuf,
    pub engine_config: Option<PathBuf>,
    pub log_level: Option<String>,
    pub port: Option<u16>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            settings_path: PathBuf::from(
                std::env::var("SETTINGS_PATH").unwrap_or_else(|_| "config.json".into()),
            ),
            engine_config: std::env::var("ENGINE_CONFIG").ok().map(PathBuf::from),
            log_level: std::env::var("LOG_LEVEL").ok(),
            port: std::env::var("PORT").ok().and_then(|v| v.parse().ok()),
        }
    }
}

/// Socket address to bind, from the settings `port` (":40613" style) unless
/// overridden.
pub fn bind_address(port_setting: &str, port_override: Option<u16>) -> String {
    if let Some(port) = port_override {
        return format!("0.0.0.0:{port}");
    }
    match port_setting.trim() {
        "" => "0.0.0.0:40613".to_string(),
        p if p.starts_with(':') => format!("0.0.0.0{p}"),
        p if p.contains(':') => p.to_string(),
        p => format!("0.0.0.0:{p}"),
    }
}
