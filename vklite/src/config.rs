//! Process-wide configuration (SPEC_FULL §3's `AppConfig`): resolved from
//! explicit builder calls, then the `VKLITE_LOG` environment variable,
//! then defaults — loaded with the `config` crate the way a renderer's
//! top-level settings are typically assembled, and feeding straight into
//! `env_logger`/`log` initialization.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Log verbosity, one of `error`/`warn`/`info`/`debug`/`trace`.
    #[serde(default = "default_log")]
    pub log: String,
    /// Application name passed to `vk::ApplicationInfo`.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Number of frames the canvas keeps in flight concurrently.
    #[serde(default = "default_frames_in_flight")]
    pub frames_in_flight: usize,
}

fn default_log() -> String {
    "info".into()
}

fn default_app_name() -> String {
    "vklite".into()
}

fn default_frames_in_flight() -> usize {
    2
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            log: default_log(),
            app_name: default_app_name(),
            frames_in_flight: default_frames_in_flight(),
        }
    }
}

impl AppConfig {
    /// Reads `VKLITE_LOG` (falling back to `RUST_LOG`, then the built-in
    /// default) via the `config` crate's environment source, and
    /// initializes `env_logger` against the resolved level. Call once,
    /// before `App::new`.
    pub fn from_env() -> Self {
        let builder = config::Config::builder()
            .set_default("log", default_log())
            .and_then(|b| b.set_default("app_name", default_app_name()))
            .and_then(|b| b.set_default("frames_in_flight", default_frames_in_flight() as i64))
            .and_then(|b| b.add_source(config::Environment::with_prefix("VKLITE")).build());

        let resolved = match builder {
            Ok(cfg) => cfg.try_deserialize::<AppConfig>().unwrap_or_default(),
            Err(_) => AppConfig::default(),
        };

        let level = std::env::var("VKLITE_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or_else(|_| resolved.log.clone());
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.log, "info");
        assert_eq!(cfg.frames_in_flight, 2);
    }
}
