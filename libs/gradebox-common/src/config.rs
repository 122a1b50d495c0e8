use anyhow::{Context, Result};
use chrono::NaiveDate;

/// Process configuration, read from the environment with local-development
/// defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    /// First course day (week 1, day 1). Anchor for deadline arithmetic.
    pub course_start: NaiveDate,
    /// Number of execution sessions kept by the pool.
    pub session_pool_size: usize,
    /// Wall-clock budget for a single test-case run.
    pub run_timeout_ms: u64,
    /// Docker image the session runtime boots from.
    pub runtime_image: String,
    pub session_memory_mb: u32,
    pub session_cpus: f32,
    /// When false, hidden test rows are redacted in caller-facing reports.
    pub reveal_hidden_results: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            course_start: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            session_pool_size: 1,
            run_timeout_ms: 5000,
            runtime_image: "python:3.11-slim".to_string(),
            session_memory_mb: 256,
            session_cpus: 0.5,
            reveal_hidden_results: true,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let course_start = match std::env::var("COURSE_START_DATE") {
            Ok(raw) => raw
                .parse::<NaiveDate>()
                .context("COURSE_START_DATE must be YYYY-MM-DD")?,
            Err(_) => defaults.course_start,
        };

        Ok(Self {
            redis_url: env_or("REDIS_URL", defaults.redis_url),
            course_start,
            session_pool_size: parse_env("SESSION_POOL_SIZE", defaults.session_pool_size)?,
            run_timeout_ms: parse_env("RUN_TIMEOUT_MS", defaults.run_timeout_ms)?,
            runtime_image: env_or("RUNTIME_IMAGE", defaults.runtime_image),
            session_memory_mb: parse_env("SESSION_MEMORY_MB", defaults.session_memory_mb)?,
            session_cpus: parse_env("SESSION_CPUS", defaults.session_cpus)?,
            reveal_hidden_results: parse_env(
                "REVEAL_HIDDEN_RESULTS",
                defaults.reveal_hidden_results,
            )?,
        })
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.session_pool_size, 1);
        assert!(cfg.run_timeout_ms > 0);
        assert!(cfg.reveal_hidden_results);
    }
}
