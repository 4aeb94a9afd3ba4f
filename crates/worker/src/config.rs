use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use refine_core::run_config::{
    parse_step_list, DEFAULT_GUIDANCE_SCALE, DEFAULT_REFINEMENT_STEP, DEFAULT_RESTART_STEPS,
    DEFAULT_TOTAL_STEPS,
};
use refine_core::{CoreError, StepSchedule};

/// Which generation engine the worker drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// Diffusion sidecar over HTTP.
    Http,
    /// In-process deterministic engine, for dry runs.
    Simulated,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "simulated" => Ok(Self::Simulated),
            _ => Err("expected 'http' or 'simulated'".to_string()),
        }
    }
}

/// Which critique backend the worker queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticKind {
    OpenAi,
    Echo,
}

impl FromStr for CriticKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "echo" => Ok(Self::Echo),
            _ => Err("expected 'openai' or 'echo'".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err("expected 'text' or 'json'".to_string()),
        }
    }
}

/// Worker configuration loaded from environment variables.
///
/// Every field has a default suitable for a local run against sidecars on
/// the same machine.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub prompts_file: PathBuf,
    pub output_dir: PathBuf,
    /// Schedule applied to entries without overrides.
    pub defaults: StepSchedule,
    pub engine: EngineKind,
    pub engine_url: String,
    pub engine_timeout: Duration,
    pub critic: CriticKind,
    pub critic_url: String,
    pub critic_model: String,
    pub critic_api_key: Option<String>,
    pub critic_max_tokens: u32,
    pub critic_timeout: Duration,
    /// Extra critique attempts when the refined prompt is missing.
    pub critique_retries: u32,
    pub templates_file: Option<PathBuf>,
    pub concurrency: usize,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                       |
    /// |------------------------------|-------------------------------|
    /// | `REFINE_PROMPTS_FILE`        | `filtered_prompts.json`       |
    /// | `REFINE_OUTPUT_DIR`          | `outputs`                     |
    /// | `REFINE_RESTART_STEPS`       | `25,10,0`                     |
    /// | `REFINE_REFINEMENT_STEP`     | `75`                          |
    /// | `REFINE_TOTAL_STEPS`         | `100`                         |
    /// | `REFINE_GUIDANCE_SCALE`      | `7.5`                         |
    /// | `REFINE_ENGINE`              | `http`                        |
    /// | `REFINE_ENGINE_URL`          | `http://127.0.0.1:8188`       |
    /// | `REFINE_ENGINE_TIMEOUT_SECS` | `900`                         |
    /// | `REFINE_CRITIC`              | `openai`                      |
    /// | `REFINE_CRITIC_URL`          | `http://127.0.0.1:8000`       |
    /// | `REFINE_CRITIC_MODEL`        | `Qwen/Qwen2.5-VL-7B-Instruct` |
    /// | `REFINE_CRITIC_API_KEY`      | unset                         |
    /// | `REFINE_CRITIC_MAX_TOKENS`   | `128`                         |
    /// | `REFINE_CRITIC_TIMEOUT_SECS` | `300`                         |
    /// | `REFINE_CRITIQUE_RETRIES`    | `1`                           |
    /// | `REFINE_TEMPLATES_FILE`      | unset                         |
    /// | `REFINE_CONCURRENCY`         | `1`                           |
    /// | `REFINE_LOG_FORMAT`          | `text`                        |
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let checkpoint_steps = match var("REFINE_RESTART_STEPS") {
            Some(raw) => parse_step_list(&raw)?,
            None => DEFAULT_RESTART_STEPS.to_vec(),
        };
        let defaults = StepSchedule {
            total_steps: parse_or(&var, "REFINE_TOTAL_STEPS", DEFAULT_TOTAL_STEPS)?,
            guidance_scale: parse_or(&var, "REFINE_GUIDANCE_SCALE", DEFAULT_GUIDANCE_SCALE)?,
            refinement_step: parse_or(&var, "REFINE_REFINEMENT_STEP", DEFAULT_REFINEMENT_STEP)?,
            checkpoint_steps,
        };
        defaults.validate()?;

        let concurrency: usize = parse_or(&var, "REFINE_CONCURRENCY", 1)?;
        if concurrency == 0 {
            return Err(CoreError::Configuration(
                "REFINE_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            prompts_file: var("REFINE_PROMPTS_FILE")
                .unwrap_or_else(|| "filtered_prompts.json".into())
                .into(),
            output_dir: var("REFINE_OUTPUT_DIR")
                .unwrap_or_else(|| "outputs".into())
                .into(),
            defaults,
            engine: parse_or(&var, "REFINE_ENGINE", EngineKind::Http)?,
            engine_url: var("REFINE_ENGINE_URL").unwrap_or_else(|| "http://127.0.0.1:8188".into()),
            engine_timeout: Duration::from_secs(parse_or(&var, "REFINE_ENGINE_TIMEOUT_SECS", 900)?),
            critic: parse_or(&var, "REFINE_CRITIC", CriticKind::OpenAi)?,
            critic_url: var("REFINE_CRITIC_URL").unwrap_or_else(|| "http://127.0.0.1:8000".into()),
            critic_model: var("REFINE_CRITIC_MODEL")
                .unwrap_or_else(|| "Qwen/Qwen2.5-VL-7B-Instruct".into()),
            critic_api_key: var("REFINE_CRITIC_API_KEY"),
            critic_max_tokens: parse_or(&var, "REFINE_CRITIC_MAX_TOKENS", 128)?,
            critic_timeout: Duration::from_secs(parse_or(&var, "REFINE_CRITIC_TIMEOUT_SECS", 300)?),
            critique_retries: parse_or(&var, "REFINE_CRITIQUE_RETRIES", 1)?,
            templates_file: var("REFINE_TEMPLATES_FILE").map(PathBuf::from),
            concurrency,
            log_format: parse_or(&var, "REFINE_LOG_FORMAT", LogFormat::Text)?,
        })
    }
}

fn parse_or<T>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, CoreError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|e| {
            CoreError::Configuration(format!("{key} has an invalid value '{raw}': {e}"))
        }),
        None => Ok(default),
    }
}
