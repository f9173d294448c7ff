use anyhow::{Context, Error};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Tuning for the ranking passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Entries kept per leaderboard.
    pub retention: usize,
    /// Activity reads in flight at once.
    pub fan_out: usize,
    /// Users per batched activity read.
    pub batch_size: usize,
    /// A pass running longer than this is abandoned without publishing.
    pub pass_time_budget: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retention: 100,
            fan_out: 8,
            batch_size: 500,
            pass_time_budget: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub healthchecks_url: Option<String>,
    pub update_interval: Duration,
    pub auto_settle: bool,
    pub engine: EngineConfig,
}

impl Config {
    /// Reads the configuration from the environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();

        let database_url =
            env::var("DATABASE_URL").context("Environment variable DATABASE_URL is not set")?;
        let healthchecks_url = env::var("HEALTHCHECKS_URL").ok();

        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            retention: parse_var("LEADERBOARD_RETENTION", defaults.retention)?,
            fan_out: parse_var("SCORING_FAN_OUT", defaults.fan_out)?,
            batch_size: parse_var("SCORING_BATCH_SIZE", defaults.batch_size)?,
            pass_time_budget: Duration::from_secs(parse_var(
                "PASS_TIME_BUDGET_SECS",
                defaults.pass_time_budget.as_secs(),
            )?),
        };

        Ok(Config {
            database_url,
            healthchecks_url,
            update_interval: Duration::from_secs(60 * parse_var("UPDATE_INTERVAL_MINUTES", 15u64)?),
            auto_settle: parse_var("AUTO_SETTLE", true)?,
            engine,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Environment variable {name} has an invalid value `{value}`")),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(e) => Err(Error::from(e).context(format!("Invalid {name} environment variable"))),
    }
}
