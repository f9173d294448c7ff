#![warn(
    rust_2018_idioms,
    deprecated_in_future,
    macro_use_extern_crate,
    missing_debug_implementations,
    unused_qualifications
)]

use anyhow::{Context, Error, Result, format_err};
use chrono::Utc;
use standings_engine::announcements::{self, AnnouncementReceiver};
use standings_engine::scheduler;
use standings_engine::store::postgres::PgStore;
use standings_engine::{ChallengeService, Config, LeaderboardAggregator};
use std::fmt::Display;
use std::process;
use std::sync::Arc;
use std::time::Instant;
use tokio::time;
use tracing::{error, info};

type Aggregator = LeaderboardAggregator<PgStore, PgStore>;
type Challenges = ChallengeService<PgStore, PgStore>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    color_backtrace::install();
    tracing_subscriber::fmt::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            print_error(e);
            process::exit(-1);
        }
    };

    if let Err(e) = run(&config).await {
        if let Some(url) = &config.healthchecks_url {
            if let Err(signal_error) = healthchecks_send_fail_signal(url, &e).await {
                print_error(signal_error);
            }
        }

        print_error(e);
        process::exit(-1);
    }
}

fn print_error<E: Into<Error>>(e: E) {
    let e = e.into();
    error!("error: {e}");
    for cause in e.chain().skip(1) {
        error!(" caused by: {cause}");
    }
}

async fn run(config: &Config) -> Result<()> {
    info!("Connecting to database...");
    let store = Arc::new(
        PgStore::connect(&config.database_url)
            .await
            .context("Couldn't connect to the database")?,
    );
    store.migrate().await.context("Couldn't create the schema")?;
    info!("Connected to database.");

    let (sender, receiver) = announcements::channel();
    let aggregator = LeaderboardAggregator::new(
        Arc::clone(&store),
        Arc::clone(&store),
        config.engine.clone(),
    );
    let challenges = ChallengeService::new(
        Arc::clone(&store),
        Arc::clone(&store),
        sender,
        config.engine.clone(),
    );

    // The scheduler never returns; the dispatcher only stops once every
    // sender is gone.
    let ((), delivered) = tokio::join!(
        schedule(config, aggregator, challenges),
        deliver(&store, receiver),
    );
    info!(delivered, "announcement dispatcher stopped");

    Ok(())
}

async fn deliver(store: &PgStore, receiver: AnnouncementReceiver) -> usize {
    announcements::dispatch(store, receiver).await
}

async fn schedule(config: &Config, aggregator: Aggregator, challenges: Challenges) {
    loop {
        let tick_start = Instant::now();
        let report = scheduler::tick(&aggregator, &challenges, config.auto_settle, Utc::now()).await;
        info!(
            recomputed = report.recomputed,
            activated = report.activated.len(),
            scored = report.scored.len(),
            settled = report.settled.len(),
            failed = report.failed,
            "tick finished"
        );

        if let Some(url) = &config.healthchecks_url {
            let signal = if report.failed == 0 {
                healthchecks_send_ping(url).await
            } else {
                healthchecks_send_fail_signal(url, format!("{} passes failed", report.failed)).await
            };
            if let Err(e) = signal {
                print_error(e);
            }
        }

        time::sleep(
            config
                .update_interval
                .checked_sub(tick_start.elapsed())
                .unwrap_or_default(),
        )
        .await;
    }
}

async fn healthchecks_send_ping(healthchecks_url: &str) -> Result<()> {
    let err_msg = "error sending healthchecks ping";

    reqwest::get(healthchecks_url)
        .await
        .context(err_msg)?
        .error_for_status()
        .context(err_msg)?;

    Ok(())
}

async fn healthchecks_send_fail_signal(healthchecks_url: &str, error: impl Display) -> Result<()> {
    let client = reqwest::Client::new();
    client
        .post(format!("{healthchecks_url}/fail"))
        .body(format!("[standings-engine] error: {error}"))
        .send()
        .await
        .map_err(|e| format_err!("Error sending fail signal: {}", e))?;

    Ok(())
}
