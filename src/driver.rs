//! Iterates every registered user through one sync cycle.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{error, info, instrument, warn};

use crate::catalog::is_fatal;
use crate::db::{self, Pool};
use crate::model::RunMode;
use crate::sync::SyncEngine;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub users: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Day-boundary flag for this process run. Only normal runs consult or
/// advance the stored marker.
pub async fn day_boundary(pool: &Pool, mode: &RunMode, today: NaiveDate) -> Result<bool> {
    match mode {
        RunMode::Normal => db::begin_sync_day(pool, today).await,
        RunMode::Catchup(_) => Ok(false),
    }
}

/// Process all users one after another. A fatal catalog error is escalated
/// and aborts the run, leaving the remaining users untouched.
#[instrument(skip_all)]
pub async fn run_all(engine: &SyncEngine, pool: &Pool) -> Result<RunSummary> {
    let users = db::list_users(pool).await?;
    let notifier = engine.notifier();
    let mut summary = RunSummary {
        users: users.len(),
        ..Default::default()
    };
    info!(users = users.len(), mode = ?engine.mode(), "starting run");

    for mut user in users {
        info!(user = %user.username, "starting cycle");
        notifier.deliver(&mut user, &engine.start_notice()).await;

        match engine.run_cycle(&mut user).await {
            Ok(outcome) => {
                notifier.deliver(&mut user, &outcome.report).await;
                summary.delivered += 1;
            }
            Err(err) if is_fatal(&err) => {
                error!(user = %user.username, ?err, "fatal provider error; aborting run");
                notifier
                    .escalate(&format!(
                        "run aborted while processing {}: {err:#}",
                        user.username
                    ))
                    .await;
                return Err(err.context("run aborted"));
            }
            Err(err) => {
                warn!(user = %user.username, ?err, "cycle failed");
                notifier
                    .escalate(&format!("sync failed for {}: {err:#}", user.username))
                    .await;
                summary.failed += 1;
            }
        }
    }

    info!(
        delivered = summary.delivered,
        failed = summary.failed,
        "run finished"
    );
    Ok(summary)
}
