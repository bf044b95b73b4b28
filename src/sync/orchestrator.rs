//! Sync Orchestrator
//!
//! Drives one complete sync per (user, extension): fetch live review
//! counts, run the pure derivations, push scoring events with vault-held
//! credentials, persist the snapshot, and aggregate per-user outcomes for
//! a batch run. Per-user attempts are independent; one user failing never
//! stops the rest of the batch.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use futures_util::{stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::clients::ServiceClient;
use crate::outcome::{self, ScoreDirection};
use crate::progression::{self, ProgressCounts, UnitConfig};
use crate::state::{now_secs, GamificationState, StateStore};
use crate::sync::retry::{with_retry, RetryPolicy};
use crate::types::{CadenceError, Extension, Result};
use crate::vault::VaultService;

/// Tuning knobs for derivation and batch execution, fixed at process start.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Mastery ratio in (0, 1] at which a unit counts as completed.
    pub mastery_threshold: f64,
    pub min_daily_reviews: u32,
    pub reviews_per_up_event: u32,
    pub missing_reviews_per_down_event: u32,
    /// Card interval (days) at which a card counts as mastered.
    pub mature_interval_days: u32,
    /// Bounded concurrency for batch syncs.
    pub sync_workers: usize,
}

/// Outcome of one user's sync attempt.
#[derive(Debug, Clone, Serialize)]
pub struct UserSyncReport {
    pub username: String,
    pub status: SyncStatus,
    /// Present when the whole sync aborted for this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub score_events_sent: u32,
    /// Scoring calls that exhausted retries; the sync still persisted.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Ok,
    Error,
}

/// JSON-serializable batch result. A non-zero `error` count is the
/// caller's signal to report process failure.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub ok: usize,
    pub error: usize,
    pub users: Vec<UserSyncReport>,
}

impl BatchSummary {
    pub fn has_errors(&self) -> bool {
        self.error > 0
    }
}

/// Batch synchronization orchestrator.
pub struct Orchestrator {
    units: Vec<UnitConfig>,
    settings: SyncSettings,
    retry: RetryPolicy,
    vault: Arc<VaultService>,
    state: StateStore,
    review: Arc<dyn ServiceClient>,
    habit: Arc<dyn ServiceClient>,
}

impl Orchestrator {
    pub fn new(
        units: Vec<UnitConfig>,
        settings: SyncSettings,
        retry: RetryPolicy,
        vault: Arc<VaultService>,
        state: StateStore,
        review: Arc<dyn ServiceClient>,
        habit: Arc<dyn ServiceClient>,
    ) -> Self {
        Self {
            units,
            settings,
            retry,
            vault,
            state,
            review,
            habit,
        }
    }

    /// Sync one user. Never returns an error: failures become an `error`
    /// report so batch callers can aggregate without special cases.
    pub async fn sync_one(
        &self,
        username: &str,
        extension: Extension,
        date: NaiveDate,
        dry_run: bool,
    ) -> UserSyncReport {
        info!(username, %extension, %date, dry_run, "Sync started");

        match self.run_user_sync(username, extension, date, dry_run).await {
            Ok((score_events_sent, errors)) => {
                info!(
                    username,
                    score_events_sent,
                    scoring_errors = errors.len(),
                    "Sync finished"
                );
                UserSyncReport {
                    username: username.to_string(),
                    status: SyncStatus::Ok,
                    message: None,
                    score_events_sent,
                    errors,
                }
            }
            Err(e) => {
                warn!(username, %extension, error = %e, "Sync failed");
                UserSyncReport {
                    username: username.to_string(),
                    status: SyncStatus::Error,
                    message: Some(e.to_string()),
                    score_events_sent: 0,
                    errors: Vec::new(),
                }
            }
        }
    }

    /// Sync a set of users (or every user with a credential for the
    /// extension), isolating failures per user. Reports come back in
    /// target order regardless of how the bounded workers interleave.
    pub async fn sync_many(
        &self,
        usernames: Option<Vec<String>>,
        extension: Extension,
        date: NaiveDate,
        dry_run: bool,
    ) -> Result<BatchSummary> {
        let targets = match usernames {
            Some(list) => list,
            None => self.vault.list_users(extension).await?,
        };

        info!(targets = targets.len(), %extension, %date, dry_run, "Batch sync started");

        let workers = self.settings.sync_workers.max(1);
        let users: Vec<UserSyncReport> = stream::iter(targets)
            .map(|username| async move {
                self.sync_one(&username, extension, date, dry_run).await
            })
            .buffered(workers)
            .collect()
            .await;

        let ok = users.iter().filter(|r| r.status == SyncStatus::Ok).count();
        let error = users.len() - ok;
        info!(ok, error, "Batch sync finished");

        Ok(BatchSummary { ok, error, users })
    }

    /// The batch entry point: defaults the date to today (UTC) and runs
    /// [`sync_many`](Self::sync_many).
    pub async fn sync_extensions_batch(
        &self,
        usernames: Option<Vec<String>>,
        extension: Extension,
        date: Option<NaiveDate>,
        dry_run: bool,
    ) -> Result<BatchSummary> {
        let date = date.unwrap_or_else(|| chrono::Utc::now().date_naive());
        self.sync_many(usernames, extension, date, dry_run).await
    }

    /// Re-run the progression engine from persisted counts for the given
    /// users (or every user with a snapshot), without contacting external
    /// services. Returns the number of snapshots refreshed.
    pub fn recompute_many(&self, usernames: Option<Vec<String>>) -> Result<usize> {
        let targets = match usernames {
            Some(list) => list,
            None => self.state.known_users()?,
        };

        let mut refreshed = 0;
        for username in &targets {
            let mut state = self.state.load(username, &self.units)?;
            let counts = persisted_counts(&state);
            let (current_level, units) =
                progression::derive(&self.units, &counts, self.settings.mastery_threshold);
            state.current_level = current_level;
            state.units = units;
            self.state.save(username, &state)?;
            refreshed += 1;
        }

        info!(refreshed, "Progression recomputed");
        Ok(refreshed)
    }

    // =========================================================================
    // One user's pipeline: fetch -> evaluate -> push -> persist
    // =========================================================================

    async fn run_user_sync(
        &self,
        username: &str,
        extension: Extension,
        date: NaiveDate,
        dry_run: bool,
    ) -> Result<(u32, Vec<String>)> {
        // 1. Credentials. Absence or incompleteness is a config problem
        //    for this user, not a transient failure.
        let credentials = match self.vault.decrypt(username, extension).await {
            Ok(c) => c,
            Err(CadenceError::NotFound(_)) => {
                return Err(CadenceError::Config(format!(
                    "User '{username}' has no {extension} credential configured"
                )))
            }
            Err(e) => return Err(e),
        };
        for field in extension.required_fields() {
            if credentials
                .get(*field)
                .map(|v| v.trim().is_empty())
                .unwrap_or(true)
            {
                return Err(CadenceError::Config(format!(
                    "Stored {extension} credential for '{username}' is missing '{field}'"
                )));
            }
        }

        // 2. Live review counts
        let counts = self.fetch_unit_counts().await?;
        let reviews_today = self.fetch_reviews_on(date).await?;

        // 3. Pure derivations
        let (current_level, units) =
            progression::derive(&self.units, &counts, self.settings.mastery_threshold);
        let verdict = outcome::evaluate(
            reviews_today,
            self.settings.min_daily_reviews,
            self.settings.reviews_per_up_event,
            self.settings.missing_reviews_per_down_event,
        );

        debug!(
            username,
            current_level,
            reviews_today,
            passed = verdict.outcome.passed,
            direction = verdict.direction.as_str(),
            score_events = verdict.score_events,
            "Derivation complete"
        );

        // 4. Scoring events. Each call retries independently; an exhausted
        //    call is recorded and the rest still go out (optimistic).
        let mut errors = Vec::new();
        let mut sent = 0u32;
        if dry_run {
            info!(
                username,
                direction = verdict.direction.as_str(),
                score_events = verdict.score_events,
                "Dry run: skipping scoring calls and persistence"
            );
        } else {
            let (action, params) = scoring_call(&credentials, verdict.direction);
            for n in 1..=verdict.score_events {
                let result = with_retry(&self.retry, &action, || {
                    self.habit.call(&action, params.clone())
                })
                .await;
                match result {
                    Ok(_) => sent += 1,
                    Err(e) => {
                        warn!(username, call = n, total = verdict.score_events, error = %e,
                            "Scoring call exhausted retries");
                        errors.push(format!(
                            "{} {action} call {n}/{} failed: {e}",
                            self.habit.name(),
                            verdict.score_events
                        ));
                    }
                }
            }

            // 5. Persist whatever was achieved
            let state = GamificationState {
                current_level,
                units,
                daily: verdict.outcome,
                last_sync: now_secs(),
                last_sync_errors: errors.clone(),
            };
            self.state.save(username, &state)?;
        }

        Ok((sent, errors))
    }

    /// Per-unit (total, mastered) card counts from the review client.
    async fn fetch_unit_counts(&self) -> Result<BTreeMap<String, ProgressCounts>> {
        let mut counts = BTreeMap::new();
        for unit in &self.units {
            let total = self.count_cards(&format!("tag:{}", unit.tag)).await?;
            let mastered = self
                .count_cards(&format!(
                    "tag:{} prop:ivl>={}",
                    unit.tag, self.settings.mature_interval_days
                ))
                .await?;
            counts.insert(
                unit.id.clone(),
                ProgressCounts {
                    total_cards: total,
                    mastered_cards: mastered,
                },
            );
        }
        Ok(counts)
    }

    async fn count_cards(&self, query: &str) -> Result<i64> {
        let result = with_retry(&self.retry, "findCards", || {
            self.review.call("findCards", json!({ "query": query }))
        })
        .await?;

        result
            .as_array()
            .map(|cards| cards.len() as i64)
            .ok_or_else(|| CadenceError::Protocol {
                status: 200,
                message: format!("{}: findCards returned an unexpected shape", self.review.name()),
            })
    }

    /// Review count for the requested day; zero when the service reports
    /// no reviews for it.
    async fn fetch_reviews_on(&self, date: NaiveDate) -> Result<u32> {
        let result = with_retry(&self.retry, "getNumCardsReviewedByDay", || {
            self.review.call("getNumCardsReviewedByDay", json!({}))
        })
        .await?;

        let rows = result.as_array().ok_or_else(|| CadenceError::Protocol {
            status: 200,
            message: format!(
                "{}: getNumCardsReviewedByDay returned an unexpected shape",
                self.review.name()
            ),
        })?;

        let wanted = date.format("%Y-%m-%d").to_string();
        for row in rows {
            if row.get(0).and_then(Value::as_str) == Some(wanted.as_str()) {
                let n = row.get(1).and_then(Value::as_i64).unwrap_or(0);
                return Ok(n.max(0) as u32);
            }
        }
        Ok(0)
    }
}

fn persisted_counts(state: &GamificationState) -> BTreeMap<String, ProgressCounts> {
    state
        .units
        .iter()
        .map(|(id, p)| {
            (
                id.clone(),
                ProgressCounts {
                    total_cards: p.total_cards as i64,
                    mastered_cards: p.mastered_cards as i64,
                },
            )
        })
        .collect()
}

fn scoring_call(
    credentials: &BTreeMap<String, String>,
    direction: ScoreDirection,
) -> (String, Value) {
    let action = format!("score/{}", direction.as_str());
    let params = json!({
        "task_id": credentials.get("task_id"),
        "user_id": credentials.get("user_id"),
        "api_token": credentials.get("api_token"),
    });
    (action, params)
}
