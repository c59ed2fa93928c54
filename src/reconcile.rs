// src/reconcile.rs

use crate::notify::{NotificationKind, NotificationRequest, Notifier};
use crate::reconcile_guard::{ReconcileGuard, SkipReason};
use crate::worklog_data::{
    auto_leave_key, half_day_offset_key, DraftEntry, DurableEntry, User, WorkMode,
    AUTO_LEAVE_DETAILS, ELIGIBLE_TEAMS, FULL_DAY_LEAVE_HOURS, HALF_DAY_LEAVE_DETAILS,
    HALF_DAY_LEAVE_HOURS,
};
use crate::worklog_store::{DynDraftStore, DynDurableStore, DynUserDirectory, StoreError};
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// --- Engine Error Type ---

/// Failures before the per-user loop starts. Everything inside the loop is
/// absorbed into the run summary instead.
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Run setup failed: {0}")]
    Setup(#[from] StoreError),
}

// --- Run Summary ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserAction {
    #[serde(rename = "no-op")]
    NoOp,
    LeaveAssigned,
    Submitted,
    SubmittedWithPartialLeave,
    AdditionalEntriesSubmitted,
    Failed,
}

impl UserAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserAction::NoOp => "no-op",
            UserAction::LeaveAssigned => "leave_assigned",
            UserAction::Submitted => "submitted",
            UserAction::SubmittedWithPartialLeave => "submitted_with_partial_leave",
            UserAction::AdditionalEntriesSubmitted => "additional_entries_submitted",
            UserAction::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOutcome {
    pub name: String,
    pub action: UserAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entries_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UserOutcome {
    fn no_op(name: &str) -> Self {
        Self {
            name: name.to_string(),
            action: UserAction::NoOp,
            entries_count: None,
            hours: None,
            error: None,
        }
    }

    fn leave_assigned(name: &str, hours: Decimal) -> Self {
        Self {
            name: name.to_string(),
            action: UserAction::LeaveAssigned,
            entries_count: None,
            hours: Some(hours),
            error: None,
        }
    }

    fn submitted(name: &str, action: UserAction, entries_count: usize) -> Self {
        Self {
            name: name.to_string(),
            action,
            entries_count: Some(entries_count),
            hours: None,
            error: None,
        }
    }

    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            action: UserAction::Failed,
            entries_count: None,
            hours: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub processed: usize,
    #[serde(default)]
    pub submitted: usize,
    #[serde(default)]
    pub leave_assigned: usize,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub per_user_log: Vec<UserOutcome>,
}

impl RunSummary {
    fn skipped_run(reason: SkipReason, today: NaiveDate) -> Self {
        let message = match reason {
            SkipReason::ConcurrentExecutionPrevented => {
                "Auto-submit job already in progress".to_string()
            }
            SkipReason::AlreadyProcessed => format!("Auto-submit already completed for {today}"),
        };
        Self {
            success: false,
            message: Some(message),
            processed: 0,
            submitted: 0,
            leave_assigned: 0,
            skipped: true,
            reason: Some(reason.as_str().to_string()),
            processed_date: matches!(reason, SkipReason::AlreadyProcessed).then_some(today),
            error: None,
            per_user_log: Vec::new(),
        }
    }

    fn failed_run(error: &ReconcileError) -> Self {
        Self {
            success: false,
            message: Some("Auto-submit and leave assignment failed".to_string()),
            processed: 0,
            submitted: 0,
            leave_assigned: 0,
            skipped: false,
            reason: None,
            processed_date: None,
            error: Some(error.to_string()),
            per_user_log: Vec::new(),
        }
    }

    fn empty_directory(today: NaiveDate) -> Self {
        Self {
            success: true,
            message: Some("No users found".to_string()),
            processed: 0,
            submitted: 0,
            leave_assigned: 0,
            skipped: false,
            reason: None,
            processed_date: Some(today),
            error: None,
            per_user_log: Vec::new(),
        }
    }
}

// --- Two-Phase Commit Result ---

/// Outcome of persisting one user's constructed ledger rows.
struct CommitOutcome {
    committed: Vec<DurableEntry>,
    failed: Vec<DurableEntry>,
}

// --- Reconciliation Engine ---

/// Turns each eligible user's draft state for a target date into durable
/// ledger rows, assigning default leave where nothing was submitted. Whole
/// runs are serialized and deduplicated per date by the injected guard.
pub struct WorklogReconciler {
    users: DynUserDirectory,
    drafts: DynDraftStore,
    durable: DynDurableStore,
    notifier: Arc<dyn Notifier>,
    guard: ReconcileGuard,
}

impl WorklogReconciler {
    pub fn new(
        users: DynUserDirectory,
        drafts: DynDraftStore,
        durable: DynDurableStore,
        notifier: Arc<dyn Notifier>,
        guard: ReconcileGuard,
    ) -> Self {
        Self {
            users,
            drafts,
            durable,
            notifier,
            guard,
        }
    }

    /// Reconcile `today`. Never panics and never returns an error: guard
    /// rejections, setup failures and per-user failures are all reported
    /// through the summary.
    pub async fn run(&self, today: NaiveDate) -> RunSummary {
        if let Err(reason) = self.guard.try_begin(today) {
            match reason {
                SkipReason::ConcurrentExecutionPrevented => {
                    warn!("Auto-submit job already in progress. Skipping this trigger.");
                }
                SkipReason::AlreadyProcessed => {
                    warn!("Auto-submit already completed for {today}. Skipping.");
                }
            }
            return RunSummary::skipped_run(reason, today);
        }

        let summary = match self.run_admitted(today).await {
            Ok(summary) => summary,
            Err(e) => {
                error!("Auto-submit worklogs and leave assignment job failed: {e}");
                RunSummary::failed_run(&e)
            }
        };
        // Release on every exit path; only success pins the date.
        self.guard.finish(today, summary.success);
        summary
    }

    async fn run_admitted(&self, today: NaiveDate) -> Result<RunSummary, ReconcileError> {
        info!("Starting auto-submit worklogs and leave assignment job for {today}");

        let users = self.users.list_eligible(&ELIGIBLE_TEAMS).await?;
        if users.is_empty() {
            info!("No eligible users found in the directory");
            return Ok(RunSummary::empty_directory(today));
        }
        info!("Found {} eligible users", users.len());

        let reconciled_keys = self.durable.user_keys_with_entries(today).await?;
        info!(
            "Found {} users who already have durable entries for {today}",
            reconciled_keys.len()
        );

        let todays_drafts = self.drafts.find_by_date(today).await?;
        info!("Found {} draft entries for {today}", todays_drafts.len());

        let mut drafts_by_user: HashMap<String, Vec<DraftEntry>> = HashMap::new();
        for draft in todays_drafts {
            drafts_by_user.entry(draft.user_key()).or_default().push(draft);
        }

        let mut submitted = 0usize;
        let mut leave_assigned = 0usize;
        let mut per_user_log = Vec::with_capacity(users.len());

        for user in &users {
            let drafts = drafts_by_user.remove(&user.user_key()).unwrap_or_default();
            let has_durable_today = reconciled_keys.contains(&user.user_key());
            let outcome = self.process_user(user, drafts, has_durable_today, today).await;
            match outcome.action {
                UserAction::LeaveAssigned => leave_assigned += 1,
                UserAction::Submitted
                | UserAction::SubmittedWithPartialLeave
                | UserAction::AdditionalEntriesSubmitted => {
                    submitted += outcome.entries_count.unwrap_or(0);
                }
                UserAction::NoOp | UserAction::Failed => {}
            }
            per_user_log.push(outcome);
        }

        info!(
            "Auto-submit and leave assignment completed: {submitted} entries submitted, \
             {leave_assigned} leave entries assigned"
        );

        Ok(RunSummary {
            success: true,
            message: Some(format!(
                "Processed {} employees: {} entries submitted, {} leave entries assigned",
                users.len(),
                submitted,
                leave_assigned
            )),
            processed: users.len(),
            submitted,
            leave_assigned,
            skipped: false,
            reason: None,
            processed_date: Some(today),
            error: None,
            per_user_log,
        })
    }

    /// One user's reconciliation. Store failures end up in the outcome, so
    /// one user can never abort the rest of the run.
    async fn process_user(
        &self,
        user: &User,
        drafts: Vec<DraftEntry>,
        has_durable_today: bool,
        today: NaiveDate,
    ) -> UserOutcome {
        let user_key = user.user_key();

        if drafts.is_empty() {
            if has_durable_today {
                debug!(
                    "{} - already has durable entries and no pending drafts",
                    user.name
                );
                return UserOutcome::no_op(&user.name);
            }

            info!(
                "No worklog entries found for {} - assigning full day leave",
                user.name
            );
            let leave = DurableEntry::auto_leave(
                user,
                today,
                FULL_DAY_LEAVE_HOURS,
                AUTO_LEAVE_DETAILS,
                auto_leave_key(&user_key, today),
                Utc::now().naive_utc(),
            );
            return match self.durable.insert_one(&leave).await {
                Ok(_) => {
                    self.notifier.notify(NotificationRequest::new(
                        &user_key,
                        NotificationKind::LeaveAutoAssigned,
                        serde_json::json!({
                            "name": user.name,
                            "date": today,
                            "hours": FULL_DAY_LEAVE_HOURS,
                        }),
                    ));
                    UserOutcome::leave_assigned(&user.name, FULL_DAY_LEAVE_HOURS)
                }
                Err(e) => {
                    warn!("Failed to assign leave for {}: {}", user.name, e);
                    UserOutcome::failed(&user.name, e.to_string())
                }
            };
        }

        if has_durable_today {
            info!(
                "Found {} additional worklog entries for {} - auto submitting \
                 (user already has durable entries)",
                drafts.len(),
                user.name
            );
        } else {
            info!(
                "Found {} worklog entries for {} - auto submitting",
                drafts.len(),
                user.name
            );
        }

        let now = Utc::now().naive_utc();
        let mut entries: Vec<DurableEntry> = drafts
            .iter()
            .map(|draft| DurableEntry::from_draft(draft, user, today, now))
            .collect();

        // One offset per user per run, no matter how many half-day drafts.
        let has_half_day = drafts
            .iter()
            .any(|draft| matches!(draft.work_mode, WorkMode::HalfDay));
        if has_half_day {
            info!(
                "Half Day entry found for {} - adding {}h leave entry",
                user.name, HALF_DAY_LEAVE_HOURS
            );
            entries.push(DurableEntry::auto_leave(
                user,
                today,
                HALF_DAY_LEAVE_HOURS,
                HALF_DAY_LEAVE_DETAILS,
                half_day_offset_key(&user_key, today),
                now,
            ));
        }

        let commit = self.commit_entries(&user.name, entries).await;
        if commit.committed.is_empty() {
            warn!(
                "All {} durable inserts failed for {} - keeping drafts for the next run",
                commit.failed.len(),
                user.name
            );
            return UserOutcome::failed(
                &user.name,
                format!("all {} durable inserts failed", commit.failed.len()),
            );
        }

        // Committed rows stand even if cleanup fails; leftovers replay as
        // idempotency-key duplicates on the next run.
        if let Err(e) = self.drafts.delete_for_user(&user_key, today).await {
            warn!("Failed to clear drafts for {}: {}", user.name, e);
        }

        let action = if has_durable_today {
            UserAction::AdditionalEntriesSubmitted
        } else if has_half_day {
            UserAction::SubmittedWithPartialLeave
        } else {
            UserAction::Submitted
        };
        self.notifier.notify(NotificationRequest::new(
            &user_key,
            NotificationKind::EntryAutoSubmitted,
            serde_json::json!({
                "name": user.name,
                "date": today,
                "entries": commit.committed.len(),
            }),
        ));
        UserOutcome::submitted(&user.name, action, commit.committed.len())
    }

    /// Two-phase persistence: try the bulk write, and when it fails or
    /// confirms fewer rows than intended, reconcile by retrying every row
    /// individually. Rows that already landed come back as duplicates and
    /// count as committed.
    async fn commit_entries(&self, name: &str, entries: Vec<DurableEntry>) -> CommitOutcome {
        let intended = entries.len();
        match self.durable.insert_many(&entries).await {
            Ok(written) if written == intended => {
                return CommitOutcome {
                    committed: entries,
                    failed: Vec::new(),
                };
            }
            Ok(written) => {
                debug!(
                    "Bulk insert for {name} confirmed {written}/{intended} rows - \
                     reconciling the residue individually"
                );
            }
            Err(e) => {
                warn!("Bulk insert failed for {name}: {e}. Falling back to individual inserts");
            }
        }

        let mut committed = Vec::with_capacity(intended);
        let mut failed = Vec::new();
        for entry in entries {
            match self.durable.insert_one(&entry).await {
                Ok(_) => committed.push(entry),
                Err(e) => {
                    warn!("Individual insert failed for {name}: {e}");
                    failed.push(entry);
                }
            }
        }
        CommitOutcome { committed, failed }
    }
}
