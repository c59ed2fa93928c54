// src/worklog_store.rs

use crate::worklog_data::{DraftEntry, DurableEntry, User, UserKey};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

// --- Store Error Type ---

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    #[error("File I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

// Helper to create context-aware IO errors
fn io_context<E: Into<std::io::Error>, S: Into<String>>(source: E, context: S) -> StoreError {
    StoreError::Io {
        source: source.into(),
        context: context.into(),
    }
}

// --- Store Traits ---

/// Read-only roster of account holders.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Users whose team is one of `teams`. Users without a team never match.
    async fn list_eligible(&self, teams: &[&str]) -> Result<Vec<User>, StoreError>;
}

/// Same-day scratch records, keyed by submitter name and date.
#[async_trait]
pub trait DraftStore: Send + Sync {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<DraftEntry>, StoreError>;

    /// Remove every draft for `user_key` on `date`, matching the submitter
    /// name case-insensitively. Returns how many rows went away.
    async fn delete_for_user(&self, user_key: &str, date: NaiveDate) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// Refused because a row with the same (user key, date, idempotency key)
    /// already exists. Callers treat this the same as a successful insert.
    Duplicate,
}

/// Append-only audit ledger of finalized entries.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Keys of every user that already has at least one ledger row on `date`.
    async fn user_keys_with_entries(&self, date: NaiveDate)
        -> Result<HashSet<UserKey>, StoreError>;

    /// Bulk insert, skipping idempotency-key duplicates. Returns how many
    /// rows were actually written.
    async fn insert_many(&self, entries: &[DurableEntry]) -> Result<usize, StoreError>;

    async fn insert_one(&self, entry: &DurableEntry) -> Result<InsertOutcome, StoreError>;
}

pub type DynUserDirectory = Arc<dyn UserDirectory>;
pub type DynDraftStore = Arc<dyn DraftStore>;
pub type DynDurableStore = Arc<dyn DurableStore>;

// --- In-Memory Implementations ---

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: Mutex<Vec<User>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user: User) -> Result<(), StoreError> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| StoreError::Lock("user directory".to_string()))?;
        users.push(user);
        Ok(())
    }

    pub fn add_all(&self, users: Vec<User>) -> Result<(), StoreError> {
        for user in users {
            self.add(user)?;
        }
        Ok(())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let users = self
            .users
            .lock()
            .map_err(|_| StoreError::Lock("user directory".to_string()))?;
        Ok(users.len())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn list_eligible(&self, teams: &[&str]) -> Result<Vec<User>, StoreError> {
        let users = self
            .users
            .lock()
            .map_err(|_| StoreError::Lock("user directory".to_string()))?;
        Ok(users
            .iter()
            .filter(|u| u.team.as_deref().is_some_and(|t| teams.contains(&t)))
            .cloned()
            .collect())
    }
}

pub struct InMemoryDraftStore {
    rows: Mutex<Vec<DraftEntry>>,
    next_id: AtomicI64,
}

impl Default for InMemoryDraftStore {
    fn default() -> Self {
        Self {
            rows: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a draft, assigning the next id when the draft carries none.
    /// Returns the id under which the row was stored.
    pub fn insert(&self, mut draft: DraftEntry) -> Result<i64, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("draft store".to_string()))?;
        if draft.id == 0 {
            draft.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        } else {
            // Keep the sequence ahead of explicitly supplied ids.
            self.next_id.fetch_max(draft.id + 1, Ordering::SeqCst);
        }
        let id = draft.id;
        rows.push(draft);
        Ok(id)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("draft store".to_string()))?;
        Ok(rows.len())
    }

    pub fn rows_for(&self, user_key: &str) -> Result<Vec<DraftEntry>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("draft store".to_string()))?;
        Ok(rows
            .iter()
            .filter(|r| r.user_key() == user_key)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DraftStore for InMemoryDraftStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<DraftEntry>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("draft store".to_string()))?;
        Ok(rows.iter().filter(|r| r.date == date).cloned().collect())
    }

    async fn delete_for_user(&self, user_key: &str, date: NaiveDate) -> Result<usize, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("draft store".to_string()))?;
        let before = rows.len();
        rows.retain(|r| !(r.date == date && r.user_key() == user_key));
        Ok(before - rows.len())
    }
}

#[derive(Default)]
pub struct InMemoryDurableStore {
    rows: Mutex<Vec<DurableEntry>>,
}

// Engine-written rows carry an idempotency key; a row whose key collides
// with an existing row for the same user and date is a duplicate. Keyless
// rows (user submissions, admin inserts) are never deduplicated.
fn is_duplicate(rows: &[DurableEntry], candidate: &DurableEntry) -> bool {
    match candidate.idempotency_key.as_deref() {
        Some(key) => rows.iter().any(|r| {
            r.idempotency_key.as_deref() == Some(key)
                && r.user_key() == candidate.user_key()
                && r.date == candidate.date
        }),
        None => false,
    }
}

impl InMemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct insert used for seeding pre-existing ledger rows.
    pub fn insert(&self, entry: DurableEntry) -> Result<(), StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        rows.push(entry);
        Ok(())
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        Ok(rows.len())
    }

    pub fn rows_for(&self, user_key: &str) -> Result<Vec<DurableEntry>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        Ok(rows
            .iter()
            .filter(|r| r.user_key() == user_key)
            .cloned()
            .collect())
    }

    pub fn all(&self) -> Result<Vec<DurableEntry>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        Ok(rows.clone())
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn user_keys_with_entries(
        &self,
        date: NaiveDate,
    ) -> Result<HashSet<UserKey>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        Ok(rows
            .iter()
            .filter(|r| r.date == date)
            .map(|r| r.user_key())
            .collect())
    }

    async fn insert_many(&self, entries: &[DurableEntry]) -> Result<usize, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        let mut inserted = 0;
        for entry in entries {
            if !is_duplicate(&rows, entry) {
                rows.push(entry.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn insert_one(&self, entry: &DurableEntry) -> Result<InsertOutcome, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::Lock("durable store".to_string()))?;
        if is_duplicate(&rows, entry) {
            return Ok(InsertOutcome::Duplicate);
        }
        rows.push(entry.clone());
        Ok(InsertOutcome::Inserted)
    }
}

// --- Directory Seeding ---

/// Load directory users from a JSON file (an array of user objects).
pub fn load_directory_file(path: &str) -> Result<Vec<User>, StoreError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| io_context(e, format!("Reading user directory file '{}'", path)))?;
    let users: Vec<User> = serde_json::from_str(&text)?;
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worklog_data::{auto_leave_key, Role, WorkMode, AUTO_LEAVE_DETAILS, FULL_DAY_LEAVE_HOURS};
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d").expect("valid test date")
    }

    fn leave_row(name: &str, date: NaiveDate) -> DurableEntry {
        let user = User::new("t@example.com", name, "Editorial_Maths", Role::Employee);
        DurableEntry::auto_leave(
            &user,
            date,
            FULL_DAY_LEAVE_HOURS,
            AUTO_LEAVE_DETAILS,
            auto_leave_key(&user.user_key(), date),
            date.and_hms_opt(17, 0, 0).expect("valid test time"),
        )
    }

    #[tokio::test]
    async fn directory_filter_matches_listed_teams_only() {
        let directory = InMemoryUserDirectory::new();
        directory
            .add(User::new("a@x.com", "Alice", "Editorial_Maths", Role::Employee))
            .expect("add");
        directory
            .add(User::new("b@x.com", "Bob", "Sales", Role::Employee))
            .expect("add");
        directory
            .add(User {
                email: "c@x.com".to_string(),
                name: "Cara".to_string(),
                team: None,
                role: Role::Employee,
            })
            .expect("add");

        let eligible = directory
            .list_eligible(&["Editorial_Maths", "CSMA_Intern"])
            .await
            .expect("list");
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name, "Alice");
    }

    #[tokio::test]
    async fn draft_delete_is_scoped_and_case_insensitive() {
        let drafts = InMemoryDraftStore::new();
        drafts
            .insert(DraftEntry::new("ALICE", d("2025-10-16"), WorkMode::Wfh).hours(dec!(4)))
            .expect("insert");
        drafts
            .insert(DraftEntry::new("alice", d("2025-10-15"), WorkMode::Wfh))
            .expect("insert");
        drafts
            .insert(DraftEntry::new("Bob", d("2025-10-16"), WorkMode::FullDay))
            .expect("insert");

        let removed = drafts
            .delete_for_user("alice", d("2025-10-16"))
            .await
            .expect("delete");
        assert_eq!(removed, 1);
        assert_eq!(drafts.count().expect("count"), 2);
        assert_eq!(drafts.rows_for("bob").expect("rows").len(), 1);
    }

    #[tokio::test]
    async fn draft_insert_assigns_and_respects_ids() {
        let drafts = InMemoryDraftStore::new();
        let first = drafts
            .insert(DraftEntry::new("Alice", d("2025-10-16"), WorkMode::Wfh))
            .expect("insert");
        assert_eq!(first, 1);

        let mut explicit = DraftEntry::new("Bob", d("2025-10-16"), WorkMode::Wfh);
        explicit.id = 40;
        assert_eq!(drafts.insert(explicit).expect("insert"), 40);

        // The sequence continues past the largest explicit id.
        let next = drafts
            .insert(DraftEntry::new("Cara", d("2025-10-16"), WorkMode::Wfh))
            .expect("insert");
        assert_eq!(next, 41);
    }

    #[tokio::test]
    async fn durable_insert_refuses_idempotency_key_replays() {
        let durable = InMemoryDurableStore::new();
        let row = leave_row("Alice", d("2025-10-16"));

        assert_eq!(
            durable.insert_one(&row).await.expect("insert"),
            InsertOutcome::Inserted
        );
        assert_eq!(
            durable.insert_one(&row).await.expect("insert"),
            InsertOutcome::Duplicate
        );

        // Bulk insert counts only the rows that were new.
        let other = leave_row("Bob", d("2025-10-16"));
        let written = durable
            .insert_many(&[row.clone(), other.clone()])
            .await
            .expect("insert_many");
        assert_eq!(written, 1);
        assert_eq!(durable.count().expect("count"), 2);

        // Same key on a different date is a different row.
        let next_day = leave_row("Alice", d("2025-10-17"));
        assert_eq!(
            durable.insert_one(&next_day).await.expect("insert"),
            InsertOutcome::Inserted
        );
    }

    #[tokio::test]
    async fn durable_lookup_reports_users_with_entries() {
        let durable = InMemoryDurableStore::new();
        durable
            .insert(leave_row("Alice", d("2025-10-16")))
            .expect("seed");
        durable
            .insert(leave_row("Bob", d("2025-10-15")))
            .expect("seed");

        let keys = durable
            .user_keys_with_entries(d("2025-10-16"))
            .await
            .expect("lookup");
        assert!(keys.contains("alice"));
        assert!(!keys.contains("bob"));
    }
}
