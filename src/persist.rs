//! World ↔ redb persistence.
//!
//! redb is a save file: loaded on boot, flushed after every applied event.
//! Never queried at runtime; World is the runtime truth.

use crate::world::{Category, Event, ProductivityInsight, Task, User, World};
use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHasher,
};
use chrono::{Datelike, NaiveDate};
use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use std::sync::Arc;
#[cfg(feature = "profile")]
use std::time::Instant;
use uuid::Uuid;

const TASKS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tasks");
const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");
const CATEGORIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("categories");
/// Keyed by user id (16 bytes) + days since CE (i32 LE), one row per user-day.
const INSIGHTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("insights");
const META: TableDefinition<&str, &[u8]> = TableDefinition::new("meta");

/// Thin handle to the redb file. Cloneable (Arc inside).
#[derive(Clone)]
pub struct SaveFile {
    db: Arc<Database>,
}

fn insight_key(user_id: Uuid, date: NaiveDate) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..16].copy_from_slice(user_id.as_bytes());
    key[16..].copy_from_slice(&date.num_days_from_ce().to_le_bytes());
    key
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, SaveFileError> {
    postcard::to_allocvec(value).map_err(|e| SaveFileError::Encode(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, SaveFileError> {
    postcard::from_bytes(bytes).map_err(|e| SaveFileError::Decode(e.to_string()))
}

impl SaveFile {
    /// Open (or create) the save file at the given path.
    /// Creates tables if they don't exist.
    pub fn open(path: &str) -> Result<Self, SaveFileError> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        {
            let _ = txn.open_table(TASKS)?;
            let _ = txn.open_table(USERS)?;
            let _ = txn.open_table(CATEGORIES)?;
            let _ = txn.open_table(INSIGHTS)?;
            let _ = txn.open_table(META)?;
        }
        txn.commit()?;

        Ok(SaveFile { db: Arc::new(db) })
    }

    /// Load the entire World from disk. Called once at boot.
    pub fn load_world(&self) -> Result<World, SaveFileError> {
        let mut world = World::new();
        let txn = self.db.begin_read()?;

        for entry in txn.open_table(TASKS)?.iter()? {
            let (_, value) = entry?;
            let task: Task = decode(value.value())?;
            world.tasks.insert(task.id, task);
        }

        for entry in txn.open_table(USERS)?.iter()? {
            let (_, value) = entry?;
            let user: User = decode(value.value())?;
            world.users.insert(user.id, user);
        }

        for entry in txn.open_table(CATEGORIES)?.iter()? {
            let (_, value) = entry?;
            let category: Category = decode(value.value())?;
            world.categories.insert(category.id, category);
        }

        for entry in txn.open_table(INSIGHTS)?.iter()? {
            let (_, value) = entry?;
            let insight: ProductivityInsight = decode(value.value())?;
            world.insights.insert((insight.user_id, insight.date), insight);
        }

        let meta = txn.open_table(META)?;
        if let Some(rev_data) = meta.get("revision")? {
            if let Ok(bytes) = <[u8; 8]>::try_from(rev_data.value()) {
                world.revision = u64::from_le_bytes(bytes);
            }
        }

        Ok(world)
    }

    /// Flush a single event to disk. Called after every World::apply().
    /// Writes the affected entity + updated revision in one transaction.
    pub fn flush(&self, world: &World, event: &Event) -> Result<(), SaveFileError> {
        #[cfg(feature = "profile")]
        let total_start = Instant::now();
        let txn = self.db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;

            match event {
                Event::TaskCreated { task, .. } | Event::TaskUpdated { task, .. } => {
                    let mut tasks = txn.open_table(TASKS)?;
                    tasks.insert(task.id.as_bytes().as_slice(), encode(task)?.as_slice())?;
                }

                Event::TaskDeleted { task_id, .. } => {
                    let mut tasks = txn.open_table(TASKS)?;
                    tasks.remove(task_id.as_bytes().as_slice())?;
                }

                Event::CategoryCreated { category, .. } => {
                    let mut categories = txn.open_table(CATEGORIES)?;
                    categories.insert(category.id.as_bytes().as_slice(), encode(category)?.as_slice())?;
                }

                Event::InsightRecorded { insight, .. } => {
                    let mut insights = txn.open_table(INSIGHTS)?;
                    let key = insight_key(insight.user_id, insight.date);
                    insights.insert(key.as_slice(), encode(insight)?.as_slice())?;
                }
            }

            // Always update revision
            meta.insert("revision", world.revision.to_le_bytes().as_slice())?;
        }
        #[cfg(feature = "profile")]
        let commit_start = Instant::now();
        txn.commit()?;
        #[cfg(feature = "profile")]
        tracing::debug!(
            revision = event.revision(),
            commit_us = commit_start.elapsed().as_micros() as u64,
            total_us = total_start.elapsed().as_micros() as u64,
            "flush committed transaction"
        );
        Ok(())
    }

    /// Write a user to the save file (for seeding / account creation).
    pub fn save_user(&self, user: &User) -> Result<(), SaveFileError> {
        let txn = self.db.begin_write()?;
        {
            let mut users = txn.open_table(USERS)?;
            users.insert(user.id.as_bytes().as_slice(), encode(user)?.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Seed a default user if none exist. Returns true if created.
    pub fn ensure_default_user(&self, world: &mut World, username: &str, password: &str) -> Result<bool, SaveFileError> {
        if !world.users.is_empty() {
            return Ok(false);
        }

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: hash_password(password)?,
        };

        self.save_user(&user)?;
        world.users.insert(user.id, user);
        Ok(true)
    }
}

pub fn hash_password(password: &str) -> Result<String, SaveFileError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| SaveFileError::Encode(e.to_string()))
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SaveFileError {
    #[error("redb: {0}")]
    Redb(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("encode: {0}")]
    Encode(String),
}

// redb 2.x has many error types. Blanket them all into SaveFileError::Redb.
macro_rules! from_redb {
    ($($t:ty),*) => {
        $(impl From<$t> for SaveFileError {
            fn from(e: $t) -> Self { SaveFileError::Redb(e.to_string()) }
        })*
    };
}

from_redb!(
    redb::Error,
    redb::DatabaseError,
    redb::TableError,
    redb::TransactionError,
    redb::StorageError,
    redb::CommitError
);

// ── Tests ──────────────────────────────────────────────────────
