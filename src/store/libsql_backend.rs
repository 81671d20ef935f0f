//! libSQL backend — async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::beta::{ApplicationRecord, Model, Provider};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{ApplicationSink, ChatLogEntry, Database, Group, UserProfile};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn opt_integer(v: Option<i64>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Integer(v),
        None => libsql::Value::Null,
    }
}

fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

fn row_to_application(row: &libsql::Row) -> Result<ApplicationRecord, libsql::Error> {
    let provider: String = row.get(4)?;
    let model: String = row.get(5)?;
    let created_at: String = row.get(9)?;

    Ok(ApplicationRecord {
        user_id: row.get(0)?,
        chat_context: row.get(1)?,
        display_name: row.get(2)?,
        has_api_key: Some(row.get::<i64>(3)? != 0),
        provider: Provider::from_value(&provider),
        model: Model::from_value(&model),
        email: row.get(6)?,
        contact_name: row.get(7)?,
        contact_method: row.get(8)?,
        created_at: Some(parse_datetime(&created_at)),
    })
}

fn row_to_group(row: &libsql::Row) -> Result<Group, libsql::Error> {
    Ok(Group {
        group_id: row.get(0)?,
        name: row.get(1)?,
        is_active: row.get::<i64>(2)? != 0,
    })
}

fn row_to_chat_entry(row: &libsql::Row) -> Result<ChatLogEntry, libsql::Error> {
    let timestamp: String = row.get(6)?;
    Ok(ChatLogEntry {
        message_id: row.get(0).ok(),
        user_id: row.get(1)?,
        username: row.get(2)?,
        chat_id: row.get(3)?,
        text: row.get(4)?,
        message_type: row.get(5)?,
        timestamp: parse_datetime(&timestamp),
    })
}

fn row_to_user(row: &libsql::Row) -> Result<UserProfile, libsql::Error> {
    let last_updated: String = row.get(7)?;
    Ok(UserProfile {
        user_id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2).ok(),
        username: row.get(3).ok(),
        language_code: row.get(4).ok(),
        is_bot: row.get::<i64>(5)? != 0,
        is_in_group: row.get::<i64>(6)? != 0,
        last_updated: parse_datetime(&last_updated),
    })
}

const APPLICATION_COLUMNS: &str = "user_id, chat_id, username, has_api_key, provider, model, email, contact_name, contact_method, created_at";

const CHAT_COLUMNS: &str = "message_id, user_id, username, chat_id, text, message_type, timestamp";

const USER_COLUMNS: &str =
    "user_id, first_name, last_name, username, language_code, is_bot, is_in_group, last_updated";

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl ApplicationSink for LibSqlBackend {
    async fn submit_application(&self, record: &ApplicationRecord) -> Result<(), DatabaseError> {
        let (Some(provider), Some(model)) = (record.provider, record.model) else {
            return Err(DatabaseError::Constraint(format!(
                "application for user {} is incomplete",
                record.user_id
            )));
        };
        let id = Uuid::new_v4().to_string();
        let created_at = record.created_at.unwrap_or_else(Utc::now).to_rfc3339();

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO beta_applications (id, {APPLICATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    id.clone(),
                    record.user_id,
                    record.chat_context,
                    record.display_name.as_str(),
                    i64::from(record.has_api_key.unwrap_or(false)),
                    provider.value(),
                    model.value(),
                    record.email.as_str(),
                    record.contact_name.as_str(),
                    record.contact_method.as_str(),
                    created_at,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("submit_application: {e}")))?;

        debug!(id = %id, user_id = record.user_id, "Beta application inserted into DB");
        Ok(())
    }
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Applications ────────────────────────────────────────────────

    async fn list_applications(
        &self,
        user_id: i64,
    ) -> Result<Vec<ApplicationRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {APPLICATION_COLUMNS} FROM beta_applications
                     WHERE user_id = ?1 ORDER BY created_at ASC"
                ),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_applications: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_applications: {e}")))?
        {
            records.push(
                row_to_application(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(records)
    }

    // ── Groups ──────────────────────────────────────────────────────

    async fn save_group(&self, group: &Group) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO groups (group_id, name, is_active, updated_at) VALUES (?1, ?2, ?3, ?4)",
                params![group.group_id, group.name.as_str(), i64::from(group.is_active), now],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::Constraint(format!("group {} already exists", group.group_id))
                } else {
                    DatabaseError::Query(format!("save_group: {e}"))
                }
            })?;
        debug!(group_id = group.group_id, "Group saved");
        Ok(())
    }

    async fn get_group(&self, group_id: i64) -> Result<Option<Group>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT group_id, name, is_active FROM groups WHERE group_id = ?1",
                params![group_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_group: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let group =
                    row_to_group(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(group))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_group: {e}"))),
        }
    }

    async fn update_group(&self, group: &Group) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE groups SET name = ?2, is_active = ?3, updated_at = ?4 WHERE group_id = ?1",
                params![group.group_id, group.name.as_str(), i64::from(group.is_active), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_group: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "group".into(),
                id: group.group_id.to_string(),
            });
        }
        Ok(())
    }

    async fn deactivate_group(&self, group_id: i64) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let count = self
            .conn()
            .execute(
                "UPDATE groups SET is_active = 0, updated_at = ?2 WHERE group_id = ?1",
                params![group_id, now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("deactivate_group: {e}")))?;

        if count > 0 {
            info!(group_id, "Group deactivated");
        }
        Ok(())
    }

    // ── Chat log ────────────────────────────────────────────────────

    async fn log_chat_message(&self, entry: &ChatLogEntry) -> Result<(), DatabaseError> {
        let id = Uuid::new_v4().to_string();
        self.conn()
            .execute(
                &format!("INSERT INTO chat_messages (id, {CHAT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
                params![
                    id,
                    opt_integer(entry.message_id),
                    entry.user_id,
                    entry.username.as_str(),
                    entry.chat_id,
                    entry.text.as_str(),
                    entry.message_type.as_str(),
                    entry.timestamp.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("log_chat_message: {e}")))?;
        Ok(())
    }

    async fn list_chat_messages(
        &self,
        chat_id: i64,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CHAT_COLUMNS} FROM chat_messages WHERE chat_id = ?1
                     ORDER BY timestamp DESC, rowid DESC LIMIT ?2"
                ),
                params![chat_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chat_messages: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_chat_messages: {e}")))?
        {
            entries.push(
                row_to_chat_entry(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?,
            );
        }
        Ok(entries)
    }

    // ── Users ───────────────────────────────────────────────────────

    async fn log_user_profile(&self, profile: &UserProfile) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO users ({USER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                     ON CONFLICT (user_id) DO UPDATE SET
                        first_name = ?2, last_name = ?3, username = ?4, language_code = ?5,
                        is_bot = ?6, is_in_group = ?7, last_updated = ?8"
                ),
                params![
                    profile.user_id,
                    profile.first_name.as_str(),
                    opt_text(profile.last_name.as_deref()),
                    opt_text(profile.username.as_deref()),
                    opt_text(profile.language_code.as_deref()),
                    i64::from(profile.is_bot),
                    i64::from(profile.is_in_group),
                    profile.last_updated.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("log_user_profile: {e}")))?;
        Ok(())
    }

    async fn get_user_profile(&self, user_id: i64) -> Result<Option<UserProfile>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user_profile: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let user =
                    row_to_user(&row).map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(Some(user))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_user_profile: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_record(user_id: i64) -> ApplicationRecord {
        ApplicationRecord {
            has_api_key: Some(true),
            provider: Some(Provider::OpenAi),
            model: Some(Model::Gpt4_32k),
            email: "a@b.com".into(),
            contact_name: "Jane".into(),
            contact_method: "mornings by email".into(),
            created_at: Some(Utc::now()),
            ..ApplicationRecord::new(user_id, -42, "jane")
        }
    }

    fn profile(user_id: i64, first_name: &str) -> UserProfile {
        UserProfile {
            user_id,
            first_name: first_name.into(),
            last_name: None,
            username: Some("jdoe".into()),
            language_code: Some("en".into()),
            is_bot: false,
            is_in_group: true,
            last_updated: Utc::now(),
        }
    }

    #[tokio::test]
    async fn submit_and_list_applications() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let record = complete_record(5);
        db.submit_application(&record).await.unwrap();

        let stored = db.list_applications(5).await.unwrap();
        assert_eq!(stored.len(), 1);
        let got = &stored[0];
        assert_eq!(got.chat_context, -42);
        assert_eq!(got.display_name, "jane");
        assert_eq!(got.has_api_key, Some(true));
        assert_eq!(got.provider, Some(Provider::OpenAi));
        assert_eq!(got.model, Some(Model::Gpt4_32k));
        assert_eq!(got.contact_method, "mornings by email");
        assert!(got.created_at.is_some());

        assert!(db.list_applications(6).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_submissions_are_kept() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let record = complete_record(5);
        db.submit_application(&record).await.unwrap();
        db.submit_application(&record).await.unwrap();
        assert_eq!(db.list_applications(5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn incomplete_application_is_rejected() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let record = ApplicationRecord::new(1, 1, "x");
        let err = db.submit_application(&record).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn group_lifecycle() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let group = Group {
            group_id: -1001,
            name: "Beta testers".into(),
            is_active: true,
        };
        db.save_group(&group).await.unwrap();
        assert_eq!(db.get_group(-1001).await.unwrap(), Some(group.clone()));

        let dup = db.save_group(&group).await.unwrap_err();
        assert!(matches!(dup, DatabaseError::Constraint(_)));

        db.deactivate_group(-1001).await.unwrap();
        assert!(!db.get_group(-1001).await.unwrap().unwrap().is_active);

        let renamed = Group {
            name: "Beta".into(),
            is_active: true,
            ..group
        };
        db.update_group(&renamed).await.unwrap();
        assert_eq!(db.get_group(-1001).await.unwrap(), Some(renamed));
    }

    #[tokio::test]
    async fn update_missing_group_is_not_found() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        let err = db
            .update_group(&Group {
                group_id: 9,
                name: "x".into(),
                is_active: true,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        // Deactivating an unknown group is a no-op.
        db.deactivate_group(9).await.unwrap();
        assert!(db.get_group(9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chat_log_newest_first() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        for (i, text) in ["first", "second", "third"].iter().enumerate() {
            db.log_chat_message(&ChatLogEntry {
                message_id: if i == 0 { None } else { Some(i as i64) },
                user_id: 1,
                username: "jdoe".into(),
                chat_id: 10,
                text: text.to_string(),
                message_type: "reply".into(),
                timestamp: Utc::now() + chrono::Duration::seconds(i as i64),
            })
            .await
            .unwrap();
        }

        let entries = db.list_chat_messages(10, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "third");
        assert_eq!(entries[1].text, "second");

        let all = db.list_chat_messages(10, 10).await.unwrap();
        assert_eq!(all[2].message_id, None);
        assert!(db.list_chat_messages(11, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn user_profile_upsert() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.log_user_profile(&profile(3, "Jane")).await.unwrap();
        db.log_user_profile(&profile(3, "Janet")).await.unwrap();

        let got = db.get_user_profile(3).await.unwrap().unwrap();
        assert_eq!(got.first_name, "Janet");
        assert_eq!(got.username.as_deref(), Some("jdoe"));
        assert_eq!(got.last_name, None);
        assert!(got.is_in_group);
        assert!(db.get_user_profile(4).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("dir").join("beta.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        db.submit_application(&complete_record(1)).await.unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn parse_datetime_formats() {
        let rfc = parse_datetime("2026-01-02T03:04:05Z");
        assert_eq!(rfc.to_rfc3339(), "2026-01-02T03:04:05+00:00");
        let sqlite = parse_datetime("2026-01-02 03:04:05");
        assert_eq!(sqlite, rfc);
        assert_eq!(parse_datetime("garbage"), DateTime::<Utc>::MIN_UTC);
    }
}
