//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend for a mesh node. It uses rusqlite
//! with bundled SQLite, wrapped in async via tokio::spawn_blocking.
//!
//! Uniqueness guarantees (message hashKey, blacklist pubKey, recovery
//! tempUserId) live in PRIMARY KEY constraints, so concurrent writers race
//! safely: the loser of an `INSERT OR IGNORE` observes `AlreadyExists`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use meshnode_core::{
    BlacklistedPu, Channel, CrossApRecoveryRequest, CrossApRecoveryResponse, Message,
    RecoveryStatus, UserRecord,
};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{InsertOutcome, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

// Row mapping helpers

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        username: row.get("username")?,
        ap_reg: row.get("ap_reg")?,
        mt_pub_key: row.get("mt_pub_key")?,
        recovery_key_hash: row.get("recovery_key_hash")?,
        recovery_key_salt: row.get("recovery_key_salt")?,
        recovery_fingerprint: row.get("recovery_fingerprint")?,
        recovery_key_updated_at: row.get("recovery_key_updated_at")?,
        recovery_signature: row.get("recovery_signature")?,
        recovery_source: row.get("recovery_source")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let has_image: Option<i64> = row.get("has_image")?;
    Ok(Message {
        hash_key: row.get("hash_key")?,
        channel: row.get("channel")?,
        content: row.get("content")?,
        usernick: row.get("usernick")?,
        origin: row.get("origin")?,
        certificate: row.get("certificate")?,
        tod: row.get("tod")?,
        is_safe: row.get::<_, i64>("is_safe")? != 0,
        has_image: has_image.map(|v| v != 0),
        image_data: row.get("image_data")?,
    })
}

fn row_to_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        channel_name: row.get("channel_name")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        tod: row.get("tod")?,
        channel_cert: row.get("channel_cert")?,
    })
}

fn row_to_blacklisted(row: &rusqlite::Row<'_>) -> rusqlite::Result<BlacklistedPu> {
    Ok(BlacklistedPu {
        pub_key: row.get("pub_key")?,
        tod: row.get("tod")?,
    })
}

fn row_to_request(row: &rusqlite::Row<'_>) -> rusqlite::Result<CrossApRecoveryRequest> {
    let status: String = row.get("status")?;
    Ok(CrossApRecoveryRequest {
        temp_user_id: row.get("temp_user_id")?,
        requesting_ap_id: row.get("requesting_ap_id")?,
        destination_ap_id: row.get("destination_ap_id")?,
        encrypted_payload: row.get("encrypted_payload")?,
        recovery_hash: row.get("recovery_hash")?,
        real_user_id: row.get("real_user_id")?,
        source_ap_id: row.get("source_ap_id")?,
        ephemeral_public_key: row.get("ephemeral_public_key")?,
        ephemeral_secret_pem: row.get("ephemeral_secret_pem")?,
        status: RecoveryStatus::parse(&status).unwrap_or(RecoveryStatus::Expired),
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
    })
}

fn row_to_response(row: &rusqlite::Row<'_>) -> rusqlite::Result<CrossApRecoveryResponse> {
    Ok(CrossApRecoveryResponse {
        temp_user_id: row.get("temp_user_id")?,
        encrypted_token_data: row.get("encrypted_token_data")?,
        requesting_ap_id: row.get("requesting_ap_id")?,
        source_ap_id: row.get("source_ap_id")?,
        signature: row.get("signature")?,
        created_at: row.get("created_at")?,
    })
}

const MESSAGE_COLUMNS: &str = "hash_key, channel, content, usernick, origin, certificate, tod, \
                               is_safe, has_image, image_data";

#[async_trait]
impl Store for SqliteStore {
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        let username = username.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT * FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<InsertOutcome> {
        let user = user.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO users (
                    username, ap_reg, mt_pub_key, recovery_key_hash, recovery_key_salt,
                    recovery_fingerprint, recovery_key_updated_at, recovery_signature,
                    recovery_source, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    user.username,
                    user.ap_reg,
                    user.mt_pub_key,
                    user.recovery_key_hash,
                    user.recovery_key_salt,
                    user.recovery_fingerprint,
                    user.recovery_key_updated_at,
                    user.recovery_signature,
                    user.recovery_source,
                    user.created_at,
                ],
            )?;
            if conn.changes() == 0 {
                Ok(InsertOutcome::AlreadyExists)
            } else {
                Ok(InsertOutcome::Inserted)
            }
        })
        .await
    }

    async fn update_user(&self, user: &UserRecord) -> Result<()> {
        let user = user.clone();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE users SET
                    ap_reg = ?2, mt_pub_key = ?3, recovery_key_hash = ?4,
                    recovery_key_salt = ?5, recovery_fingerprint = ?6,
                    recovery_key_updated_at = ?7, recovery_signature = ?8,
                    recovery_source = ?9, created_at = ?10
                 WHERE username = ?1",
                params![
                    user.username,
                    user.ap_reg,
                    user.mt_pub_key,
                    user.recovery_key_hash,
                    user.recovery_key_salt,
                    user.recovery_fingerprint,
                    user.recovery_key_updated_at,
                    user.recovery_signature,
                    user.recovery_source,
                    user.created_at,
                ],
            )?;
            if conn.changes() == 0 {
                Err(StoreError::NotFound(format!("user {}", user.username)))
            } else {
                Ok(())
            }
        })
        .await
    }

    async fn find_user_by_recovery_hash(
        &self,
        recovery_hash: &str,
    ) -> Result<Option<UserRecord>> {
        let recovery_hash = recovery_hash.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT * FROM users WHERE recovery_fingerprint = ?1",
                params![recovery_hash],
                row_to_user,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn insert_message(&self, message: &Message) -> Result<InsertOutcome> {
        let message = message.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO messages (
                    hash_key, channel, content, usernick, origin, certificate,
                    tod, is_safe, has_image, image_data, ingested_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    message.hash_key,
                    message.channel,
                    message.content,
                    message.usernick,
                    message.origin,
                    message.certificate,
                    message.tod,
                    message.is_safe as i64,
                    message.has_image.map(|v| v as i64),
                    message.image_data,
                    now_millis(),
                ],
            )?;
            if conn.changes() == 0 {
                Ok(InsertOutcome::AlreadyExists)
            } else {
                Ok(InsertOutcome::Inserted)
            }
        })
        .await
    }

    async fn get_message(&self, hash_key: &str) -> Result<Option<Message>> {
        let hash_key = hash_key.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM messages WHERE hash_key = ?1", MESSAGE_COLUMNS),
                params![hash_key],
                row_to_message,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn has_message(&self, hash_key: &str) -> Result<bool> {
        let hash_key = hash_key.to_string();
        self.blocking(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM messages WHERE hash_key = ?1",
                    params![hash_key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_messages_by_channel(&self, channel: &str) -> Result<Vec<Message>> {
        let channel = channel.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM messages WHERE channel = ?1 ORDER BY tod",
                MESSAGE_COLUMNS
            ))?;
            let messages = stmt
                .query_map(params![channel], row_to_message)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }

    async fn find_channel(&self, channel_name: &str) -> Result<Option<Channel>> {
        let channel_name = channel_name.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT * FROM channels WHERE channel_name = ?1",
                params![channel_name],
                row_to_channel,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn upsert_channel_if_newer(&self, channel: &Channel) -> Result<bool> {
        let channel = channel.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO channels (channel_name, is_active, tod, channel_cert)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(channel_name) DO UPDATE SET
                    is_active = excluded.is_active,
                    tod = excluded.tod,
                    channel_cert = excluded.channel_cert
                 WHERE excluded.tod > channels.tod",
                params![
                    channel.channel_name,
                    channel.is_active as i64,
                    channel.tod,
                    channel.channel_cert,
                ],
            )?;
            Ok(conn.changes() > 0)
        })
        .await
    }

    async fn list_channels(&self, active_only: bool) -> Result<Vec<Channel>> {
        self.blocking(move |conn| {
            let sql = if active_only {
                "SELECT * FROM channels WHERE is_active = 1 ORDER BY channel_name"
            } else {
                "SELECT * FROM channels ORDER BY channel_name"
            };
            let mut stmt = conn.prepare(sql)?;
            let channels = stmt
                .query_map([], row_to_channel)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(channels)
        })
        .await
    }

    async fn insert_blacklisted_pu(&self, entry: &BlacklistedPu) -> Result<InsertOutcome> {
        let entry = entry.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO blacklisted_pus (pub_key, tod) VALUES (?1, ?2)",
                params![entry.pub_key, entry.tod],
            )?;
            if conn.changes() == 0 {
                Ok(InsertOutcome::AlreadyExists)
            } else {
                Ok(InsertOutcome::Inserted)
            }
        })
        .await
    }

    async fn list_blacklist(&self) -> Result<Vec<BlacklistedPu>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM blacklisted_pus ORDER BY pub_key")?;
            let entries = stmt
                .query_map([], row_to_blacklisted)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(entries)
        })
        .await
    }

    async fn insert_recovery_request(
        &self,
        request: &CrossApRecoveryRequest,
    ) -> Result<InsertOutcome> {
        let request = request.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO recovery_requests (
                    temp_user_id, requesting_ap_id, destination_ap_id, encrypted_payload,
                    recovery_hash, real_user_id, source_ap_id, ephemeral_public_key,
                    ephemeral_secret_pem, status, created_at, expires_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    request.temp_user_id,
                    request.requesting_ap_id,
                    request.destination_ap_id,
                    request.encrypted_payload,
                    request.recovery_hash,
                    request.real_user_id,
                    request.source_ap_id,
                    request.ephemeral_public_key,
                    request.ephemeral_secret_pem,
                    request.status.as_str(),
                    request.created_at,
                    request.expires_at,
                ],
            )?;
            if conn.changes() == 0 {
                Ok(InsertOutcome::AlreadyExists)
            } else {
                Ok(InsertOutcome::Inserted)
            }
        })
        .await
    }

    async fn get_recovery_request(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryRequest>> {
        let temp_user_id = temp_user_id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT * FROM recovery_requests WHERE temp_user_id = ?1",
                params![temp_user_id],
                row_to_request,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn update_recovery_request_status(
        &self,
        temp_user_id: &str,
        from: RecoveryStatus,
        to: RecoveryStatus,
    ) -> Result<bool> {
        let temp_user_id = temp_user_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "UPDATE recovery_requests SET status = ?3
                 WHERE temp_user_id = ?1 AND status = ?2",
                params![temp_user_id, from.as_str(), to.as_str()],
            )?;
            Ok(conn.changes() > 0)
        })
        .await
    }

    async fn list_recovery_requests(
        &self,
        status: RecoveryStatus,
        destination_ap_id: Option<&str>,
    ) -> Result<Vec<CrossApRecoveryRequest>> {
        let destination = destination_ap_id.map(str::to_string);
        self.blocking(move |conn| {
            let requests = match destination {
                Some(ap) => {
                    let mut stmt = conn.prepare(
                        "SELECT * FROM recovery_requests
                         WHERE status = ?1 AND destination_ap_id = ?2",
                    )?;
                    let rows = stmt
                        .query_map(params![status.as_str(), ap], row_to_request)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
                None => {
                    let mut stmt =
                        conn.prepare("SELECT * FROM recovery_requests WHERE status = ?1")?;
                    let rows = stmt
                        .query_map(params![status.as_str()], row_to_request)?
                        .collect::<rusqlite::Result<Vec<_>>>()?;
                    rows
                }
            };
            Ok(requests)
        })
        .await
    }

    async fn delete_recovery_request(&self, temp_user_id: &str) -> Result<()> {
        let temp_user_id = temp_user_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM recovery_requests WHERE temp_user_id = ?1",
                params![temp_user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn insert_recovery_response(
        &self,
        response: &CrossApRecoveryResponse,
    ) -> Result<InsertOutcome> {
        let response = response.clone();
        self.blocking(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO recovery_responses (
                    temp_user_id, encrypted_token_data, requesting_ap_id,
                    source_ap_id, signature, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    response.temp_user_id,
                    response.encrypted_token_data,
                    response.requesting_ap_id,
                    response.source_ap_id,
                    response.signature,
                    response.created_at,
                ],
            )?;
            if conn.changes() == 0 {
                Ok(InsertOutcome::AlreadyExists)
            } else {
                Ok(InsertOutcome::Inserted)
            }
        })
        .await
    }

    async fn get_recovery_response(
        &self,
        temp_user_id: &str,
    ) -> Result<Option<CrossApRecoveryResponse>> {
        let temp_user_id = temp_user_id.to_string();
        self.blocking(move |conn| {
            conn.query_row(
                "SELECT * FROM recovery_responses WHERE temp_user_id = ?1",
                params![temp_user_id],
                row_to_response,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn list_recovery_responses_for(
        &self,
        requesting_ap_id: &str,
    ) -> Result<Vec<CrossApRecoveryResponse>> {
        let requesting_ap_id = requesting_ap_id.to_string();
        self.blocking(move |conn| {
            let mut stmt = conn
                .prepare("SELECT * FROM recovery_responses WHERE requesting_ap_id = ?1")?;
            let responses = stmt
                .query_map(params![requesting_ap_id], row_to_response)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(responses)
        })
        .await
    }

    async fn list_recovery_responses(&self) -> Result<Vec<CrossApRecoveryResponse>> {
        self.blocking(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM recovery_responses")?;
            let responses = stmt
                .query_map([], row_to_response)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(responses)
        })
        .await
    }

    async fn delete_recovery_response(&self, temp_user_id: &str) -> Result<()> {
        let temp_user_id = temp_user_id.to_string();
        self.blocking(move |conn| {
            conn.execute(
                "DELETE FROM recovery_responses WHERE temp_user_id = ?1",
                params![temp_user_id],
            )?;
            Ok(())
        })
        .await
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
