//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL
//! string that transforms the schema from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            tracing::debug!(version, "applying schema migration");
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Registered users, including the local recovery record
        CREATE TABLE users (
            username TEXT PRIMARY KEY,
            ap_reg TEXT NOT NULL,
            mt_pub_key TEXT,
            recovery_key_hash TEXT,               -- PBKDF2-HMAC-SHA512, hex
            recovery_key_salt TEXT,               -- hex
            recovery_fingerprint TEXT,            -- unsalted SHA-256 phrase digest, hex
            recovery_key_updated_at INTEGER,
            recovery_signature TEXT,
            recovery_source TEXT,
            created_at INTEGER NOT NULL
        );

        -- Messages, content-addressed by hashKey
        CREATE TABLE messages (
            hash_key TEXT PRIMARY KEY,            -- hex SHA-256 content address
            channel TEXT NOT NULL,
            content TEXT NOT NULL,
            usernick TEXT NOT NULL,
            origin TEXT NOT NULL,                 -- issuing AP id
            certificate TEXT NOT NULL,            -- signature.<APCertificate>
            tod INTEGER NOT NULL,
            is_safe INTEGER NOT NULL,
            has_image INTEGER,
            image_data TEXT,
            ingested_at INTEGER NOT NULL
        );

        -- Channels, last-writer-wins by tod
        CREATE TABLE channels (
            channel_name TEXT PRIMARY KEY,
            is_active INTEGER NOT NULL,
            tod INTEGER NOT NULL,
            channel_cert TEXT NOT NULL
        );

        -- Revoked privileged-user keys, append-only
        CREATE TABLE blacklisted_pus (
            pub_key TEXT PRIMARY KEY,
            tod INTEGER NOT NULL
        );

        -- Cross-AP recovery requests. The tempUserId primary key closes
        -- the check-then-act race on concurrent sync ingestion.
        CREATE TABLE recovery_requests (
            temp_user_id TEXT PRIMARY KEY,
            requesting_ap_id TEXT NOT NULL,
            destination_ap_id TEXT NOT NULL,
            encrypted_payload TEXT NOT NULL,
            recovery_hash TEXT,
            real_user_id TEXT,
            source_ap_id TEXT,
            ephemeral_public_key TEXT,
            ephemeral_secret_pem TEXT,            -- requester-local only
            status TEXT NOT NULL,                 -- PENDING / COMPLETED / EXPIRED
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        -- Cross-AP recovery responses, unique per attempt
        CREATE TABLE recovery_responses (
            temp_user_id TEXT PRIMARY KEY,
            encrypted_token_data TEXT NOT NULL,
            requesting_ap_id TEXT NOT NULL,
            source_ap_id TEXT NOT NULL,
            signature TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Indexes for common queries
        CREATE INDEX idx_messages_channel ON messages(channel);
        CREATE INDEX idx_messages_tod ON messages(tod);
        CREATE INDEX idx_users_recovery_fingerprint ON users(recovery_fingerprint);
        CREATE INDEX idx_recovery_requests_status ON recovery_requests(status);
        CREATE INDEX idx_recovery_requests_destination ON recovery_requests(destination_ap_id);
        CREATE INDEX idx_recovery_responses_requesting ON recovery_responses(requesting_ap_id);
        "#,
    )?;

    Ok(())
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
