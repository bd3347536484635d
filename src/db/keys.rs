//! Encrypted provider API key storage.
//!
//! The database only ever sees ciphertext; sealing and opening happen in
//! [`crate::vault`].

use super::{Database, now_ms};
use anyhow::Result;
use rusqlite::params;

impl Database {
    /// Insert or replace the sealed key for (owner, provider).
    pub fn put_api_key(&self, owner_id: &str, provider: &str, ciphertext: &str) -> Result<()> {
        let now = now_ms();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO api_keys (owner_id, provider, ciphertext, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(owner_id, provider)
                 DO UPDATE SET ciphertext = excluded.ciphertext, updated_at = excluded.updated_at",
                params![owner_id, provider, ciphertext, now],
            )?;
            Ok(())
        })
    }

    pub fn get_api_key_ciphertext(&self, owner_id: &str, provider: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT ciphertext FROM api_keys WHERE owner_id = ?1 AND provider = ?2")?;
            match stmt.query_row(params![owner_id, provider], |row| row.get(0)) {
                Ok(ciphertext) => Ok(Some(ciphertext)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Providers the owner has stored a key for, alphabetically.
    pub fn list_api_key_providers(&self, owner_id: &str) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT provider FROM api_keys WHERE owner_id = ?1 ORDER BY provider")?;
            let providers = stmt
                .query_map(params![owner_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(providers)
        })
    }

    /// Remove a stored key. Returns whether a row was deleted.
    pub fn delete_api_key(&self, owner_id: &str, provider: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute(
                "DELETE FROM api_keys WHERE owner_id = ?1 AND provider = ?2",
                params![owner_id, provider],
            )?;
            Ok(deleted > 0)
        })
    }
}
