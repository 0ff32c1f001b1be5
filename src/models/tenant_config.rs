//! Per-(CompanyID, PixelID) configuration flags (spec.md §3.7, §4.5, §4.6).
//!
//! Structural analogue of the teacher's `ConfigDb`: a `rusqlite::Connection`
//! behind a `Mutex`, migrated idempotently on `open()`.

use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Mutex;

pub struct TenantConfigDb {
    conn: Mutex<Connection>,
}

#[derive(Debug, Clone, Copy)]
pub struct TenantFlags {
    pub match_email_enabled: bool,
    pub match_ip_enabled: bool,
}

impl Default for TenantFlags {
    /// Default when no config row exists: both enabled (spec.md §4.5 step 2).
    fn default() -> Self {
        Self {
            match_email_enabled: true,
            match_ip_enabled: true,
        }
    }
}

impl TenantConfigDb {
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tenant_pixel_config (
                company_id         TEXT NOT NULL,
                pixel_id           TEXT NOT NULL,
                match_email_enabled INTEGER NOT NULL DEFAULT 1,
                match_ip_enabled    INTEGER NOT NULL DEFAULT 1,
                created_at          TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (company_id, pixel_id)
            );
            ",
        )?;
        Ok(())
    }

    pub fn flags(&self, company_id: &str, pixel_id: &str) -> anyhow::Result<TenantFlags> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT match_email_enabled, match_ip_enabled FROM tenant_pixel_config \
                 WHERE company_id = ?1 AND pixel_id = ?2",
                params![company_id, pixel_id],
                |r| {
                    Ok(TenantFlags {
                        match_email_enabled: r.get::<_, i64>(0)? != 0,
                        match_ip_enabled: r.get::<_, i64>(1)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(row.unwrap_or_default())
    }

    pub fn set_flags(
        &self,
        company_id: &str,
        pixel_id: &str,
        flags: TenantFlags,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tenant_pixel_config (company_id, pixel_id, match_email_enabled, match_ip_enabled) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(company_id, pixel_id) DO UPDATE SET \
                match_email_enabled = excluded.match_email_enabled, \
                match_ip_enabled = excluded.match_ip_enabled",
            params![
                company_id,
                pixel_id,
                flags.match_email_enabled as i64,
                flags.match_ip_enabled as i64
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_row_defaults_to_enabled() {
        let db = TenantConfigDb::open_in_memory().unwrap();
        let flags = db.flags("42", "1").unwrap();
        assert!(flags.match_email_enabled);
        assert!(flags.match_ip_enabled);
    }

    #[test]
    fn explicit_disable_is_respected() {
        let db = TenantConfigDb::open_in_memory().unwrap();
        db.set_flags(
            "42",
            "1",
            TenantFlags {
                match_email_enabled: false,
                match_ip_enabled: true,
            },
        )
        .unwrap();
        let flags = db.flags("42", "1").unwrap();
        assert!(!flags.match_email_enabled);
        assert!(flags.match_ip_enabled);
    }
}
