use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    error::{StoreError, StoreResult},
    helpers::{parse_datetime, parse_optional_datetime, to_bool},
    models::ImageRecord,
};

const IMAGE_COLUMNS: &str = "id, name, size_kb, created_at, ignore, sent, sent_at, status";

fn row_to_image(row: &Row) -> Result<ImageRecord> {
    let created_at: String = row.get("created_at")?;
    let sent_at: Option<String> = row.get("sent_at")?;
    let ignore: i64 = row.get("ignore")?;
    let sent: i64 = row.get("sent")?;

    Ok(ImageRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        size_kb: row.get("size_kb")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        ignore: to_bool(ignore),
        sent: to_bool(sent),
        sent_at: parse_optional_datetime(sent_at, "sent_at")?,
        status: row.get("status")?,
    })
}

fn query_images(
    conn: &rusqlite::Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ImageRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let mut images = Vec::new();
    while let Some(row) = rows.next()? {
        images.push(row_to_image(row)?);
    }
    Ok(images)
}

fn require_row(rows_affected: usize, name: String) -> StoreResult<()> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(name));
    }
    Ok(())
}

impl Database {
    /// Insert a new, eligible record. A duplicate name leaves the existing row
    /// untouched and reports [`StoreError::AlreadyExists`].
    pub async fn create_image(
        &self,
        name: &str,
        size_kb: f64,
        created_at: DateTime<Utc>,
    ) -> StoreResult<ImageRecord> {
        let image_name = name.to_string();
        let inserted = self
            .execute(move |conn| {
                let rows_affected = conn.execute(
                    "INSERT INTO images (name, size_kb, created_at)
                     VALUES (?1, ?2, ?3)
                     ON CONFLICT(name) DO NOTHING",
                    params![image_name, size_kb, created_at.to_rfc3339()],
                )?;
                if rows_affected == 0 {
                    return Ok(None);
                }

                let id = conn.last_insert_rowid();
                let sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE id = ?1");
                let image = conn.query_row(&sql, params![id], |row| Ok(row_to_image(row)))??;
                Ok(Some(image))
            })
            .await?;

        inserted.ok_or_else(|| StoreError::AlreadyExists(name.to_string()))
    }

    pub async fn get_image(&self, name: &str) -> StoreResult<Option<ImageRecord>> {
        let name = name.to_string();
        self.execute(move |conn| {
            let sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE name = ?1");
            let image = conn
                .query_row(&sql, params![name], |row| Ok(row_to_image(row)))
                .optional()?
                .transpose()?;
            Ok(image)
        })
        .await
    }

    /// Records that are neither leased nor delivered. Order is unspecified.
    pub async fn list_eligible(&self) -> StoreResult<Vec<ImageRecord>> {
        self.execute(|conn| {
            let sql = format!("SELECT {IMAGE_COLUMNS} FROM images WHERE ignore = 0 AND sent = 0");
            query_images(conn, &sql, [])
        })
        .await
    }

    /// Every non-leased record, newest first.
    pub async fn list_images(&self) -> StoreResult<Vec<ImageRecord>> {
        self.execute(|conn| {
            let sql =
                format!("SELECT {IMAGE_COLUMNS} FROM images WHERE ignore = 0 ORDER BY id DESC");
            query_images(conn, &sql, [])
        })
        .await
    }

    /// Undelivered records whose lease is still held.
    pub async fn list_leased(&self) -> StoreResult<Vec<ImageRecord>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {IMAGE_COLUMNS} FROM images WHERE ignore = 1 AND sent = 0 ORDER BY id ASC"
            );
            query_images(conn, &sql, [])
        })
        .await
    }

    pub async fn count_unsent(&self) -> StoreResult<u64> {
        self.execute(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM images WHERE sent = 0", [], |row| {
                    row.get(0)
                })?;
            Ok(count.max(0) as u64)
        })
        .await
    }

    /// Take the transient lease. Re-acquiring a held lease is a no-op.
    pub async fn lease_acquire(&self, name: &str) -> StoreResult<()> {
        self.set_ignore(name, true).await
    }

    pub async fn lease_release(&self, name: &str) -> StoreResult<()> {
        self.set_ignore(name, false).await
    }

    async fn set_ignore(&self, name: &str, ignore: bool) -> StoreResult<()> {
        let image_name = name.to_string();
        let rows_affected = self
            .execute(move |conn| {
                let rows = conn.execute(
                    "UPDATE images SET ignore = ?1 WHERE name = ?2",
                    params![ignore as i64, image_name],
                )?;
                Ok(rows)
            })
            .await?;
        require_row(rows_affected, name.to_string())
    }

    /// Marks the record delivered. The first `sent_at` stamp is kept, so
    /// calling this again on a delivered record succeeds without change.
    pub async fn mark_sent(&self, name: &str) -> StoreResult<()> {
        let image_name = name.to_string();
        let sent_at = Utc::now().to_rfc3339();
        let rows_affected = self
            .execute(move |conn| {
                let rows = conn.execute(
                    "UPDATE images
                     SET sent = 1,
                         sent_at = COALESCE(sent_at, ?1)
                     WHERE name = ?2",
                    params![sent_at, image_name],
                )?;
                Ok(rows)
            })
            .await?;
        require_row(rows_affected, name.to_string())
    }

    pub async fn update_status(&self, name: &str, status: i64) -> StoreResult<()> {
        let image_name = name.to_string();
        let rows_affected = self
            .execute(move |conn| {
                let rows = conn.execute(
                    "UPDATE images SET status = ?1 WHERE name = ?2",
                    params![status, image_name],
                )?;
                Ok(rows)
            })
            .await?;
        require_row(rows_affected, name.to_string())
    }

    pub async fn delete_image(&self, name: &str) -> StoreResult<()> {
        let image_name = name.to_string();
        let rows_affected = self
            .execute(move |conn| {
                let rows = conn.execute("DELETE FROM images WHERE name = ?1", params![image_name])?;
                Ok(rows)
            })
            .await?;
        require_row(rows_affected, name.to_string())
    }

    /// Removes every record. Ids keep increasing afterwards.
    pub async fn destroy_all(&self) -> StoreResult<usize> {
        self.execute(|conn| {
            let rows = conn.execute("DELETE FROM images", [])?;
            Ok(rows)
        })
        .await
    }
}
