use super::{Db, models::*, serialize_vector};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Result, params};

fn map_collection_row(row: &rusqlite::Row<'_>) -> Result<CollectionRow> {
    Ok(CollectionRow {
        id: row.get(0)?,
        name: row.get(1)?,
        source_path: row.get(2)?,
        source_modified_at: row.get(3)?,
        created_at: row.get(4)?,
    })
}

impl Db {
    /// Creates an empty collection. Fails on a duplicate name.
    pub fn create_collection(
        &self,
        name: &str,
        source_path: Option<&str>,
        source_modified_at: Option<DateTime<Utc>>,
    ) -> Result<CollectionRow> {
        self.conn.query_row(
            r#"
            INSERT INTO collections (name, source_path, source_modified_at, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, name, source_path, source_modified_at, created_at
            "#,
            params![name, source_path, source_modified_at, Utc::now()],
            map_collection_row,
        )
    }

    pub fn find_collection(&self, name: &str) -> Result<Option<CollectionRow>> {
        self.conn
            .query_row(
                "SELECT id, name, source_path, source_modified_at, created_at FROM collections WHERE name = ?",
                params![name],
                map_collection_row,
            )
            .optional()
    }

    /// Returns all collection names, sorted.
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM collections ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect()
    }

    /// Deletes a collection with its chunks and vectors. Returns `false`
    /// when no such collection exists.
    pub fn delete_collection(&mut self, name: &str) -> Result<bool> {
        let tx = self.conn.transaction()?;

        let id: Option<i64> = tx
            .query_row(
                "SELECT id FROM collections WHERE name = ?",
                params![name],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(false);
        };

        // Virtual table cascade deletion workaround
        tx.execute(
            "DELETE FROM vec_chunks WHERE rowid IN (SELECT id FROM chunks WHERE collection_id = ?)",
            params![id],
        )?;
        tx.execute("DELETE FROM collections WHERE id = ?", params![id])?;
        tx.commit()?;
        Ok(true)
    }

    /// Inserts chunks and their embeddings atomically.
    ///
    /// A key that already exists in the collection aborts the whole batch.
    pub fn insert_chunks(
        &mut self,
        collection_id: i64,
        chunks: &[NewChunk<'_>],
        embeddings: &[Vec<f32>],
    ) -> Result<usize> {
        if chunks.len() != embeddings.len() {
            return Err(rusqlite::Error::InvalidParameterCount(
                embeddings.len(),
                chunks.len(),
            ));
        }

        let tx = self.conn.transaction()?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            tx.execute(
                "INSERT INTO chunks (collection_id, chunk_key, content, metadata) VALUES (?, ?, ?, ?)",
                params![collection_id, chunk.key, chunk.content, chunk.metadata],
            )?;
            let chunk_id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO vec_chunks (rowid, embedding) VALUES (?, ?)",
                params![chunk_id, serialize_vector(embedding)],
            )?;
        }

        tx.commit()?;
        Ok(chunks.len())
    }

    pub fn count_chunks(&self, collection_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE collection_id = ?",
            params![collection_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Chunk keys of a collection in insertion order.
    pub fn chunk_keys(&self, collection_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT chunk_key FROM chunks WHERE collection_id = ? ORDER BY id")?;
        let rows = stmt.query_map(params![collection_id], |row| row.get(0))?;
        rows.collect()
    }
}
