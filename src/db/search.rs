use super::{Db, serialize_vector};
use rusqlite::{Result, params};

#[derive(Debug, Clone)]
pub struct ChunkHit {
    pub key: String,
    pub content: String,
    /// Metadata object as stored (JSON text).
    pub metadata: String,
    pub similarity: f64,
}

fn map_hit_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChunkHit> {
    let distance: f64 = row.get(3)?;
    let similarity = 1.0 - (distance / 2.0);

    Ok(ChunkHit {
        key: row.get(0)?,
        content: row.get(1)?,
        metadata: row.get(2)?,
        similarity,
    })
}

impl Db {
    /// Cosine-distance search restricted to one collection, nearest first.
    pub fn search_collection(
        &self,
        collection_id: i64,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<ChunkHit>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                c.chunk_key,
                c.content,
                c.metadata,
                vec_distance_cosine(v.embedding, ?) as distance
            FROM vec_chunks v
            JOIN chunks c ON v.rowid = c.id
            WHERE c.collection_id = ?
            ORDER BY distance ASC, c.id ASC
            LIMIT ?
            "#,
        )?;

        let rows = stmt.query_map(
            params![serialize_vector(query_vector), collection_id, top_k as i64],
            map_hit_row,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewChunk;

    fn padded(head: &[f32]) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        v[..head.len()].copy_from_slice(head);
        v
    }

    #[test]
    fn test_search_collection() {
        let mut db = Db::open_in_memory(8).unwrap();
        let reference = db.create_collection("reference", None, None).unwrap();
        let other = db.create_collection("contract_x", None, None).unwrap();

        let chunks = vec![
            NewChunk {
                key: "wages",
                content: "Pasal 88 upah",
                metadata: r#"{"article_number":"88"}"#,
            },
            NewChunk {
                key: "leave",
                content: "Pasal 79 cuti",
                metadata: "{}",
            },
        ];
        let embeddings = vec![padded(&[0.9, 0.1, 0.0]), padded(&[0.0, 0.2, 0.9])];
        db.insert_chunks(reference.id, &chunks, &embeddings).unwrap();

        let foreign = vec![NewChunk {
            key: "x",
            content: "contract text",
            metadata: "{}",
        }];
        db.insert_chunks(other.id, &foreign, &[padded(&[0.9, 0.1, 0.0])])
            .unwrap();

        let results = db
            .search_collection(reference.id, &padded(&[0.9, 0.1, 0.0]), 5)
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].key, "wages");
        assert!(results[0].similarity > 0.99);
        assert!(results[0].similarity > results[1].similarity);
        assert!(results[0].metadata.contains("88"));

        let limited = db
            .search_collection(reference.id, &padded(&[0.0, 0.2, 0.9]), 1)
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].key, "leave");
    }

    #[test]
    fn test_search_empty_collection() {
        let db = Db::open_in_memory(8).unwrap();
        let empty = db.create_collection("empty", None, None).unwrap();
        let results = db.search_collection(empty.id, &padded(&[1.0]), 3).unwrap();
        assert!(results.is_empty());
    }
}
