use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::embed::Embedder;
use crate::error::{MemoryError, Result};
use crate::types::{ColdHit, HotFact};

/// Hot/cold memory behind one interface.
///
/// Hot memory is always available. Cold memory needs an embedder and a
/// vector table; when either is missing every cold operation degrades to a
/// defined empty no-op instead of failing the process.
pub struct Hippocampus {
    db: Arc<Mutex<Connection>>,
    embedder: Option<Arc<dyn Embedder>>,
    dimension: usize,
    cold_available: bool,
}

impl Hippocampus {
    /// Wrap an already-open connection. `embedder` may be `None` for
    /// hot-only operation; cold initialisation failure is tolerated.
    pub fn new(
        db: Arc<Mutex<Connection>>,
        embedder: Option<Arc<dyn Embedder>>,
        dimension: usize,
    ) -> Self {
        let cold_available = match (&embedder, dimension) {
            (Some(_), d) if d > 0 => {
                let conn = db.lock().unwrap();
                match crate::db::init_cold(&conn) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(error = %e, "cold memory unavailable, continuing hot-only");
                        false
                    }
                }
            }
            _ => false,
        };
        if !cold_available {
            info!("hippocampus running hot-only");
        }
        Self {
            db,
            embedder,
            dimension,
            cold_available,
        }
    }

    pub fn cold_available(&self) -> bool {
        self.cold_available
    }

    // --- hot memory --------------------------------------------------------

    /// Insert a fact; exact duplicates are ignored. Returns whether a new
    /// row was created.
    pub fn insert_hot(&self, text: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO cortex_hot_memory (fact_text, inserted_at, last_accessed_at, hit_count)
             VALUES (?1, ?2, ?2, 0)",
            rusqlite::params![text, now],
        )?;
        Ok(inserted > 0)
    }

    /// Top-N facts by hit count desc, then last-accessed desc.
    pub fn top_hot(&self, n: usize) -> Result<Vec<HotFact>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, fact_text, inserted_at, last_accessed_at, hit_count
             FROM cortex_hot_memory
             ORDER BY hit_count DESC, last_accessed_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![n as i64], row_to_fact)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    /// Bump hit count and refresh the access timestamp. Returns whether the
    /// fact existed.
    pub fn touch_hot(&self, text: &str) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE cortex_hot_memory
             SET hit_count = hit_count + 1, last_accessed_at = ?2
             WHERE fact_text = ?1",
            rusqlite::params![text, now],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_hot(&self, text: &str) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "DELETE FROM cortex_hot_memory WHERE fact_text = ?1",
            rusqlite::params![text],
        )?;
        Ok(changed > 0)
    }

    /// Facts not touched for `older_than_days` with at most `max_hits` hits —
    /// the eviction candidates the Gardener demotes to cold.
    pub fn stale_hot(&self, older_than_days: i64, max_hits: u32) -> Result<Vec<HotFact>> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(older_than_days)).to_rfc3339();
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, fact_text, inserted_at, last_accessed_at, hit_count
             FROM cortex_hot_memory
             WHERE last_accessed_at < ?1 AND hit_count <= ?2
             ORDER BY last_accessed_at",
        )?;
        let rows = stmt.query_map(rusqlite::params![cutoff, max_hits], row_to_fact)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    // --- cold memory -------------------------------------------------------

    /// Archive a fact with its embedding. A no-op when cold memory is
    /// unavailable.
    pub fn insert_cold(&self, text: &str, embedding: &[f32]) -> Result<()> {
        if !self.cold_available {
            return Ok(());
        }
        if embedding.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                got: embedding.len(),
                expected: self.dimension,
            });
        }
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO cortex_cold_memory (fact_text, archived_at, embedding)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![text, now, vec_to_blob(embedding)],
        )?;
        Ok(())
    }

    /// Nearest neighbours by ascending Euclidean distance. Returns an empty
    /// list when cold memory is unavailable.
    pub fn knn(&self, embedding: &[f32], k: usize) -> Result<Vec<ColdHit>> {
        if !self.cold_available {
            return Ok(Vec::new());
        }
        if embedding.len() != self.dimension {
            return Err(MemoryError::DimensionMismatch {
                got: embedding.len(),
                expected: self.dimension,
            });
        }
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT fact_text, archived_at, embedding FROM cortex_cold_memory",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Vec<u8>>(2)?,
            ))
        })?;

        let mut hits: Vec<ColdHit> = Vec::new();
        for row in rows {
            let (text, archived_at, blob) = row?;
            let stored = blob_to_vec(&blob);
            if stored.len() != embedding.len() {
                continue;
            }
            hits.push(ColdHit {
                text,
                distance: euclidean(embedding, &stored),
                archived_at,
            });
        }
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    /// Move a stale hot fact into the cold store (Gardener evictor path).
    ///
    /// A no-op when cold memory is unavailable — the fact stays hot rather
    /// than being lost.
    pub async fn demote(&self, text: &str) -> Result<bool> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(false);
        };
        if !self.cold_available {
            return Ok(false);
        }
        let embedding = embedder.embed(text).await?;
        self.insert_cold(text, &embedding)?;
        self.delete_hot(text)?;
        debug!(fact = %text, "hot fact demoted to cold");
        Ok(true)
    }

    /// Embed the query, search cold memory, and promote each hit: an
    /// existing hot row with the same text is touched, otherwise the hit is
    /// inserted as a fresh hot fact. Returns the ranked hits.
    ///
    /// Promotion here is the only mechanism that moves text from cold back
    /// into hot.
    pub async fn memory_query(&self, query: &str, limit: usize) -> Result<Vec<ColdHit>> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(Vec::new());
        };
        if !self.cold_available {
            return Ok(Vec::new());
        }
        let embedding = embedder.embed(query).await?;
        let hits = self.knn(&embedding, limit)?;
        for hit in &hits {
            if !self.touch_hot(&hit.text)? {
                self.insert_hot(&hit.text)?;
                debug!(fact = %hit.text, "cold fact promoted to hot");
            }
        }
        Ok(hits)
    }
}

/// Little-endian f32 packing for the embedding BLOB column.
fn vec_to_blob(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = (*x - *y) as f64;
            d * d
        })
        .sum::<f64>()
        .sqrt()
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<HotFact> {
    Ok(HotFact {
        id: row.get(0)?,
        text: row.get(1)?,
        inserted_at: row.get(2)?,
        last_accessed_at: row.get(3)?,
        hit_count: row.get::<_, i64>(4)? as u32,
    })
}
