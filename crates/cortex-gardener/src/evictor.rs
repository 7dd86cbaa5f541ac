use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use cortex_core::config::GardenerConfig;
use cortex_hippocampus::Hippocampus;

use crate::error::Result;

/// Moves stale hot facts into cold storage.
///
/// A fact qualifies once it has gone unaccessed past the staleness window
/// with a low hit count. When cold memory is unavailable the demotion is a
/// no-op and the fact stays hot — nothing is ever silently dropped.
pub struct Evictor {
    hippocampus: Arc<Hippocampus>,
    cfg: GardenerConfig,
}

impl Evictor {
    pub fn new(hippocampus: Arc<Hippocampus>, cfg: GardenerConfig) -> Self {
        Self { hippocampus, cfg }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.evict_interval_secs,
            "evictor started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.evict_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(n) => info!(count = n, "stale facts demoted to cold"),
                        Err(e) => error!(error = %e, "evictor tick error"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("evictor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One eviction pass. Returns how many facts moved to cold.
    pub async fn tick(&self) -> Result<usize> {
        let stale = self
            .hippocampus
            .stale_hot(self.cfg.stale_after_days, self.cfg.stale_max_hits)?;
        let mut demoted = 0;
        for fact in stale {
            if self.hippocampus.demote(&fact.text).await? {
                demoted += 1;
            }
        }
        Ok(demoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cortex_hippocampus::Embedder;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct FlatEmbedder;

    #[async_trait]
    impl Embedder for FlatEmbedder {
        fn dimension(&self) -> usize {
            4
        }

        async fn embed(&self, text: &str) -> cortex_hippocampus::Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 0.0, 0.0, 0.0])
        }
    }

    fn fixture(with_cold: bool) -> (Arc<Mutex<Connection>>, Arc<Hippocampus>, Evictor) {
        let conn = Connection::open_in_memory().unwrap();
        cortex_hippocampus::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let hippocampus = if with_cold {
            Arc::new(Hippocampus::new(db.clone(), Some(Arc::new(FlatEmbedder)), 4))
        } else {
            Arc::new(Hippocampus::new(db.clone(), None, 0))
        };
        let evictor = Evictor::new(hippocampus.clone(), GardenerConfig::default());
        (db, hippocampus, evictor)
    }

    fn backdate_all(db: &Arc<Mutex<Connection>>) {
        db.lock()
            .unwrap()
            .execute(
                "UPDATE cortex_hot_memory SET last_accessed_at = '2020-01-01T00:00:00+00:00'",
                [],
            )
            .unwrap();
    }

    #[tokio::test]
    async fn stale_facts_move_to_cold() {
        let (db, hippocampus, evictor) = fixture(true);
        hippocampus.insert_hot("old fact").unwrap();
        backdate_all(&db);

        assert_eq!(evictor.tick().await.unwrap(), 1);
        assert!(hippocampus.top_hot(10).unwrap().is_empty());
        let hits = hippocampus
            .knn(&["old fact".len() as f32, 0.0, 0.0, 0.0], 1)
            .unwrap();
        assert_eq!(hits[0].text, "old fact");
    }

    #[tokio::test]
    async fn without_cold_store_facts_stay_hot() {
        let (db, hippocampus, evictor) = fixture(false);
        hippocampus.insert_hot("sticky fact").unwrap();
        backdate_all(&db);

        assert_eq!(evictor.tick().await.unwrap(), 0);
        assert_eq!(hippocampus.top_hot(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fresh_or_popular_facts_survive() {
        let (db, hippocampus, evictor) = fixture(true);
        hippocampus.insert_hot("fresh fact").unwrap();
        hippocampus.insert_hot("popular fact").unwrap();
        for _ in 0..5 {
            hippocampus.touch_hot("popular fact").unwrap();
        }
        // Backdate only the popular fact; its hit count protects it.
        db.lock()
            .unwrap()
            .execute(
                "UPDATE cortex_hot_memory SET last_accessed_at = '2020-01-01T00:00:00+00:00'
                 WHERE fact_text = 'popular fact'",
                [],
            )
            .unwrap();

        assert_eq!(evictor.tick().await.unwrap(), 0);
        assert_eq!(hippocampus.top_hot(10).unwrap().len(), 2);
    }
}
