use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info};

use cortex_core::config::GardenerConfig;
use cortex_sessions::{AttentionLayer, SessionStore};

use crate::error::Result;

/// How much of the latest message survives into the fallback digest.
const PREVIEW_CHARS: usize = 80;

/// Demotes idle channels through the attention layers.
///
/// Foreground channels that have been quiet drop to background with a
/// one-line summary (so the assembler still mentions them); background
/// channels that stay quiet drop to archived and leave context entirely.
/// A new inbound message pulls a channel straight back to foreground via
/// the session store, so demotion is always reversible.
pub struct Compactor {
    sessions: Arc<SessionStore>,
    cfg: GardenerConfig,
}

impl Compactor {
    pub fn new(sessions: Arc<SessionStore>, cfg: GardenerConfig) -> Self {
        Self { sessions, cfg }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.cfg.compact_interval_secs,
            "compactor started"
        );
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.compact_interval_secs));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick() {
                        error!(error = %e, "compactor tick error");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("compactor shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One demotion pass. Returns how many channels moved down a layer.
    pub fn tick(&self) -> Result<usize> {
        let background_cutoff =
            (Utc::now() - chrono::Duration::hours(self.cfg.background_after_hours)).to_rfc3339();
        let archive_cutoff =
            (Utc::now() - chrono::Duration::hours(self.cfg.archive_after_hours)).to_rfc3339();

        let mut moved = 0;
        for state in self.sessions.channel_states()? {
            match state.layer {
                AttentionLayer::Foreground if state.last_message_at < background_cutoff => {
                    let summary = self.digest(&state.channel, state.unread_count)?;
                    self.sessions.set_summary(&state.channel, &summary)?;
                    self.sessions
                        .set_layer(&state.channel, AttentionLayer::Background)?;
                    info!(channel = %state.channel, "channel demoted to background");
                    moved += 1;
                }
                AttentionLayer::Background if state.last_message_at < archive_cutoff => {
                    self.sessions
                        .set_layer(&state.channel, AttentionLayer::Archived)?;
                    info!(channel = %state.channel, "channel archived");
                    moved += 1;
                }
                _ => {}
            }
        }
        Ok(moved)
    }

    /// Plain digest built from the channel's own log: row count plus a
    /// preview of the most recent message.
    fn digest(&self, channel: &str, unread: u32) -> Result<String> {
        let total = self.sessions.count_rows(channel)?;
        let recent = self.sessions.history(Some(channel), None, 1)?;
        let preview = recent
            .last()
            .map(|m| truncate(&m.content, PREVIEW_CHARS))
            .unwrap_or_default();
        Ok(if preview.is_empty() {
            format!("{total} messages, {unread} unread")
        } else {
            format!("{total} messages, {unread} unread; last: {preview}")
        })
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Mutex;

    fn fixture() -> (Arc<Mutex<Connection>>, Arc<SessionStore>, Compactor) {
        let conn = Connection::open_in_memory().unwrap();
        cortex_sessions::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let sessions = Arc::new(SessionStore::new(db.clone()));
        let compactor = Compactor::new(sessions.clone(), GardenerConfig::default());
        (db, sessions, compactor)
    }

    fn backdate(db: &Arc<Mutex<Connection>>, channel: &str, hours: i64) {
        let ts = (Utc::now() - chrono::Duration::hours(hours)).to_rfc3339();
        db.lock()
            .unwrap()
            .execute(
                "UPDATE cortex_channel_states SET last_message_at = ?2 WHERE channel = ?1",
                rusqlite::params![channel, ts],
            )
            .unwrap();
    }

    #[test]
    fn idle_foreground_channel_gets_summary_and_background() {
        let (db, sessions, compactor) = fixture();
        sessions.append_user("whatsapp", "u1", "see you at the station", None).unwrap();
        sessions.record_incoming("whatsapp").unwrap();
        backdate(&db, "whatsapp", 12);

        assert_eq!(compactor.tick().unwrap(), 1);
        let state = sessions.channel_state("whatsapp").unwrap().unwrap();
        assert_eq!(state.layer, AttentionLayer::Background);
        let summary = state.summary.unwrap();
        assert!(summary.contains("see you at the station"));
        assert!(summary.contains("1 unread"));
    }

    #[test]
    fn long_idle_background_channel_is_archived() {
        let (db, sessions, compactor) = fixture();
        sessions.record_incoming("irc").unwrap();
        sessions.set_layer("irc", AttentionLayer::Background).unwrap();
        backdate(&db, "irc", 100);

        assert_eq!(compactor.tick().unwrap(), 1);
        let state = sessions.channel_state("irc").unwrap().unwrap();
        assert_eq!(state.layer, AttentionLayer::Archived);
    }

    #[test]
    fn active_channels_are_left_alone() {
        let (_db, sessions, compactor) = fixture();
        sessions.record_incoming("webchat").unwrap();

        assert_eq!(compactor.tick().unwrap(), 0);
        let state = sessions.channel_state("webchat").unwrap().unwrap();
        assert_eq!(state.layer, AttentionLayer::Foreground);
    }
}
