// Verify the strings that form the public protocol between the model and
// the loop. Prompts depend on these exactly — never change them without
// coordinating with the prompt side.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use cortex_agent::output::{parse_response, HEARTBEAT_OK, NO_REPLY};
use cortex_agent::processing::OPS_TRIGGER_SENTINEL;
use cortex_core::types::{Envelope, Priority, Relationship, SenderRef};
use cortex_router::GATEWAY_CRASH_ERROR;
use cortex_sessions::store::{OPS_SENDER, SILENCE_MARKER};
use cortex_sessions::{OpKind, PendingOp, SessionStore};

fn trigger() -> Envelope {
    Envelope::new(
        "webchat",
        SenderRef::new("u1", "U", Relationship::External),
        "hi",
        Priority::Normal,
    )
}

fn store() -> SessionStore {
    let conn = Connection::open_in_memory().unwrap();
    cortex_sessions::db::init_db(&conn).unwrap();
    SessionStore::new(Arc::new(Mutex::new(conn)))
}

#[test]
fn silence_sentinels_are_exact() {
    assert_eq!(NO_REPLY, "NO_REPLY");
    assert_eq!(HEARTBEAT_OK, "HEARTBEAT_OK");
    assert!(parse_response("NO_REPLY", &trigger()).is_empty());
    assert!(parse_response("HEARTBEAT_OK", &trigger()).is_empty());
    // Near-misses are ordinary replies, not silence.
    for not_silence in ["NO_REPLY.", "no_reply", "HEARTBEAT OK", "NOREPLY"] {
        assert_eq!(parse_response(not_silence, &trigger()).len(), 1, "{not_silence}");
    }
}

#[test]
fn send_to_directive_wire_form() {
    let targets = parse_response("[[send_to:whatsapp]] ping", &trigger());
    assert_eq!(targets[0].channel, "whatsapp");
    assert_eq!(targets[0].content, "ping");
}

#[test]
fn reply_to_current_is_a_noop_directive() {
    let targets = parse_response("[[reply_to_current]] pong", &trigger());
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].channel, "webchat");
    assert_eq!(targets[0].content, "pong");
}

#[test]
fn silence_marker_row_is_literal() {
    assert_eq!(SILENCE_MARKER, "[silence]");
}

#[test]
fn ops_trigger_sentinel_is_literal() {
    assert_eq!(OPS_TRIGGER_SENTINEL, "[Task update available]");
}

#[test]
fn gateway_crash_error_is_literal() {
    assert_eq!(GATEWAY_CRASH_ERROR, "gateway crash: max retries exceeded");
}

#[test]
fn task_result_row_format() {
    let s = store();
    let op = PendingOp::new("job-1", OpKind::RouterJob, "measure things", "router");
    s.add_op(&op).unwrap();
    s.complete_op("job-1", "42 units").unwrap();
    s.copy_and_delete_terminal_ops().unwrap();

    let row = &s.history(Some("router"), None, 1).unwrap()[0];
    assert_eq!(
        row.content,
        "[TASK_RESULT] [TASK_ID]=job-1, Message='measure things', Result='42 units'"
    );
    assert_eq!(row.sender_id, OPS_SENDER);
}

#[test]
fn task_failed_row_format() {
    let s = store();
    let op = PendingOp::new("job-2", OpKind::RouterJob, "doomed", "router");
    s.add_op(&op).unwrap();
    s.fail_op("job-2", "it broke").unwrap();
    s.copy_and_delete_terminal_ops().unwrap();

    let row = &s.history(Some("router"), None, 1).unwrap()[0];
    assert_eq!(
        row.content,
        "[TASK_FAILED] [TASK_ID]=job-2, Message='doomed', Error='it broke'"
    );
}

#[test]
fn dispatch_evidence_row_format() {
    let mut op = PendingOp::new("task-9", OpKind::RouterJob, "fetch metrics", "webchat");
    op.reply_channel = Some("webchat".to_string());
    op.dispatched_at = "2026-07-01T12:00:00+00:00".to_string();

    assert_eq!(
        cortex_agent::dispatch::evidence_row(&op),
        "[DISPATCHED] [TASK_ID]=task-9, Message='fetch metrics', Status=Pending, \
         Channel=webchat, DispatchedAt=2026-07-01T12:00:00+00:00"
    );
}
