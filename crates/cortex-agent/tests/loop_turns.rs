//! Full-turn tests for the processing loop with scripted model, recording
//! adapters, and a recording spawner.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use cortex_agent::processing::OPS_TRIGGER_SENTINEL;
use cortex_agent::tools::{ToolRegistry, SPAWN_TOOL_NAME};
use cortex_agent::{
    CortexLoop, Disposition, LoopParts, ModelError, ModelProvider, ModelRequest, ModelResponse,
    SpawnRequest, TaskSpawner, ToolCall,
};
use cortex_bus::{BusState, MessageBus};
use cortex_channels::{AdapterRegistry, ChannelAdapter, SenderResolver};
use cortex_context::ContextAssembler;
use cortex_core::config::{ChannelModeConfig, HippocampusConfig, PipelineConfig};
use cortex_core::types::{
    Envelope, OutputTarget, Priority, Relationship, SenderRef,
};
use cortex_hippocampus::Hippocampus;
use cortex_sessions::{OpKind, OpStatus, PendingOp, Role, SessionStore};

struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<ModelRequest>>,
    fail: AtomicBool,
}

impl ScriptedModel {
    fn new(responses: Vec<ModelResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        })
    }

    fn text(content: &str) -> ModelResponse {
        ModelResponse {
            content: content.to_string(),
            tool_calls: Vec::new(),
        }
    }

    fn with_calls(content: &str, tool_calls: Vec<ToolCall>) -> ModelResponse {
        ModelResponse {
            content: content.to_string(),
            tool_calls,
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(ModelError::Provider("provider offline".to_string()));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ScriptedModel::text("NO_REPLY")))
    }
}

struct RecordingAdapter {
    id: &'static str,
    sent: Mutex<Vec<OutputTarget>>,
}

impl RecordingAdapter {
    fn new(id: &'static str) -> Arc<Self> {
        Arc::new(Self {
            id,
            sent: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ChannelAdapter for RecordingAdapter {
    fn channel_id(&self) -> &str {
        self.id
    }

    fn to_envelope(
        &self,
        _raw: &serde_json::Value,
        _resolver: &dyn SenderResolver,
    ) -> cortex_channels::Result<Envelope> {
        unimplemented!("inbound path not exercised here")
    }

    async fn send(&self, target: &OutputTarget) -> cortex_channels::Result<()> {
        self.sent.lock().unwrap().push(target.clone());
        Ok(())
    }
}

struct RecordingSpawner {
    requests: Mutex<Vec<SpawnRequest>>,
    accept: AtomicBool,
}

impl RecordingSpawner {
    fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            accept: AtomicBool::new(accept),
        })
    }
}

#[async_trait]
impl TaskSpawner for RecordingSpawner {
    async fn spawn(&self, request: &SpawnRequest) -> Option<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.accept
            .load(Ordering::SeqCst)
            .then(|| request.id.clone())
    }
}

struct Fixture {
    bus: Arc<MessageBus>,
    sessions: Arc<SessionStore>,
    cortex: CortexLoop,
    model: Arc<ScriptedModel>,
    spawner: Arc<RecordingSpawner>,
    webchat: Arc<RecordingAdapter>,
    whatsapp: Arc<RecordingAdapter>,
    _workspace: tempfile::TempDir,
}

fn fixture(responses: Vec<ModelResponse>) -> Fixture {
    fixture_with(responses, true)
}

fn fixture_with(responses: Vec<ModelResponse>, spawner_accepts: bool) -> Fixture {
    let conn = Connection::open_in_memory().unwrap();
    cortex_bus::db::init_db(&conn).unwrap();
    cortex_sessions::db::init_db(&conn).unwrap();
    cortex_hippocampus::db::init_db(&conn).unwrap();
    let db = Arc::new(Mutex::new(conn));

    let bus = Arc::new(MessageBus::new(db.clone()));
    let sessions = Arc::new(SessionStore::new(db.clone()));
    let hippocampus = Arc::new(Hippocampus::new(db, None, 0));
    let workspace = tempfile::tempdir().unwrap();

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(cortex_agent::tools::fetch_history::FetchChatHistory::new(
        sessions.clone(),
    )));
    tools.register(Arc::new(cortex_agent::tools::memory_query::MemoryQuery::new(
        hippocampus.clone(),
    )));

    let webchat = RecordingAdapter::new("webchat");
    let whatsapp = RecordingAdapter::new("whatsapp");
    let mut adapters = AdapterRegistry::new();
    adapters.register(webchat.clone());
    adapters.register(whatsapp.clone());

    let model = ScriptedModel::new(responses);
    let spawner = RecordingSpawner::new(spawner_accepts);

    let assembler = ContextAssembler::new(
        sessions.clone(),
        hippocampus,
        workspace.path(),
        HippocampusConfig::default(),
    );

    let cortex = CortexLoop::new(LoopParts {
        bus: bus.clone(),
        sessions: sessions.clone(),
        assembler,
        tools,
        model: model.clone(),
        spawner: spawner.clone(),
        adapters,
        pipeline: PipelineConfig::default(),
        modes: ChannelModeConfig::default(),
        hippocampus_enabled: false,
    });

    Fixture {
        bus,
        sessions,
        cortex,
        model,
        spawner,
        webchat,
        whatsapp,
        _workspace: workspace,
    }
}

fn inbound(channel: &str, content: &str) -> Envelope {
    Envelope::new(
        channel,
        SenderRef::new("u1", "User", Relationship::External),
        content,
        Priority::Normal,
    )
}

#[tokio::test]
async fn no_reply_records_silence_row() {
    let f = fixture(vec![ScriptedModel::text("NO_REPLY")]);
    f.bus.enqueue(&inbound("webchat", "hello world")).unwrap();

    let outcome = f.cortex.process_next().await.unwrap().unwrap();
    assert!(matches!(outcome.disposition, Disposition::Silent));

    assert!(f.webchat.sent.lock().unwrap().is_empty());
    assert!(f.whatsapp.sent.lock().unwrap().is_empty());

    let rows = f.sessions.history(Some("webchat"), None, 10).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].content, "hello world");
    assert_eq!(rows[0].role, Role::User);
    assert_eq!(rows[1].content, "[silence]");
    assert_eq!(rows[1].role, Role::Assistant);
}

#[tokio::test]
async fn reply_routes_to_trigger_channel_with_context() {
    let f = fixture(vec![ScriptedModel::text("hi there")]);
    let mut env = inbound("webchat", "hello");
    env.reply_to.message_id = Some("m-42".to_string());
    f.bus.enqueue(&env).unwrap();

    let outcome = f.cortex.process_next().await.unwrap().unwrap();
    assert!(matches!(outcome.disposition, Disposition::Replied { targets: 1 }));

    let sent = f.webchat.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "hi there");
    assert_eq!(sent[0].message_id.as_deref(), Some("m-42"));

    // Bus entry is terminal and a checkpoint exists.
    assert_eq!(f.bus.count_pending().unwrap(), 0);
    assert!(f.bus.load_latest_checkpoint().unwrap().is_some());
}

#[tokio::test]
async fn send_to_directive_routes_cross_channel() {
    let f = fixture(vec![ScriptedModel::text("[[send_to:whatsapp]] Alert: server down")]);
    let cron = Envelope::new(
        "cron",
        SenderRef::new("cron", "cron", Relationship::System),
        "hourly check",
        Priority::Background,
    );
    f.bus.enqueue(&cron).unwrap();

    f.cortex.process_next().await.unwrap().unwrap();

    assert!(f.webchat.sent.lock().unwrap().is_empty());
    let sent = f.whatsapp.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].channel, "whatsapp");
    assert_eq!(sent[0].content, "Alert: server down");
}

#[tokio::test]
async fn ops_trigger_surfaces_and_archives_result() {
    let f = fixture(vec![ScriptedModel::text("The server answer is in.")]);

    let op = PendingOp::new(
        "job-100",
        OpKind::RouterJob,
        "Check which port the server runs on",
        "router",
    );
    f.sessions.add_op(&op).unwrap();
    f.sessions
        .complete_op("job-100", "The server runs on port 8080")
        .unwrap();

    f.bus
        .enqueue(&Envelope::ops_trigger("job-100", Priority::Normal))
        .unwrap();
    f.cortex.process_next().await.unwrap().unwrap();

    // The model saw the terminal op in its system floor, without the spawn tool.
    let requests = f.model.requests.lock().unwrap();
    let system = &requests[0].system;
    assert!(system.contains("Check which port the server runs on"));
    assert!(system.contains("Status=Completed"));
    assert!(system.contains("The server runs on port 8080"));
    assert!(!requests[0].tools.iter().any(|t| t.name == SPAWN_TOOL_NAME));

    // Acknowledged: the op left the table and landed in the session log.
    assert!(f.sessions.ops().unwrap().is_empty());
    let rows = f.sessions.history(Some("router"), None, 10).unwrap();
    assert!(rows.iter().any(|r| {
        r.content.starts_with("[TASK_RESULT]") && r.content.contains("The server runs on port 8080")
    }));
    // The sentinel user row kept the foreground ending on a user turn.
    assert!(rows.iter().any(|r| r.content == OPS_TRIGGER_SENTINEL));
}

#[tokio::test]
async fn ops_trigger_reply_routes_to_ops_reply_channel() {
    let f = fixture(vec![ScriptedModel::text("Port confirmed: 8080.")]);

    let mut op = PendingOp::new("job-7", OpKind::RouterJob, "find the port", "router");
    op.reply_channel = Some("webchat".to_string());
    f.sessions.add_op(&op).unwrap();
    f.sessions.complete_op("job-7", "8080").unwrap();

    f.bus
        .enqueue(&Envelope::ops_trigger("job-7", Priority::Normal))
        .unwrap();
    f.cortex.process_next().await.unwrap().unwrap();

    // Reply went to the user channel, not the synthetic router channel.
    let sent = f.webchat.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, "Port confirmed: 8080.");
}

#[tokio::test]
async fn dispatch_writes_op_and_evidence_before_spawning() {
    let f = fixture(vec![ScriptedModel::with_calls(
        "On it — I'll check in the background.",
        vec![ToolCall {
            id: "call-1".to_string(),
            name: SPAWN_TOOL_NAME.to_string(),
            arguments: serde_json::json!({ "task": "Check the disk usage" }),
        }],
    )]);
    f.bus.enqueue(&inbound("webchat", "how full is the disk?")).unwrap();

    f.cortex.process_next().await.unwrap().unwrap();

    // One pending op, id owned by the core and handed to the spawner.
    let ops = f.sessions.ops().unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].status, OpStatus::Pending);
    assert_eq!(ops[0].description, "Check the disk usage");
    assert_eq!(ops[0].reply_channel.as_deref(), Some("webchat"));

    let spawned = f.spawner.requests.lock().unwrap();
    assert_eq!(spawned.len(), 1);
    assert_eq!(spawned[0].id, ops[0].id);

    // Evidence row precedes the reply in the session log.
    let rows = f.sessions.history(Some("webchat"), None, 10).unwrap();
    let evidence = rows
        .iter()
        .find(|r| r.content.starts_with("[DISPATCHED]"))
        .expect("evidence row");
    assert!(evidence.content.contains(&format!("[TASK_ID]={}", ops[0].id)));
    assert!(evidence.content.contains("Status=Pending"));

    // The acknowledgement still went out.
    assert_eq!(f.webchat.sent.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn failed_spawn_marks_op_failed_immediately() {
    let f = fixture_with(
        vec![ScriptedModel::with_calls(
            "Dispatching.",
            vec![ToolCall {
                id: "call-1".to_string(),
                name: SPAWN_TOOL_NAME.to_string(),
                arguments: serde_json::json!({ "task": "doomed work" }),
            }],
        )],
        false,
    );
    f.bus.enqueue(&inbound("webchat", "please do the thing")).unwrap();

    f.cortex.process_next().await.unwrap().unwrap();

    // The turn itself archived the failed op into the session log already.
    let rows = f.sessions.history(Some("webchat"), None, 10).unwrap();
    let failed = rows
        .iter()
        .find(|r| r.content.starts_with("[TASK_FAILED]"))
        .expect("failed op archived");
    assert!(failed.content.contains("dispatch failed"));
    assert!(f.sessions.ops().unwrap().is_empty());
}

#[tokio::test]
async fn sync_tool_round_trip_feeds_results_back() {
    let f = fixture(vec![
        ScriptedModel::with_calls(
            "",
            vec![ToolCall {
                id: "call-1".to_string(),
                name: "fetch_chat_history".to_string(),
                arguments: serde_json::json!({ "channel": "webchat", "limit": 5 }),
            }],
        ),
        ScriptedModel::text("Here's what I found."),
    ]);
    f.bus.enqueue(&inbound("webchat", "what did we talk about?")).unwrap();

    f.cortex.process_next().await.unwrap().unwrap();

    let requests = f.model.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].tool_round_trip.is_empty());
    assert_eq!(requests[1].tool_round_trip.len(), 1);
    assert_eq!(requests[1].tool_round_trip[0].name, "fetch_chat_history");
    // The tool saw the just-appended user row.
    assert!(requests[1].tool_round_trip[0]
        .result
        .contains("what did we talk about?"));
    // The spawn tool is offered on normal turns.
    assert!(requests[0].tools.iter().any(|t| t.name == SPAWN_TOOL_NAME));

    assert_eq!(f.webchat.sent.lock().unwrap()[0].content, "Here's what I found.");
}

#[tokio::test]
async fn tool_rounds_are_bounded() {
    // The model asks for the same sync tool forever.
    let looping: Vec<ModelResponse> = (0..20)
        .map(|i| {
            ScriptedModel::with_calls(
                "",
                vec![ToolCall {
                    id: format!("call-{i}"),
                    name: "fetch_chat_history".to_string(),
                    arguments: serde_json::json!({}),
                }],
            )
        })
        .collect();
    let f = fixture(looping);
    f.bus.enqueue(&inbound("webchat", "loop forever")).unwrap();

    f.cortex.process_next().await.unwrap().unwrap();

    // Initial call + one per allowed round, then the loop gives up.
    let requests = f.model.requests.lock().unwrap();
    assert_eq!(
        requests.len() as u32,
        PipelineConfig::default().max_tool_rounds + 1
    );
}

#[tokio::test]
async fn model_failure_marks_envelope_failed_and_loop_continues() {
    let f = fixture(vec![ScriptedModel::text("back online")]);
    f.model.fail.store(true, Ordering::SeqCst);

    let doomed = inbound("webchat", "first");
    f.bus.enqueue(&doomed).unwrap();
    let outcome = f.cortex.process_next().await.unwrap().unwrap();
    assert!(matches!(outcome.disposition, Disposition::Failed { .. }));

    let entry = f
        .bus
        .peek_pending()
        .unwrap()
        .into_iter()
        .find(|e| e.envelope.id == doomed.id);
    assert!(entry.is_none(), "failed envelope must not be pending");

    // The next envelope processes normally.
    f.model.fail.store(false, Ordering::SeqCst);
    f.bus.enqueue(&inbound("webchat", "second")).unwrap();
    let outcome = f.cortex.process_next().await.unwrap().unwrap();
    assert!(matches!(outcome.disposition, Disposition::Replied { .. }));
}

#[tokio::test]
async fn completion_broadcast_fires_for_every_turn() {
    let f = fixture(vec![ScriptedModel::text("NO_REPLY")]);
    let mut completions = f.cortex.subscribe();

    let env = inbound("webchat", "quiet please");
    f.bus.enqueue(&env).unwrap();
    f.cortex.process_next().await.unwrap().unwrap();

    let outcome = completions.try_recv().unwrap();
    assert_eq!(outcome.envelope_id, env.id);
    assert!(matches!(outcome.disposition, Disposition::Silent));
}

#[tokio::test]
async fn failed_bus_entry_records_error_text() {
    let f = fixture(vec![]);
    f.model.fail.store(true, Ordering::SeqCst);
    let env = inbound("webchat", "boom");
    f.bus.enqueue(&env).unwrap();
    f.cortex.process_next().await.unwrap().unwrap();

    // Direct probe: entry is failed with the provider error recorded.
    let states: Vec<BusState> = f
        .bus
        .peek_pending()
        .unwrap()
        .iter()
        .map(|e| e.state)
        .collect();
    assert!(states.is_empty());
}
