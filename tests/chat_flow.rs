use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rassist_lib::accumulator::NoRender;
use rassist_lib::prompt::PromptTemplate;
use rassist_lib::{
    ApiConfig, ChatError, ChatEvent, ChatManager, ChatRequest, ChatRole, DeltaStream, ModelClient,
    Segment, TurnState,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How a scripted turn ends after its deltas
#[derive(Clone)]
enum Ending {
    Done,
    Error(&'static str),
    /// Close the channel without a terminal event
    Closed,
    /// Keep the channel open until the stream is dropped
    Hang,
}

#[derive(Clone)]
struct Script {
    deltas: Vec<&'static str>,
    ending: Ending,
}

impl Script {
    fn done(deltas: &[&'static str]) -> Self {
        Self {
            deltas: deltas.to_vec(),
            ending: Ending::Done,
        }
    }
}

/// Plays back one script per call and records every request it receives
struct ScriptedClient {
    scripts: Mutex<Vec<Script>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<ChatRequest>>,
    /// Producer task of the last `Hang` script
    hung_task: Mutex<Option<JoinHandle<()>>>,
}

impl ScriptedClient {
    fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            hung_task: Mutex::new(None),
        }
    }

    fn next_script(&self, request: &ChatRequest) -> Script {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.scripts.lock().unwrap().remove(0)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelClient for ScriptedClient {
    async fn complete(&self, request: &ChatRequest) -> Result<String, ChatError> {
        let script = self.next_script(request);
        match script.ending {
            Ending::Error(message) => Err(ChatError::transport(message)),
            _ => Ok(script.deltas.concat()),
        }
    }

    async fn stream(&self, request: &ChatRequest) -> Result<DeltaStream, ChatError> {
        let script = self.next_script(request);
        let (tx, rx) = mpsc::unbounded_channel();

        for delta in script.deltas {
            tx.send(ChatEvent::Delta(delta.to_string())).unwrap();
        }
        match script.ending {
            Ending::Done => tx.send(ChatEvent::Done).unwrap(),
            Ending::Error(message) => tx.send(ChatEvent::Error(message.to_string())).unwrap(),
            Ending::Closed => drop(tx),
            Ending::Hang => {
                let task = tokio::spawn(async move {
                    tx.closed().await;
                    // Only reached if the task outlives the receiver
                    std::future::pending::<()>().await;
                });
                let abort_handle = task.abort_handle();
                *self.hung_task.lock().unwrap() = Some(task);
                return Ok(DeltaStream::new(rx, Some(abort_handle)));
            }
        }
        Ok(DeltaStream::new(rx, None))
    }

    fn provider_name(&self) -> &'static str {
        "scripted"
    }
}

fn config() -> ApiConfig {
    ApiConfig {
        api_key: "test-key".to_string(),
        ..Default::default()
    }
}

fn scenario() -> Script {
    Script::done(&[
        "Use ",
        "<scratchpad>plan here</scratchpad><r_code>x <- 1\n",
        "print(x)</r_code> done",
    ])
}

#[tokio::test]
async fn streamed_turn_renders_progressively_and_records_stripped_text() {
    let client = ScriptedClient::new(vec![scenario()]);
    let mut manager = ChatManager::new(config());
    let mut views: Vec<Vec<Segment>> = Vec::new();
    let mut hook = |segments: &[Segment]| views.push(segments.to_vec());

    let output = manager
        .submit(&client, "How do I print?", &mut hook, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        output.segments,
        vec![
            Segment::text("Use "),
            Segment::code("x <- 1\nprint(x)"),
            Segment::text(" done"),
        ]
    );
    // One view per delta plus the final one
    assert_eq!(views.len(), 4);
    assert_eq!(views[1][1], Segment::code("x <- 1\n"));
    for view in &views {
        assert!(view.iter().all(|s| !s.content.contains("plan here")));
    }

    let turns = manager.conversation().turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role(), ChatRole::User);
    assert_eq!(turns[1].role(), ChatRole::Assistant);
    assert_eq!(turns[1].content(), "Use <r_code>x <- 1\nprint(x)</r_code> done");
    assert_eq!(output.text, turns[1].content());
    assert_eq!(manager.turn_state(), TurnState::Finished);
}

#[tokio::test]
async fn follow_up_request_carries_full_history() {
    let client = ScriptedClient::new(vec![scenario(), Script::done(&["Sure."])]);
    let mut manager = ChatManager::new(config()).with_template(PromptTemplate::Plain);
    let cancel = CancellationToken::new();

    manager.submit(&client, "first", &mut NoRender, &cancel).await.unwrap();
    manager.submit(&client, "second", &mut NoRender, &cancel).await.unwrap();

    let requests = client.requests.lock().unwrap();
    let contents: Vec<&str> = requests[1].messages.iter().map(|t| t.content()).collect();
    assert_eq!(
        contents,
        vec![
            "first",
            "Use <r_code>x <- 1\nprint(x)</r_code> done",
            "second"
        ]
    );
    assert_eq!(manager.conversation().len(), 4);
}

#[tokio::test]
async fn transport_error_keeps_partial_output_and_history() {
    let client = ScriptedClient::new(vec![Script {
        deltas: vec!["Use <r_code>x <- "],
        ending: Ending::Error("connection reset"),
    }]);
    let mut manager = ChatManager::new(config());

    let err = manager
        .submit(&client, "q", &mut NoRender, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        ChatError::Transport { message, partial } => {
            assert_eq!(message, "connection reset");
            assert_eq!(partial, "Use <r_code>x <- ");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(manager.turn_state(), TurnState::Failed);
    assert!(manager.conversation().is_empty());
}

#[tokio::test]
async fn stream_closed_without_done_is_transport_error() {
    let client = ScriptedClient::new(vec![Script {
        deltas: vec!["half"],
        ending: Ending::Closed,
    }]);
    let mut manager = ChatManager::new(config());

    let err = manager
        .submit(&client, "q", &mut NoRender, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.partial_output(), Some("half"));
    assert!(manager.conversation().is_empty());
}

#[tokio::test]
async fn configuration_error_before_any_call() {
    let client = ScriptedClient::new(vec![scenario()]);
    let mut manager = ChatManager::new(ApiConfig::default());

    let err = manager
        .submit(&client, "q", &mut NoRender, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Configuration(_)));
    assert_eq!(client.calls(), 0);
    assert_eq!(manager.turn_state(), TurnState::Idle);

    let mut bad_temperature = config();
    bad_temperature.temperature = 2.0;
    let mut manager = ChatManager::new(bad_temperature);
    assert!(matches!(
        manager
            .submit(&client, "q", &mut NoRender, &CancellationToken::new())
            .await,
        Err(ChatError::Configuration(_))
    ));
    assert_eq!(client.calls(), 0);
}

#[tokio::test]
async fn cancel_mid_turn_then_next_turn_starts_clean() {
    let client = ScriptedClient::new(vec![
        Script {
            deltas: vec!["Use <scratchpad>thinking", " more"],
            ending: Ending::Hang,
        },
        Script::done(&["fresh"]),
    ]);
    let mut manager = ChatManager::new(config());

    let cancel = CancellationToken::new();
    let mut seen = 0;
    let mut hook = |_segments: &[Segment]| {
        seen += 1;
        cancel.cancel();
    };

    let err = manager
        .submit(&client, "q", &mut hook, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Cancelled));
    assert_eq!(seen, 1);
    assert_eq!(manager.turn_state(), TurnState::Cancelled);
    assert!(manager.conversation().is_empty());

    // Cancelling aborts the producer feeding the stream
    let producer = client.hung_task.lock().unwrap().take().unwrap();
    let joined = tokio::time::timeout(std::time::Duration::from_secs(1), producer)
        .await
        .expect("producer still running after cancel");
    assert!(joined.unwrap_err().is_cancelled());

    let output = manager
        .submit(&client, "again", &mut NoRender, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(output.raw, "fresh");
    assert_eq!(manager.conversation().len(), 2);
}

#[tokio::test]
async fn blocking_mode_is_a_single_delta() {
    let client = ScriptedClient::new(vec![scenario()]);
    let mut config = config();
    config.stream = false;
    let mut manager = ChatManager::new(config);

    let mut views = 0;
    let mut hook = |_segments: &[Segment]| views += 1;
    let output = manager
        .submit(&client, "q", &mut hook, &CancellationToken::new())
        .await
        .unwrap();

    // One render for the single delta and one for the final view
    assert_eq!(views, 2);
    assert_eq!(output.segments[1], Segment::code("x <- 1\nprint(x)"));
    assert!(!client.requests.lock().unwrap()[0].stream);
}

#[tokio::test]
async fn blocking_transport_error_has_no_partial_output() {
    let client = ScriptedClient::new(vec![Script {
        deltas: vec![],
        ending: Ending::Error("503"),
    }]);
    let mut config = config();
    config.stream = false;
    let mut manager = ChatManager::new(config);

    let err = manager
        .submit(&client, "q", &mut NoRender, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Transport { .. }));
    assert_eq!(err.partial_output(), None);
    assert!(manager.conversation().is_empty());
}
