//! Shared test utilities: a scripted mock invoker and event collection

use async_trait::async_trait;
use formpipe::core::GenerationContext;
use formpipe::invoker::Fragment;
use formpipe::{
    ChatMessage, ConversationContext, FieldMap, FormSpec, FragmentReceiver, InvokerError,
    ModelInvoker, PipelineEvent,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Mock invoker that consumes scripted results, one per call, per
/// operation. Running out of script entries is an `Internal` error, which
/// the executor treats as a step failure.
pub struct MockInvoker {
    extractions: Mutex<VecDeque<Result<FieldMap, InvokerError>>>,
    replies: Mutex<VecDeque<StreamScript>>,
    combined: Mutex<VecDeque<StreamScript>>,
}

enum StreamScript {
    Fragments(Vec<Fragment>),
    FailToOpen(InvokerError),
    Stall,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self {
            extractions: Mutex::new(VecDeque::new()),
            replies: Mutex::new(VecDeque::new()),
            combined: Mutex::new(VecDeque::new()),
        }
    }

    pub fn extract_ok(self, fields: FieldMap) -> Self {
        self.extractions.lock().unwrap().push_back(Ok(fields));
        self
    }

    pub fn extract_err(self, err: InvokerError) -> Self {
        self.extractions.lock().unwrap().push_back(Err(err));
        self
    }

    /// Script a reply stream delivering the given fragments then closing
    pub fn reply_fragments(self, fragments: &[&str]) -> Self {
        let script = fragments.iter().map(|f| Ok(f.to_string())).collect();
        self.replies
            .lock()
            .unwrap()
            .push_back(StreamScript::Fragments(script));
        self
    }

    /// Script a reply stream that opens but never sends anything, for
    /// exercising the stall timeout
    pub fn reply_stalled(self) -> Self {
        self.replies.lock().unwrap().push_back(StreamScript::Stall);
        self
    }

    pub fn reply_fail_to_open(self, err: InvokerError) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(StreamScript::FailToOpen(err));
        self
    }

    /// Script a combined stream delivering raw marker-protocol text split
    /// into fixed-size character chunks
    pub fn combined_text(self, raw: &str, chunk_size: usize) -> Self {
        let script = chunk(raw, chunk_size).into_iter().map(Ok).collect();
        self.combined
            .lock()
            .unwrap()
            .push_back(StreamScript::Fragments(script));
        self
    }

    /// Script a combined stream with explicit fragments, allowing a
    /// mid-stream error
    pub fn combined_fragments(self, fragments: Vec<Fragment>) -> Self {
        self.combined
            .lock()
            .unwrap()
            .push_back(StreamScript::Fragments(fragments));
        self
    }

    fn next_stream(
        queue: &Mutex<VecDeque<StreamScript>>,
        operation: &str,
    ) -> Result<FragmentReceiver, InvokerError> {
        let script = queue.lock().unwrap().pop_front().ok_or_else(|| {
            InvokerError::Internal(format!("MockInvoker: no scripted {operation} stream left"))
        })?;
        match script {
            StreamScript::FailToOpen(err) => Err(err),
            StreamScript::Stall => {
                let (tx, rx) = mpsc::channel(1);
                tokio::spawn(async move {
                    let _keep_open = tx;
                    std::future::pending::<()>().await;
                });
                Ok(rx)
            }
            StreamScript::Fragments(fragments) => {
                let (tx, rx) = mpsc::channel(32);
                tokio::spawn(async move {
                    for fragment in fragments {
                        if tx.send(fragment).await.is_err() {
                            break;
                        }
                    }
                });
                Ok(rx)
            }
        }
    }
}

#[async_trait]
impl ModelInvoker for MockInvoker {
    async fn extract(
        &self,
        _form: &FormSpec,
        _conversation_text: &str,
        _filled: &FieldMap,
    ) -> Result<FieldMap, InvokerError> {
        self.extractions.lock().unwrap().pop_front().ok_or_else(|| {
            InvokerError::Internal("MockInvoker: no scripted extraction left".to_string())
        })?
    }

    async fn reply_stream(&self, _ctx: &GenerationContext) -> Result<FragmentReceiver, InvokerError> {
        Self::next_stream(&self.replies, "reply")
    }

    async fn combined_stream(
        &self,
        _ctx: &GenerationContext,
    ) -> Result<FragmentReceiver, InvokerError> {
        Self::next_stream(&self.combined, "combined")
    }
}

/// Split text into chunks of at most `size` characters, respecting char
/// boundaries
pub fn chunk(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(size).map(|c| c.iter().collect()).collect()
}

/// Install a fmt subscriber honoring RUST_LOG; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Drain the event stream to completion
pub async fn collect_events(
    mut rx: mpsc::Receiver<PipelineEvent>,
) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

/// A form with the given required fields
pub fn form(fields: &[&str]) -> FormSpec {
    FormSpec::new(
        "intake",
        "Intake form",
        fields.iter().map(|f| f.to_string()).collect(),
    )
}

/// A single-user-message conversation
pub fn conversation(text: &str) -> ConversationContext {
    ConversationContext::new(vec![ChatMessage::user(text)])
}

/// Build a FieldMap from string pairs
pub fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect()
}

/// The terminal event of a run, which must be last and unique
pub fn pipeline_done(events: &[PipelineEvent]) -> &PipelineEvent {
    let done: Vec<&PipelineEvent> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(done.len(), 1, "expected exactly one pipeline_done");
    assert!(
        events.last().map(|e| e.is_terminal()).unwrap_or(false),
        "pipeline_done must be the final event"
    );
    done[0]
}
