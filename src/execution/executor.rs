//! Pipeline executor - drives one run step by step
//!
//! One executor instance is created per run and consumed by [`execute`],
//! which hands back the receiving end of the event stream. All mutable run
//! state (the cumulative field map, the per-step result slots) lives inside
//! the executor, so concurrent runs share nothing. Steps execute strictly in
//! declaration order; the only suspension points are invoker calls, each
//! carrying its own timeout. A failing step contributes nothing and the run
//! continues; every run terminates with exactly one `pipeline_done`.
//!
//! [`execute`]: PipelineExecutor::execute

use crate::core::{
    merge, ConversationContext, FieldMap, FormSpec, GenerationContext, PipelineStep,
    ResolvedPipeline, StepResult, StepType,
};
use crate::execution::event::PipelineEvent;
use crate::invoker::{FragmentReceiver, InvokerError, ModelInvoker};
use crate::protocol::{ParserEvent, ResponseParser};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::{error::Elapsed, timeout, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Default per-invoker-call timeout. There is no pipeline-wide deadline; a
/// timed-out call is handled like any other invoker failure.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

const EVENT_BUFFER: usize = 64;

/// The consumer dropped the event receiver; the run stops issuing invoker
/// calls and discards whatever was in flight.
struct Abandoned;

/// An invoker failure recorded during the run
#[derive(Debug, Clone)]
pub struct StepFailure {
    pub step_id: String,
    pub error: InvokerError,
}

/// Executes one pipeline run. Created fresh per run, consumed by
/// [`PipelineExecutor::execute`].
pub struct PipelineExecutor<I> {
    pipeline: ResolvedPipeline,
    form: FormSpec,
    conversation: ConversationContext,
    invoker: Arc<I>,
    step_timeout: Duration,
    run_id: Uuid,

    /// Fields known before the run started
    baseline: FieldMap,

    /// Cumulative map: baseline plus everything accepted so far
    fields: FieldMap,

    /// Per-step results, indexed by step position
    slots: Vec<Option<StepResult>>,

    /// Every field name accepted this run, in acceptance order
    newly_extracted: Vec<String>,

    failures: Vec<StepFailure>,

    /// Step currently between step_start and step_done, for ordering checks
    current_step: Option<usize>,
}

impl<I: ModelInvoker + 'static> PipelineExecutor<I> {
    pub fn new(
        pipeline: ResolvedPipeline,
        form: FormSpec,
        conversation: ConversationContext,
        baseline_fields: FieldMap,
        invoker: Arc<I>,
    ) -> Self {
        let step_count = pipeline.step_count();
        Self {
            pipeline,
            form,
            conversation,
            invoker,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            run_id: Uuid::new_v4(),
            fields: baseline_fields.clone(),
            baseline: baseline_fields,
            slots: vec![None; step_count],
            newly_extracted: Vec::new(),
            failures: Vec::new(),
            current_step: None,
        }
    }

    pub fn with_step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Start the run and return the event stream. The sequence is lazy,
    /// finite and bound to this run: consume it fully or drop it; dropping
    /// abandons the run before the next invoker call.
    pub fn execute(self) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move { self.run(tx).await });
        rx
    }

    async fn run(mut self, tx: mpsc::Sender<PipelineEvent>) {
        let started_at = chrono::Utc::now();
        info!(
            run_id = %self.run_id,
            pipeline = %self.pipeline.id(),
            steps = self.pipeline.step_count(),
            %started_at,
            "starting pipeline run"
        );

        for idx in 0..self.pipeline.step_count() {
            if self.run_step(idx, &tx).await.is_err() {
                debug!(run_id = %self.run_id, "event consumer gone, abandoning run");
                return;
            }
        }

        let (final_fields, reply) = self.finalize();
        let complete = merge::is_complete(&final_fields, &self.form.fields);

        let done = PipelineEvent::PipelineDone {
            extracted_fields: final_fields,
            newly_extracted: self.newly_extracted.clone(),
            reply,
            is_complete: complete,
            needs_confirmation: complete,
        };
        if self.emit(&tx, done).await.is_err() {
            return;
        }

        if self.failures.is_empty() {
            info!(run_id = %self.run_id, is_complete = complete, "pipeline run finished");
        } else {
            let failed: Vec<&str> = self.failures.iter().map(|f| f.step_id.as_str()).collect();
            warn!(
                run_id = %self.run_id,
                is_complete = complete,
                failed_steps = ?failed,
                "pipeline run finished with partial results"
            );
        }
    }

    async fn run_step(
        &mut self,
        idx: usize,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), Abandoned> {
        let step = self.pipeline.step(idx).clone();
        let started = Instant::now();
        self.current_step = Some(idx);

        info!(
            run_id = %self.run_id,
            step = %step.id,
            step_type = step.step_type.as_str(),
            "step starting"
        );
        self.emit(
            tx,
            PipelineEvent::StepStart {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                step_type: step.step_type,
            },
        )
        .await?;

        match step.step_type {
            StepType::Extract => self.run_extract(idx, &step, tx).await?,
            StepType::Reply => self.run_reply(idx, &step, tx).await?,
            StepType::ExtractAndReply => self.run_combined(idx, &step, tx).await?,
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if let Some(result) = self.slots[idx].as_mut() {
            result.elapsed_ms = elapsed_ms;
        }

        info!(run_id = %self.run_id, step = %step.id, elapsed_ms, "step done");
        self.emit(
            tx,
            PipelineEvent::StepDone {
                step_id: step.id.clone(),
                elapsed_ms,
            },
        )
        .await?;
        self.current_step = None;

        Ok(())
    }

    async fn run_extract(
        &mut self,
        idx: usize,
        step: &PipelineStep,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), Abandoned> {
        let pending = self.form.pending_fields(&self.fields);
        let delta = if pending.is_empty() {
            debug!(run_id = %self.run_id, step = %step.id, "no pending fields, skipping model call");
            FieldMap::new()
        } else {
            let called = {
                let conversation_text = self.conversation.conversation_text();
                let invoker = Arc::clone(&self.invoker);
                timeout(
                    self.step_timeout,
                    invoker.extract(&self.form, &conversation_text, &self.fields),
                )
                .await
            };
            match called {
                Ok(Ok(delta)) => delta,
                Ok(Err(err)) => {
                    self.record_failure(&step.id, err);
                    return Ok(());
                }
                Err(_) => {
                    let secs = self.step_timeout.as_secs();
                    self.record_failure(&step.id, InvokerError::Timeout(secs));
                    return Ok(());
                }
            }
        };

        let outcome = merge::merge(&self.fields, &delta, &self.form.fields);
        self.fields = outcome.merged;

        let mut accepted_fields = FieldMap::new();
        for name in &outcome.accepted {
            if let Some(value) = self.fields.get(name) {
                accepted_fields.insert(name.clone(), value.clone());
            }
        }
        self.newly_extracted.extend(outcome.accepted.iter().cloned());

        let mut result = StepResult::new(&step.id);
        result.extracted_fields = accepted_fields;
        self.slots[idx] = Some(result);

        let complete = merge::is_complete(&self.fields, &self.form.fields);
        self.emit(
            tx,
            PipelineEvent::Extraction {
                step_id: step.id.clone(),
                extracted_fields: self.fields.clone(),
                newly_extracted: outcome.accepted,
                is_complete: complete,
                needs_confirmation: complete,
            },
        )
        .await
    }

    async fn run_reply(
        &mut self,
        idx: usize,
        step: &PipelineStep,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), Abandoned> {
        let ctx = self.generation_context(idx, step);
        let opened = {
            let invoker = Arc::clone(&self.invoker);
            timeout(self.step_timeout, invoker.reply_stream(&ctx)).await
        };
        let mut fragments = match self.accept_stream(&step.id, opened) {
            Some(rx) => rx,
            None => return Ok(()),
        };

        let mut reply = String::new();
        while let Some(fragment) = self.next_fragment(&step.id, &mut fragments).await {
            reply.push_str(&fragment);
            self.emit(
                tx,
                PipelineEvent::Content {
                    step_id: step.id.clone(),
                    content: fragment,
                },
            )
            .await?;
        }

        let mut result = StepResult::new(&step.id);
        result.reply = reply;
        self.slots[idx] = Some(result);
        Ok(())
    }

    async fn run_combined(
        &mut self,
        idx: usize,
        step: &PipelineStep,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), Abandoned> {
        let ctx = self.generation_context(idx, step);
        let opened = {
            let invoker = Arc::clone(&self.invoker);
            timeout(self.step_timeout, invoker.combined_stream(&ctx)).await
        };
        let mut fragments = match self.accept_stream(&step.id, opened) {
            Some(rx) => rx,
            None => return Ok(()),
        };

        let mut parser = ResponseParser::new();
        let mut accepted_fields = FieldMap::new();
        let mut reply = String::new();

        while let Some(fragment) = self.next_fragment(&step.id, &mut fragments).await {
            for event in parser.push(&fragment) {
                self.apply_parser_event(step, event, &mut accepted_fields, &mut reply, tx)
                    .await?;
            }
        }

        // A stream that broke mid-flight gets no fail-open flush; the step
        // keeps only what it already delivered.
        if !self.failed(&step.id) {
            for event in parser.finish() {
                self.apply_parser_event(step, event, &mut accepted_fields, &mut reply, tx)
                    .await?;
            }
        }

        let mut result = StepResult::new(&step.id);
        result.extracted_fields = accepted_fields;
        result.reply = reply;
        self.slots[idx] = Some(result);
        Ok(())
    }

    async fn apply_parser_event(
        &mut self,
        step: &PipelineStep,
        event: ParserEvent,
        accepted_fields: &mut FieldMap,
        reply: &mut String,
        tx: &mpsc::Sender<PipelineEvent>,
    ) -> Result<(), Abandoned> {
        match event {
            ParserEvent::Extraction(raw) => {
                let outcome = merge::merge(&self.fields, &raw, &self.form.fields);
                self.fields = outcome.merged;
                for name in &outcome.accepted {
                    if let Some(value) = self.fields.get(name) {
                        accepted_fields.insert(name.clone(), value.clone());
                    }
                }
                self.newly_extracted.extend(outcome.accepted.iter().cloned());

                let complete = merge::is_complete(&self.fields, &self.form.fields);
                self.emit(
                    tx,
                    PipelineEvent::Extraction {
                        step_id: step.id.clone(),
                        extracted_fields: self.fields.clone(),
                        newly_extracted: outcome.accepted,
                        is_complete: complete,
                        needs_confirmation: complete,
                    },
                )
                .await
            }
            ParserEvent::Content(text) => {
                reply.push_str(&text);
                self.emit(
                    tx,
                    PipelineEvent::Content {
                        step_id: step.id.clone(),
                        content: text,
                    },
                )
                .await
            }
        }
    }

    /// Unwrap the result of opening a streaming call, recording a step
    /// failure on error or timeout
    fn accept_stream(
        &mut self,
        step_id: &str,
        opened: Result<Result<FragmentReceiver, InvokerError>, Elapsed>,
    ) -> Option<FragmentReceiver> {
        match opened {
            Ok(Ok(rx)) => Some(rx),
            Ok(Err(err)) => {
                self.record_failure(step_id, err);
                None
            }
            Err(_) => {
                self.record_failure(step_id, InvokerError::Timeout(self.step_timeout.as_secs()));
                None
            }
        }
    }

    /// Next text fragment from a stream, or `None` when the stream ends,
    /// errors, or stalls past the timeout. Errors are recorded as step
    /// failures; text already forwarded to the consumer stays forwarded.
    async fn next_fragment(
        &mut self,
        step_id: &str,
        fragments: &mut FragmentReceiver,
    ) -> Option<String> {
        match timeout(self.step_timeout, fragments.recv()).await {
            Ok(Some(Ok(fragment))) => Some(fragment),
            Ok(Some(Err(err))) => {
                self.record_failure(step_id, err);
                None
            }
            Ok(None) => None,
            Err(_) => {
                self.record_failure(step_id, InvokerError::Timeout(self.step_timeout.as_secs()));
                None
            }
        }
    }

    /// Assemble the invoker context for a reply-producing step. Upstream
    /// steps that failed are simply absent; a missing dependency is never a
    /// hard failure.
    fn generation_context(&self, idx: usize, step: &PipelineStep) -> GenerationContext {
        let upstream = self
            .pipeline
            .context_slots(idx)
            .iter()
            .filter_map(|&slot| self.slots[slot].clone())
            .collect();

        GenerationContext {
            model: step.model,
            prompt_override: step.prompt_override.clone(),
            conversation: self.conversation.clone(),
            current_fields: self.fields.clone(),
            newly_extracted: self.newly_extracted.clone(),
            upstream,
        }
    }

    /// Final field map and reply text per the pipeline's output declaration:
    /// `table_from` steps' accepted fields folded over the baseline in
    /// declaration order, `reply_from` replies joined by a blank line.
    fn finalize(&self) -> (FieldMap, String) {
        let mut final_fields = self.baseline.clone();
        for &slot in self.pipeline.table_slots() {
            if let Some(result) = &self.slots[slot] {
                for (field, value) in &result.extracted_fields {
                    final_fields.insert(field.clone(), value.clone());
                }
            }
        }

        let reply = self
            .pipeline
            .reply_slots()
            .iter()
            .filter_map(|&slot| self.slots[slot].as_ref())
            .map(|result| result.reply.as_str())
            .filter(|reply| !reply.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");

        (final_fields, reply)
    }

    fn record_failure(&mut self, step_id: &str, error: InvokerError) {
        warn!(run_id = %self.run_id, step = step_id, %error, "step failed, continuing run");
        self.failures.push(StepFailure {
            step_id: step_id.to_string(),
            error,
        });
    }

    fn failed(&self, step_id: &str) -> bool {
        self.failures.iter().any(|f| f.step_id == step_id)
    }

    async fn emit(
        &self,
        tx: &mpsc::Sender<PipelineEvent>,
        event: PipelineEvent,
    ) -> Result<(), Abandoned> {
        // Emitting a step event outside its step is a programming defect,
        // not a runtime condition.
        match event.step_id() {
            Some(step_id) => {
                let current = self
                    .current_step
                    .map(|idx| self.pipeline.step(idx).id.as_str());
                debug_assert_eq!(Some(step_id), current, "step event outside its step");
            }
            None => {
                debug_assert!(self.current_step.is_none(), "pipeline_done inside a step")
            }
        }
        tx.send(event).await.map_err(|_| Abandoned)
    }
}
