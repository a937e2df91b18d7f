//! Plan generation orchestrator.
//!
//! One request runs through `streaming -> parsing -> [compiling] ->
//! persisting -> done`. Streaming feeds every source fragment through the
//! [`Resegmenter`] and forwards complete pieces to the client, followed by
//! [`StreamEvent::Done`]. The client stream is closed before parsing starts;
//! everything after that happens in the background and is only logged.
//!
//! Generation runs in a task registered with a [`TaskTracker`], so it keeps
//! going (and persists) when the client disconnects, and a graceful
//! shutdown can wait for it.

mod state;

use std::sync::Arc;

use anyhow::{Result, anyhow};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, info_span, warn};

use crate::error::{StrideError, StrideResult};
use crate::generation::{FragmentStream, PlanPrompt, PlanSource};
use crate::outline::parse_outline;
use crate::resegment::Resegmenter;
use crate::store::{GeneratedPlan, PlanStore};

pub use state::{PipelineRun, PipelineState, is_valid_transition};

/// Events delivered to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A re-segmented piece of the plan text.
    Chunk(String),
    /// Completion sentinel; nothing follows it.
    Done,
}

/// Client side of a running generation.
pub type PlanStream = ReceiverStream<StreamEvent>;

/// Who and what to generate for.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub user_id: i64,
    pub goal_id: i64,
    pub prompt: PlanPrompt,
}

/// A started generation.
pub struct PlanRun {
    pub events: PlanStream,
    /// Resolves to the terminal state once persistence has finished.
    pub outcome: JoinHandle<PipelineState>,
}

/// Drives plan generation requests.
#[derive(Clone)]
pub struct PlanPipeline {
    source: Arc<dyn PlanSource>,
    store: Arc<dyn PlanStore>,
    tracker: TaskTracker,
    buffer: usize,
}

impl PlanPipeline {
    /// Pieces buffered for a slow client before the producer waits.
    pub const DEFAULT_BUFFER: usize = 64;

    pub fn new(source: Arc<dyn PlanSource>, store: Arc<dyn PlanStore>) -> Self {
        Self {
            source,
            store,
            tracker: TaskTracker::new(),
            buffer: Self::DEFAULT_BUFFER,
        }
    }

    /// Register generation tasks with an externally owned tracker.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn source_name(&self) -> &str {
        self.source.name()
    }

    /// Open the source and start streaming.
    ///
    /// The first fragment is awaited here: a source that fails before
    /// producing any text is reported as [`StrideError::Upstream`] and
    /// nothing is streamed or persisted.
    pub async fn start(&self, request: PlanRequest) -> StrideResult<PlanRun> {
        let mut fragments = self
            .source
            .open(&request.prompt)
            .await
            .map_err(StrideError::Upstream)?;

        let first = match fragments.next().await {
            Some(Ok(fragment)) => Some(fragment),
            Some(Err(e)) => return Err(StrideError::Upstream(e)),
            None => None,
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let span = info_span!(
            "plan_generation",
            user_id = request.user_id,
            goal_id = request.goal_id,
            source = self.source.name()
        );
        let store = Arc::clone(&self.store);
        let outcome = self
            .tracker
            .spawn(drive(request, first, fragments, tx, store).instrument(span));

        Ok(PlanRun {
            events: ReceiverStream::new(rx),
            outcome,
        })
    }
}

/// Forwards pieces to the client, remembering when it went away.
struct ClientSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
}

impl ClientSink {
    async fn send(&mut self, event: StreamEvent) {
        if let Some(tx) = &self.tx {
            if tx.send(event).await.is_err() {
                info!("client disconnected; continuing generation");
                self.tx = None;
            }
        }
    }

    async fn send_pieces(&mut self, pieces: Vec<String>) {
        for piece in pieces {
            self.send(StreamEvent::Chunk(piece)).await;
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

async fn drive(
    request: PlanRequest,
    first: Option<String>,
    fragments: FragmentStream,
    tx: mpsc::Sender<StreamEvent>,
    store: Arc<dyn PlanStore>,
) -> PipelineState {
    let mut run = PipelineRun::new(request.goal_id);
    let mut sink = ClientSink { tx: Some(tx) };

    match execute(&mut run, &request, first, fragments, &mut sink, store.as_ref()).await {
        Ok(()) => run.state(),
        Err(e) => {
            let failed_in = run.state();
            run.fail();
            let message = format!("{e:#}");
            error!(state = %failed_in, error = %message, "plan generation failed");
            run.state()
        }
    }
}

async fn execute(
    run: &mut PipelineRun,
    request: &PlanRequest,
    first: Option<String>,
    mut fragments: FragmentStream,
    sink: &mut ClientSink,
    store: &dyn PlanStore,
) -> Result<()> {
    let mut resegmenter = Resegmenter::new();
    let mut text = String::new();

    if let Some(fragment) = first {
        text.push_str(&fragment);
        sink.send_pieces(resegmenter.push(&fragment)).await;
    }
    while let Some(fragment) = fragments.next().await {
        // Dropping the sink without a Done event truncates the client stream.
        let fragment = fragment.map_err(|e| {
            sink.close();
            anyhow!("source failed mid-stream: {e:#}")
        })?;
        text.push_str(&fragment);
        sink.send_pieces(resegmenter.push(&fragment)).await;
    }
    if let Some(rest) = resegmenter.finish() {
        sink.send(StreamEvent::Chunk(rest)).await;
    }
    sink.send(StreamEvent::Done).await;
    sink.close();

    run.advance(PipelineState::Parsing)?;
    let outline = parse_outline(&text);
    info!(chars = text.len(), sections = outline.len(), "plan generated");
    if outline.is_empty() {
        warn!("generated plan has no level-1 headings");
    }

    let compile = store.needs_compilation(request.goal_id).await?;
    if compile {
        run.advance(PipelineState::Compiling)?;
    }

    run.advance(PipelineState::Persisting)?;
    let plan = GeneratedPlan {
        user_id: request.user_id,
        goal_id: request.goal_id,
        text,
    };
    let report = store.persist(&plan, compile.then_some(&outline)).await?;
    info!(
        quota_charged = report.quota_charged,
        timelines = report.compiled.map(|c| c.timelines),
        plan_items = report.compiled.map(|c| c.plan_items),
        "plan persisted"
    );

    run.advance(PipelineState::Done)?;
    Ok(())
}
