//! Isolated preview rendering.
//!
//! A [`Renderer`] owns one isolated execution context and runs render
//! cycles against it:
//!
//! ```text
//! Idle --render--> Loading --load--> Rendered
//!                     |  \--load with error panel / exception--> Error
//!                     \--timeout--> Error --retry--> Loading
//! ```
//!
//! Every document written gets a new cycle id. Events carry the id of the
//! cycle that produced them, and events from older cycles are dropped.

use crate::error::PreviewError;
use crate::preview_compiler::PreviewDocument;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

pub type CycleId = u64;

/// Console entries kept per cycle; older entries are dropped first.
pub const CONSOLE_CAPACITY: usize = 500;

const ERROR_MARKER_MESSAGE: &str =
    "The preview reported an error while rendering. Check the console output for details.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub message: String,
}

/// Something the isolated context reported back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ContextEventKind {
    /// The document finished loading.
    Loaded {
        #[serde(default, rename = "errorMarker")]
        error_marker: bool,
    },
    Console(ConsoleEntry),
    /// An uncaught exception inside the document.
    #[serde(rename = "error")]
    Exception {
        message: String,
        #[serde(default)]
        stack: Option<String>,
    },
    /// The mount routine attached a component.
    Mounted { component: String, strategy: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContextEvent {
    pub cycle: CycleId,
    #[serde(flatten)]
    pub kind: ContextEventKind,
}

/// The isolation boundary a document is written into.
pub trait IsolatedContext: Send {
    /// Replaces whatever the context showed with `html`; nothing from the
    /// previous document may remain.
    fn write_document(&mut self, cycle: CycleId, html: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderFailure {
    Timeout,
    ErrorMarker,
    Exception { message: String, stack: Option<String> },
    Write(String),
}

impl RenderFailure {
    pub fn message(&self) -> String {
        match self {
            RenderFailure::Timeout => PreviewError::RenderTimeout.to_string(),
            RenderFailure::ErrorMarker => ERROR_MARKER_MESSAGE.to_string(),
            RenderFailure::Exception { message, stack } => PreviewError::RenderException {
                message: message.clone(),
                stack: stack.clone(),
            }
            .to_string(),
            RenderFailure::Write(message) => format!("Error rendering preview: {}", message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Loading,
    Rendered,
    Error(RenderFailure),
}

/// What the host shows for the current cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    Pending,
    Rendered,
    Error {
        message: String,
        console: Vec<ConsoleEntry>,
    },
}

/// Serializable view of the renderer for status endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderSnapshot {
    pub cycle: CycleId,
    pub status: &'static str,
    pub message: Option<String>,
    pub stack: Option<String>,
    pub mounted: Option<String>,
    pub console: Vec<ConsoleEntry>,
    /// Entries dropped from the front of `console` this cycle.
    pub console_dropped: u64,
}

impl Default for RenderSnapshot {
    fn default() -> Self {
        Self {
            cycle: 0,
            status: "idle",
            message: None,
            stack: None,
            mounted: None,
            console: Vec::new(),
            console_dropped: 0,
        }
    }
}

pub struct Renderer<C: IsolatedContext> {
    context: C,
    timeout: Duration,
    state: RenderState,
    cycle: CycleId,
    content: Option<PreviewDocument>,
    console: VecDeque<ConsoleEntry>,
    console_dropped: u64,
    pending_exception: Option<(String, Option<String>)>,
    mounted: Option<String>,
    deadline: Option<Instant>,
}

impl<C: IsolatedContext> Renderer<C> {
    pub fn new(context: C, timeout: Duration) -> Self {
        Self {
            context,
            timeout,
            state: RenderState::Idle,
            cycle: 0,
            content: None,
            console: VecDeque::with_capacity(64),
            console_dropped: 0,
            pending_exception: None,
            mounted: None,
            deadline: None,
        }
    }

    pub fn state(&self) -> &RenderState {
        &self.state
    }

    pub fn cycle(&self) -> CycleId {
        self.cycle
    }

    pub fn console(&self) -> &VecDeque<ConsoleEntry> {
        &self.console
    }

    /// How many console entries this cycle no longer holds.
    pub fn console_dropped(&self) -> u64 {
        self.console_dropped
    }

    pub fn content(&self) -> Option<&PreviewDocument> {
        self.content.as_ref()
    }

    pub fn context(&self) -> &C {
        &self.context
    }

    /// When the current cycle times out, if it is still loading.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Starts a cycle for new content.
    pub fn render(&mut self, document: PreviewDocument) -> CycleId {
        self.content = Some(document);
        self.start_cycle()
    }

    /// Re-issues the current content after a failed cycle.
    pub fn retry(&mut self) -> Option<CycleId> {
        if !matches!(self.state, RenderState::Error(_)) || self.content.is_none() {
            debug!("Ignoring retry in state {:?}", self.state);
            return None;
        }
        info!("Retrying preview render");
        Some(self.start_cycle())
    }

    fn start_cycle(&mut self) -> CycleId {
        self.cycle += 1;
        self.console.clear();
        self.console_dropped = 0;
        self.pending_exception = None;
        self.mounted = None;
        self.state = RenderState::Loading;
        self.deadline = Some(Instant::now() + self.timeout);

        let html = match &self.content {
            Some(document) => document.html.as_str(),
            None => "",
        };

        info!("Render cycle {} started ({} bytes)", self.cycle, html.len());
        if let Err(e) = self.context.write_document(self.cycle, html) {
            error!("Failed to write preview document: {}", e);
            self.fail(RenderFailure::Write(e.to_string()));
        }
        self.cycle
    }

    /// Applies an event from the isolated context.
    pub fn handle_event(&mut self, event: ContextEvent) {
        if event.cycle != self.cycle {
            debug!("Dropping event from stale cycle {} (current {})", event.cycle, self.cycle);
            return;
        }

        match event.kind {
            ContextEventKind::Console(entry) => {
                forward_console(&entry);
                self.push_console(entry);
            }
            ContextEventKind::Mounted { component, strategy } => {
                info!("Preview mounted {} via {}", component, strategy);
                self.mounted = Some(component);
            }
            ContextEventKind::Exception { message, stack } => {
                warn!("Preview exception: {}", message);
                self.push_console(ConsoleEntry {
                    level: ConsoleLevel::Error,
                    message: message.clone(),
                });
                match self.state {
                    RenderState::Loading => self.pending_exception = Some((message, stack)),
                    RenderState::Rendered => self.fail(RenderFailure::Exception { message, stack }),
                    _ => {}
                }
            }
            ContextEventKind::Loaded { error_marker } => {
                if self.state != RenderState::Loading {
                    return;
                }
                self.deadline = None;
                match (self.pending_exception.take(), error_marker) {
                    (Some((message, stack)), _) => {
                        self.fail(RenderFailure::Exception { message, stack })
                    }
                    (None, true) => self.fail(RenderFailure::ErrorMarker),
                    (None, false) => {
                        info!("Render cycle {} loaded", self.cycle);
                        self.state = RenderState::Rendered;
                    }
                }
            }
        }
    }

    /// Times out the current cycle if its deadline has passed.
    pub fn expire(&mut self, now: Instant) {
        match self.deadline {
            Some(deadline) if now >= deadline && self.state == RenderState::Loading => {
                warn!("Render cycle {} timed out", self.cycle);
                self.fail(RenderFailure::Timeout);
            }
            _ => {}
        }
    }

    fn push_console(&mut self, entry: ConsoleEntry) {
        if self.console.len() == CONSOLE_CAPACITY {
            self.console.pop_front();
            self.console_dropped += 1;
        }
        self.console.push_back(entry);
    }

    fn fail(&mut self, failure: RenderFailure) {
        self.deadline = None;
        self.state = RenderState::Error(failure);
    }

    pub fn outcome(&self) -> RenderOutcome {
        match &self.state {
            RenderState::Idle | RenderState::Loading => RenderOutcome::Pending,
            RenderState::Rendered => RenderOutcome::Rendered,
            RenderState::Error(failure) => RenderOutcome::Error {
                message: failure.message(),
                console: self.console.iter().cloned().collect(),
            },
        }
    }

    pub fn snapshot(&self) -> RenderSnapshot {
        let (status, message, stack) = match &self.state {
            RenderState::Idle => ("idle", None, None),
            RenderState::Loading => ("loading", None, None),
            RenderState::Rendered => ("rendered", None, None),
            RenderState::Error(failure) => {
                let stack = match failure {
                    RenderFailure::Exception { stack, .. } => stack.clone(),
                    _ => None,
                };
                ("error", Some(failure.message()), stack)
            }
        };
        RenderSnapshot {
            cycle: self.cycle,
            status,
            message,
            stack,
            mounted: self.mounted.clone(),
            console: self.console.iter().cloned().collect(),
            console_dropped: self.console_dropped,
        }
    }
}

fn forward_console(entry: &ConsoleEntry) {
    match entry.level {
        ConsoleLevel::Error => error!(target: "preview", "{}", entry.message),
        ConsoleLevel::Warn => warn!(target: "preview", "{}", entry.message),
        ConsoleLevel::Debug => debug!(target: "preview", "{}", entry.message),
        ConsoleLevel::Log | ConsoleLevel::Info => info!(target: "preview", "{}", entry.message),
    }
}

#[derive(Debug)]
pub enum RenderCommand {
    Render(PreviewDocument),
    Retry,
}

/// Runs the renderer as a single event loop.
///
/// Commands, context events and the cycle deadline are handled one at a
/// time; a snapshot is published after each. Returns when the command
/// channel closes.
pub async fn drive<C: IsolatedContext>(
    mut renderer: Renderer<C>,
    mut commands: mpsc::Receiver<RenderCommand>,
    mut events: mpsc::Receiver<ContextEvent>,
    status: watch::Sender<RenderSnapshot>,
) {
    status.send_replace(renderer.snapshot());

    loop {
        let deadline = renderer.deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(RenderCommand::Render(document)) => {
                    renderer.render(document);
                }
                Some(RenderCommand::Retry) => {
                    renderer.retry();
                }
                None => break,
            },
            Some(event) = events.recv() => renderer.handle_event(event),
            _ = wait_until(deadline) => renderer.expire(Instant::now()),
        }
        status.send_replace(renderer.snapshot());
    }

    debug!("Renderer loop stopped");
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
