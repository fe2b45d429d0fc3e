//! Render cycles.
//!
//! A cycle walks `Idle → Scanning → Expanding → Typesetting → Substituting →
//! RestoringSelection → Idle`. It is split in three steps so the document can
//! keep taking edits while the typesetter works:
//!
//! 1. [`RenderCoordinator::prepare`] scans the current text and expands every
//!    math span. It returns `None` when neither the text nor the definitions
//!    changed since the last applied cycle, or when the job for the current
//!    generation is already out.
//! 2. [`RenderJob::run`] waits for the typesetter to be ready and typesets the
//!    spans one after the other. It owns everything it needs, so it can be
//!    awaited or spawned while the coordinator stays usable.
//! 3. [`RenderCoordinator::apply`] substitutes the results and restores the
//!    selection, unless an edit arrived in the meantime. The selection is taken
//!    from the document at that point, so caret moves made while the job ran
//!    are kept.
//!
//! Every edit, host push or definitions change bumps a generation counter. A
//! job compares its generation before each typesetter call and stops starting
//! new calls once it is stale; `apply` drops stale batches.
//!
//! ```
//! use notetex_core::{EngineConfig, PlaceholderTypesetter, RenderCoordinator, RenderOutcome};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut coordinator =
//!     RenderCoordinator::new(Arc::new(PlaceholderTypesetter), EngineConfig::default());
//! coordinator.set_definitions(r"\newcommand{\R}{\mathbb{R}}");
//! coordinator.set_content_from_host(r"Let $x \in \R$.");
//!
//! let outcome = coordinator.render().await.unwrap();
//! assert!(matches!(outcome, RenderOutcome::Rendered(_)));
//! assert_eq!(coordinator.document().math_nodes().count(), 1);
//!
//! // Nothing changed: no typesetting.
//! assert_eq!(coordinator.render().await.unwrap(), RenderOutcome::Skipped);
//! # }
//! ```

use crate::config::EngineConfig;
use crate::document::{
    Location, MathNode, MathRendering, RenderedDocument, SelectionSnapshot, StructuralRange,
};
use crate::error::{RenderError, Result};
use crate::typesetter::{error_html, Typesetter};
use log::{debug, trace, warn};
use notetex_macros::{DefinitionError, Definitions, Expander};
use notetex_syntax::{parse, Segment};
use serde::Serialize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CyclePhase {
    Idle,
    Scanning,
    Expanding,
    Typesetting,
    Substituting,
    RestoringSelection,
}

/// What made the document need a render. Later variants take precedence
/// when several changes are pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Trigger {
    Definitions,
    HostContent,
    UserEdit,
}

/// Result of applying a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Text and definitions match the last applied cycle, or a job for the
    /// current generation is already running.
    Skipped,
    /// A newer change arrived while the cycle ran. Nothing was applied.
    Superseded,
    Rendered(RenderReport),
}

/// What the host needs to hear after a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderReport {
    /// New logical text, only after user edits and only when it differs from
    /// what the host last saw.
    pub content: Option<String>,
    pub selection: SelectionSnapshot,
    /// Spans typeset successfully.
    pub rendered: usize,
    /// Spans shown as error placeholders.
    pub failed: usize,
    pub definitions_version: u64,
}

#[derive(Debug)]
struct SpanRequest {
    raw: String,
    latex: String,
    display_mode: bool,
}

/// The typesetting half of a cycle, detached from the coordinator.
#[derive(Debug)]
pub struct RenderJob {
    generation: u64,
    current_generation: Arc<AtomicU64>,
    typesetter: Arc<dyn Typesetter>,
    definitions: Arc<Definitions>,
    definitions_version: u64,
    raw: String,
    segments: Vec<Segment>,
    requests: Vec<SpanRequest>,
    trigger: Trigger,
    poll_interval: Duration,
    max_attempts: u32,
}

/// Typesetter output waiting to be applied.
#[derive(Debug)]
pub struct RenderBatch {
    generation: u64,
    definitions_version: u64,
    raw: String,
    segments: Vec<Segment>,
    renderings: Vec<MathRendering>,
    trigger: Trigger,
}

impl RenderBatch {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether every span got a rendering.
    pub fn is_complete(&self) -> bool {
        let spans = self.segments.iter().filter(|s| s.is_math()).count();
        spans == self.renderings.len()
    }
}

impl RenderJob {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of spans this job will typeset.
    pub fn span_count(&self) -> usize {
        self.requests.len()
    }

    fn is_superseded(&self) -> bool {
        self.current_generation.load(Ordering::SeqCst) != self.generation
    }

    /// Typesets every span in order.
    ///
    /// Fails only when the typesetter never becomes ready. A span the
    /// typesetter rejects becomes an error placeholder; the others still
    /// render. Once the job is superseded no further spans are started and the
    /// returned batch is incomplete.
    pub async fn run(self) -> Result<RenderBatch> {
        self.wait_until_ready().await?;

        let mut renderings = Vec::with_capacity(self.requests.len());
        for request in &self.requests {
            if self.is_superseded() {
                debug!(
                    "render cycle {} superseded after {} of {} spans",
                    self.generation,
                    renderings.len(),
                    self.requests.len()
                );
                break;
            }

            let result = self
                .typesetter
                .typeset(&request.latex, request.display_mode, &self.definitions.macros)
                .await;
            let rendering = match result {
                Ok(widget) => MathRendering::Rendered(widget),
                Err(err) => {
                    warn!(
                        "{} failed to typeset {}: {}",
                        self.typesetter.name(),
                        request.raw,
                        err
                    );
                    let message = err.to_string();
                    MathRendering::Failed {
                        html: error_html(&request.raw, &message, request.display_mode),
                        message,
                    }
                }
            };
            renderings.push(rendering);
        }

        Ok(RenderBatch {
            generation: self.generation,
            definitions_version: self.definitions_version,
            raw: self.raw,
            segments: self.segments,
            renderings,
            trigger: self.trigger,
        })
    }

    async fn wait_until_ready(&self) -> Result<()> {
        for attempt in 1..=self.max_attempts {
            if self.typesetter.is_ready().await {
                if attempt > 1 {
                    debug!("{} ready after {} attempts", self.typesetter.name(), attempt);
                }
                return Ok(());
            }
            if self.is_superseded() {
                return Ok(());
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }
        warn!(
            "{} not ready after {} attempts",
            self.typesetter.name(),
            self.max_attempts
        );
        Err(RenderError::RendererUnavailable {
            attempts: self.max_attempts,
        })
    }
}

/// Owns the rendered document and decides when and how it is re-rendered.
#[derive(Debug)]
pub struct RenderCoordinator {
    typesetter: Arc<dyn Typesetter>,
    config: EngineConfig,
    document: RenderedDocument,
    definitions_source: String,
    definitions: Arc<Definitions>,
    skipped: Vec<DefinitionError>,
    definitions_version: u64,
    /// Text and definitions version of the last applied cycle.
    last_rendered: Option<(String, u64)>,
    /// Text the host last received from us or pushed to us.
    last_reported: Option<String>,
    generation: Arc<AtomicU64>,
    active_cycle: Option<u64>,
    phase: CyclePhase,
    pending: Option<Trigger>,
}

impl RenderCoordinator {
    pub fn new(typesetter: Arc<dyn Typesetter>, config: EngineConfig) -> Self {
        Self {
            typesetter,
            config,
            document: RenderedDocument::default(),
            definitions_source: String::new(),
            definitions: Arc::new(Definitions::builtin()),
            skipped: Vec::new(),
            definitions_version: 0,
            last_rendered: None,
            last_reported: None,
            generation: Arc::new(AtomicU64::new(0)),
            active_cycle: None,
            phase: CyclePhase::Idle,
            pending: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn document(&self) -> &RenderedDocument {
        &self.document
    }

    pub fn raw_text(&self) -> String {
        self.document.raw_text()
    }

    pub fn definitions(&self) -> &Definitions {
        &self.definitions
    }

    /// Declarations of the current source that were skipped as malformed.
    pub fn skipped_definitions(&self) -> &[DefinitionError] {
        &self.skipped
    }

    pub fn definitions_version(&self) -> u64 {
        self.definitions_version
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Math nodes rendered with older definitions than the current ones.
    pub fn stale_math_nodes(&self) -> usize {
        self.document
            .math_nodes()
            .filter(|math| math.definitions_version != self.definitions_version)
            .count()
    }

    pub fn selection(&self) -> SelectionSnapshot {
        self.document.capture()
    }

    pub fn set_selection(&mut self, selection: SelectionSnapshot) {
        self.document.select(selection);
    }

    /// Rebuilds the definition tables from `source`.
    ///
    /// The version only moves when the resulting tables differ, so reformatting
    /// the source does not re-render anything.
    pub fn set_definitions(&mut self, source: &str) {
        if source == self.definitions_source {
            return;
        }
        let extraction = Definitions::extract(source);
        self.definitions_source = source.to_string();
        self.skipped = extraction.skipped;

        if extraction.definitions == *self.definitions {
            debug!("definitions source changed but tables are identical");
            return;
        }
        self.definitions = Arc::new(extraction.definitions);
        self.definitions_version += 1;
        debug!("definitions now at version {}", self.definitions_version);
        self.invalidate(Trigger::Definitions);
    }

    /// Replaces the document with text from the host. Text identical to the
    /// current content is ignored, and host text is never echoed back.
    pub fn set_content_from_host(&mut self, text: &str) {
        self.last_reported = Some(text.to_string());
        if text == self.document.raw_text() {
            return;
        }
        self.document = RenderedDocument::from_plain_text(text);
        self.last_rendered = None;
        self.invalidate(Trigger::HostContent);
    }

    /// Replaces the logical text in `range` with `text`.
    pub fn edit(&mut self, range: Range<usize>, text: &str) {
        if range.is_empty() && text.is_empty() {
            return;
        }
        let reverted = self.document.replace(range, text);
        self.after_edit(reverted);
    }

    /// Replaces the selection with `text` (typing, paste, tab).
    pub fn insert_text(&mut self, text: &str) {
        if text.is_empty() && self.document.capture().is_collapsed() {
            return;
        }
        let reverted = self.document.insert_text(text);
        self.after_edit(reverted);
    }

    fn after_edit(&mut self, reverted: usize) {
        if reverted > 0 {
            // Reverted math may leave the text unchanged while the nodes did.
            self.last_rendered = None;
        }
        self.invalidate(Trigger::UserEdit);
    }

    fn invalidate(&mut self, trigger: Trigger) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending = self.pending.max(Some(trigger));
        trace!("generation {} after {:?}", generation, trigger);
    }

    fn set_phase(&mut self, phase: CyclePhase) {
        trace!("render phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Scans and expands the current text.
    ///
    /// At most one job is handed out per generation. Until it is applied or
    /// abandoned, further calls return `None`.
    pub fn prepare(&mut self) -> Option<RenderJob> {
        let generation = self.generation();
        if self.active_cycle == Some(generation) {
            debug!("render cycle {} already in flight", generation);
            return None;
        }

        let raw = self.document.raw_text();
        let unchanged = self
            .last_rendered
            .as_ref()
            .is_some_and(|(text, version)| *text == raw && *version == self.definitions_version);
        if unchanged {
            debug!("content and definitions unchanged; skipping render");
            self.pending = None;
            return None;
        }

        let trigger = self.pending.unwrap_or(Trigger::HostContent);

        self.set_phase(CyclePhase::Scanning);
        let parse = parse(&raw, &self.config.delimiters);
        for error in &parse.errors {
            debug!("{} at {:?}", error.message, error.range);
        }
        let segments = parse.segments();

        self.set_phase(CyclePhase::Expanding);
        let definitions = if self.config.inline_definitions {
            let mut definitions = (*self.definitions).clone();
            definitions.declare_from(&raw);
            Arc::new(definitions)
        } else {
            Arc::clone(&self.definitions)
        };
        let expander = Expander::new(&definitions.environments)
            .with_max_depth(self.config.max_environment_depth);
        let requests = segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Math {
                    raw,
                    content,
                    display_mode,
                } => Some(SpanRequest {
                    raw: raw.clone(),
                    latex: expander.expand(content),
                    display_mode: *display_mode,
                }),
                _ => None,
            })
            .collect();

        self.active_cycle = Some(generation);
        self.set_phase(CyclePhase::Typesetting);
        Some(RenderJob {
            generation,
            current_generation: Arc::clone(&self.generation),
            typesetter: Arc::clone(&self.typesetter),
            definitions,
            definitions_version: self.definitions_version,
            raw,
            segments,
            requests,
            trigger,
            poll_interval: self.config.ready_poll_interval(),
            max_attempts: self.config.ready_max_attempts,
        })
    }

    /// Substitutes a finished batch into the document.
    pub fn apply(&mut self, batch: RenderBatch) -> RenderOutcome {
        if batch.generation != self.generation() || !batch.is_complete() {
            debug!("discarding superseded render cycle {}", batch.generation);
            self.finish_cycle(batch.generation);
            return RenderOutcome::Superseded;
        }

        // Same generation, same text: the live selection maps onto the batch.
        let snapshot = (batch.trigger != Trigger::HostContent).then(|| self.document.capture());

        self.set_phase(CyclePhase::Substituting);
        let version = batch.definitions_version;
        let mut rendered = 0;
        let mut failed = 0;
        let mut renderings = batch.renderings.into_iter();
        let mut document =
            RenderedDocument::from_segments(batch.segments, |_, raw, content, display_mode| {
                let rendering = renderings.next().unwrap_or_else(|| MathRendering::Failed {
                    html: error_html(&raw, "not rendered", display_mode),
                    message: "not rendered".to_string(),
                });
                if rendering.is_failed() {
                    failed += 1;
                } else {
                    rendered += 1;
                }
                MathNode {
                    raw,
                    content,
                    display_mode,
                    rendering,
                    definitions_version: version,
                }
            });

        self.set_phase(CyclePhase::RestoringSelection);
        let selection = match snapshot {
            Some(snapshot) => document.restore(snapshot),
            None => StructuralRange::collapsed(Location::End),
        };
        document.set_selection(selection);
        self.document = document;

        let content = if batch.trigger == Trigger::UserEdit
            && self.last_reported.as_deref() != Some(batch.raw.as_str())
        {
            self.last_reported = Some(batch.raw.clone());
            Some(batch.raw.clone())
        } else {
            None
        };
        self.last_rendered = Some((batch.raw, version));
        self.pending = None;
        self.finish_cycle(batch.generation);

        RenderOutcome::Rendered(RenderReport {
            content,
            selection: self.document.capture(),
            rendered,
            failed,
            definitions_version: version,
        })
    }

    /// Drops a cycle that could not finish. The document keeps its previous
    /// rendering and the pending change stays queued.
    pub fn abandon(&mut self, error: &RenderError) {
        warn!("render cycle abandoned: {}", error);
        self.active_cycle = None;
        self.set_phase(CyclePhase::Idle);
    }

    fn finish_cycle(&mut self, generation: u64) {
        if self.active_cycle == Some(generation) {
            self.active_cycle = None;
            self.set_phase(CyclePhase::Idle);
        }
    }

    /// Runs one full cycle: prepare, typeset, apply.
    ///
    /// `RendererUnavailable` is returned as an error after the cycle has been
    /// abandoned; the caller may show it as a warning and retry later.
    pub async fn render(&mut self) -> Result<RenderOutcome> {
        let Some(job) = self.prepare() else {
            return Ok(RenderOutcome::Skipped);
        };
        match job.run().await {
            Ok(batch) => Ok(self.apply(batch)),
            Err(err) => {
                self.abandon(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests;
