use super::*;
use crate::document::Node;
use crate::error::TypesetError;
use crate::typesetter::RenderedWidget;
use async_trait::async_trait;
use notetex_macros::MacroTable;
use std::sync::atomic::{AtomicBool, AtomicU32};
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Call {
    latex: String,
    display_mode: bool,
    macros: MacroTable,
}

/// Records every call. Rejects LaTeX containing `\bad`, can report itself as
/// not ready for a number of polls, and can hold calls until released.
#[derive(Debug, Default)]
struct StubTypesetter {
    calls: Mutex<Vec<Call>>,
    not_ready_polls: AtomicU32,
    never_ready: AtomicBool,
    polls: AtomicU32,
    gated: AtomicBool,
    gate: Notify,
}

impl StubTypesetter {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Typesetter for StubTypesetter {
    async fn is_ready(&self) -> bool {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.never_ready.load(Ordering::SeqCst) {
            return false;
        }
        self.not_ready_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
    }

    async fn typeset(
        &self,
        latex: &str,
        display_mode: bool,
        macros: &MacroTable,
    ) -> std::result::Result<RenderedWidget, TypesetError> {
        self.calls.lock().unwrap().push(Call {
            latex: latex.to_string(),
            display_mode,
            macros: macros.clone(),
        });
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        if latex.contains(r"\bad") {
            return Err(TypesetError::Rejected(format!("Undefined control sequence in {latex}")));
        }
        Ok(RenderedWidget {
            html: format!("<w>{latex}</w>"),
            size: None,
        })
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        ready_poll_interval_ms: 1,
        ready_max_attempts: 3,
        ..EngineConfig::default()
    }
}

fn setup(content: &str) -> (Arc<StubTypesetter>, RenderCoordinator) {
    let typesetter = Arc::new(StubTypesetter::default());
    let mut coordinator = RenderCoordinator::new(typesetter.clone(), fast_config());
    coordinator.set_content_from_host(content);
    (typesetter, coordinator)
}

fn report(outcome: RenderOutcome) -> RenderReport {
    match outcome {
        RenderOutcome::Rendered(report) => report,
        other => panic!("expected a rendered cycle, got {other:?}"),
    }
}

#[tokio::test]
async fn test_renders_every_span() {
    let (typesetter, mut coordinator) = setup("a $x$ b\n$$y$$");
    let report = report(coordinator.render().await.unwrap());

    assert_eq!(report.rendered, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.content, None);
    assert_eq!(coordinator.raw_text(), "a $x$ b\n$$y$$");

    let calls = typesetter.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!((calls[0].latex.as_str(), calls[0].display_mode), ("x", false));
    assert_eq!((calls[1].latex.as_str(), calls[1].display_mode), ("y", true));
    assert_eq!(coordinator.phase(), CyclePhase::Idle);
}

#[tokio::test]
async fn test_unchanged_content_is_not_retypeset() {
    let (typesetter, mut coordinator) = setup("$a$ and $b$");
    coordinator.render().await.unwrap();
    assert_eq!(typesetter.call_count(), 2);

    assert_eq!(coordinator.render().await.unwrap(), RenderOutcome::Skipped);
    coordinator.set_content_from_host("$a$ and $b$");
    assert_eq!(coordinator.render().await.unwrap(), RenderOutcome::Skipped);
    assert_eq!(typesetter.call_count(), 2);
}

#[tokio::test]
async fn test_failed_span_does_not_block_siblings() {
    let (_, mut coordinator) = setup(r"$a$ $\bad{x}$ $c$");
    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.rendered, 2);
    assert_eq!(report.failed, 1);

    let renderings: Vec<_> = coordinator
        .document()
        .math_nodes()
        .map(|math| &math.rendering)
        .collect();
    assert!(matches!(renderings[0], MathRendering::Rendered(_)));
    match renderings[1] {
        MathRendering::Failed { html, message } => {
            assert!(html.contains(r"<code>$\bad{x}$</code>"));
            assert!(message.starts_with("Undefined control sequence"));
        }
        other => panic!("expected a failure, got {other:?}"),
    }
    assert!(matches!(renderings[2], MathRendering::Rendered(_)));
}

#[tokio::test]
async fn test_definitions_change_refreshes_every_span() {
    let (typesetter, mut coordinator) = setup(r"$\R$ and $\Q$");
    coordinator.render().await.unwrap();
    assert_eq!(coordinator.stale_math_nodes(), 0);

    coordinator.set_definitions(r"\newcommand{\R}{\mathcal{R}}");
    assert_eq!(coordinator.definitions_version(), 1);
    assert_eq!(coordinator.stale_math_nodes(), 2);

    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.content, None);
    assert_eq!(report.definitions_version, 1);
    assert_eq!(coordinator.stale_math_nodes(), 0);

    let calls = typesetter.calls();
    assert_eq!(calls.len(), 4);
    assert_eq!(calls[3].macros.replacement(r"\R"), Some(r"\mathcal{R}"));
    assert_eq!(calls[3].macros.replacement(r"\QQ"), Some(r"\mathbb{Q}"));
}

#[tokio::test]
async fn test_equivalent_definitions_do_not_rerender() {
    let (typesetter, mut coordinator) = setup("$x$");
    coordinator.set_definitions(r"\newcommand{\R}{\mathbb{R}}");
    coordinator.render().await.unwrap();

    coordinator.set_definitions("\\newcommand {\\R}\n  {\\mathbb{R}}");
    assert_eq!(coordinator.definitions_version(), 1);
    assert_eq!(coordinator.render().await.unwrap(), RenderOutcome::Skipped);
    assert_eq!(typesetter.call_count(), 1);
}

#[tokio::test]
async fn test_malformed_definitions_are_reported_not_fatal() {
    let (_, mut coordinator) = setup("$x$");
    coordinator.set_definitions(r"\newcommand{\a}{ok} \newcommand{\b}{broken");
    assert_eq!(coordinator.skipped_definitions().len(), 1);
    assert_eq!(coordinator.definitions().macros.replacement(r"\a"), Some("ok"));
    assert!(coordinator.render().await.is_ok());
}

#[tokio::test]
async fn test_environments_are_expanded_before_typesetting() {
    let (typesetter, mut coordinator) = setup(r"$$\begin{pf}x\end{pf}$$ $\begin{theorem} y \end{theorem}$");
    coordinator.set_definitions(r"\newenvironment{pf}{\text{Proof. }}{\;\square}");
    coordinator.render().await.unwrap();

    let calls = typesetter.calls();
    assert_eq!(calls[0].latex, r"\boxed{\textbf{Pf.}\quad \text{Proof. }x\;\square}");
    assert_eq!(calls[1].latex, r"\boxed{\textbf{Theorem.}\quad y}");
}

#[tokio::test]
async fn test_user_edit_reports_content_once() {
    let (_, mut coordinator) = setup("a $x$ b");
    coordinator.render().await.unwrap();

    coordinator.set_selection(SelectionSnapshot::caret(7));
    coordinator.insert_text(" $y$");
    let first = report(coordinator.render().await.unwrap());
    assert_eq!(first.content.as_deref(), Some("a $x$ b $y$"));
    assert_eq!(first.selection, SelectionSnapshot::caret(11));
    assert_eq!(coordinator.document().math_nodes().count(), 2);

    // The host echoes the text back: nothing to do.
    coordinator.set_content_from_host("a $x$ b $y$");
    assert_eq!(coordinator.render().await.unwrap(), RenderOutcome::Skipped);
}

#[tokio::test]
async fn test_host_content_is_not_echoed() {
    let (_, mut coordinator) = setup("one");
    coordinator.render().await.unwrap();

    coordinator.set_content_from_host("two $z$");
    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.content, None);
    assert_eq!(report.selection, SelectionSnapshot::caret(7));
}

#[tokio::test]
async fn test_selection_survives_rerender() {
    let (_, mut coordinator) = setup("ab $x$ cd");
    coordinator.render().await.unwrap();

    coordinator.set_selection(SelectionSnapshot::new(7, 9));
    coordinator.set_definitions(r"\newcommand{\x}{y}");
    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.selection, SelectionSnapshot::new(7, 9));
}

#[tokio::test]
async fn test_edit_inside_math_retypesets_it() {
    let (typesetter, mut coordinator) = setup("a $x$ b");
    coordinator.render().await.unwrap();

    coordinator.edit(3..4, "y^2");
    assert!(coordinator
        .document()
        .nodes()
        .iter()
        .all(|node| !matches!(node, Node::Math(_))));

    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.content.as_deref(), Some("a $y^2$ b"));
    assert_eq!(typesetter.calls()[1].latex, "y^2");
}

#[tokio::test]
async fn test_noop_edit_keeps_state() {
    let (typesetter, mut coordinator) = setup("$x$");
    coordinator.render().await.unwrap();
    let generation = coordinator.generation();

    coordinator.edit(1..1, "");
    coordinator.insert_text("");
    assert_eq!(coordinator.generation(), generation);
    assert_eq!(coordinator.render().await.unwrap(), RenderOutcome::Skipped);
    assert_eq!(typesetter.call_count(), 1);
}

#[tokio::test]
async fn test_edit_during_cycle_supersedes_it() {
    let (typesetter, mut coordinator) = setup("$a$ $b$");
    typesetter.gated.store(true, Ordering::SeqCst);

    let job = coordinator.prepare().unwrap();
    assert_eq!(job.span_count(), 2);
    assert_eq!(coordinator.phase(), CyclePhase::Typesetting);
    let handle = tokio::spawn(job.run());

    while typesetter.call_count() == 0 {
        tokio::task::yield_now().await;
    }
    coordinator.edit(0..0, "z ");
    typesetter.gate.notify_one();

    let batch = handle.await.unwrap().unwrap();
    assert!(!batch.is_complete());
    // The second span was never started.
    assert_eq!(typesetter.call_count(), 1);
    assert_eq!(coordinator.apply(batch), RenderOutcome::Superseded);
    assert_eq!(coordinator.phase(), CyclePhase::Idle);
    assert_eq!(coordinator.document().math_nodes().count(), 0);

    typesetter.gated.store(false, Ordering::SeqCst);
    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.rendered, 2);
    assert_eq!(report.content.as_deref(), Some("z $a$ $b$"));
}

#[tokio::test]
async fn test_caret_moved_during_cycle_is_kept() {
    let (typesetter, mut coordinator) = setup("ab $x$ cd");
    coordinator.render().await.unwrap();

    coordinator.set_selection(SelectionSnapshot::caret(0));
    coordinator.insert_text("z");
    typesetter.gated.store(true, Ordering::SeqCst);
    let job = coordinator.prepare().unwrap();
    let handle = tokio::spawn(job.run());

    while typesetter.call_count() < 2 {
        tokio::task::yield_now().await;
    }
    coordinator.set_selection(SelectionSnapshot::caret(9));
    typesetter.gate.notify_one();

    let batch = handle.await.unwrap().unwrap();
    let report = report(coordinator.apply(batch));
    assert_eq!(report.content.as_deref(), Some("zab $x$ cd"));
    assert_eq!(report.selection, SelectionSnapshot::caret(9));
    assert_eq!(coordinator.selection(), SelectionSnapshot::caret(9));
}

#[tokio::test]
async fn test_prepare_hands_out_one_job_per_generation() {
    let (typesetter, mut coordinator) = setup("$a$");
    let job = coordinator.prepare().unwrap();
    assert!(coordinator.prepare().is_none());
    assert_eq!(coordinator.phase(), CyclePhase::Typesetting);

    let batch = job.run().await.unwrap();
    report(coordinator.apply(batch));
    assert!(coordinator.prepare().is_none());
    assert_eq!(typesetter.call_count(), 1);

    // An abandoned job frees the generation for a retry.
    coordinator.set_content_from_host("$b$");
    let job = coordinator.prepare().unwrap();
    coordinator.abandon(&RenderError::RendererUnavailable { attempts: 1 });
    drop(job);
    assert!(coordinator.prepare().is_some());
}

#[tokio::test]
async fn test_stale_batch_after_completion_is_dropped() {
    let (typesetter, mut coordinator) = setup("$a$");
    let job = coordinator.prepare().unwrap();
    let batch = job.run().await.unwrap();
    assert!(batch.is_complete());

    coordinator.set_definitions(r"\newcommand{\a}{b}");
    assert_eq!(coordinator.apply(batch), RenderOutcome::Superseded);
    assert_eq!(coordinator.document().math_nodes().count(), 0);

    coordinator.render().await.unwrap();
    assert_eq!(typesetter.call_count(), 2);
    assert_eq!(coordinator.document().math_nodes().count(), 1);
}

#[tokio::test]
async fn test_waits_for_renderer_readiness() {
    let (typesetter, mut coordinator) = setup("$a$");
    typesetter.not_ready_polls.store(2, Ordering::SeqCst);

    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.rendered, 1);
    assert_eq!(typesetter.polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_unavailable_renderer_keeps_prior_state() {
    let (typesetter, mut coordinator) = setup("$a$");
    coordinator.render().await.unwrap();
    let before = coordinator.document().clone();

    typesetter.never_ready.store(true, Ordering::SeqCst);
    coordinator.set_selection(SelectionSnapshot::caret(3));
    coordinator.insert_text(" $b$");
    let rendered_before_edit = before.math_nodes().count();

    let err = coordinator.render().await.unwrap_err();
    assert!(matches!(err, RenderError::RendererUnavailable { attempts: 3 }));
    assert_eq!(coordinator.phase(), CyclePhase::Idle);
    assert_eq!(coordinator.raw_text(), "$a$ $b$");
    assert_eq!(coordinator.document().math_nodes().count(), rendered_before_edit);
    assert_eq!(typesetter.call_count(), 1);

    // The queued edit is still reported once the renderer recovers.
    typesetter.never_ready.store(false, Ordering::SeqCst);
    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.content.as_deref(), Some("$a$ $b$"));
    assert_eq!(report.rendered, 2);
}

#[tokio::test]
async fn test_inline_definitions() {
    let typesetter = Arc::new(StubTypesetter::default());
    let config = EngineConfig {
        inline_definitions: true,
        ..fast_config()
    };
    let mut coordinator = RenderCoordinator::new(typesetter.clone(), config);
    coordinator.set_content_from_host(r"\newcommand{\foo}{\alpha} then $\foo$");
    coordinator.render().await.unwrap();

    let calls = typesetter.calls();
    assert_eq!(calls[0].macros.replacement(r"\foo"), Some(r"\alpha"));
    // The coordinator's own tables are untouched.
    assert!(coordinator.definitions().macros.get(r"\foo").is_none());
}

#[tokio::test]
async fn test_unterminated_math_stays_text() {
    let (typesetter, mut coordinator) = setup(r"costs \$5 and $x");
    let report = report(coordinator.render().await.unwrap());
    assert_eq!(report.rendered, 0);
    assert_eq!(typesetter.call_count(), 0);
    assert_eq!(coordinator.raw_text(), r"costs \$5 and $x");
}
