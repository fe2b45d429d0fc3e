use anyhow::Context;
use clap::{Parser, Subcommand};
use log::warn;
use notetex_core::{
    CommandSet, EngineConfig, KatexTypesetter, PlaceholderTypesetter, RenderCoordinator,
    RenderOutcome, RenderReport, RenderedDocument, Typesetter,
};
use notetex_macros::{Definitions, Expander};
use notetex_syntax::{parse, Segment};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "notetex")]
#[command(about = "NoteTeX math rendering tools", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a note into text, math and line-break segments
    Segments {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        /// Engine configuration (JSON) with custom delimiters
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Show the macro and environment tables read from a definitions file
    Definitions {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Expand environment blocks in a LaTeX fragment
    Expand {
        latex: String,
        /// Definitions source file
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Render a note once and print the rendered document as JSON
    Render {
        #[arg(value_name = "FILE")]
        path: PathBuf,
        /// Definitions source file
        #[arg(long, conflicts_with = "command_set")]
        definitions: Option<PathBuf>,
        /// Saved command set (JSON with a `macrosSource` key)
        #[arg(long)]
        command_set: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Typeset with the `katex` tool instead of placeholders
        #[arg(long)]
        katex: bool,
    },
}

#[derive(Serialize)]
struct SegmentEntry<'a> {
    start: usize,
    end: usize,
    #[serde(flatten)]
    segment: &'a Segment,
}

#[derive(Serialize)]
struct Diagnostic {
    message: String,
    offset: usize,
}

#[derive(Serialize)]
struct SegmentsOutput<'a> {
    segments: Vec<SegmentEntry<'a>>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Serialize)]
struct DefinitionsOutput<'a> {
    #[serde(flatten)]
    definitions: &'a Definitions,
    skipped: Vec<String>,
}

#[derive(Serialize)]
struct RenderOutput<'a> {
    report: &'a RenderReport,
    document: &'a RenderedDocument,
    skipped: Vec<String>,
}

/// Attaches logical (character) ranges to each segment.
fn segment_entries(segments: &[Segment]) -> Vec<SegmentEntry<'_>> {
    let mut offset = 0;
    segments
        .iter()
        .map(|segment| {
            let start = offset;
            offset += segment.logical_len();
            SegmentEntry {
                start,
                end: offset,
                segment,
            }
        })
        .collect()
}

fn char_offset(text: &str, byte_offset: usize) -> usize {
    text.get(..byte_offset)
        .map(|prefix| prefix.chars().count())
        .unwrap_or_else(|| text.chars().count())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn read_definitions(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read definitions {}", path.display())),
        None => Ok(CommandSet::default().macros_source),
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Segments { path, config } => {
            let content = fs::read_to_string(path)?;
            let config = load_config(config.as_deref())?;
            let parse = parse(&content, &config.delimiters);
            let segments = parse.segments();
            let output = SegmentsOutput {
                segments: segment_entries(&segments),
                diagnostics: parse
                    .errors
                    .iter()
                    .map(|error| Diagnostic {
                        message: error.message.clone(),
                        offset: char_offset(&content, u32::from(error.range.start()) as usize),
                    })
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Definitions { path } => {
            let source = fs::read_to_string(path)?;
            let extraction = Definitions::extract(&source);
            let output = DefinitionsOutput {
                definitions: &extraction.definitions,
                skipped: extraction.skipped.iter().map(ToString::to_string).collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Expand { latex, definitions } => {
            let source = read_definitions(definitions.as_deref())?;
            let extraction = Definitions::extract(&source);
            for skipped in &extraction.skipped {
                warn!("{}", skipped);
            }
            println!(
                "{}",
                Expander::new(&extraction.definitions.environments).expand(latex)
            );
        }
        Commands::Render {
            path,
            definitions,
            command_set,
            config,
            katex,
        } => {
            let content = fs::read_to_string(path)?;
            let config = load_config(config.as_deref())?;
            let source = match command_set {
                Some(path) => {
                    CommandSet::load(path)
                        .with_context(|| format!("failed to load command set {}", path.display()))?
                        .macros_source
                }
                None => read_definitions(definitions.as_deref())?,
            };

            let typesetter: Arc<dyn Typesetter> = if *katex {
                Arc::new(KatexTypesetter::detect().context("katex not found on PATH")?)
            } else {
                Arc::new(PlaceholderTypesetter)
            };

            let mut coordinator = RenderCoordinator::new(typesetter, config);
            coordinator.set_definitions(&source);
            for skipped in coordinator.skipped_definitions() {
                warn!("{}", skipped);
            }
            coordinator.set_content_from_host(&content);

            let report = match coordinator.render().await? {
                RenderOutcome::Rendered(report) => report,
                other => anyhow::bail!("render did not apply: {:?}", other),
            };
            let output = RenderOutput {
                report: &report,
                document: coordinator.document(),
                skipped: coordinator
                    .skipped_definitions()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }
    Ok(())
}
