//! Runs sources one after another.
//!
//! For each source: preprocessing tasks, `process`, postprocessing tasks. A
//! failing source is logged and recorded in the summary; the remaining
//! sources still run.

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, info_span};

use crate::error::Result;
use crate::source::{Context, Source};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceTiming {
    pub source: String,
    pub duration_ms: u128,
    pub created: usize,
    pub updated: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub failures: Vec<SourceFailure>,
    pub timings: Vec<SourceTiming>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u128>,
    /// Resident memory after the run, when the platform reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_after_run_bytes: Option<usize>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn run<'s, I>(sources: I, ctx: &mut Context, force: bool) -> RunSummary
where
    I: IntoIterator<Item = &'s Source>,
{
    let start = Instant::now();
    let mut summary = RunSummary::default();

    for source in sources {
        let provenance = source.provenance();
        let _span = info_span!("source", source = %provenance).entered();
        let source_start = Instant::now();

        match run_one(source, ctx, force) {
            Ok((created, updated)) => {
                info!(created, updated, elapsed = ?source_start.elapsed(), "source processed");
                summary.created += created;
                summary.updated += updated;
                summary.timings.push(SourceTiming {
                    source: provenance,
                    duration_ms: source_start.elapsed().as_millis(),
                    created,
                    updated,
                });
            }
            Err(e) => {
                error!(error = %e, "source failed");
                summary.failures.push(SourceFailure {
                    source: provenance,
                    error: e.to_string(),
                });
            }
        }
    }

    summary.duration_ms = Some(start.elapsed().as_millis());
    summary.memory_after_run_bytes = memory_stats::memory_stats().map(|m| m.physical_mem);
    if let Some(bytes) = summary.memory_after_run_bytes {
        info!(memory = %crate::util::format_bytes(bytes as u64), "memory after run");
    }

    summary
}

fn run_one(source: &Source, ctx: &mut Context, force: bool) -> Result<(usize, usize)> {
    let source = source.as_entry_source();
    let provenance = source.provenance();

    for task in source.preprocessing_tasks() {
        task.run(&provenance, ctx)?;
    }

    let counts = source.process(ctx, force)?;

    for task in source.postprocessing_tasks() {
        task.run(&provenance, ctx)?;
    }

    Ok(counts)
}
