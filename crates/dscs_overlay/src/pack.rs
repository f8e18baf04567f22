//! Packing tables and compiling scripts in the patch tree.
//!
//! The pipeline runs four stages in a fixed order: `table:data`,
//! `table:message`, `table:text`, `script`. Jobs inside a stage are
//! independent and run on a bounded rayon pool; the control thread blocks on
//! [`StageHandle::wait`] before it dispatches the next stage.
//!
//! The first failing job cancels the rest of its stage. Jobs that already
//! started are left to finish, jobs still queued report
//! [`JobOutcome::Skipped`], and no later stage runs.

use crate::codec::{swap_extension, ArchiveCodec, ScriptToolchain};
use crate::error::{Error, Result};
use crate::index::{TableKind, SCRIPT_ARCHIVE_DIR};
use crate::merge::PatchTree;
use crate::progress::EventSink;
use crate::utils::utf8_path;
use camino::{Utf8Path, Utf8PathBuf};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Table(TableKind),
    Script,
}

impl StageKind {
    /// Execution order of the stages.
    pub const ORDER: [StageKind; 4] = [
        StageKind::Table(TableKind::Data),
        StageKind::Table(TableKind::Message),
        StageKind::Table(TableKind::Text),
        StageKind::Script,
    ];

    fn verb(&self) -> &'static str {
        match self {
            StageKind::Table(_) => "Packing",
            StageKind::Script => "Compiling",
        }
    }

    fn past_verb(&self) -> &'static str {
        match self {
            StageKind::Table(_) => "Packed",
            StageKind::Script => "Compiled",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            StageKind::Table(_) => "tables",
            StageKind::Script => "scripts",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Table(kind) => write!(f, "table:{}", kind),
            StageKind::Script => f.write_str("script"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    PackTable(TableKind),
    CompileScript,
}

/// One file to pack or compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackJob {
    /// A `<name>.mbe` source directory or a `<name>.txt` script source.
    pub source: Utf8PathBuf,
    pub destination_dir: Utf8PathBuf,
    pub transform: Transform,
}

impl PackJob {
    pub fn file_name(&self) -> &str {
        self.source.file_name().unwrap_or(self.source.as_str())
    }

    /// Path of the file this job produces.
    pub fn output(&self) -> Utf8PathBuf {
        match self.transform {
            Transform::PackTable(_) => self.destination_dir.join(self.file_name()),
            Transform::CompileScript => self
                .destination_dir
                .join(swap_extension(self.file_name(), "nut")),
        }
    }

    fn run(&self, codec: &dyn ArchiveCodec, toolchain: &dyn ScriptToolchain) -> Result<()> {
        match self.transform {
            Transform::PackTable(_) => {
                std::fs::create_dir_all(self.destination_dir.as_std_path())?;
                codec.pack_table(&self.source, &self.destination_dir)?;
            }
            Transform::CompileScript => {
                let origin = self
                    .source
                    .parent()
                    .ok_or_else(|| Error::InvalidPath(self.source.to_string()))?;
                std::fs::create_dir_all(self.destination_dir.as_std_path())?;
                toolchain.compile_script(self.file_name(), origin, &self.destination_dir, false)?;
            }
        }

        let output = self.output();
        if !output.as_std_path().is_file() {
            return Err(Error::Other(format!("expected output {} was not written", output)));
        }
        if self.transform == Transform::CompileScript {
            std::fs::remove_file(self.source.as_std_path())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub jobs: Vec<PackJob>,
}

/// Build the four stages from the finished patch tree.
pub fn plan_stages(tree: &PatchTree) -> Result<Vec<Stage>> {
    let mut stages = Vec::with_capacity(StageKind::ORDER.len());
    for kind in StageKind::ORDER {
        let jobs = match kind {
            StageKind::Table(table_kind) => plan_tables(tree, table_kind)?,
            StageKind::Script => plan_scripts(tree)?,
        };
        tracing::debug!("Planned stage {} with {} jobs", kind, jobs.len());
        stages.push(Stage { kind, jobs });
    }
    Ok(stages)
}

fn plan_tables(tree: &PatchTree, kind: TableKind) -> Result<Vec<PackJob>> {
    let tables_dir = tree.tables_dir();
    let kind_dir = tree.table_kind_dir(kind);
    let mut jobs = Vec::new();
    if !kind_dir.as_std_path().is_dir() {
        return Ok(jobs);
    }

    let mut walker = WalkDir::new(kind_dir.as_std_path())
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(path) = utf8_path(entry.path()) else {
            continue;
        };
        let is_table = path
            .file_name()
            .is_some_and(|name| name.to_ascii_lowercase().ends_with(".mbe"));
        if !is_table {
            continue;
        }
        walker.skip_current_dir();

        let rel = path
            .strip_prefix(&tables_dir)
            .map_err(|_| format!("Walked path is not under {}: {}", tables_dir, path))?;
        let destination_dir = match rel.parent() {
            Some(parent) => tree.patch_dir().join(parent),
            None => tree.patch_dir(),
        };
        jobs.push(PackJob {
            source: path,
            destination_dir,
            transform: Transform::PackTable(kind),
        });
    }
    Ok(jobs)
}

/// Sources come from `patch_scripts/`; the compiled `.nut` lands at the same
/// relative path under `patch/`.
fn plan_scripts(tree: &PatchTree) -> Result<Vec<PackJob>> {
    let sources_root = tree.scripts_dir();
    let script_dir = sources_root.join(SCRIPT_ARCHIVE_DIR);
    let mut jobs = Vec::new();
    if !script_dir.as_std_path().is_dir() {
        return Ok(jobs);
    }

    for entry in WalkDir::new(script_dir.as_std_path()).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(path) = utf8_path(entry.path()) else {
            continue;
        };
        let is_source = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt"));
        if !is_source {
            continue;
        }
        let Some(rel_dir) = path
            .strip_prefix(&sources_root)
            .ok()
            .and_then(Utf8Path::parent)
        else {
            continue;
        };
        jobs.push(PackJob {
            destination_dir: tree.patch_dir().join(rel_dir),
            source: path,
            transform: Transform::CompileScript,
        });
    }
    Ok(jobs)
}

/// Shared flag telling not-yet-started jobs of a stage to stand down.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed { file: String },
    Skipped { file: String },
    Failed { file: Utf8PathBuf, error: Error },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageReport {
    pub kind: StageKind,
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl StageReport {
    fn empty(kind: StageKind, total: usize) -> Self {
        Self {
            kind,
            total,
            completed: 0,
            skipped: 0,
            failed: 0,
        }
    }
}

/// A dispatched stage. Dropping it without waiting detaches the jobs.
pub struct StageHandle {
    kind: StageKind,
    total: usize,
    token: CancellationToken,
    receiver: mpsc::Receiver<JobOutcome>,
}

impl StageHandle {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Block until every job has reported, returning the counts and the first
    /// failure, if any.
    pub fn join(self, events: &EventSink) -> Result<(StageReport, Option<(Utf8PathBuf, Error)>)> {
        let mut report = StageReport::empty(self.kind, self.total);
        let mut first_failure = None;

        for _ in 0..self.total {
            let outcome = self.receiver.recv().map_err(|_| {
                Error::Other(format!("worker pool lost a job of stage {}", self.kind))
            })?;
            match outcome {
                JobOutcome::Completed { file } => {
                    report.completed += 1;
                    events.update(format!(
                        "{} {}/{} in this stage [{}]",
                        self.kind.past_verb(),
                        report.completed,
                        self.total,
                        file
                    ));
                }
                JobOutcome::Skipped { file } => {
                    report.skipped += 1;
                    tracing::debug!("Skipped {} after cancellation", file);
                }
                JobOutcome::Failed { file, error } => {
                    report.failed += 1;
                    tracing::error!("Stage {} failed on {}: {}", self.kind, file, error);
                    if first_failure.is_none() {
                        first_failure = Some((file, error));
                    }
                }
            }
        }

        Ok((report, first_failure))
    }

    /// Stage barrier: wait for all jobs and fail with the first job error.
    pub fn wait(self, events: &EventSink) -> Result<StageReport> {
        let kind = self.kind;
        let (report, failure) = self.join(events)?;
        if let Some((file, error)) = failure {
            tracing::warn!(
                "Stage {} aborted: completed={} skipped={} failed={}",
                kind,
                report.completed,
                report.skipped,
                report.failed
            );
            return Err(Error::pack_job(kind, file, error));
        }
        Ok(report)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn completed(&self) -> usize {
        self.stages.iter().map(|s| s.completed).sum()
    }
}

pub struct PackPipeline {
    pool: rayon::ThreadPool,
    codec: Arc<dyn ArchiveCodec>,
    toolchain: Arc<dyn ScriptToolchain>,
    events: EventSink,
}

impl PackPipeline {
    pub fn new(
        workers: usize,
        codec: Arc<dyn ArchiveCodec>,
        toolchain: Arc<dyn ScriptToolchain>,
        events: EventSink,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("dscs-pack-{}", i))
            .build()?;
        Ok(Self {
            pool,
            codec,
            toolchain,
            events,
        })
    }

    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Queue every job of `stage` on the pool and return immediately.
    pub fn dispatch(&self, stage: Stage) -> StageHandle {
        let (sender, receiver) = mpsc::channel();
        let token = CancellationToken::new();
        let total = stage.jobs.len();

        for job in stage.jobs {
            let sender = sender.clone();
            let token = token.clone();
            let codec = Arc::clone(&self.codec);
            let toolchain = Arc::clone(&self.toolchain);

            self.pool.spawn(move || {
                let file = job.file_name().to_string();
                let outcome = if token.is_cancelled() {
                    JobOutcome::Skipped { file }
                } else {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        job.run(codec.as_ref(), toolchain.as_ref())
                    }));
                    match result {
                        Ok(Ok(())) => JobOutcome::Completed { file },
                        Ok(Err(error)) => {
                            token.cancel();
                            JobOutcome::Failed {
                                file: job.source.clone(),
                                error,
                            }
                        }
                        Err(panic) => {
                            token.cancel();
                            JobOutcome::Failed {
                                file: job.source.clone(),
                                error: Error::Other(format!("job panicked: {}", panic_message(panic.as_ref()))),
                            }
                        }
                    }
                };
                // The receiver only goes away if the handle was dropped.
                let _ = sender.send(outcome);
            });
        }

        StageHandle {
            kind: stage.kind,
            total,
            token,
            receiver,
        }
    }

    /// Run `stages` one after another, stopping at the first failed stage.
    pub fn run_stages(&self, stages: Vec<Stage>) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();

        for stage in stages {
            let kind = stage.kind;
            if stage.jobs.is_empty() {
                self.events
                    .log(format!("Nothing to do for stage {}: zero {} to process.", kind, kind.noun()));
                report.stages.push(StageReport::empty(kind, 0));
                continue;
            }

            self.events
                .log(format!("{} {} {}...", kind.verb(), stage.jobs.len(), kind.noun()));
            let stage_report = self.dispatch(stage).wait(&self.events)?;
            self.events.log(format!(
                "{} {} {} [{}].",
                kind.past_verb(),
                stage_report.completed,
                kind.noun(),
                kind
            ));
            report.stages.push(stage_report);
        }

        Ok(report)
    }

    /// Plan and run all stages over `tree`.
    pub fn run(&self, tree: &PatchTree) -> Result<PipelineReport> {
        let stages = plan_stages(tree)?;
        self.run_stages(stages)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
