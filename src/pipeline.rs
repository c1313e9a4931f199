use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::archive::{ArchiveLayout, ArchiveLocation};
use crate::audit::{self, RunRecord};
use crate::classifier::Classifier;
use crate::dedup::{self, Duplicate, DuplicateKey};
use crate::error::{BrokerboxError, Result};
use crate::filename_meta;
use crate::fingerprint::fingerprint;
use crate::models::{ImportEvent, NewReport, OutcomeKind, ProcessingStatus};
use crate::parsers::{ParseOutcome, ParserRegistry};
use crate::store;

pub const DEFAULT_EXTENSIONS: &[&str] = &["html", "htm", "txt", "md"];

#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub dry_run: bool,
    pub broker_filter: Option<String>,
    pub max_file_size: u64,
    pub extensions: Vec<String>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            broker_filter: None,
            max_file_size: 50 * 1024 * 1024,
            extensions: DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

// Per-file progress, only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Discovered,
    Fingerprinted,
    ExactCheckPassed,
    Classified,
    Parsed,
    ParseFallback,
    SemanticCheckPassed,
    Persisted,
    Archived,
    Diverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Persistence,
    Archival,
    Unopenable,
}

#[derive(Debug, Clone)]
pub struct FileReport {
    pub file_name: String,
    pub kind: OutcomeKind,
    pub stage: Stage,
    pub broker: Option<String>,
    pub period: Option<String>,
    pub destination: Option<PathBuf>,
    pub report_id: Option<i64>,
    pub failure: Option<FailureClass>,
    pub reason: String,
    pub period_mismatch: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub discovered: usize,
    pub imported: usize,
    pub parse_failed: usize,
    pub exact_duplicates: usize,
    pub semantic_duplicates: usize,
    pub no_parser: usize,
    pub unreadable: usize,
    pub insert_failed: usize,
    pub period_mismatches: usize,
    pub persistence_failures: usize,
    pub archive_failed: usize,
    pub errors: Vec<String>,
}

impl RunStats {
    fn record(&mut self, report: &FileReport) {
        match report.kind {
            OutcomeKind::Imported => self.imported += 1,
            OutcomeKind::ParseFailed => self.parse_failed += 1,
            OutcomeKind::ExactDuplicate => self.exact_duplicates += 1,
            OutcomeKind::SemanticDuplicate => self.semantic_duplicates += 1,
            OutcomeKind::NoParserFound => self.no_parser += 1,
            OutcomeKind::Unreadable => self.unreadable += 1,
            OutcomeKind::InsertFailed => self.insert_failed += 1,
            OutcomeKind::PeriodMismatch => {}
        }
        if report.period_mismatch {
            self.period_mismatches += 1;
        }
        match report.failure {
            Some(FailureClass::Persistence) => self.persistence_failures += 1,
            Some(FailureClass::Archival) => self.archive_failed += 1,
            Some(FailureClass::Unopenable) | None => {}
        }
        if report.failure.is_some() {
            self.errors.push(format!("{}: {}", report.file_name, report.reason));
        }
    }

    pub fn succeeded(&self) -> usize {
        self.imported + self.parse_failed
    }

    pub fn diverted(&self) -> usize {
        self.exact_duplicates + self.semantic_duplicates + self.no_parser + self.unreadable
    }

    pub fn failed(&self) -> usize {
        self.persistence_failures + self.archive_failed
    }

    pub fn has_inconsistencies(&self) -> bool {
        self.failed() > 0
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_key: String,
    pub source: PathBuf,
    pub dry_run: bool,
    pub stats: RunStats,
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn into_result(self) -> Result<Self> {
        if self.stats.has_inconsistencies() {
            return Err(BrokerboxError::IncompleteRun {
                persistence: self.stats.persistence_failures,
                archival: self.stats.archive_failed,
            });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

// Regular, non-empty, non-hidden files with a supported extension, sorted by name.
pub fn discover(source: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    if !source.is_dir() {
        return Err(BrokerboxError::SourceMissing(source.to_path_buf()));
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(source)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(source = %source.display(), "Skipping unreadable directory entry: {e}");
                continue;
            }
        };
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(file = %name, "Skipping file without metadata: {e}");
                continue;
            }
        };
        if !meta.is_file() {
            continue;
        }
        let supported = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)));
        if !supported {
            tracing::debug!(file = %name, "Skipping unsupported file");
            continue;
        }
        if meta.len() == 0 {
            tracing::debug!(file = %name, "Skipping empty file");
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

#[derive(Debug)]
enum ReadFailure {
    Unopenable(std::io::Error),
    TooLarge { size: u64, limit: u64 },
    NotUtf8,
}

impl std::fmt::Display for ReadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unopenable(e) => write!(f, "cannot read file: {e}"),
            Self::TooLarge { size, limit } => write!(f, "file is {size} bytes, limit is {limit}"),
            Self::NotUtf8 => write!(f, "file is not valid UTF-8 text"),
        }
    }
}

fn read_content(path: &Path, limit: u64) -> std::result::Result<String, ReadFailure> {
    let size = fs::metadata(path).map_err(ReadFailure::Unopenable)?.len();
    if size > limit {
        return Err(ReadFailure::TooLarge { size, limit });
    }
    let bytes = fs::read(path).map_err(ReadFailure::Unopenable)?;
    String::from_utf8(bytes).map_err(|_| ReadFailure::NotUtf8)
}

fn new_run_key() -> String {
    chrono::Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string()
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

// Best-known facts about the file being processed.
struct FileContext {
    file_name: String,
    stage: Stage,
    content_hash: Option<String>,
    broker: Option<String>,
    account: Option<String>,
    period: Option<String>,
    filename_period: Option<String>,
    parsed_period: Option<String>,
    advisory: Option<ImportEvent>,
}

impl FileContext {
    fn new(file_name: String) -> Self {
        Self {
            file_name,
            stage: Stage::Discovered,
            content_hash: None,
            broker: None,
            account: None,
            period: None,
            filename_period: None,
            parsed_period: None,
            advisory: None,
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug_assert!(stage > self.stage, "{:?} -> {:?}", self.stage, stage);
        tracing::debug!(file = %self.file_name, ?stage, "Stage reached");
        self.stage = stage;
    }

    fn key(&self) -> DuplicateKey {
        DuplicateKey {
            broker: self.broker.clone().unwrap_or_default(),
            account: self.account.clone(),
            period: self.period.clone(),
        }
    }

    fn event(&self, kind: OutcomeKind, reason: &str) -> ImportEvent {
        ImportEvent {
            kind,
            broker: self.broker.clone(),
            account: self.account.clone(),
            period: self.period.clone(),
            file_name: self.file_name.clone(),
            content_hash: self.content_hash.clone(),
            reason: reason.to_string(),
            filename_period: self.filename_period.clone(),
            parsed_period: self.parsed_period.clone(),
        }
    }

    fn report(&self, kind: OutcomeKind, reason: String) -> FileReport {
        FileReport {
            file_name: self.file_name.clone(),
            kind,
            stage: self.stage,
            broker: self.broker.clone(),
            period: self.period.clone(),
            destination: None,
            report_id: None,
            failure: None,
            reason,
            period_mismatch: self.advisory.is_some(),
        }
    }
}

pub struct ImportPipeline<'a> {
    conn: &'a Connection,
    registry: &'a ParserRegistry,
    classifier: &'a Classifier,
    archive: &'a ArchiveLayout,
    options: ImportOptions,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(
        conn: &'a Connection,
        registry: &'a ParserRegistry,
        classifier: &'a Classifier,
        archive: &'a ArchiveLayout,
        options: ImportOptions,
    ) -> Self {
        Self {
            conn,
            registry,
            classifier,
            archive,
            options,
        }
    }

    // Only a missing source directory fails the run as a whole.
    pub fn run(&self, source: &Path) -> Result<RunSummary> {
        let files = discover(source, &self.options.extensions)?;
        let files = self.apply_broker_filter(files);
        let run_key = new_run_key();
        let started_at = chrono::Utc::now().to_rfc3339();
        tracing::info!(
            run = %run_key,
            source = %source.display(),
            files = files.len(),
            dry_run = self.options.dry_run,
            "Starting import run"
        );

        if !self.options.dry_run {
            if let Err(e) = self.archive.ensure_dirs() {
                tracing::warn!(root = %self.archive.root().display(), "Could not prepare archive: {e}");
            }
        }

        let mut stats = RunStats {
            discovered: files.len(),
            ..RunStats::default()
        };
        let mut reports = Vec::with_capacity(files.len());
        for path in &files {
            let report = self.process_file(&run_key, path);
            stats.record(&report);
            reports.push(report);
        }
        let finished_at = chrono::Utc::now().to_rfc3339();

        if !self.options.dry_run {
            let record = RunRecord {
                run_key: run_key.clone(),
                source: source.display().to_string(),
                broker_filter: self.options.broker_filter.clone(),
                started_at,
                finished_at,
                discovered: stats.discovered as i64,
                imported: stats.imported as i64,
                parse_failed: stats.parse_failed as i64,
                exact_duplicates: stats.exact_duplicates as i64,
                semantic_duplicates: stats.semantic_duplicates as i64,
                no_parser: stats.no_parser as i64,
                unreadable: stats.unreadable as i64,
                insert_failed: stats.insert_failed as i64,
                archive_failed: stats.archive_failed as i64,
                period_mismatches: stats.period_mismatches as i64,
                errors: stats.errors.clone(),
            };
            if let Err(e) = audit::record_run(self.conn, &record) {
                tracing::error!(run = %run_key, "Failed to record run summary: {e}");
                stats.persistence_failures += 1;
                stats.errors.push(format!("run summary: {e}"));
            }
        }

        tracing::info!(
            run = %run_key,
            imported = stats.imported,
            diverted = stats.diverted(),
            failed = stats.failed(),
            "Import run finished"
        );
        Ok(RunSummary {
            run_key,
            source: source.to_path_buf(),
            dry_run: self.options.dry_run,
            stats,
            files: reports,
        })
    }

    fn apply_broker_filter(&self, files: Vec<PathBuf>) -> Vec<PathBuf> {
        let Some(filter) = &self.options.broker_filter else {
            return files;
        };
        files
            .into_iter()
            .filter(|path| {
                let name = file_name_of(path);
                match read_content(path, self.options.max_file_size) {
                    Ok(content) => self.classifier.classify(&name, &content).broker == *filter,
                    Err(e) => {
                        tracing::debug!(file = %name, "Skipped by broker filter: {e}");
                        false
                    }
                }
            })
            .collect()
    }

    pub fn process_file(&self, run_key: &str, path: &Path) -> FileReport {
        let mut ctx = FileContext::new(file_name_of(path));

        let content = match read_content(path, self.options.max_file_size) {
            Ok(content) => content,
            Err(failure) => {
                tracing::warn!(file = %ctx.file_name, "Unreadable file: {failure}");
                let reason = failure.to_string();
                return match failure {
                    ReadFailure::Unopenable(_) => {
                        let mut report = self.divert(run_key, path, &ctx, OutcomeKind::Unreadable, None, reason);
                        if report.failure.is_none() {
                            report.failure = Some(FailureClass::Unopenable);
                        }
                        report
                    }
                    _ => self.divert(
                        run_key,
                        path,
                        &ctx,
                        OutcomeKind::Unreadable,
                        Some(ArchiveLocation::Unrecognized),
                        reason,
                    ),
                };
            }
        };

        let hash = fingerprint(&content);
        ctx.content_hash = Some(hash.clone());
        ctx.advance(Stage::Fingerprinted);

        match dedup::find_by_hash(self.conn, &hash) {
            Ok(Some(existing)) => {
                ctx.broker = Some(existing.broker.clone());
                ctx.account = existing.account.clone();
                ctx.period = existing.period.clone();
                let reason = format!("content matches report #{} ({})", existing.id, existing.file_name);
                tracing::info!(file = %ctx.file_name, hash = %hash, "Exact duplicate");
                return self.divert(
                    run_key,
                    path,
                    &ctx,
                    OutcomeKind::ExactDuplicate,
                    Some(ArchiveLocation::ExactDuplicates),
                    reason,
                );
            }
            Ok(None) => {}
            Err(e) => return self.insert_failed(run_key, path, &ctx, &e),
        }
        ctx.advance(Stage::ExactCheckPassed);

        let classification = self.classifier.classify(&ctx.file_name, &content);
        let meta = filename_meta::extract(&ctx.file_name);
        ctx.broker = Some(classification.broker.clone());
        ctx.account = meta.account.clone();
        ctx.period = meta.period.clone();
        ctx.filename_period = meta.period.clone();
        ctx.advance(Stage::Classified);
        tracing::debug!(
            file = %ctx.file_name,
            broker = %classification.broker,
            tier = ?classification.tier,
            pattern = classification.pattern.as_deref().unwrap_or("-"),
            "Classified"
        );

        // Filename metadata is noisy: a provisional match is logged, never acted on.
        if let Ok(Some(existing)) = dedup::find_by_triple(self.conn, &ctx.key()) {
            tracing::info!(
                file = %ctx.file_name,
                existing = existing.id,
                "Filename metadata resembles an existing report"
            );
        }

        let (kind, status, parsed_data, parser_version, error_log) =
            match self.registry.invoke(&classification.broker, &content) {
                ParseOutcome::NoParser => {
                    let reason = format!("no parser registered for broker '{}'", classification.broker);
                    return self.divert(
                        run_key,
                        path,
                        &ctx,
                        OutcomeKind::NoParserFound,
                        Some(ArchiveLocation::Unrecognized),
                        reason,
                    );
                }
                ParseOutcome::Parsed { data, version } => {
                    ctx.parsed_period = data.canonical_period();
                    if let Some(account) = &data.account_number {
                        ctx.account = Some(account.clone());
                    }
                    if let Some(parsed) = ctx.parsed_period.clone() {
                        ctx.period = Some(parsed.clone());
                        if let Some(from_name) = meta.period.as_deref().filter(|p| *p != parsed) {
                            tracing::warn!(
                                file = %ctx.file_name,
                                filename_period = from_name,
                                parsed_period = %parsed,
                                "Period mismatch, using parsed period"
                            );
                            let reason = format!("filename says {from_name}, report says {parsed}");
                            ctx.advisory = Some(ctx.event(OutcomeKind::PeriodMismatch, &reason));
                        }
                    }
                    ctx.advance(Stage::Parsed);

                    match dedup::find_by_triple(self.conn, &ctx.key()) {
                        Ok(Some(existing)) => {
                            let reason = format!(
                                "same broker, account and period as report #{} ({})",
                                existing.id, existing.file_name
                            );
                            tracing::info!(file = %ctx.file_name, existing = existing.id, "Semantic duplicate");
                            return self.divert(
                                run_key,
                                path,
                                &ctx,
                                OutcomeKind::SemanticDuplicate,
                                Some(ArchiveLocation::LogicalDuplicates),
                                reason,
                            );
                        }
                        Ok(None) => {}
                        Err(e) => return self.insert_failed(run_key, path, &ctx, &e),
                    }
                    ctx.advance(Stage::SemanticCheckPassed);
                    (OutcomeKind::Imported, ProcessingStatus::Parsed, Some(data), Some(version), None)
                }
                ParseOutcome::Failed { reason } => {
                    // Filename metadata stands in; the store's constraints still apply on insert.
                    tracing::warn!(file = %ctx.file_name, broker = %classification.broker, "Parse failed: {reason}");
                    ctx.advance(Stage::ParseFallback);
                    (OutcomeKind::ParseFailed, ProcessingStatus::Raw, None, None, Some(reason))
                }
            };

        let reason = match &error_log {
            Some(e) => format!("stored raw, parser failed: {e}"),
            None => "imported".to_string(),
        };
        let mut report = ctx.report(kind, reason);

        if self.options.dry_run {
            report.destination = Some(self.archive.dir(ArchiveLocation::Imported));
            return report;
        }

        let file_size = content.len() as i64;
        let new_report = NewReport {
            broker: classification.broker.clone(),
            account: ctx.account.clone(),
            period: ctx.period.clone(),
            file_name: ctx.file_name.clone(),
            content_hash: hash.clone(),
            raw_content: content,
            file_size,
            parsed_data,
            parser_version,
            processing_status: status,
            error_log,
        };
        let event = ctx.event(kind, &report.reason);

        match self.persist(run_key, &ctx, &new_report, &event) {
            Ok(id) => {
                report.report_id = Some(id);
                ctx.advance(Stage::Persisted);
                report.stage = ctx.stage;
            }
            Err(e) if e.is_unique_violation() => {
                return match dedup::resolve_conflict(self.conn, &hash, &ctx.key()) {
                    Ok(Some(Duplicate::Exact(existing))) => self.divert(
                        run_key,
                        path,
                        &ctx,
                        OutcomeKind::ExactDuplicate,
                        Some(ArchiveLocation::ExactDuplicates),
                        format!("store rejected content matching report #{}", existing.id),
                    ),
                    Ok(Some(Duplicate::Semantic(existing))) => self.divert(
                        run_key,
                        path,
                        &ctx,
                        OutcomeKind::SemanticDuplicate,
                        Some(ArchiveLocation::LogicalDuplicates),
                        format!(
                            "store rejected same broker, account and period as report #{}",
                            existing.id
                        ),
                    ),
                    Ok(None) => self.insert_failed(run_key, path, &ctx, &e),
                    Err(lookup) => self.insert_failed(run_key, path, &ctx, &lookup),
                };
            }
            Err(e) => return self.insert_failed(run_key, path, &ctx, &e),
        }

        match self.archive.move_into(path, ArchiveLocation::Imported) {
            Ok(dest) => {
                ctx.advance(Stage::Archived);
                report.stage = ctx.stage;
                report.destination = Some(dest);
                tracing::info!(file = %ctx.file_name, report_id = report.report_id, kind = kind.as_str(), "Imported");
            }
            Err(e) => {
                tracing::error!(
                    file = %ctx.file_name,
                    report_id = report.report_id,
                    "Report stored but file could not be archived: {e}"
                );
                report.failure = Some(FailureClass::Archival);
                report.reason = format!("stored as report #{} but not archived: {e}", report.report_id.unwrap_or_default());
            }
        }
        report
    }

    fn persist(&self, run_key: &str, ctx: &FileContext, report: &NewReport, event: &ImportEvent) -> Result<i64> {
        let tx = self.conn.unchecked_transaction()?;
        let id = store::insert_report(&tx, report)?;
        if let Some(advisory) = &ctx.advisory {
            audit::record_event(&tx, run_key, advisory)?;
        }
        audit::record_event(&tx, run_key, event)?;
        tx.commit()?;
        Ok(id)
    }

    fn commit_events(&self, run_key: &str, ctx: &FileContext, event: &ImportEvent) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        if let Some(advisory) = &ctx.advisory {
            audit::record_event(&tx, run_key, advisory)?;
        }
        audit::record_event(&tx, run_key, event)?;
        tx.commit()?;
        Ok(())
    }

    // Events commit before the move. `None` leaves the file in the inbox.
    fn divert(
        &self,
        run_key: &str,
        path: &Path,
        ctx: &FileContext,
        kind: OutcomeKind,
        location: Option<ArchiveLocation>,
        reason: String,
    ) -> FileReport {
        debug_assert!(kind.is_terminal());
        let mut report = ctx.report(kind, reason);
        if self.options.dry_run {
            report.stage = Stage::Diverted;
            report.destination = location.map(|l| self.archive.dir(l));
            return report;
        }

        let event = ctx.event(kind, &report.reason);
        if let Err(e) = self.commit_events(run_key, ctx, &event) {
            tracing::error!(file = %ctx.file_name, kind = kind.as_str(), "Failed to record outcome: {e}");
            report.failure = Some(FailureClass::Persistence);
            report.reason = format!("{}; audit write failed: {e}", report.reason);
            return report;
        }

        let Some(location) = location else {
            return report;
        };
        match self.archive.move_into(path, location) {
            Ok(dest) => {
                report.stage = Stage::Diverted;
                report.destination = Some(dest);
            }
            Err(e) => {
                tracing::error!(file = %ctx.file_name, location = location.dir_name(), "Failed to archive: {e}");
                report.failure = Some(FailureClass::Archival);
                report.reason = format!("{}; not archived: {e}", report.reason);
            }
        }
        report
    }

    fn insert_failed(&self, run_key: &str, path: &Path, ctx: &FileContext, err: &BrokerboxError) -> FileReport {
        tracing::error!(file = %ctx.file_name, stage = ?ctx.stage, "Database failure: {err}");
        let mut report = self.divert(run_key, path, ctx, OutcomeKind::InsertFailed, None, err.to_string());
        report.failure = Some(FailureClass::Persistence);
        report
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
