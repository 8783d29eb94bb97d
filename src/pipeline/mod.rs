//! Resumable translation job.
//! Each `status()` call is one bounded step: load the checkpoint and staged
//! catalog, translate a window of products for the current language, persist
//! both, and report. Nothing runs between calls; the checkpoint carries the
//! whole suspended state, so a process restart between steps loses nothing.

pub mod progress;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::catalog::store::{CatalogStorage, FsCatalogStore};
use crate::catalog::Catalog;
use crate::checkpoint::{Checkpoint, CheckpointStore, CurrentProduct, JobStatus, Severity};
use crate::config::Settings;
use crate::error::{PipelineError, Result};
use crate::metrics::{metric_names, MetricsRegistry};
use crate::translate::cache::TranslationCache;
use crate::translate::sqlite_cache::SqliteCache;
use crate::translate::{TranslateRequest, TranslationSource, Translator};

pub use progress::{BatchStats, CompletionStats, ProgressSnapshot};

/// Tunables of the batch processor.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub job_key: String,
    pub source_language: String,
    pub target_languages: Vec<String>,
    pub batch_size: usize,
    pub quick_skip_sample: usize,
    /// Soft per-invocation budget, checked between products.
    pub time_budget: Duration,
    pub log_capacity: usize,
}

impl PipelineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            job_key: settings.job_key.clone(),
            source_language: settings.source_language.clone(),
            target_languages: settings.target_languages(),
            batch_size: settings.batch_size.max(1),
            quick_skip_sample: settings.quick_skip_sample,
            time_budget: Duration::from_secs(settings.time_budget_secs),
            log_capacity: settings.log_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartReport {
    pub total_products: usize,
    pub force_retranslate: bool,
    /// Cursors were carried over from an interrupted run.
    pub resumed: bool,
    pub backup_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    NoActiveProcess,
}

pub struct Pipeline<T> {
    options: PipelineOptions,
    checkpoints: CheckpointStore,
    catalog: Box<dyn CatalogStorage>,
    cache: TranslationCache,
    translator: T,
    metrics: MetricsRegistry,
}

impl<T: Translator> Pipeline<T> {
    pub fn new(
        options: PipelineOptions,
        checkpoints: CheckpointStore,
        catalog: Box<dyn CatalogStorage>,
        cache: TranslationCache,
        translator: T,
    ) -> Self {
        Self {
            options,
            checkpoints,
            catalog,
            cache,
            translator,
            metrics: MetricsRegistry::new(),
        }
    }

    /// Wire up file storage, the SQLite checkpoint store and the two-tier cache.
    pub fn from_settings(settings: &Settings, translator: T) -> Result<Self> {
        let checkpoints = CheckpointStore::open(&settings.state_db)?;
        let l2 = SqliteCache::open(&settings.state_db)?;
        let catalog = FsCatalogStore::new(
            settings.catalog_path.clone(),
            settings.staging_path(),
            settings.backup_dir(),
        );
        Ok(Self::new(
            PipelineOptions::from_settings(settings),
            checkpoints,
            Box::new(catalog),
            TranslationCache::new(settings.cache_capacity, Some(l2)),
            translator,
        ))
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn checkpoint(&self) -> Result<Option<Checkpoint>> {
        self.checkpoints.load(&self.options.job_key)
    }

    /// Begin (or resume) a job over the published catalog.
    pub fn start(&self, force: bool) -> Result<StartReport> {
        let opts = &self.options;
        let published = match self.catalog.load_published() {
            Ok(Some(catalog)) if !catalog.is_empty() => catalog,
            Ok(Some(_)) => {
                return Err(PipelineError::Configuration(
                    "published catalog has no products".into(),
                ))
            }
            Ok(None) => {
                return Err(PipelineError::Configuration(
                    "no published catalog found; run the export first".into(),
                ))
            }
            Err(PipelineError::Json(e)) => {
                return Err(PipelineError::Configuration(format!(
                    "published catalog is malformed: {e}"
                )))
            }
            Err(e) => return Err(e),
        };

        let backup_path = self.catalog.backup_published()?;
        let previous = self.checkpoints.load(&opts.job_key)?;

        let staged = if force {
            self.catalog.discard_staged()?;
            None
        } else {
            match self.catalog.load_staged() {
                Ok(Some(staged)) if !staged.is_empty() => Some(staged),
                Ok(_) => None,
                Err(e) => {
                    warn!(error = %e, "staged catalog unreadable, starting from published copy");
                    None
                }
            }
        };

        let mut resumed = false;
        let mut checkpoint = match staged {
            Some(staged) => {
                let mut cp = Checkpoint::new(
                    opts.source_language.clone(),
                    opts.target_languages.clone(),
                    staged.len(),
                    false,
                    opts.log_capacity,
                );
                if let Some(prev) = previous.filter(|p| self.can_resume(p, staged.len())) {
                    cp.run_id = prev.run_id;
                    cp.current_language_index = prev.current_language_index;
                    cp.current_product_index = prev.current_product_index;
                    cp.api_calls = prev.api_calls;
                    cp.force_retranslate = prev.force_retranslate;
                    cp.log = prev.log;
                    resumed = true;
                }
                cp
            }
            None => {
                self.catalog.write_staged(&published)?;
                Checkpoint::new(
                    opts.source_language.clone(),
                    opts.target_languages.clone(),
                    published.len(),
                    force,
                    opts.log_capacity,
                )
            }
        };

        let languages = checkpoint.languages.join(", ");
        let message = if resumed {
            format!(
                "Resumed: {} products, languages [{}], at language {}/{} product {}/{}",
                checkpoint.total_products,
                languages,
                checkpoint.current_language_index + 1,
                checkpoint.languages.len(),
                checkpoint.current_product_index,
                checkpoint.total_products
            )
        } else if force {
            format!(
                "Started full re-translation: {} products, languages [{}]",
                checkpoint.total_products, languages
            )
        } else {
            format!(
                "Started: {} products, languages [{}]",
                checkpoint.total_products, languages
            )
        };
        checkpoint.log(Severity::Info, message);
        self.checkpoints.save(&opts.job_key, &checkpoint)?;

        info!(
            run_id = %checkpoint.run_id,
            total_products = checkpoint.total_products,
            languages = checkpoint.languages.len(),
            force,
            resumed,
            "translation job started"
        );

        Ok(StartReport {
            total_products: checkpoint.total_products,
            force_retranslate: checkpoint.force_retranslate,
            resumed,
            backup_path,
        })
    }

    fn can_resume(&self, prev: &Checkpoint, total_products: usize) -> bool {
        matches!(
            prev.status,
            JobStatus::Running | JobStatus::Stopped | JobStatus::Error
        ) && prev.source_language == self.options.source_language
            && prev.languages == self.options.target_languages
            && prev.total_products == total_products
            && !prev.all_languages_done()
    }

    /// Ask a running job to pause. Takes effect at the next batch boundary.
    pub fn stop(&self) -> Result<StopOutcome> {
        let Some(mut cp) = self.checkpoints.load(&self.options.job_key)? else {
            return Ok(StopOutcome::NoActiveProcess);
        };
        match cp.status {
            JobStatus::Running => {
                if cp.transition(JobStatus::Stopped).is_err() {
                    return Ok(StopOutcome::NoActiveProcess);
                }
                cp.log(Severity::Warning, stop_message(&cp));
                self.checkpoints.save(&self.options.job_key, &cp)?;
                Ok(StopOutcome::Stopped)
            }
            JobStatus::Stopped => Ok(StopOutcome::Stopped),
            _ => Ok(StopOutcome::NoActiveProcess),
        }
    }

    /// Report progress, running one batch first if the job is running.
    pub async fn status(&self) -> Result<ProgressSnapshot> {
        let key = &self.options.job_key;
        let Some(cp) = self.checkpoints.load(key)? else {
            return Ok(ProgressSnapshot::idle());
        };
        if cp.status != JobStatus::Running {
            return self.report(cp);
        }

        if cp.languages.is_empty() {
            return self.fail_configuration(cp, "no target languages configured");
        }
        if !self.translator.is_configured() {
            return self.fail_configuration(cp, "translator credentials are not configured");
        }

        let catalog = match self.catalog.load_staged() {
            Ok(Some(catalog)) => catalog,
            Ok(None) => return self.fail_batch(cp, "staged catalog is missing".into()),
            Err(e) => return self.fail_batch(cp, format!("staged catalog unreadable: {e}")),
        };

        // Re-read: a stop may have landed while the staged catalog was loading.
        let Some(cp) = self.checkpoints.load(key)? else {
            return Ok(ProgressSnapshot::idle());
        };
        if cp.status != JobStatus::Running {
            debug!(status = %cp.status, "job no longer running, skipping batch");
            return self.report(cp);
        }
        if catalog.len() != cp.total_products {
            let msg = format!(
                "staged catalog has {} products, checkpoint expects {}",
                catalog.len(),
                cp.total_products
            );
            return self.fail_batch(cp, msg);
        }

        self.step(cp, catalog).await
    }

    /// One batch for the current language, then the cursor bookkeeping.
    async fn step(&self, mut cp: Checkpoint, mut catalog: Catalog) -> Result<ProgressSnapshot> {
        let started = Instant::now();
        let Some(language) = cp.current_language().map(str::to_string) else {
            return self.fail_batch(cp, "language cursor is past the last language".into());
        };
        cp.error = None;

        let total = cp.total_products;
        let from = cp.current_product_index.min(total);
        let to = (from + self.options.batch_size).min(total);

        let (next, dirty) = if !cp.force_retranslate && self.window_translated(&catalog, from, to, &language) {
            cp.log(
                Severity::Info,
                format!("Products {}-{} already in {language}, skipped", from + 1, to),
            );
            debug!(language = %language, from, to, "quick-skip");
            (to, false)
        } else {
            let (next, dirty, stats) = self
                .translate_window(&mut cp, &mut catalog, &language, from, to, started)
                .await;
            if from < to {
                let level = if stats.errors > 0 {
                    Severity::Warning
                } else {
                    Severity::Info
                };
                cp.log(level, stats.summary_line(&language, from, next, started.elapsed()));
            }
            info!(
                language = %language,
                from,
                to = next,
                processed = stats.processed,
                skipped = stats.skipped,
                fields = stats.fields_translated,
                cache_hits = stats.cache_hits,
                api_calls = stats.api_calls,
                errors = stats.errors,
                "batch finished"
            );
            (next, dirty)
        };

        if dirty {
            if let Err(e) = self.catalog.write_staged(&catalog) {
                return self.fail_batch(cp, format!("could not persist staged catalog: {e}"));
            }
        }
        if let Err(e) = self.cache.flush() {
            cp.log(Severity::Warning, format!("translation cache flush failed: {e}"));
        }

        cp.current_product_index = next;

        if cp.current_product_index >= total {
            cp.log(Severity::Success, format!("Language {language} completed"));
            let is_last = cp.current_language_index + 1 >= cp.languages.len();
            if is_last {
                if let Err(e) = self.commit(&catalog, total) {
                    error!(error = %e, "commit failed, staged catalog kept");
                    let moved = cp.transition(JobStatus::Error);
                    debug_assert!(moved.is_ok(), "{moved:?}");
                    cp.error = Some(e.to_string());
                    cp.log(Severity::Error, format!("Publishing failed: {e}"));
                    self.persist(&mut cp)?;
                    return Err(e);
                }
                cp.advance_language();
                let moved = cp.transition(JobStatus::Completed);
                debug_assert!(moved.is_ok(), "{moved:?}");
                cp.completed_at = Some(chrono::Utc::now());
                cp.current_product = None;
                let calls = self.metrics.summary(metric_names::TRANSLATE_CALL);
                cp.log(
                    Severity::Success,
                    format!(
                        "All {} languages done, catalog published ({} API calls, call p50 {:.0}ms / p95 {:.0}ms)",
                        cp.languages.len(),
                        cp.api_calls,
                        calls.p50_ms,
                        calls.p95_ms
                    ),
                );
            } else {
                cp.advance_language();
                if let Some(next_lang) = cp.current_language() {
                    let message = format!("Switching to {next_lang}");
                    cp.log(Severity::Info, message);
                }
            }
        }

        self.metrics.record_since(metric_names::BATCH, started);
        self.finish(cp)
    }

    /// Translate products `from..to` until done or out of time budget.
    /// Returns the index after the last fully processed product.
    async fn translate_window(
        &self,
        cp: &mut Checkpoint,
        catalog: &mut Catalog,
        language: &str,
        from: usize,
        to: usize,
        started: Instant,
    ) -> (usize, bool, BatchStats) {
        let source = self.options.source_language.clone();
        let force = cp.force_retranslate;
        let mut stats = BatchStats::default();
        let mut dirty = false;
        let mut next = from;

        for idx in from..to {
            if idx > from && started.elapsed() >= self.options.time_budget {
                cp.log(
                    Severity::Warning,
                    format!("Time budget reached after {} products, continuing next call", idx - from),
                );
                break;
            }
            let product = &mut catalog.products[idx];
            stats.scanned += 1;
            cp.current_product = Some(CurrentProduct {
                code: product.code_str(),
                name: product.display_name(&source),
                language: language.to_string(),
            });

            let pending = product.pending_fields(&source, language, force);
            if pending.is_empty() {
                stats.skipped += 1;
                next = idx + 1;
                continue;
            }
            stats.processed += 1;

            for field in pending {
                let request = TranslateRequest::new(field.source_text, source.as_str(), language);
                let call_started = Instant::now();
                match self
                    .cache
                    .translate_with_cache(&self.translator, &request, force)
                    .await
                {
                    Ok(translated) => {
                        match translated.source {
                            TranslationSource::Cache => stats.cache_hits += 1,
                            TranslationSource::Api => {
                                stats.api_calls += 1;
                                cp.api_calls += 1;
                                self.metrics
                                    .record_since(metric_names::TRANSLATE_CALL, call_started);
                            }
                        }
                        if let Some(text) = product.field_mut(&field.path) {
                            text.set(language, translated.text);
                            stats.fields_translated += 1;
                            dirty = true;
                        }
                    }
                    Err(e) => {
                        // The field stays empty and is picked up by a later run.
                        stats.api_calls += 1;
                        cp.api_calls += 1;
                        stats.errors += 1;
                        let code = product.code_str();
                        warn!(product = %code, field = %field.path, language, error = %e, "field translation failed");
                        cp.log(
                            Severity::Error,
                            format!("{code} {} → {language}: {e}", field.path),
                        );
                    }
                }
            }
            next = idx + 1;
        }

        (next, dirty, stats)
    }

    /// Quick-skip check. The first `quick_skip_sample` products act as a cheap
    /// filter; a passing sample is confirmed against the rest of the window
    /// so a partially translated window is never skipped.
    fn window_translated(&self, catalog: &Catalog, from: usize, to: usize, language: &str) -> bool {
        if from >= to {
            return false;
        }
        let source = &self.options.source_language;
        let window = &catalog.products[from..to];
        let sample = self.options.quick_skip_sample.min(window.len());
        let (head, tail) = window.split_at(sample);
        head.iter().all(|p| p.is_translated(source, language))
            && tail.iter().all(|p| p.is_translated(source, language))
    }

    /// Promote the staged catalog: write, read back, verify, then clean up.
    fn commit(&self, staged: &Catalog, expected: usize) -> Result<()> {
        self.catalog
            .write_published(staged)
            .map_err(|e| PipelineError::Commit(format!("writing published catalog: {e}")))?;
        let written = self
            .catalog
            .load_published()
            .map_err(|e| PipelineError::Commit(format!("reading back published catalog: {e}")))?
            .ok_or_else(|| PipelineError::Commit("published catalog missing after write".into()))?;
        if written.len() != expected {
            return Err(PipelineError::Commit(format!(
                "published catalog has {} products, expected {expected}",
                written.len()
            )));
        }

        if let Err(e) = self.catalog.discard_staged() {
            warn!(error = %e, "could not remove staged catalog after publish");
        }
        if let Err(e) = self.cache.flush() {
            warn!(error = %e, "translation cache flush after publish failed");
        }
        info!(products = expected, "catalog published");
        Ok(())
    }

    /// Record a configuration problem without changing the job status.
    fn fail_configuration(&self, mut cp: Checkpoint, message: &str) -> Result<ProgressSnapshot> {
        warn!(message, "translation job misconfigured");
        if cp.error.as_deref() != Some(message) {
            cp.log(Severity::Error, message);
        }
        cp.error = Some(message.to_string());
        self.checkpoints.save(&self.options.job_key, &cp)?;
        Err(PipelineError::Configuration(message.to_string()))
    }

    /// Batch-level failure: the job moves to `error` until started again.
    fn fail_batch(&self, mut cp: Checkpoint, message: String) -> Result<ProgressSnapshot> {
        let message = match &cp.current_product {
            Some(p) => format!("{message} (last product {} \"{}\", {})", p.code, p.name, p.language),
            None => message,
        };
        error!(message = %message, "translation batch failed");
        let moved = cp.transition(JobStatus::Error);
        debug_assert!(moved.is_ok(), "{moved:?}");
        cp.error = Some(message.clone());
        cp.log(Severity::Error, message.clone());
        self.persist(&mut cp)?;
        Err(PipelineError::Storage(message))
    }

    /// Snapshot without doing work; persists only the log delivery mark.
    fn report(&self, cp: Checkpoint) -> Result<ProgressSnapshot> {
        if !cp.log.has_unreported() {
            return Ok(ProgressSnapshot::from_checkpoint(&cp, Vec::new()));
        }
        self.finish(cp)
    }

    fn finish(&self, mut cp: Checkpoint) -> Result<ProgressSnapshot> {
        self.honor_concurrent_stop(&mut cp)?;
        let log = cp.log.take_unreported();
        self.checkpoints.save(&self.options.job_key, &cp)?;
        Ok(ProgressSnapshot::from_checkpoint(&cp, log))
    }

    fn persist(&self, cp: &mut Checkpoint) -> Result<()> {
        self.honor_concurrent_stop(cp)?;
        self.checkpoints.save(&self.options.job_key, cp)
    }

    /// `cp` was read at batch entry. A `stop()` saved while the batch was
    /// awaiting the translator must survive the batch's own save: the new
    /// cursors, counters and log are kept, the status becomes stopped.
    /// Completed and error outcomes take precedence over the stop.
    fn honor_concurrent_stop(&self, cp: &mut Checkpoint) -> Result<()> {
        if cp.status != JobStatus::Running {
            return Ok(());
        }
        let Some(stored) = self.checkpoints.load(&self.options.job_key)? else {
            return Ok(());
        };
        if stored.run_id != cp.run_id || stored.status != JobStatus::Stopped {
            return Ok(());
        }
        let moved = cp.transition(JobStatus::Stopped);
        debug_assert!(moved.is_ok(), "{moved:?}");
        let message = stop_message(cp);
        cp.log(Severity::Warning, message);
        info!(run_id = %cp.run_id, "stop requested during batch, honored");
        Ok(())
    }
}

fn stop_message(cp: &Checkpoint) -> String {
    match cp.current_language() {
        Some(lang) => format!(
            "Stopped at {lang}, product {}/{}",
            cp.current_product_index, cp.total_products
        ),
        None => "Stopped".to_string(),
    }
}
