//! Two-phase propagation across databases.
//!
//! Phase one runs the jobs of the database that was just saved. Phase two
//! opens every target reached in phase one and runs that database's own
//! jobs, so a target can push its records back to the master (or on to
//! further databases) without a central server. Jobs that point back at the
//! master are unlocked with the master's credential, so spokes never need to
//! store the hub's secret.

use crate::credential::Credential;
use crate::database::{same_location, DatabaseStore, KeepassDatabase};
use crate::error::Result;
use crate::jobs::{load_jobs, SyncJob, DEFAULT_JOBS_GROUP};
use crate::merge::{self, MergeOptions, MergeStats};
use crate::prune;
use crate::selector;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DISABLED: &str = "disabled";
const SLAVE_ONLY: &str = "only runs when this database is a sync target";

/// Knobs that apply to every job of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Name of the group holding job records.
    pub jobs_group: String,
    /// Standard icon marking recycle bin groups.
    pub trash_icon: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            jobs_group: DEFAULT_JOBS_GROUP.to_string(),
            trash_icon: 43,
        }
    }
}

/// A non-fatal problem met during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncWarning {
    /// Job title, or the database path for problems outside a job.
    pub job: String,
    pub message: String,
}

impl fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job, self.message)
    }
}

/// Outcome of one sync pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Jobs that opened their target and merged.
    pub jobs_run: usize,
    /// Databases written during the pass, the master first.
    pub touched: Vec<PathBuf>,
    pub warnings: Vec<SyncWarning>,
    /// Jobs passed over on purpose, with the reason.
    pub skipped: Vec<SyncWarning>,
    pub merged: MergeStats,
    pub deleted: usize,
}

/// State of a single pass, threaded through every step instead of living
/// in globals.
struct SyncContext {
    master_path: PathBuf,
    master_credential: Credential,
    report: SyncReport,
}

impl SyncContext {
    fn new(master: &KeepassDatabase) -> Self {
        Self {
            master_path: master.path().to_path_buf(),
            master_credential: master.credential().clone(),
            report: SyncReport::default(),
        }
    }

    fn touch(&mut self, path: &Path) {
        if !self.was_touched(path) {
            self.report.touched.push(path.to_path_buf());
        }
    }

    fn was_touched(&self, path: &Path) -> bool {
        self.report.touched.iter().any(|p| same_location(p, path))
    }

    fn is_master(&self, path: &Path) -> bool {
        same_location(path, &self.master_path)
    }

    fn warn(&mut self, job: &str, message: impl fmt::Display) {
        let warning = SyncWarning {
            job: job.to_string(),
            message: message.to_string(),
        };
        tracing::warn!("Synchronization problem in {warning}");
        self.report.warnings.push(warning);
    }

    fn skip(&mut self, job: &str, reason: &str) {
        self.report.skipped.push(SyncWarning {
            job: job.to_string(),
            message: reason.to_string(),
        });
    }
}

/// A database currently shown by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDocument {
    pub path: PathBuf,
    pub locked: bool,
}

/// Host application that displays databases and must refresh them after a
/// pass rewrote their files.
pub trait DocumentHost {
    /// Databases currently open in the host.
    fn documents(&self) -> Vec<OpenDocument>;

    /// Close and reopen the document at `path` with its existing credential.
    fn reload(&mut self, path: &Path) -> Result<()>;

    /// Bring the document at `path` to the front.
    fn activate(&mut self, path: &Path);
}

/// Host without any open documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDocuments;

impl DocumentHost for NoDocuments {
    fn documents(&self) -> Vec<OpenDocument> {
        Vec::new()
    }

    fn reload(&mut self, _path: &Path) -> Result<()> {
        Ok(())
    }

    fn activate(&mut self, _path: &Path) {}
}

/// Identifies one save operation of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SaveToken(Uuid);

impl SaveToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SaveToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Save operations that have started but not finished.
///
/// A host may report several sub-saves for one logical save; a pass starts
/// only once all of them have finished.
#[derive(Debug, Default)]
pub struct SaveTracker {
    in_flight: HashSet<SaveToken>,
}

impl SaveTracker {
    pub fn begin(&mut self, token: SaveToken) {
        self.in_flight.insert(token);
    }

    /// Mark `token` finished; true when no save is left in flight.
    pub fn finish(&mut self, token: SaveToken) -> bool {
        self.in_flight.remove(&token);
        self.in_flight.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

/// Drives sync passes over a store and refreshes the host afterwards.
pub struct SyncOrchestrator<S, H> {
    store: S,
    host: H,
    settings: SyncSettings,
    saves: SaveTracker,
}

impl<S: DatabaseStore, H: DocumentHost> SyncOrchestrator<S, H> {
    pub fn new(store: S, host: H, settings: SyncSettings) -> Self {
        Self {
            store,
            host,
            settings,
            saves: SaveTracker::default(),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// A save of some database started.
    pub fn on_save_started(&mut self, token: SaveToken) {
        self.saves.begin(token);
    }

    /// A save finished. Runs a pass for `saved` once no other save is in
    /// flight, otherwise returns `None`.
    pub fn on_save_finished(
        &mut self,
        token: SaveToken,
        saved: &mut KeepassDatabase,
    ) -> Option<SyncReport> {
        if !self.saves.finish(token) {
            tracing::debug!("{} saves still in flight, waiting", self.saves.in_flight());
            return None;
        }
        Some(self.run_sync(saved))
    }

    /// Run a full two-phase pass starting from `source`.
    ///
    /// Problems are reported in the returned report; they never stop the
    /// remaining jobs.
    pub fn run_sync(&mut self, source: &mut KeepassDatabase) -> SyncReport {
        let mut ctx = SyncContext::new(source);
        ctx.touch(source.path());
        tracing::info!("Starting sync from {}", source.path().display());

        let mut slaves: Vec<(PathBuf, Credential)> = Vec::new();
        for job in load_jobs(source, &self.settings.jobs_group) {
            if job.is_slave {
                tracing::debug!("Job '{}' only runs when this database is a target", job.title);
                ctx.skip(&job.title, SLAVE_ONLY);
                continue;
            }
            if job.disabled {
                tracing::warn!("Job '{}' is disabled, skipping", job.title);
                ctx.skip(&job.title, DISABLED);
                continue;
            }

            let target = match job.validate(false) {
                Ok(target) => target.to_path_buf(),
                Err(e) => {
                    ctx.warn(&job.title, e);
                    continue;
                }
            };

            // Targets that could not be synced are not revisited in phase two.
            if self.run_job(source, &job, &target, &job.credential, &mut ctx)
                && !slaves.iter().any(|(path, _)| same_location(path, &target))
            {
                slaves.push((target, job.credential.clone()));
            }
        }

        for (path, credential) in slaves {
            match self.store.open(&path, &credential) {
                Ok(mut slave) => self.run_slave_jobs(&mut slave, &mut ctx),
                Err(e) => ctx.warn(&path.display().to_string(), e),
            }
        }

        self.refresh_documents(&mut ctx);
        tracing::info!(
            "Sync finished: {} jobs, {} databases touched, {} warnings",
            ctx.report.jobs_run,
            ctx.report.touched.len(),
            ctx.report.warnings.len()
        );
        ctx.report
    }

    /// Phase two: run the jobs of a database reached in phase one.
    fn run_slave_jobs(&mut self, slave: &mut KeepassDatabase, ctx: &mut SyncContext) {
        tracing::info!("Running jobs of {}", slave.path().display());

        for job in load_jobs(slave, &self.settings.jobs_group) {
            if job.disabled {
                tracing::warn!("Job '{}' is disabled, skipping", job.title);
                ctx.skip(&job.title, DISABLED);
                continue;
            }

            let to_master = job
                .target_path
                .as_deref()
                .is_some_and(|target| ctx.is_master(target));
            let target = match job.validate(to_master) {
                Ok(target) => target.to_path_buf(),
                Err(e) => {
                    ctx.warn(&job.title, e);
                    continue;
                }
            };

            let credential = if to_master {
                ctx.master_credential.clone()
            } else {
                job.credential.clone()
            };
            self.run_job(slave, &job, &target, &credential, ctx);
        }
    }

    fn run_job(
        &mut self,
        source: &mut KeepassDatabase,
        job: &SyncJob,
        target: &Path,
        credential: &Credential,
        ctx: &mut SyncContext,
    ) -> bool {
        if same_location(target, source.path()) {
            ctx.warn(&job.title, "target is the database itself");
            return false;
        }

        ctx.touch(target);
        match self.sync_to_target(source, job, target, credential, ctx) {
            Ok(()) => {
                ctx.report.jobs_run += 1;
                true
            }
            Err(e) => {
                ctx.warn(&job.title, e);
                false
            }
        }
    }

    /// Merge `job`'s selection of `source` into `target`, propagate
    /// deletions, and save both sides.
    fn sync_to_target(
        &mut self,
        source: &mut KeepassDatabase,
        job: &SyncJob,
        target: &Path,
        credential: &Credential,
        ctx: &mut SyncContext,
    ) -> Result<()> {
        tracing::info!("Job '{}': {} -> {}", job.title, source.path().display(), target.display());
        let mut target_db = self.store.open(target, credential)?;

        let selection = selector::select(source.root(), job)?;
        for warning in &selection.warnings {
            ctx.warn(&job.title, warning);
        }

        let options = MergeOptions {
            user_and_pass_only: job.export_user_and_pass_only,
            trash_icon: self.settings.trash_icon,
            jobs_group: self.settings.jobs_group.clone(),
        };
        let mut merged = merge::apply(source.db_mut(), target_db.db_mut(), &selection, &options);
        let pruned = prune::prune(
            source.db(),
            target_db.db_mut(),
            &selection,
            &self.settings.jobs_group,
        );

        // Write-back may have changed the source.
        self.store.save(source)?;
        self.store.save(&target_db)?;

        merged.cleanup += pruned.cleanup;
        ctx.report.merged += merged;
        ctx.report.deleted += pruned.deleted;
        Ok(())
    }

    /// Reload every unlocked open document whose file was written, then
    /// focus the master again.
    fn refresh_documents(&mut self, ctx: &mut SyncContext) {
        if ctx.report.touched.len() <= 1 {
            return;
        }

        let documents = self.host.documents();
        let written: Vec<&OpenDocument> = documents
            .iter()
            .filter(|d| ctx.was_touched(&d.path))
            .collect();
        for doc in written {
            if doc.locked {
                tracing::debug!("Leaving locked document {} alone", doc.path.display());
                continue;
            }
            if let Err(e) = self.host.reload(&doc.path) {
                ctx.warn(&doc.path.display().to_string(), e);
            }
        }

        if let Some(master) = documents.iter().find(|d| ctx.is_master(&d.path)) {
            self.host.activate(&master.path);
        }
    }
}
