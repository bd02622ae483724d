//! Sectioned backup and resumable restore of the destination.
//!
//! A backup serializes the destination into three ordered sections. A
//! restore applies the requested sections in order, each inside one
//! destination transaction, and checkpoints every section it completes.
//! Interrupting a restore therefore never leaves a section half applied, and
//! [`BackupRestoreCoordinator::resume`] picks up at the first section that
//! has no checkpoint. The destination also records each committed section in
//! the same transaction, so a commit whose checkpoint was never written is
//! recognized instead of being applied twice.

pub mod archive;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use checkpoint::{Checkpoint, CheckpointManager};
use sync_core::{Section, SectionOutcome, SyncError};

pub use archive::{Archive, ArchiveHeader};

use crate::checkpoint_error;
use crate::connection::ConnectionManager;
use crate::full_sync::RunStatus;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::retry::RetryPolicy;

/// A written archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveHandle {
    pub id: Uuid,
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Entry count per section.
    pub sections: Vec<(Section, usize)>,
}

/// Sections of one archive already applied to the destination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SectionCheckpoint {
    pub archive_id: Uuid,
    pub applied: BTreeSet<Section>,
}

impl SectionCheckpoint {
    pub fn new(archive_id: Uuid) -> Self {
        Self {
            archive_id,
            applied: BTreeSet::new(),
        }
    }

    pub fn is_applied(&self, section: Section) -> bool {
        self.applied.contains(&section)
    }
}

/// Persisted record of one applied section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedSection {
    pub archive_id: Uuid,
    pub section: Section,
    pub entries: usize,
    pub applied_at: DateTime<Utc>,
}

impl AppliedSection {
    /// Checkpoint key: `{archive_id}_{section}`.
    pub fn key(archive_id: Uuid, section: Section) -> String {
        format!("{archive_id}_{section}")
    }
}

impl Checkpoint for AppliedSection {
    const KIND: &'static str = "restore";

    fn to_cli_string(&self) -> String {
        format!(
            "{} of archive {} ({} entries)",
            self.section, self.archive_id, self.entries
        )
    }
}

/// The section that stopped a restore.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionFailure {
    pub section: Section,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RestoreResult {
    pub archive_id: Uuid,
    pub status: RunStatus,
    pub applied: Vec<Section>,
    pub skipped: Vec<Section>,
    pub failed: Option<SectionFailure>,
    /// Requested sections not attempted because an earlier one failed.
    pub pending: Vec<Section>,
}

impl RestoreResult {
    /// The failure as an error, for callers that want to propagate it.
    pub fn error(&self) -> Option<SyncError> {
        self.failed.as_ref().map(|f| SyncError::SectionApplyFailed {
            archive_id: self.archive_id.to_string(),
            section: f.section.to_string(),
            message: f.message.clone(),
        })
    }
}

/// Table of contents of an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveContents {
    pub header: ArchiveHeader,
    pub sections: Vec<(Section, Vec<String>)>,
}

pub struct BackupRestoreCoordinator {
    connections: Arc<ConnectionManager>,
    checkpoints: CheckpointManager,
    archive_dir: PathBuf,
    retry: RetryPolicy,
    reporter: ProgressReporter,
}

impl BackupRestoreCoordinator {
    pub fn new(
        connections: Arc<ConnectionManager>,
        checkpoints: CheckpointManager,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            connections,
            checkpoints,
            archive_dir: archive_dir.into(),
            retry: RetryPolicy::default(),
            reporter: ProgressReporter::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = reporter;
        self
    }

    /// Serialize the destination, section by section, into a new archive.
    pub async fn backup(&self) -> Result<ArchiveHandle, SyncError> {
        let started = Instant::now();
        let sections = {
            let mut destination = self.connections.acquire_destination().await?;
            destination.export_sections(&Section::ALL).await?
        };

        let archive = Archive {
            header: ArchiveHeader::new(self.connections.destination_description()),
            sections,
        };
        let path = archive.write_to_dir(&self.archive_dir)?;

        let handle = ArchiveHandle {
            id: archive.header.id,
            path,
            created_at: archive.header.created_at,
            sections: archive
                .sections
                .iter()
                .map(|(section, entries)| (*section, entries.len()))
                .collect(),
        };
        tracing::info!(
            archive_id = %handle.id,
            path = %handle.path.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backup written"
        );
        Ok(handle)
    }

    /// List what an archive contains.
    pub fn contents(&self, path: &Path) -> Result<ArchiveContents, SyncError> {
        let archive = Archive::read(path)?;
        Ok(ArchiveContents {
            sections: archive
                .sections
                .iter()
                .map(|(section, entries)| {
                    (*section, entries.iter().map(|e| e.describe()).collect())
                })
                .collect(),
            header: archive.header,
        })
    }

    /// The applied-section checkpoints saved for `archive_id`.
    pub async fn load_checkpoint(&self, archive_id: Uuid) -> Result<SectionCheckpoint, SyncError> {
        let mut checkpoint = SectionCheckpoint::new(archive_id);
        for section in Section::ALL {
            let saved = self
                .checkpoints
                .load::<AppliedSection>(&AppliedSection::key(archive_id, section))
                .await
                .map_err(checkpoint_error)?;
            if saved.is_some() {
                checkpoint.applied.insert(section);
            }
        }
        Ok(checkpoint)
    }

    /// Restore `sections` (all when empty) skipping those already applied
    /// according to the saved checkpoints.
    pub async fn resume(
        &self,
        path: &Path,
        sections: &[Section],
    ) -> Result<RestoreResult, SyncError> {
        let archive = Archive::read(path)?;
        let checkpoint = self.load_checkpoint(archive.header.id).await?;
        if !checkpoint.applied.is_empty() {
            tracing::info!(
                "Resuming restore of {}: already applied {:?}",
                archive.header.id,
                checkpoint.applied
            );
        }
        self.restore_archive(&archive, sections, Some(&checkpoint))
            .await
    }

    /// Apply `sections` (all when empty) in pre-data, data, post-data order.
    pub async fn restore(
        &self,
        path: &Path,
        sections: &[Section],
        resume_from: Option<&SectionCheckpoint>,
    ) -> Result<RestoreResult, SyncError> {
        let archive = Archive::read(path)?;
        self.restore_archive(&archive, sections, resume_from).await
    }

    async fn restore_archive(
        &self,
        archive: &Archive,
        sections: &[Section],
        resume_from: Option<&SectionCheckpoint>,
    ) -> Result<RestoreResult, SyncError> {
        let archive_id = archive.header.id;
        if let Some(checkpoint) = resume_from {
            if checkpoint.archive_id != archive_id {
                return Err(SyncError::Archive(format!(
                    "checkpoint belongs to archive {}, not {archive_id}",
                    checkpoint.archive_id
                )));
            }
        }

        let requested: Vec<Section> = if sections.is_empty() {
            Section::ALL.to_vec()
        } else {
            sections
                .iter()
                .copied()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        };

        let mut result = RestoreResult {
            archive_id,
            status: RunStatus::Running,
            applied: Vec::new(),
            skipped: Vec::new(),
            failed: None,
            pending: Vec::new(),
        };

        for (position, &section) in requested.iter().enumerate() {
            if resume_from.is_some_and(|c| c.is_applied(section)) {
                self.reporter.emit(ProgressEvent::SectionSkipped {
                    archive_id,
                    section,
                });
                result.skipped.push(section);
                continue;
            }

            match self.apply(archive, section).await {
                Ok(SectionOutcome::Applied) => result.applied.push(section),
                Ok(SectionOutcome::AlreadyApplied) => {
                    self.reporter.emit(ProgressEvent::SectionSkipped {
                        archive_id,
                        section,
                    });
                    result.skipped.push(section);
                }
                Err(e) => {
                    self.reporter.emit(ProgressEvent::SectionFailed {
                        archive_id,
                        section,
                        error: e.to_string(),
                    });
                    result.failed = Some(SectionFailure {
                        section,
                        message: e.to_string(),
                    });
                    result.pending = requested[position + 1..].to_vec();
                    break;
                }
            }
        }

        result.status = match &result.failed {
            None => RunStatus::Completed,
            Some(_) if result.applied.is_empty() && result.skipped.is_empty() => RunStatus::Failed,
            Some(_) => RunStatus::PartiallyCompleted,
        };
        Ok(result)
    }

    /// Apply one section transactionally and record it.
    ///
    /// The destination remembers committed sections itself, so a section
    /// whose commit outlived its checkpoint is recognized here, checkpointed
    /// and reported as already applied.
    async fn apply(&self, archive: &Archive, section: Section) -> Result<SectionOutcome, SyncError> {
        let started = Instant::now();
        let archive_id = archive.header.id;
        let entries = archive.section(section).ok_or_else(|| {
            SyncError::Archive(format!("archive {archive_id} has no {section} section"))
        })?;

        let connections = &self.connections;
        let id = archive_id.to_string();
        let id = id.as_str();
        let mut attempts = 0u32;
        let outcome = self
            .retry
            .run(&format!("Apply {section} section"), || {
                attempts += 1;
                let attempt = attempts;
                async move {
                    let mut destination = connections.acquire_destination().await?;
                    match destination.apply_section(id, section, entries).await? {
                        // An earlier attempt of this call committed before failing.
                        SectionOutcome::AlreadyApplied if attempt > 1 => Ok(SectionOutcome::Applied),
                        outcome => Ok(outcome),
                    }
                }
            })
            .await?;

        let record = AppliedSection {
            archive_id,
            section,
            entries: entries.len(),
            applied_at: Utc::now(),
        };
        self.checkpoints
            .save(&AppliedSection::key(archive_id, section), &record)
            .await
            .map_err(checkpoint_error)?;

        match outcome {
            SectionOutcome::Applied => self.reporter.emit(ProgressEvent::SectionApplied {
                archive_id,
                section,
                entries: entries.len(),
                elapsed: started.elapsed(),
            }),
            SectionOutcome::AlreadyApplied => tracing::info!(
                "{section} of archive {archive_id} was already committed; checkpoint restored"
            ),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_key() {
        let id = Uuid::nil();
        assert_eq!(
            AppliedSection::key(id, Section::PostData),
            "00000000-0000-0000-0000-000000000000_post-data"
        );
    }

    #[test]
    fn test_failure_converts_to_section_apply_failed() {
        let result = RestoreResult {
            archive_id: Uuid::nil(),
            status: RunStatus::PartiallyCompleted,
            applied: vec![Section::PreData],
            skipped: vec![],
            failed: Some(SectionFailure {
                section: Section::Data,
                message: "duplicate key".into(),
            }),
            pending: vec![Section::PostData],
        };
        match result.error() {
            Some(SyncError::SectionApplyFailed { section, .. }) => assert_eq!(section, "data"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
