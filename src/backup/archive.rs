//! Archive file encoding.
//!
//! An archive is a JSON Lines file. The first line is the header. Every
//! section then starts with a marker line announcing how many entry lines
//! follow:
//!
//! ```text
//! {"record":"header","format":"legacy-sync-archive","version":1,"id":"…","created_at":"…","origin":"…"}
//! {"record":"section","section":"pre-data","entries":2}
//! {"record":"entry","entry":{"kind":"definition","object":"table","name":"customers","sql":"…"}}
//! …
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

use sync_core::{ArchiveEntry, Section, SyncError};

pub const ARCHIVE_FORMAT: &str = "legacy-sync-archive";
pub const ARCHIVE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveHeader {
    pub format: String,
    pub version: u32,
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Database the archive was taken from, without credentials.
    pub origin: String,
}

impl ArchiveHeader {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            format: ARCHIVE_FORMAT.to_string(),
            version: ARCHIVE_VERSION,
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            origin: origin.into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum Record {
    Header(ArchiveHeader),
    Section { section: Section, entries: usize },
    Entry { entry: ArchiveEntry },
}

/// A fully loaded archive.
#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub header: ArchiveHeader,
    pub sections: Vec<(Section, Vec<ArchiveEntry>)>,
}

impl Archive {
    pub fn section(&self, section: Section) -> Option<&[ArchiveEntry]> {
        self.sections
            .iter()
            .find(|(s, _)| *s == section)
            .map(|(_, entries)| entries.as_slice())
    }

    /// File name of the archive: `backup_{timestamp}_{id}.jsonl`.
    pub fn file_name(header: &ArchiveHeader) -> String {
        format!(
            "backup_{}_{}.jsonl",
            header.created_at.format("%Y%m%dT%H%M%S"),
            header.id
        )
    }

    /// Write the archive into `dir`. The file appears under its final name
    /// only once it is complete.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, SyncError> {
        std::fs::create_dir_all(dir).map_err(|e| io_error("create", dir, e))?;
        let path = dir.join(Self::file_name(&self.header));

        let temp = NamedTempFile::new_in(dir).map_err(|e| io_error("create", dir, e))?;
        {
            let mut writer = BufWriter::new(temp.as_file());
            write_record(&mut writer, &Record::Header(self.header.clone()))?;
            for (section, entries) in &self.sections {
                write_record(
                    &mut writer,
                    &Record::Section {
                        section: *section,
                        entries: entries.len(),
                    },
                )?;
                for entry in entries {
                    write_record(
                        &mut writer,
                        &Record::Entry {
                            entry: entry.clone(),
                        },
                    )?;
                }
            }
            writer.flush().map_err(|e| io_error("write", &path, e))?;
        }
        temp.as_file()
            .sync_all()
            .map_err(|e| io_error("sync", &path, e))?;
        temp.persist(&path)
            .map_err(|e| io_error("persist", &path, e.error))?;
        Ok(path)
    }

    /// Read and validate an archive file.
    pub fn read(path: &Path) -> Result<Self, SyncError> {
        let file = File::open(path).map_err(|e| io_error("open", path, e))?;
        let mut lines = BufReader::new(file).lines().enumerate();

        let header = match next_record(&mut lines, path)? {
            Some((_, Record::Header(header))) => header,
            _ => {
                return Err(SyncError::Archive(format!(
                    "{} does not start with an archive header",
                    path.display()
                )))
            }
        };
        if header.format != ARCHIVE_FORMAT || header.version != ARCHIVE_VERSION {
            return Err(SyncError::Archive(format!(
                "{} has unsupported format {} version {}",
                path.display(),
                header.format,
                header.version
            )));
        }

        let mut sections: Vec<(Section, Vec<ArchiveEntry>)> = Vec::new();
        while let Some((line, record)) = next_record(&mut lines, path)? {
            let (section, count) = match record {
                Record::Section { section, entries } => (section, entries),
                _ => {
                    return Err(SyncError::Archive(format!(
                        "{}:{line}: expected a section marker",
                        path.display()
                    )))
                }
            };
            if sections.iter().any(|(s, _)| *s == section) {
                return Err(SyncError::Archive(format!(
                    "{}:{line}: section {section} appears twice",
                    path.display()
                )));
            }

            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                match next_record(&mut lines, path)? {
                    Some((_, Record::Entry { entry })) => entries.push(entry),
                    Some((line, _)) => {
                        return Err(SyncError::Archive(format!(
                            "{}:{line}: section {section} ended early",
                            path.display()
                        )))
                    }
                    None => {
                        return Err(SyncError::Archive(format!(
                            "{} is truncated inside section {section}",
                            path.display()
                        )))
                    }
                }
            }
            sections.push((section, entries));
        }

        Ok(Self { header, sections })
    }
}

fn write_record<W: Write>(writer: &mut W, record: &Record) -> Result<(), SyncError> {
    serde_json::to_writer(&mut *writer, record)
        .map_err(|e| SyncError::Archive(format!("cannot encode archive record: {e}")))?;
    writer
        .write_all(b"\n")
        .map_err(|e| SyncError::Archive(format!("cannot write archive: {e}")))
}

/// Next non-blank record with its 1-based line number.
fn next_record<I>(lines: &mut I, path: &Path) -> Result<Option<(usize, Record)>, SyncError>
where
    I: Iterator<Item = (usize, std::io::Result<String>)>,
{
    for (index, line) in lines.by_ref() {
        let line = line.map_err(|e| io_error("read", path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| {
            SyncError::Archive(format!("{}:{}: {e}", path.display(), index + 1))
        })?;
        return Ok(Some((index + 1, record)));
    }
    Ok(None)
}

fn io_error(action: &str, path: &Path, error: std::io::Error) -> SyncError {
    SyncError::Archive(format!("cannot {action} {}: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sync_core::ObjectKind;
    use tempfile::TempDir;

    fn sample() -> Archive {
        Archive {
            header: ArchiveHeader::new("postgres://localhost/shop"),
            sections: vec![
                (
                    Section::PreData,
                    vec![ArchiveEntry::Definition {
                        object: ObjectKind::Table,
                        name: "customers".into(),
                        sql: "CREATE TABLE IF NOT EXISTS \"customers\" (\"id\" integer)".into(),
                    }],
                ),
                (
                    Section::Data,
                    vec![ArchiveEntry::TableData {
                        table: "customers".into(),
                        columns: vec!["id".into()],
                        rows: vec![json!({"id": 1}), json!({"id": 2})],
                    }],
                ),
                (Section::PostData, vec![]),
            ],
        }
    }

    #[test]
    fn test_written_archive_reads_back() {
        let dir = TempDir::new().unwrap();
        let archive = sample();
        let path = archive.write_to_dir(dir.path()).unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with("backup_"));

        let read = Archive::read(&path).unwrap();
        assert_eq!(read, archive);
        assert_eq!(read.section(Section::PostData).unwrap().len(), 0);

        // Only the finished archive is left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_truncated_archive_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = sample().write_to_dir(dir.path()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let truncated: Vec<&str> = content.lines().take(4).collect();
        std::fs::write(&path, truncated.join("\n")).unwrap();

        let err = Archive::read(&path).unwrap_err();
        assert!(err.to_string().contains("truncated inside section data"));
    }

    #[test]
    fn test_missing_header_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.jsonl");
        std::fs::write(&path, "{\"record\":\"section\",\"section\":\"data\",\"entries\":0}\n").unwrap();
        assert!(matches!(Archive::read(&path), Err(SyncError::Archive(_))));
    }

    #[test]
    fn test_sections_are_tagged_in_the_file() {
        let dir = TempDir::new().unwrap();
        let path = sample().write_to_dir(dir.path()).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let markers: Vec<&str> = content
            .lines()
            .filter(|l| l.starts_with("{\"record\":\"section\""))
            .collect();
        assert_eq!(markers.len(), 3);
        assert!(markers[0].contains("\"section\":\"pre-data\""));
        assert!(markers[2].contains("\"section\":\"post-data\""));
    }
}
