//! Struct archiving functionality
//!
//! Archives are CSV files inside the session's archive directory, one row per record. Records
//! must be flat structs (the CSV writer cannot flatten nested data), and should carry their own
//! timestamp field.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use std::fs::{File, OpenOptions};
use std::path::Path;
use csv::WriterBuilder;
pub use csv::Writer;
use serde::Serialize;
use thiserror::Error;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    writer: Writer<File>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot open the archive file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot write the archive record: {0}")]
    Csv(#[from] csv::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver from a paricular path relative to the session's
    /// archive root.
    pub fn from_path<P: AsRef<Path>>(session: &Session, path: P) -> Result<Self, ArchiveError> {
        let session_path = session.arch_root.join(path);

        if let Some(parent) = session_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(session_path)?;

        Ok(Self::from_file(file))
    }

    /// Create an archiver writing into an already opened file.
    pub fn from_file(file: File) -> Self {
        let writer = WriterBuilder::new()
            .has_headers(true)
            .from_writer(file);

        Self { writer }
    }

    /// Serialise a record into the archive.
    pub fn serialise<T: Serialize>(&mut self, record: &T) -> Result<(), ArchiveError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Serialize)]
    struct Cmd {
        time_s: f64,
        steering_rad: f64,
        speed_ms: f64
    }

    #[test]
    fn test_archive_rows() -> Result<(), ArchiveError> {
        let path = std::env::temp_dir().join(format!("archive_test_{}.csv", std::process::id()));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        let mut arch = Archiver::from_file(file);
        arch.serialise(&Cmd { time_s: 0.0, steering_rad: 0.1, speed_ms: 2.0 })?;
        arch.serialise(&Cmd { time_s: 0.1, steering_rad: -0.2, speed_ms: 2.5 })?;

        let contents = std::fs::read_to_string(&path)?;
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["time_s,steering_rad,speed_ms", "0.0,0.1,2.0", "0.1,-0.2,2.5"]);

        std::fs::remove_file(path)?;
        Ok(())
    }
}
