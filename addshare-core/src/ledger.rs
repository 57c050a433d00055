//! The append-only round ledger.
//!
//! Every node writes one CSV row per finished round. At startup the ledger
//! is read back in full: the highest recorded round tells the node where to
//! resume after a crash. A missing file is an empty ledger; a file that
//! exists but cannot be parsed is a fatal error, because resuming from a
//! ledger of unknown integrity could silently fork the session.

use std::{
    fs::OpenOptions,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// A ledger row. Implementors fix the column set for one node role.
pub trait RoundRecord: Serialize + DeserializeOwned {
    /// The round this row belongs to.
    fn round(&self) -> u64;
}

/// A participant's row: `round,accuracy,training_time,secret_sharing_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub round: u64,
    pub accuracy: f64,
    /// Local training wall time, in seconds.
    pub training_time: f64,
    /// Cumulative share exchange wall time, in seconds.
    pub secret_sharing_time: f64,
}

impl RoundRecord for ParticipantRecord {
    fn round(&self) -> u64 {
        self.round
    }
}

/// The coordinator's row: `round,accuracy,elapsed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorRecord {
    pub round: u64,
    pub accuracy: f64,
    /// Full round wall time, in seconds.
    pub elapsed: f64,
}

impl RoundRecord for CoordinatorRecord {
    fn round(&self) -> u64 {
        self.round
    }
}

/// Errors returned by the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// the ledger file could not be accessed
    #[error("the ledger file could not be accessed: {0}")]
    Io(#[from] std::io::Error),
    /// the ledger file is malformed
    #[error("the ledger file is malformed: {0}")]
    Malformed(#[from] csv::Error),
}

/// An append-only CSV ledger of per-round records.
#[derive(Debug)]
pub struct RoundLedger<R> {
    path: PathBuf,
    records: Vec<R>,
}

impl<R: RoundRecord> RoundLedger<R> {
    /// Opens the ledger at `path`, reading all previously written rows.
    ///
    /// A missing file yields an empty ledger. A present but unparsable file
    /// is an error: the caller must not resume from it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let records = match OpenOptions::new().read(true).open(&path) {
            Ok(file) => csv::Reader::from_reader(file)
                .deserialize()
                .collect::<Result<Vec<R>, _>>()?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(RoundLedger { path, records })
    }

    /// Gets the highest recorded round, if any.
    pub fn last_round(&self) -> Option<u64> {
        self.records.iter().map(RoundRecord::round).max()
    }

    /// Gets all records read or written so far.
    pub fn records(&self) -> &[R] {
        &self.records
    }

    /// Appends one record to the file and to the in-memory view.
    ///
    /// The header row is written only when the file starts out empty.
    pub fn append(&mut self, record: R) -> Result<(), LedgerError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.path)?;
        let write_header = file.metadata()?.len() == 0;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(write_header)
            .from_writer(file);
        writer.serialize(&record)?;
        writer.flush().map_err(LedgerError::Io)?;
        self.records.push(record);
        Ok(())
    }
}
