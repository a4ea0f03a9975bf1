use thiserror::Error;

/// Faults while acquiring the reference database. These never escape
/// `DatabaseManager::acquire`; they end up as `AcquireOutcome::Failed`.
#[derive(Error, Debug)]
pub enum DbError {
  #[error("transport failure: {0}")]
  Transport(String),

  #[error("unexpected HTTP status {0}")]
  HttpStatus(u16),

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("artifact too small ({size} bytes, minimum {min})")]
  Undersized { size: u64, min: u64 },
}

/// Faults at the lookup boundary of the ASN database.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupFault {
  /// The address is not covered by the database. Not an error for routing purposes.
  #[error("address not found in database")]
  NotFound,

  #[error("not a valid IPv4 address: {0}")]
  InvalidAddress(String),

  #[error("corrupt database record: {0}")]
  Corrupt(String),

  #[error("cannot open database: {0}")]
  Open(String),
}
