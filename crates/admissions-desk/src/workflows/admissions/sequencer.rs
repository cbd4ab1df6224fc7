//! Year-scoped human readable identifiers: `ADM20250001`, `ENR20250001`, `PAY20250001`.
//!
//! Derivation reads the greatest issued code for the year and increments it, falling back to
//! the number of rows created that year when no well-formed code exists. The read is not
//! atomic with the insert, so issuance always goes through [`Sequencer::issue`], which
//! regenerates on a duplicate-key rejection from the store.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::LedgerError;
use super::repository::{LedgerRepository, RepositoryError};

const SEQUENCE_DIGITS: usize = 4;
const YEAR_DIGITS: usize = 4;
pub const MAX_SEQUENCE: u16 = 9999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
    Admission,
    Enrollment,
    Payment,
}

impl IdentifierKind {
    pub const fn prefix(self) -> &'static str {
        match self {
            IdentifierKind::Admission => "ADM",
            IdentifierKind::Enrollment => "ENR",
            IdentifierKind::Payment => "PAY",
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            IdentifierKind::Admission => "admission",
            IdentifierKind::Enrollment => "enrollment",
            IdentifierKind::Payment => "payment",
        }
    }
}

/// A parsed `<PREFIX><YEAR><NNNN>` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceCode {
    pub kind: IdentifierKind,
    pub year: i32,
    pub sequence: u16,
}

impl SequenceCode {
    /// Parse `raw` only if it matches `^<PREFIX><year>\d{4}$` exactly.
    pub fn parse(kind: IdentifierKind, year: i32, raw: &str) -> Option<SequenceCode> {
        let rest = raw.strip_prefix(kind.prefix())?;
        let year_text = format!("{year:04}");
        if year_text.len() != YEAR_DIGITS {
            return None;
        }
        let digits = rest.strip_prefix(year_text.as_str())?;
        if digits.len() != SEQUENCE_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let sequence = digits.parse::<u16>().ok()?;
        Some(SequenceCode {
            kind,
            year,
            sequence,
        })
    }
}

impl fmt::Display for SequenceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:04}{:04}",
            self.kind.prefix(),
            self.year,
            self.sequence
        )
    }
}

/// Compute the code that follows `latest`, or `count + 1` when nothing parses.
pub fn next_code(
    kind: IdentifierKind,
    year: i32,
    latest: Option<&str>,
    created_in_year: u64,
) -> Result<SequenceCode, LedgerError> {
    let next = match latest.and_then(|raw| SequenceCode::parse(kind, year, raw)) {
        Some(code) => u64::from(code.sequence) + 1,
        None => created_in_year + 1,
    };

    if next > u64::from(MAX_SEQUENCE) {
        return Err(LedgerError::SequenceExhausted { kind, year });
    }

    Ok(SequenceCode {
        kind,
        year,
        sequence: next as u16,
    })
}

/// Issues identifiers and retries row insertion on identifier collisions.
#[derive(Debug, Clone, Copy)]
pub struct Sequencer {
    max_attempts: u32,
}

impl Default for Sequencer {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl Sequencer {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Derive the next code for `kind` in `year` from the store's current contents.
    pub fn peek<R>(
        &self,
        repository: &R,
        kind: IdentifierKind,
        year: i32,
    ) -> Result<SequenceCode, LedgerError>
    where
        R: LedgerRepository + ?Sized,
    {
        let latest = repository.latest_identifier(kind, year)?;
        let created = match latest
            .as_deref()
            .and_then(|raw| SequenceCode::parse(kind, year, raw))
        {
            Some(_) => 0,
            None => repository.count_created_in_year(kind, year)?,
        };
        next_code(kind, year, latest.as_deref(), created)
    }

    /// Generate a code and hand it to `insert`; regenerate whenever the insert reports a
    /// duplicate key. Any other repository error aborts immediately.
    pub fn issue<R, T, F>(
        &self,
        repository: &R,
        kind: IdentifierKind,
        year: i32,
        mut insert: F,
    ) -> Result<T, LedgerError>
    where
        R: LedgerRepository + ?Sized,
        F: FnMut(String) -> Result<T, RepositoryError>,
    {
        for attempt in 1..=self.max_attempts {
            let code = self.peek(repository, kind, year)?.to_string();
            match insert(code.clone()) {
                Ok(value) => return Ok(value),
                Err(RepositoryError::DuplicateKey { .. }) => {
                    debug!(
                        kind = kind.label(),
                        %code,
                        attempt,
                        "identifier collided with a concurrent insert, regenerating"
                    );
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(LedgerError::RetryExhausted { kind })
    }
}
