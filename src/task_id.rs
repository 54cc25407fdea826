use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MAX_ATTEMPTS_PER_ID: usize = 128;

/// Opaque task identifier: 16 lowercase hexadecimal characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub const HEX_LEN: usize = 16;

    /// Generate a fresh task ID using OS-backed entropy.
    pub fn generate() -> Result<Self, TaskIdGenerationError> {
        Self::generate_with(|bytes| {
            getrandom::fill(bytes).map_err(TaskIdGenerationError::random_source)
        })
    }

    /// Test hook: inject deterministic random bytes when needed.
    pub(crate) fn generate_with<F>(mut fill_random: F) -> Result<Self, TaskIdGenerationError>
    where
        F: FnMut(&mut [u8]) -> Result<(), TaskIdGenerationError>,
    {
        let mut bytes = [0_u8; std::mem::size_of::<u64>()];
        fill_random(&mut bytes)?;
        Ok(Self::from(u64::from_be_bytes(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = TaskIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(TaskIdParseError::Empty);
        }
        if trimmed.len() != Self::HEX_LEN {
            return Err(TaskIdParseError::InvalidLength(trimmed.len()));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TaskIdParseError::InvalidCharacter);
        }
        Ok(Self(trimmed.to_ascii_lowercase()))
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(format!("{value:016x}"))
    }
}

impl Serialize for TaskId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Hands out task IDs that are unique for the lifetime of the allocator.
///
/// One allocator lives for a whole scan, so no ID is ever issued twice in a run.
pub struct TaskIdAllocator {
    issued: HashSet<TaskId>,
    source: Box<dyn FnMut() -> Result<TaskId, TaskIdGenerationError>>,
}

impl Default for TaskIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskIdAllocator {
    pub fn new() -> Self {
        Self::with_source(TaskId::generate)
    }

    pub fn with_source<F>(source: F) -> Self
    where
        F: FnMut() -> Result<TaskId, TaskIdGenerationError> + 'static,
    {
        Self {
            issued: HashSet::new(),
            source: Box::new(source),
        }
    }

    /// Sequential IDs; deterministic, for tests and reproducible dry runs.
    pub fn sequential() -> Self {
        let mut next = 0_u64;
        Self::with_source(move || {
            next += 1;
            Ok(TaskId::from(next))
        })
    }

    pub fn allocate(&mut self) -> Result<TaskId, TaskIdGenerationError> {
        for _ in 0..MAX_ATTEMPTS_PER_ID {
            let candidate = (self.source)()?;
            if self.issued.insert(candidate.clone()) {
                return Ok(candidate);
            }
        }
        Err(TaskIdGenerationError::Exhausted(MAX_ATTEMPTS_PER_ID))
    }

    pub fn issued(&self) -> usize {
        self.issued.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskIdParseError {
    #[error("task id cannot be empty")]
    Empty,
    #[error("task id must be exactly 16 hex characters (got {0})")]
    InvalidLength(usize),
    #[error("task id must contain only hexadecimal characters")]
    InvalidCharacter,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskIdGenerationError {
    #[error("failed to read random bytes: {0}")]
    RandomSource(String),
    #[error("no unused task id after {0} attempts")]
    Exhausted(usize),
}

impl TaskIdGenerationError {
    fn random_source(err: getrandom::Error) -> Self {
        Self::RandomSource(err.to_string())
    }
}
