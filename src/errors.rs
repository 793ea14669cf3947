//! Error types for the bingo engine
//!
//! Every fallible operation returns `BingoResult<T>`. Validation failures
//! (balance, game status) surface to the synchronous caller; failures inside
//! the autonomous draw loop are turned into a cancellation by the lifecycle
//! controller.

use std::fmt;

/// Root error type for all engine operations
#[derive(Debug)]
pub enum BingoError {
    /// Configuration related errors
    Configuration(ConfigurationError),

    /// Storage collaborator errors
    Storage(StorageError),

    /// Game lifecycle and draw errors
    Game(GameError),

    /// Balance and prize ledger errors
    Ledger(LedgerError),
}

/// Configuration and validation errors
#[derive(Debug)]
pub enum ConfigurationError {
    ValidationFailed(String),
    InvalidValue { field: String, value: String, reason: String },
    LoadFailed(String),
}

/// Storage collaborator errors
#[derive(Debug)]
pub enum StorageError {
    DatabaseOpenFailed(String),
    ReadFailed(String),
    WriteFailed(String),
    CorruptedData(String),
    /// A compare-and-swap precondition did not hold at commit time
    ConcurrentUpdateConflict(String),
    /// Storage is unavailable or conflicts could not be resolved
    PersistenceFailure(String),
}

/// Game lifecycle errors
#[derive(Debug)]
pub enum GameError {
    NotFound(String),
    NotJoinable { game_id: String, status: String },
    InvalidTransition { game_id: String, from: String, to: String },
    /// All 90 numbers have been drawn. A valid terminal condition, not a fault.
    DrawPoolExhausted,
    /// A number was offered to a game that already drew it
    DuplicateNumber(u8),
    InvalidCard(String),
    SeedFailed(String),
}

/// Ledger errors
#[derive(Debug)]
pub enum LedgerError {
    InsufficientBalance { user_id: String, balance: u64, required: u64 },
    InvalidAmount(String),
    InvalidSplit(String),
    BalanceOverflow(String),
}

impl fmt::Display for BingoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BingoError::Configuration(e) => write!(f, "Configuration error: {}", e),
            BingoError::Storage(e) => write!(f, "Storage error: {}", e),
            BingoError::Game(e) => write!(f, "Game error: {}", e),
            BingoError::Ledger(e) => write!(f, "Ledger error: {}", e),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ValidationFailed(msg) => write!(f, "Validation failed: {}", msg),
            ConfigurationError::InvalidValue { field, value, reason } => {
                write!(f, "Invalid value for {}: '{}' ({})", field, value, reason)
            }
            ConfigurationError::LoadFailed(msg) => write!(f, "Failed to load configuration: {}", msg),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseOpenFailed(msg) => write!(f, "Database open failed: {}", msg),
            StorageError::ReadFailed(msg) => write!(f, "Read failed: {}", msg),
            StorageError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
            StorageError::CorruptedData(msg) => write!(f, "Corrupted data: {}", msg),
            StorageError::ConcurrentUpdateConflict(key) => write!(f, "Concurrent update conflict on {}", key),
            StorageError::PersistenceFailure(msg) => write!(f, "Persistence failure: {}", msg),
        }
    }
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::NotFound(id) => write!(f, "Game not found: {}", id),
            GameError::NotJoinable { game_id, status } => {
                write!(f, "Game {} is not accepting purchases (status: {})", game_id, status)
            }
            GameError::InvalidTransition { game_id, from, to } => {
                write!(f, "Game {} cannot move from {} to {}", game_id, from, to)
            }
            GameError::DrawPoolExhausted => write!(f, "All 90 numbers have been drawn"),
            GameError::DuplicateNumber(n) => write!(f, "Number {} was already drawn", n),
            GameError::InvalidCard(msg) => write!(f, "Invalid card: {}", msg),
            GameError::SeedFailed(msg) => write!(f, "Draw seed generation failed: {}", msg),
        }
    }
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerError::InsufficientBalance { user_id, balance, required } => {
                write!(f, "Insufficient balance for {}: have {}, need {}", user_id, balance, required)
            }
            LedgerError::InvalidAmount(msg) => write!(f, "Invalid amount: {}", msg),
            LedgerError::InvalidSplit(msg) => write!(f, "Invalid prize split: {}", msg),
            LedgerError::BalanceOverflow(user_id) => write!(f, "Balance overflow for {}", user_id),
        }
    }
}

impl std::error::Error for BingoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BingoError::Configuration(e) => Some(e),
            BingoError::Storage(e) => Some(e),
            BingoError::Game(e) => Some(e),
            BingoError::Ledger(e) => Some(e),
        }
    }
}

impl std::error::Error for ConfigurationError {}
impl std::error::Error for StorageError {}
impl std::error::Error for GameError {}
impl std::error::Error for LedgerError {}

impl From<ConfigurationError> for BingoError {
    fn from(e: ConfigurationError) -> Self {
        BingoError::Configuration(e)
    }
}

impl From<StorageError> for BingoError {
    fn from(e: StorageError) -> Self {
        BingoError::Storage(e)
    }
}

impl From<GameError> for BingoError {
    fn from(e: GameError) -> Self {
        BingoError::Game(e)
    }
}

impl From<LedgerError> for BingoError {
    fn from(e: LedgerError) -> Self {
        BingoError::Ledger(e)
    }
}

// External error conversions
impl From<rocksdb::Error> for BingoError {
    fn from(e: rocksdb::Error) -> Self {
        BingoError::Storage(StorageError::PersistenceFailure(e.to_string()))
    }
}

impl From<std::io::Error> for BingoError {
    fn from(e: std::io::Error) -> Self {
        BingoError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for BingoError {
    fn from(e: serde_json::Error) -> Self {
        BingoError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

impl BingoError {
    /// True for optimistic-concurrency conflicts that a caller may retry
    pub fn is_conflict(&self) -> bool {
        matches!(self, BingoError::Storage(StorageError::ConcurrentUpdateConflict(_)))
    }

    /// True for rejections caused by the caller's request rather than the engine
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            BingoError::Ledger(LedgerError::InsufficientBalance { .. })
                | BingoError::Ledger(LedgerError::InvalidAmount(_))
                | BingoError::Game(GameError::NotJoinable { .. })
                | BingoError::Game(GameError::NotFound(_))
        )
    }
}

// Convenience type alias for Results
pub type BingoResult<T> = Result<T, BingoError>;
