use thiserror::Error;

/// Broad category of a [`CfbError`]
///
/// Callers that only care about the class of failure (for example "the input
/// is not a compound file" versus "the path does not exist") can match on
/// this instead of the individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unsupported container layout
    Format,
    /// Cyclic, dangling, or out-of-range sector chain
    CorruptChain,
    /// Duplicate sibling name
    NameConflict,
    /// Path lookup miss
    NotFound,
    /// Sector index beyond the addressable range
    Capacity,
    /// Backing store failure
    Io,
    /// The caller asked for something the engine does not allow
    Usage,
}

#[derive(Error, Debug)]
pub enum CfbError {
    #[error("Invalid signature in header")]
    InvalidSignature,

    #[error("Unsupported format version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("Invalid sector shift {shift} for major version {major}")]
    InvalidSectorShift { major: u16, shift: u16 },

    #[error("Malformed container: {0}")]
    Format(String),

    #[error("Corrupt sector chain at sector {sector}: {reason}")]
    CorruptChain { sector: u32, reason: String },

    #[error("An entry named '{0}' already exists")]
    NameConflict(String),

    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Invalid entry name: {0}")]
    InvalidName(String),

    #[error("Entry '{path}' is not a {expected}")]
    WrongEntryKind { path: String, expected: &'static str },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Sector index {index} exceeds the addressable range")]
    CapacityExceeded { index: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CfbError {
    pub(crate) fn corrupt(sector: u32, reason: impl Into<String>) -> Self {
        CfbError::CorruptChain {
            sector,
            reason: reason.into(),
        }
    }

    pub(crate) fn format(msg: impl Into<String>) -> Self {
        CfbError::Format(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CfbError::InvalidSignature
            | CfbError::UnsupportedVersion { .. }
            | CfbError::InvalidSectorShift { .. }
            | CfbError::Format(_) => ErrorKind::Format,
            CfbError::CorruptChain { .. } => ErrorKind::CorruptChain,
            CfbError::NameConflict(_) => ErrorKind::NameConflict,
            CfbError::NotFound(_) => ErrorKind::NotFound,
            CfbError::CapacityExceeded { .. } => ErrorKind::Capacity,
            CfbError::Io(_) => ErrorKind::Io,
            CfbError::InvalidName(_)
            | CfbError::WrongEntryKind { .. }
            | CfbError::InvalidOperation(_)
            | CfbError::Config(_) => ErrorKind::Usage,
        }
    }
}

impl From<toml::de::Error> for CfbError {
    fn from(err: toml::de::Error) -> Self {
        CfbError::Config(err.to_string())
    }
}

/// Stream handles surface engine errors through `std::io` traits
impl From<CfbError> for std::io::Error {
    fn from(err: CfbError) -> Self {
        match err {
            CfbError::Io(inner) => inner,
            CfbError::NotFound(_) => std::io::Error::new(std::io::ErrorKind::NotFound, err),
            CfbError::CapacityExceeded { .. } => {
                std::io::Error::new(std::io::ErrorKind::OutOfMemory, err)
            }
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CfbError>;
