use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    BadAddress(String),
    NotInRange(String),
    InvalidRule(FilterError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::BadAddress(e) => write!(f, "Address formatting error: {}", e),
            ConfigError::NotInRange(e) => write!(f, "Value out of range: {}", e),
            ConfigError::InvalidRule(e) => write!(f, "Filter rule error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::TomlError(err.to_string())
    }
}

impl From<FilterError> for ConfigError {
    fn from(err: FilterError) -> Self {
        ConfigError::InvalidRule(err)
    }
}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed,
    WriteFailed,
    ReadFailed,
    UploadFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed => write!(f, "Storage connection failed"),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
            StorageError::UploadFailed(e) => write!(f, "Storage upload failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

/// Faults raised by the screen emulator while replaying a buffered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScreenError {
    MalformedSequence(char),
    TooManyRows(usize),
    CursorOutOfRange(usize),
    TooManyCells(usize),
}

impl fmt::Display for ScreenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenError::MalformedSequence(c) => {
                write!(f, "Malformed escape sequence ending in {:?}", c)
            }
            ScreenError::TooManyRows(n) => write!(f, "Screen grew past {} rows", n),
            ScreenError::CursorOutOfRange(n) => write!(f, "Cursor moved past column {}", n),
            ScreenError::TooManyCells(n) => write!(f, "Screen grew past {} cells", n),
        }
    }
}

impl std::error::Error for ScreenError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    InvalidPattern { pattern: String, reason: String },
    EmptyRule(u32),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::InvalidPattern { pattern, reason } => {
                write!(f, "Invalid pattern {:?}: {}", pattern, reason)
            }
            FilterError::EmptyRule(priority) => {
                write!(f, "Rule with priority {} has no patterns", priority)
            }
        }
    }
}

impl std::error::Error for FilterError {}

#[derive(Debug)]
pub enum ReplayError {
    IoError(std::io::Error),
    EncodeError(String),
    StorageError(StorageError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::IoError(e) => write!(f, "Replay IO error: {}", e),
            ReplayError::EncodeError(e) => write!(f, "Replay encoding error: {}", e),
            ReplayError::StorageError(e) => write!(f, "Replay storage error: {}", e),
        }
    }
}

impl std::error::Error for ReplayError {}

impl From<std::io::Error> for ReplayError {
    fn from(err: std::io::Error) -> Self {
        ReplayError::IoError(err)
    }
}

impl From<serde_json::Error> for ReplayError {
    fn from(err: serde_json::Error) -> Self {
        ReplayError::EncodeError(err.to_string())
    }
}

#[derive(Debug)]
pub enum BridgeError {
    Transport(std::io::Error),
    Control(String),
    AlreadyRegistered,
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Transport(e) => write!(f, "Transport error: {}", e),
            BridgeError::Control(e) => write!(f, "Server control error: {}", e),
            BridgeError::AlreadyRegistered => write!(f, "Session already registered"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::Transport(err)
    }
}

#[derive(Debug)]
pub enum NetworkError {
    BindError(std::io::Error),
    ConnectionFailed(std::io::Error),
    SockError(std::io::Error),
}

impl fmt::Display for NetworkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkError::BindError(e) => write!(f, "Network bind error: {}", e),
            NetworkError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            NetworkError::SockError(e) => write!(f, "Socket error: {}", e),
        }
    }
}

impl std::error::Error for NetworkError {}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    NetworkError(NetworkError),
    StorageError(StorageError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::NetworkError(e) => write!(f, "Network error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<NetworkError> for ControllerError {
    fn from(err: NetworkError) -> Self {
        ControllerError::NetworkError(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}
