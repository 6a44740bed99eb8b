use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("catalog construction error: {0}")]
    Construction(#[from] ConstructionError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Malformed catalog entries. Raised before any candidate is probed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConstructionError {
    #[error("test case #{index} has an empty function name")]
    EmptyFunctionName { index: usize },
    #[error("test case `{func}` declares arity {arity}, maximum supported is {max}")]
    ArityExceeded {
        func: String,
        arity: usize,
        max: usize,
    },
    #[error("empty leaf sequence: {0}")]
    EmptySequence(String),
    #[error("test case `{func}` requires struct `{type_name}` unknown to the layout resolver")]
    UnresolvedType { func: String, type_name: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("sandbox unavailable: {0}")]
    Unavailable(String),
    #[error("unknown snapshot id {0}")]
    UnknownSnapshot(usize),
    #[error("no snapshot captured; call begin_campaign first")]
    NoSnapshot,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    MissingConfig(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFaultKind {
    #[error("unmapped")]
    Unmapped,
    #[error("read-protected")]
    ReadProtected,
    #[error("write-protected")]
    WriteProtected,
    #[error("overlapping mapping")]
    Overlap,
}

/// A sandbox memory access that could not be honored.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{kind} access at {addr:#x} (+{len} bytes)")]
pub struct MemoryFault {
    pub addr: u64,
    pub len: usize,
    pub kind: MemoryFaultKind,
}

impl MemoryFault {
    pub fn new(addr: u64, len: usize, kind: MemoryFaultKind) -> Self {
        Self { addr, len, kind }
    }
}

/// Failures inside a single setup or verify step. Never escapes the launcher:
/// the sub-test fails and the error is logged.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubtestError {
    #[error("sandbox memory: {0}")]
    Memory(#[from] MemoryFault),
    #[error("argument {index} is outside the declared arity {arity}")]
    ArgumentOutOfRange { index: usize, arity: usize },
    #[error("value {value:#x} does not fit in {width} bits")]
    ValueTooWide { value: u64, width: u32 },
    #[error("no slot named `{0}` in the case scratch")]
    MissingSlot(&'static str),
    #[error("layout resolver not configured")]
    LayoutUnavailable,
    #[error("layout lookup failed for `{0}`")]
    LayoutLookup(String),
    #[error("allocation arena at {base:#x} cannot fit {requested} more bytes")]
    ArenaExhausted { base: u64, requested: u64 },
}
