/// Return address pushed before every probe run. Reaching it means the
/// candidate returned normally.
pub const SENTINEL_RETURN: u64 = 0x1337_babe;

/// Default base of the fixture allocation cursor.
pub const DEFAULT_ALLOC_BASE: u64 = 0x2000_0000;

/// Fixture lengths are rounded up to this quantum with random filler.
pub const ALLOC_QUANTUM: usize = 16;

/// Address space the allocation cursor may use above its base.
pub const ALLOC_ARENA_SIZE: u64 = 0x1000_0000;

/// Unmapped bytes left between two consecutive fixtures.
pub const FIXTURE_GAP: u64 = 1;

/// Highest argument count a test case may declare.
pub const MAX_ARGUMENTS: usize = 8;

pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// Scripted sandbox layout.
pub const STACK_BASE: u64 = 0x7fff_0000;
pub const STACK_SIZE: usize = 0x1_0000;
pub const DATA_BASE: u64 = 0x6000_0000;
pub const DATA_SIZE: usize = 0x1000;

/// Where the self-check binary installs the reference routines.
pub const REFERENCE_CODE_BASE: u64 = 0x0040_0000;
pub const REFERENCE_CODE_STRIDE: u64 = 0x100;

/// Code addresses reserved for routines installed into the scripted sandbox.
pub const CODE_REGION_SIZE: u64 = 0x20_0000;
