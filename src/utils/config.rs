use crate::error::ConfigError;
use crate::sandbox::abi::ConventionKind;
use crate::utils::constants::{
    ALLOC_ARENA_SIZE, CODE_REGION_SIZE, DATA_BASE, DATA_SIZE, DEFAULT_ALLOC_BASE,
    DEFAULT_TIMEOUT_MS, REFERENCE_CODE_BASE, STACK_BASE, STACK_SIZE,
};
use crate::utils::hex::to_u64;
use std::env;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub timeout: Duration,
    pub early_quit_all: bool,
    pub seed: u64,
    pub alloc_base: u64,
    pub convention: ConventionKind,
    pub workers: usize,
    pub layout_file: Option<PathBuf>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            early_quit_all: true,
            seed: time_seed(),
            alloc_base: DEFAULT_ALLOC_BASE,
            convention: ConventionKind::SystemVAmd64,
            workers: 1,
            layout_file: None,
        }
    }
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x5eed)
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(name: &str, raw: &str, expected: &str) -> ConfigError {
    ConfigError::InvalidConfig(format!("{name} must be {expected}, got `{raw}`"))
}

/// Regions the scripted sandbox maps before the first fixture.
const RESERVED_REGIONS: [(&str, u64, u64); 3] = [
    ("code", REFERENCE_CODE_BASE, CODE_REGION_SIZE),
    ("data", DATA_BASE, DATA_SIZE as u64),
    ("stack", STACK_BASE, STACK_SIZE as u64),
];

/// The allocation arena must fit in the address space and stay clear of the
/// reserved regions.
fn check_alloc_base(raw: &str, base: u64) -> Result<(), ConfigError> {
    if base == 0 {
        return Err(invalid("PROBE_ALLOC_BASE", raw, "non-zero"));
    }
    let end = base.checked_add(ALLOC_ARENA_SIZE).ok_or_else(|| {
        invalid(
            "PROBE_ALLOC_BASE",
            raw,
            &format!("at most {:#x}", u64::MAX - ALLOC_ARENA_SIZE),
        )
    })?;
    if let Some((name, start, _)) = RESERVED_REGIONS
        .iter()
        .find(|(_, start, len)| base < start + len && *start < end)
    {
        return Err(invalid(
            "PROBE_ALLOC_BASE",
            raw,
            &format!("clear of the {name} region at {start:#x}"),
        ));
    }
    Ok(())
}

impl ProbeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Same as `from_env` over an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(raw) = get("PROBE_TIMEOUT_MS") {
            let ms = raw
                .parse::<u64>()
                .ok()
                .filter(|ms| *ms > 0)
                .ok_or_else(|| invalid("PROBE_TIMEOUT_MS", &raw, "a positive integer"))?;
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = get("PROBE_EARLY_QUIT_ALL") {
            config.early_quit_all =
                parse_bool(&raw).ok_or_else(|| invalid("PROBE_EARLY_QUIT_ALL", &raw, "a boolean"))?;
        }
        if let Some(raw) = get("PROBE_SEED") {
            config.seed =
                to_u64(&raw).ok_or_else(|| invalid("PROBE_SEED", &raw, "a decimal or 0x-hex u64"))?;
        }
        if let Some(raw) = get("PROBE_ALLOC_BASE") {
            let base = to_u64(&raw)
                .ok_or_else(|| invalid("PROBE_ALLOC_BASE", &raw, "a decimal or 0x-hex u64"))?;
            check_alloc_base(&raw, base)?;
            config.alloc_base = base;
        }
        if let Some(raw) = get("PROBE_ABI") {
            config.convention = ConventionKind::parse(&raw)
                .ok_or_else(|| invalid("PROBE_ABI", &raw, "one of sysv, cdecl, aapcs64"))?;
        }
        if let Some(raw) = get("PROBE_WORKERS") {
            config.workers = raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| invalid("PROBE_WORKERS", &raw, "a positive integer"))?;
        }
        if let Some(raw) = get("PROBE_LAYOUT_FILE") {
            let path = PathBuf::from(&raw);
            if !path.is_file() {
                return Err(ConfigError::MissingConfig(format!(
                    "PROBE_LAYOUT_FILE points to `{raw}` which is not a readable file"
                )));
            }
            config.layout_file = Some(path);
        }

        Ok(config)
    }
}
