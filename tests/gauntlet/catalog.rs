use fnprobe::sandbox::abi::ConventionKind;

/// Routines the string catalog must tell apart when both are probed.
const CONFUSABLE: &[(&str, &str)] = &[
    ("memmove", "memcpy"),
    ("memcpy", "memmove"),
    ("strcmp", "stricmp"),
    ("stricmp", "strcmp"),
    ("strchr", "strrchr"),
    ("strrchr", "strchr"),
];

pub const ROUTINES: &[&str] = &[
    "strlen", "strnlen", "strcpy", "strncpy", "strcat", "strncat", "strcmp", "strncmp",
    "stricmp", "strnicmp", "strchr", "strrchr", "strspn", "strpbrk", "strtok", "strsep",
    "strrev", "memset", "memmove", "memcpy", "memcmp", "bzero",
];

pub const CONVENTIONS: &[ConventionKind] = &[
    ConventionKind::SystemVAmd64,
    ConventionKind::CdeclX86,
    ConventionKind::Aapcs64,
];

#[derive(Clone, Debug)]
pub struct GauntletCase {
    pub id: u16,
    pub routine: &'static str,
    pub convention: ConventionKind,
    pub must_not_match: Vec<&'static str>,
}

/// Every reference routine under every supported calling convention.
pub fn reference_cases() -> Vec<GauntletCase> {
    let mut cases = Vec::with_capacity(ROUTINES.len() * CONVENTIONS.len());
    for convention in CONVENTIONS {
        for routine in ROUTINES {
            let must_not_match = CONFUSABLE
                .iter()
                .filter(|(probed, _)| probed == routine)
                .map(|(_, other)| *other)
                .collect();
            cases.push(GauntletCase {
                id: cases.len() as u16 + 1,
                routine,
                convention: *convention,
                must_not_match,
            });
        }
    }
    cases
}
