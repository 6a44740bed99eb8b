//! Reference implementations of the C string routines, written against the
//! scripted sandbox. They give the catalog real code to identify in the
//! self-check binary and the integration tests.
//!
//! Semantics follow the C library, including the quirks the catalog probes:
//! strncpy zero-pads, strtok keeps its cursor in a static, memcpy copies
//! forward without overlap handling.

use crate::error::MemoryFault;
use crate::sandbox::scripted::{CallFrame, ScriptedEngine, Trap};
use std::collections::BTreeMap;

pub type RoutineFn = fn(&mut CallFrame<'_>) -> Result<u64, Trap>;

/// Static slot holding strtok's save pointer.
const STRTOK_SAVE_SLOT: usize = 0;

pub const REFERENCE_ROUTINES: &[(&str, RoutineFn)] = &[
    ("strlen", strlen),
    ("strnlen", strnlen),
    ("strcpy", strcpy),
    ("strncpy", strncpy),
    ("strcat", strcat),
    ("strncat", strncat),
    ("strcmp", strcmp),
    ("strncmp", strncmp),
    ("stricmp", stricmp),
    ("strnicmp", strnicmp),
    ("strchr", strchr),
    ("strrchr", strrchr),
    ("strspn", strspn),
    ("strpbrk", strpbrk),
    ("strtok", strtok),
    ("strsep", strsep),
    ("strrev", strrev),
    ("memset", memset),
    ("memmove", memmove),
    ("memcpy", memcpy),
    ("memcmp", memcmp),
    ("bzero", bzero),
];

/// Install every reference routine, `stride` bytes apart from `base`.
/// Returns name -> entry address.
pub fn install_reference_routines(
    engine: &mut ScriptedEngine,
    base: u64,
    stride: u64,
) -> Result<BTreeMap<&'static str, u64>, MemoryFault> {
    let mut addresses = BTreeMap::new();
    for (i, (name, routine)) in REFERENCE_ROUTINES.iter().enumerate() {
        let addr = base + stride * i as u64;
        engine.install(addr, *routine)?;
        addresses.insert(*name, addr);
    }
    Ok(addresses)
}

fn signed(value: i64) -> u64 {
    value as u64
}

fn str_len(frame: &mut CallFrame<'_>, s: u64, limit: Option<u64>) -> Result<u64, Trap> {
    let mut n = 0u64;
    while limit.map_or(true, |max| n < max) && frame.load_u8(s + n)? != 0 {
        n += 1;
    }
    Ok(n)
}

fn in_set(frame: &mut CallFrame<'_>, set: u64, ch: u8) -> Result<bool, Trap> {
    let mut i = 0u64;
    loop {
        let c = frame.load_u8(set + i)?;
        if c == 0 {
            return Ok(false);
        }
        if c == ch {
            return Ok(true);
        }
        i += 1;
    }
}

fn compare(
    frame: &mut CallFrame<'_>,
    a: u64,
    b: u64,
    limit: Option<u64>,
    fold_case: bool,
    stop_at_nul: bool,
) -> Result<u64, Trap> {
    let mut i = 0u64;
    while limit.map_or(true, |max| i < max) {
        let mut ca = frame.load_u8(a + i)?;
        let mut cb = frame.load_u8(b + i)?;
        if fold_case {
            ca = ca.to_ascii_lowercase();
            cb = cb.to_ascii_lowercase();
        }
        if ca != cb {
            return Ok(signed(i64::from(ca) - i64::from(cb)));
        }
        if stop_at_nul && ca == 0 {
            break;
        }
        i += 1;
    }
    Ok(0)
}

pub fn strlen(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    str_len(frame, s, None)
}

pub fn strnlen(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let max = frame.arg(1)?;
    str_len(frame, s, Some(max))
}

pub fn strcpy(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let src = frame.arg(1)?;
    let mut i = 0u64;
    loop {
        let c = frame.load_u8(src + i)?;
        frame.store_u8(dst + i, c)?;
        if c == 0 {
            return Ok(dst);
        }
        i += 1;
    }
}

pub fn strncpy(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let src = frame.arg(1)?;
    let n = frame.arg(2)?;
    let mut i = 0u64;
    while i < n {
        let c = frame.load_u8(src + i)?;
        if c == 0 {
            break;
        }
        frame.store_u8(dst + i, c)?;
        i += 1;
    }
    while i < n {
        frame.store_u8(dst + i, 0)?;
        i += 1;
    }
    Ok(dst)
}

pub fn strcat(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let src = frame.arg(1)?;
    let mut end = dst + str_len(frame, dst, None)?;
    let mut i = 0u64;
    loop {
        let c = frame.load_u8(src + i)?;
        frame.store_u8(end, c)?;
        if c == 0 {
            return Ok(dst);
        }
        end += 1;
        i += 1;
    }
}

pub fn strncat(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let src = frame.arg(1)?;
    let n = frame.arg(2)?;
    let end = dst + str_len(frame, dst, None)?;
    let mut i = 0u64;
    while i < n {
        let c = frame.load_u8(src + i)?;
        if c == 0 {
            break;
        }
        frame.store_u8(end + i, c)?;
        i += 1;
    }
    frame.store_u8(end + i, 0)?;
    Ok(dst)
}

pub fn strcmp(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let a = frame.arg(0)?;
    let b = frame.arg(1)?;
    compare(frame, a, b, None, false, true)
}

pub fn strncmp(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let a = frame.arg(0)?;
    let b = frame.arg(1)?;
    let n = frame.arg(2)?;
    compare(frame, a, b, Some(n), false, true)
}

pub fn stricmp(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let a = frame.arg(0)?;
    let b = frame.arg(1)?;
    compare(frame, a, b, None, true, true)
}

pub fn strnicmp(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let a = frame.arg(0)?;
    let b = frame.arg(1)?;
    let n = frame.arg(2)?;
    compare(frame, a, b, Some(n), true, true)
}

pub fn memcmp(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let a = frame.arg(0)?;
    let b = frame.arg(1)?;
    let n = frame.arg(2)?;
    compare(frame, a, b, Some(n), false, false)
}

pub fn strchr(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let ch = frame.arg(1)? as u8;
    let mut i = 0u64;
    loop {
        let c = frame.load_u8(s + i)?;
        if c == ch {
            return Ok(s + i);
        }
        if c == 0 {
            return Ok(0);
        }
        i += 1;
    }
}

pub fn strrchr(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let ch = frame.arg(1)? as u8;
    let mut found = 0u64;
    let mut i = 0u64;
    loop {
        let c = frame.load_u8(s + i)?;
        if c == ch {
            found = s + i;
        }
        if c == 0 {
            return Ok(found);
        }
        i += 1;
    }
}

pub fn strspn(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let accept = frame.arg(1)?;
    let mut n = 0u64;
    loop {
        let c = frame.load_u8(s + n)?;
        if c == 0 || !in_set(frame, accept, c)? {
            return Ok(n);
        }
        n += 1;
    }
}

pub fn strpbrk(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let accept = frame.arg(1)?;
    let mut i = 0u64;
    loop {
        let c = frame.load_u8(s + i)?;
        if c == 0 {
            return Ok(0);
        }
        if in_set(frame, accept, c)? {
            return Ok(s + i);
        }
        i += 1;
    }
}

pub fn strtok(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let delim = frame.arg(1)?;
    let save = frame.static_slot(STRTOK_SAVE_SLOT);
    let mut p = if s == 0 { frame.load_ptr(save)? } else { s };
    if p == 0 {
        return Ok(0);
    }
    loop {
        let c = frame.load_u8(p)?;
        if c == 0 {
            frame.store_ptr(save, p)?;
            return Ok(0);
        }
        if !in_set(frame, delim, c)? {
            break;
        }
        p += 1;
    }
    let token = p;
    loop {
        let c = frame.load_u8(p)?;
        if c == 0 {
            frame.store_ptr(save, p)?;
            return Ok(token);
        }
        if in_set(frame, delim, c)? {
            frame.store_u8(p, 0)?;
            frame.store_ptr(save, p + 1)?;
            return Ok(token);
        }
        p += 1;
    }
}

pub fn strsep(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let stringp = frame.arg(0)?;
    let delim = frame.arg(1)?;
    let s = frame.load_ptr(stringp)?;
    if s == 0 {
        return Ok(0);
    }
    let mut p = s;
    loop {
        let c = frame.load_u8(p)?;
        if c == 0 {
            frame.store_ptr(stringp, 0)?;
            return Ok(s);
        }
        if in_set(frame, delim, c)? {
            frame.store_u8(p, 0)?;
            frame.store_ptr(stringp, p + 1)?;
            return Ok(s);
        }
        p += 1;
    }
}

pub fn strrev(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let s = frame.arg(0)?;
    let len = str_len(frame, s, None)?;
    if len > 1 {
        let (mut lo, mut hi) = (s, s + len - 1);
        while lo < hi {
            let a = frame.load_u8(lo)?;
            let b = frame.load_u8(hi)?;
            frame.store_u8(lo, b)?;
            frame.store_u8(hi, a)?;
            lo += 1;
            hi -= 1;
        }
    }
    Ok(s)
}

pub fn memset(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let value = frame.arg(1)? as u8;
    let n = frame.arg(2)?;
    for i in 0..n {
        frame.store_u8(dst + i, value)?;
    }
    Ok(dst)
}

pub fn memmove(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let src = frame.arg(1)?;
    let n = frame.arg(2)?;
    if dst > src && dst < src + n {
        for i in (0..n).rev() {
            let c = frame.load_u8(src + i)?;
            frame.store_u8(dst + i, c)?;
        }
    } else {
        for i in 0..n {
            let c = frame.load_u8(src + i)?;
            frame.store_u8(dst + i, c)?;
        }
    }
    Ok(dst)
}

pub fn memcpy(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let src = frame.arg(1)?;
    let n = frame.arg(2)?;
    for i in 0..n {
        let c = frame.load_u8(src + i)?;
        frame.store_u8(dst + i, c)?;
    }
    Ok(dst)
}

pub fn bzero(frame: &mut CallFrame<'_>) -> Result<u64, Trap> {
    let dst = frame.arg(0)?;
    let n = frame.arg(1)?;
    for i in 0..n {
        frame.store_u8(dst + i, 0)?;
    }
    Ok(0)
}
