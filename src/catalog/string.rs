//! String and memory routines: strlen, strnicmp, strcpy, strncpy, strcat,
//! strncat, strcmp, strchr, strrchr, strnlen, strspn, strpbrk, strtok, strsep,
//! memset, memmove, memcpy, stricmp, strrev, memcmp, bzero, strncmp.
//!
//! Inputs are chosen so that close relatives disagree somewhere: strcmp vs
//! stricmp on case, strncmp vs strcmp on the bound, memmove vs memcpy on
//! overlapping forward copies.

use crate::error::{ConstructionError, SubtestError};
use crate::probe::case::{SetupContext, TestCase, VerifyContext};
use crate::probe::synth::filler_len;
use crate::probe::tree::TestTree;
use std::cmp::Ordering;

const HELLO_WORLD: &str = "Hello, world !";
const FORMAT_LIKE: &str = "Hello, w%srld !";
const SHORT: &str = "Hello,";
const SPACED: &str = "Hello world !";
const LOWER: &str = "hello,";
const TOKENS: &str = "Hello, [word]!";
const DELIMS: &str = "[]";
/// Offset of "word" in `TOKENS`.
const FIRST_TOKEN: u64 = 8;
const TOKENIZED: &[u8] = b"Hello, \0word\0!";
const MOVE_TEXT: &str = "NED\0A1E";
const MOVE_OFFSET: u64 = 3;
const MOVE_COUNT: u64 = 6;

pub fn string_catalog() -> Result<Vec<TestCase>, ConstructionError> {
    Ok(vec![
        strlen(),
        strnicmp(),
        strcpy(),
        strncpy(),
        strcat(),
        strncat(),
        strcmp()?,
        strchr(),
        strrchr(),
        strnlen(),
        strspn()?,
        strpbrk()?,
        strtok(),
        strsep(),
        memset(),
        memmove()?,
        memcpy(),
        stricmp()?,
        strrev(),
        memcmp()?,
        bzero(),
        strncmp()?,
    ])
}

fn until_nul(text: &str) -> &str {
    text.split('\0').next().unwrap_or("")
}

fn ordering_sign(ord: Ordering) -> i64 {
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

/// Stores `text` as a read-only string, remembers it under `slot`, binds it to `index`.
fn bind_string(
    ctx: &mut SetupContext<'_>,
    slot: &'static str,
    index: usize,
    text: &str,
) -> Result<u64, SubtestError> {
    let addr = ctx.string(text)?;
    ctx.set_slot(slot, addr);
    ctx.bind(index, addr)?;
    Ok(addr)
}

fn strlen_leaf(label: &'static str, text: String) -> TestTree {
    let expected = text.clone();
    TestTree::leaf(
        label,
        move |ctx| bind_string(ctx, "s", 0, &text).map(|_| ()),
        move |ctx| {
            let s = ctx.slot("s")?;
            Ok(ctx.result() == expected.len() as u64 && ctx.compare_string(s, &expected))
        },
    )
}

fn strlen() -> TestCase {
    let tree = strlen_leaf("short", FORMAT_LIKE.to_string())
        .and(strlen_leaf("long", FORMAT_LIKE.repeat(4)));
    TestCase::new("strlen", tree).arity(1)
}

fn strnlen_leaf(label: &'static str, bound: u64) -> TestTree {
    TestTree::leaf(
        label,
        move |ctx| {
            bind_string(ctx, "s", 0, FORMAT_LIKE)?;
            ctx.bind(1, bound)
        },
        move |ctx| {
            let s = ctx.slot("s")?;
            let expected = bound.min(FORMAT_LIKE.len() as u64);
            Ok(ctx.result() == expected && ctx.compare_string(s, FORMAT_LIKE))
        },
    )
}

fn strnlen() -> TestCase {
    TestCase::new("strnlen", strnlen_leaf("bounded", 4).and(strnlen_leaf("unbounded", 20))).arity(2)
}

/// Three-way comparison flavors.
#[derive(Clone, Copy)]
struct CmpKind {
    fold_case: bool,
    stop_at_nul: bool,
}

const STRCMP: CmpKind = CmpKind {
    fold_case: false,
    stop_at_nul: true,
};
const STRICMP: CmpKind = CmpKind {
    fold_case: true,
    stop_at_nul: true,
};
const MEMCMP: CmpKind = CmpKind {
    fold_case: false,
    stop_at_nul: false,
};

fn expected_order(kind: CmpKind, a: &str, b: &str, bound: Option<usize>) -> Ordering {
    let prep = |s: &str| -> Vec<u8> {
        let s = if kind.stop_at_nul { until_nul(s) } else { s };
        let mut bytes = s.as_bytes().to_vec();
        if kind.fold_case {
            bytes.make_ascii_lowercase();
        }
        if let Some(n) = bound {
            bytes.truncate(n);
        }
        bytes
    };
    prep(a).cmp(&prep(b))
}

fn three_way_leaf(
    label: &'static str,
    kind: CmpKind,
    a: &'static str,
    b: &'static str,
    bound: Option<usize>,
) -> TestTree {
    let sign = ordering_sign(expected_order(kind, a, b, bound));
    let (check_a, check_b) = if kind.stop_at_nul {
        (until_nul(a), until_nul(b))
    } else {
        (a, b)
    };
    TestTree::leaf(
        label,
        move |ctx| {
            bind_string(ctx, "a", 0, a)?;
            bind_string(ctx, "b", 1, b)?;
            match bound {
                Some(n) => ctx.bind(2, n as u64),
                None => Ok(()),
            }
        },
        move |ctx| {
            let (pa, pb) = (ctx.slot("a")?, ctx.slot("b")?);
            Ok(ctx.signed_result().signum() == sign
                && ctx.compare(pa, check_a.as_bytes())
                && ctx.compare(pb, check_b.as_bytes()))
        },
    )
}

fn strcmp() -> Result<TestCase, ConstructionError> {
    let tree = TestTree::all([
        three_way_leaf("greater", STRCMP, SHORT, SPACED, None),
        three_way_leaf("less", STRCMP, SPACED, SHORT, None),
        three_way_leaf("equal", STRCMP, SHORT, SHORT, None),
        three_way_leaf("case", STRCMP, SHORT, LOWER, None),
    ])?;
    Ok(TestCase::new("strcmp", tree).arity(2))
}

fn stricmp() -> Result<TestCase, ConstructionError> {
    let tree = TestTree::all([
        three_way_leaf("greater", STRICMP, SHORT, SPACED, None),
        three_way_leaf("less", STRICMP, SPACED, SHORT, None),
        three_way_leaf("equal", STRICMP, SHORT, SHORT, None),
        three_way_leaf("case", STRICMP, SHORT, LOWER, None),
    ])?;
    Ok(TestCase::new("stricmp", tree).arity(2))
}

fn strncmp() -> Result<TestCase, ConstructionError> {
    let tree = TestTree::all([
        three_way_leaf("differ", STRCMP, SHORT, SPACED, Some(6)),
        three_way_leaf("prefix", STRCMP, SPACED, SHORT, Some(5)),
        three_way_leaf("equal", STRCMP, SHORT, SHORT, Some(6)),
        three_way_leaf("case", STRCMP, SHORT, LOWER, Some(6)),
        three_way_leaf("past-nul", STRCMP, "Hel\x001o", "Hel\x002o", Some(6)),
    ])?;
    Ok(TestCase::new("strncmp", tree).arity(3))
}

fn strnicmp() -> TestCase {
    let bound = Some("Hello, wor".len());
    let tree = three_way_leaf("equal", STRICMP, HELLO_WORLD, "hEllo, workk", bound).and(
        three_way_leaf("greater", STRICMP, HELLO_WORLD, "hEklo, workk", bound),
    );
    TestCase::new("strnicmp", tree).arity(3)
}

fn memcmp() -> Result<TestCase, ConstructionError> {
    const M1: &str = "He\0l2lo";
    const M2: &str = "He\0l1lo";
    let n = Some(M1.len());
    let tree = TestTree::all([
        three_way_leaf("greater", MEMCMP, M1, M2, n),
        three_way_leaf("less", MEMCMP, M2, M1, n),
        three_way_leaf("equal", MEMCMP, M1, M1, n),
    ])?;
    Ok(TestCase::new("memcmp", tree).arity(3))
}

fn strcpy() -> TestCase {
    let tree = TestTree::leaf(
        "copy",
        |ctx| {
            let src = ctx.string(HELLO_WORLD)?;
            let dst = ctx.alloc(HELLO_WORLD.len() + 1)?;
            ctx.set_slot("src", src);
            ctx.set_slot("dst", dst);
            ctx.bind_all(&[dst, src])
        },
        |ctx| {
            let (src, dst) = (ctx.slot("src")?, ctx.slot("dst")?);
            Ok(ctx.result() == dst
                && ctx.compare(src, HELLO_WORLD.as_bytes())
                && ctx.compare(dst, HELLO_WORLD.as_bytes()))
        },
    );
    TestCase::new("strcpy", tree).arity(2)
}

/// Copies `bound` bytes of `text` into a `bound`-byte buffer. The first
/// `keep` bytes must match the source; the next `canary` bytes must not.
/// The buffer's filler carries a canary so any write past `bound` fails.
fn strncpy_leaf(label: &'static str, text: &'static str, bound: usize, keep: usize, canary: usize) -> TestTree {
    TestTree::leaf(
        label,
        move |ctx| {
            let src = ctx.string(text)?;
            let dst = ctx.alloc(bound)?;
            ctx.set_slot("src", src);
            ctx.set_slot("dst", dst);
            let guard = overrun_canary(text.as_bytes(), bound, filler_len(bound));
            ctx.plant_canary("dst_filler", dst + bound as u64, &guard)?;
            ctx.bind_all(&[dst, src, bound as u64])
        },
        move |ctx| {
            let (src, dst) = (ctx.slot("src")?, ctx.slot("dst")?);
            let bytes = text.as_bytes();
            let tail = &bytes[keep..(keep + canary).min(bytes.len())];
            Ok(ctx.result() == dst
                && ctx.compare_string(src, text)
                && ctx.compare(dst, &bytes[..keep])
                && (tail.is_empty() || !ctx.compare(dst + keep as u64, tail))
                && ctx.canary_intact("dst_filler")?)
        },
    )
}

/// `len` bytes that differ from both NUL and `source[from..]`, so neither
/// padding nor copying past the bound can leave them unchanged.
fn overrun_canary(source: &[u8], from: usize, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| match source.get(from + i).map_or(0xa5, |b| !b) {
            0 => 0xa5,
            b => b,
        })
        .collect()
}

fn strncpy() -> TestCase {
    const LONG: &str = "Hello, world !Hello, world !Hello, world !Hello, world !";
    const EMBEDDED: &str = "Hello, world !Hel\0lo, world !Hello, world !Hello, world !";
    let real = EMBEDDED.find('\0').map_or(EMBEDDED.len(), |i| i + 1);
    let tree = strncpy_leaf("truncating", LONG, 45, 45, 0)
        .and(strncpy_leaf("padding", EMBEDDED, 41, real, 10));
    TestCase::new("strncpy", tree).arity(3)
}

fn strcat() -> TestCase {
    const HEAD: &str = SHORT;
    const TAIL: &str = " world !";
    let tree = TestTree::leaf(
        "append",
        |ctx| {
            let dst = ctx.alloc(HEAD.len() + TAIL.len() + 1)?;
            ctx.write_string(dst, HEAD)?;
            let src = ctx.string(TAIL)?;
            ctx.set_slot("dst", dst);
            ctx.set_slot("src", src);
            ctx.bind_all(&[dst, src])
        },
        |ctx| {
            let (dst, src) = (ctx.slot("dst")?, ctx.slot("src")?);
            let joined = format!("{HEAD}{TAIL}");
            Ok(ctx.result() == dst
                && ctx.compare(dst, joined.as_bytes())
                && ctx.compare(src, TAIL.as_bytes()))
        },
    );
    TestCase::new("strcat", tree).arity(2)
}

fn strncat() -> TestCase {
    const HEAD: &str = SHORT;
    const TAIL: &str = " world !";
    const BOUND: usize = 3;
    let tree = TestTree::leaf(
        "bounded-append",
        |ctx| {
            let dst = ctx.alloc(HEAD.len() + BOUND + 1)?;
            ctx.write_string(dst, HEAD)?;
            let src = ctx.string(TAIL)?;
            ctx.set_slot("dst", dst);
            ctx.set_slot("src", src);
            ctx.bind_all(&[dst, src, BOUND as u64])
        },
        |ctx| {
            let (dst, src) = (ctx.slot("dst")?, ctx.slot("src")?);
            let joined = format!("{HEAD}{}", &TAIL[..BOUND]);
            Ok(ctx.result() == dst
                && ctx.compare_string(dst, &joined)
                && ctx.compare(src, TAIL.as_bytes()))
        },
    );
    TestCase::new("strncat", tree).arity(3)
}

/// `expected` is the offset of the match, `None` for a NULL result.
fn search_leaf(label: &'static str, text: &'static str, needle: char, expected: Option<usize>) -> TestTree {
    TestTree::leaf(
        label,
        move |ctx| {
            bind_string(ctx, "s", 0, text)?;
            ctx.bind(1, u64::from(needle as u32))
        },
        move |ctx| {
            let s = ctx.slot("s")?;
            let hit = match expected {
                Some(offset) => ctx.result() == s + offset as u64,
                None => ctx.result() == 0,
            };
            Ok(hit && ctx.compare(s, text.as_bytes()))
        },
    )
}

fn strchr() -> TestCase {
    const CUT: &str = "He\0llo,";
    let tree = search_leaf("found", SHORT, 'l', SHORT.find('l'))
        .and(search_leaf("stops-at-nul", CUT, 'l', until_nul(CUT).find('l')));
    TestCase::new("strchr", tree).arity(2)
}

fn strrchr() -> TestCase {
    const TWICE: &str = "Hello, hello, ";
    const CUT: &str = "Hel\0lo,";
    let tree = search_leaf("found", TWICE, 'o', TWICE.rfind('o'))
        .and(search_leaf("stops-at-nul", CUT, 'o', until_nul(CUT).rfind('o')));
    TestCase::new("strrchr", tree).arity(2)
}

/// Runs over (`s`, `set`): `found` is true when the routine should stop on a
/// member of `set` (strpbrk) rather than count leading members (strspn).
fn span_leaf(label: &'static str, s: &'static str, set: &'static str, pbrk: bool) -> TestTree {
    let span = until_nul(s)
        .chars()
        .take_while(|c| if pbrk { !set.contains(*c) } else { set.contains(*c) })
        .count() as u64;
    let found = pbrk && (span as usize) < until_nul(s).len();
    TestTree::leaf(
        label,
        move |ctx| {
            bind_string(ctx, "s", 0, s)?;
            bind_string(ctx, "set", 1, set).map(|_| ())
        },
        move |ctx| {
            let (ps, pset) = (ctx.slot("s")?, ctx.slot("set")?);
            let result_ok = match (pbrk, found) {
                (false, _) => ctx.result() == span,
                (true, true) => ctx.result() == ps + span,
                (true, false) => ctx.result() == 0,
            };
            Ok(result_ok && ctx.compare(ps, s.as_bytes()) && ctx.compare(pset, set.as_bytes()))
        },
    )
}

fn strspn() -> Result<TestCase, ConstructionError> {
    let tree = TestTree::all([
        span_leaf("prefix", SHORT, "leH", false),
        span_leaf("whole", "leH", SHORT, false),
        span_leaf("none", SHORT, "abcde", false),
    ])?;
    Ok(TestCase::new("strspn", tree).arity(2))
}

fn strpbrk() -> Result<TestCase, ConstructionError> {
    let tree = TestTree::all([
        span_leaf("inner", SHORT, "elo", true),
        span_leaf("first", "elo", SHORT, true),
        span_leaf("absent", SHORT, "abcd", true),
    ])?;
    Ok(TestCase::new("strpbrk", tree).arity(2))
}

fn strtok() -> TestCase {
    let first = TestTree::leaf(
        "first-token",
        |ctx| {
            let s = ctx.string_mut(TOKENS)?;
            let delims = ctx.string(DELIMS)?;
            ctx.set_slot("s", s);
            ctx.set_slot("delims", delims);
            ctx.bind_all(&[s, delims])
        },
        |ctx| {
            let s = ctx.slot("s")?;
            Ok(ctx.result() == s && ctx.compare(s, b"Hello, "))
        },
    );
    let second = TestTree::leaf(
        "next-token",
        |ctx| {
            let delims = ctx.slot("delims")?;
            ctx.bind_all(&[0, delims])
        },
        |ctx| {
            let s = ctx.slot("s")?;
            Ok(ctx.result() == s + FIRST_TOKEN && ctx.compare(s, TOKENIZED))
        },
    );
    TestCase::new("strtok", first.and(second)).arity(2).persistent()
}

fn strsep() -> TestCase {
    let first = TestTree::leaf(
        "first-token",
        |ctx| {
            let s = ctx.string_mut(TOKENS)?;
            let delims = ctx.string(DELIMS)?;
            let cursor = ctx.pointer_cell(s)?;
            ctx.set_slot("s", s);
            ctx.set_slot("delims", delims);
            ctx.set_slot("cursor", cursor);
            ctx.bind_all(&[cursor, delims])
        },
        |ctx| {
            let (s, cursor) = (ctx.slot("s")?, ctx.slot("cursor")?);
            Ok(ctx.result() == s
                && ctx.read_pointer(cursor)? == s + FIRST_TOKEN
                && ctx.compare(s, b"Hello, "))
        },
    );
    let second = TestTree::leaf(
        "next-token",
        |ctx| {
            let (cursor, delims) = (ctx.slot("cursor")?, ctx.slot("delims")?);
            ctx.bind_all(&[cursor, delims])
        },
        |ctx| {
            let s = ctx.slot("s")?;
            Ok(ctx.result() == s + FIRST_TOKEN && ctx.compare(s, TOKENIZED))
        },
    );
    TestCase::new("strsep", first.and(second)).arity(2).persistent()
}

fn memset() -> TestCase {
    const FILL: u8 = 0x11;
    const LEN: usize = 9;
    let tree = TestTree::leaf(
        "fill",
        |ctx| {
            let dst = ctx.string_mut(&"\x11".repeat(LEN))?;
            ctx.set_slot("dst", dst);
            ctx.bind_all(&[dst, u64::from(b'A'), (LEN - 1) as u64])
        },
        |ctx| {
            let dst = ctx.slot("dst")?;
            let mut expected = vec![b'A'; LEN - 1];
            expected.push(FILL);
            // some implementations return the end pointer
            let ret_ok = ctx.result() == dst || ctx.result() == dst + (LEN - 1) as u64;
            Ok(ret_ok && ctx.compare(dst, &expected))
        },
    );
    TestCase::new("memset", tree).arity(3)
}

fn move_disjoint_setup(ctx: &mut SetupContext<'_>) -> Result<(), SubtestError> {
    let src = ctx.string(MOVE_TEXT)?;
    let dst = ctx.string_mut(&"\0".repeat(MOVE_TEXT.len()))?;
    ctx.set_slot("src", src);
    ctx.set_slot("dst", dst);
    ctx.bind_all(&[dst, src, MOVE_TEXT.len() as u64])
}

fn move_disjoint_verify(ctx: &VerifyContext<'_>) -> Result<bool, SubtestError> {
    let (src, dst) = (ctx.slot("src")?, ctx.slot("dst")?);
    Ok(ctx.compare(src, MOVE_TEXT.as_bytes()) && ctx.compare(dst, MOVE_TEXT.as_bytes()))
}

fn move_forward_setup(ctx: &mut SetupContext<'_>) -> Result<(), SubtestError> {
    let buf = ctx.string_mut(MOVE_TEXT)?;
    ctx.set_slot("buf", buf);
    ctx.bind_all(&[buf + MOVE_OFFSET, buf, MOVE_COUNT])
}

/// Forward overlap done right: the destination holds the original prefix.
fn move_forward_intact(ctx: &VerifyContext<'_>) -> Result<bool, SubtestError> {
    let buf = ctx.slot("buf")?;
    Ok(ctx.compare(buf + MOVE_OFFSET, &MOVE_TEXT.as_bytes()[..MOVE_COUNT as usize]))
}

fn move_backward_setup(ctx: &mut SetupContext<'_>) -> Result<(), SubtestError> {
    let buf = ctx.string_mut(MOVE_TEXT)?;
    ctx.set_slot("buf", buf);
    ctx.bind_all(&[buf, buf + MOVE_OFFSET, MOVE_COUNT])
}

fn move_backward_intact(ctx: &VerifyContext<'_>) -> Result<bool, SubtestError> {
    let buf = ctx.slot("buf")?;
    let bytes = MOVE_TEXT.as_bytes();
    let end = (MOVE_OFFSET + MOVE_COUNT).min(bytes.len() as u64) as usize;
    Ok(ctx.compare(buf, &bytes[MOVE_OFFSET as usize..end]))
}

fn memmove() -> Result<TestCase, ConstructionError> {
    let tree = TestTree::all([
        TestTree::leaf("disjoint", move_disjoint_setup, move_disjoint_verify),
        TestTree::leaf("overlap-forward", move_forward_setup, |ctx| {
            let buf = ctx.slot("buf")?;
            Ok(ctx.result() == buf + MOVE_OFFSET && move_forward_intact(ctx)?)
        }),
        TestTree::leaf("overlap-backward", move_backward_setup, |ctx| {
            let buf = ctx.slot("buf")?;
            Ok(ctx.result() == buf && move_backward_intact(ctx)?)
        }),
    ])?;
    Ok(TestCase::new("memmove", tree).arity(3))
}

/// memcpy copies disjoint buffers and corrupts at least one overlapping direction.
fn memcpy() -> TestCase {
    let tree = TestTree::leaf("disjoint", move_disjoint_setup, move_disjoint_verify).and(
        TestTree::leaf("overlap-forward", move_forward_setup, |ctx| {
            Ok(!move_forward_intact(ctx)?)
        })
        .or(TestTree::leaf("overlap-backward", move_backward_setup, |ctx| {
            Ok(!move_backward_intact(ctx)?)
        })),
    );
    TestCase::new("memcpy", tree).arity(3)
}

fn strrev() -> TestCase {
    let tree = TestTree::leaf(
        "reverse",
        |ctx| {
            let s = ctx.string_mut(FORMAT_LIKE)?;
            ctx.set_slot("s", s);
            ctx.bind(0, s)
        },
        |ctx| {
            let s = ctx.slot("s")?;
            let reversed: String = FORMAT_LIKE.chars().rev().collect();
            Ok(ctx.result() == s && ctx.compare_string(s, &reversed))
        },
    );
    TestCase::new("strrev", tree).arity(1)
}

fn bzero_leaf(label: &'static str, text: String) -> TestTree {
    let len = text.len();
    TestTree::leaf(
        label,
        move |ctx| {
            let s = ctx.string_mut(&text)?;
            ctx.set_slot("s", s);
            ctx.bind_all(&[s, len as u64])
        },
        move |ctx| {
            let s = ctx.slot("s")?;
            Ok(ctx.compare(s, &vec![0u8; len]))
        },
    )
}

fn bzero() -> TestCase {
    const TEXT: &str = "Hello \0, w%srld !, hello world";
    let tree = bzero_leaf("short", TEXT.to_string()).and(bzero_leaf("long", TEXT.repeat(50)));
    TestCase::new("bzero", tree).arity(2)
}
