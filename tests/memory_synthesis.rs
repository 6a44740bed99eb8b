mod support;

use fnprobe::probe::case::TestCase;
use fnprobe::probe::synth::{filler_len, AllocationCursor, MemorySynthesizer};
use fnprobe::probe::tree::TestTree;
use fnprobe::sandbox::abi::ConventionKind;
use fnprobe::sandbox::scripted::ScriptedEngine;
use fnprobe::sandbox::{MachineState, Perms};
use fnprobe::utils::constants::DEFAULT_ALLOC_BASE;
use fnprobe::utils::det_rng::DetRng;

const POKE_ADDR: u64 = 0x0050_0400;

#[test]
fn strings_keep_embedded_nul_and_terminator() {
    let mut machine = ScriptedEngine::new(ConventionKind::SystemVAmd64).unwrap();
    let mut cursor = AllocationCursor::new(DEFAULT_ALLOC_BASE);
    let mut rng = DetRng::new(7);
    let mut synth = MemorySynthesizer::new(&mut machine, &mut cursor, &mut rng, 64);

    let fixture = synth.allocate_string("NED\0A1E", Perms::READ).unwrap();
    assert_eq!(fixture.len, 8);
    assert_eq!(fixture.content, b"NED\0A1E\0".to_vec());
    assert!(synth.compare(fixture.addr, b"NED\0A1E\0"));
}

#[test]
fn fixtures_never_alias_and_are_separated_by_a_gap() {
    let mut machine = ScriptedEngine::new(ConventionKind::SystemVAmd64).unwrap();
    let mut cursor = AllocationCursor::new(DEFAULT_ALLOC_BASE);
    let mut rng = DetRng::new(11);
    let mut fixtures = Vec::new();
    {
        let mut synth = MemorySynthesizer::new(&mut machine, &mut cursor, &mut rng, 64);
        for len in [0usize, 1, 15, 16, 17, 31, 32, 100] {
            fixtures.push(synth.allocate(len, Perms::READ_WRITE).unwrap());
        }
    }

    for pair in fixtures.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let footprint_end = a.end() + filler_len(a.len) as u64;
        assert!(footprint_end < b.addr, "fixture at {:#x} runs into {:#x}", a.addr, b.addr);
        // Last filler byte is mapped, the byte after it is not.
        assert!(machine.read_memory(footprint_end - 1, 1).is_ok());
        assert!(machine.read_memory(footprint_end, 1).is_err());
    }
}

#[test]
fn filler_is_reproducible_from_the_seed() {
    let image = |seed: u64| {
        let mut machine = ScriptedEngine::new(ConventionKind::SystemVAmd64).unwrap();
        let mut cursor = AllocationCursor::new(DEFAULT_ALLOC_BASE);
        let mut rng = DetRng::new(seed);
        let fixture = {
            let mut synth = MemorySynthesizer::new(&mut machine, &mut cursor, &mut rng, 64);
            synth.allocate_string("abc", Perms::READ).unwrap()
        };
        machine.read_memory(fixture.addr, 16).unwrap()
    };
    assert_eq!(image(42), image(42));
    assert_ne!(image(42), image(43));
}

/// Single-leaf case: allocate `len` bytes and pass `(buf, offset)` to a
/// routine that stores one byte at `buf + offset`.
fn poke_case(func: &'static str, len: usize, offset: u64, read_only: bool) -> TestCase {
    let tree = TestTree::leaf(
        "poke",
        move |ctx| {
            let buf = if read_only {
                ctx.string(&"x".repeat(len - 1))?
            } else {
                ctx.alloc(len)?
            };
            ctx.bind_all(&[buf, offset])
        },
        |_ctx| Ok(true),
    );
    TestCase::new(func, tree).arity(2)
}

fn poke_engine() -> ScriptedEngine {
    let (mut engine, _) = support::reference_engine(ConventionKind::SystemVAmd64);
    engine
        .install(POKE_ADDR, |frame| {
            let buf = frame.arg(0)?;
            let offset = frame.arg(1)?;
            frame.store_u8(buf + offset, 0x41)?;
            Ok(0)
        })
        .unwrap();
    engine
}

#[test]
fn one_byte_overrun_lands_in_own_filler() {
    let catalog = vec![
        poke_case("inside", 5, 4, false),
        poke_case("off_by_one", 5, 5, false),
        poke_case("past_filler", 5, 5 + filler_len(5) as u64, false),
        poke_case("read_only", 5, 0, true),
    ];
    let config = support::config(ConventionKind::SystemVAmd64, 500);
    let mut launcher = support::launcher(poke_engine(), catalog, &config, None);

    let matches = launcher.run(POKE_ADDR).unwrap();
    assert!(matches.contains("inside"));
    assert!(matches.contains("off_by_one"));
    assert!(!matches.contains("past_filler"));
    assert!(!matches.contains("read_only"));
    assert_eq!(launcher.stats().faults, 2);
}
