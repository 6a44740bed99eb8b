mod support;

use fnprobe::catalog::default_catalog;
use fnprobe::probe::case::TestCase;
use fnprobe::probe::tree::TestTree;
use fnprobe::sandbox::abi::ConventionKind;

const COUNTER_ADDR: u64 = 0x0050_0200;
const COUNTER_SLOT: usize = 4;

/// Case whose sub-tests expect the counter routine to return 1, 2, ... in turn.
fn counter_case(func: &'static str, expected: &[u64], persistent: bool) -> TestCase {
    let leaves = expected.iter().map(|want| {
        let want = *want;
        TestTree::leaf(
            format!("call_{want}"),
            |ctx| {
                let buf = ctx.alloc(8)?;
                ctx.bind(0, buf)
            },
            move |ctx| Ok(ctx.result() == want),
        )
    });
    let case = TestCase::new(func, TestTree::all(leaves).unwrap()).arity(1);
    if persistent {
        case.persistent()
    } else {
        case
    }
}

fn counter_engine() -> fnprobe::sandbox::scripted::ScriptedEngine {
    let (mut engine, _) = support::reference_engine(ConventionKind::SystemVAmd64);
    engine
        .install(COUNTER_ADDR, |frame| {
            let slot = frame.static_slot(COUNTER_SLOT);
            let next = frame.load_ptr(slot)? + 1;
            frame.store_ptr(slot, next)?;
            Ok(next)
        })
        .unwrap();
    engine
}

#[test]
fn non_persistent_subtests_each_see_pristine_memory() {
    let catalog = vec![
        counter_case("fresh", &[1, 1, 1], false),
        counter_case("accumulating", &[1, 2, 3], false),
    ];
    let config = support::config(ConventionKind::SystemVAmd64, 500);
    let mut launcher = support::launcher(counter_engine(), catalog, &config, None);

    let matches = launcher.run(COUNTER_ADDR).unwrap();
    assert!(matches.contains("fresh"));
    assert!(!matches.contains("accumulating"));
}

#[test]
fn persistent_case_keeps_memory_between_subtests_only() {
    let catalog = vec![
        counter_case("accumulating", &[1, 2, 3], true),
        // A new case always starts from the pristine snapshot.
        counter_case("accumulating_again", &[1, 2], true),
        counter_case("fresh", &[1, 1], true),
    ];
    let config = support::config(ConventionKind::SystemVAmd64, 500);
    let mut launcher = support::launcher(counter_engine(), catalog, &config, None);

    let matches = launcher.run(COUNTER_ADDR).unwrap();
    assert!(matches.contains("accumulating"));
    assert!(matches.contains("accumulating_again"));
    assert!(!matches.contains("fresh"));

    let stats = launcher.stats();
    // One full restore per case, register-only restores for every later leaf.
    assert_eq!(stats.full_restores, 3);
    assert_eq!(stats.register_restores, 4);
}

#[test]
fn repeated_probes_of_one_address_agree() {
    let catalog = vec![counter_case("accumulating", &[1, 2], true)];
    let config = support::config(ConventionKind::SystemVAmd64, 500);
    let mut launcher = support::launcher(counter_engine(), catalog, &config, None);

    let first = launcher.run(COUNTER_ADDR).unwrap();
    let second = launcher.run(COUNTER_ADDR).unwrap();
    assert_eq!(first, second);
    assert!(first.contains("accumulating"));
}

#[test]
fn full_catalog_is_idempotent_for_a_fixed_seed() {
    let (engine, installed) = support::reference_engine(ConventionKind::SystemVAmd64);
    let config = support::config(ConventionKind::SystemVAmd64, 2_000);
    let mut launcher = support::launcher(engine, default_catalog().unwrap(), &config, None);
    let addresses: Vec<u64> = installed.values().copied().collect();

    let first = launcher.run_campaign(&addresses).unwrap();
    let second = launcher.run_campaign(&addresses).unwrap();
    assert_eq!(first.results, second.results);
    assert_eq!(first.seed, support::TEST_SEED);

    // Each report counts only its own campaign.
    assert_eq!(second.stats.addresses, addresses.len() as u64);
    assert_eq!(first.stats.addresses, second.stats.addresses);
    assert_eq!(first.stats.cases_run, second.stats.cases_run);
    assert_eq!(first.stats.subtests, second.stats.subtests);
    assert_eq!(first.stats.verify_calls, second.stats.verify_calls);
    assert_eq!(launcher.stats().subtests, second.stats.subtests);
}

#[test]
fn persistent_string_cases_depend_on_retained_state() {
    let catalog = default_catalog().unwrap();
    let persistent: Vec<&str> = catalog
        .iter()
        .filter(|c| c.is_persistent())
        .map(|c| c.func())
        .collect();
    assert_eq!(persistent, vec!["strtok", "strsep"]);

    let (engine, installed) = support::reference_engine(ConventionKind::SystemVAmd64);
    let config = support::config(ConventionKind::SystemVAmd64, 2_000);
    let mut launcher = support::launcher(engine, catalog, &config, None);
    assert!(launcher.run(installed["strtok"]).unwrap().contains("strtok"));
    assert!(launcher.run(installed["strsep"]).unwrap().contains("strsep"));
}

#[test]
fn consecutive_restores_leave_memory_identical_to_the_snapshot() {
    use fnprobe::probe::snapshot::{SandboxState, SnapshotController};
    use fnprobe::sandbox::MachineState;
    use fnprobe::utils::constants::{DATA_BASE, DATA_SIZE};

    let mut engine = counter_engine();
    let sp = engine.convention().stack_pointer();
    let pristine_data = engine.read_memory(DATA_BASE, DATA_SIZE).unwrap();
    let pristine_sp = engine.register(sp);

    let mut controller = SnapshotController::new();
    controller.begin_campaign(&mut engine).unwrap();
    controller.begin_case();

    engine.write_memory(DATA_BASE, &[0xaa; 64]).unwrap();
    engine.set_register(sp, 0x1234);

    controller.before_subtest(&mut engine).unwrap();
    assert_eq!(controller.state(), SandboxState::Clean);
    assert_eq!(engine.read_memory(DATA_BASE, DATA_SIZE).unwrap(), pristine_data);
    assert_eq!(engine.register(sp), pristine_sp);

    controller.after_subtest(true, true);
    controller.before_subtest(&mut engine).unwrap();
    assert_eq!(engine.read_memory(DATA_BASE, DATA_SIZE).unwrap(), pristine_data);
    assert_eq!(engine.register(sp), pristine_sp);
    assert_eq!(controller.counters().full, 1);
    assert_eq!(controller.counters().registers_only, 1);
}
