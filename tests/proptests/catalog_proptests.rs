use fnprobe::probe::synth::{filler_len, AllocationCursor, MemorySynthesizer};
use fnprobe::probe::tree::{TestLeaf, TestTree};
use fnprobe::sandbox::abi::ConventionKind;
use fnprobe::sandbox::scripted::ScriptedEngine;
use fnprobe::sandbox::Perms;
use fnprobe::utils::constants::{ALLOC_QUANTUM, DEFAULT_ALLOC_BASE};
use fnprobe::utils::det_rng::DetRng;
use proptest::prelude::*;

fn leaves(n: usize) -> Vec<TestTree> {
    (0..n)
        .map(|i| TestTree::leaf(format!("{i}"), |_ctx| Ok(()), |_ctx| Ok(true)))
        .collect()
}

/// Evaluate `tree` with verdicts taken from `verdicts` by leaf label, recording
/// the order leaves were run in.
fn evaluate(tree: &TestTree, verdicts: &[bool]) -> (bool, Vec<usize>) {
    let mut order = Vec::new();
    let verdict = tree.execute(&mut |leaf: &TestLeaf| {
        let index: usize = leaf.label.parse().unwrap();
        order.push(index);
        verdicts[index]
    });
    (verdict, order)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn all_is_conjunction_and_stops_at_first_failure(verdicts in prop::collection::vec(any::<bool>(), 1..12)) {
        let tree = TestTree::all(leaves(verdicts.len())).unwrap();
        let (verdict, order) = evaluate(&tree, &verdicts);

        prop_assert_eq!(verdict, verdicts.iter().all(|v| *v));
        let expected_runs = verdicts.iter().position(|v| !*v).map_or(verdicts.len(), |i| i + 1);
        prop_assert_eq!(order, (0..expected_runs).collect::<Vec<_>>());
    }

    #[test]
    fn any_is_disjunction_and_stops_at_first_success(verdicts in prop::collection::vec(any::<bool>(), 1..12)) {
        let tree = TestTree::any(leaves(verdicts.len())).unwrap();
        let (verdict, order) = evaluate(&tree, &verdicts);

        prop_assert_eq!(verdict, verdicts.iter().any(|v| *v));
        let expected_runs = verdicts.iter().position(|v| *v).map_or(verdicts.len(), |i| i + 1);
        prop_assert_eq!(order, (0..expected_runs).collect::<Vec<_>>());
    }

    #[test]
    fn nested_trees_follow_boolean_semantics(a in any::<bool>(), b in any::<bool>(), c in any::<bool>()) {
        let mut parts = leaves(3).into_iter();
        let (la, lb, lc) = (parts.next().unwrap(), parts.next().unwrap(), parts.next().unwrap());
        let tree = la.and(lb).or(lc);
        let (verdict, order) = evaluate(&tree, &[a, b, c]);

        prop_assert_eq!(verdict, (a && b) || c);
        prop_assert_eq!(order.contains(&1), a);
        prop_assert_eq!(order.contains(&2), !(a && b));
    }

    #[test]
    fn filler_pads_to_the_next_quantum(len in 0usize..4096) {
        let filler = filler_len(len);
        prop_assert!((1..=ALLOC_QUANTUM).contains(&filler));
        prop_assert_eq!((len + filler) % ALLOC_QUANTUM, 0);
    }

    #[test]
    fn random_fixture_sequences_never_overlap(lens in prop::collection::vec(0usize..300, 1..16), seed in any::<u64>()) {
        let mut machine = ScriptedEngine::new(ConventionKind::SystemVAmd64).unwrap();
        let mut cursor = AllocationCursor::new(DEFAULT_ALLOC_BASE);
        let mut rng = DetRng::new(seed);
        let mut synth = MemorySynthesizer::new(&mut machine, &mut cursor, &mut rng, 64);

        let mut previous_end = None;
        for len in lens {
            let fixture = synth.allocate(len, Perms::READ_WRITE).unwrap();
            if let Some(end) = previous_end {
                prop_assert!(fixture.addr > end, "fixture at {:#x} overlaps previous end {:#x}", fixture.addr, end);
            }
            prop_assert!(synth.compare(fixture.addr, &fixture.content));
            previous_end = Some(fixture.end() + filler_len(len) as u64);
        }
    }

    #[test]
    fn det_rng_is_reproducible(seed in any::<u64>(), address in any::<u64>(), len in 0usize..256) {
        let mut a = DetRng::for_address(seed, address);
        let mut b = DetRng::for_address(seed, address);
        prop_assert_eq!(a.bytes(len), b.bytes(len));

        let mut plain = DetRng::new(seed);
        let first = plain.next_u64();
        prop_assert_ne!(first, 0);
    }
}
