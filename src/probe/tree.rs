//! Boolean contract language over (setup, verify) leaves.
//!
//! A tree is built once per catalog and never mutated. Evaluation is lazy:
//! `And` stops at the first failing side, `Or` at the first passing one, so
//! later leaves are never run.

use crate::error::{ConstructionError, SubtestError};
use crate::probe::case::{SetupContext, VerifyContext};
use std::fmt;
use std::sync::Arc;

pub type SetupFn = Arc<dyn Fn(&mut SetupContext<'_>) -> Result<(), SubtestError> + Send + Sync>;
pub type VerifyFn = Arc<dyn Fn(&VerifyContext<'_>) -> Result<bool, SubtestError> + Send + Sync>;

/// One sub-test: setup fills memory and binds arguments, verify inspects the
/// machine after the run. Verify is read-only.
#[derive(Clone)]
pub struct TestLeaf {
    pub label: String,
    pub setup: SetupFn,
    pub verify: VerifyFn,
}

impl fmt::Debug for TestLeaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestLeaf").field("label", &self.label).finish()
    }
}

#[derive(Debug, Clone)]
pub enum TestTree {
    Leaf(TestLeaf),
    And(Box<TestTree>, Box<TestTree>),
    Or(Box<TestTree>, Box<TestTree>),
}

impl TestTree {
    pub fn leaf<S, V>(label: impl Into<String>, setup: S, verify: V) -> Self
    where
        S: Fn(&mut SetupContext<'_>) -> Result<(), SubtestError> + Send + Sync + 'static,
        V: Fn(&VerifyContext<'_>) -> Result<bool, SubtestError> + Send + Sync + 'static,
    {
        TestTree::Leaf(TestLeaf {
            label: label.into(),
            setup: Arc::new(setup),
            verify: Arc::new(verify),
        })
    }

    #[must_use]
    pub fn and(self, other: TestTree) -> Self {
        TestTree::And(Box::new(self), Box::new(other))
    }

    #[must_use]
    pub fn or(self, other: TestTree) -> Self {
        TestTree::Or(Box::new(self), Box::new(other))
    }

    /// Right-leaning `And` chain over `items`.
    pub fn all<I>(items: I) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = TestTree>,
    {
        Self::fold(items, "all", TestTree::and)
    }

    /// Right-leaning `Or` chain over `items`.
    pub fn any<I>(items: I) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = TestTree>,
    {
        Self::fold(items, "any", TestTree::or)
    }

    fn fold<I>(items: I, what: &str, join: fn(TestTree, TestTree) -> TestTree) -> Result<Self, ConstructionError>
    where
        I: IntoIterator<Item = TestTree>,
    {
        let mut items: Vec<TestTree> = items.into_iter().collect();
        let mut acc = items
            .pop()
            .ok_or_else(|| ConstructionError::EmptySequence(format!("{what}() over no leaves")))?;
        while let Some(item) = items.pop() {
            acc = join(item, acc);
        }
        Ok(acc)
    }

    /// Walk the tree, calling `run` once per evaluated leaf.
    pub fn execute<F>(&self, run: &mut F) -> bool
    where
        F: FnMut(&TestLeaf) -> bool,
    {
        match self {
            TestTree::Leaf(leaf) => run(leaf),
            TestTree::And(a, b) => a.execute(run) && b.execute(run),
            TestTree::Or(a, b) => a.execute(run) || b.execute(run),
        }
    }

    pub fn leaf_count(&self) -> usize {
        match self {
            TestTree::Leaf(_) => 1,
            TestTree::And(a, b) | TestTree::Or(a, b) => a.leaf_count() + b.leaf_count(),
        }
    }

    /// Leaf labels in evaluation order.
    pub fn labels(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.leaf_count());
        self.collect_labels(&mut out);
        out
    }

    fn collect_labels<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TestTree::Leaf(leaf) => out.push(&leaf.label),
            TestTree::And(a, b) | TestTree::Or(a, b) => {
                a.collect_labels(out);
                b.collect_labels(out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(label: &str) -> TestTree {
        TestTree::leaf(label, |_| Ok(()), |_| Ok(true))
    }

    /// Runs the tree with verdicts looked up by label; returns (verdict, visited labels).
    fn run_with(tree: &TestTree, failing: &[&str]) -> (bool, Vec<String>) {
        let mut visited = Vec::new();
        let verdict = tree.execute(&mut |leaf: &TestLeaf| {
            visited.push(leaf.label.clone());
            !failing.contains(&leaf.label.as_str())
        });
        (verdict, visited)
    }

    #[test]
    fn test_and_short_circuits_on_failure() {
        let tree = TestTree::all(["a", "b", "c"].map(noop)).unwrap();
        let (verdict, visited) = run_with(&tree, &["b"]);
        assert!(!verdict);
        assert_eq!(visited, vec!["a", "b"]);
    }

    #[test]
    fn test_or_short_circuits_on_success() {
        let tree = TestTree::any(["a", "b", "c"].map(noop)).unwrap();
        let (verdict, visited) = run_with(&tree, &["a"]);
        assert!(verdict);
        assert_eq!(visited, vec!["a", "b"]);

        let (verdict, visited) = run_with(&tree, &["a", "b", "c"]);
        assert!(!verdict);
        assert_eq!(visited.len(), 3);
    }

    #[test]
    fn test_mixed_tree_order_and_count() {
        let tree = noop("t1").and(noop("t2").or(noop("t3")));
        assert_eq!(tree.leaf_count(), 3);
        assert_eq!(tree.labels(), vec!["t1", "t2", "t3"]);
        let (verdict, visited) = run_with(&tree, &["t2"]);
        assert!(verdict);
        assert_eq!(visited, vec!["t1", "t2", "t3"]);
    }

    #[test]
    fn test_empty_sequence_is_construction_error() {
        assert!(matches!(
            TestTree::all(Vec::new()),
            Err(ConstructionError::EmptySequence(_))
        ));
        assert!(TestTree::any(std::iter::empty()).is_err());
    }
}
