//! # Copy-on-write processor chain.
//!
//! [`ProcessorChain`] stores its stages as an immutable `Arc<[ProcessorRef<M>]>`.
//! Every edit builds a new slice and publishes it with a single pointer swap, so
//! a reader holding a [`Cursor`] keeps iterating the snapshot it started with.
//!
//! ## Architecture
//! ```text
//! writer (append / insert_before / remove)
//!   ├─► lock writer gate          (edits are serialized, none is lost)
//!   ├─► load current snapshot
//!   ├─► build new Vec, check name uniqueness
//!   └─► publish Arc<[..]>         (readers see old or new, never partial)
//!
//! reader (dispatch worker, describe(), len())
//!   └─► clone current Arc         (held only for the clone)
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::processor::ProcessorRef;

/// Separator used by [`ProcessorChain::describe`].
pub const NAME_SEPARATOR: &str = "/";

type Snapshot<M> = Arc<[ProcessorRef<M>]>;

/// Ordered, uniquely named collection of processors.
pub struct ProcessorChain<M> {
    current: RwLock<Snapshot<M>>,
    writer: Mutex<()>,
}

impl<M: Send + 'static> ProcessorChain<M> {
    /// Creates a chain from an initial ordered set.
    ///
    /// Later duplicates of an already present name are skipped.
    pub fn new(processors: impl IntoIterator<Item = ProcessorRef<M>>) -> Self {
        let mut stages: Vec<ProcessorRef<M>> = Vec::new();
        for p in processors {
            if index_of(&stages, p.name()).is_none() {
                stages.push(p);
            }
        }
        Self {
            current: RwLock::new(stages.into()),
            writer: Mutex::new(()),
        }
    }

    /// Appends `processor` at the end.
    ///
    /// Returns `false` (chain unchanged) if a stage with the same name exists.
    pub fn append(&self, processor: ProcessorRef<M>) -> bool {
        self.edit(|stages| {
            if index_of(stages, processor.name()).is_some() {
                return None;
            }
            let mut next = stages.to_vec();
            next.push(processor);
            Some(next)
        })
        .is_some()
    }

    /// Inserts `processor` immediately before the stage called `name`.
    ///
    /// Appends when `name` is not present. Returns `false` (chain unchanged) if a
    /// stage with the processor's own name exists.
    pub fn insert_before(&self, name: &str, processor: ProcessorRef<M>) -> bool {
        self.edit(|stages| {
            if index_of(stages, processor.name()).is_some() {
                return None;
            }
            let mut next = stages.to_vec();
            match index_of(stages, name) {
                Some(at) => next.insert(at, processor),
                None => next.push(processor),
            }
            Some(next)
        })
        .is_some()
    }

    /// Removes the stage called `name` and returns it.
    pub fn remove(&self, name: &str) -> Option<ProcessorRef<M>> {
        let mut removed = None;
        self.edit(|stages| {
            let at = index_of(stages, name)?;
            let mut next = stages.to_vec();
            removed = Some(next.remove(at));
            Some(next)
        });
        removed
    }

    /// Number of stages in the current snapshot.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Returns `true` if the current snapshot has no stage.
    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Stage names in chain order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    /// Stage names joined by `/`, e.g. `group-1/parse/store`.
    ///
    /// Diagnostic only.
    pub fn describe(&self) -> String {
        self.names().join(NAME_SEPARATOR)
    }

    /// Returns a cursor over the snapshot in effect now.
    ///
    /// Later edits do not affect an existing cursor.
    pub fn cursor(&self) -> Cursor<M> {
        Cursor {
            stages: self.snapshot(),
            next: 0,
        }
    }

    fn snapshot(&self) -> Snapshot<M> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Read-modify-publish under the writer gate. `f` returns `None` to leave the chain as is.
    fn edit<F>(&self, f: F) -> Option<()>
    where
        F: FnOnce(&[ProcessorRef<M>]) -> Option<Vec<ProcessorRef<M>>>,
    {
        let _gate = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let next = f(&self.snapshot())?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = next.into();
        Some(())
    }
}

impl<M: Send + 'static> Default for ProcessorChain<M> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<M: Send + 'static> fmt::Display for ProcessorChain<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl<M: Send + 'static> fmt::Debug for ProcessorChain<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProcessorChain").field(&self.names()).finish()
    }
}

fn index_of<M: Send + 'static>(stages: &[ProcessorRef<M>], name: &str) -> Option<usize> {
    stages.iter().position(|p| p.name() == name)
}

/// Read-only traversal over one chain snapshot.
///
/// Finite; yields each stage once, in chain order.
pub struct Cursor<M> {
    stages: Snapshot<M>,
    next: usize,
}

impl<M: Send + 'static> Iterator for Cursor<M> {
    type Item = ProcessorRef<M>;

    fn next(&mut self) -> Option<Self::Item> {
        let stage = self.stages.get(self.next)?;
        self.next += 1;
        Some(Arc::clone(stage))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.stages.len() - self.next;
        (left, Some(left))
    }
}

impl<M: Send + 'static> ExactSizeIterator for Cursor<M> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ProcessorFn;
    use crate::error::ProcessError;

    fn stage(name: &'static str) -> ProcessorRef<u32> {
        ProcessorFn::arc(name, |v: u32| async move { Ok::<_, ProcessError>(Some(v)) })
    }

    #[test]
    fn test_append_and_describe() {
        let chain = ProcessorChain::default();
        assert!(chain.is_empty());
        assert!(chain.append(stage("a")));
        assert!(chain.append(stage("b")));
        assert!(chain.append(stage("c")));

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.describe(), "a/b/c");
        assert_eq!(chain.to_string(), "a/b/c");
    }

    #[test]
    fn test_duplicate_append_leaves_chain_unchanged() {
        let chain = ProcessorChain::new([stage("a"), stage("b")]);
        assert!(!chain.append(stage("a")));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.describe(), "a/b");
    }

    #[test]
    fn test_initial_duplicates_are_skipped() {
        let chain = ProcessorChain::new([stage("a"), stage("a"), stage("b")]);
        assert_eq!(chain.describe(), "a/b");
    }

    #[test]
    fn test_insert_before() {
        let chain = ProcessorChain::new([stage("a"), stage("c")]);
        assert!(chain.insert_before("c", stage("b")));
        assert_eq!(chain.describe(), "a/b/c");

        assert!(chain.insert_before("a", stage("head")));
        assert_eq!(chain.describe(), "head/a/b/c");

        // missing anchor appends
        assert!(chain.insert_before("nope", stage("tail")));
        assert_eq!(chain.describe(), "head/a/b/c/tail");

        // name collision is rejected even with a valid anchor
        assert!(!chain.insert_before("a", stage("b")));
        assert_eq!(chain.len(), 5);
    }

    #[test]
    fn test_remove() {
        let chain = ProcessorChain::new([stage("a"), stage("b"), stage("c")]);
        let removed = chain.remove("b").expect("b present");
        assert_eq!(removed.name(), "b");
        assert_eq!(chain.describe(), "a/c");

        assert!(chain.remove("b").is_none());
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_mixed_edits_keep_net_present_stages_in_order() {
        let chain = ProcessorChain::default();
        for name in ["h1", "h2", "h3"] {
            chain.append(stage(name));
        }
        for name in ["h2", "h1", "h3"] {
            assert!(chain.remove(name).is_some());
        }
        assert_eq!(chain.len(), 0);
        assert_eq!(chain.describe(), "");

        // insert against an empty chain behaves like append
        for name in ["h1", "h2", "h3"] {
            assert!(chain.insert_before(name, stage(name)));
        }
        assert_eq!(chain.describe(), "h1/h2/h3");
    }

    #[test]
    fn test_cursor_is_isolated_from_later_edits() {
        let chain = ProcessorChain::new([stage("a"), stage("b")]);
        let cursor = chain.cursor();

        chain.append(stage("c"));
        chain.remove("a");

        let seen: Vec<String> = cursor.map(|p| p.name().to_string()).collect();
        assert_eq!(seen, vec!["a", "b"]);
        assert_eq!(chain.cursor().len(), 2);
        assert_eq!(chain.describe(), "b/c");
    }

    #[test]
    fn test_concurrent_writers_do_not_lose_edits() {
        let chain = Arc::new(ProcessorChain::<u32>::default());
        let names: Vec<String> = (0..32).map(|i| format!("p{i}")).collect();

        std::thread::scope(|s| {
            for name in &names {
                let chain = Arc::clone(&chain);
                s.spawn(move || {
                    let p: ProcessorRef<u32> = ProcessorFn::arc(name.clone(), |v: u32| async move {
                        Ok::<_, ProcessError>(Some(v))
                    });
                    assert!(chain.append(p));
                });
            }
        });

        assert_eq!(chain.len(), names.len());
    }
}
