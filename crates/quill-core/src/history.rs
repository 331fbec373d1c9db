//! Snapshot history store
//!
//! A bounded, persisted pair of LIFO stacks (undo, redo) of full-state
//! snapshots. The stacks are metadata about history: they are persisted in
//! their own table and survive a reload independently of the records they
//! describe.
//!
//! The store works correctly before its backing storage has been read: the
//! first operation triggers the load, and initialization is idempotent and
//! memoized, so it never runs twice.

use std::collections::VecDeque;

use crate::db::HistoryRepository;
use crate::error::Result;
use crate::models::Snapshot;

/// Default maximum depth of each stack
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Published undo/redo availability, pushed to listeners after every
/// mutating operation (including the initial load)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HistorySignal {
    /// Whether at least one state can be undone
    pub can_undo: bool,
    /// Whether at least one undone state can be reapplied
    pub can_redo: bool,
}

type HistoryListener = Box<dyn Fn(HistorySignal) + Send>;

/// Bounded, persisted undo/redo stacks of snapshots
pub struct SnapshotHistory {
    capacity: usize,
    undo: VecDeque<Snapshot>,
    redo: VecDeque<Snapshot>,
    loaded: bool,
    listeners: Vec<HistoryListener>,
}

impl SnapshotHistory {
    /// Create a history store with the default capacity
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a history store bounded to `capacity` entries per stack
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            loaded: false,
            listeners: Vec::new(),
        }
    }

    /// Register a listener for `{can_undo, can_redo}` changes.
    ///
    /// Listeners are invoked synchronously after every mutating operation,
    /// including the initial load from storage.
    pub fn subscribe(&mut self, listener: impl Fn(HistorySignal) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Current availability pair, loading from storage first if needed
    pub fn state(&mut self, repo: &impl HistoryRepository) -> Result<HistorySignal> {
        self.ensure_loaded(repo)?;
        Ok(self.signal())
    }

    /// Record a new state.
    ///
    /// No-op if `state` is byte-identical to the top of the undo stack
    /// (no-op edits must not grow history or clear redo). Otherwise appends,
    /// evicting the oldest entry when over capacity, and unconditionally
    /// clears the redo stack: time-travel branches are not preserved.
    pub fn push(&mut self, repo: &impl HistoryRepository, state: Snapshot) -> Result<()> {
        self.ensure_loaded(repo)?;

        if self
            .undo
            .back()
            .is_some_and(|top| top.same_state(&state))
        {
            return Ok(());
        }

        self.undo.push_back(state);
        if self.undo.len() > self.capacity {
            self.undo.pop_front();
        }
        self.redo.clear();

        self.persist(repo)?;
        self.notify();
        Ok(())
    }

    /// Snapshot that would be restored by the next undo, without popping it
    pub fn peek_undo(&mut self, repo: &impl HistoryRepository) -> Result<Option<Snapshot>> {
        self.ensure_loaded(repo)?;
        Ok(self.undo.back().cloned())
    }

    /// Snapshot that would be restored by the next redo, without popping it
    pub fn peek_redo(&mut self, repo: &impl HistoryRepository) -> Result<Option<Snapshot>> {
        self.ensure_loaded(repo)?;
        Ok(self.redo.back().cloned())
    }

    /// Step back: pop the newest undo entry and record `current` on the redo
    /// stack so the undo is itself redoable.
    ///
    /// Returns the state to restore, or `None` (with no side effects) when
    /// there is nothing to undo.
    pub fn undo(
        &mut self,
        repo: &impl HistoryRepository,
        current: Snapshot,
    ) -> Result<Option<Snapshot>> {
        self.ensure_loaded(repo)?;

        let Some(target) = self.undo.pop_back() else {
            return Ok(None);
        };

        self.redo.push_back(current);
        let evicted = if self.redo.len() > self.capacity {
            self.redo.pop_front()
        } else {
            None
        };

        if let Err(error) = self.persist(repo) {
            // Failed persistence reverts the in-memory mutation so memory
            // and storage stay in step
            self.redo.pop_back();
            if let Some(evicted) = evicted {
                self.redo.push_front(evicted);
            }
            self.undo.push_back(target);
            return Err(error);
        }

        self.notify();
        Ok(Some(target))
    }

    /// Mirror of [`Self::undo`]: pop the newest redo entry and record
    /// `current` on the undo stack.
    pub fn redo(
        &mut self,
        repo: &impl HistoryRepository,
        current: Snapshot,
    ) -> Result<Option<Snapshot>> {
        self.ensure_loaded(repo)?;

        let Some(target) = self.redo.pop_back() else {
            return Ok(None);
        };

        self.undo.push_back(current);
        let evicted = if self.undo.len() > self.capacity {
            self.undo.pop_front()
        } else {
            None
        };

        if let Err(error) = self.persist(repo) {
            self.undo.pop_back();
            if let Some(evicted) = evicted {
                self.undo.push_front(evicted);
            }
            self.redo.push_back(target);
            return Err(error);
        }

        self.notify();
        Ok(Some(target))
    }

    /// Drop all history, in memory and in storage
    pub fn clear(&mut self, repo: &impl HistoryRepository) -> Result<()> {
        self.undo.clear();
        self.redo.clear();
        self.loaded = true;
        self.persist(repo)?;
        self.notify();
        Ok(())
    }

    /// Stack depths, loading from storage first if needed (test/diagnostic aid)
    pub fn depths(&mut self, repo: &impl HistoryRepository) -> Result<(usize, usize)> {
        self.ensure_loaded(repo)?;
        Ok((self.undo.len(), self.redo.len()))
    }

    fn ensure_loaded(&mut self, repo: &impl HistoryRepository) -> Result<()> {
        if self.loaded {
            return Ok(());
        }

        let (undo, redo) = repo.load_stacks()?;
        self.undo = undo.into();
        self.redo = redo.into();
        self.loaded = true;
        tracing::debug!(
            undo = self.undo.len(),
            redo = self.redo.len(),
            "Loaded history stacks"
        );
        self.notify();
        Ok(())
    }

    fn persist(&self, repo: &impl HistoryRepository) -> Result<()> {
        repo.save_stacks(
            self.undo.iter().cloned().collect::<Vec<_>>().as_slice(),
            self.redo.iter().cloned().collect::<Vec<_>>().as_slice(),
        )
    }

    fn signal(&self) -> HistorySignal {
        HistorySignal {
            can_undo: !self.undo.is_empty(),
            can_redo: !self.redo.is_empty(),
        }
    }

    fn notify(&self) {
        let signal = self.signal();
        for listener in &self.listeners {
            listener(signal);
        }
    }
}

impl Default for SnapshotHistory {
    fn default() -> Self {
        Self::new()
    }
}
