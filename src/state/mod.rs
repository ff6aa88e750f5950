//! Application state machine capability.
//!
//! The consensus engine hands every committed normal entry to a
//! [`StateMachine`] in log order, on every member. Membership and blank
//! entries are handled by the engine and never reach the application.
//!
//! ## Module Structure
//!
//! - `kv`: a replicated key/value map driven by JSON commands

mod kv;

pub use kv::{KvCommand, KvStateMachine};

use crate::command::CommandResponse;
use std::io::{self, Read, Write};

/// A committed entry as seen by the application.
#[derive(Debug, Clone, Copy)]
pub struct AppliedEntry<'a> {
    /// Log index of the entry.
    pub index: u64,
    /// Term in which the entry was created.
    pub term: u64,
    /// Opaque command payload.
    pub data: &'a [u8],
}

/// A point-in-time capture of application state.
pub trait StateSnapshot: Send {
    /// Serialize the captured state.
    fn persist(&self, sink: &mut dyn Write) -> io::Result<()>;
}

/// Application state driven by the replicated log.
///
/// Entries may be redelivered after a crash (the last applied index is only
/// as durable as the latest snapshot), so implementations that need exactly
/// once semantics should track [`AppliedEntry::index`].
pub trait StateMachine: Send + Sync + 'static {
    /// Apply one committed entry.
    fn apply(&mut self, entry: &AppliedEntry<'_>) -> CommandResponse;

    /// Capture the current state.
    ///
    /// Called while no apply is in progress; the capture must not observe
    /// later applies.
    fn snapshot(&self) -> io::Result<Box<dyn StateSnapshot>>;

    /// Replace the whole state with the contents of `source`.
    fn restore(&mut self, source: &mut dyn Read) -> io::Result<()>;
}

/// State machine that accepts every entry and keeps nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStateMachine;

struct EmptySnapshot;

impl StateSnapshot for EmptySnapshot {
    fn persist(&self, _sink: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }
}

impl StateMachine for NoopStateMachine {
    fn apply(&mut self, _entry: &AppliedEntry<'_>) -> CommandResponse {
        CommandResponse::ok()
    }

    fn snapshot(&self) -> io::Result<Box<dyn StateSnapshot>> {
        Ok(Box::new(EmptySnapshot))
    }

    fn restore(&mut self, source: &mut dyn Read) -> io::Result<()> {
        io::copy(source, &mut io::sink())?;
        Ok(())
    }
}
