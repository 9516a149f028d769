//! Derived replica state
//!
//! There is no stored state field: every state is computed from whether an
//! engine is loaded plus the metadata it (or the metadata file) reports.

use crate::common::Result;
use crate::replica::Info;
use serde::{Deserialize, Serialize};

/// Replica lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Initial,
    Open,
    Closed,
    Dirty,
    Rebuilding,
    Error,
}

impl State {
    /// Can this replica serve I/O?
    pub fn is_live(&self) -> bool {
        matches!(self, State::Open | State::Dirty | State::Rebuilding)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Initial => "initial",
            State::Open => "open",
            State::Closed => "closed",
            State::Dirty => "dirty",
            State::Rebuilding => "rebuilding",
            State::Error => "error",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a replica with a loaded engine
pub fn live_state(info: Info) -> (State, Info) {
    let state = if info.rebuilding {
        State::Rebuilding
    } else if info.dirty {
        State::Dirty
    } else {
        State::Open
    };
    (state, info)
}

/// State of a replica with no engine loaded
///
/// A missing file means the replica was never created; any other read
/// failure puts it in `Error`. Flags in the file are ignored: without an
/// engine the replica is `Closed`.
pub fn closed_state(read: Result<Info>) -> (State, Info) {
    match read {
        Ok(info) => (State::Closed, info),
        Err(e) if e.is_not_found() => (State::Initial, Info::default()),
        Err(e) => {
            tracing::warn!("Replica metadata unreadable: {}", e);
            (State::Error, Info::default())
        }
    }
}

/// Last-committed state, from persisted metadata only
pub fn committed_state(read: Result<Info>) -> (State, Info) {
    match closed_state(read) {
        (State::Closed, info) if info.rebuilding => (State::Rebuilding, info),
        (State::Closed, info) if info.dirty => (State::Dirty, info),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use std::path::PathBuf;

    fn info(dirty: bool, rebuilding: bool) -> Info {
        Info {
            size: 4096,
            sector_size: 512,
            dirty,
            rebuilding,
            ..Default::default()
        }
    }

    fn not_found() -> Error {
        Error::MetadataNotFound(PathBuf::from("/r"))
    }

    fn corrupt() -> Error {
        Error::MetadataRead {
            path: PathBuf::from("/r"),
            reason: "expected value at line 1".into(),
        }
    }

    #[test]
    fn test_state_table() {
        for dirty in [false, true] {
            for rebuilding in [false, true] {
                let expected = match (rebuilding, dirty) {
                    (true, _) => State::Rebuilding,
                    (false, true) => State::Dirty,
                    (false, false) => State::Open,
                };
                assert_eq!(live_state(info(dirty, rebuilding)).0, expected);

                // Not loaded: flags don't matter
                assert_eq!(closed_state(Ok(info(dirty, rebuilding))).0, State::Closed);
            }
        }

        assert_eq!(closed_state(Err(not_found())), (State::Initial, Info::default()));
        assert_eq!(closed_state(Err(corrupt())), (State::Error, Info::default()));
    }

    #[test]
    fn test_committed_state() {
        assert_eq!(committed_state(Ok(info(false, false))).0, State::Closed);
        assert_eq!(committed_state(Ok(info(true, false))).0, State::Dirty);
        assert_eq!(committed_state(Ok(info(true, true))).0, State::Rebuilding);
        assert_eq!(committed_state(Err(not_found())).0, State::Initial);
        assert_eq!(committed_state(Err(corrupt())).0, State::Error);
    }

    #[test]
    fn test_display_and_liveness() {
        assert_eq!(State::Rebuilding.to_string(), "rebuilding");
        assert_eq!(serde_json::to_string(&State::Dirty).unwrap(), "\"dirty\"");
        assert!(State::Dirty.is_live());
        assert!(!State::Closed.is_live());
        assert!(!State::Error.is_live());
    }
}
