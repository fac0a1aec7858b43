//! Messages delivered on the shared event channel. Poller tasks post one of
//! these when an asynchronous piece of work finishes; the shell consumes them
//! strictly in arrival order and broadcasts poll results to every component,
//! which match on identity to decide whether a message applies to them.

use std::collections::HashMap;

use crate::store::{GroupStatus, Store};

/// One combined read of a runner's hash, heartbeat, and pending count.
#[derive(Clone, Debug, Default)]
pub struct RunnerReadings {
    pub fields: HashMap<String, String>,
    /// Raw heartbeat timestamp; `None` means no heartbeat observed, which is
    /// a valid state, not an error.
    pub heartbeat: Option<String>,
    pub pending: i64,
}

/// Status slot for one monitored queue stream, replaced wholesale each cycle.
#[derive(Clone, Debug)]
pub struct QueueSlot {
    pub name: &'static str,
    pub status: Result<GroupStatus, String>,
}

pub enum Msg {
    /// Store connection established; the handle is owned by the shell and
    /// shared read-only with every poller from here on.
    StoreConnected(Store),
    StoreUnreachable(String),
    /// Latest runner identity listing, or the discovery error.
    RunnerNames(Result<Vec<String>, String>),
    /// Result of one runner cell's refresh cycle.
    RunnerPoll {
        name: String,
        result: Result<RunnerReadings, String>,
    },
    /// Full queue status set from one queue-panel cycle.
    QueueStatus(Vec<QueueSlot>),
    /// Result of a key-browser search.
    KeyResults {
        pattern: String,
        result: Result<Vec<String>, String>,
    },
}
