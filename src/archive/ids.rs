// src/archive/ids.rs

//! Identifiers handed out by the [`Archive`](super::Archive).

use std::fmt;

use serde::{Deserialize, Serialize};

macro_rules! archive_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

archive_id!(
    /// A run, top-level or nested.
    RunId,
    "run"
);
archive_id!(
    /// A dataset, materialized or symbolic.
    DatasetId,
    "ds"
);
archive_id!(
    /// A memoized execution.
    ExecRecordId,
    "er"
);
archive_id!(
    /// One execution attempt.
    ExecLogId,
    "log"
);
