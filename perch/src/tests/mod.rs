// Copyright (c) 2020-present, UMD Database Group.
//
// This program is free software: you can use, redistribute, and/or modify
// it under the terms of the GNU Affero General Public License, version 3
// or later ("AGPL"), as published by the Free Software Foundation.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <http://www.gnu.org/licenses/>.

//! Common unit test utility methods
//!
//! The waits in [crate::state] are exercised against scripted status
//! sequences instead of a live AWS account: a fake resource replays a canned
//! sequence of observations, one per fetch, and counts how often it was
//! fetched.

use crate::error::{PerchError, Result};
use crate::state::Observation;
use std::cell::Cell;
use std::fmt;
use std::future::{ready, Ready};
use std::rc::Rc;

/// The status vocabulary of the scripted fake resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    /// Still converging.
    Creating,
    /// Converged successfully.
    Ready,
    /// Converged into a terminal failure.
    Broken,
    /// A status no wait in the tests ever declares.
    Migrating,
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScriptState::Creating => "Creating",
            ScriptState::Ready => "Ready",
            ScriptState::Broken => "Broken",
            ScriptState::Migrating => "Migrating",
        };
        write!(f, "{}", label)
    }
}

/// One scripted fetch outcome.
#[derive(Debug, Clone, Copy)]
pub enum Step<S> {
    /// The resource exists and reports this status.
    Status(S),
    /// The resource exists and reports this status plus a free-text reason.
    StatusWithReason(S, &'static str),
    /// The resource does not exist.
    Gone,
    /// The fetch itself failed.
    Fail(&'static str),
}

/// Builds a refresh closure that replays `steps` one fetch at a time,
/// repeating the last step once the script is exhausted.
///
/// The snapshot of each observation is the 1-based fetch ordinal, so tests
/// can tell which poll produced a result. The returned counter tracks the
/// total number of fetches.
pub fn scripted<S: Copy>(
    steps: Vec<Step<S>>,
) -> (
    impl FnMut() -> Ready<Result<Observation<u32, S>>>,
    Rc<Cell<u32>>,
) {
    assert!(!steps.is_empty());
    let fetches = Rc::new(Cell::new(0u32));
    let counter = fetches.clone();
    let refresh = move || {
        let ordinal = counter.get() + 1;
        counter.set(ordinal);
        let step = steps[((ordinal - 1) as usize).min(steps.len() - 1)];
        ready(match step {
            Step::Status(status) => Ok(Observation {
                snapshot: ordinal,
                status,
                reason: None,
            }),
            Step::StatusWithReason(status, reason) => Ok(Observation {
                snapshot: ordinal,
                status,
                reason: Some(reason.to_string()),
            }),
            Step::Gone => Err(PerchError::NotFound("scripted resource".to_string())),
            Step::Fail(desc) => Err(PerchError::AWS(desc.to_string())),
        })
    };
    (refresh, fetches)
}
