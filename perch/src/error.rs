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

//! Perch error types

use humantime::format_duration;
use std::error;
use std::fmt::{Display, Formatter};
use std::io;
use std::result;
use std::time::Duration;

/// Result type for operations that could result in an [PerchError]
pub type Result<T> = result::Result<T, PerchError>;

/// Perch error
#[derive(Debug)]
pub enum PerchError {
    /// Error returned when accessing the AWS services fails.
    AWS(String),
    /// Error returned when the remote resource does not exist. Waits that
    /// follow a deletion treat this as convergence; every other caller
    /// surfaces it.
    NotFound(String),
    /// Error returned when a remote resource settled into a status the
    /// caller declared as terminal failure. Carries the service's free-text
    /// reason when the resource exposes one.
    FailureState {
        /// The failure status the resource reported.
        status: String,
        /// The service's explanation for it, if any.
        reason: Option<String>,
    },
    /// Error returned when a remote resource reported a status outside every
    /// declared status set. Surfaced instead of polling forever on a state
    /// this crate does not know about.
    UnexpectedState {
        /// The unclassifiable status string.
        status: String,
    },
    /// Error returned when a wait exhausted its wall-clock budget while the
    /// resource was still converging.
    Timeout {
        /// The last status observed before the budget ran out.
        status: String,
        /// The configured budget.
        timeout: Duration,
    },
    /// Error associated to I/O operations and associated traits.
    IoError(io::Error),
    /// Error returned when serde_json failed to serialize or deserialize data.
    SerdeJson(serde_json::Error),
    /// Error returned as a consequence of an error in Perch.
    /// This error should not happen in normal usage of Perch.
    Internal(String),
}

impl From<io::Error> for PerchError {
    fn from(e: io::Error) -> Self {
        PerchError::IoError(e)
    }
}

impl From<serde_json::Error> for PerchError {
    fn from(e: serde_json::Error) -> Self {
        PerchError::SerdeJson(e)
    }
}

impl From<&str> for PerchError {
    fn from(e: &str) -> Self {
        PerchError::Internal(e.to_string())
    }
}

impl Display for PerchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match *self {
            PerchError::AWS(ref desc) => write!(f, "AWS error: {}", desc),
            PerchError::NotFound(ref desc) => write!(f, "not found: {}", desc),
            PerchError::FailureState {
                ref status,
                ref reason,
            } => match reason {
                Some(reason) => write!(f, "reached failure state {}: {}", status, reason),
                None => write!(f, "reached failure state {}", status),
            },
            PerchError::UnexpectedState { ref status } => {
                write!(f, "unexpected state {:?}", status)
            }
            PerchError::Timeout {
                ref status,
                ref timeout,
            } => write!(
                f,
                "still {} after {}, giving up",
                status,
                format_duration(*timeout)
            ),
            PerchError::IoError(ref desc) => write!(f, "IO error: {}", desc),
            PerchError::SerdeJson(ref desc) => write!(f, "serde_json error: {:?}", desc),
            PerchError::Internal(ref desc) => write!(
                f,
                "Internal error: {}. This was likely caused by a bug in Perch's \
                    code and we would welcome that you file an bug report in our issue tracker",
                desc
            ),
        }
    }
}

impl error::Error for PerchError {}
