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

//! Convergence waiting for asynchronously provisioned AWS resources.
//!
//! Most Lambda control-plane calls return before the requested change has
//! taken effect: a created event source mapping starts out `Creating`, a
//! provisioned concurrency config starts out `IN_PROGRESS`, and the caller is
//! expected to poll the resource until it settles. [StateChange] captures one
//! such wait: the statuses that mean "keep polling", the statuses that mean
//! "done", the statuses that mean "failed", and a wall-clock budget.

use crate::configs::PERCH_POLL_INTERVAL;
use crate::error::{PerchError, Result};
use log::debug;
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

/// One fetched snapshot of a remote resource together with its classified
/// lifecycle status.
#[derive(Debug, Clone)]
pub struct Observation<T, S> {
    /// The raw resource description the service returned.
    pub snapshot: T,
    /// The lifecycle status the service reported for it.
    pub status:   S,
    /// The service's free-text explanation for the current status, when the
    /// resource exposes one (e.g. an event source mapping's
    /// `state_transition_reason`). Lambda surfaces the cause of a failed
    /// convergence only through this field, never as a typed error.
    pub reason:   Option<String>,
}

/// A single wait for a remote resource to converge.
///
/// The status vocabulary `S` is a closed enum owned by the resource module
/// (see [crate::aws]); the declared sets are configuration, not ambient
/// constants, so two resource kinds can never leak statuses into each other.
/// A `StateChange` is built per operation and discarded once the wait
/// returns.
///
/// Statuses are classified in a fixed order on every poll: failure, then
/// target, then pending. A status in none of the three sets aborts the wait
/// with [PerchError::UnexpectedState] rather than polling forever on a state
/// this crate does not understand.
#[derive(Debug, Clone)]
pub struct StateChange<S> {
    pending: Vec<S>,
    target:  Vec<S>,
    failure: Vec<S>,
    timeout: Duration,
    delay:   Duration,
}

impl<S> StateChange<S>
where
    S: Copy + PartialEq + Display,
{
    /// Creates a wait that polls while the status is in `pending` and
    /// succeeds once it is in `target`, giving up after `timeout`.
    ///
    /// The inter-poll delay defaults to the configured poll interval.
    pub fn new(pending: &[S], target: &[S], timeout: Duration) -> StateChange<S> {
        StateChange {
            pending: pending.to_vec(),
            target: target.to_vec(),
            failure: Vec::new(),
            timeout,
            delay: *PERCH_POLL_INTERVAL,
        }
    }

    /// Declares the statuses that end the wait with [PerchError::FailureState].
    pub fn set_failure(&mut self, failure: &[S]) -> &mut Self {
        self.failure = failure.to_vec();
        self
    }

    /// Overrides the fixed delay between two polls.
    pub fn set_delay(&mut self, delay: Duration) -> &mut Self {
        self.delay = delay;
        self
    }

    /// Polls `refresh` until the resource reaches a target status.
    ///
    /// `refresh` performs one read-only fetch of the resource and must map
    /// "object gone" to [PerchError::NotFound]; any other error aborts the
    /// wait unchanged. Elapsed time counts from the first poll and is never
    /// reset between retries.
    ///
    /// # Returns
    /// The observation that carried the target status.
    pub async fn wait<T, F, Fut>(&self, refresh: F) -> Result<Observation<T, S>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T, S>>>,
    {
        match self.poll(refresh, false).await? {
            Some(observation) => Ok(observation),
            None => Err(PerchError::Internal(
                "wait finished without an observation".to_string(),
            )),
        }
    }

    /// Polls `refresh` until the resource is gone.
    ///
    /// The counterpart of [StateChange::wait] for deletion: a
    /// [PerchError::NotFound] from `refresh` means the remote object has been
    /// fully removed and ends the wait with `Ok(None)`. A target set may
    /// still be declared for deletions that settle in a terminal status
    /// instead of disappearing.
    pub async fn wait_removed<T, F, Fut>(&self, refresh: F) -> Result<Option<Observation<T, S>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T, S>>>,
    {
        self.poll(refresh, true).await
    }

    async fn poll<T, F, Fut>(
        &self,
        mut refresh: F,
        missing_ok: bool,
    ) -> Result<Option<Observation<T, S>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Observation<T, S>>>,
    {
        let started = Instant::now();
        loop {
            let observation = match refresh().await {
                Ok(observation) => observation,
                Err(PerchError::NotFound(_)) if missing_ok => return Ok(None),
                Err(e) => return Err(e),
            };

            if self.failure.contains(&observation.status) {
                return Err(PerchError::FailureState {
                    status: observation.status.to_string(),
                    reason: observation.reason,
                });
            }
            if self.target.contains(&observation.status) {
                return Ok(Some(observation));
            }
            if !self.pending.contains(&observation.status) {
                return Err(PerchError::UnexpectedState {
                    status: observation.status.to_string(),
                });
            }
            if started.elapsed() >= self.timeout {
                return Err(PerchError::Timeout {
                    status:  observation.status.to_string(),
                    timeout: self.timeout,
                });
            }

            debug!(
                "still {} after {:?}, polling again in {:?}",
                observation.status,
                started.elapsed(),
                self.delay
            );
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Re-invokes a fallible operation while its error is classified as
/// retryable.
///
/// Lambda's control plane is eventually consistent around IAM: a freshly
/// created execution role can take a minute or two before Lambda accepts it,
/// and the API reports that as a plain parameter-validation error. Callers
/// pass a predicate that recognizes those transient errors; everything else
/// is surfaced on the first occurrence. Once `timeout` has elapsed the last
/// error is surfaced even if it was retryable.
///
/// # Arguments
/// * `timeout` - The wall-clock retry budget, measured from the first attempt.
/// * `delay` - The fixed pause between two attempts.
/// * `op` - The operation to retry.
/// * `retryable` - Classifies an error as transient (`true`) or terminal.
pub async fn retry_when<T, E, F, Fut, C>(
    timeout: Duration,
    delay: Duration,
    mut op: F,
    retryable: C,
) -> std::result::Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> bool,
{
    let started = Instant::now();
    loop {
        match op().await {
            Ok(output) => return Ok(output),
            Err(e) if retryable(&e) && started.elapsed() < timeout => {
                debug!("transient error, retrying in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::tests::{scripted, ScriptState, Step};

    const TICK: Duration = Duration::from_millis(10);

    fn change(timeout: Duration) -> StateChange<ScriptState> {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut conf = StateChange::new(
            &[ScriptState::Creating],
            &[ScriptState::Ready],
            timeout,
        );
        conf.set_failure(&[ScriptState::Broken]).set_delay(TICK);
        conf
    }

    #[tokio::test]
    async fn pending_then_target_settles() -> Result<()> {
        let (refresh, fetches) = scripted(vec![
            Step::Status(ScriptState::Creating),
            Step::Status(ScriptState::Creating),
            Step::Status(ScriptState::Ready),
        ]);

        let started = Instant::now();
        let observation = change(Duration::from_secs(600)).wait(refresh).await?;

        assert_eq!(observation.status, ScriptState::Ready);
        // One fetch per script entry, and a full delay slept before the
        // second and third.
        assert_eq!(fetches.get(), 3);
        assert!(started.elapsed() >= 2 * TICK);
        Ok(())
    }

    #[tokio::test]
    async fn failure_status_aborts_on_first_fetch() -> Result<()> {
        let (refresh, fetches) = scripted(vec![Step::StatusWithReason(
            ScriptState::Broken,
            "The provided execution role does not have permissions",
        )]);

        let err = change(Duration::from_secs(600))
            .wait(refresh)
            .await
            .unwrap_err();

        assert_eq!(fetches.get(), 1);
        match err {
            PerchError::FailureState { status, reason } => {
                assert_eq!(status, "Broken");
                assert!(reason.unwrap().contains("execution role"));
            }
            other => panic!("expected FailureState, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn never_leaving_pending_times_out() -> Result<()> {
        let (refresh, fetches) = scripted(vec![Step::Status(ScriptState::Creating)]);

        let err = change(Duration::from_millis(25))
            .wait(refresh)
            .await
            .unwrap_err();

        assert!(matches!(err, PerchError::Timeout { .. }));
        // The clock runs from the first fetch; a 25ms budget with a 10ms
        // delay allows a handful of polls, never an unbounded number.
        assert!(fetches.get() >= 3 && fetches.get() <= 5);
        Ok(())
    }

    #[tokio::test]
    async fn removal_wait_treats_absence_as_success() -> Result<()> {
        let (refresh, fetches) = scripted::<ScriptState>(vec![Step::Gone]);

        let outcome = change(Duration::from_secs(600)).wait_removed(refresh).await?;

        assert!(outcome.is_none());
        assert_eq!(fetches.get(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn removal_wait_polls_through_pending() -> Result<()> {
        let (refresh, fetches) = scripted(vec![
            Step::Status(ScriptState::Creating),
            Step::Gone,
        ]);

        let outcome = change(Duration::from_secs(600)).wait_removed(refresh).await?;

        assert!(outcome.is_none());
        assert_eq!(fetches.get(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn readiness_wait_surfaces_absence() -> Result<()> {
        let (refresh, _) = scripted::<ScriptState>(vec![Step::Gone]);

        let err = change(Duration::from_secs(600)).wait(refresh).await.unwrap_err();

        assert!(matches!(err, PerchError::NotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn undeclared_status_aborts() -> Result<()> {
        let (refresh, fetches) = scripted(vec![Step::Status(ScriptState::Migrating)]);

        let err = change(Duration::from_secs(600)).wait(refresh).await.unwrap_err();

        assert_eq!(fetches.get(), 1);
        match err {
            PerchError::UnexpectedState { status } => assert_eq!(status, "Migrating"),
            other => panic!("expected UnexpectedState, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn fetch_error_aborts_unchanged() -> Result<()> {
        let (refresh, fetches) = scripted::<ScriptState>(vec![Step::Fail("connection reset")]);

        let err = change(Duration::from_secs(600)).wait(refresh).await.unwrap_err();

        assert_eq!(fetches.get(), 1);
        match err {
            PerchError::AWS(desc) => assert_eq!(desc, "connection reset"),
            other => panic!("expected AWS, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn settled_resource_waits_are_idempotent() -> Result<()> {
        let (first, _) = scripted(vec![Step::Status(ScriptState::Ready)]);
        let (second, _) = scripted(vec![Step::Status(ScriptState::Ready)]);

        let a = change(Duration::from_secs(600)).wait(first).await?;
        let b = change(Duration::from_secs(600)).wait(second).await?;

        assert_eq!(a.status, b.status);
        assert_eq!(a.snapshot, b.snapshot);
        Ok(())
    }

    #[tokio::test]
    async fn retry_when_retries_transient_errors() -> Result<()> {
        let mut attempts = 0u32;
        let output = retry_when(
            Duration::from_secs(600),
            TICK,
            || {
                attempts += 1;
                let outcome = if attempts < 3 {
                    Err(PerchError::AWS("role cannot be assumed".to_string()))
                } else {
                    Ok(attempts)
                };
                std::future::ready(outcome)
            },
            |e| matches!(e, PerchError::AWS(msg) if msg.contains("cannot be assumed")),
        )
        .await?;

        assert_eq!(output, 3);
        Ok(())
    }

    #[tokio::test]
    async fn retry_when_surfaces_terminal_errors_immediately() -> Result<()> {
        let mut attempts = 0u32;
        let err = retry_when(
            Duration::from_secs(600),
            TICK,
            || {
                attempts += 1;
                std::future::ready(Err::<u32, _>(PerchError::AWS("access denied".to_string())))
            },
            |e| matches!(e, PerchError::AWS(msg) if msg.contains("cannot be assumed")),
        )
        .await
        .unwrap_err();

        assert_eq!(attempts, 1);
        assert!(matches!(err, PerchError::AWS(_)));
        Ok(())
    }

    #[tokio::test]
    async fn retry_when_gives_up_after_the_budget() -> Result<()> {
        let mut attempts = 0u32;
        let err = retry_when(
            Duration::from_millis(25),
            TICK,
            || {
                attempts += 1;
                std::future::ready(Err::<u32, _>(PerchError::AWS("throttled by EC2".to_string())))
            },
            |_| true,
        )
        .await
        .unwrap_err();

        assert!(attempts >= 3);
        assert!(matches!(err, PerchError::AWS(_)));
        Ok(())
    }
}
