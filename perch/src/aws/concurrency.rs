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

//! This crate contains all wrapped functions of the AWS Lambda provisioned
//! concurrency configs.
//!
//! Provisioned concurrency keeps a number of execution environments
//! initialized ahead of invocations for one function version or alias.
//! Allocating them takes a while: the config reports `IN_PROGRESS` until
//! every environment is warm, then `READY`, or `FAILED` with a free-text
//! `status_reason` when the allocation cannot complete.

use crate::configs::*;
use crate::error::{PerchError, Result};
use crate::state::{Observation, StateChange};
use log::info;
use rusoto_core::RusotoError;
use rusoto_lambda::{
    DeleteProvisionedConcurrencyConfigError, DeleteProvisionedConcurrencyConfigRequest,
    GetProvisionedConcurrencyConfigError, GetProvisionedConcurrencyConfigRequest,
    GetProvisionedConcurrencyConfigResponse, Lambda, PutProvisionedConcurrencyConfigRequest,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The allocation status of a provisioned concurrency config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionedConcurrencyStatus {
    /// Execution environments are still being allocated.
    InProgress,
    /// The requested number of environments is warm.
    Ready,
    /// The allocation failed; `status_reason` carries the cause.
    Failed,
}

impl ProvisionedConcurrencyStatus {
    fn as_str(&self) -> &'static str {
        match self {
            ProvisionedConcurrencyStatus::InProgress => "IN_PROGRESS",
            ProvisionedConcurrencyStatus::Ready => "READY",
            ProvisionedConcurrencyStatus::Failed => "FAILED",
        }
    }
}

impl FromStr for ProvisionedConcurrencyStatus {
    type Err = PerchError;

    fn from_str(s: &str) -> Result<ProvisionedConcurrencyStatus> {
        match s {
            "IN_PROGRESS" => Ok(ProvisionedConcurrencyStatus::InProgress),
            "READY" => Ok(ProvisionedConcurrencyStatus::Ready),
            "FAILED" => Ok(ProvisionedConcurrencyStatus::Failed),
            other => Err(PerchError::UnexpectedState {
                status: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ProvisionedConcurrencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fetches the provisioned concurrency config of one function qualifier.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
/// * `qualifier` - The version number or alias the config is attached to.
pub async fn find_provisioned_concurrency_config(
    function_name: &str,
    qualifier: &str,
) -> Result<GetProvisionedConcurrencyConfigResponse> {
    match PERCH_LAMBDA_CLIENT
        .get_provisioned_concurrency_config(GetProvisionedConcurrencyConfigRequest {
            function_name: function_name.to_owned(),
            qualifier:     qualifier.to_owned(),
        })
        .await
    {
        Ok(config) => Ok(config),
        Err(RusotoError::Service(
            GetProvisionedConcurrencyConfigError::ProvisionedConcurrencyConfigNotFound(_),
        )) => Err(PerchError::NotFound(format!(
            "provisioned concurrency config {}:{}",
            function_name, qualifier
        ))),
        Err(RusotoError::Service(GetProvisionedConcurrencyConfigError::ResourceNotFound(_))) => {
            Err(PerchError::NotFound(format!(
                "function {}:{}",
                function_name, qualifier
            )))
        }
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}

fn observe_config(
    config: GetProvisionedConcurrencyConfigResponse,
) -> Result<Observation<GetProvisionedConcurrencyConfigResponse, ProvisionedConcurrencyStatus>> {
    let status = config
        .status
        .as_deref()
        .unwrap_or("")
        .parse::<ProvisionedConcurrencyStatus>()?;
    let reason = config.status_reason.clone();
    Ok(Observation {
        snapshot: config,
        status,
        reason,
    })
}

/// Blocks until a provisioned concurrency config reports READY.
pub async fn wait_provisioned_concurrency_ready(
    function_name: &str,
    qualifier: &str,
    timeout: Duration,
) -> Result<GetProvisionedConcurrencyConfigResponse> {
    let mut conf = StateChange::new(
        &[ProvisionedConcurrencyStatus::InProgress],
        &[ProvisionedConcurrencyStatus::Ready],
        timeout,
    );
    conf.set_failure(&[ProvisionedConcurrencyStatus::Failed]);
    let observation = conf
        .wait(|| async move {
            observe_config(find_provisioned_concurrency_config(function_name, qualifier).await?)
        })
        .await?;
    Ok(observation.snapshot)
}

/// Allocates provisioned concurrency for a function qualifier and blocks
/// until every execution environment is warm.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
/// * `qualifier` - The version number or alias to keep warm.
/// * `executions` - The number of execution environments to allocate.
///
/// # Returns
/// The READY config, including the allocated environment count.
pub async fn put_provisioned_concurrency(
    function_name: &str,
    qualifier: &str,
    executions: i64,
) -> Result<GetProvisionedConcurrencyConfigResponse> {
    PERCH_LAMBDA_CLIENT
        .put_provisioned_concurrency_config(PutProvisionedConcurrencyConfigRequest {
            function_name: function_name.to_owned(),
            provisioned_concurrent_executions: executions,
            qualifier: qualifier.to_owned(),
        })
        .await
        .map_err(|e| PerchError::AWS(e.to_string()))?;

    info!(
        "requested {} provisioned executions for {}:{}, waiting for READY",
        executions, function_name, qualifier
    );

    wait_provisioned_concurrency_ready(
        function_name,
        qualifier,
        *PERCH_PROVISIONED_CONCURRENCY_TIMEOUT,
    )
    .await
}

/// Releases the provisioned concurrency of a function qualifier. Deleting a
/// config that is already gone is not an error.
pub async fn delete_provisioned_concurrency(function_name: &str, qualifier: &str) -> Result<()> {
    match PERCH_LAMBDA_CLIENT
        .delete_provisioned_concurrency_config(DeleteProvisionedConcurrencyConfigRequest {
            function_name: function_name.to_owned(),
            qualifier:     qualifier.to_owned(),
        })
        .await
    {
        Ok(()) => Ok(()),
        Err(RusotoError::Service(DeleteProvisionedConcurrencyConfigError::ResourceNotFound(
            _,
        ))) => Ok(()),
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::tests::{scripted, Step};

    #[tokio::test]
    async fn statuses_round_trip() -> Result<()> {
        for status in [
            ProvisionedConcurrencyStatus::InProgress,
            ProvisionedConcurrencyStatus::Ready,
            ProvisionedConcurrencyStatus::Failed,
        ] {
            assert_eq!(
                status.as_str().parse::<ProvisionedConcurrencyStatus>()?,
                status
            );
        }
        // The API spells these in SCREAMING_SNAKE_CASE, unlike every other
        // Lambda status vocabulary.
        assert!("Ready".parse::<ProvisionedConcurrencyStatus>().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn failed_allocation_surfaces_the_status_reason() -> Result<()> {
        let mut conf = StateChange::new(
            &[ProvisionedConcurrencyStatus::InProgress],
            &[ProvisionedConcurrencyStatus::Ready],
            Duration::from_secs(600),
        );
        conf.set_failure(&[ProvisionedConcurrencyStatus::Failed])
            .set_delay(Duration::from_millis(5));

        let (refresh, _) = scripted(vec![
            Step::Status(ProvisionedConcurrencyStatus::InProgress),
            Step::StatusWithReason(
                ProvisionedConcurrencyStatus::Failed,
                "account concurrency limit exceeded",
            ),
        ]);
        let err = conf.wait(refresh).await.unwrap_err();
        match err {
            PerchError::FailureState { status, reason } => {
                assert_eq!(status, "FAILED");
                assert_eq!(reason.as_deref(), Some("account concurrency limit exceeded"));
            }
            other => panic!("expected FailureState, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn observe_config_parses_the_status() -> Result<()> {
        let config = GetProvisionedConcurrencyConfigResponse {
            status: Some("IN_PROGRESS".to_string()),
            requested_provisioned_concurrent_executions: Some(10),
            ..Default::default()
        };
        let observation = observe_config(config)?;
        assert_eq!(observation.status, ProvisionedConcurrencyStatus::InProgress);
        assert!(observation.reason.is_none());
        Ok(())
    }
}
