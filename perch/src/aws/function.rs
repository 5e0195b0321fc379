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

//! This crate contains all wrapped functions of the AWS Lambda function
//! lifecycle.
//!
//! A function passes through two independent status machines: `State`
//! (Pending until the first create finishes, then Active) and
//! `LastUpdateStatus` (InProgress while a configuration or code update is
//! applied, then Successful). Create and update calls return before either
//! machine has settled, so every mutating operation here ends with a
//! convergence wait.

use crate::configs::*;
use crate::error::{PerchError, Result};
use crate::state::{retry_when, Observation, StateChange};
use bytes::Bytes;
use log::{debug, info};
use rusoto_core::RusotoError;
use rusoto_lambda::{
    CreateFunctionError, CreateFunctionRequest, DeleteFunctionError, DeleteFunctionRequest,
    FunctionConfiguration, GetFunctionError, GetFunctionRequest, InvocationRequest,
    InvocationResponse, Lambda, PutFunctionConcurrencyRequest, UpdateFunctionCodeError,
    UpdateFunctionCodeRequest,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The lifecycle state of a Lambda function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionState {
    /// The first create is still provisioning resources for the function.
    Pending,
    /// The function is ready to be invoked.
    Active,
    /// The function has been idle long enough for Lambda to reclaim its
    /// resources; the next invocation reactivates it.
    Inactive,
    /// Provisioning failed; the reason fields carry the cause.
    Failed,
}

impl FunctionState {
    fn as_str(&self) -> &'static str {
        match self {
            FunctionState::Pending => "Pending",
            FunctionState::Active => "Active",
            FunctionState::Inactive => "Inactive",
            FunctionState::Failed => "Failed",
        }
    }
}

impl FromStr for FunctionState {
    type Err = PerchError;

    fn from_str(s: &str) -> Result<FunctionState> {
        match s {
            "Pending" => Ok(FunctionState::Pending),
            "Active" => Ok(FunctionState::Active),
            "Inactive" => Ok(FunctionState::Inactive),
            "Failed" => Ok(FunctionState::Failed),
            other => Err(PerchError::UnexpectedState {
                status: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FunctionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The status of the most recent update to a Lambda function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastUpdateStatus {
    /// The update is still being applied.
    InProgress,
    /// The update has been applied.
    Successful,
    /// The update failed; the reason fields carry the cause.
    Failed,
}

impl LastUpdateStatus {
    fn as_str(&self) -> &'static str {
        match self {
            LastUpdateStatus::InProgress => "InProgress",
            LastUpdateStatus::Successful => "Successful",
            LastUpdateStatus::Failed => "Failed",
        }
    }
}

impl FromStr for LastUpdateStatus {
    type Err = PerchError;

    fn from_str(s: &str) -> Result<LastUpdateStatus> {
        match s {
            "InProgress" => Ok(LastUpdateStatus::InProgress),
            "Successful" => Ok(LastUpdateStatus::Successful),
            "Failed" => Ok(LastUpdateStatus::Failed),
            other => Err(PerchError::UnexpectedState {
                status: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LastUpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fetches the current description of a function.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
///
/// # Returns
/// The function's configuration, or [PerchError::NotFound] if no function
/// with this name exists.
pub async fn find_function(function_name: &str) -> Result<FunctionConfiguration> {
    match PERCH_LAMBDA_CLIENT
        .get_function(GetFunctionRequest {
            function_name: function_name.to_owned(),
            ..Default::default()
        })
        .await
    {
        Ok(resp) => resp
            .configuration
            .ok_or_else(|| PerchError::AWS("GetFunction returned no configuration".to_string())),
        Err(RusotoError::Service(GetFunctionError::ResourceNotFound(_))) => Err(
            PerchError::NotFound(format!("function {}", function_name)),
        ),
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}

fn reason_with_code(code: Option<&str>, reason: Option<&str>) -> Option<String> {
    match (code, reason) {
        (Some(code), Some(reason)) => Some(format!("{}: {}", code, reason)),
        (None, Some(reason)) => Some(reason.to_string()),
        (Some(code), None) => Some(code.to_string()),
        (None, None) => None,
    }
}

fn observe_state(
    configuration: FunctionConfiguration,
) -> Result<Observation<FunctionConfiguration, FunctionState>> {
    let status = configuration
        .state
        .as_deref()
        .unwrap_or("")
        .parse::<FunctionState>()?;
    let reason = reason_with_code(
        configuration.state_reason_code.as_deref(),
        configuration.state_reason.as_deref(),
    );
    Ok(Observation {
        snapshot: configuration,
        status,
        reason,
    })
}

fn observe_last_update(
    configuration: FunctionConfiguration,
) -> Result<Observation<FunctionConfiguration, LastUpdateStatus>> {
    let status = configuration
        .last_update_status
        .as_deref()
        .unwrap_or("")
        .parse::<LastUpdateStatus>()?;
    let reason = reason_with_code(
        configuration.last_update_status_reason_code.as_deref(),
        configuration.last_update_status_reason.as_deref(),
    );
    Ok(Observation {
        snapshot: configuration,
        status,
        reason,
    })
}

/// Blocks until a newly created function leaves Pending and becomes Active.
pub async fn wait_function_active(
    function_name: &str,
    timeout: Duration,
) -> Result<FunctionConfiguration> {
    let mut conf = StateChange::new(
        &[FunctionState::Pending],
        &[FunctionState::Active],
        timeout,
    );
    conf.set_failure(&[FunctionState::Failed]);
    let observation = conf
        .wait(|| async move { observe_state(find_function(function_name).await?) })
        .await?;
    Ok(observation.snapshot)
}

/// Blocks until the function's most recent update has been applied.
pub async fn wait_function_updated(
    function_name: &str,
    timeout: Duration,
) -> Result<FunctionConfiguration> {
    let mut conf = StateChange::new(
        &[LastUpdateStatus::InProgress],
        &[LastUpdateStatus::Successful],
        timeout,
    );
    conf.set_failure(&[LastUpdateStatus::Failed]);
    let observation = conf
        .wait(|| async move { observe_last_update(find_function(function_name).await?) })
        .await?;
    Ok(observation.snapshot)
}

const THROTTLED_BY_EC2: &str = "throttled by EC2";

// Lambda reports IAM and KMS propagation lag as plain parameter-validation
// errors; only the message text distinguishes them from a genuinely bad
// request.
const PROPAGATION_MESSAGES: [&str; 4] = [
    "The role defined for the function cannot be assumed by Lambda",
    "The provided execution role does not have permissions",
    THROTTLED_BY_EC2,
    "Lambda was unable to configure access to your environment variables because the KMS key is invalid for CreateGrant",
];

pub(crate) fn eventually_consistent(message: &str) -> bool {
    PROPAGATION_MESSAGES.iter().any(|m| message.contains(m))
}

fn retryable_create(err: &RusotoError<CreateFunctionError>) -> bool {
    match err {
        RusotoError::Service(CreateFunctionError::ResourceConflict(_)) => true,
        RusotoError::Service(CreateFunctionError::InvalidParameterValue(msg)) => {
            eventually_consistent(msg)
        }
        _ => false,
    }
}

fn create_throttled(err: &RusotoError<CreateFunctionError>) -> bool {
    matches!(
        err,
        RusotoError::Service(CreateFunctionError::InvalidParameterValue(msg))
            if msg.contains(THROTTLED_BY_EC2)
    )
}

fn retryable_update(err: &RusotoError<UpdateFunctionCodeError>) -> bool {
    match err {
        RusotoError::Service(UpdateFunctionCodeError::ResourceConflict(_)) => true,
        RusotoError::Service(UpdateFunctionCodeError::InvalidParameterValue(msg)) => {
            eventually_consistent(msg)
        }
        _ => false,
    }
}

/// Creates a single lambda function and blocks until it is Active.
///
/// The create call is retried while Lambda reports IAM propagation lag or a
/// conflicting in-flight operation; functions attached to a VPC occasionally
/// hit EC2 throttling during ENI setup and get an extended retry budget of
/// their own.
///
/// # Arguments
/// * `spec` - The function description, see [FunctionSpec].
///
/// # Returns
/// The configuration of the Active function.
pub async fn create_function(spec: &FunctionSpec) -> Result<FunctionConfiguration> {
    let request = CreateFunctionRequest {
        architectures: spec.architectures.clone(),
        code: spec.code.clone(),
        environment: spec.environment.clone(),
        function_name: spec.function_name.clone(),
        handler: spec.handler.clone(),
        memory_size: spec.memory_size,
        role: spec.role.clone(),
        runtime: spec.runtime.clone(),
        timeout: spec.timeout,
        vpc_config: spec.vpc_config.clone(),
        ..Default::default()
    };

    let mut created = retry_when(
        *PERCH_PROPAGATION_TIMEOUT,
        *PERCH_POLL_INTERVAL,
        || PERCH_LAMBDA_CLIENT.create_function(request.clone()),
        retryable_create,
    )
    .await;

    // Additional retries when throttled.
    if created.as_ref().err().map_or(false, create_throttled) {
        created = retry_when(
            *PERCH_EXTRA_THROTTLING_TIMEOUT,
            *PERCH_POLL_INTERVAL,
            || PERCH_LAMBDA_CLIENT.create_function(request.clone()),
            create_throttled,
        )
        .await;
    }

    let configuration = created.map_err(|e| PerchError::AWS(e.to_string()))?;
    info!(
        "created function {:?}, waiting for it to become Active",
        configuration.function_name
    );

    wait_function_active(&spec.function_name, *PERCH_FUNCTION_CREATE_TIMEOUT).await
}

/// Points an existing function at a new deployment package in S3 and blocks
/// until the update has been applied.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
/// * `s3_key` - The key of the staged deployment package.
pub async fn update_function_code(
    function_name: &str,
    s3_key: &str,
) -> Result<FunctionConfiguration> {
    let request = UpdateFunctionCodeRequest {
        function_name: function_name.to_owned(),
        s3_bucket: Some(PERCH_S3_BUCKET.clone()),
        s3_key: Some(s3_key.to_owned()),
        ..Default::default()
    };

    retry_when(
        *PERCH_PROPAGATION_TIMEOUT,
        *PERCH_POLL_INTERVAL,
        || PERCH_LAMBDA_CLIENT.update_function_code(request.clone()),
        retryable_update,
    )
    .await
    .map_err(|e| PerchError::AWS(e.to_string()))?;

    info!("updated code of function {}, waiting for the update to land", function_name);

    wait_function_updated(function_name, *PERCH_FUNCTION_UPDATE_TIMEOUT).await
}

/// Creates the function described by `spec`, or refreshes its code if a
/// function with that name already exists.
pub async fn deploy_function(spec: &FunctionSpec) -> Result<FunctionConfiguration> {
    match find_function(&spec.function_name).await {
        Ok(_) => {
            let s3_key = spec
                .code
                .s3_key
                .clone()
                .ok_or_else(|| PerchError::Internal("function spec has no S3 key".to_string()))?;
            update_function_code(&spec.function_name, &s3_key).await
        }
        Err(PerchError::NotFound(_)) => create_function(spec).await,
        Err(e) => Err(e),
    }
}

/// Deletes a lambda function. Deleting a function that is already gone is
/// not an error.
pub async fn delete_function(function_name: &str) -> Result<()> {
    match PERCH_LAMBDA_CLIENT
        .delete_function(DeleteFunctionRequest {
            function_name: function_name.to_owned(),
            ..Default::default()
        })
        .await
    {
        Ok(()) => Ok(()),
        Err(RusotoError::Service(DeleteFunctionError::ResourceNotFound(_))) => {
            debug!("function {} was already deleted", function_name);
            Ok(())
        }
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}

/// Sets the lambda function's reserved concurrency.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
/// * `concurrency` - The concurrency of the lambda function.
///
/// <https://docs.aws.amazon.com/lambda/latest/dg/configuration-concurrency.html>
pub async fn set_concurrency(function_name: &str, concurrency: i64) -> Result<()> {
    let request = PutFunctionConcurrencyRequest {
        function_name:                  function_name.to_owned(),
        reserved_concurrent_executions: concurrency,
    };
    let concurrency = PERCH_LAMBDA_CLIENT
        .put_function_concurrency(request)
        .await
        .map_err(|e| PerchError::AWS(e.to_string()))?;
    assert_ne!(concurrency.reserved_concurrent_executions, Some(0));
    Ok(())
}

/// Invokes the lambda function with the given payload.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
/// * `payload` - The payload to be passed to the lambda function.
/// * `invocation_type` - The invocation type of the lambda function.
///   - `Event`: Asynchronous invocation.
///   - `RequestResponse`: Synchronous invocation.
///
/// # Returns
/// The result of the invocation.
pub async fn invoke_function(
    function_name: &str,
    invocation_type: &str,
    payload: Option<Bytes>,
) -> Result<InvocationResponse> {
    let request = InvocationRequest {
        function_name: function_name.to_owned(),
        invocation_type: Some(invocation_type.to_owned()),
        payload,
        ..Default::default()
    };

    if invocation_type == *PERCH_LAMBDA_ASYNC_CALL {
        let response = PERCH_LAMBDA_CLIENT
            .invoke(request)
            .await
            .map_err(|e| PerchError::AWS(e.to_string()))?;
        Ok(response)
    } else {
        // Error retries and exponential backoff in AWS Lambda
        let mut retries = 0;
        loop {
            match PERCH_LAMBDA_CLIENT
                .invoke(request.clone())
                .await
                .map_err(|e| PerchError::AWS(e.to_string()))
            {
                Ok(response) => {
                    if response.function_error.is_none() {
                        return Ok(response);
                    } else {
                        info!(
                            "Function execution error: {}, details: {:?}",
                            response.function_error.unwrap(),
                            response.payload
                        );
                    }
                }
                Err(e) => {
                    info!("Function invocation error: {}", e);
                }
            }

            info!("Retrying {} function invocation...", function_name);
            tokio::time::sleep(Duration::from_millis(2_u64.pow(retries) * 100)).await;
            retries += 1;

            if retries as usize > *PERCH_LAMBDA_MAX_RETRIES {
                return Err(PerchError::AWS(format!(
                    "Sync invocation failed after {} retries",
                    *PERCH_LAMBDA_MAX_RETRIES
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    #[tokio::test]
    async fn function_states_round_trip() -> Result<()> {
        for state in [
            FunctionState::Pending,
            FunctionState::Active,
            FunctionState::Inactive,
            FunctionState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<FunctionState>()?, state);
        }
        assert!("Dormant".parse::<FunctionState>().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn update_statuses_round_trip() -> Result<()> {
        for status in [
            LastUpdateStatus::InProgress,
            LastUpdateStatus::Successful,
            LastUpdateStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<LastUpdateStatus>()?, status);
        }
        assert!("".parse::<LastUpdateStatus>().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn reasons_prefix_the_code() -> Result<()> {
        assert_eq!(
            reason_with_code(Some("InvalidSubnet"), Some("subnet is being deleted")),
            Some("InvalidSubnet: subnet is being deleted".to_string())
        );
        assert_eq!(
            reason_with_code(None, Some("subnet is being deleted")),
            Some("subnet is being deleted".to_string())
        );
        assert_eq!(
            reason_with_code(Some("InvalidSubnet"), None),
            Some("InvalidSubnet".to_string())
        );
        assert_eq!(reason_with_code(None, None), None);
        Ok(())
    }

    #[tokio::test]
    async fn observe_state_carries_the_failure_reason() -> Result<()> {
        let configuration = FunctionConfiguration {
            state: Some("Failed".to_string()),
            state_reason: Some("Creating the network interface failed".to_string()),
            state_reason_code: Some("InsufficientRolePermissions".to_string()),
            ..Default::default()
        };

        let observation = observe_state(configuration)?;
        assert_eq!(observation.status, FunctionState::Failed);
        assert_eq!(
            observation.reason.as_deref(),
            Some("InsufficientRolePermissions: Creating the network interface failed")
        );
        Ok(())
    }

    #[tokio::test]
    async fn propagation_lag_is_retryable() -> Result<()> {
        for message in [
            "The role defined for the function cannot be assumed by Lambda.",
            "The provided execution role does not have permissions to call CreateNetworkInterface on EC2",
            "Your request has been throttled by EC2, please make sure you have enough API rate limit.",
            "Lambda was unable to configure access to your environment variables because the KMS key is invalid for CreateGrant",
        ] {
            assert!(eventually_consistent(message), "should retry: {}", message);
        }
        assert!(!eventually_consistent("Function not found"));
        Ok(())
    }

    #[tokio::test]
    async fn conflicts_are_retryable_by_kind_not_message() -> Result<()> {
        assert!(retryable_create(&RusotoError::Service(
            CreateFunctionError::ResourceConflict("operation in progress".to_string()),
        )));
        assert!(!retryable_create(&RusotoError::Service(
            CreateFunctionError::InvalidParameterValue("bad handler".to_string()),
        )));
        assert!(retryable_update(&RusotoError::Service(
            UpdateFunctionCodeError::InvalidParameterValue(
                "The role defined for the function cannot be assumed by Lambda.".to_string(),
            ),
        )));
        assert!(!retryable_update(&RusotoError::Service(
            UpdateFunctionCodeError::CodeStorageExceeded("over quota".to_string()),
        )));
        Ok(())
    }

    #[tokio::test]
    async fn only_ec2_throttling_extends_the_budget() -> Result<()> {
        assert!(create_throttled(&RusotoError::Service(
            CreateFunctionError::InvalidParameterValue(
                "Your request has been throttled by EC2".to_string(),
            ),
        )));
        assert!(!create_throttled(&RusotoError::Service(
            CreateFunctionError::ResourceConflict("operation in progress".to_string()),
        )));
        Ok(())
    }
}
