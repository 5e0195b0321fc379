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

//! This crate contains all wrapped functions of the AWS Lambda event source
//! mappings.
//!
//! An event source mapping reads from a stream or queue (Kinesis, DynamoDB
//! streams, SQS, MSK, ...) and invokes a function with the records it
//! gathers. Mappings converge slowly: a create passes through `Creating`
//! before it reaches `Enabled` or `Disabled`, an update passes through
//! `Updating`, and a delete lingers in `Deleting` before the mapping
//! disappears altogether. When a transition fails, the cause is only
//! surfaced as the mapping's free-text `state_transition_reason`.

use crate::aws::function::eventually_consistent;
use crate::configs::*;
use crate::error::{PerchError, Result};
use crate::state::{retry_when, Observation, StateChange};
use log::info;
use rusoto_core::RusotoError;
use rusoto_lambda::{
    CreateEventSourceMappingError, CreateEventSourceMappingRequest,
    DeleteEventSourceMappingError, DeleteEventSourceMappingRequest,
    EventSourceMappingConfiguration, GetEventSourceMappingError, GetEventSourceMappingRequest,
    Lambda, UpdateEventSourceMappingError, UpdateEventSourceMappingRequest,
};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The lifecycle state of an event source mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingState {
    /// The mapping is being created.
    Creating,
    /// The mapping is transitioning to Enabled.
    Enabling,
    /// The mapping is polling its source and invoking the function.
    Enabled,
    /// The mapping is transitioning to Disabled.
    Disabling,
    /// The mapping exists but does not poll its source.
    Disabled,
    /// A configuration update is being applied.
    Updating,
    /// The mapping is being removed.
    Deleting,
}

impl MappingState {
    fn as_str(&self) -> &'static str {
        match self {
            MappingState::Creating => "Creating",
            MappingState::Enabling => "Enabling",
            MappingState::Enabled => "Enabled",
            MappingState::Disabling => "Disabling",
            MappingState::Disabled => "Disabled",
            MappingState::Updating => "Updating",
            MappingState::Deleting => "Deleting",
        }
    }
}

impl FromStr for MappingState {
    type Err = PerchError;

    fn from_str(s: &str) -> Result<MappingState> {
        match s {
            "Creating" => Ok(MappingState::Creating),
            "Enabling" => Ok(MappingState::Enabling),
            "Enabled" => Ok(MappingState::Enabled),
            "Disabling" => Ok(MappingState::Disabling),
            "Disabled" => Ok(MappingState::Disabled),
            "Updating" => Ok(MappingState::Updating),
            "Deleting" => Ok(MappingState::Deleting),
            other => Err(PerchError::UnexpectedState {
                status: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for MappingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fetches the current description of an event source mapping.
///
/// # Arguments
/// * `uuid` - The identifier Lambda assigned to the mapping on creation.
pub async fn find_event_source_mapping(uuid: &str) -> Result<EventSourceMappingConfiguration> {
    match PERCH_LAMBDA_CLIENT
        .get_event_source_mapping(GetEventSourceMappingRequest {
            uuid: uuid.to_owned(),
        })
        .await
    {
        Ok(mapping) => Ok(mapping),
        Err(RusotoError::Service(GetEventSourceMappingError::ResourceNotFound(_))) => Err(
            PerchError::NotFound(format!("event source mapping {}", uuid)),
        ),
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}

fn observe_mapping(
    mapping: EventSourceMappingConfiguration,
) -> Result<Observation<EventSourceMappingConfiguration, MappingState>> {
    let status = mapping
        .state
        .as_deref()
        .unwrap_or("")
        .parse::<MappingState>()?;
    let reason = mapping.state_transition_reason.clone();
    Ok(Observation {
        snapshot: mapping,
        status,
        reason,
    })
}

/// Blocks until a newly created mapping settles.
///
/// The target depends on the requested `enabled` flag, so both Enabled and
/// Disabled count as converged.
pub async fn wait_mapping_created(
    uuid: &str,
    timeout: Duration,
) -> Result<EventSourceMappingConfiguration> {
    let conf = StateChange::new(
        &[
            MappingState::Creating,
            MappingState::Enabling,
            MappingState::Disabling,
        ],
        &[MappingState::Enabled, MappingState::Disabled],
        timeout,
    );
    let observation = conf
        .wait(|| async move { observe_mapping(find_event_source_mapping(uuid).await?) })
        .await?;
    Ok(observation.snapshot)
}

/// Blocks until an updated mapping settles back into Enabled or Disabled.
pub async fn wait_mapping_updated(
    uuid: &str,
    timeout: Duration,
) -> Result<EventSourceMappingConfiguration> {
    let conf = StateChange::new(
        &[
            MappingState::Enabling,
            MappingState::Disabling,
            MappingState::Updating,
        ],
        &[MappingState::Enabled, MappingState::Disabled],
        timeout,
    );
    let observation = conf
        .wait(|| async move { observe_mapping(find_event_source_mapping(uuid).await?) })
        .await?;
    Ok(observation.snapshot)
}

/// Blocks until a deleted mapping is fully gone.
pub async fn wait_mapping_deleted(uuid: &str, timeout: Duration) -> Result<()> {
    let conf = StateChange::new(&[MappingState::Deleting], &[], timeout);
    conf.wait_removed(|| async move { observe_mapping(find_event_source_mapping(uuid).await?) })
        .await?;
    Ok(())
}

fn retryable_mapping_create(err: &RusotoError<CreateEventSourceMappingError>) -> bool {
    match err {
        RusotoError::Service(CreateEventSourceMappingError::ResourceConflict(_)) => true,
        RusotoError::Service(CreateEventSourceMappingError::InvalidParameterValue(msg)) => {
            eventually_consistent(msg)
        }
        _ => false,
    }
}

fn retryable_mapping_update(err: &RusotoError<UpdateEventSourceMappingError>) -> bool {
    matches!(
        err,
        RusotoError::Service(UpdateEventSourceMappingError::ResourceInUse(_))
            | RusotoError::Service(UpdateEventSourceMappingError::ResourceConflict(_))
    )
}

fn retryable_mapping_delete(err: &RusotoError<DeleteEventSourceMappingError>) -> bool {
    matches!(
        err,
        RusotoError::Service(DeleteEventSourceMappingError::ResourceInUse(_))
    )
}

/// Creates an event source mapping and blocks until it settles.
///
/// Like function creation, mapping creation trips over IAM eventual
/// consistency when the function's execution role was just granted access to
/// the source stream; those errors are retried.
///
/// # Arguments
/// * `request` - The mapping description (source ARN, function, batch size,
///   enabled flag, ...).
///
/// # Returns
/// The settled mapping, in state Enabled or Disabled.
pub async fn create_event_source_mapping(
    request: &CreateEventSourceMappingRequest,
) -> Result<EventSourceMappingConfiguration> {
    let created = retry_when(
        *PERCH_PROPAGATION_TIMEOUT,
        *PERCH_POLL_INTERVAL,
        || PERCH_LAMBDA_CLIENT.create_event_source_mapping(request.clone()),
        retryable_mapping_create,
    )
    .await
    .map_err(|e| PerchError::AWS(e.to_string()))?;

    let uuid = created.uuid.clone().ok_or_else(|| {
        PerchError::AWS("CreateEventSourceMapping returned no UUID".to_string())
    })?;
    info!("created event source mapping {}, waiting for it to settle", uuid);

    wait_mapping_created(&uuid, *PERCH_MAPPING_CREATE_TIMEOUT).await
}

/// Applies a configuration change to a mapping and blocks until it settles.
///
/// Lambda serializes mapping mutations; a mapping still converging from an
/// earlier change answers with `ResourceInUseException`, which is retried
/// rather than surfaced.
pub async fn update_event_source_mapping(
    request: &UpdateEventSourceMappingRequest,
) -> Result<EventSourceMappingConfiguration> {
    retry_when(
        *PERCH_PROPAGATION_TIMEOUT,
        *PERCH_POLL_INTERVAL,
        || PERCH_LAMBDA_CLIENT.update_event_source_mapping(request.clone()),
        retryable_mapping_update,
    )
    .await
    .map_err(|e| PerchError::AWS(e.to_string()))?;

    info!("updated event source mapping {}, waiting for it to settle", request.uuid);

    wait_mapping_updated(&request.uuid, *PERCH_MAPPING_UPDATE_TIMEOUT).await
}

/// Deletes an event source mapping and blocks until it is gone. Deleting a
/// mapping that is already gone is not an error.
pub async fn delete_event_source_mapping(uuid: &str) -> Result<()> {
    let deleted = retry_when(
        *PERCH_PROPAGATION_TIMEOUT,
        *PERCH_POLL_INTERVAL,
        || {
            PERCH_LAMBDA_CLIENT.delete_event_source_mapping(DeleteEventSourceMappingRequest {
                uuid: uuid.to_owned(),
            })
        },
        retryable_mapping_delete,
    )
    .await;

    match deleted {
        Ok(_) => {}
        Err(RusotoError::Service(DeleteEventSourceMappingError::ResourceNotFound(_))) => {
            return Ok(())
        }
        Err(e) => return Err(PerchError::AWS(e.to_string())),
    }

    info!("deleted event source mapping {}, waiting for it to disappear", uuid);

    wait_mapping_deleted(uuid, *PERCH_MAPPING_DELETE_TIMEOUT).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::tests::{scripted, Step};

    #[tokio::test]
    async fn mapping_states_round_trip() -> Result<()> {
        for state in [
            MappingState::Creating,
            MappingState::Enabling,
            MappingState::Enabled,
            MappingState::Disabling,
            MappingState::Disabled,
            MappingState::Updating,
            MappingState::Deleting,
        ] {
            assert_eq!(state.as_str().parse::<MappingState>()?, state);
        }
        assert!("Frozen".parse::<MappingState>().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn observe_mapping_keeps_the_transition_reason() -> Result<()> {
        let mapping = EventSourceMappingConfiguration {
            state: Some("Disabling".to_string()),
            state_transition_reason: Some("ESM is disabled by user".to_string()),
            ..Default::default()
        };

        let observation = observe_mapping(mapping)?;
        assert_eq!(observation.status, MappingState::Disabling);
        assert_eq!(observation.reason.as_deref(), Some("ESM is disabled by user"));
        Ok(())
    }

    #[tokio::test]
    async fn create_wait_accepts_enabled_and_disabled() -> Result<()> {
        let mut conf = StateChange::new(
            &[
                MappingState::Creating,
                MappingState::Enabling,
                MappingState::Disabling,
            ],
            &[MappingState::Enabled, MappingState::Disabled],
            Duration::from_secs(600),
        );
        conf.set_delay(Duration::from_millis(5));

        let (refresh, fetches) = scripted(vec![
            Step::Status(MappingState::Creating),
            Step::Status(MappingState::Creating),
            Step::Status(MappingState::Enabled),
        ]);
        let observation = conf.wait(refresh).await?;
        assert_eq!(observation.status, MappingState::Enabled);
        assert_eq!(fetches.get(), 3);

        let (refresh, _) = scripted(vec![Step::Status(MappingState::Disabled)]);
        let observation = conf.wait(refresh).await?;
        assert_eq!(observation.status, MappingState::Disabled);
        Ok(())
    }

    #[tokio::test]
    async fn delete_wait_rejects_a_mapping_that_settles_back() -> Result<()> {
        let mut conf = StateChange::new(&[MappingState::Deleting], &[], Duration::from_secs(600));
        conf.set_delay(Duration::from_millis(5));

        let (refresh, _) = scripted(vec![
            Step::Status(MappingState::Deleting),
            Step::Status(MappingState::Enabled),
        ]);
        let err = conf.wait_removed(refresh).await.unwrap_err();
        assert!(matches!(err, PerchError::UnexpectedState { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn mutation_conflicts_are_retryable_by_kind() -> Result<()> {
        assert!(retryable_mapping_update(&RusotoError::Service(
            UpdateEventSourceMappingError::ResourceInUse("still updating".to_string()),
        )));
        assert!(retryable_mapping_delete(&RusotoError::Service(
            DeleteEventSourceMappingError::ResourceInUse("still updating".to_string()),
        )));
        assert!(!retryable_mapping_delete(&RusotoError::Service(
            DeleteEventSourceMappingError::InvalidParameterValue("bad uuid".to_string()),
        )));
        assert!(retryable_mapping_create(&RusotoError::Service(
            CreateEventSourceMappingError::InvalidParameterValue(
                "The provided execution role does not have permissions".to_string(),
            ),
        )));
        Ok(())
    }
}
