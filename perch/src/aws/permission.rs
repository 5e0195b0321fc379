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

//! This crate contains all wrapped functions of the AWS Lambda resource
//! policies.
//!
//! A function's resource policy is a single JSON document; each permission
//! granted to an event source or account is one statement in it, keyed by
//! its `Sid`. The API never returns individual permissions, so reading one
//! back means fetching the whole policy and digging the statement out.

use crate::configs::*;
use crate::error::{PerchError, Result};
use log::debug;
use rusoto_core::RusotoError;
use rusoto_lambda::{
    AddPermissionRequest, GetPolicyError, GetPolicyRequest, Lambda, RemovePermissionError,
    RemovePermissionRequest,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A function's resource policy document.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Policy {
    /// The policy language version.
    #[serde(default)]
    pub version:   String,
    /// The document identifier, `default` unless overridden.
    #[serde(default)]
    pub id:        String,
    /// One statement per granted permission.
    pub statement: Vec<PolicyStatement>,
}

/// One permission inside a [Policy].
///
/// `Principal` is either a bare string (`"*"`) or an object keyed by
/// principal type (`{"Service": "events.amazonaws.com"}`), so it stays a raw
/// JSON value here; [PolicyStatement::principal_service] normalizes the
/// common cases.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    /// The statement identifier, unique within the policy.
    #[serde(default)]
    pub sid:       String,
    /// Allow or Deny.
    #[serde(default)]
    pub effect:    String,
    /// The Lambda action the statement grants, e.g. `lambda:InvokeFunction`.
    #[serde(default)]
    pub action:    String,
    /// The ARN of the function (and qualifier) the statement applies to.
    #[serde(default)]
    pub resource:  String,
    /// Who is granted the action.
    #[serde(default)]
    pub principal: Value,
    /// Condition operators keyed by operator name, then by context key.
    #[serde(default)]
    pub condition: HashMap<String, HashMap<String, String>>,
}

impl PolicyStatement {
    /// Returns the principal as a plain string: either the bare principal
    /// (`"*"`) or the value of its `Service` key.
    pub fn principal_service(&self) -> Option<&str> {
        match &self.principal {
            Value::String(s) => Some(s),
            Value::Object(map) => map.get("Service").and_then(Value::as_str),
            _ => None,
        }
    }
}

/// Extracts the alias or version qualifier from a qualified function ARN.
///
/// # Arguments
/// * `arn` - e.g. `arn:aws:lambda:us-west-2:123456789012:function:name:live`.
pub fn qualifier_from_arn(arn: &str) -> Result<String> {
    let fields: Vec<&str> = arn.split(':').collect();
    match fields.get(7) {
        Some(qualifier) if !qualifier.is_empty() => Ok((*qualifier).to_string()),
        _ => Err(PerchError::Internal(format!(
            "ARN has no alias or version qualifier: {}",
            arn
        ))),
    }
}

/// Extracts the function name from a function ARN, qualified or not.
pub fn function_name_from_arn(arn: &str) -> Result<String> {
    let fields: Vec<&str> = arn.split(':').collect();
    match fields.get(6) {
        Some(name) if !name.is_empty() => Ok((*name).to_string()),
        _ => Err(PerchError::Internal(format!(
            "ARN carries no function name: {}",
            arn
        ))),
    }
}

/// Fetches and parses the resource policy of a function qualifier.
///
/// # Arguments
/// * `function_name` - The name of the lambda function.
/// * `qualifier` - An optional version or alias to scope the policy to.
///
/// # Returns
/// The parsed policy, or [PerchError::NotFound] if the function has none.
pub async fn get_policy(function_name: &str, qualifier: Option<&str>) -> Result<Policy> {
    match PERCH_LAMBDA_CLIENT
        .get_policy(GetPolicyRequest {
            function_name: function_name.to_owned(),
            qualifier:     qualifier.map(str::to_owned),
        })
        .await
    {
        Ok(resp) => {
            let document = resp.policy.ok_or_else(|| {
                PerchError::NotFound(format!("policy of function {}", function_name))
            })?;
            Ok(serde_json::from_str::<Policy>(&document)?)
        }
        Err(RusotoError::Service(GetPolicyError::ResourceNotFound(_))) => Err(
            PerchError::NotFound(format!("policy of function {}", function_name)),
        ),
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}

/// Locates a statement by its Sid.
///
/// # Returns
/// The statement, or [PerchError::NotFound], so a caller waiting for a
/// permission to be revoked can treat the missing statement as convergence.
pub fn find_policy_statement<'a>(policy: &'a Policy, sid: &str) -> Result<&'a PolicyStatement> {
    debug!("looking for statement {} in policy {}", sid, policy.id);
    policy
        .statement
        .iter()
        .find(|statement| statement.sid == sid)
        .ok_or_else(|| PerchError::NotFound(format!("policy statement {}", sid)))
}

/// Fetches one permission statement of a function qualifier.
pub async fn find_permission(
    function_name: &str,
    qualifier: Option<&str>,
    sid: &str,
) -> Result<PolicyStatement> {
    let policy = get_policy(function_name, qualifier).await?;
    Ok(find_policy_statement(&policy, sid)?.clone())
}

/// Grants an event source or account permission to invoke a function.
///
/// # Arguments
/// * `request` - The permission to grant; `statement_id` becomes the Sid of
///   the new policy statement.
///
/// # Returns
/// The statement as Lambda recorded it.
pub async fn add_permission(request: AddPermissionRequest) -> Result<PolicyStatement> {
    let resp = PERCH_LAMBDA_CLIENT
        .add_permission(request)
        .await
        .map_err(|e| PerchError::AWS(e.to_string()))?;

    let statement = resp
        .statement
        .ok_or_else(|| PerchError::AWS("AddPermission returned no statement".to_string()))?;
    Ok(serde_json::from_str::<PolicyStatement>(&statement)?)
}

/// Revokes a permission statement. Removing a statement that is already gone
/// is not an error.
pub async fn remove_permission(
    function_name: &str,
    sid: &str,
    qualifier: Option<&str>,
) -> Result<()> {
    match PERCH_LAMBDA_CLIENT
        .remove_permission(RemovePermissionRequest {
            function_name: function_name.to_owned(),
            statement_id: sid.to_owned(),
            qualifier: qualifier.map(str::to_owned),
            ..Default::default()
        })
        .await
    {
        Ok(()) => Ok(()),
        Err(RusotoError::Service(RemovePermissionError::ResourceNotFound(_))) => {
            debug!("statement {} of function {} was already revoked", sid, function_name);
            Ok(())
        }
        Err(e) => Err(PerchError::AWS(e.to_string())),
    }
}
