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

//! A "prelude" for users of the perch crate.
//!
//! Like the standard library's prelude, this module simplifies importing of
//! common items. Unlike the standard prelude, the contents of this module must
//! be imported manually:
//!
//! ```
//! use perch::prelude::*;
//! ```

pub use crate::aws::concurrency::{
    delete_provisioned_concurrency, find_provisioned_concurrency_config,
    put_provisioned_concurrency, wait_provisioned_concurrency_ready,
    ProvisionedConcurrencyStatus,
};
pub use crate::aws::event_source_mapping::{
    create_event_source_mapping, delete_event_source_mapping, find_event_source_mapping,
    update_event_source_mapping, wait_mapping_created, wait_mapping_deleted,
    wait_mapping_updated, MappingState,
};
pub use crate::aws::function::{
    create_function, delete_function, deploy_function, find_function, invoke_function,
    set_concurrency, update_function_code, wait_function_active, wait_function_updated,
    FunctionState, LastUpdateStatus,
};
pub use crate::aws::permission::{
    add_permission, find_permission, find_policy_statement, function_name_from_arn, get_policy,
    qualifier_from_arn, remove_permission, Policy, PolicyStatement,
};
pub use crate::configs::*;
pub use crate::error::{PerchError, Result};
pub use crate::state::{retry_when, Observation, StateChange};
