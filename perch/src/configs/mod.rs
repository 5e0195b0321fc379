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

//! This module provides various default configurations for Perch.

pub mod function_spec;
pub use function_spec::FunctionSpec;

pub use crate::config::PERCH_CONF;
use humantime::parse_duration;
use lazy_static::lazy_static;
use rusoto_core::Region;
use rusoto_iam::IamClient;
use rusoto_lambda::LambdaClient;
use std::time::Duration;

lazy_static! {
    /// AWS Lambda function async invocation.
    pub static ref PERCH_LAMBDA_ASYNC_CALL: String = "Event".to_string();
    /// AWS Lambda function sync invocation.
    pub static ref PERCH_LAMBDA_SYNC_CALL: String = "RequestResponse".to_string();
    /// AWS Lambda function maximum error retry.
    pub static ref PERCH_LAMBDA_MAX_RETRIES: usize = PERCH_CONF["lambda"]["max_invoke_retries"].parse::<usize>().unwrap();
    /// AWS Lambda function timeout.
    pub static ref PERCH_LAMBDA_TIMEOUT: i64 = PERCH_CONF["lambda"]["timeout"].parse::<i64>().unwrap();

    /// Perch S3 key for the pre-compiled deployment package.
    pub static ref PERCH_S3_KEY: String = PERCH_CONF["s3"]["key"].to_string();
    /// Perch S3 bucket name.
    pub static ref PERCH_S3_BUCKET: String = PERCH_CONF["s3"]["bucket"].to_string();

    /// Fixed delay between two polls of a converging resource.
    pub static ref PERCH_POLL_INTERVAL: Duration = parse_duration(&PERCH_CONF["wait"]["poll_interval"]).unwrap();
    /// Wall-clock budget for a created function to become Active.
    pub static ref PERCH_FUNCTION_CREATE_TIMEOUT: Duration = parse_duration(&PERCH_CONF["wait"]["function_create_timeout"]).unwrap();
    /// Wall-clock budget for a function update to become Successful.
    pub static ref PERCH_FUNCTION_UPDATE_TIMEOUT: Duration = parse_duration(&PERCH_CONF["wait"]["function_update_timeout"]).unwrap();
    /// Wall-clock budget for a created event source mapping to settle.
    pub static ref PERCH_MAPPING_CREATE_TIMEOUT: Duration = parse_duration(&PERCH_CONF["wait"]["mapping_create_timeout"]).unwrap();
    /// Wall-clock budget for an updated event source mapping to settle.
    pub static ref PERCH_MAPPING_UPDATE_TIMEOUT: Duration = parse_duration(&PERCH_CONF["wait"]["mapping_update_timeout"]).unwrap();
    /// Wall-clock budget for a deleted event source mapping to disappear.
    pub static ref PERCH_MAPPING_DELETE_TIMEOUT: Duration = parse_duration(&PERCH_CONF["wait"]["mapping_delete_timeout"]).unwrap();
    /// Wall-clock budget for provisioned concurrency to become READY.
    pub static ref PERCH_PROVISIONED_CONCURRENCY_TIMEOUT: Duration = parse_duration(&PERCH_CONF["wait"]["provisioned_concurrency_timeout"]).unwrap();

    /// Retry budget for IAM eventual consistency on create/update.
    pub static ref PERCH_PROPAGATION_TIMEOUT: Duration = parse_duration(&PERCH_CONF["retry"]["propagation_timeout"]).unwrap();
    /// Extended retry budget when Lambda reports being throttled by EC2.
    pub static ref PERCH_EXTRA_THROTTLING_TIMEOUT: Duration = parse_duration(&PERCH_CONF["retry"]["extra_throttling_timeout"]).unwrap();

    /// Perch associated services.
    /// Perch LAMBDA Client.
    pub static ref PERCH_LAMBDA_CLIENT: LambdaClient = LambdaClient::new(Region::default());
    /// Perch IAM Client.
    pub static ref PERCH_IAM_CLIENT: IamClient = IamClient::new(Region::default());
}
