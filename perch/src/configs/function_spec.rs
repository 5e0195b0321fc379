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

//! Helper functions to describe a Lambda function.

use crate::configs::{PERCH_CONF, PERCH_IAM_CLIENT, PERCH_S3_BUCKET, PERCH_S3_KEY};
use crate::error::{PerchError, Result};
use rusoto_iam::{GetRoleRequest, Iam};
use rusoto_lambda::{Environment, FunctionCode};
use std::collections::hash_map::HashMap;

/// Everything Lambda needs to create one function.
///
/// The spec starts out from the crate-wide configuration (runtime, handler,
/// memory size, execution role, deployment package location) and is then
/// specialized per function with the setters below.
#[derive(Debug, Clone)]
pub struct FunctionSpec {
    /// The identifier of the function's language runtime.
    ///
    /// For more information about Lambda runtimes, see the AWS Lambda Runtimes:
    /// <https://docs.aws.amazon.com/lambda/latest/dg/lambda-runtimes.html>
    pub runtime:       Option<String>,
    /// The method in the function code that processes events. When the
    /// function is invoked, Lambda runs the handler method.
    pub handler:       Option<String>,
    /// The amount of memory available to the function at runtime, in MB.
    /// The value must be a multiple of 64 MB; the default is 128 MB.
    pub memory_size:   Option<i64>,
    /// The maximum function execution time in seconds, capped by Lambda at
    /// 900s (15 minutes).
    pub timeout:       Option<i64>,
    /// The ARN of the function's execution role. Lambda assumes this role
    /// when the function is invoked, and rejects create/update calls until
    /// the role has propagated through IAM.
    pub role:          String,
    /// The VPC subnets and security groups to attach the function to, if any.
    pub vpc_config:    Option<rusoto_lambda::VpcConfig>,
    /// Environment variables available to the function code at runtime.
    pub environment:   Option<Environment>,
    /// The location of the deployment package. Perch stages pre-compiled
    /// packages in S3 rather than inlining zip files into requests.
    pub code:          FunctionCode,
    /// The instruction set architectures the package was compiled for.
    pub architectures: Option<Vec<String>>,
    /// The name of the function, unique per account and region.
    pub function_name: String,
}

impl FunctionSpec {
    /// Creates a spec pre-filled from the crate configuration, with the
    /// execution role resolved through IAM.
    pub async fn try_new() -> Result<FunctionSpec> {
        let runtime = Some(PERCH_CONF["aws"]["runtime"].to_string());
        let handler = Some(PERCH_CONF["lambda"]["handler"].to_string());
        let memory_size = Some(
            PERCH_CONF["lambda"]["regular_memory_size"]
                .parse::<i64>()
                .unwrap(),
        );
        let timeout = Some(PERCH_CONF["lambda"]["timeout"].parse::<i64>().unwrap());
        let role = FunctionSpec::default_role().await?;
        let vpc_config = None;
        let environment = None;

        // The deployment package is uploaded to Amazon S3 in advance.
        let code = FunctionCode {
            s3_bucket:         Some(PERCH_S3_BUCKET.clone()),
            s3_key:            Some(PERCH_S3_KEY.clone()),
            s3_object_version: None,
            zip_file:          None,
            image_uri:         None,
        };

        let architectures = None;
        let function_name = "".to_string();

        Ok(FunctionSpec {
            runtime,
            handler,
            memory_size,
            timeout,
            role,
            vpc_config,
            environment,
            code,
            architectures,
            function_name,
        })
    }

    /// Overrides the runtime identifier.
    pub fn set_runtime(&mut self, runtime: &str) -> &mut Self {
        self.runtime = Some(runtime.to_string());
        self
    }

    /// Overrides the handler name.
    pub fn set_handler(&mut self, handler: &str) -> &mut Self {
        self.handler = Some(handler.to_owned());
        self
    }

    /// Overrides the memory size.
    pub fn set_memory_size(&mut self, memory_size: i64) -> &mut Self {
        self.memory_size = Some(memory_size);
        self
    }

    /// Overrides the execution timeout.
    pub fn set_timeout(&mut self, timeout: i64) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Overrides the execution role ARN.
    pub fn set_role(&mut self, role: &str) -> &mut Self {
        self.role = role.to_string();
        self
    }

    /// Attaches the function to a VPC.
    pub fn set_vpc_config(&mut self, vpc_config: rusoto_lambda::VpcConfig) -> &mut Self {
        self.vpc_config = Some(vpc_config);
        self
    }

    /// Selects the instruction set architectures of the deployment package.
    pub fn set_architectures(&mut self, architectures: Vec<String>) -> &mut Self {
        self.architectures = Some(architectures);
        self
    }

    /// Points the spec at a staged deployment package.
    pub fn set_code(&mut self, s3_key: &str) -> &mut Self {
        self.code = FunctionCode {
            s3_bucket:         Some(PERCH_S3_BUCKET.clone()),
            s3_key:            Some(s3_key.to_string()),
            s3_object_version: None,
            zip_file:          None,
            image_uri:         None,
        };
        self
    }

    /// Sets the function name and its runtime environment variables.
    pub fn set_function_spec(&mut self, function_name: &str) -> &mut Self {
        let mut map = HashMap::new();
        map.insert("RUST_LOG".to_owned(), "info".to_owned());
        map.insert("RUST_BACKTRACE".to_owned(), "full".to_owned());

        self.environment = Some(Environment {
            variables: Some(map),
        });

        self.function_name = function_name.to_owned();
        self
    }

    /// Resolves the configured execution role name to its ARN.
    async fn default_role() -> Result<String> {
        let resp = PERCH_IAM_CLIENT
            .get_role(GetRoleRequest {
                role_name: PERCH_CONF["aws"]["role"].to_string(),
            })
            .await
            .map_err(|e| PerchError::AWS(e.to_string()))?;
        Ok(resp.role.arn)
    }
}
