//! Compute-config contract over `aws lambda`.

use std::collections::BTreeMap;
use std::io::Write;

use chaos_core::services::{
    BackendError, ComputeConfigService, ConfigUpdate, UpdateHandle, UpdateStatus, WorkerConfig,
};
use serde::Deserialize;

use crate::command::AwsCli;
use crate::error::AwsError;

const SERVICE: &str = "lambda";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FunctionConfiguration {
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    environment: Option<FunctionEnvironment>,
    #[serde(default)]
    last_update_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct FunctionEnvironment {
    #[serde(default)]
    variables: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct LambdaConfigService {
    pub cli: AwsCli,
}

impl LambdaConfigService {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }

    fn get_configuration(&self, function_id: &str) -> Result<FunctionConfiguration, BackendError> {
        let operation = "get-function-configuration";
        self.cli
            .call_json(
                SERVICE,
                operation,
                &["--function-name".to_string(), function_id.to_string()],
            )
            .map_err(|err| err.into_backend(SERVICE, operation))
    }
}

impl ComputeConfigService for LambdaConfigService {
    fn read(&self, function_id: &str) -> Result<WorkerConfig, BackendError> {
        let config = self.get_configuration(function_id)?;
        let time_limit_secs = config.timeout.ok_or_else(|| {
            BackendError::parse(SERVICE, "get-function-configuration", "response has no Timeout")
        })?;
        Ok(WorkerConfig {
            env_vars: config
                .environment
                .map(|env| env.variables)
                .unwrap_or_default(),
            time_limit_secs,
        })
    }

    fn write(
        &self,
        function_id: &str,
        update: &ConfigUpdate,
    ) -> Result<UpdateHandle, BackendError> {
        let operation = "update-function-configuration";
        if update.env_vars.is_none() && update.time_limit_secs.is_none() {
            return Err(BackendError::request(
                SERVICE,
                operation,
                "update carries neither environment nor timeout",
            ));
        }

        // The environment carries credentials; it goes through a private
        // file so it never appears in argv, logs or error messages.
        let mut input = serde_json::Map::new();
        input.insert("FunctionName".to_string(), function_id.into());
        if let Some(env_vars) = &update.env_vars {
            input.insert(
                "Environment".to_string(),
                serde_json::json!({ "Variables": env_vars }),
            );
        }
        if let Some(timeout) = update.time_limit_secs {
            input.insert("Timeout".to_string(), timeout.into());
        }
        let mut staged = tempfile::NamedTempFile::new()
            .map_err(|source| AwsError::Staging { source }.into_backend(SERVICE, operation))?;
        staged
            .write_all(serde_json::Value::Object(input).to_string().as_bytes())
            .and_then(|()| staged.flush())
            .map_err(|source| AwsError::Staging { source }.into_backend(SERVICE, operation))?;

        let args = [
            "--cli-input-json".to_string(),
            format!("file://{}", staged.path().display()),
        ];
        self.cli
            .call(SERVICE, operation, &args)
            .map_err(|err| err.into_backend(SERVICE, operation))?;
        Ok(UpdateHandle(function_id.to_string()))
    }

    fn status(&self, handle: &UpdateHandle) -> Result<UpdateStatus, BackendError> {
        let config = self.get_configuration(&handle.0)?;
        match config.last_update_status.as_deref() {
            Some("Successful") => Ok(UpdateStatus::Succeeded),
            Some("Failed") => Ok(UpdateStatus::Failed),
            Some("InProgress") | None => Ok(UpdateStatus::Pending),
            Some(other) => Err(BackendError::parse(
                SERVICE,
                "get-function-configuration",
                format!("unknown LastUpdateStatus '{other}'"),
            )),
        }
    }
}
