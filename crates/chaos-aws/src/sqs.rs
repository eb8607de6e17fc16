//! Queue contract over `aws sqs`.

use chaos_core::services::{BackendError, QueueService, ReceivedMessage};
use serde::Deserialize;

use crate::command::AwsCli;

const SERVICE: &str = "sqs";
/// SQS rejects batches above ten and long-polls above twenty seconds.
const MAX_BATCH: u32 = 10;
const MAX_WAIT_SECS: u64 = 20;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReceiveMessageResponse {
    #[serde(default)]
    messages: Vec<SqsMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SqsMessage {
    message_id: String,
    receipt_handle: String,
}

#[derive(Debug, Clone)]
pub struct SqsQueueService {
    pub cli: AwsCli,
}

impl SqsQueueService {
    pub fn new(cli: AwsCli) -> Self {
        Self { cli }
    }
}

impl QueueService for SqsQueueService {
    fn set_visibility_timeout(&self, queue_id: &str, seconds: u64) -> Result<(), BackendError> {
        let operation = "set-queue-attributes";
        self.cli
            .call(
                SERVICE,
                operation,
                &[
                    "--queue-url".to_string(),
                    queue_id.to_string(),
                    "--attributes".to_string(),
                    format!("VisibilityTimeout={seconds}"),
                ],
            )
            .map_err(|err| err.into_backend(SERVICE, operation))?;
        Ok(())
    }

    fn receive(
        &self,
        queue_id: &str,
        max_messages: u32,
        wait_secs: u64,
    ) -> Result<Vec<ReceivedMessage>, BackendError> {
        let operation = "receive-message";
        let response: ReceiveMessageResponse = self
            .cli
            .call_json(
                SERVICE,
                operation,
                &[
                    "--queue-url".to_string(),
                    queue_id.to_string(),
                    "--max-number-of-messages".to_string(),
                    max_messages.clamp(1, MAX_BATCH).to_string(),
                    "--wait-time-seconds".to_string(),
                    wait_secs.min(MAX_WAIT_SECS).to_string(),
                ],
            )
            .map_err(|err| err.into_backend(SERVICE, operation))?;

        Ok(response
            .messages
            .into_iter()
            .map(|message| ReceivedMessage {
                id: message.message_id,
                receipt_token: message.receipt_handle,
            })
            .collect())
    }

    fn delete(&self, queue_id: &str, receipt_token: &str) -> Result<(), BackendError> {
        let operation = "delete-message";
        self.cli
            .call(
                SERVICE,
                operation,
                &[
                    "--queue-url".to_string(),
                    queue_id.to_string(),
                    "--receipt-handle".to_string(),
                    receipt_token.to_string(),
                ],
            )
            .map_err(|err| err.into_backend(SERVICE, operation))?;
        Ok(())
    }
}
