//! External work queue backends.

use std::time::Duration;

use derivforge_common::{Error, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

/// Wire form of a task handed to an external queue, and read back by the
/// worker running `derivforge run-task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Accepts task envelopes for execution elsewhere.
pub trait TaskQueue: Send + Sync {
    fn submit(&self, envelope: &TaskEnvelope) -> Result<()>;
}

/// Queue reached by POSTing JSON envelopes to a URL.
#[derive(Debug)]
pub struct HttpTaskQueue {
    client: Client,
    url: String,
}

impl HttpTaskQueue {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::internal(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl TaskQueue for HttpTaskQueue {
    fn submit(&self, envelope: &TaskEnvelope) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(envelope)
            .send()
            .map_err(|e| Error::internal(format!("submitting {}: {e}", envelope.id)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::internal(format!(
                "queue rejected {}: {status}",
                envelope.id
            )));
        }
        Ok(())
    }
}
