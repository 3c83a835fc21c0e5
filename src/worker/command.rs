//! Handler that runs an external executable per envelope.
//!
//! The envelope is written to the child's stdin as JSON. Exit status 0 means
//! done; anything else, or failing to start the child at all, means retry.

use crate::error::{Error, Result};
use crate::model::Envelope;
use crate::worker::{Disposition, Handler};

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

pub struct CommandHandler {
    command: PathBuf,
    queue: String,
}

impl CommandHandler {
    /// `command` is resolved against the current directory if relative.
    pub fn new(command: &Path, queue: impl Into<String>) -> Result<Self> {
        let command = if command.is_relative() && command.components().count() > 1 {
            std::env::current_dir()?.join(command)
        } else {
            command.to_path_buf()
        };
        Ok(Self {
            command,
            queue: queue.into(),
        })
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    async fn run<T: Serialize>(&self, envelope: &Envelope<T>) -> Result<()> {
        let input = serde_json::to_vec(envelope)
            .map_err(|e| Error::Codec(format!("encode envelope {}: {e}", envelope.id)))?;

        debug!(
            id = %envelope.id,
            command = %self.command.display(),
            "running handler command"
        );

        let mut child = Command::new(&self.command)
            .env("QUED_QUEUE", &self.queue)
            .env("QUED_MESSAGE_ID", envelope.id.to_string())
            .env("QUED_MESSAGE_TYPE", envelope.kind().unwrap_or(""))
            .env("QUED_ATTEMPTS", envelope.attempts.to_string())
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits without reading stdin is judged by its status.
            match stdin.write_all(&input).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(())
        } else {
            Err(Error::Other(format!(
                "{} exited with status {}",
                self.command.display(),
                status.code().unwrap_or(-1)
            )))
        }
    }
}

#[async_trait::async_trait]
impl<T: Serialize + Sync> Handler<T> for CommandHandler {
    async fn handle(&self, envelope: &Envelope<T>) -> Disposition {
        match self.run(envelope).await {
            Ok(()) => Disposition::Done,
            Err(e) => Disposition::retry(e),
        }
    }
}
