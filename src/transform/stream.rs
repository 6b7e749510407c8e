use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::json;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::error::MigrationError;
use crate::transform::{parse_mutations, Transformer};
use crate::types::{Document, MutationRecord};

/// Talks to one long-lived plugin process over line-delimited JSON.
///
/// Each request is one line on the plugin's stdin (`{"op":"query"}` or
/// `{"op":"apply","id":..,"data":..}`) and each response is one line on its stdout.
pub struct StreamTransformer<W, R> {
    writer: W,
    lines: Lines<R>,
    // held so the plugin is killed when the transformer drops
    _child: Option<Child>,
}

impl StreamTransformer<ChildStdin, BufReader<ChildStdout>> {
    /// Start `<plugin> -stream`
    pub fn spawn(plugin: &Path) -> Result<Self, MigrationError> {
        let mut child = Command::new(plugin)
            .arg("-stream")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MigrationError::transform("-", format!("failed to start {}: {}", plugin.display(), e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MigrationError::transform("-", "plugin stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MigrationError::transform("-", "plugin stdout unavailable"))?;

        Ok(Self {
            writer: stdin,
            lines: BufReader::new(stdout).lines(),
            _child: Some(child),
        })
    }
}

impl<W, R> StreamTransformer<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    /// Use already-connected pipes
    pub fn from_io(writer: W, reader: R) -> Self {
        Self {
            writer,
            lines: reader.lines(),
            _child: None,
        }
    }

    async fn exchange(&mut self, id: &str, request: serde_json::Value) -> Result<String, MigrationError> {
        let mut line = request.to_string();
        line.push('\n');
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| MigrationError::transform(id, format!("plugin stream write: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| MigrationError::transform(id, format!("plugin stream flush: {}", e)))?;

        match self.lines.next_line().await {
            Ok(Some(response)) => Ok(response),
            Ok(None) => Err(MigrationError::transform(id, "plugin stream closed")),
            Err(e) => Err(MigrationError::transform(id, format!("plugin stream read: {}", e))),
        }
    }
}

#[async_trait]
impl<W, R> Transformer for StreamTransformer<W, R>
where
    W: AsyncWrite + Unpin + Send,
    R: AsyncBufRead + Unpin + Send,
{
    async fn describe_query(&mut self) -> Result<String, MigrationError> {
        let response = self.exchange("-", json!({ "op": "query" })).await?;
        // either bare text or a JSON string
        if response.starts_with('"') {
            return serde_json::from_str::<String>(&response)
                .map_err(|e| MigrationError::transform("-", format!("malformed query response: {}", e)));
        }
        Ok(response.trim_end().to_string())
    }

    async fn apply(&mut self, id: &str, data: &Document) -> Result<Vec<MutationRecord>, MigrationError> {
        let request = json!({ "op": "apply", "id": id, "data": data.as_str() });
        let response = self.exchange(id, request).await?;
        parse_mutations(id, &response)
    }
}

/// Push-mode input: one line per origin record, each a JSON array of mutation records (or the
/// `error` sentinel). Blank lines are skipped. Errors are tagged with the 1-based line number.
pub fn mutation_feed<R>(reader: R) -> BoxStream<'static, Result<Vec<MutationRecord>, MigrationError>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    stream::unfold((reader.lines(), 0usize), |(mut lines, mut line_no)| async move {
        loop {
            line_no += 1;
            let tag = format!("line {}", line_no);
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    let parsed = parse_mutations(&tag, &line);
                    return Some((parsed, (lines, line_no)));
                }
                Ok(None) => return None,
                Err(e) => {
                    let err = MigrationError::transform(tag, format!("input read: {}", e));
                    return Some((Err(err), (lines, line_no)));
                }
            }
        }
    })
    .boxed()
}
