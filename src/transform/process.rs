use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

use crate::error::MigrationError;
use crate::transform::{parse_mutations, Transformer};
use crate::types::{Document, MutationRecord};

/// Runs the plugin executable once per call.
///
/// `<plugin> -query` prints the origin selection; `<plugin> -migration <document>` prints the
/// mutations for one record.
#[derive(Debug, Clone)]
pub struct ProcessTransformer {
    plugin: PathBuf,
}

impl ProcessTransformer {
    pub fn new(plugin: impl Into<PathBuf>) -> Self {
        Self {
            plugin: plugin.into(),
        }
    }

    pub fn plugin(&self) -> &Path {
        &self.plugin
    }

    async fn run(&self, id: &str, args: &[&str]) -> Result<String, MigrationError> {
        let output = Command::new(&self.plugin)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                MigrationError::transform(id, format!("failed to run {}: {}", self.plugin.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!("Exec migration error ID: {}. {}", id, stderr.trim());
            return Err(MigrationError::transform(
                id,
                format!("plugin exited with {}", output.status),
            ));
        }

        String::from_utf8(output.stdout)
            .map_err(|_| MigrationError::transform(id, "plugin output is not UTF-8"))
    }
}

#[async_trait]
impl Transformer for ProcessTransformer {
    async fn describe_query(&mut self) -> Result<String, MigrationError> {
        let query = self.run("-", &["-query"]).await?;
        // shells and println! leave a trailing newline
        Ok(query.trim_end().to_string())
    }

    async fn apply(&mut self, id: &str, data: &Document) -> Result<Vec<MutationRecord>, MigrationError> {
        let stdout = self.run(id, &["-migration", data.as_str()]).await?;
        parse_mutations(id, &stdout)
    }
}
