use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::config::ElasticConfig;
use crate::error::MigrationError;
use crate::index::{BulkOperation, BulkResponse, SearchIndex};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Elasticsearch bulk client over plain HTTP.
///
/// Requests rotate over the configured nodes, or over the nodes discovered through
/// `/_nodes/http` when sniffing is enabled.
#[derive(Debug)]
pub struct ElasticClient {
    http: reqwest::Client,
    nodes: Vec<Url>,
    next_node: AtomicUsize,
    index: String,
    document_types: bool,
}

impl ElasticClient {
    /// Build the client and confirm at least one node answers
    pub async fn connect(config: &ElasticConfig) -> Result<Self, MigrationError> {
        let seeds = config
            .urls
            .iter()
            .map(|u| Url::parse(u).map_err(|e| MigrationError::config(format!("invalid ELASTIC_URLS entry {}: {}", u, e))))
            .collect::<Result<Vec<_>, _>>()?;
        if seeds.is_empty() {
            return Err(MigrationError::config("ELASTIC_URLS is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MigrationError::index(format!("http client: {}", e)))?;

        let nodes = if config.sniff {
            let discovered = Self::sniff(&http, &seeds).await?;
            info!("Sniffed {} elasticsearch node(s)", discovered.len());
            discovered
        } else {
            seeds
        };

        let client = Self::with_nodes(http, nodes, &config.index, config.document_types);
        client.ping().await?;
        Ok(client)
    }

    fn with_nodes(http: reqwest::Client, nodes: Vec<Url>, index: &str, document_types: bool) -> Self {
        Self {
            http,
            nodes,
            next_node: AtomicUsize::new(0),
            index: index.to_string(),
            document_types,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    fn node(&self) -> &Url {
        let n = self.next_node.fetch_add(1, Ordering::Relaxed);
        &self.nodes[n % self.nodes.len()]
    }

    async fn ping(&self) -> Result<(), MigrationError> {
        let url = self.node().clone();
        let res = self.http.get(url.clone()).send().await?;
        if !res.status().is_success() {
            return Err(MigrationError::index(format!(
                "elasticsearch at {} answered {}",
                url,
                res.status()
            )));
        }
        Ok(())
    }

    /// Ask each seed in turn for the cluster's HTTP publish addresses
    async fn sniff(http: &reqwest::Client, seeds: &[Url]) -> Result<Vec<Url>, MigrationError> {
        let mut last_error = None;
        for seed in seeds {
            let url = join(seed, "_nodes/http")?;
            let body = match http.get(url).send().await {
                Ok(res) if res.status().is_success() => res.json::<Value>().await?,
                Ok(res) => {
                    last_error = Some(format!("{} answered {}", seed, res.status()));
                    continue;
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            let nodes = parse_publish_addresses(&body, seed.scheme());
            if !nodes.is_empty() {
                return Ok(nodes);
            }
            last_error = Some(format!("{} reported no http nodes", seed));
        }
        Err(MigrationError::index(format!(
            "node discovery failed: {}",
            last_error.unwrap_or_default()
        )))
    }

    /// Render operations as an NDJSON bulk body
    pub fn render_bulk(&self, operations: &[BulkOperation]) -> Result<String, MigrationError> {
        let mut body = String::new();
        for op in operations {
            let mut meta = Map::new();
            meta.insert("_index".to_string(), json!(self.index));
            if self.document_types {
                meta.insert("_type".to_string(), json!(op.index_type()));
            }
            meta.insert("_id".to_string(), json!(op.id()));

            match op {
                BulkOperation::Delete { .. } => {
                    body.push_str(&json!({ "delete": meta }).to_string());
                    body.push('\n');
                }
                BulkOperation::Index {
                    id,
                    version,
                    routing,
                    document,
                    ..
                } => {
                    meta.insert("version".to_string(), json!(version));
                    meta.insert("version_type".to_string(), json!("external"));
                    if let Some(parent) = routing.as_deref().filter(|p| !p.is_empty()) {
                        // typed (pre-7) clusters model parent/child through `parent`
                        let key = if self.document_types { "parent" } else { "routing" };
                        meta.insert(key.to_string(), json!(parent));
                    }
                    body.push_str(&json!({ "index": meta }).to_string());
                    body.push('\n');
                    body.push_str(&single_line(id, document.as_str())?);
                    body.push('\n');
                }
            }
        }
        Ok(body)
    }
}

#[async_trait]
impl SearchIndex for ElasticClient {
    async fn bulk(&self, operations: &[BulkOperation]) -> Result<BulkResponse, MigrationError> {
        let body = self.render_bulk(operations)?;
        let url = join(self.node(), "_bulk")?;
        debug!("Submitting bulk of {} operation(s) to {}", operations.len(), url);

        let res = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| MigrationError::index(format!("bulk request: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(MigrationError::index(format!("bulk request answered {}: {}", status, text)));
        }
        res.json::<BulkResponse>()
            .await
            .map_err(|e| MigrationError::index(format!("bulk response: {}", e)))
    }
}

fn join(base: &Url, path: &str) -> Result<Url, MigrationError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path)
        .map_err(|e| MigrationError::index(format!("bad node url {}: {}", base, e)))
}

/// The bulk body is line-delimited, so documents spanning lines are re-serialized compactly
fn single_line(id: &str, document: &str) -> Result<String, MigrationError> {
    if !document.contains('\n') && !document.contains('\r') {
        return Ok(document.to_string());
    }
    let value: Value = serde_json::from_str(document)
        .map_err(|e| MigrationError::index(format!("document {} is not valid JSON: {}", id, e)))?;
    Ok(value.to_string())
}

/// Extract `nodes.*.http.publish_address`, which is either `host:port` or `name/ip:port`
fn parse_publish_addresses(body: &Value, scheme: &str) -> Vec<Url> {
    let Some(nodes) = body.get("nodes").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut urls: Vec<Url> = nodes
        .values()
        .filter_map(|node| node.pointer("/http/publish_address")?.as_str())
        .filter_map(|addr| {
            let addr = addr.rsplit('/').next().unwrap_or(addr);
            Url::parse(&format!("{}://{}", scheme, addr)).ok()
        })
        .collect();
    urls.sort();
    urls.dedup();
    urls
}
