use crate::error::{ClientError, Result};
use crate::selector::FieldSelector;
use crate::traits::{ClusterClient, ObjectList, WatchStream};
use async_trait::async_trait;
use corvid_core::{Binding, ResourceKind, WatchEvent};
use futures_util::{Stream, StreamExt};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tracing::debug;

/// HTTP client for the API server
///
/// Watches are read from a server-sent-event stream where each `data:` line
/// carries one `{"type", "object"}` event. Bare newline-delimited JSON
/// events are accepted too.
pub struct HttpClusterClient {
    base_url: String,
    client: Client,
}

impl HttpClusterClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn selector_query(selector: &FieldSelector) -> Vec<(&'static str, String)> {
        if selector.is_empty() {
            Vec::new()
        } else {
            vec![("fieldSelector", selector.to_string())]
        }
    }

    async fn check_status(resp: Response, what: &str) -> Result<Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => ClientError::not_found(what, body),
            StatusCode::CONFLICT => ClientError::conflict(body),
            _ => ClientError::status(status.as_u16(), format!("{} failed: {}", what, body)),
        })
    }
}

#[async_trait]
impl ClusterClient for HttpClusterClient {
    /// GET /api/v1/{resource}?fieldSelector=...
    async fn list(&self, kind: ResourceKind, selector: &FieldSelector) -> Result<ObjectList> {
        let url = format!("{}{}", self.base_url, kind.collection_path());
        debug!("GET {} ({})", url, selector);

        let resp = self
            .client
            .get(&url)
            .query(&Self::selector_query(selector))
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("HTTP request failed: {}", e)))?;
        let resp = Self::check_status(resp, &format!("LIST {}", kind.resource_name())).await?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| ClientError::decode(format!("Failed to parse {} list: {}", kind, e)))?;

        let resource_version = body["metadata"]["resourceVersion"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let items = body["items"].as_array().cloned().unwrap_or_default();

        Ok(ObjectList {
            items,
            resource_version,
        })
    }

    /// GET /api/v1/{resource}?watch=true&resourceVersion=...
    async fn watch(
        &self,
        kind: ResourceKind,
        selector: &FieldSelector,
        resource_version: &str,
    ) -> Result<WatchStream> {
        let url = format!("{}{}", self.base_url, kind.collection_path());
        debug!("WATCH {} from {} ({})", url, resource_version, selector);

        let mut query = Self::selector_query(selector);
        query.push(("watch", "true".to_string()));
        if !resource_version.is_empty() {
            query.push(("resourceVersion", resource_version.to_string()));
        }

        let resp = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("HTTP request failed: {}", e)))?;
        let resp = Self::check_status(resp, &format!("WATCH {}", kind.resource_name())).await?;

        Ok(frame_events(resp.bytes_stream(), MAX_WATCH_LINE))
    }

    /// GET /api/v1/namespaces/{namespace}/{resource}/{name}
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<Value> {
        let url = format!("{}{}", self.base_url, kind.object_path(namespace, name));
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("HTTP request failed: {}", e)))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::not_found(
                kind.kind(),
                format!("{}/{}", namespace, name),
            ));
        }
        let resp = Self::check_status(resp, &format!("GET {}", kind.kind())).await?;

        resp.json::<Value>()
            .await
            .map_err(|e| ClientError::decode(format!("Failed to parse {}: {}", kind, e)))
    }

    /// POST /api/v1/namespaces/{namespace}/bindings
    async fn create_binding(&self, binding: &Binding) -> Result<()> {
        let namespace = binding.metadata.namespace.as_deref().unwrap_or("default");
        let url = format!("{}/api/v1/namespaces/{}/bindings", self.base_url, namespace);
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(binding)
            .send()
            .await
            .map_err(|e| ClientError::transport(format!("HTTP request failed: {}", e)))?;
        Self::check_status(resp, "POST binding").await?;

        Ok(())
    }
}

/// Longest watch line buffered while waiting for its newline
const MAX_WATCH_LINE: usize = 16 * 1024 * 1024;

/// Split a watch body into lines and decode each into an event
///
/// A line longer than `max_line` without a newline yields a decode error and
/// ends the stream.
fn frame_events<S, B, E>(bytes: S, max_line: usize) -> WatchStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    futures_util::stream::unfold(
        (Box::pin(bytes), Vec::<u8>::new(), false),
        move |(mut bytes, mut buf, done)| async move {
            if done {
                return None;
            }
            loop {
                if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    if let Some(event) = parse_event_line(&line) {
                        return Some((event, (bytes, buf, false)));
                    }
                    continue;
                }

                if buf.len() > max_line {
                    let err = ClientError::decode(format!(
                        "Watch line exceeds {} bytes without a newline",
                        max_line
                    ));
                    return Some((Err(err), (bytes, Vec::new(), true)));
                }

                match bytes.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                    Some(Err(e)) => {
                        let err = ClientError::transport(format!("Watch stream failed: {}", e));
                        return Some((Err(err), (bytes, buf, false)));
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}

/// Decode one line of a watch body. Returns None for blank lines, SSE
/// comments and non-data fields.
fn parse_event_line(line: &[u8]) -> Option<Result<WatchEvent<Value>>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();

    let payload = if let Some(data) = text.strip_prefix("data:") {
        data.trim()
    } else if text.starts_with('{') {
        text
    } else {
        return None;
    };

    if payload.is_empty() {
        return None;
    }

    Some(
        serde_json::from_str::<WatchEvent<Value>>(payload)
            .map_err(|e| ClientError::decode(format!("Invalid watch event: {}", e))),
    )
}
