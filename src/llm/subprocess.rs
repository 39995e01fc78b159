//! Subprocess LLM client
//!
//! Spawns the configured model-orchestrator command serving MCP over stdio
//! and calls its `generate` tool. The subprocess is spawned lazily on first
//! use and kept alive for the lifetime of the client; the connection is
//! guarded by a mutex so concurrent callers are serialized.

use super::{ChatMessage, LlmClient, LlmError, LlmResult, ModelTier};
use crate::cancel::CancellationToken;
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, Content};
use rmcp::service::Peer;
use rmcp::transport::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use std::borrow::Cow;
use tokio::sync::Mutex;

/// Production client for the generative endpoint.
pub struct SubprocessLlm {
    /// The orchestrator command (default: "llm-gateway").
    command: String,
    /// Lazily-initialized MCP peer connection.
    peer: Mutex<Option<Peer<RoleClient>>>,
}

impl SubprocessLlm {
    pub fn new() -> Self {
        Self {
            command: "llm-gateway".to_string(),
            peer: Mutex::new(None),
        }
    }

    /// Set a custom command path.
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    /// Establish the MCP connection (spawn subprocess + handshake).
    async fn connect(&self) -> LlmResult<Peer<RoleClient>> {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.arg("serve").arg("--transport").arg("stdio");

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| LlmError::Unavailable(format!("failed to spawn {}: {}", self.command, e)))?;

        // () implements ClientHandler with sensible defaults (no-op handlers)
        let service = ()
            .serve(transport)
            .await
            .map_err(|e| LlmError::Unavailable(format!("MCP handshake failed: {}", e)))?;

        Ok(service.peer().clone())
    }

    async fn get_peer(&self) -> LlmResult<Peer<RoleClient>> {
        let mut guard = self.peer.lock().await;
        if let Some(ref peer) = *guard {
            return Ok(peer.clone());
        }
        let peer = self.connect().await?;
        *guard = Some(peer.clone());
        Ok(peer)
    }
}

impl Default for SubprocessLlm {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract text from MCP Content items (concatenate all text items).
fn extract_text_content(content: &[Content]) -> String {
    content
        .iter()
        .filter_map(|c| c.as_text().map(|tc| tc.text.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl LlmClient for SubprocessLlm {
    async fn generate(
        &self,
        system: &str,
        messages: &[ChatMessage],
        tier: ModelTier,
        cancel: &CancellationToken,
    ) -> LlmResult<String> {
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }

        let peer = self.get_peer().await?;

        let mut args = serde_json::Map::new();
        args.insert(
            "system".to_string(),
            serde_json::Value::String(system.to_string()),
        );
        args.insert(
            "messages".to_string(),
            serde_json::to_value(messages)
                .map_err(|e| LlmError::Generation(format!("message encoding failed: {}", e)))?,
        );
        args.insert(
            "tier".to_string(),
            serde_json::Value::String(tier.as_str().to_string()),
        );

        let result = peer
            .call_tool(CallToolRequestParams {
                meta: None,
                name: Cow::Borrowed("generate"),
                arguments: Some(args),
                task: None,
            })
            .await
            .map_err(|e| LlmError::Generation(format!("MCP call_tool failed: {}", e)))?;

        let text = extract_text_content(&result.content);
        if result.is_error == Some(true) {
            return Err(LlmError::Generation(text));
        }
        Ok(text)
    }
}
