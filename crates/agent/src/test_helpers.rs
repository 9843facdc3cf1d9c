//! Shared test helpers for orchestrator tests.

use async_trait::async_trait;
use deepdive_core::error::{ProviderError, ToolError};
use deepdive_core::provider::{
    ChunkReceiver, GenerationRequest, Provider, StreamChunk, ToolCallRequest, Usage,
};
use deepdive_core::tool::{Tool, ToolKind, ToolRegistry};
use deepdive_tools::UserTimezoneTool;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::stream_event::UiEvent;

/// What one generation call streams back.
#[derive(Debug, Clone)]
pub enum Script {
    /// Stream these chunks, then close.
    Chunks(Vec<StreamChunk>),
    /// Stream these chunks, then hang until the receiver is dropped.
    Stall(Vec<StreamChunk>),
    /// Fail before streaming anything.
    Refuse(ProviderError),
    /// Stream these chunks, then fail.
    FailMidStream(Vec<StreamChunk>, ProviderError),
}

/// A mock provider that plays back one [`Script`] per call.
///
/// Records every request. Tool calls with an empty id get a unique one, so a
/// repeating script still produces distinct call ids.
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    repeat: Option<Script>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Play the same script on every call.
    pub fn repeating(script: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            repeat: Some(script),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn number_calls(chunks: Vec<StreamChunk>, call: usize) -> Vec<StreamChunk> {
    chunks
        .into_iter()
        .map(|mut chunk| {
            for (i, tc) in chunk.tool_calls.iter_mut().enumerate() {
                if tc.id.is_empty() {
                    tc.id = format!("call_{call}_{i}");
                }
            }
            chunk
        })
        .collect()
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .or_else(|| self.repeat.clone());
        let Some(script) = script else {
            return Err(ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            });
        };

        let (tx, rx) = mpsc::channel(64);
        match script {
            Script::Refuse(e) => return Err(e),
            Script::Chunks(chunks) => {
                let chunks = number_calls(chunks, call);
                tokio::spawn(async move {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                });
            }
            Script::Stall(chunks) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    tx.closed().await;
                });
            }
            Script::FailMidStream(chunks, e) => {
                tokio::spawn(async move {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                    let _ = tx.send(Err(e)).await;
                });
            }
        }
        Ok(rx)
    }
}

pub fn text_chunk(text: &str) -> StreamChunk {
    StreamChunk {
        content: Some(text.into()),
        ..Default::default()
    }
}

/// Final chunk of a step, requesting `(id, name, arguments)` calls.
pub fn done_chunk(calls: &[(&str, &str, &str)]) -> StreamChunk {
    StreamChunk {
        tool_calls: calls
            .iter()
            .map(|(id, name, arguments)| ToolCallRequest {
                id: (*id).into(),
                name: (*name).into(),
                arguments: (*arguments).into(),
            })
            .collect(),
        done: true,
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        ..Default::default()
    }
}

/// A step that answers with text and no tool calls.
pub fn text_step(text: &str) -> Script {
    Script::Chunks(vec![text_chunk(text), done_chunk(&[])])
}

/// A step that only requests tool calls.
pub fn tool_step(calls: &[(&str, &str, &str)]) -> Script {
    Script::Chunks(vec![done_chunk(calls)])
}

pub fn reasoning_step(reasoning: &str, text: &str) -> Script {
    Script::Chunks(vec![
        StreamChunk {
            reasoning: Some(reasoning.into()),
            ..Default::default()
        },
        text_chunk(text),
        done_chunk(&[]),
    ])
}

/// A `webSearch` stand-in that records queries. Queries containing "slow"
/// take ten seconds.
pub struct RecordingSearch {
    pub queries: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Tool for RecordingSearch {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn description(&self) -> &str {
        "Search the web"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"]
        })
    }

    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        match input["query"].as_str() {
            Some(_) => Ok(()),
            None => Err(ToolError::InvalidInput {
                tool_name: "webSearch".into(),
                reason: "missing field `query`".into(),
            }),
        }
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let query = input["query"].as_str().unwrap_or_default().to_string();
        if query.contains("slow") {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        self.queries.lock().unwrap().push(query.clone());
        Ok(serde_json::json!({
            "query": query,
            "results": [{
                "title": "Example",
                "url": "https://example.com",
                "content": "excerpt"
            }]
        }))
    }
}

/// A complete registry: recording search plus the real client timezone tool.
pub fn test_registry() -> (ToolRegistry, Arc<Mutex<Vec<String>>>) {
    let queries = Arc::new(Mutex::new(Vec::new()));
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(RecordingSearch {
        queries: queries.clone(),
    }));
    registry.register(Box::new(UserTimezoneTool));
    (registry, queries)
}

/// Collect every event already buffered.
pub fn drain(rx: &mut mpsc::Receiver<UiEvent>) -> Vec<UiEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
