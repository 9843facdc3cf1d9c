//! Shared test helpers for gateway tests.

use async_trait::async_trait;
use deepdive_agent::StepOrchestrator;
use deepdive_config::SearchConfig;
use deepdive_core::error::ProviderError;
use deepdive_core::event::EventBus;
use deepdive_core::provider::{
    ChunkReceiver, GenerationRequest, Provider, StreamChunk, ToolCallRequest,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::{GatewayState, SharedState};

/// Plays back one chunk list per call, then hangs on every later call.
pub struct MockProvider {
    scripts: Mutex<VecDeque<Vec<StreamChunk>>>,
}

impl MockProvider {
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        "gateway_mock"
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        let script = self.scripts.lock().unwrap().pop_front();
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            match script {
                Some(chunks) => {
                    for chunk in chunks {
                        if tx.send(Ok(chunk)).await.is_err() {
                            return;
                        }
                    }
                }
                None => tx.closed().await,
            }
        });
        Ok(rx)
    }
}

pub fn text_script(text: &str) -> Vec<StreamChunk> {
    vec![
        StreamChunk {
            content: Some(text.into()),
            ..Default::default()
        },
        StreamChunk {
            done: true,
            ..Default::default()
        },
    ]
}

pub fn tool_script(id: &str, name: &str, arguments: &str) -> Vec<StreamChunk> {
    vec![StreamChunk {
        tool_calls: vec![ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }],
        done: true,
        ..Default::default()
    }]
}

pub fn orchestrator_with(
    scripts: Vec<Vec<StreamChunk>>,
) -> (Arc<StepOrchestrator>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::default());
    let tools = Arc::new(deepdive_tools::default_registry(&SearchConfig::default()));
    let orchestrator = StepOrchestrator::new(
        Arc::new(MockProvider::new(scripts)),
        "mock-model",
        tools,
        bus.clone(),
    );
    (Arc::new(orchestrator), bus)
}

pub fn test_state(scripts: Vec<Vec<StreamChunk>>) -> SharedState {
    let (orchestrator, bus) = orchestrator_with(scripts);
    Arc::new(GatewayState::new(orchestrator, bus))
}
