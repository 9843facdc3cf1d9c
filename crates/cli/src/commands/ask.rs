//! `deepdive ask`: Research one question in the terminal.
//!
//! Runs a single turn in-process. `getUserTimezone` is answered from the
//! local clock, approvals are asked on stdin, and Ctrl-C cancels the turn.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use deepdive_agent::{
    ExternalResolution, FinishReason, StepOrchestrator, TurnHandle, TurnIo, TurnOutcome, UiEvent,
};
use deepdive_config::AppConfig;
use deepdive_core::event::EventBus;
use deepdive_core::message::{Conversation, Message, ToolOutput};
use deepdive_core::tool::ToolKind;
use deepdive_tools::TimezoneAnswer;

pub async fn run(question: String, model: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    if let Some(model) = model {
        config.default_model = model;
    }

    // Check for API key early and give a clear error
    if !config.has_api_key() {
        eprintln!();
        eprintln!("  ERROR: No API key configured!");
        eprintln!();
        eprintln!("  Set one of these environment variables:");
        eprintln!("    OPENROUTER_API_KEY = 'sk-or-v1-...'   (recommended)");
        eprintln!("    OPENAI_API_KEY     = 'sk-...'         (for OpenAI direct)");
        eprintln!("    DEEPDIVE_API_KEY   = 'sk-...'         (generic)");
        eprintln!();
        eprintln!("  Or add it to your config file:");
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
        eprintln!();
        return Err("No API key found. See above for setup instructions.".into());
    }

    let router = deepdive_providers::build_from_config(&config);
    let provider = router.default().ok_or("No default provider configured")?;
    let tools = Arc::new(deepdive_tools::build_registry(&config)?);
    let orchestrator =
        StepOrchestrator::from_config(&config, provider, tools, Arc::new(EventBus::default()));

    let mut conversation = Conversation::new();
    conversation.push(Message::user(question));

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let outcome = drive(
        &orchestrator,
        &conversation,
        std::io::stdout(),
        interrupt,
        read_approval,
    )
    .await;

    match outcome.finish {
        FinishReason::Stop => Ok(()),
        FinishReason::StepLimit => {
            eprintln!("\n  [Stopped after {} research steps]", outcome.steps);
            Ok(())
        }
        FinishReason::Cancelled => {
            eprintln!("\n  [Cancelled]");
            Ok(())
        }
        FinishReason::Error => Err(outcome
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "generation failed".into())
            .into()),
    }
}

/// Run one turn, rendering events to `out`. The turn is cancelled when
/// `interrupt` completes. `ask_approval` answers approval prompts; a
/// pending answer is abandoned as a rejection once the turn is cancelled.
pub(crate) async fn drive<W, F, A, AF>(
    orchestrator: &StepOrchestrator,
    conversation: &Conversation,
    mut out: W,
    interrupt: F,
    mut ask_approval: A,
) -> TurnOutcome
where
    W: Write,
    F: Future<Output = ()> + Send + 'static,
    A: FnMut() -> AF,
    AF: Future<Output = bool>,
{
    let (io, handle) = TurnIo::channel(256);
    let TurnHandle {
        mut events,
        resolutions,
        cancel,
    } = handle;

    let cancelled = cancel.clone();
    let watcher = tokio::spawn(async move {
        interrupt.await;
        cancel.cancel();
    });

    let render_loop = async {
        while let Some(event) = events.recv().await {
            let reply = match &event {
                UiEvent::ApprovalRequested {
                    approval_id,
                    tool_name,
                    input,
                    ..
                } => {
                    let _ = write!(out, "\n  Allow {tool_name} with {input}? [y/N] ");
                    let _ = out.flush();
                    let approved = tokio::select! {
                        approved = ask_approval() => approved,
                        () = cancelled.cancelled() => false,
                    };
                    Some(ExternalResolution::Approval {
                        approval_id: approval_id.clone(),
                        approved,
                    })
                }
                _ => render(&event, &mut out),
            };
            if let Some(reply) = reply {
                let _ = resolutions.send(reply).await;
            }
        }
    };

    let (outcome, ()) = tokio::join!(orchestrator.run(conversation, io), render_loop);
    watcher.abort();
    outcome
}

/// Write one event; return the answer to send back if it needs one.
fn render(event: &UiEvent, out: &mut impl Write) -> Option<ExternalResolution> {
    match event {
        UiEvent::TextDelta { delta } => {
            let _ = write!(out, "{delta}");
            let _ = out.flush();
            None
        }
        UiEvent::ToolInputAvailable { tool_name, input, .. } => {
            let detail = input
                .get("query")
                .and_then(|q| q.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| input.to_string());
            let _ = writeln!(out, "\n  > {tool_name}: {detail}");
            None
        }
        UiEvent::ToolOutputError { error_text, .. } => {
            let _ = writeln!(out, "  ! {error_text}");
            None
        }
        UiEvent::ToolAwaitingClient {
            call_id, tool_name, ..
        } => {
            let output = match ToolKind::from_name(tool_name) {
                Some(ToolKind::GetUserTimezone) => ToolOutput::Value(local_timezone().to_value()),
                _ => ToolOutput::Error(format!("{tool_name} is not available in the terminal")),
            };
            Some(ExternalResolution::ToolOutput {
                call_id: call_id.clone(),
                output,
            })
        }
        UiEvent::Error { message } => {
            let _ = writeln!(out, "\n  [Error] {message}");
            None
        }
        UiEvent::Finish { .. } => {
            let _ = writeln!(out);
            None
        }
        _ => None,
    }
}

/// Read a y/N answer from stdin.
///
/// The read runs on a detached thread rather than the blocking pool so an
/// unanswered prompt never holds up runtime shutdown after Ctrl-C.
fn read_approval() -> impl Future<Output = bool> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let mut line = String::new();
        let approved = std::io::stdin().read_line(&mut line).is_ok()
            && line.trim().eq_ignore_ascii_case("y");
        let _ = tx.send(approved);
    });
    async move { rx.await.unwrap_or(false) }
}

/// The user's timezone as seen from this machine.
pub(crate) fn local_timezone() -> TimezoneAnswer {
    let now = chrono::Local::now().fixed_offset();
    let name = std::env::var("TZ")
        .ok()
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| now.offset().to_string());
    TimezoneAnswer::new(name, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use deepdive_config::SearchConfig;
    use deepdive_core::error::ProviderError;
    use deepdive_core::message::Part;
    use deepdive_core::tool::ToolRegistry;
    use deepdive_core::provider::{
        ChunkReceiver, GenerationRequest, Provider, StreamChunk, ToolCallRequest,
    };
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Plays back one chunk list per call; hangs once out of scripts.
    struct ScriptedProvider {
        scripts: Mutex<Vec<Vec<StreamChunk>>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "cli_mock"
        }

        async fn stream(&self, _request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                (!scripts.is_empty()).then(|| scripts.remove(0))
            };
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(async move {
                match script {
                    Some(chunks) => {
                        for chunk in chunks {
                            let _ = tx.send(Ok(chunk)).await;
                        }
                    }
                    None => tx.closed().await,
                }
            });
            Ok(rx)
        }
    }

    fn orchestrator(scripts: Vec<Vec<StreamChunk>>) -> StepOrchestrator {
        orchestrator_with(scripts, deepdive_tools::default_registry(&SearchConfig::default()))
    }

    fn orchestrator_with(scripts: Vec<Vec<StreamChunk>>, tools: ToolRegistry) -> StepOrchestrator {
        StepOrchestrator::new(
            Arc::new(ScriptedProvider {
                scripts: Mutex::new(scripts),
            }),
            "mock",
            Arc::new(tools),
            Arc::new(EventBus::default()),
        )
    }

    /// A model that asks for one gated web search, then answers.
    fn gated_search() -> StepOrchestrator {
        let mut tools = deepdive_tools::default_registry(&SearchConfig::default());
        tools.require_approval(ToolKind::WebSearch);
        orchestrator_with(
            vec![
                vec![StreamChunk {
                    tool_calls: vec![ToolCallRequest {
                        id: "s1".into(),
                        name: "webSearch".into(),
                        arguments: r#"{"query":"crm pricing"}"#.into(),
                    }],
                    done: true,
                    ..Default::default()
                }],
                text("Answered without searching."),
            ],
            tools,
        )
    }

    fn never_answered() -> std::future::Pending<bool> {
        std::future::pending()
    }

    fn text(t: &str) -> Vec<StreamChunk> {
        vec![
            StreamChunk {
                content: Some(t.into()),
                ..Default::default()
            },
            StreamChunk {
                done: true,
                ..Default::default()
            },
        ]
    }

    #[tokio::test]
    async fn streams_answer_text() {
        let orch = orchestrator(vec![text("Plain answer.")]);
        let mut conversation = Conversation::new();
        conversation.push(Message::user("q"));
        let mut out = Vec::new();

        let outcome = drive(
            &orch,
            &conversation,
            &mut out,
            std::future::pending(),
            never_answered,
        )
        .await;

        assert_eq!(outcome.finish, FinishReason::Stop);
        assert_eq!(String::from_utf8(out).unwrap(), "Plain answer.\n");
    }

    #[tokio::test]
    async fn answers_timezone_locally() {
        let orch = orchestrator(vec![
            vec![StreamChunk {
                tool_calls: vec![ToolCallRequest {
                    id: "tz".into(),
                    name: "getUserTimezone".into(),
                    arguments: "{}".into(),
                }],
                done: true,
                ..Default::default()
            }],
            text("Good morning."),
        ]);
        let mut conversation = Conversation::new();
        conversation.push(Message::user("what time is it?"));

        let outcome = drive(
            &orch,
            &conversation,
            std::io::sink(),
            std::future::pending(),
            never_answered,
        )
        .await;

        assert_eq!(outcome.finish, FinishReason::Stop);
        let answered = outcome.message.parts.iter().any(|p| {
            matches!(p, Part::ToolResult { output: ToolOutput::Value(v), .. } if v.get("localTime").is_some())
        });
        assert!(answered);
    }

    #[tokio::test]
    async fn interrupt_cancels_turn() {
        let orch = orchestrator(vec![]);
        let mut conversation = Conversation::new();
        conversation.push(Message::user("q"));

        let interrupt = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        };
        let outcome = drive(&orch, &conversation, std::io::sink(), interrupt, never_answered).await;
        assert_eq!(outcome.finish, FinishReason::Cancelled);
    }

    #[tokio::test]
    async fn rejected_approval_skips_the_search() {
        let orch = gated_search();
        let mut conversation = Conversation::new();
        conversation.push(Message::user("compare crm tools"));
        let mut out = Vec::new();

        let outcome = drive(
            &orch,
            &conversation,
            &mut out,
            std::future::pending(),
            || async { false },
        )
        .await;

        assert_eq!(outcome.finish, FinishReason::Stop);
        let rendered = String::from_utf8(out).unwrap();
        assert!(rendered.contains("Allow webSearch"));
        assert!(rendered.contains("Answered without searching."));
    }

    #[tokio::test]
    async fn interrupt_during_approval_prompt_cancels_turn() {
        let orch = gated_search();
        let mut conversation = Conversation::new();
        conversation.push(Message::user("compare crm tools"));

        let interrupt = async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        };
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(3),
            drive(&orch, &conversation, std::io::sink(), interrupt, never_answered),
        )
        .await
        .expect("unanswered prompt must not outlive the interrupt");

        assert_eq!(outcome.finish, FinishReason::Cancelled);
    }

    #[test]
    fn local_timezone_has_offset_time() {
        let answer = local_timezone();
        assert!(!answer.timezone.is_empty());
        assert!(chrono::DateTime::parse_from_rfc3339(&answer.local_time).is_ok());
    }
}
