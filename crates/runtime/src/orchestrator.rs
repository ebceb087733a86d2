//! The tool-calling conversation loop.
//!
//! A run alternates between asking the model and executing the tools it
//! requested until the model answers in plain text, the iteration budget runs
//! out, or something fatal happens. Recoverable tool failures are handed back
//! to the model as results; only a lost transport, an unreachable model or a
//! reply the loop cannot act on ends a run early.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::Error;
use crate::classify::classify;
use crate::client::{Connector, Session, ToolExecutionClient};
use crate::conversation::{Conversation, ToolInvocationResult};
use crate::journal::Journal;
use crate::model::{Backend, ModelReply, ModelRequest, ToolCall, Usage};

/// Loop limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Model round trips allowed per run.
    pub max_iterations: u32,
    /// Deadline for a single tool invocation.
    pub tool_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_timeout: Duration::from_secs(60),
        }
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum Outcome {
    /// The model answered in plain text.
    Answer(String),
    /// The iteration budget ran out first. Carries the latest assistant text
    /// of the run, or a note saying there was none.
    TruncatedAnswer(String),
    /// The run could not complete.
    FatalError(Error),
}

impl Outcome {
    /// Short name used in logs and the event journal.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Answer(_) => "answer",
            Self::TruncatedAnswer(_) => "truncated",
            Self::FatalError(_) => "fatal",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalError(_))
    }

    /// The answer text, if the run produced one.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Answer(text) | Self::TruncatedAnswer(text) => Some(text),
            Self::FatalError(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Model calls made.
    pub iterations: u32,
    /// Tool calls resolved, including rejected ones.
    pub tool_calls_executed: u32,
    pub usage: Usage,
}

/// The result of one run: the outcome and the conversation it left behind.
///
/// The conversation is always consistent. A batch of tool calls interrupted
/// by a fatal error is dropped whole.
#[derive(Debug)]
pub struct Run {
    pub outcome: Outcome,
    pub conversation: Conversation,
    pub stats: RunStats,
}

/// Drives conversations between a model backend and a tool host.
pub struct Orchestrator<B, C> {
    backend: B,
    client: ToolExecutionClient<C>,
    config: OrchestratorConfig,
    journal: Option<Journal>,
}

impl<B: Backend, C: Connector> Orchestrator<B, C> {
    pub fn new(backend: B, client: ToolExecutionClient<C>, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            client,
            config,
            journal: None,
        }
    }

    /// Record every run in `journal`.
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn client(&self) -> &ToolExecutionClient<C> {
        &self.client
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Open a session, run one message through it and close it again,
    /// whatever the outcome.
    pub async fn run_scoped(&self, system: &str, user_message: &str) -> Run {
        let session = match self.client.open().await {
            Ok(session) => session,
            Err(err) => {
                let mut conversation = Conversation::new(system);
                conversation.push_user(user_message);
                return self.finish(conversation, RunStats::default(), Outcome::FatalError(err));
            }
        };
        let run = self.run(&session, system, user_message).await;
        self.client.close(&session).await;
        run
    }

    /// Run one message in a fresh conversation on an open session.
    pub async fn run(
        &self,
        session: &Session<C::Transport>,
        system: &str,
        user_message: &str,
    ) -> Run {
        self.drive(session, Conversation::new(system), 0, user_message)
            .await
    }

    /// Run one more message on top of an earlier conversation.
    ///
    /// Only turns added by this run are journaled.
    pub async fn run_continuing(
        &self,
        session: &Session<C::Transport>,
        history: Conversation,
        user_message: &str,
    ) -> Run {
        let recorded = history.len();
        self.drive(session, history, recorded, user_message).await
    }

    async fn drive(
        &self,
        session: &Session<C::Transport>,
        mut conversation: Conversation,
        mut recorded: usize,
        user_message: &str,
    ) -> Run {
        conversation.push_user(user_message);
        let run_start = conversation.len();
        self.record(&conversation, &mut recorded);

        let tools = session.catalog().to_model_format();
        let max_iterations = self.config.max_iterations;
        let mut stats = RunStats::default();

        for iteration in 1..=max_iterations {
            stats.iterations = iteration;
            let messages = conversation.to_messages();
            let request = ModelRequest {
                messages: &messages,
                tools: &tools,
            };
            debug!(session = %session.id(), iteration, messages = messages.len(), "calling model");

            let response = match self.backend.call(request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(session = %session.id(), iteration, error = %err, "model call failed");
                    return self.finish(conversation, stats, Outcome::FatalError(err.into()));
                }
            };
            stats.usage += response.usage;

            let (text, calls) = match response.reply {
                ModelReply::Text(text) if !text.trim().is_empty() => {
                    conversation.push_assistant_text(text.clone());
                    self.record(&conversation, &mut recorded);
                    return self.finish(conversation, stats, Outcome::Answer(text));
                }
                ModelReply::ToolRequest { text, calls } if !calls.is_empty() => (text, calls),
                ModelReply::ToolRequest {
                    text: Some(text), ..
                } if !text.trim().is_empty() => {
                    conversation.push_assistant_text(text.clone());
                    self.record(&conversation, &mut recorded);
                    return self.finish(conversation, stats, Outcome::Answer(text));
                }
                _ => {
                    let err = Error::ProtocolViolation(
                        "model reply had no text and no tool calls".into(),
                    );
                    return self.finish(conversation, stats, Outcome::FatalError(err));
                }
            };

            info!(session = %session.id(), iteration, calls = calls.len(), "model requested tools");
            let mut results = Vec::with_capacity(calls.len());
            match self.execute_batch(session, &calls, &mut results, &mut stats).await {
                Ok(()) => {
                    conversation.push_tool_exchange(text, calls, results);
                    self.record(&conversation, &mut recorded);
                }
                Err(err) => {
                    warn!(session = %session.id(), iteration, error = %err, "tool transport lost");
                    if let Some(journal) = &self.journal {
                        journal.record_abandoned_batch(text, &calls, &results);
                    }
                    self.client.close(session).await;
                    return self.finish(conversation, stats, Outcome::FatalError(err));
                }
            }
        }

        let answer = conversation
            .last_assistant_text_since(run_start)
            .map(String::from)
            .unwrap_or_else(|| {
                format!("reached the limit of {max_iterations} tool iterations without a final answer")
            });
        self.finish(conversation, stats, Outcome::TruncatedAnswer(answer))
    }

    /// Resolve every call of one assistant turn, strictly in listed order.
    ///
    /// Recoverable failures become results. A lost transport abandons the
    /// batch; `results` then ends with the failed call's result.
    async fn execute_batch(
        &self,
        session: &Session<C::Transport>,
        calls: &[ToolCall],
        results: &mut Vec<ToolInvocationResult>,
        stats: &mut RunStats,
    ) -> Result<(), Error> {
        for call in calls {
            debug!(session = %session.id(), tool = %call.name, call_id = %call.id, "tool call");
            let result = match session.catalog().to_host_arguments(call) {
                Ok(arguments) => {
                    self.client
                        .invoke(session, &call.name, arguments, self.config.tool_timeout)
                        .await
                }
                Err(malformed) => {
                    let error = classify(malformed.into());
                    warn!(tool = %call.name, call_id = %call.id, "rejected tool call: {}", error.message);
                    ToolInvocationResult::Error(error)
                }
            };
            let fatal = result
                .error()
                .filter(|err| !err.kind.is_recoverable())
                .map(|err| Error::TransportLost(err.message.clone()));
            results.push(result);
            if let Some(err) = fatal {
                return Err(err);
            }
            stats.tool_calls_executed += 1;
        }
        Ok(())
    }

    fn record(&self, conversation: &Conversation, recorded: &mut usize) {
        if let Some(journal) = &self.journal {
            journal.record_turns(&conversation.turns()[*recorded..]);
        }
        *recorded = conversation.len();
    }

    fn finish(&self, conversation: Conversation, stats: RunStats, outcome: Outcome) -> Run {
        info!(
            outcome = outcome.label(),
            iterations = stats.iterations,
            tool_calls = stats.tool_calls_executed,
            tokens = stats.usage.total_tokens(),
            "run finished"
        );
        if let Some(journal) = &self.journal {
            journal.record_run_end(&outcome, &stats);
        }
        Run {
            outcome,
            conversation,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorKind;
    use crate::conversation::Turn;
    use crate::model::{ModelError, ModelResponse, Part};
    use crate::test_support::{
        Behavior, FakeConnector, FakeHost, ScriptedBackend, call, echo_tool, text, tool_request,
        usage,
    };
    use serde_json::json;
    use storage::{EventKind, EventStore};

    const SYSTEM: &str = "You are a helpful assistant.";

    fn orchestrator(
        host: &FakeHost,
        script: Vec<Result<ModelResponse, ModelError>>,
    ) -> Orchestrator<ScriptedBackend, FakeConnector> {
        orchestrator_with(host, script, OrchestratorConfig::default())
    }

    fn orchestrator_with(
        host: &FakeHost,
        script: Vec<Result<ModelResponse, ModelError>>,
        config: OrchestratorConfig,
    ) -> Orchestrator<ScriptedBackend, FakeConnector> {
        Orchestrator::new(
            ScriptedBackend::new(script),
            ToolExecutionClient::new(FakeConnector::new(host.clone())),
            config,
        )
    }

    fn result_error_kind(turn: &Turn) -> Option<ErrorKind> {
        match turn {
            Turn::ToolResult { result, .. } => result.error().map(|e| e.kind),
            _ => None,
        }
    }

    #[tokio::test]
    async fn echo_round_trip_answers() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({"text": "hi"}))]),
                text("hi"),
            ],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Say hi using the echo tool").await;

        assert!(matches!(&run.outcome, Outcome::Answer(answer) if answer == "hi"));
        let turns = run.conversation.turns();
        assert_eq!(turns.len(), 5);
        assert!(matches!(turns[0], Turn::System { .. }));
        assert!(matches!(turns[1], Turn::User { .. }));
        assert!(matches!(turns[2], Turn::AssistantToolRequest { .. }));
        assert_eq!(
            turns[3],
            Turn::ToolResult {
                call_id: "call_1".into(),
                tool: "echo".into(),
                result: ToolInvocationResult::Ok { payload: json!("hi") },
            }
        );
        assert!(matches!(&turns[4], Turn::AssistantText { text } if text == "hi"));
        assert!(run.conversation.is_consistent());

        assert_eq!(run.stats.iterations, 2);
        assert_eq!(run.stats.tool_calls_executed, 1);
        assert_eq!(run.stats.usage.total_tokens(), 2 * usage().total_tokens());
        assert_eq!(host.state().shutdowns, 1);
    }

    #[tokio::test]
    async fn model_sees_catalog_and_correlated_results() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("toolu_01", "echo", json!({"text": "hi"}))]),
                text("hi"),
            ],
        );

        orchestrator.run_scoped(SYSTEM, "Say hi").await;

        let requests = orchestrator.backend().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].1.len(), 1);
        assert_eq!(requests[0].1[0].name, "echo");

        let last = requests[1].0.last().unwrap();
        match &last.parts[..] {
            [Part::ToolResult(result)] => {
                assert_eq!(result.tool_call_id, "toolu_01");
                assert_eq!(result.content, "hi");
                assert!(!result.is_error);
            }
            other => panic!("unexpected parts {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_recoverable() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "unknown_tool", json!({}))]),
                text("Sorry, I can't do that."),
            ],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Do something odd").await;

        assert!(matches!(run.outcome, Outcome::Answer(_)));
        assert_eq!(
            result_error_kind(&run.conversation.turns()[3]),
            Some(ErrorKind::MalformedCall)
        );
        assert!(host.state().calls.is_empty());
    }

    #[tokio::test]
    async fn missing_argument_lets_model_retry() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({}))]),
                tool_request(None, vec![call("call_2", "echo", json!({"text": "hi"}))]),
                text("hi"),
            ],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Say hi").await;

        assert!(matches!(run.outcome, Outcome::Answer(_)));
        let turns = run.conversation.turns();
        assert_eq!(result_error_kind(&turns[3]), Some(ErrorKind::MalformedCall));
        assert_eq!(result_error_kind(&turns[5]), None);
        assert_eq!(host.state().calls.len(), 1);
    }

    #[tokio::test]
    async fn host_fault_goes_back_to_model() {
        let host = FakeHost::new(vec![echo_tool()]);
        host.set("echo", Behavior::Fail("element not found".into()));
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({"text": "hi"}))]),
                text("The host could not do it."),
            ],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Say hi").await;

        assert!(matches!(run.outcome, Outcome::Answer(_)));
        assert_eq!(
            result_error_kind(&run.conversation.turns()[3]),
            Some(ErrorKind::HostFault)
        );
        let requests = orchestrator.backend().requests();
        let results = requests[1].0.last().unwrap().tool_results().len();
        assert_eq!(results, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_tool_times_out_and_session_stays_usable() {
        let host = FakeHost::new(vec![echo_tool()]);
        host.set("echo", Behavior::Hang);
        let orchestrator = orchestrator_with(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({"text": "hi"}))]),
                text("The tool did not answer."),
            ],
            OrchestratorConfig {
                max_iterations: 5,
                tool_timeout: Duration::from_secs(2),
            },
        );
        let session = orchestrator.client().open().await.unwrap();

        let run = orchestrator.run(&session, SYSTEM, "Say hi").await;

        assert!(matches!(run.outcome, Outcome::Answer(_)));
        assert_eq!(
            result_error_kind(&run.conversation.turns()[3]),
            Some(ErrorKind::HostTimeout)
        );
        assert!(!session.is_busy());
        assert!(!session.is_closed());
        assert_eq!(host.state().in_flight, 0);
    }

    #[tokio::test]
    async fn batch_runs_in_listed_order_one_at_a_time() {
        let host = FakeHost::new(vec![echo_tool()]);
        host.set("echo", Behavior::Delay(Duration::from_millis(5)));
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(
                    Some("Echoing three times."),
                    vec![
                        call("a", "echo", json!({"text": "one"})),
                        call("b", "echo", json!({"text": "two"})),
                        call("c", "echo", json!({"text": "three"})),
                    ],
                ),
                text("one two three"),
            ],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Count").await;

        assert!(matches!(run.outcome, Outcome::Answer(_)));
        let state = host.state();
        assert_eq!(state.max_in_flight, 1);
        assert_eq!(
            state.events,
            ["start:echo", "end:echo", "start:echo", "end:echo", "start:echo", "end:echo"]
        );
        let texts: Vec<_> = state.calls.iter().map(|(_, args)| args["text"].clone()).collect();
        assert_eq!(texts, [json!("one"), json!("two"), json!("three")]);

        let ids: Vec<_> = run.conversation.turns()[3..6]
            .iter()
            .map(|turn| match turn {
                Turn::ToolResult { call_id, .. } => call_id.as_str(),
                other => panic!("unexpected turn {other:?}"),
            })
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn transport_loss_is_fatal_and_closes_once() {
        let drop_tool = toolhost::ToolDescriptor {
            name: "drop".into(),
            description: "Kill the host".into(),
            parameters: Default::default(),
        };
        let host = FakeHost::new(vec![echo_tool(), drop_tool]);
        host.set("drop", Behavior::Drop);
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({"text": "hi"}))]),
                tool_request(
                    None,
                    vec![
                        call("call_2", "echo", json!({"text": "ok"})),
                        call("call_3", "drop", json!({})),
                    ],
                ),
                text("never reached"),
            ],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Say hi twice").await;

        assert!(matches!(run.outcome, Outcome::FatalError(Error::TransportLost(_))));
        assert!(run.conversation.is_consistent());
        // The interrupted batch is dropped whole.
        assert_eq!(run.conversation.len(), 4);
        assert!(matches!(run.conversation.turns()[3], Turn::ToolResult { .. }));
        assert_eq!(run.stats.tool_calls_executed, 2);
        assert_eq!(orchestrator.backend().requests().len(), 2);
        assert_eq!(host.state().shutdowns, 1);
    }

    #[tokio::test]
    async fn iteration_cap_truncates_with_note() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator_with(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({"text": "a"}))]),
                tool_request(None, vec![call("call_2", "echo", json!({"text": "b"}))]),
                text("too late"),
            ],
            OrchestratorConfig {
                max_iterations: 2,
                ..OrchestratorConfig::default()
            },
        );

        let run = orchestrator.run_scoped(SYSTEM, "Loop").await;

        match &run.outcome {
            Outcome::TruncatedAnswer(text) => assert_eq!(
                text,
                "reached the limit of 2 tool iterations without a final answer"
            ),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(orchestrator.backend().requests().len(), 2);
        assert!(run.conversation.is_consistent());
        assert_eq!(host.state().shutdowns, 1);
    }

    #[tokio::test]
    async fn truncation_keeps_latest_preamble() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator_with(
            &host,
            vec![tool_request(
                Some("Checking the calendar."),
                vec![call("call_1", "echo", json!({"text": "a"}))],
            )],
            OrchestratorConfig {
                max_iterations: 1,
                ..OrchestratorConfig::default()
            },
        );

        let run = orchestrator.run_scoped(SYSTEM, "What's on today?").await;

        assert!(
            matches!(&run.outcome, Outcome::TruncatedAnswer(text) if text == "Checking the calendar.")
        );
    }

    #[tokio::test]
    async fn zero_iterations_never_calls_model() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator_with(
            &host,
            vec![text("unused")],
            OrchestratorConfig {
                max_iterations: 0,
                ..OrchestratorConfig::default()
            },
        );

        let run = orchestrator.run_scoped(SYSTEM, "Hello").await;

        assert!(matches!(run.outcome, Outcome::TruncatedAnswer(_)));
        assert!(orchestrator.backend().requests().is_empty());
        assert_eq!(run.stats.iterations, 0);
    }

    #[tokio::test]
    async fn unreachable_model_is_fatal() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![Err(ModelError::Network("connection refused".into()))],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Hello").await;

        assert!(matches!(
            run.outcome,
            Outcome::FatalError(Error::ModelServiceUnavailable(_))
        ));
        assert_eq!(run.conversation.len(), 2);
        assert_eq!(host.state().shutdowns, 1);
    }

    #[tokio::test]
    async fn empty_reply_is_protocol_violation() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![tool_request(None, vec![])],
        );

        let run = orchestrator.run_scoped(SYSTEM, "Hello").await;

        assert!(matches!(
            run.outcome,
            Outcome::FatalError(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_fatal() {
        let orchestrator = Orchestrator::new(
            ScriptedBackend::new(vec![text("unused")]),
            ToolExecutionClient::new(FakeConnector::unreachable()),
            OrchestratorConfig::default(),
        );

        let run = orchestrator.run_scoped(SYSTEM, "Hello").await;

        assert!(matches!(run.outcome, Outcome::FatalError(Error::Connection(_))));
        assert_eq!(run.conversation.len(), 2);
        assert!(orchestrator.backend().requests().is_empty());
    }

    #[tokio::test]
    async fn continuing_run_keeps_history_and_session() {
        let host = FakeHost::new(vec![echo_tool()]);
        let orchestrator = orchestrator(
            &host,
            vec![text("Hello!"), text("You said hello.")],
        );
        let session = orchestrator.client().open().await.unwrap();

        let first = orchestrator.run(&session, SYSTEM, "Hello").await;
        let second = orchestrator
            .run_continuing(&session, first.conversation, "What did I say?")
            .await;
        orchestrator.client().close(&session).await;

        assert!(matches!(&second.outcome, Outcome::Answer(text) if text == "You said hello."));
        assert_eq!(second.conversation.len(), 5);
        assert_eq!(orchestrator.backend().requests()[1].0.len(), 4);
        assert_eq!(host.state().catalog_fetches, 1);
    }

    #[tokio::test]
    async fn journal_records_turns_and_outcome() {
        let host = FakeHost::new(vec![echo_tool()]);
        let journal = Journal::start(EventStore::in_memory().unwrap()).unwrap();
        let orchestrator = orchestrator(
            &host,
            vec![
                tool_request(None, vec![call("call_1", "echo", json!({"text": "hi"}))]),
                text("hi"),
            ],
        )
        .with_journal(journal);

        orchestrator.run_scoped(SYSTEM, "Say hi").await;

        let events = orchestrator.journal().unwrap().events().unwrap();
        let names: Vec<_> = events.iter().map(|e| e.kind.name()).collect();
        assert_eq!(
            names,
            [
                "conversation_start",
                "message",
                "message",
                "tool_call",
                "tool_result",
                "message",
                "run_end"
            ]
        );
        assert_eq!(
            events[6].kind,
            EventKind::RunEnd {
                outcome: "answer".into(),
                iterations: 2,
                tool_calls: 1,
                error: None,
            }
        );
    }

    #[tokio::test]
    async fn journal_keeps_calls_of_abandoned_batch() {
        let drop_tool = toolhost::ToolDescriptor {
            name: "drop".into(),
            description: "Kill the host".into(),
            parameters: Default::default(),
        };
        let host = FakeHost::new(vec![echo_tool(), drop_tool]);
        host.set("drop", Behavior::Drop);
        let journal = Journal::start(EventStore::in_memory().unwrap()).unwrap();
        let orchestrator = orchestrator(
            &host,
            vec![tool_request(
                None,
                vec![
                    call("call_1", "echo", json!({"text": "hi"})),
                    call("call_2", "drop", json!({})),
                    call("call_3", "echo", json!({"text": "unreached"})),
                ],
            )],
        )
        .with_journal(journal);

        let run = orchestrator.run_scoped(SYSTEM, "Say hi").await;

        assert!(matches!(run.outcome, Outcome::FatalError(Error::TransportLost(_))));
        assert_eq!(run.conversation.len(), 2);
        let ran: Vec<_> = host.state().calls.iter().map(|(name, _)| name.clone()).collect();
        assert_eq!(ran, ["echo", "drop"]);

        let events = orchestrator.journal().unwrap().events().unwrap();
        let names: Vec<_> = events.iter().map(|e| e.kind.name()).collect();
        assert_eq!(
            names,
            [
                "conversation_start",
                "message",
                "message",
                "tool_call",
                "tool_call",
                "tool_result",
                "tool_result",
                "run_end"
            ]
        );
        match &events[6].kind {
            EventKind::ToolResult {
                call_id,
                error_kind,
                ..
            } => {
                assert_eq!(call_id, "call_2");
                assert_eq!(error_kind.as_deref(), Some("transport_lost"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[7].kind {
            EventKind::RunEnd {
                outcome,
                tool_calls,
                error,
                ..
            } => {
                assert_eq!(outcome, "fatal");
                assert_eq!(*tool_calls, 1);
                assert!(error.as_deref().is_some_and(|e| !e.is_empty()));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
