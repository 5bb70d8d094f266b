//! Relay session controller.
//!
//! One [`RelaySession`] owns one client connection: it waits for a user message, streams the
//! backend reply back fragment by fragment, records both sides in its [`SessionMemory`] and
//! closes every cycle with exactly one terminal frame.

use crate::config::RelayConfig;
use crate::core::memory::{SessionMemory, Turn};
use crate::core::traits::{ChatBackend, ClientChannel};
use crate::error::RelayError;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Server to client frame.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub chunk: String,
    pub done: bool,
}

impl OutboundFrame {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self {
            chunk: text.into(),
            done: false,
        }
    }

    pub fn done() -> Self {
        Self {
            chunk: String::new(),
            done: true,
        }
    }

    /// Terminal frame carrying a diagnostic instead of the usual empty chunk.
    pub fn error(e: &RelayError) -> Self {
        Self {
            chunk: format!("Error: {e}"),
            done: true,
        }
    }
}

pub struct RelaySession {
    id: Uuid,
    backend: Arc<dyn ChatBackend>,
    memory: SessionMemory,
    system_turn: Turn,
    window_size: usize,
}

impl RelaySession {
    pub fn new(backend: Arc<dyn ChatBackend>, config: &RelayConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            memory: SessionMemory::new(),
            system_turn: Turn::system(config.system_prompt.clone()),
            window_size: config.window_size,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    /// Serves the connection until the client leaves or sends something undecodable.
    ///
    /// Returns the number of completed request cycles. The session memory is dropped with `self`.
    pub async fn run<C: ClientChannel>(mut self, channel: &mut C) -> usize {
        let mut cycles = 0;

        loop {
            let message = match channel.recv().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    info!("[{}] client disconnected", self.id);
                    break;
                }
                Err(e) => {
                    warn!("[{}] closing session: {e}", self.id);
                    break;
                }
            };

            match self.handle_message(channel, message).await {
                Ok(()) => cycles += 1,
                Err(e) => {
                    info!("[{}] closing session: {e}", self.id);
                    break;
                }
            }
        }

        debug!(
            "[{}] session ended after {cycles} cycles, {} turns",
            self.id,
            self.memory.len()
        );
        cycles
    }

    /// Runs one request cycle for `message`.
    ///
    /// Backend failures are reported to the client as a diagnostic terminal frame and leave the
    /// session usable; only a failed write to the client is returned as `Err`.
    pub async fn handle_message<C: ClientChannel>(
        &mut self,
        channel: &mut C,
        message: String,
    ) -> Result<(), RelayError> {
        self.memory.append(Turn::user(message));
        let view = self.memory.view(self.window_size, &self.system_turn);

        let mut fragments = match self.backend.stream_chat(&view).await {
            Ok(fragments) => fragments,
            Err(e) => {
                error!("[{}] upstream error: {e}", self.id);
                return channel.send(OutboundFrame::error(&e)).await;
            }
        };

        let mut reply = String::new();
        let mut forwarded = 0;

        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(fragment) if fragment.is_empty() => {}
                Ok(fragment) => {
                    // A failed write drops `fragments`, which aborts the upstream read.
                    channel.send(OutboundFrame::chunk(fragment.as_str())).await?;
                    reply.push_str(&fragment);
                    forwarded += 1;
                }
                Err(e) => {
                    warn!("[{}] upstream stream ended early: {e}", self.id);
                    break;
                }
            }
        }
        drop(fragments);

        debug!("[{}] forwarded {forwarded} fragments", self.id);
        self.memory.append(Turn::assistant(reply));

        channel.send(OutboundFrame::done()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::memory::Role;
    use crate::core::traits::FragmentStream;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    enum Reply {
        Fragments(Vec<Result<String, RelayError>>),
        Refused,
    }

    struct ScriptedBackend {
        replies: Mutex<VecDeque<Reply>>,
        views: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedBackend {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                views: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn stream_chat(&self, messages: &[Turn]) -> Result<FragmentStream, RelayError> {
            self.views.lock().unwrap().push(messages.to_vec());
            match self.replies.lock().unwrap().pop_front() {
                Some(Reply::Fragments(items)) => Ok(futures_util::stream::iter(items).boxed()),
                Some(Reply::Refused) | None => {
                    Err(RelayError::Transport("connection refused".to_string()))
                }
            }
        }
    }

    #[derive(Default)]
    struct ScriptedChannel {
        inbound: VecDeque<Result<Option<String>, RelayError>>,
        sent: Vec<OutboundFrame>,
        /// Fail every write after this many frames.
        fail_after: Option<usize>,
    }

    impl ScriptedChannel {
        fn with_messages(messages: &[&str]) -> Self {
            Self {
                inbound: messages.iter().map(|m| Ok(Some(m.to_string()))).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ClientChannel for ScriptedChannel {
        async fn recv(&mut self) -> Result<Option<String>, RelayError> {
            self.inbound.pop_front().unwrap_or(Ok(None))
        }

        async fn send(&mut self, frame: OutboundFrame) -> Result<(), RelayError> {
            if self.fail_after.is_some_and(|n| self.sent.len() >= n) {
                return Err(RelayError::ClientDisconnected);
            }
            self.sent.push(frame);
            Ok(())
        }
    }

    fn ok(s: &str) -> Result<String, RelayError> {
        Ok(s.to_string())
    }

    fn session(backend: Arc<ScriptedBackend>, window_size: usize) -> RelaySession {
        let config = RelayConfig::new("http://unused").with_window_size(window_size);
        RelaySession::new(backend, &config)
    }

    #[tokio::test]
    async fn test_fragments_are_forwarded_then_terminated() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Fragments(vec![
            ok("Hello "),
            ok("World"),
        ])]));
        let mut session = session(backend, 10);
        let mut channel = ScriptedChannel::default();

        session
            .handle_message(&mut channel, "hi".to_string())
            .await
            .unwrap();

        assert_eq!(
            channel.sent,
            vec![
                OutboundFrame::chunk("Hello "),
                OutboundFrame::chunk("World"),
                OutboundFrame::done(),
            ]
        );
        assert_eq!(
            session.memory().turns(),
            &[Turn::user("hi"), Turn::assistant("Hello World")]
        );
    }

    #[tokio::test]
    async fn test_refused_upstream_sends_single_diagnostic_frame() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Refused]));
        let mut session = session(backend, 10);
        let mut channel = ScriptedChannel::default();

        session
            .handle_message(&mut channel, "hi".to_string())
            .await
            .unwrap();

        assert_eq!(channel.sent.len(), 1);
        assert!(channel.sent[0].done);
        assert_eq!(channel.sent[0].chunk, "Error: connection refused");
        assert_eq!(session.memory().turns(), &[Turn::user("hi")]);
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_reply() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Fragments(vec![
            ok("partial"),
            Err(RelayError::Transport("connection reset".to_string())),
            ok("never seen"),
        ])]));
        let mut session = session(backend, 10);
        let mut channel = ScriptedChannel::default();

        session
            .handle_message(&mut channel, "hi".to_string())
            .await
            .unwrap();

        assert_eq!(
            channel.sent,
            vec![OutboundFrame::chunk("partial"), OutboundFrame::done()]
        );
        assert_eq!(session.memory().turns()[1], Turn::assistant("partial"));
    }

    #[tokio::test]
    async fn test_empty_reply_still_records_assistant_turn() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Fragments(vec![ok("")])]));
        let mut session = session(backend, 10);
        let mut channel = ScriptedChannel::default();

        session
            .handle_message(&mut channel, "hi".to_string())
            .await
            .unwrap();

        assert_eq!(channel.sent, vec![OutboundFrame::done()]);
        assert_eq!(session.memory().turns()[1], Turn::assistant(""));
    }

    #[tokio::test]
    async fn test_run_emits_one_terminal_frame_per_message() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Reply::Fragments(vec![ok("a")]),
            Reply::Refused,
            Reply::Fragments(vec![ok("b"), ok("c")]),
        ]));
        let session = session(backend, 10);
        let mut channel = ScriptedChannel::with_messages(&["one", "two", "three"]);

        let cycles = session.run(&mut channel).await;

        assert_eq!(cycles, 3);
        assert_eq!(channel.sent.iter().filter(|f| f.done).count(), 3);
        assert!(channel.sent.last().unwrap().done);
        assert!(channel.sent.iter().filter(|f| !f.done).all(|f| !f.chunk.is_empty()));
    }

    #[tokio::test]
    async fn test_backend_sees_windowed_history() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Reply::Fragments(vec![ok("r1")]),
            Reply::Fragments(vec![ok("r2")]),
            Reply::Fragments(vec![ok("r3")]),
        ]));
        let session = session(backend.clone(), 3);
        let mut channel = ScriptedChannel::with_messages(&["m1", "m2", "m3"]);

        session.run(&mut channel).await;

        let views = backend.views.lock().unwrap();
        assert_eq!(views.len(), 3);
        assert_eq!(views[0].len(), 2);
        let last: Vec<&str> = views[2].iter().map(|t| t.content()).collect();
        assert_eq!(
            last,
            vec![
                "You are an assistant who speaks in gangster slang.",
                "m2",
                "r2",
                "m3"
            ]
        );
        assert_eq!(views[2][0].role(), Role::System);
        assert_eq!(views[2][2].role(), Role::Assistant);
    }

    #[tokio::test]
    async fn test_client_write_failure_ends_session() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Reply::Fragments(vec![ok("a"), ok("b"), ok("c")]),
            Reply::Fragments(vec![ok("unused")]),
        ]));
        let session = session(backend.clone(), 10);
        let mut channel = ScriptedChannel::with_messages(&["one", "two"]);
        channel.fail_after = Some(1);

        let cycles = session.run(&mut channel).await;

        assert_eq!(cycles, 0);
        assert_eq!(channel.sent, vec![OutboundFrame::chunk("a")]);
        assert_eq!(backend.views.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_error_ends_session() {
        let backend = Arc::new(ScriptedBackend::new(vec![Reply::Fragments(vec![ok("a")])]));
        let session = session(backend.clone(), 10);
        let mut channel = ScriptedChannel::default();
        channel
            .inbound
            .push_back(Err(RelayError::ClientProtocol("not json".to_string())));
        channel.inbound.push_back(Ok(Some("ignored".to_string())));

        let cycles = session.run(&mut channel).await;

        assert_eq!(cycles, 0);
        assert!(channel.sent.is_empty());
        assert!(backend.views.lock().unwrap().is_empty());
    }
}
