//! Test harnesses for session tests.
//!
//! Connections are driven through the real transport adapter over in-memory
//! channels (no network).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use biogate_core::{EnrollmentSession, ServerMessage, SessionStatus, SubjectKey};
use biogate_daemon::config::SessionConfig;
use biogate_daemon::provider::{CaptureError, CaptureOutcome, CaptureProvider};
use biogate_daemon::transport::{run_connection, InboundFrame};
use biogate_daemon::{DeviceArbiter, SessionContext, SimulatedProvider, SimulatedStep};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

/// How long a test waits for a message before failing.
const RECV_TIMEOUT: Duration = Duration::from_secs(3600);

/// Shared device, provider and settings for a group of test clients.
pub struct TestDaemon {
    pub arbiter: DeviceArbiter,
    pub provider: Arc<ProbedProvider>,
    pub config: SessionConfig,
}

impl TestDaemon {
    /// Daemon with default settings and the given capture script.
    pub fn new(steps: impl IntoIterator<Item = SimulatedStep>) -> Self {
        Self::with_config(steps, SessionConfig::default())
    }

    pub fn with_config(
        steps: impl IntoIterator<Item = SimulatedStep>,
        config: SessionConfig,
    ) -> Self {
        Self::with_provider(SimulatedProvider::new().with_script(steps), config)
    }

    pub fn with_provider(provider: SimulatedProvider, config: SessionConfig) -> Self {
        Self {
            arbiter: DeviceArbiter::new(),
            provider: Arc::new(ProbedProvider::new(provider)),
            config,
        }
    }

    pub fn context(&self) -> SessionContext {
        SessionContext::new(
            self.arbiter.clone(),
            self.provider.clone(),
            self.config.clone(),
        )
    }

    /// Open a new connection for `subject`.
    pub fn connect(&self, subject: &str) -> TestClient {
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let (text_tx, text_rx) = mpsc::channel(256);

        let task = tokio::spawn(run_connection(
            self.context(),
            SubjectKey::new(subject),
            ReceiverStream::new(frame_rx),
            PollSender::new(text_tx),
        ));

        TestClient {
            frames: frame_tx,
            texts: text_rx,
            task,
        }
    }
}

/// Client end of one test connection.
pub struct TestClient {
    frames: mpsc::Sender<InboundFrame>,
    texts: mpsc::Receiver<String>,
    task: JoinHandle<Option<EnrollmentSession>>,
}

#[allow(dead_code)]
impl TestClient {
    pub async fn send_frame(&self, frame: InboundFrame) {
        self.frames.send(frame).await.expect("connection task gone");
    }

    pub async fn send_text(&self, text: &str) {
        self.send_frame(InboundFrame::Text(text.to_string())).await;
    }

    pub async fn action(&self, action: &str) {
        self.send_text(&format!(r#"{{"action":"{action}"}}"#)).await;
    }

    pub async fn start_capture(&self) {
        self.action("start_capture").await;
    }

    pub async fn get_status(&self) {
        self.action("get_status").await;
    }

    pub async fn cancel(&self) {
        self.action("cancel").await;
    }

    /// Next raw outbound frame.
    pub async fn recv_text(&mut self) -> String {
        tokio::time::timeout(RECV_TIMEOUT, self.texts.recv())
            .await
            .expect("timed out waiting for message")
            .expect("connection closed")
    }

    /// Next outbound message, parsed.
    pub async fn recv(&mut self) -> ServerMessage {
        let text = self.recv_text().await;
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("bad message {text}: {e}"))
    }

    /// Messages up to and including the next terminal one.
    pub async fn recv_until_terminal(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        loop {
            let message = self.recv().await;
            let terminal = message.is_terminal();
            messages.push(message);
            if terminal {
                return messages;
            }
        }
    }

    /// Receive until a message of `kind` arrives; returns everything seen.
    pub async fn recv_until(&mut self, kind: &str) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        loop {
            let message = self.recv().await;
            let found = message.kind() == kind;
            messages.push(message);
            if found {
                return messages;
            }
        }
    }

    /// Next message, which must be a status reply.
    pub async fn recv_status(&mut self) -> SessionStatus {
        match self.recv().await {
            ServerMessage::Status { status } => status,
            other => panic!("expected status, got {other:?}"),
        }
    }

    /// True if no message is waiting.
    pub fn is_quiet(&mut self) -> bool {
        self.texts.try_recv().is_err()
    }

    /// Close the connection and wait for the session to wind down.
    pub async fn close(self) -> EnrollmentSession {
        let _ = self.frames.send(InboundFrame::Closed).await;
        drop(self.frames);
        self.task
            .await
            .expect("connection task panicked")
            .expect("session task panicked")
    }
}

/// Wire `type` names of `messages`, in order.
#[allow(dead_code)]
pub fn kinds(messages: &[ServerMessage]) -> Vec<&'static str> {
    messages.iter().map(ServerMessage::kind).collect()
}

/// Wraps a simulated scanner and records how many sessions use it at once.
pub struct ProbedProvider {
    inner: SimulatedProvider,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[allow(dead_code)]
impl ProbedProvider {
    pub fn new(inner: SimulatedProvider) -> Self {
        Self {
            inner,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &SimulatedProvider {
        &self.inner
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CaptureProvider for ProbedProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn initialize(&self) -> Result<(), CaptureError> {
        let _guard = self.enter();
        self.inner.initialize().await
    }

    async fn capture(&self, timeout: Duration) -> Result<CaptureOutcome, CaptureError> {
        let _guard = self.enter();
        self.inner.capture(timeout).await
    }
}
