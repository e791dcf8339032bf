//! Async driver for one enrollment session.
//!
//! The runner task exclusively owns its [`EnrollmentSession`]. Commands come
//! in on a single-consumer queue and messages go out on a bounded channel in
//! the order the session produces them. Closing the command queue is how the
//! transport reports a lost connection.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use biogate_core::{
    CaptureMiss, ClientCommand, EnrollmentSession, FailureReason, InvalidTransition,
    ServerMessage, SessionId, SessionResult, SessionState, SubjectKey, Verdict,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

use crate::arbiter::{ArbiterError, DeviceArbiter, DeviceLease};
use crate::config::SessionConfig;
use crate::provider::{CaptureOutcome, CaptureProvider};

const COMMAND_BUFFER: usize = 16;

/// Extra time a provider gets past its own capture timeout before the runner
/// gives up on the call. Providers report `NoInput` when their timeout
/// elapses; the grace keeps that result from racing the runner's deadline.
/// Never extends past the session deadline.
const PROVIDER_GRACE: Duration = Duration::from_secs(1);

/// Everything a session needs from the daemon.
#[derive(Clone)]
pub struct SessionContext {
    pub arbiter: DeviceArbiter,
    pub provider: Arc<dyn CaptureProvider>,
    pub config: SessionConfig,
}

impl SessionContext {
    pub fn new(
        arbiter: DeviceArbiter,
        provider: Arc<dyn CaptureProvider>,
        config: SessionConfig,
    ) -> Self {
        Self {
            arbiter,
            provider,
            config,
        }
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("arbiter", &self.arbiter)
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Why an in-flight operation stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    TimedOut,
    Cancelled,
    ConnectionLost,
}

/// Connection-side handle to a running session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    commands: Option<mpsc::Sender<ClientCommand>>,
    task: JoinHandle<EnrollmentSession>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Wait for room in the command queue.
    ///
    /// Returns `None` once the runner has exited or the handle was
    /// disconnected. Dropping the future gives up the slot, not a command.
    pub async fn reserve(&self) -> Option<mpsc::Permit<'_, ClientCommand>> {
        self.commands.as_ref()?.reserve().await.ok()
    }

    /// Queue a command, waiting while the queue is full.
    ///
    /// Returns false if the runner has exited or the handle was disconnected.
    pub async fn send(&self, command: ClientCommand) -> bool {
        match self.reserve().await {
            Some(permit) => {
                permit.send(command);
                true
            }
            None => false,
        }
    }

    /// Close the command queue. The runner treats this as a lost connection
    /// and takes the cancel path, releasing the device.
    pub fn disconnect(&mut self) {
        self.commands.take();
    }

    /// Disconnect and wait for the runner to exit.
    ///
    /// Returns the final session, or `None` if the runner task panicked.
    pub async fn join(mut self) -> Option<EnrollmentSession> {
        self.disconnect();
        match self.task.await {
            Ok(session) => Some(session),
            Err(err) => {
                tracing::error!(session = %self.id, error = %err, "Session task failed");
                None
            }
        }
    }
}

/// Spawn a runner for a new session and return its handle and the outbound
/// message stream.
pub fn spawn(
    context: SessionContext,
    subject_key: SubjectKey,
) -> (SessionHandle, mpsc::Receiver<ServerMessage>) {
    let id = SessionId::new();
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, event_rx) = mpsc::channel(context.config.outbound_buffer.max(1));

    let span = tracing::info_span!("session", session = %id, subject = %subject_key);
    let session = EnrollmentSession::new(id.clone(), subject_key, context.config.policy);
    let runner = SessionRunner {
        context,
        session,
        commands: command_rx,
        events: event_tx,
        lease: None,
        concluded: false,
    };
    let task = tokio::spawn(runner.run().instrument(span));

    (
        SessionHandle {
            id,
            commands: Some(command_tx),
            task,
        },
        event_rx,
    )
}

struct SessionRunner {
    context: SessionContext,
    session: EnrollmentSession,
    commands: mpsc::Receiver<ClientCommand>,
    events: mpsc::Sender<ServerMessage>,
    lease: Option<DeviceLease>,
    concluded: bool,
}

impl SessionRunner {
    async fn run(mut self) -> EnrollmentSession {
        tracing::info!("Session opened");

        while let Some(command) = self.commands.recv().await {
            match command {
                ClientCommand::GetStatus => self.emit_status().await,
                ClientCommand::StartCapture if self.session.state() == SessionState::Idle => {
                    self.capture_run().await;
                }
                ClientCommand::Cancel if !self.session.is_terminal() => {
                    tracing::info!("Session cancelled by client");
                    self.finish(FailureReason::Cancelled, None).await;
                }
                other => {
                    tracing::warn!(
                        command = ?other,
                        state = %self.session.state(),
                        "Ignoring command in current state"
                    );
                }
            }
        }

        if !self.session.is_terminal() {
            tracing::info!(state = %self.session.state(), "Connection lost");
            self.finish(FailureReason::Cancelled, None).await;
        }

        tracing::info!(
            state = %self.session.state(),
            attempts = self.session.attempt_count(),
            "Session closed"
        );
        self.session
    }

    /// Drive the session from `start_capture` to a terminal state.
    async fn capture_run(&mut self) {
        let config = self.context.config.clone();
        let run_deadline = Instant::now() + config.session_timeout;

        if let Err(err) = self.session.begin() {
            return self.abort(err).await;
        }
        tracing::info!(provider = self.context.provider.name(), "Initializing capture device");
        self.emit(ServerMessage::device_init()).await;

        // Lease
        let arbiter = self.context.arbiter.clone();
        let owner = self.session.id().clone();
        let lease_wait = config.lease_wait;
        let acquired = self
            .interruptible(
                async move { arbiter.acquire(owner, lease_wait).await },
                run_deadline,
            )
            .await;
        match acquired {
            Ok(Ok(lease)) => self.lease = Some(lease),
            Ok(Err(ArbiterError::Busy { holder })) => {
                tracing::warn!(holder = %holder, "Capture device busy");
                return self.finish(FailureReason::DeviceUnavailable, None).await;
            }
            Err(interrupt) => return self.interrupted(interrupt).await,
        }

        // Device initialization
        let provider = Arc::clone(&self.context.provider);
        let initialized = self
            .interruptible(async move { provider.initialize().await }, run_deadline)
            .await;
        match initialized {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::error!(error = %err, "Device initialization failed");
                return self
                    .finish(
                        FailureReason::DeviceDisconnected,
                        Some(format!("Scan error: {err}")),
                    )
                    .await;
            }
            Err(interrupt) => return self.interrupted(interrupt).await,
        }

        if let Err(err) = self.session.device_ready() {
            return self.abort(err).await;
        }
        tracing::info!("Capture device ready");
        self.emit(ServerMessage::device_ready(config.capture_timeout.as_secs()))
            .await;

        loop {
            let now = Instant::now();
            if now >= run_deadline {
                tracing::warn!("Session deadline reached");
                return self.finish(FailureReason::Timeout, None).await;
            }
            let attempt_deadline = (now + config.capture_timeout).min(run_deadline);
            let attempt_timeout = attempt_deadline - now;

            let attempt = match self.session.begin_capture() {
                Ok(attempt) => attempt,
                Err(err) => return self.abort(err).await,
            };
            let max_attempts = self.session.max_attempts();
            tracing::info!(attempt, max_attempts, "Capture attempt");
            self.emit(ServerMessage::capture_attempt(
                attempt,
                max_attempts,
                attempt_timeout.as_secs(),
            ))
            .await;

            let provider = Arc::clone(&self.context.provider);
            let captured = self
                .interruptible(
                    async move { provider.capture(attempt_timeout).await },
                    (attempt_deadline + PROVIDER_GRACE).min(run_deadline),
                )
                .await;

            let verdict = match captured {
                Ok(Ok(CaptureOutcome::Captured { template, quality })) => {
                    let level = match self.session.enter_quality_check(quality) {
                        Ok(level) => level,
                        Err(err) => return self.abort(err).await,
                    };
                    let quality = self.session.last_quality_score().unwrap_or(quality);
                    tracing::info!(attempt, quality, level = %level, "Quality check");
                    self.emit(ServerMessage::quality_check(quality, level)).await;
                    self.session.resolve_quality_check(template)
                }
                Ok(Ok(CaptureOutcome::NoInput)) => {
                    tracing::info!(attempt, "No finger detected");
                    // An uncounted miss still uses up the attempt window.
                    let window = self
                        .interruptible(tokio::time::sleep_until(attempt_deadline), run_deadline)
                        .await;
                    if let Err(interrupt) = window {
                        return self.interrupted(interrupt).await;
                    }
                    self.session.capture_missed(CaptureMiss::NoInput)
                }
                Ok(Err(err)) if !err.is_device_fault() => {
                    tracing::warn!(attempt, error = %err, "Capture read failed");
                    self.session.capture_missed(CaptureMiss::ReadFailed)
                }
                Ok(Err(err)) => {
                    tracing::error!(attempt, error = %err, "Capture device fault");
                    return self
                        .finish(
                            FailureReason::DeviceDisconnected,
                            Some(format!("Scan error: {err}")),
                        )
                        .await;
                }
                Err(Interrupt::TimedOut) => {
                    tracing::warn!(attempt, "Capture attempt timed out");
                    self.session.capture_missed(CaptureMiss::TimedOut)
                }
                Err(interrupt) => return self.interrupted(interrupt).await,
            };

            match verdict {
                Ok(Verdict::Accepted) => return self.conclude(None).await,
                Ok(Verdict::Retry) => {
                    if let Err(err) = self.session.resume() {
                        return self.abort(err).await;
                    }
                }
                Ok(Verdict::Exhausted(reason)) => {
                    tracing::warn!(reason = %reason, "Capture attempts exhausted");
                    return self.conclude(None).await;
                }
                Err(err) => return self.abort(err).await,
            }
        }
    }

    /// Run `fut` until it completes, `deadline` passes, or the client cancels
    /// or disconnects. `get_status` is answered while waiting.
    async fn interruptible<F: Future>(
        &mut self,
        fut: F,
        deadline: Instant,
    ) -> Result<F::Output, Interrupt> {
        let mut fut = pin!(fut);
        let mut expired = pin!(tokio::time::sleep_until(deadline));

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None => return Err(Interrupt::ConnectionLost),
                    Some(ClientCommand::Cancel) => return Err(Interrupt::Cancelled),
                    Some(ClientCommand::GetStatus) => {
                        let status = ServerMessage::status(self.session.status());
                        let _ = self.events.send(status).await;
                    }
                    Some(ClientCommand::StartCapture) => {
                        tracing::warn!(
                            state = %self.session.state(),
                            "Capture already running, ignoring start_capture"
                        );
                    }
                },
                output = &mut fut => return Ok(output),
                () = &mut expired => return Err(Interrupt::TimedOut),
            }
        }
    }

    async fn interrupted(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::TimedOut => {
                tracing::warn!(state = %self.session.state(), "Session deadline reached");
                self.finish(FailureReason::Timeout, None).await;
            }
            Interrupt::Cancelled => {
                tracing::info!(state = %self.session.state(), "Session cancelled by client");
                self.finish(FailureReason::Cancelled, None).await;
            }
            Interrupt::ConnectionLost => {
                tracing::info!(state = %self.session.state(), "Connection lost during capture");
                self.finish(FailureReason::Cancelled, None).await;
            }
        }
    }

    /// A transition was rejected. This is a bug in the runner; end the
    /// session rather than leave it stuck holding the device.
    async fn abort(&mut self, err: InvalidTransition) {
        tracing::error!(error = %err, "Session state machine rejected transition");
        self.finish(FailureReason::Cancelled, None).await;
    }

    /// Fail the session (if it is still running) and report the outcome.
    async fn finish(&mut self, reason: FailureReason, message: Option<String>) {
        if let Err(err) = self.session.fail(reason) {
            tracing::debug!(error = %err, "Session already ended");
        }
        self.conclude(message).await;
    }

    /// Release the device and emit the terminal message. Runs at most once.
    async fn conclude(&mut self, message: Option<String>) {
        if self.concluded {
            return;
        }
        self.concluded = true;

        if let Some(lease) = self.lease.take() {
            self.context.arbiter.release(&lease);
        }

        match self.session.result().cloned() {
            Some(SessionResult::Captured(template)) => {
                tracing::info!(
                    attempts = self.session.attempt_count(),
                    quality = template.quality(),
                    template_length = template.len(),
                    "Capture succeeded"
                );
                self.emit(ServerMessage::capture_success(
                    template.len(),
                    template.quality(),
                    template.level(),
                ))
                .await;
                self.emit(ServerMessage::done()).await;
            }
            Some(SessionResult::Failed(reason)) => {
                tracing::info!(
                    attempts = self.session.attempt_count(),
                    reason = %reason,
                    "Capture failed"
                );
                let failure = match message {
                    Some(message) => ServerMessage::failure_with(reason, message),
                    None => ServerMessage::failure(reason),
                };
                self.emit(failure).await;
            }
            None => {
                tracing::error!(
                    state = %self.session.state(),
                    "Session concluded without a result"
                );
            }
        }
    }

    async fn emit_status(&mut self) {
        self.emit(ServerMessage::status(self.session.status())).await;
    }

    /// Push a message to the connection. A closed connection is not an error;
    /// the session still runs to its terminal state.
    async fn emit(&mut self, message: ServerMessage) {
        if self.events.send(message).await.is_err() {
            tracing::debug!("Outbound channel closed, dropping message");
        }
    }
}
