//! Session actor - owns the conversation and the running turn.
//!
//! The actor is the single owner of `SessionState` and of the active
//! process. Host commands and process reports arrive on two channels and
//! are handled one at a time, so records are interpreted in exactly the
//! order the CLI printed them.

use std::path::PathBuf;

use tether_core::{SessionId, SessionState, SessionView};
use tether_protocol::UiEvent;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::commands::{Dispatch, ProcessEvent, SessionCommand, TurnRequest};
use super::process::{compose_message, spawn_turn, TurnInvocation};
use super::Collaborators;
use crate::config::EngineConfig;
use crate::hooks::EventSink;
use crate::interpreter::{EventInterpreter, Outcome};

const INSTALL_HINT: &str = "Install it with: npm install -g @anthropic-ai/claude-code";

/// A spawned turn process.
#[derive(Debug)]
struct ActiveTurn {
    turn: u64,
    pid: Option<u32>,
    cancel: CancellationToken,
    /// The result was routed to the login flow; exit diagnostics are not shown
    login_started: bool,
}

pub struct SessionActor {
    receiver: mpsc::Receiver<SessionCommand>,

    /// Reports from process tasks; the actor keeps a sender for new turns
    process_tx: mpsc::UnboundedSender<ProcessEvent>,
    process_rx: mpsc::UnboundedReceiver<ProcessEvent>,

    config: EngineConfig,
    /// MCP config handed to the CLI when prompts go through the broker
    permission_config: Option<PathBuf>,

    session: SessionState,
    interpreter: EventInterpreter,
    active: Option<ActiveTurn>,
    /// Stopped turns whose processes have not exited yet
    draining: Vec<ActiveTurn>,
    next_turn: u64,
    idle_waiters: Vec<oneshot::Sender<()>>,

    collaborators: Collaborators,
}

impl SessionActor {
    pub fn new(
        receiver: mpsc::Receiver<SessionCommand>,
        config: EngineConfig,
        permission_config: Option<PathBuf>,
        collaborators: Collaborators,
    ) -> Self {
        let (process_tx, process_rx) = mpsc::unbounded_channel();
        let interpreter = EventInterpreter::new(config.model.pricing());
        Self {
            receiver,
            process_tx,
            process_rx,
            config,
            permission_config,
            session: SessionState::new(),
            interpreter,
            active: None,
            draining: Vec::new(),
            next_turn: 0,
            idle_waiters: Vec::new(),
            collaborators,
        }
    }

    /// Runs until every handle is dropped, then stops any running turn.
    pub async fn run(mut self) {
        info!("Session actor starting");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = self.process_rx.recv() => self.handle_process_event(event),
            }
        }

        for turn in self.active.take().into_iter().chain(self.draining.drain(..)) {
            turn.cancel.cancel();
        }
        info!(
            requests = self.session.request_count(),
            "Session actor stopped"
        );
    }

    fn sink(&self) -> &dyn EventSink {
        self.collaborators.sink.as_ref()
    }

    /// No turn running and every stopped process has exited.
    fn is_idle(&self) -> bool {
        self.active.is_none() && self.draining.is_empty()
    }

    fn notify_idle(&mut self) {
        if self.is_idle() {
            for waiter in self.idle_waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }

    /// Cancels the running turn and stops tracking it as active. Its
    /// process keeps draining until it exits.
    fn detach_active(&mut self) {
        if let Some(active) = self.active.take() {
            info!(turn = active.turn, pid = ?active.pid, "Stopping turn");
            active.cancel.cancel();
            self.draining.push(active);
        }
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SendTurn {
                request,
                respond_to,
            } => {
                let result = self.handle_send_turn(request).await;
                let _ = respond_to.send(result);
            }
            SessionCommand::Stop { respond_to } => {
                self.handle_stop();
                let _ = respond_to.send(());
            }
            SessionCommand::NewSession { respond_to } => {
                self.handle_new_session();
                let _ = respond_to.send(());
            }
            SessionCommand::Reconfigure { config, respond_to } => {
                self.handle_reconfigure(*config);
                let _ = respond_to.send(());
            }
            SessionCommand::SaveDraft { text } => {
                self.session.save_draft(text);
            }
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(SessionView::from_state(&self.session));
            }
            SessionCommand::RestoreBackup { commit, respond_to } => {
                self.handle_restore(&commit).await;
                let _ = respond_to.send(());
            }
            SessionCommand::WaitIdle { respond_to } => {
                if self.is_idle() {
                    let _ = respond_to.send(());
                } else {
                    self.idle_waiters.push(respond_to);
                }
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    async fn handle_send_turn(&mut self, request: TurnRequest) -> Dispatch {
        if let Some(active) = &self.active {
            debug!(turn = active.turn, "Turn already running, not forwarding input");
            self.sink().emit(UiEvent::notice(format!(
                "Claude is still working on the previous message; not sent: {}",
                request.text
            )));
            return Dispatch::Queued;
        }

        let message = compose_message(&request, self.config.thinking_intensity);

        self.session.begin_turn();
        self.interpreter.begin_turn();
        self.sink().emit(UiEvent::UserInput {
            text: request.text.clone(),
        });
        self.sink().emit(UiEvent::processing(true));

        self.run_backup(&request.text).await;

        self.next_turn += 1;
        let turn = self.next_turn;
        let invocation = TurnInvocation::new(
            &self.config,
            self.session.id(),
            self.permission_config.as_deref(),
            message,
        );
        let cancel = CancellationToken::new();

        match spawn_turn(
            &invocation,
            turn,
            self.process_tx.clone(),
            cancel.clone(),
            self.config.stop_grace(),
        ) {
            Ok(pid) => {
                self.active = Some(ActiveTurn {
                    turn,
                    pid,
                    cancel,
                    login_started: false,
                });
                Dispatch::Started
            }
            Err(e) => {
                error!(error = %e, "Failed to start CLI");
                self.sink().emit(UiEvent::error(format!(
                    "Could not start Claude ({e}). {INSTALL_HINT}"
                )));
                self.session.set_processing(false);
                self.sink().emit(UiEvent::processing(false));
                Dispatch::Failed
            }
        }
    }

    /// Best-effort pre-turn backup; never fails the turn.
    ///
    /// Awaited inside the actor, so other commands wait for it. The wait
    /// is bounded by `backup_timeout_ms`.
    async fn run_backup(&self, message: &str) {
        let backup = self.collaborators.backup.create_backup(message);
        match tokio::time::timeout(self.config.backup_timeout(), backup).await {
            Ok(Ok(())) => debug!("Pre-turn backup created"),
            Ok(Err(e)) => warn!(error = %e, "Pre-turn backup failed"),
            Err(_) => warn!(
                timeout_ms = self.config.backup_timeout_ms,
                "Pre-turn backup timed out"
            ),
        }
    }

    fn handle_stop(&mut self) {
        self.detach_active();
        self.session.set_processing(false);
        self.sink().emit(UiEvent::processing(false));
        self.sink().emit(UiEvent::notice("Stopped"));
    }

    fn handle_new_session(&mut self) {
        self.detach_active();
        info!(
            session_id = self.session.id().map(SessionId::short).unwrap_or("none"),
            "Starting new session"
        );
        self.session.reset();
        self.interpreter.begin_turn();
        self.sink().emit(UiEvent::SessionCleared);
    }

    fn handle_reconfigure(&mut self, config: EngineConfig) {
        let fresh = self.config.requires_new_session(&config);
        self.interpreter.set_pricing(config.model.pricing());
        self.config = config;
        if fresh {
            self.handle_new_session();
        }
    }

    async fn handle_restore(&self, commit: &str) {
        match self.collaborators.backup.restore(commit).await {
            Ok(()) => {
                info!(commit, "Workspace restored");
                self.sink()
                    .emit(UiEvent::notice(format!("Restored to {commit}")));
            }
            Err(e) => {
                warn!(commit, error = %e, "Restore failed");
                self.sink()
                    .emit(UiEvent::error(format!("Restore failed: {e}")));
            }
        }
    }

    // ========================================================================
    // Process Events
    // ========================================================================

    /// True if `turn` is the running turn.
    fn live_turn(&self, turn: u64) -> bool {
        self.active.as_ref().is_some_and(|active| active.turn == turn)
    }

    fn handle_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Record { turn, value } => {
                if !self.live_turn(turn) {
                    debug!(turn, "Dropping record from stale turn");
                    return;
                }
                let outcome =
                    self.interpreter
                        .interpret(value, &mut self.session, self.collaborators.sink.as_ref());
                if let Outcome::LoginRequired { message } = outcome {
                    self.start_login(message);
                }
            }
            ProcessEvent::Exited { turn, code, stderr } => self.handle_exit(turn, code, stderr),
        }
    }

    fn handle_exit(&mut self, turn: u64, code: Option<i32>, stderr: String) {
        if let Some(pos) = self.draining.iter().position(|stopped| stopped.turn == turn) {
            self.draining.swap_remove(pos);
            debug!(turn, code = ?code, "Stopped turn exited");
            self.notify_idle();
            return;
        }
        if !self.live_turn(turn) {
            debug!(turn, "Exit from a turn that is no longer tracked");
            return;
        }
        let Some(active) = self.active.take() else {
            return;
        };

        let diagnostics = stderr.trim();
        if !active.login_started && code != Some(0) && !diagnostics.is_empty() {
            warn!(turn, code = ?code, "Turn process failed");
            self.sink().emit(UiEvent::error(diagnostics));
        }

        self.session.set_processing(false);
        self.sink().emit(UiEvent::processing(false));
        self.notify_idle();
    }

    fn start_login(&mut self, message: String) {
        if let Some(active) = self.active.as_mut() {
            active.login_started = true;
        }
        self.session.set_processing(false);
        self.sink().emit(UiEvent::processing(false));
        self.sink().emit(UiEvent::LoginRequired { message });

        let program = self.config.cli_path.clone();
        match self
            .collaborators
            .terminal
            .open("Claude Login", &program, &[])
        {
            Ok(()) => {
                info!(program = %program, "Opened login terminal");
                self.sink().emit(UiEvent::TerminalOpened {
                    message: "Log in with /login in the new terminal, then send your message again"
                        .to_string(),
                });
            }
            Err(e) => {
                warn!(error = %e, "Failed to open login terminal");
                self.sink().emit(UiEvent::error(format!(
                    "Authentication required. Run `{program}` in a terminal and log in ({e})"
                )));
            }
        }
    }
}

impl std::fmt::Debug for SessionActor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionActor")
            .field("session_id", &self.session.id())
            .field("active", &self.active)
            .field("draining", &self.draining.len())
            .finish_non_exhaustive()
    }
}
