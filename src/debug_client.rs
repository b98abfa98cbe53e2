//! Remote debug session lifecycle
//!
//! Sprint 4: launch, attach, breakpoints, cooperative run loop
//!
//! One [`DebugSession`] owns one live connection to one target process plus
//! the set of armed breakpoints. The session is single-threaded and
//! cooperative: while a breakpoint hit is being handled the target is fully
//! suspended, the handler runs to completion against the suspended frame,
//! and only then does the target resume. No two hits are ever in flight at
//! once within a session.
//!
//! State machine: CREATED → CONNECTED → (RUNNING ⇄ CONNECTED per
//! [`run_test`]) → CLOSED (terminal, idempotent). The session is released on
//! every exit path; [`Drop`] is the backstop when a probe errors mid-run.
//!
//! [`run_test`]: DebugSession::run_test

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::element::CodeElementName;
use crate::error::LocalizerError;
use crate::test_runner::TestOutcome;
use crate::wire::{Command as WireCommand, Event, ReplyPayload, WireConnection, WireError};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Running,
    Closed,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connected => "connected",
            SessionState::Running => "running",
            SessionState::Closed => "closed",
        }
    }
}

/// Read-only view of the suspended frame at a breakpoint hit
#[derive(Debug, Clone)]
pub struct SuspendedFrame {
    pub location: CodeElementName,
    variables: BTreeMap<String, String>,
}

impl SuspendedFrame {
    /// Textual value of a variable in the suspended frame, if in scope
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.variables.get(name).map(String::as_str)
    }

    pub fn line(&self) -> u32 {
        self.location.line_number().unwrap_or(0)
    }
}

/// One live debugging session against one target process
pub struct DebugSession {
    conn: WireConnection,
    child: Option<Child>,
    state: SessionState,
    armed: BTreeSet<CodeElementName>,
    pending: BTreeSet<CodeElementName>,
}

impl DebugSession {
    /// Launch the configured target with remote debugging enabled and wait
    /// for it to attach. Fails fatally, with the child reaped, if the target
    /// does not connect back within the configured timeout.
    pub fn start(config: &Config) -> Result<DebugSession, LocalizerError> {
        let listener =
            TcpListener::bind("127.0.0.1:0").map_err(|e| LocalizerError::LaunchFailure {
                message: format!("cannot bind session listener: {}", e),
            })?;
        listener
            .set_nonblocking(true)
            .map_err(|e| LocalizerError::LaunchFailure {
                message: format!("cannot poll session listener: {}", e),
            })?;
        let port = listener
            .local_addr()
            .map_err(|e| LocalizerError::LaunchFailure {
                message: format!("cannot resolve session listener: {}", e),
            })?
            .port();

        let program = config
            .target_command
            .first()
            .ok_or_else(|| LocalizerError::LaunchFailure {
                message: "no target command configured".to_string(),
            })?;
        let mut child = Command::new(program)
            .args(&config.target_command[1..])
            .env("CULPA_DEBUG_PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| LocalizerError::LaunchFailure {
                message: format!("cannot spawn {}: {}", program, e),
            })?;
        debug!(pid = child.id(), port, "target launched, awaiting attach");

        let deadline = Instant::now() + config.attach_timeout();
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    debug!(%peer, "target attached");
                    return Self::from_stream(stream, Some(child));
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Err(LocalizerError::ProcessFailure {
                            status: status.code(),
                        });
                    }
                    if Instant::now() >= deadline {
                        Self::reap(&mut child);
                        return Err(LocalizerError::ConnectionFailure {
                            timeout_ms: config.attach_timeout_ms,
                        });
                    }
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(e) => {
                    Self::reap(&mut child);
                    return Err(LocalizerError::LaunchFailure {
                        message: format!("accept failed: {}", e),
                    });
                }
            }
        }
    }

    /// Attach to a target already listening for a controller. Used for
    /// externally-managed targets; the session then owns the connection but
    /// not the process.
    pub fn attach(addr: SocketAddr, timeout: Duration) -> Result<DebugSession, LocalizerError> {
        let deadline = Instant::now() + timeout;
        loop {
            match TcpStream::connect(addr) {
                Ok(stream) => return Self::from_stream(stream, None),
                Err(_) if Instant::now() < deadline => {
                    std::thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(_) => {
                    return Err(LocalizerError::ConnectionFailure {
                        timeout_ms: timeout.as_millis() as u64,
                    })
                }
            }
        }
    }

    fn from_stream(
        stream: TcpStream,
        mut child: Option<Child>,
    ) -> Result<DebugSession, LocalizerError> {
        // An accepted socket can inherit the listener's non-blocking mode
        let _ = stream.set_nonblocking(false);
        let _ = stream.set_nodelay(true);
        let conn = match WireConnection::new(stream) {
            Ok(conn) => conn,
            Err(e) => {
                // The launched target must not outlive a failed session
                if let Some(child) = child.as_mut() {
                    Self::reap(child);
                }
                return Err(LocalizerError::LaunchFailure {
                    message: format!("cannot initialize wire connection: {}", e),
                });
            }
        };
        Ok(DebugSession {
            conn,
            child,
            state: SessionState::Connected,
            armed: BTreeSet::new(),
            pending: BTreeSet::new(),
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Arm a breakpoint at a line-grained location. Idempotent; a location
    /// whose containing unit is not loaded yet is kept pending and re-armed
    /// opportunistically as units load. A location that never resolves is
    /// silently inert.
    pub fn set_breakpoint(&mut self, location: &CodeElementName) -> Result<(), LocalizerError> {
        self.require(SessionState::Connected, "set_breakpoint")?;
        if self.armed.contains(location) || self.pending.contains(location) {
            return Ok(());
        }
        let (method, line) = match (location.method_name(), location.line_number()) {
            (Some(method), Some(line)) => (method.to_string(), line),
            _ => {
                warn!(location = %location, "ignoring non-line breakpoint location");
                return Ok(());
            }
        };
        let payload = self.conn.request(WireCommand::SetBreakpoint {
            class: location.class_name().to_string(),
            method,
            line,
        })?;
        match payload {
            ReplyPayload::BreakpointResolved => {
                self.armed.insert(location.clone());
            }
            ReplyPayload::BreakpointPending => {
                debug!(location = %location, "breakpoint pending unit load");
                self.pending.insert(location.clone());
            }
            _ => {
                return Err(WireError::UnexpectedPayload {
                    expected: "breakpoint resolution",
                }
                .into())
            }
        }
        Ok(())
    }

    /// Resume the target until the designated test completes or the target
    /// dies. Each breakpoint hit suspends the target, reads the current
    /// frame, and hands it to `on_hit` before resuming; hits are handled one
    /// at a time, in execution order. A session supports multiple sequential
    /// `run_test` calls.
    pub fn run_test<F>(&mut self, test: &str, mut on_hit: F) -> Result<TestOutcome, LocalizerError>
    where
        F: FnMut(&SuspendedFrame),
    {
        self.require(SessionState::Connected, "run_test")?;
        self.state = SessionState::Running;
        let outcome = self.pump(test, &mut on_hit);
        if outcome.is_ok() {
            self.state = SessionState::Connected;
        }
        outcome
    }

    fn pump<F>(&mut self, test: &str, on_hit: &mut F) -> Result<TestOutcome, LocalizerError>
    where
        F: FnMut(&SuspendedFrame),
    {
        self.expect_ok_running(WireCommand::RunTest {
            test: test.to_string(),
        })?;
        loop {
            let event = match self.conn.next_event() {
                Ok(event) => event,
                Err(WireError::ClosedByPeer) => return Err(self.target_lost()),
                Err(e) => return Err(e.into()),
            };
            match event {
                Event::UnitLoaded { unit } => self.rearm_pending(&unit)?,
                Event::BreakpointHit {
                    class,
                    method,
                    line,
                } => {
                    let payload = self.request_running(WireCommand::ReadFrame)?;
                    let variables = match payload {
                        ReplyPayload::Frame { variables } => variables,
                        _ => {
                            return Err(WireError::UnexpectedPayload {
                                expected: "frame variables",
                            }
                            .into())
                        }
                    };
                    let frame = SuspendedFrame {
                        location: CodeElementName::line(&class, &method, line),
                        variables,
                    };
                    on_hit(&frame);
                    self.expect_ok_running(WireCommand::Resume)?;
                }
                Event::TestFinished {
                    passed, assertion, ..
                } => {
                    return Ok(if passed {
                        TestOutcome::Passed
                    } else {
                        TestOutcome::Failed(assertion.map(Into::into))
                    });
                }
                Event::TargetExited { status } => {
                    return Err(LocalizerError::ProcessFailure {
                        status: Some(status),
                    });
                }
            }
        }
    }

    /// Retry pending breakpoints whose class lives in the freshly loaded unit.
    fn rearm_pending(&mut self, unit: &str) -> Result<(), LocalizerError> {
        let candidates: Vec<CodeElementName> = self
            .pending
            .iter()
            .filter(|loc| loc.class_name() == unit)
            .cloned()
            .collect();
        for location in candidates {
            let (method, line) = match (location.method_name(), location.line_number()) {
                (Some(method), Some(line)) => (method.to_string(), line),
                _ => continue,
            };
            let payload = self.request_running(WireCommand::SetBreakpoint {
                class: location.class_name().to_string(),
                method,
                line,
            })?;
            if payload == ReplyPayload::BreakpointResolved {
                self.pending.remove(&location);
                self.armed.insert(location);
            }
        }
        Ok(())
    }

    /// Remove all armed breakpoints. Idempotent; safe with none active.
    pub fn cleanup_event_requests(&mut self) -> Result<(), LocalizerError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.require(SessionState::Connected, "cleanup_event_requests")?;
        if self.armed.is_empty() && self.pending.is_empty() {
            return Ok(());
        }
        self.expect_ok(WireCommand::ClearBreakpoints)?;
        self.armed.clear();
        self.pending.clear();
        Ok(())
    }

    /// Scoped release: detach, kill the target if still alive, drop the
    /// connection. Idempotent and infallible by construction; runs on normal
    /// completion and on any failure raised while the session was open.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let _ = self.conn.request(WireCommand::Detach);
        if let Some(mut child) = self.child.take() {
            Self::reap(&mut child);
        }
        self.armed.clear();
        self.pending.clear();
        self.state = SessionState::Closed;
        debug!("session closed");
    }

    fn target_lost(&mut self) -> LocalizerError {
        let status = self
            .child
            .as_mut()
            .and_then(|child| child.wait().ok())
            .and_then(|status| status.code());
        LocalizerError::ProcessFailure { status }
    }

    /// Request issued while the target is running. A peer that vanished
    /// between frames is a dead target, not a protocol defect.
    fn request_running(&mut self, command: WireCommand) -> Result<ReplyPayload, LocalizerError> {
        match self.conn.request(command) {
            Ok(payload) => Ok(payload),
            Err(WireError::ClosedByPeer) => Err(self.target_lost()),
            Err(WireError::Io(e))
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::BrokenPipe
                        | std::io::ErrorKind::ConnectionReset
                        | std::io::ErrorKind::UnexpectedEof
                ) =>
            {
                Err(self.target_lost())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn expect_ok_running(&mut self, command: WireCommand) -> Result<(), LocalizerError> {
        match self.request_running(command)? {
            ReplyPayload::Ok => Ok(()),
            _ => Err(WireError::UnexpectedPayload { expected: "ok" }.into()),
        }
    }

    fn expect_ok(&mut self, command: WireCommand) -> Result<(), LocalizerError> {
        match self.conn.request(command)? {
            ReplyPayload::Ok => Ok(()),
            _ => Err(WireError::UnexpectedPayload { expected: "ok" }.into()),
        }
    }

    fn require(
        &self,
        required: SessionState,
        operation: &'static str,
    ) -> Result<(), LocalizerError> {
        if self.state == required {
            Ok(())
        } else {
            Err(LocalizerError::SessionState {
                state: self.state.as_str(),
                operation,
                required: required.as_str(),
            })
        }
    }

    fn reap(child: &mut Child) {
        match child.try_wait() {
            Ok(Some(_)) => {}
            _ => {
                let _ = signal::kill(Pid::from_raw(child.id() as i32), Signal::SIGKILL);
                let _ = child.wait();
            }
        }
    }
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("state", &self.state)
            .field("armed", &self.armed.len())
            .field("pending", &self.pending.len())
            .field("owns_child", &self.child.is_some())
            .finish()
    }
}

impl Drop for DebugSession {
    fn drop(&mut self) {
        self.close();
    }
}
