//! Debug wire protocol substrate
//!
//! Sprint 3: framed request/reply exchange with id correlation
//!
//! Every session operation (set-breakpoint, resume, read-frame) is a
//! request/reply exchange with the target process. Frames are
//! newline-delimited JSON over a `TcpStream`; replies carry the id of the
//! request they answer, and asynchronous events (unit loads, breakpoint
//! hits, test completion, target exit) may arrive between a request and its
//! reply. [`WireConnection`] queues such events so the session event loop
//! sees them in arrival order.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use thiserror::Error;

pub type RequestId = u64;

/// Session operation sent to the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    SetBreakpoint { class: String, method: String, line: u32 },
    ClearBreakpoints,
    RunTest { test: String },
    Resume,
    ReadFrame,
    Detach,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub command: Command,
}

/// Correlated answer to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReplyPayload {
    Ok,
    /// Breakpoint armed in a loaded unit
    BreakpointResolved,
    /// Containing unit not loaded yet; target will not report it again
    BreakpointPending,
    /// Variables of the suspended frame, name to textual value
    Frame { variables: BTreeMap<String, String> },
    Error { message: String },
}

/// Failing-assertion detail attached to a test-finished event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionDetail {
    pub class: String,
    pub method: String,
    pub line: u32,
    pub expected: String,
    pub actual: String,
}

/// Asynchronous notification from the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    UnitLoaded {
        unit: String,
    },
    BreakpointHit {
        class: String,
        method: String,
        line: u32,
    },
    TestFinished {
        test: String,
        passed: bool,
        assertion: Option<AssertionDetail>,
    },
    TargetExited {
        status: i32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Reply { id: RequestId, payload: ReplyPayload },
    Event { event: Event },
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("connection closed by peer")]
    ClosedByPeer,

    #[error("i/o failure on debug channel: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("reply id {got} does not correlate with outstanding request id {expected}")]
    Correlation { expected: RequestId, got: RequestId },

    #[error("reply id {id} arrived with no request outstanding")]
    UnsolicitedReply { id: RequestId },

    #[error("target rejected request {id}: {message}")]
    Rejected { id: RequestId, message: String },

    #[error("unexpected reply payload, expected {expected}")]
    UnexpectedPayload { expected: &'static str },
}

/// One connection-oriented channel to a target process
pub struct WireConnection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    next_id: RequestId,
    pending_events: VecDeque<Event>,
}

impl WireConnection {
    pub fn new(stream: TcpStream) -> std::io::Result<WireConnection> {
        let writer = stream.try_clone()?;
        Ok(WireConnection {
            reader: BufReader::new(stream),
            writer,
            next_id: 1,
            pending_events: VecDeque::new(),
        })
    }

    /// Send one command and block until its correlated reply arrives.
    ///
    /// Events arriving before the reply are queued for [`next_event`] in
    /// arrival order. An `Error` reply is surfaced as [`WireError::Rejected`].
    ///
    /// [`next_event`]: WireConnection::next_event
    pub fn request(&mut self, command: Command) -> Result<ReplyPayload, WireError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(&Request { id, command })?;

        loop {
            match self.read_frame()? {
                Message::Event { event } => self.pending_events.push_back(event),
                Message::Reply { id: got, payload } => {
                    if got != id {
                        return Err(WireError::Correlation { expected: id, got });
                    }
                    if let ReplyPayload::Error { message } = payload {
                        return Err(WireError::Rejected { id, message });
                    }
                    return Ok(payload);
                }
            }
        }
    }

    /// Block until the next event, draining the queued ones first.
    pub fn next_event(&mut self) -> Result<Event, WireError> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }
        loop {
            match self.read_frame()? {
                Message::Event { event } => return Ok(event),
                Message::Reply { id, .. } => return Err(WireError::UnsolicitedReply { id }),
            }
        }
    }

    fn send(&mut self, request: &Request) -> Result<(), WireError> {
        let mut frame = serde_json::to_string(request)?;
        frame.push('\n');
        self.writer.write_all(frame.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Message, WireError> {
        let mut line = String::new();
        let read = self.reader.read_line(&mut line)?;
        if read == 0 {
            return Err(WireError::ClosedByPeer);
        }
        Ok(serde_json::from_str(line.trim_end())?)
    }
}

impl std::fmt::Debug for WireConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireConnection")
            .field("next_id", &self.next_id)
            .field("pending_events", &self.pending_events.len())
            .finish()
    }
}
