// Shared test utilities: a scripted wire-protocol target.
//
// Integration tests drive real `DebugSession`s against an in-process TCP
// peer that plays the target side of the protocol from a fixed script, so
// session and tracer behavior is exercised without launching anything.
#![allow(dead_code)]

use culpa::wire::{AssertionDetail, Command, Event, Message, ReplyPayload, Request};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::JoinHandle;

/// One scripted breakpoint visit; only fires if the location is armed.
#[derive(Debug, Clone)]
pub struct Visit {
    pub class: String,
    pub method: String,
    pub line: u32,
    pub variables: BTreeMap<String, String>,
}

pub fn visit(class: &str, method: &str, line: u32, variables: &[(&str, &str)]) -> Visit {
    Visit {
        class: class.to_string(),
        method: method.to_string(),
        line,
        variables: variables
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

/// Scripted behavior of one `run_test` exchange
#[derive(Debug, Clone)]
pub struct TestScript {
    pub test: String,
    pub visits: Vec<Visit>,
    pub passed: bool,
    pub assertion: Option<AssertionDetail>,
    /// Die with this exit status after that many fired visits
    pub exit_after: Option<(usize, i32)>,
}

impl TestScript {
    pub fn passing(test: &str, visits: Vec<Visit>) -> TestScript {
        TestScript {
            test: test.to_string(),
            visits,
            passed: true,
            assertion: None,
            exit_after: None,
        }
    }

    pub fn failing(test: &str, visits: Vec<Visit>, assertion: Option<AssertionDetail>) -> TestScript {
        TestScript {
            test: test.to_string(),
            visits,
            passed: false,
            assertion,
            exit_after: None,
        }
    }

    pub fn dying_after(mut self, fired_visits: usize, status: i32) -> TestScript {
        self.exit_after = Some((fired_visits, status));
        self
    }
}

/// In-process target speaking the debug wire protocol from a script
pub struct ScriptedTarget {
    addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl ScriptedTarget {
    pub fn spawn(scripts: Vec<TestScript>) -> ScriptedTarget {
        Self::spawn_with_lazy_units(scripts, &[])
    }

    /// Breakpoints in `lazy_units` classes answer `pending` until the first
    /// test run, when the unit loads and the re-arm exchange happens.
    pub fn spawn_with_lazy_units(scripts: Vec<TestScript>, lazy_units: &[&str]) -> ScriptedTarget {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let lazy: BTreeSet<String> = lazy_units.iter().map(|u| u.to_string()).collect();
        let handle = std::thread::spawn(move || serve(listener, scripts, lazy));
        ScriptedTarget { addr, handle }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn join(self) {
        self.handle.join().unwrap();
    }
}

struct Peer {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Peer {
    fn read_request(&mut self) -> Option<Request> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).unwrap_or(0) == 0 {
            return None;
        }
        Some(serde_json::from_str(line.trim_end()).unwrap())
    }

    fn send(&mut self, message: &Message) {
        let mut frame = serde_json::to_string(message).unwrap();
        frame.push('\n');
        self.writer.write_all(frame.as_bytes()).unwrap();
    }

    fn reply(&mut self, id: u64, payload: ReplyPayload) {
        self.send(&Message::Reply { id, payload });
    }

    fn event(&mut self, event: Event) {
        self.send(&Message::Event { event });
    }
}

fn serve(listener: TcpListener, scripts: Vec<TestScript>, mut lazy: BTreeSet<String>) {
    let (stream, _) = listener.accept().unwrap();
    let mut peer = Peer {
        reader: BufReader::new(stream.try_clone().unwrap()),
        writer: stream,
    };
    let mut armed: BTreeSet<(String, String, u32)> = BTreeSet::new();
    let mut deferred: Vec<(String, String, u32)> = Vec::new();
    let mut remaining = scripts.into_iter();

    while let Some(request) = peer.read_request() {
        match request.command {
            Command::SetBreakpoint {
                class,
                method,
                line,
            } => {
                if lazy.contains(&class) {
                    deferred.push((class, method, line));
                    peer.reply(request.id, ReplyPayload::BreakpointPending);
                } else {
                    armed.insert((class, method, line));
                    peer.reply(request.id, ReplyPayload::BreakpointResolved);
                }
            }
            Command::ClearBreakpoints => {
                armed.clear();
                deferred.clear();
                peer.reply(request.id, ReplyPayload::Ok);
            }
            Command::RunTest { test } => {
                let script = remaining.next().expect("run_test beyond the script");
                assert_eq!(script.test, test, "unexpected test requested");
                peer.reply(request.id, ReplyPayload::Ok);
                if !run_script(&mut peer, &script, &mut armed, &mut deferred, &mut lazy) {
                    return;
                }
            }
            Command::Detach => {
                peer.reply(request.id, ReplyPayload::Ok);
                return;
            }
            Command::Resume | Command::ReadFrame => {
                peer.reply(request.id, ReplyPayload::Ok);
            }
        }
    }
}

/// Play one test run. Returns false when the scripted target died.
fn run_script(
    peer: &mut Peer,
    script: &TestScript,
    armed: &mut BTreeSet<(String, String, u32)>,
    deferred: &mut Vec<(String, String, u32)>,
    lazy: &mut BTreeSet<String>,
) -> bool {
    // Load every lazy unit up front and serve the controller's re-arms
    for unit in std::mem::take(lazy) {
        peer.event(Event::UnitLoaded { unit: unit.clone() });
        let expected = deferred.iter().filter(|(c, _, _)| *c == unit).count();
        deferred.retain(|(c, _, _)| *c != unit);
        for _ in 0..expected {
            let request = peer.read_request().expect("re-arm request");
            match request.command {
                Command::SetBreakpoint {
                    class,
                    method,
                    line,
                } => {
                    assert_eq!(class, unit);
                    armed.insert((class, method, line));
                    peer.reply(request.id, ReplyPayload::BreakpointResolved);
                }
                other => panic!("expected re-arm, got {other:?}"),
            }
        }
    }

    let mut fired = 0usize;
    for visit in &script.visits {
        let key = (visit.class.clone(), visit.method.clone(), visit.line);
        if !armed.contains(&key) {
            continue;
        }
        if let Some((after, status)) = script.exit_after {
            if fired >= after {
                peer.event(Event::TargetExited { status });
                return false;
            }
        }
        peer.event(Event::BreakpointHit {
            class: visit.class.clone(),
            method: visit.method.clone(),
            line: visit.line,
        });
        let request = peer.read_request().expect("read_frame request");
        assert!(matches!(request.command, Command::ReadFrame));
        peer.reply(
            request.id,
            ReplyPayload::Frame {
                variables: visit.variables.clone(),
            },
        );
        let request = peer.read_request().expect("resume request");
        assert!(matches!(request.command, Command::Resume));
        peer.reply(request.id, ReplyPayload::Ok);
        fired += 1;
    }
    if let Some((_, status)) = script.exit_after {
        peer.event(Event::TargetExited { status });
        return false;
    }
    peer.event(Event::TestFinished {
        test: script.test.clone(),
        passed: script.passed,
        assertion: script.assertion.clone(),
    });
    true
}
