use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tailrpc_core::Clock;
use tailrpc_log::{CappedMemoryLog, RecordLog};
use tailrpc_node::{arg, EngineError, Outgoing, Reply, RpcEngine};
use thiserror::Error;
use tracing::{info, warn};

pub const HELP: &str = "\
commands:
  nodes                          list hosted nodes (* marks the current one)
  use <name>                     switch the current node
  send <fn> [json-args] [to]     call <fn> on <to> (default *), printing replies
  list [to]                      ask nodes for their exposed functions
  ping [to]                      measure round-trip latency
  start | stop | restart         control the current node's consumer
  pause | resume                 hold or release delivery on the current node
  status                         show node and log state
  help                           show this text
  quit                           stop every node and exit";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("unknown command {0:?}; type help")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("no nodes configured")]
    NoNodes,
    #[error("node {0:?} configured twice")]
    DuplicateNode(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Nodes,
    Use(String),
    Send {
        function: String,
        args: Vec<Value>,
        to: String,
    },
    List(String),
    Ping(String),
    Start,
    Stop,
    Restart,
    Pause,
    Resume,
    Status,
    Help,
    Quit,
}

/// Parses one input line; blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let to_or_all = |rest: &str| {
        if rest.is_empty() {
            "*".to_string()
        } else {
            rest.to_string()
        }
    };

    let command = match word {
        "nodes" => Command::Nodes,
        "use" if !rest.is_empty() => Command::Use(rest.to_string()),
        "use" => return Err(CommandError::Usage("use <name>")),
        "send" => parse_send(rest)?,
        "list" => Command::List(to_or_all(rest)),
        "ping" => Command::Ping(to_or_all(rest)),
        "start" => Command::Start,
        "stop" => Command::Stop,
        "restart" => Command::Restart,
        "pause" => Command::Pause,
        "resume" => Command::Resume,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}

fn parse_send(rest: &str) -> Result<Command, CommandError> {
    const USAGE: &str = "send <fn> [json-args] [to]";
    let (function, rest) = match rest.split_once(char::is_whitespace) {
        Some((function, rest)) => (function, rest.trim()),
        None => (rest, ""),
    };
    if function.is_empty() {
        return Err(CommandError::Usage(USAGE));
    }

    let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
    let (args, to) = match stream.next() {
        Some(Ok(value)) => {
            let args = match value {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            (args, rest[stream.byte_offset()..].trim())
        }
        _ => (Vec::new(), rest),
    };

    Ok(Command::Send {
        function: function.to_string(),
        args,
        to: if to.is_empty() { "*".to_string() } else { to.to_string() },
    })
}

/// Buffered lines produced by commands and reply handlers.
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<String>>>);

impl Output {
    pub fn push(&self, line: impl Into<String>) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.into());
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

struct HostedNode {
    engine: RpcEngine,
    faulted: bool,
}

/// Interactive host for several nodes sharing one in-memory capped log.
pub struct Shell {
    log: CappedMemoryLog,
    nodes: Vec<HostedNode>,
    current: usize,
    auto_restart: bool,
    output: Output,
}

impl Shell {
    pub fn new(config: &crate::config::ShellConfig, clock: Arc<dyn Clock>) -> Result<Self, ShellError> {
        if config.nodes.is_empty() {
            return Err(ShellError::NoNodes);
        }
        let log = CappedMemoryLog::with_capacity(config.log_capacity_bytes, Arc::clone(&clock));
        let mut nodes: Vec<HostedNode> = Vec::with_capacity(config.nodes.len());
        for name in &config.nodes {
            if nodes.iter().any(|n| n.engine.name() == name) {
                return Err(ShellError::DuplicateNode(name.clone()));
            }
            let mut engine = RpcEngine::with_clock(
                config.engine_config(name),
                Arc::new(log.clone()),
                Arc::clone(&clock),
            )?;
            expose_demo_functions(&mut engine)?;
            nodes.push(HostedNode {
                engine,
                faulted: false,
            });
        }
        Ok(Self {
            log,
            nodes,
            current: 0,
            auto_restart: config.auto_restart,
            output: Output::default(),
        })
    }

    pub fn current_name(&self) -> &str {
        self.nodes[self.current].engine.name()
    }

    pub fn start_all(&mut self) {
        for node in &mut self.nodes {
            node.engine.start();
        }
    }

    pub fn stop_all(&mut self) {
        for node in &mut self.nodes {
            node.engine.stop();
        }
    }

    pub fn drain_output(&self) -> Vec<String> {
        self.output.drain()
    }

    /// Polls every node once, restarting nodes whose stream faulted on the
    /// previous tick when auto restart is on.
    pub fn tick(&mut self) {
        for node in &mut self.nodes {
            if node.faulted && self.auto_restart {
                info!(node = %node.engine.name(), "restarting after stream fault");
                node.faulted = false;
                node.engine.restart();
            }
            let report = node.engine.poll();
            if report.stream_ended {
                warn!(node = %node.engine.name(), "tail stream ended");
                node.faulted = true;
            }
        }
    }

    pub fn execute(&mut self, command: Command) -> Flow {
        match command {
            Command::Nodes => {
                for (i, node) in self.nodes.iter().enumerate() {
                    let marker = if i == self.current { "*" } else { " " };
                    self.output.push(format!(
                        "{marker} {} ({:?})",
                        node.engine.name(),
                        node.engine.state()
                    ));
                }
            }
            Command::Use(name) => {
                match self.nodes.iter().position(|n| n.engine.name() == name) {
                    Some(index) => {
                        self.current = index;
                        self.output.push(format!("using {name}"));
                    }
                    None => self.output.push(format!("no node named {name}")),
                }
            }
            Command::Send { function, args, to } => {
                let message = Outgoing::new(function).args(args).to(to);
                self.send_printing_replies(message);
            }
            Command::List(to) => {
                self.send_printing_replies(Outgoing::new("#list").to(to));
            }
            Command::Ping(to) => {
                let output = self.output.clone();
                let engine = &mut self.nodes[self.current].engine;
                let from = engine.name().to_string();
                let sent = engine.ping_with(&to, move |latency, who| {
                    output.push(format!(
                        "[{from}] ping to {who} took {} ms",
                        latency.as_millis()
                    ))
                });
                if let Err(err) = sent {
                    self.output.push(format!("error: {err}"));
                }
            }
            Command::Start => self.current_engine().start(),
            Command::Stop => self.current_engine().stop(),
            Command::Restart => self.current_engine().restart(),
            Command::Pause => self.current_engine().pause(),
            Command::Resume => self.current_engine().resume(),
            Command::Status => self.status(),
            Command::Help => self.output.push(HELP),
            Command::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn current_engine(&mut self) -> &mut RpcEngine {
        &mut self.nodes[self.current].engine
    }

    fn send_printing_replies(&mut self, message: Outgoing) {
        let output = self.output.clone();
        let engine = &mut self.nodes[self.current].engine;
        let from = engine.name().to_string();
        let message = message.on_reply(move |ctx, reply| {
            let function = &ctx.request().function;
            let replier = ctx.replier();
            let line = match reply {
                Reply::Success(args) => {
                    format!("[{from}] {function} -> {replier}: {}", Value::Array(args))
                }
                Reply::Failure(args) => {
                    format!("[{from}] {function} failed on {replier}: {}", Value::Array(args))
                }
                Reply::NotExposed(args) => format!(
                    "[{from}] {function} not exposed on {replier}: {}",
                    Value::Array(args)
                ),
            };
            output.push(line);
            Ok(())
        });
        if let Err(err) = engine.send(message) {
            self.output.push(format!("error: {err}"));
        }
    }

    fn status(&self) {
        for node in &self.nodes {
            let engine = &node.engine;
            self.output.push(format!(
                "{}: {:?}, pending callbacks {}, sweep {}, pattern {}",
                engine.name(),
                engine.state(),
                engine.pending_callbacks(),
                if engine.sweep_scheduled() { "scheduled" } else { "idle" },
                engine.address_pattern().as_str()
            ));
        }
        let health = self.log.health_snapshot();
        self.output.push(format!(
            "log: {} records ({} bytes) retained, {} appended, {} evicted, {} append errors, {} open cursors",
            health.retained_records,
            health.retained_bytes,
            health.appended,
            health.evicted,
            health.append_errors,
            health.open_cursors
        ));
    }
}

/// `echo` logs and returns its first argument; `sum` adds two numbers.
fn expose_demo_functions(engine: &mut RpcEngine) -> Result<(), EngineError> {
    let name = engine.name().to_string();
    engine.expose("echo", move |ctx, args| {
        let args_json = Value::Array(args.to_vec());
        info!(node = %name, from = %ctx.from(), args = %args_json, "echo");
        Ok(args.first().cloned().unwrap_or(Value::Null))
    })?;
    engine.expose("sum", |_, args| {
        let a: f64 = arg(args, 0)?;
        let b: f64 = arg(args, 1)?;
        Ok(serde_json::json!(a + b))
    })
}
