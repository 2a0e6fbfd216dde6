use std::time::Instant;

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};
use ulid::Ulid;

use crate::engine::{Change, Engine, EngineError, ErrorKind};
use crate::model::*;

/// Operations a client can run against the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    List,
    Lock,
    Unlock,
    Reserve,
    Update,
    Cancel,
}

impl Op {
    pub const ALL: [Op; 6] = [Op::List, Op::Lock, Op::Unlock, Op::Reserve, Op::Update, Op::Cancel];

    pub fn keyword(self) -> &'static str {
        match self {
            Op::List => "list",
            Op::Lock => "lock",
            Op::Unlock => "unlock",
            Op::Reserve => "reserve",
            Op::Update => "update",
            Op::Cancel => "cancel",
        }
    }

    /// Accepted argument counts, not counting the keyword.
    pub fn arity(self) -> &'static [usize] {
        match self {
            Op::List => &[0],
            Op::Lock => &[1],
            Op::Unlock => &[1, 2],
            Op::Reserve | Op::Update => &[4],
            Op::Cancel => &[2],
        }
    }

    pub fn usage(self) -> &'static str {
        match self {
            Op::List => "list - list all resources and their reservations",
            Op::Lock => "lock <resourceId> - lock a resource before reserving it",
            Op::Unlock => "unlock <resourceId> [<reservationId>] - release a lock you hold",
            Op::Reserve => {
                "reserve <resourceId> <reservationId> <startDate> <endDate> - commit a locked reservation (dates YYYY-MM-DD)"
            }
            Op::Update => {
                "update <resourceId> <reservationId> <startDate> <endDate> - move one of your reservations (dates YYYY-MM-DD)"
            }
            Op::Cancel => "cancel <resourceId> <reservationId> - cancel one of your reservations",
        }
    }
}

/// What a registered keyword does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Usage of every registered operation.
    Help,
    /// Usage of a single operation.
    HelpFor(Op),
    Run(Op),
}

impl CommandKind {
    fn arity(self) -> &'static [usize] {
        match self {
            CommandKind::Help | CommandKind::HelpFor(_) => &[0],
            CommandKind::Run(op) => op.arity(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            CommandKind::Help => "help",
            CommandKind::HelpFor(_) => "help_<command>",
            CommandKind::Run(op) => op.keyword(),
        }
    }
}

/// Register `help`, every operation and its `help_<keyword>` companion.
pub async fn register_default_commands(engine: &Engine) {
    engine.add_command("help", CommandKind::Help).await;
    for op in Op::ALL {
        engine.add_command(op.keyword(), CommandKind::Run(op)).await;
        engine
            .add_help_command(op.keyword(), CommandKind::HelpFor(op))
            .await;
    }
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    HelpFor(Op),
    List,
    Lock {
        resource_id: Ulid,
    },
    Unlock {
        resource_id: Ulid,
        lock_id: Option<Ulid>,
    },
    Reserve {
        resource_id: Ulid,
        reservation_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Update {
        resource_id: Ulid,
        reservation_id: Ulid,
        start: Ms,
        end: Ms,
    },
    Cancel {
        resource_id: Ulid,
        reservation_id: Ulid,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    WrongArity {
        command: &'static str,
        expected: &'static [usize],
        got: usize,
    },
    InvalidId(String),
    InvalidDate(String),
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::Unknown(_) => ErrorKind::Protocol,
            _ => ErrorKind::Validation,
        }
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Unknown(keyword) => write!(f, "invalid command: {keyword:?}"),
            CommandError::WrongArity { command, expected, got } => {
                let expected: Vec<String> = expected.iter().map(|n| n.to_string()).collect();
                write!(
                    f,
                    "invalid number of arguments for {command}: expected {}, got {got}",
                    expected.join(" or ")
                )
            }
            CommandError::InvalidId(raw) => write!(f, "invalid id: {raw:?}"),
            CommandError::InvalidDate(raw) => {
                write!(f, "invalid date: {raw:?} (expected YYYY-MM-DD)")
            }
        }
    }
}

impl std::error::Error for CommandError {}

/// Reply sent to the client that issued a command. Exactly one of `data`
/// and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub data: Option<Value>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                data: Some(data),
                error: None,
                kind: None,
            },
            Err(e) => {
                error!("error encoding response: {e}");
                Self::error(ErrorKind::Protocol, "error encoding response")
            }
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
            kind: Some(kind),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl From<EngineError> for Response {
    fn from(e: EngineError) -> Self {
        Response::error(e.kind(), e.to_string())
    }
}

impl From<CommandError> for Response {
    fn from(e: CommandError) -> Self {
        Response::error(e.kind(), e.to_string())
    }
}

/// Outcome of one inbound line: the reply for the caller and, for a
/// successful mutation, the events to broadcast in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub response: Response,
    pub events: Vec<Event>,
}

impl Dispatched {
    fn reply(response: impl Into<Response>) -> Self {
        Self {
            response: response.into(),
            events: Vec::new(),
        }
    }

    fn changed(change: Change) -> Self {
        Self {
            response: Response::ok(&change.reservation),
            events: change.events().collect(),
        }
    }
}

/// Look up the keyword of `line` in the engine's command table, parse the
/// remaining tokens and run the command on behalf of `client`.
pub async fn dispatch(engine: &Engine, client: &ClientName, line: &str) -> Dispatched {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let keyword = tokens.first().copied().unwrap_or("");

    let Some(kind) = engine.command(keyword).await else {
        metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => "unknown", "status" => "error")
            .increment(1);
        debug!("unknown command {keyword:?} from {client}");
        return Dispatched::reply(CommandError::Unknown(keyword.to_string()));
    };

    let cmd = match parse_command(kind, &tokens[1..]) {
        Ok(cmd) => cmd,
        Err(e) => {
            metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => kind.name(), "status" => "error")
                .increment(1);
            debug!("rejected {line:?} from {client}: {e}");
            return Dispatched::reply(e);
        }
    };

    let label = crate::observability::command_label(&cmd);
    let started = Instant::now();
    let dispatched = execute(engine, client, cmd).await;
    metrics::histogram!(crate::observability::COMMAND_DURATION_SECONDS, "command" => label)
        .record(started.elapsed().as_secs_f64());
    let status = if dispatched.response.is_ok() { "ok" } else { "error" };
    metrics::counter!(crate::observability::COMMANDS_TOTAL, "command" => label, "status" => status)
        .increment(1);
    dispatched
}

pub fn parse_command(kind: CommandKind, args: &[&str]) -> Result<Command, CommandError> {
    if !kind.arity().contains(&args.len()) {
        return Err(CommandError::WrongArity {
            command: kind.name(),
            expected: kind.arity(),
            got: args.len(),
        });
    }

    let op = match kind {
        CommandKind::Help => return Ok(Command::Help),
        CommandKind::HelpFor(op) => return Ok(Command::HelpFor(op)),
        CommandKind::Run(op) => op,
    };

    Ok(match op {
        Op::List => Command::List,
        Op::Lock => Command::Lock {
            resource_id: parse_ulid(args[0])?,
        },
        Op::Unlock => Command::Unlock {
            resource_id: parse_ulid(args[0])?,
            lock_id: args.get(1).map(|raw| parse_ulid(raw)).transpose()?,
        },
        Op::Reserve => Command::Reserve {
            resource_id: parse_ulid(args[0])?,
            reservation_id: parse_ulid(args[1])?,
            start: parse_date(args[2])?,
            end: parse_date(args[3])?,
        },
        Op::Update => Command::Update {
            resource_id: parse_ulid(args[0])?,
            reservation_id: parse_ulid(args[1])?,
            start: parse_date(args[2])?,
            end: parse_date(args[3])?,
        },
        Op::Cancel => Command::Cancel {
            resource_id: parse_ulid(args[0])?,
            reservation_id: parse_ulid(args[1])?,
        },
    })
}

async fn execute(engine: &Engine, client: &ClientName, cmd: Command) -> Dispatched {
    let result = match cmd {
        Command::Help => {
            let usage: Vec<&'static str> = engine
                .commands()
                .await
                .into_iter()
                .filter_map(|(_, kind)| match kind {
                    CommandKind::Run(op) => Some(op.usage()),
                    _ => None,
                })
                .collect();
            return Dispatched::reply(Response::ok(usage));
        }
        Command::HelpFor(op) => return Dispatched::reply(Response::ok(op.usage())),
        Command::List => return Dispatched::reply(Response::ok(engine.list_resources().await)),
        Command::Lock { resource_id } => engine.lock(client, resource_id).await,
        Command::Unlock { resource_id, lock_id } => engine.unlock(client, resource_id, lock_id).await,
        Command::Reserve {
            resource_id,
            reservation_id,
            start,
            end,
        } => {
            engine
                .reserve(client, resource_id, reservation_id, start, end)
                .await
        }
        Command::Update {
            resource_id,
            reservation_id,
            start,
            end,
        } => {
            engine
                .update_reservation(client, resource_id, reservation_id, start, end)
                .await
        }
        Command::Cancel {
            resource_id,
            reservation_id,
        } => {
            engine
                .cancel_reservation(client, resource_id, reservation_id)
                .await
        }
    };

    match result {
        Ok(change) => Dispatched::changed(change),
        Err(e) => Dispatched::reply(e),
    }
}

fn parse_ulid(raw: &str) -> Result<Ulid, CommandError> {
    Ulid::from_string(raw).map_err(|_| CommandError::InvalidId(raw.to_string()))
}

fn parse_date(raw: &str) -> Result<Ms, CommandError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(day_start_ms)
        .map_err(|_| CommandError::InvalidDate(raw.to_string()))
}
