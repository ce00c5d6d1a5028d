//! Instruction execution: a pre-built sequence of frontend commands run as
//! one unit, with every backend reply validated against the expected-reply
//! table of the command currently being answered.
//!
//! The dispatch table is two-level: command kind → step index → accepted
//! message type, where each accepted type names the step that follows it.
//! `None` ends the current command; the machine then advances to the next
//! command (skipping Flush, which elicits no reply) and resets to step 0.
//!
//! Streams get fast paths: once a copy-out or row-data context is entered,
//! a group consisting entirely of CopyData (or DataRow) messages is parsed
//! in bulk without consulting the table; a mixed group falls back to the
//! standard path and is replayed from the same position.

use crate::error::{Error, ErrorFields, Failure, sqlstate};
use crate::protocol::backend::{ErrorResponse, Reply, is_async_type, msg_type};
use crate::protocol::frontend::Command;
use crate::protocol::types::TransactionStatus;

use super::{AsyncMessage, Direction, Pending, WireGroup, parse_async};

/// Hook invoked once per asynchronous message observed by an instruction.
pub type AsyncHook = Box<dyn FnMut(AsyncMessage) + Send>;

/// One step of a command's expected-reply table: accepted message type and
/// the step that follows it (`None` completes the command).
type StepTable = &'static [(u8, Option<usize>)];

const QUERY_HOOK: &[StepTable] = &[
    // 0: start of a result set
    &[
        (msg_type::ROW_DESCRIPTION, Some(3)),
        (msg_type::EMPTY_QUERY_RESPONSE, Some(0)),
        (msg_type::COMMAND_COMPLETE, Some(0)),
        (msg_type::COPY_OUT_RESPONSE, Some(2)),
        (msg_type::COPY_IN_RESPONSE, Some(1)),
        (msg_type::READY_FOR_QUERY, None),
    ],
    // 1: completion after a copy-in
    &[(msg_type::COMMAND_COMPLETE, Some(0))],
    // 2: copy-out data until CopyDone
    &[
        (msg_type::COPY_DATA, Some(2)),
        (msg_type::COPY_DONE, Some(1)),
    ],
    // 3: row data
    &[
        (msg_type::DATA_ROW, Some(3)),
        (msg_type::COMMAND_COMPLETE, Some(0)),
        (msg_type::READY_FOR_QUERY, None),
    ],
];

const FUNCTION_HOOK: &[StepTable] = &[
    &[(msg_type::FUNCTION_CALL_RESPONSE, Some(1))],
    &[(msg_type::READY_FOR_QUERY, None)],
];

const PARSE_HOOK: &[StepTable] = &[&[(msg_type::PARSE_COMPLETE, None)]];

const BIND_HOOK: &[StepTable] = &[&[(msg_type::BIND_COMPLETE, None)]];

const DESCRIBE_HOOK: &[StepTable] = &[
    // 0: a statement describe leads with the parameter types
    &[
        (msg_type::PARAMETER_DESCRIPTION, Some(1)),
        (msg_type::ROW_DESCRIPTION, None),
        (msg_type::NO_DATA, None),
    ],
    // 1: NoData or the row descriptor
    &[
        (msg_type::NO_DATA, None),
        (msg_type::ROW_DESCRIPTION, None),
    ],
];

const CLOSE_HOOK: &[StepTable] = &[&[(msg_type::CLOSE_COMPLETE, None)]];

const EXECUTE_HOOK: &[StepTable] = &[
    // 0: start
    &[
        (msg_type::DATA_ROW, Some(1)),
        (msg_type::COPY_OUT_RESPONSE, Some(2)),
        (msg_type::COPY_IN_RESPONSE, Some(3)),
        (msg_type::EMPTY_QUERY_RESPONSE, None),
        (msg_type::COMMAND_COMPLETE, None),
    ],
    // 1: row data until the portal suspends or drains
    &[
        (msg_type::DATA_ROW, Some(1)),
        (msg_type::PORTAL_SUSPENDED, None),
        (msg_type::COMMAND_COMPLETE, None),
    ],
    // 2: copy-out data
    &[
        (msg_type::COPY_DATA, Some(2)),
        (msg_type::COPY_DONE, Some(3)),
    ],
    // 3: completion
    &[(msg_type::COMMAND_COMPLETE, None)],
];

const SYNC_HOOK: &[StepTable] = &[&[(msg_type::READY_FOR_QUERY, None)]];

/// Expected-reply table for a command. Flush elicits no reply and has no
/// steps; command advancement skips over it.
fn hook(cmd: &Command) -> &'static [StepTable] {
    match cmd {
        Command::Query(_) => QUERY_HOOK,
        Command::Function(_) => FUNCTION_HOOK,
        Command::Parse(_) => PARSE_HOOK,
        Command::Bind(_) => BIND_HOOK,
        Command::Describe(_) => DESCRIBE_HOOK,
        Command::Close(_) => CLOSE_HOOK,
        Command::Execute(_) => EXECUTE_HOOK,
        Command::Sync => SYNC_HOOK,
        Command::Flush => &[],
    }
}

/// One delivered wire group's parsed replies.
#[derive(Debug, Clone)]
pub struct Group {
    source: u64,
    replies: Vec<Reply>,
}

impl Group {
    /// The parsed replies of this group, in wire order.
    pub fn replies(&self) -> &[Reply] {
        &self.replies
    }
}

/// Receiving-side continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecvMode {
    /// Table-driven validation, one message at a time.
    Standard,
    /// Bulk CopyData intake after a copy-out began.
    CopyStream,
    /// Bulk DataRow intake after row data began.
    RowStream,
}

/// Sending-side payload.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SendPayload {
    /// The instruction's own command sequence.
    Commands,
    /// Nothing queued.
    Nothing,
    /// Caller-provided raw copy chunks.
    CopyChunks(Vec<Vec<u8>>),
    /// CopyDone followed by the commands after the copy.
    CopyDone,
    /// CopyFail followed by the commands after the copy.
    CopyFail,
}

/// A sequence of frontend commands executed as one protocol transaction.
pub struct Instruction {
    commands: Vec<Command>,
    completed: Vec<Group>,
    /// Group identity bookkeeping for idempotent re-delivery.
    last_group: Option<u64>,
    /// Cursor (command, step) before the last applied group.
    before: (usize, usize),
    /// Cursor (command, step) after the last applied group.
    after: (usize, usize),
    state: Direction,
    recv_mode: RecvMode,
    payload: SendPayload,
    /// Index of the first command after the active copy-in.
    copy_tail: usize,
    in_copy: bool,
    send_gen: u64,
    fatal: bool,
    error: Option<Failure>,
    exception: Option<Error>,
    last_ready: Option<TransactionStatus>,
    /// After a non-fatal error, discard unknown messages until the
    /// resynchronizing Ready arrives.
    resync: bool,
    async_group: Option<u64>,
    async_seen: Vec<usize>,
    hook: Option<AsyncHook>,
}

impl std::fmt::Debug for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instruction")
            .field("commands", &self.commands)
            .field("state", &self.state)
            .field("fatal", &self.fatal)
            .field("error", &self.error)
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}

impl Instruction {
    /// Create an instruction from its command sequence.
    ///
    /// The sequence is immutable after construction; `Command` is a closed
    /// enum, so every command has an entry in the dispatch table by
    /// construction.
    pub fn new(commands: Vec<Command>) -> Self {
        Self {
            commands,
            completed: Vec::new(),
            last_group: None,
            before: (0, 0),
            after: (0, 0),
            state: Direction::Sending,
            recv_mode: RecvMode::Standard,
            payload: SendPayload::Commands,
            copy_tail: 0,
            in_copy: false,
            send_gen: 0,
            fatal: false,
            error: None,
            exception: None,
            last_ready: None,
            resync: false,
            async_group: None,
            async_seen: Vec::new(),
            hook: None,
        }
    }

    /// Attach a hook that receives Notice, Notify and parameter-change
    /// messages observed while this instruction runs.
    pub fn with_async_hook(mut self, hook: AsyncHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// The command sequence this instruction sends.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// The delivered groups of parsed replies, in arrival order.
    pub fn completed(&self) -> &[Group] {
        &self.completed
    }

    /// All parsed replies, flattened in wire order.
    pub fn replies(&self) -> impl Iterator<Item = &Reply> {
        self.completed.iter().flat_map(|g| g.replies.iter())
    }

    /// All parsed replies in reverse order. Last in, first out.
    pub fn replies_rev(&self) -> impl Iterator<Item = &Reply> {
        self.completed.iter().rev().flat_map(|g| g.replies.iter().rev())
    }

    /// Direction of the next wire transition.
    pub fn direction(&self) -> Direction {
        self.state
    }

    /// Whether the instruction has finished.
    pub fn is_complete(&self) -> bool {
        self.state == Direction::Complete
    }

    /// Whether the failure (if any) poisons the connection.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// The failure recorded on this instruction, if any.
    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    /// The underlying cause of the failure, when one was captured.
    pub fn exception(&self) -> Option<&Error> {
        self.exception.as_ref()
    }

    /// The most recent ReadyForQuery status this instruction observed.
    pub fn last_ready(&self) -> Option<TransactionStatus> {
        self.last_ready
    }

    /// Whether the instruction is waiting for the caller to provide copy
    /// data (COPY ... FROM STDIN in progress).
    pub fn is_sending_copy(&self) -> bool {
        self.in_copy && self.state == Direction::Sending
    }

    /// Queue raw copy chunks to send; each chunk becomes one CopyData frame.
    ///
    /// Must be called before every send while a copy-in is active; if no
    /// data and no [`end_copy`](Self::end_copy) is provided, the next send
    /// emits CopyFail and the remainder of the instruction runs normally.
    ///
    /// Returns false when no copy-in is active.
    pub fn send_copy_data(&mut self, chunks: Vec<Vec<u8>>) -> bool {
        if !self.is_sending_copy() {
            return false;
        }
        self.payload = SendPayload::CopyChunks(chunks);
        self.send_gen += 1;
        true
    }

    /// Terminate the active copy-in successfully: the next send emits
    /// CopyDone followed by the remaining commands.
    ///
    /// Returns false when no copy-in is active.
    pub fn end_copy(&mut self) -> bool {
        if !self.is_sending_copy() {
            return false;
        }
        self.payload = SendPayload::CopyDone;
        self.send_gen += 1;
        true
    }

    /// Monotonic counter bumped whenever the pending payload changes.
    pub fn send_generation(&self) -> u64 {
        self.send_gen
    }

    /// What the driver should write next.
    pub fn pending(&self) -> Pending<'_> {
        if self.state != Direction::Sending {
            return Pending::Nothing;
        }
        match &self.payload {
            SendPayload::Commands => Pending::Commands(&self.commands),
            SendPayload::Nothing => Pending::Nothing,
            SendPayload::CopyChunks(chunks) => Pending::CopyChunks(chunks),
            SendPayload::CopyDone => Pending::CopyDone(&self.commands[self.copy_tail..]),
            SendPayload::CopyFail => Pending::CopyFail(&self.commands[self.copy_tail..]),
        }
    }

    /// Finalize the Sending state once the pending payload is on the wire.
    pub fn sent(&mut self) {
        if self.state != Direction::Sending {
            return;
        }
        if self.in_copy {
            match self.payload {
                SendPayload::CopyDone | SendPayload::CopyFail => {
                    self.payload = SendPayload::Nothing;
                    self.in_copy = false;
                    self.state = Direction::Receiving;
                    self.recv_mode = RecvMode::Standard;
                }
                _ => {
                    // Arm the failure terminator; the caller must queue the
                    // next chunk (or CopyDone) before each send.
                    self.payload = SendPayload::CopyFail;
                    self.send_gen += 1;
                }
            }
        } else {
            self.payload = SendPayload::Nothing;
            if self.after.0 >= self.commands.len() {
                self.state = Direction::Complete;
            } else {
                self.state = Direction::Receiving;
                self.recv_mode = RecvMode::Standard;
            }
        }
    }

    /// Force-complete with a failure observed by the driver.
    pub(crate) fn fail(&mut self, failure: Failure, exception: Option<Error>) {
        self.error = Some(failure);
        self.exception = exception;
        self.fatal = true;
        self.state = Direction::Complete;
    }

    fn fail_parse(&mut self, e: Error) {
        self.fail(
            Failure::client(
                ErrorFields::client(
                    sqlstate::PROTOCOL_VIOLATION,
                    "wire-data caused exception in protocol transaction",
                )
                .with_hint("Protocol error detected."),
            ),
            Some(e),
        );
    }

    fn deliver_async(&mut self, msg: AsyncMessage) {
        let Some(hook) = self.hook.as_mut() else {
            return;
        };
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(msg)));
        if result.is_err() {
            // A panicking hook must not abort the instruction.
            tracing::error!("async message hook panicked");
        }
    }

    /// Deliver a group of backend messages; returns how many were consumed.
    pub fn put(&mut self, group: &WireGroup) -> usize {
        if self.state != Direction::Receiving {
            return 0;
        }
        match self.recv_mode {
            RecvMode::Standard => self.standard_put(group),
            RecvMode::CopyStream => self.put_copy_stream(group),
            RecvMode::RowStream => self.put_row_stream(group),
        }
    }

    /// Append a group's parsed replies to `completed`, at most once per
    /// group identity. Also called on failure exits, so replies parsed
    /// before the failing message survive into `completed`.
    fn record_group(&mut self, source: u64, replies: Vec<Reply>) {
        if self.completed.last().map(|g| g.source) != Some(source) {
            self.completed.push(Group { source, replies });
        }
    }

    /// Table-driven intake: validate each message against the current
    /// command's step table, record parsed replies, and handle errors,
    /// asynchronous messages and resynchronization.
    fn standard_put(&mut self, group: &WireGroup) -> usize {
        // A re-presented group replays from the cursor it started at.
        let start = if self.last_group == Some(group.id) {
            self.before
        } else {
            self.after
        };
        if self.async_group != Some(group.id) {
            self.async_group = Some(group.id);
            self.async_seen.clear();
        }

        let (mut offset, mut step) = start;
        let mut processed: Vec<Reply> = Vec::new();
        let mut count = 0usize;

        for (index, msg) in group.messages.iter().enumerate() {
            if offset >= self.commands.len() {
                break;
            }
            count += 1;

            let steps = hook(&self.commands[offset]);
            let entry = steps
                .get(step)
                .and_then(|table| table.iter().find(|(tag, _)| *tag == msg.tag));

            let Some((_, next)) = entry else {
                if msg.tag == msg_type::ERROR_RESPONSE {
                    let fields = match ErrorResponse::parse(&msg.payload) {
                        Ok(err) => err.fields,
                        Err(e) => {
                            self.fail_parse(e);
                            self.record_group(group.id, processed);
                            return count;
                        }
                    };
                    let fatal = fields.is_disconnect();
                    self.error = Some(Failure::server(fields));
                    self.fatal = fatal;
                    if fatal {
                        // Cannot resynchronize past a disconnect.
                        self.state = Direction::Complete;
                        self.record_group(group.id, processed);
                        return count;
                    }
                    // Query and Function answer with their own Ready, so
                    // their error flow just waits for it. Everything else
                    // must skip ahead to the next Sync.
                    if !matches!(
                        self.commands[offset],
                        Command::Query(_) | Command::Function(_)
                    ) {
                        match self.commands[offset..].iter().position(Command::is_sync) {
                            Some(rel) => offset += rel,
                            None => {
                                // Nothing to resynchronize against.
                                self.state = Direction::Complete;
                                self.record_group(group.id, processed);
                                return count;
                            }
                        }
                    }
                    step = 0;
                    self.resync = true;
                    continue;
                }

                if is_async_type(msg.tag) {
                    // Deliver exactly once, even if the same group is
                    // re-presented after a transient retry.
                    if !self.async_seen.contains(&index) {
                        match parse_async(msg) {
                            Ok(parsed) => {
                                self.deliver_async(parsed);
                                self.async_seen.push(index);
                            }
                            Err(e) => {
                                self.fail_parse(e);
                                self.record_group(group.id, processed);
                                return count;
                            }
                        }
                    }
                    continue;
                }

                if self.resync {
                    tracing::debug!(
                        "discarding message '{}' while resynchronizing",
                        msg.tag as char
                    );
                    continue;
                }

                let expected = steps
                    .get(step)
                    .map(|table| {
                        table
                            .iter()
                            .map(|(tag, _)| format!("'{}'", *tag as char))
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                self.fail(
                    Failure::client(
                        ErrorFields::client(
                            sqlstate::PROTOCOL_VIOLATION,
                            format!(
                                "expected message of types [{expected}], but received '{}' instead",
                                msg.tag as char
                            ),
                        )
                        .with_severity("FATAL"),
                    ),
                    None,
                );
                self.record_group(group.id, processed);
                return count;
            };

            // Valid message for the current step.
            self.resync = false;
            let reply = match Reply::parse(msg.tag, &msg.payload) {
                Ok(reply) => reply,
                Err(e) => {
                    self.fail_parse(e);
                    self.record_group(group.id, processed);
                    return count;
                }
            };
            if let Reply::Ready(status) = &reply {
                self.last_ready = Some(*status);
            }
            processed.push(reply);

            match next {
                Some(next_step) => step = *next_step,
                None => {
                    step = 0;
                    // Advance past commands that elicit no reply (Flush).
                    loop {
                        offset += 1;
                        if offset >= self.commands.len()
                            || !hook(&self.commands[offset]).is_empty()
                        {
                            break;
                        }
                    }
                    if offset >= self.commands.len() {
                        // Transaction finished; leave the rest of the group
                        // for whatever is mounted next.
                        break;
                    }
                }
            }
        }

        // Decide on a fast path before the replies move into `completed`.
        let stream_next = if offset < self.commands.len()
            && matches!(self.commands[offset], Command::Query(_) | Command::Execute(_))
        {
            match processed.last() {
                Some(Reply::CopyData(_) | Reply::CopyOut(_)) => Some(RecvMode::CopyStream),
                Some(Reply::DataRow(_)) => Some(RecvMode::RowStream),
                Some(Reply::CopyIn(_)) => {
                    self.copy_tail = offset + 1;
                    self.in_copy = true;
                    self.payload = SendPayload::CopyFail;
                    self.send_gen += 1;
                    self.state = Direction::Sending;
                    None
                }
                _ => None,
            }
        } else {
            None
        };

        self.record_group(group.id, processed);
        self.last_group = Some(group.id);
        self.before = start;
        self.after = (offset, step);

        if offset >= self.commands.len() {
            self.state = Direction::Complete;
        } else if let Some(mode) = stream_next {
            self.recv_mode = mode;
        }
        count
    }

    /// Bulk intake of a homogeneous CopyData group. A mixed group reverts
    /// to the standard path and is replayed from the same position.
    fn put_copy_stream(&mut self, group: &WireGroup) -> usize {
        let homogeneous = group
            .messages
            .last()
            .is_some_and(|m| m.tag == msg_type::COPY_DATA)
            && group.messages.iter().all(|m| m.tag == msg_type::COPY_DATA);
        if !homogeneous {
            self.recv_mode = RecvMode::Standard;
            return self.standard_put(group);
        }

        if self.completed.last().map(|g| g.source) != Some(group.id) {
            let replies = group
                .messages
                .iter()
                .map(|m| Reply::CopyData(m.payload.clone()))
                .collect();
            self.record_group(group.id, replies);
        }
        self.last_group = Some(group.id);
        self.before = self.after;
        group.messages.len()
    }

    /// Bulk intake of a homogeneous DataRow group, parsed without the
    /// dispatch table.
    fn put_row_stream(&mut self, group: &WireGroup) -> usize {
        let homogeneous = group
            .messages
            .last()
            .is_some_and(|m| m.tag == msg_type::DATA_ROW)
            && group.messages.iter().all(|m| m.tag == msg_type::DATA_ROW);
        if !homogeneous {
            self.recv_mode = RecvMode::Standard;
            return self.standard_put(group);
        }

        if self.completed.last().map(|g| g.source) != Some(group.id) {
            let mut replies = Vec::with_capacity(group.messages.len());
            for (index, msg) in group.messages.iter().enumerate() {
                match Reply::parse(msg.tag, &msg.payload) {
                    Ok(reply) => replies.push(reply),
                    Err(e) => {
                        // Keep the rows parsed before the malformed one.
                        self.fail_parse(e);
                        self.record_group(group.id, replies);
                        return index + 1;
                    }
                }
            }
            self.record_group(group.id, replies);
        }
        self.last_group = Some(group.id);
        self.before = self.after;
        group.messages.len()
    }
}
