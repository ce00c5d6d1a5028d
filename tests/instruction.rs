//! Scripted instruction exchanges, driven without a socket.

mod common;

use std::sync::{Arc, Mutex};

use common::*;
use pq3::protocol::frontend::{Command, Describe, Execute, Parse, Query, Target};
use pq3::protocol::frontend::FunctionCall;
use pq3::protocol::types::FormatCode;
use pq3::state::{Direction, Instruction, Pending};
use pq3::{AsyncMessage, Reply, TransactionStatus};

fn query(sql: &str) -> Command {
    Command::Query(Query(sql.to_string()))
}

fn parse(name: &str, sql: &str) -> Command {
    Command::Parse(Parse {
        name: name.to_string(),
        query: sql.to_string(),
        param_types: vec![],
    })
}

fn bind(statement: &str) -> Command {
    Command::Bind(pq3::protocol::frontend::Bind {
        portal: String::new(),
        statement: statement.to_string(),
        param_formats: vec![],
        params: vec![],
        result_formats: vec![],
    })
}

fn execute() -> Command {
    Command::Execute(Execute {
        portal: String::new(),
        max_rows: 0,
    })
}

fn started(commands: Vec<Command>) -> Instruction {
    let mut instruction = Instruction::new(commands);
    instruction.sent();
    instruction
}

fn flat_replies(instruction: &Instruction) -> Vec<Reply> {
    instruction.replies().cloned().collect()
}

#[test]
fn simple_query_one_row() {
    let mut x = started(vec![query("SELECT 1")]);

    let consumed = x.put(&group(
        0,
        vec![
            row_description("?column?", 23),
            data_row(&[Some(b"1")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ],
    ));
    assert_eq!(consumed, 4);
    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert!(x.error().is_none());
    assert_eq!(x.last_ready(), Some(TransactionStatus::Idle));

    let replies = flat_replies(&x);
    assert_eq!(replies.len(), 4);
    let Reply::RowDescription(desc) = &replies[0] else {
        panic!("expected a row descriptor");
    };
    assert_eq!(desc.fields[0].type_oid, 23);
    let Reply::DataRow(row) = &replies[1] else {
        panic!("expected a row");
    };
    assert_eq!(row.columns, vec![Some(b"1".to_vec())]);
    assert!(matches!(&replies[2], Reply::Complete(c) if c.tag == "SELECT 1"));
    assert!(matches!(replies[3], Reply::Ready(TransactionStatus::Idle)));
}

#[test]
fn multiple_result_sets() {
    let mut x = started(vec![query("SELECT 1; SELECT 2")]);

    x.put(&group(
        0,
        vec![
            row_description("a", 23),
            data_row(&[Some(b"1")]),
            command_complete("SELECT 1"),
            row_description("b", 23),
            data_row(&[Some(b"2")]),
            command_complete("SELECT 1"),
            ready(b'I'),
        ],
    ));

    assert_eq!(x.direction(), Direction::Complete);
    assert_eq!(flat_replies(&x).len(), 7);
}

#[test]
fn empty_query() {
    let mut x = started(vec![query("")]);
    x.put(&group(0, vec![msg(b'I', b""), ready(b'I')]));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(matches!(flat_replies(&x)[0], Reply::EmptyQuery));
}

#[test]
fn unexpected_message_is_protocol_violation() {
    let mut x = started(vec![query("SELECT 1")]);

    x.put(&group(0, vec![msg(b'2', b"")]));

    assert_eq!(x.direction(), Direction::Complete);
    assert!(x.is_fatal());
    let error = x.error().unwrap();
    assert_eq!(error.code(), "08P01");
    assert!(error.message().contains("'2'"));
}

#[test]
fn nonfatal_error_resynchronizes_on_next_sync() {
    // Scenario: Parse("bad"), Sync, Parse("SELECT 1"), Sync.
    let mut x = started(vec![
        parse("s0", "bad"),
        Command::Sync,
        parse("s1", "SELECT 1"),
        Command::Sync,
    ]);

    x.put(&group(
        0,
        vec![
            error_response("ERROR", "42601", "syntax error at or near \"bad\""),
            ready(b'I'),
            msg(b'1', b""),
            ready(b'I'),
        ],
    ));

    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "42601");

    let replies = flat_replies(&x);
    assert_eq!(
        replies,
        vec![
            Reply::Ready(TransactionStatus::Idle),
            Reply::ParseComplete,
            Reply::Ready(TransactionStatus::Idle),
        ]
    );
}

#[test]
fn resync_consumes_a_whole_pipeline_half() {
    let mut x = started(vec![
        parse("s0", "bad"),
        bind("s0"),
        execute(),
        Command::Sync,
        parse("s1", "SELECT 1"),
        bind("s1"),
        execute(),
        Command::Sync,
    ]);

    x.put(&group(
        0,
        vec![
            error_response("ERROR", "42601", "syntax error"),
            ready(b'I'),
            msg(b'1', b""),
            msg(b'2', b""),
            command_complete("SELECT 0"),
            ready(b'I'),
        ],
    ));

    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "42601");
    let replies = flat_replies(&x);
    assert_eq!(replies.len(), 5);
    assert!(matches!(replies[1], Reply::ParseComplete));
    assert!(matches!(replies[2], Reply::BindComplete));
}

#[test]
fn resync_discards_stale_replies() {
    let mut x = started(vec![parse("s0", "bad"), Command::Sync]);

    // A stale ParseComplete between the error and the Ready is dropped.
    x.put(&group(
        0,
        vec![
            error_response("ERROR", "42601", "syntax error"),
            msg(b'1', b""),
            ready(b'I'),
        ],
    ));

    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert_eq!(
        flat_replies(&x),
        vec![Reply::Ready(TransactionStatus::Idle)]
    );
}

#[test]
fn error_with_no_later_sync_completes() {
    let mut x = started(vec![parse("s0", "bad")]);
    x.put(&group(0, vec![error_response("ERROR", "42601", "nope")]));

    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "42601");
}

#[test]
fn fatal_error_cannot_resynchronize() {
    let mut x = started(vec![parse("s0", "x"), Command::Sync]);
    x.put(&group(
        0,
        vec![error_response("FATAL", "57P01", "terminating connection")],
    ));

    assert_eq!(x.direction(), Direction::Complete);
    assert!(x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "57P01");
}

#[test]
fn idempotent_put() {
    let mut x = started(vec![query("SELECT 1")]);
    let g = group(0, vec![row_description("a", 23), data_row(&[Some(b"1")])]);

    assert_eq!(x.put(&g), 2);
    let first = flat_replies(&x);
    assert_eq!(x.put(&g), 2);
    let second = flat_replies(&x);

    assert_eq!(first, second);
    assert_eq!(x.completed().len(), 1);

    // The exchange continues normally afterwards.
    x.put(&group(1, vec![command_complete("SELECT 1"), ready(b'I')]));
    assert_eq!(x.direction(), Direction::Complete);
}

#[test]
fn async_messages_are_isolated_and_delivered_once() {
    let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut x = Instruction::new(vec![query("SELECT 1")]).with_async_hook(Box::new(move |m| {
        let label = match m {
            AsyncMessage::Notice(fields) => format!("notice:{}", fields.message()),
            AsyncMessage::Notification { channel, .. } => format!("notify:{channel}"),
            AsyncMessage::ParameterChanged { name, .. } => format!("param:{name}"),
        };
        sink.lock().unwrap().push(label);
    }));
    x.sent();

    let g = group(
        0,
        vec![
            notice("be careful"),
            row_description("a", 23),
            notification(9, "jobs", "go"),
            data_row(&[Some(b"1")]),
        ],
    );
    x.put(&g);
    // Re-presenting the same group must not re-invoke the hook.
    x.put(&g);

    assert_eq!(
        seen.lock().unwrap().as_slice(),
        ["notice:be careful", "notify:jobs"]
    );

    // Async messages never land in the completed groups.
    let replies = flat_replies(&x);
    assert_eq!(replies.len(), 2);
    assert!(matches!(replies[0], Reply::RowDescription(_)));
    assert!(matches!(replies[1], Reply::DataRow(_)));
}

#[test]
fn async_hook_panic_does_not_abort() {
    let mut x = Instruction::new(vec![query("SELECT 1")])
        .with_async_hook(Box::new(|_| panic!("hook bug")));
    x.sent();

    x.put(&group(
        0,
        vec![notice("boom"), command_complete("SELECT 0"), ready(b'I')],
    ));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
}

#[test]
fn copy_out_fast_path_matches_standard_path() {
    // Fast path: homogeneous CopyData groups after the copy begins.
    let mut fast = started(vec![query("COPY t TO STDOUT")]);
    fast.put(&group(0, vec![copy_begin(b'H', 1)]));
    fast.put(&group(
        1,
        vec![msg(b'd', b"1\n"), msg(b'd', b"2\n"), msg(b'd', b"3\n")],
    ));
    // Mixed tail group reverts to the standard path.
    fast.put(&group(
        2,
        vec![
            msg(b'd', b"4\n"),
            msg(b'c', b""),
            command_complete("COPY 4"),
            ready(b'I'),
        ],
    ));
    assert_eq!(fast.direction(), Direction::Complete);
    assert!(!fast.is_fatal());

    // Same wire sequence in one mixed group: standard path throughout.
    let mut standard = started(vec![query("COPY t TO STDOUT")]);
    standard.put(&group(
        0,
        vec![
            copy_begin(b'H', 1),
            msg(b'd', b"1\n"),
            msg(b'd', b"2\n"),
            msg(b'd', b"3\n"),
            msg(b'd', b"4\n"),
            msg(b'c', b""),
            command_complete("COPY 4"),
            ready(b'I'),
        ],
    ));
    assert_eq!(standard.direction(), Direction::Complete);

    assert_eq!(flat_replies(&fast), flat_replies(&standard));
}

#[test]
fn row_fast_path_parses_homogeneous_groups() {
    let mut x = started(vec![execute()]);
    x.put(&group(0, vec![data_row(&[Some(b"1")])]));
    x.put(&group(
        1,
        vec![data_row(&[Some(b"2")]), data_row(&[None])],
    ));
    x.put(&group(2, vec![command_complete("SELECT 3")]));

    assert_eq!(x.direction(), Direction::Complete);
    let replies = flat_replies(&x);
    assert_eq!(replies.len(), 4);
    assert!(matches!(&replies[2], Reply::DataRow(row) if row.columns == vec![None]));
}

#[test]
fn portal_suspension_ends_execute() {
    let mut x = started(vec![execute()]);
    x.put(&group(
        0,
        vec![data_row(&[Some(b"1")]), msg(b's', b"")],
    ));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(matches!(flat_replies(&x)[1], Reply::Suspended));
}

#[test]
fn copy_in_stream_and_done() {
    // Scenario: COPY t FROM STDIN, three chunks, then the terminator.
    let mut x = started(vec![query("COPY t FROM STDIN")]);

    x.put(&group(0, vec![copy_begin(b'G', 1)]));
    assert_eq!(x.direction(), Direction::Sending);
    assert!(x.is_sending_copy());

    assert!(x.send_copy_data(vec![b"1\n".to_vec(), b"2\n".to_vec(), b"3\n".to_vec()]));
    assert!(matches!(x.pending(), Pending::CopyChunks(chunks) if chunks.len() == 3));
    x.sent();

    // Without fresh data the terminator is armed as CopyFail; end_copy
    // replaces it with CopyDone.
    assert!(matches!(x.pending(), Pending::CopyFail(_)));
    assert!(x.end_copy());
    assert!(matches!(x.pending(), Pending::CopyDone(rest) if rest.is_empty()));
    x.sent();
    assert_eq!(x.direction(), Direction::Receiving);
    assert!(!x.is_sending_copy());

    x.put(&group(
        1,
        vec![command_complete("COPY 3"), ready(b'T')],
    ));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert_eq!(x.last_ready(), Some(TransactionStatus::InTransaction));
}

#[test]
fn copy_in_without_data_fails_the_copy() {
    let mut x = started(vec![query("COPY t FROM STDIN")]);
    x.put(&group(0, vec![copy_begin(b'G', 1)]));

    // The caller provides nothing: the armed CopyFail goes out.
    assert!(matches!(x.pending(), Pending::CopyFail(_)));
    x.sent();
    assert_eq!(x.direction(), Direction::Receiving);

    // The server reports the failed COPY; the command recovers through
    // its own Ready.
    x.put(&group(
        1,
        vec![
            error_response("ERROR", "57014", "COPY from stdin failed"),
            ready(b'I'),
        ],
    ));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(!x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "57014");
}

#[test]
fn function_call_round() {
    let mut x = started(vec![Command::Function(FunctionCall {
        oid: 1598,
        arg_formats: vec![FormatCode::Binary],
        args: vec![Some(vec![0, 0, 0, 1])],
        result_format: FormatCode::Binary,
    })]);

    x.put(&group(0, vec![function_result(b"ok"), ready(b'I')]));

    assert_eq!(x.direction(), Direction::Complete);
    let replies = flat_replies(&x);
    assert!(matches!(
        &replies[0],
        Reply::FunctionResult(r) if r.value.as_deref() == Some(b"ok".as_slice())
    ));
    assert!(matches!(replies[1], Reply::Ready(_)));
}

#[test]
fn flush_elicits_no_reply() {
    let mut x = started(vec![parse("s1", "SELECT 1"), Command::Flush, Command::Sync]);

    x.put(&group(0, vec![msg(b'1', b""), ready(b'I')]));

    assert_eq!(x.direction(), Direction::Complete);
    assert_eq!(
        flat_replies(&x),
        vec![Reply::ParseComplete, Reply::Ready(TransactionStatus::Idle)]
    );
}

#[test]
fn describe_statement_and_portal() {
    let mut x = started(vec![
        Command::Describe(Describe {
            target: Target::Statement,
            name: "s1".to_string(),
        }),
        Command::Sync,
    ]);
    let mut payload = 1_i16.to_be_bytes().to_vec();
    payload.extend_from_slice(&23_u32.to_be_bytes());
    x.put(&group(
        0,
        vec![msg(b't', &payload), row_description("a", 23), ready(b'I')],
    ));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(matches!(
        &flat_replies(&x)[0],
        Reply::ParameterDescription(d) if d.type_oids == vec![23]
    ));

    // A portal describe may answer NoData directly.
    let mut x = started(vec![
        Command::Describe(Describe {
            target: Target::Portal,
            name: String::new(),
        }),
        Command::Sync,
    ]);
    x.put(&group(0, vec![msg(b'n', b""), ready(b'I')]));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(matches!(flat_replies(&x)[0], Reply::NoData));
}

#[test]
fn failure_keeps_replies_parsed_earlier_in_the_group() {
    // A fatal error in the tail of a group must not discard the replies
    // already validated ahead of it.
    let mut x = started(vec![query("SELECT 1")]);
    x.put(&group(
        0,
        vec![
            row_description("a", 23),
            data_row(&[Some(b"1")]),
            error_response("FATAL", "57P01", "terminating connection"),
        ],
    ));
    assert_eq!(x.direction(), Direction::Complete);
    assert!(x.is_fatal());
    let replies = flat_replies(&x);
    assert_eq!(replies.len(), 2);
    assert!(matches!(replies[0], Reply::RowDescription(_)));
    assert!(matches!(&replies[1], Reply::DataRow(row) if row.columns == vec![Some(b"1".to_vec())]));

    // Same for a protocol violation.
    let mut x = started(vec![query("SELECT 1")]);
    x.put(&group(0, vec![command_complete("SELECT 0"), msg(b'2', b"")]));
    assert!(x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "08P01");
    assert_eq!(
        flat_replies(&x),
        vec![Reply::Complete(pq3::protocol::backend::CommandComplete {
            tag: "SELECT 0".to_string()
        })]
    );
}

#[test]
fn row_stream_failure_keeps_parsed_prefix() {
    let mut x = started(vec![execute()]);
    x.put(&group(0, vec![data_row(&[Some(b"1")])]));

    // A homogeneous row group with a truncated row in second position:
    // the first row survives into the completed groups.
    let mut truncated = 1_u16.to_be_bytes().to_vec();
    truncated.extend_from_slice(&8_i32.to_be_bytes());
    truncated.push(b'x');
    let consumed = x.put(&group(
        1,
        vec![data_row(&[Some(b"2")]), msg(b'D', &truncated)],
    ));

    assert_eq!(consumed, 2);
    assert_eq!(x.direction(), Direction::Complete);
    assert!(x.is_fatal());
    assert_eq!(x.error().unwrap().code(), "08P01");
    assert!(x.exception().is_some());

    let replies = flat_replies(&x);
    assert_eq!(replies.len(), 2);
    assert!(matches!(&replies[0], Reply::DataRow(row) if row.columns == vec![Some(b"1".to_vec())]));
    assert!(matches!(&replies[1], Reply::DataRow(row) if row.columns == vec![Some(b"2".to_vec())]));
}

#[test]
fn replies_rev_is_last_in_first_out() {
    let mut x = started(vec![query("SELECT 1")]);
    x.put(&group(0, vec![row_description("a", 23), data_row(&[Some(b"1")])]));
    x.put(&group(
        1,
        vec![
            data_row(&[Some(b"2")]),
            command_complete("SELECT 2"),
            ready(b'I'),
        ],
    ));
    assert_eq!(x.direction(), Direction::Complete);

    let forward = flat_replies(&x);
    assert_eq!(forward.len(), 5);
    let mut reversed: Vec<Reply> = x.replies_rev().cloned().collect();
    reversed.reverse();
    assert_eq!(reversed, forward);
    assert!(matches!(
        x.replies_rev().next(),
        Some(Reply::Ready(TransactionStatus::Idle))
    ));
}

#[test]
fn leftover_messages_are_not_consumed() {
    // The instruction completes mid-group; trailing messages stay with
    // the driver for whatever is mounted next.
    let mut x = started(vec![query("SELECT 1")]);
    let consumed = x.put(&group(
        0,
        vec![
            command_complete("SELECT 0"),
            ready(b'I'),
            msg(b'1', b""), // belongs to a later transaction
        ],
    ));
    assert_eq!(consumed, 2);
    assert_eq!(x.direction(), Direction::Complete);
}
