//! Connection startup negotiation.
//!
//! Drives Startup → optional authentication challenge → BackendKeyData →
//! first ReadyForQuery. The reference for the exchange is the "Start-up"
//! section of the protocol flow documentation; the state set is small and
//! fixed, so this is a plain enum machine rather than anything generic.

use crate::error::{Error, ErrorFields, Failure, Result, sqlstate};
use crate::protocol::backend::{
    Authentication, BackendKeyData, ErrorResponse, auth::auth_request, auth::parse_ready,
    is_async_type, msg_type,
};
use crate::protocol::buffer::RawMessage;
use crate::protocol::frontend::{Startup, crypt_password, md5_password, write_password};
use crate::protocol::types::TransactionStatus;

use super::{AsyncMessage, Direction, Pending, WireGroup, parse_async};

/// Progress of the startup exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Expecting the first Authentication message.
    Auth,
    /// Password sent; expecting Authentication::Ok.
    AuthOk,
    /// Authenticated; expecting BackendKeyData.
    KillInfo,
    /// Expecting the first ReadyForQuery.
    Ready,
    /// Negotiation finished.
    Done,
}

/// Startup negotiation transaction.
#[derive(Debug)]
pub struct Negotiation {
    startup: Startup,
    password: Vec<u8>,
    state: Direction,
    step: Step,
    outbound: Vec<u8>,
    send_gen: u64,
    authtype: Option<Authentication>,
    killinfo: Option<BackendKeyData>,
    last_ready: Option<TransactionStatus>,
    asyncs: Vec<AsyncMessage>,
    fatal: bool,
    error: Option<Failure>,
    exception: Option<Error>,
    last_group: Option<u64>,
}

impl Negotiation {
    /// Create a negotiation for the given startup parameters and password.
    ///
    /// The password is raw bytes supplied by the caller; the core does no
    /// prompting and no encoding of its own.
    pub fn new(startup: Startup, password: Vec<u8>) -> Self {
        let mut outbound = Vec::with_capacity(128);
        startup.encode(&mut outbound);
        Self {
            startup,
            password,
            state: Direction::Sending,
            step: Step::Auth,
            outbound,
            send_gen: 0,
            authtype: None,
            killinfo: None,
            last_ready: None,
            asyncs: Vec::new(),
            fatal: false,
            error: None,
            exception: None,
            last_group: None,
        }
    }

    /// Direction of the next wire transition.
    pub fn direction(&self) -> Direction {
        self.state
    }

    /// Whether the negotiation failed.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// The recorded failure, if any.
    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    /// The underlying cause of the failure, when one was captured.
    pub fn exception(&self) -> Option<&Error> {
        self.exception.as_ref()
    }

    /// The authentication challenge the server issued, once seen.
    pub fn authentication(&self) -> Option<&Authentication> {
        self.authtype.as_ref()
    }

    /// Backend pid/secret for out-of-band cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.killinfo.as_ref()
    }

    /// Transaction status from the first ReadyForQuery.
    pub fn last_ready(&self) -> Option<TransactionStatus> {
        self.last_ready
    }

    /// Asynchronous messages observed during startup, in wire order.
    pub fn asyncs(&self) -> &[AsyncMessage] {
        &self.asyncs
    }

    /// Drain the asynchronous messages observed during startup.
    pub fn take_asyncs(&mut self) -> Vec<AsyncMessage> {
        std::mem::take(&mut self.asyncs)
    }

    /// Monotonic counter bumped whenever the pending payload changes.
    pub fn send_generation(&self) -> u64 {
        self.send_gen
    }

    /// What the driver should write next.
    pub fn pending(&self) -> Pending<'_> {
        if self.state == Direction::Sending {
            Pending::Bytes(&self.outbound)
        } else {
            Pending::Nothing
        }
    }

    /// Finalize the Sending state once the pending payload is on the wire.
    pub fn sent(&mut self) {
        if self.state == Direction::Sending {
            self.outbound.clear();
            self.state = Direction::Receiving;
        }
    }

    /// Force-complete with a failure observed by the driver.
    pub(crate) fn fail(&mut self, failure: Failure, exception: Option<Error>) {
        self.error = Some(failure);
        self.exception = exception;
        self.fatal = true;
        self.state = Direction::Complete;
    }

    fn fail_protocol(&mut self, message: String) {
        self.fail(
            Failure::client(ErrorFields::client(sqlstate::PROTOCOL_VIOLATION, message)),
            None,
        );
    }

    fn queue_password(&mut self, reply: Vec<u8>) {
        self.outbound.clear();
        write_password(&mut self.outbound, &reply);
        self.send_gen += 1;
        self.state = Direction::Sending;
        self.step = Step::AuthOk;
    }

    fn unsupported_auth_request(&mut self, request: i32) {
        self.fail(
            Failure::client(
                ErrorFields::client(
                    sqlstate::UNSUPPORTED_AUTH,
                    format!(
                        "unsupported authentication request {}({})",
                        auth_request::name(request),
                        request
                    ),
                )
                .with_hint("Only MD5, crypt, cleartext, and trust are supported."),
            ),
            None,
        );
    }

    /// Handle the first Authentication message: either proceed, pause to
    /// flush a password reply, or refuse the request.
    fn on_auth(&mut self, auth: Authentication) {
        match auth {
            Authentication::Ok => self.step = Step::KillInfo,
            Authentication::CleartextPassword => self.queue_password(self.password.clone()),
            Authentication::CryptPassword { salt } => match crypt_password(&self.password, &salt) {
                Ok(reply) => self.queue_password(reply),
                Err(message) => self.fail(
                    Failure::client(ErrorFields::client(sqlstate::UNSUPPORTED_AUTH, message)),
                    None,
                ),
            },
            Authentication::Md5Password { salt } => {
                let reply = md5_password(self.startup.user(), &self.password, &salt);
                self.queue_password(reply);
            }
            Authentication::Unsupported { request } => self.unsupported_auth_request(request),
        }
    }

    fn step_message(&mut self, msg: &RawMessage) -> Result<()> {
        match self.step {
            Step::Auth => {
                if msg.tag != msg_type::AUTHENTICATION {
                    self.fail_protocol(format!(
                        "received message of type '{}', but expected '{}'",
                        msg.tag as char,
                        msg_type::AUTHENTICATION as char
                    ));
                    return Ok(());
                }
                let auth = Authentication::parse(&msg.payload)?;
                self.authtype = Some(auth.clone());
                self.on_auth(auth);
            }
            Step::AuthOk => {
                if msg.tag != msg_type::AUTHENTICATION {
                    self.fail_protocol(format!(
                        "received message of type '{}', but expected '{}'",
                        msg.tag as char,
                        msg_type::AUTHENTICATION as char
                    ));
                    return Ok(());
                }
                let auth = Authentication::parse(&msg.payload)?;
                if auth == Authentication::Ok {
                    self.step = Step::KillInfo;
                } else {
                    self.fail_protocol(format!(
                        "expected an OK from the authentication message, but received {}({}) instead",
                        auth_request::name(auth.request()),
                        auth.request()
                    ));
                }
            }
            Step::KillInfo => {
                if msg.tag != msg_type::BACKEND_KEY_DATA {
                    self.fail_protocol(format!(
                        "received message of type '{}', but expected '{}'",
                        msg.tag as char,
                        msg_type::BACKEND_KEY_DATA as char
                    ));
                    return Ok(());
                }
                self.killinfo = Some(BackendKeyData::parse(&msg.payload)?);
                self.step = Step::Ready;
            }
            Step::Ready => {
                if msg.tag != msg_type::READY_FOR_QUERY {
                    self.fail_protocol(format!(
                        "received message of type '{}', but expected '{}'",
                        msg.tag as char,
                        msg_type::READY_FOR_QUERY as char
                    ));
                    return Ok(());
                }
                self.last_ready = Some(parse_ready(&msg.payload)?);
                self.step = Step::Done;
                self.state = Direction::Complete;
            }
            Step::Done => {}
        }
        Ok(())
    }

    /// Deliver a group of backend messages; returns how many were consumed.
    pub fn put(&mut self, group: &WireGroup) -> usize {
        if self.state == Direction::Complete {
            return 0;
        }
        if self.last_group == Some(group.id) {
            self.fail_protocol("negotiation was interrupted".to_string());
            return 0;
        }
        self.last_group = Some(group.id);

        let mut count = 0;
        for msg in &group.messages {
            count += 1;

            if msg.tag == msg_type::ERROR_RESPONSE {
                match ErrorResponse::parse(&msg.payload) {
                    Ok(err) => {
                        self.error = Some(Failure::server(err.fields));
                        self.fatal = true;
                        self.state = Direction::Complete;
                    }
                    Err(e) => {
                        let failure = Failure::client(ErrorFields::client(
                            sqlstate::PROTOCOL_VIOLATION,
                            format!("malformed ErrorResponse: {e}"),
                        ));
                        self.fail(failure, Some(e));
                    }
                }
                return count;
            }

            if is_async_type(msg.tag) {
                match parse_async(msg) {
                    Ok(parsed) => self.asyncs.push(parsed),
                    Err(e) => {
                        let failure = Failure::client(ErrorFields::client(
                            sqlstate::PROTOCOL_VIOLATION,
                            format!("wire-data caused exception in protocol transaction: {e}"),
                        ));
                        self.fail(failure, Some(e));
                        return count;
                    }
                }
                continue;
            }

            if let Err(e) = self.step_message(msg) {
                let failure = Failure::client(ErrorFields::client(
                    sqlstate::PROTOCOL_VIOLATION,
                    format!("wire-data caused exception in protocol transaction: {e}"),
                ));
                self.fail(failure, Some(e));
                return count;
            }

            // Pause to flush a password reply, or stop once complete.
            if self.state != Direction::Receiving {
                return count;
            }
        }
        count
    }
}
