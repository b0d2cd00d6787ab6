// Dispatcher Module
//
// INTENTION:
// Drive the numbered message stream and validate it on the receiving side.
//
// The sender walks slots 0..=M. Slot k goes to address k mod N and carries k,
// except the last slot M, which carries the sentinel -1. Every message is
// ("unistr" string, "unistr" symbol, int32 value).
//
// The primary handler is one instance bound to all N publisher addresses:
// the single sender defines one global order, so one counter checks it. A
// copy handler sits behind the tap on one address i and therefore sees every
// N-th slot starting at i; it checks each value and advances its counter by N.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tapcheck_common::logging::{Component, Logger};
use tapcheck_common::types::{Arg, Message};
use tapcheck_common::{log_debug, log_error, log_info};
use tapcheck_node::{HandlerOutcome, MessageHandler, Substrate};

use crate::address_space::AddressSpace;
use crate::error::{violation, Result};

/// Literal carried by the string argument
pub const STRING_LITERAL: &str = "unistr";

/// Literal carried by the symbol argument
pub const SYMBOL_LITERAL: &str = "unistr";

/// Value of the last message of the stream
pub const SENTINEL: i32 = -1;

/// Number of receipts logged individually before switching to progress lines
const PRIMARY_LOG_FIRST: i64 = 10;
const COPY_LOG_FIRST: i64 = 5;
const PROGRESS_EVERY: i64 = 100;

/// Arguments of one harness message
pub fn message_args(value: i32) -> Vec<Arg> {
    vec![
        Arg::String(STRING_LITERAL.to_string()),
        Arg::Symbol(SYMBOL_LITERAL.to_string()),
        Arg::Int32(value),
    ]
}

/// Validate the payload shape and return the integer it carries
pub fn check_args(msg: &Message) -> Result<i32> {
    if msg.args.len() != 3 {
        return Err(violation(format!(
            "{}: expected 3 arguments, got {}",
            msg.address,
            msg.args.len()
        )));
    }
    if msg.args[0].as_str() != Some(STRING_LITERAL) {
        return Err(violation(format!(
            "{}: first argument should be string \"{STRING_LITERAL}\", got {:?}",
            msg.address, msg.args[0]
        )));
    }
    if msg.args[1].as_symbol() != Some(SYMBOL_LITERAL) {
        return Err(violation(format!(
            "{}: second argument should be symbol \"{SYMBOL_LITERAL}\", got {:?}",
            msg.address, msg.args[1]
        )));
    }
    msg.args[2].as_i32().ok_or_else(|| {
        violation(format!(
            "{}: third argument should be int32, got {:?}",
            msg.address, msg.args[2]
        ))
    })
}

/// Final primary counter: every slot including the sentinel
pub fn expected_primary_count(max_msg_count: i32) -> i64 {
    max_msg_count as i64 + 1
}

/// Final copy counter: N per slot that went to address 0
pub fn expected_copy_count(fan_out: i64, max_msg_count: i32) -> i64 {
    expected_copy_count_at(fan_out, max_msg_count, 0)
}

/// Final counter of the copy handler behind address `index`: it starts at
/// `index` and gains N per slot routed there
pub fn expected_copy_count_at(fan_out: i64, max_msg_count: i32, index: i64) -> i64 {
    let max = max_msg_count as i64;
    let slots = if index > max {
        0
    } else {
        (max - index) / fan_out + 1
    };
    index + fan_out * slots
}

/// Sending side of the stream
pub struct MessageDispatcher {
    space: AddressSpace,
    max_msg_count: i32,
    next_slot: u64,
    logger: Logger,
}

impl MessageDispatcher {
    pub fn new(space: AddressSpace, max_msg_count: i32, logger: &Logger) -> Self {
        Self {
            space,
            max_msg_count,
            next_slot: 0,
            logger: logger.with_component(Component::Dispatcher),
        }
    }

    /// Total number of slots, sentinel included
    pub fn total(&self) -> u64 {
        self.max_msg_count.max(0) as u64 + 1
    }

    /// Messages sent so far
    pub fn sent(&self) -> u64 {
        self.next_slot
    }

    pub fn is_finished(&self) -> bool {
        self.next_slot >= self.total()
    }

    /// Send the next slot; returns the value sent, or None once the sentinel
    /// has gone out
    pub async fn send_next(&mut self, substrate: &dyn Substrate) -> Result<Option<i32>> {
        if self.is_finished() {
            return Ok(None);
        }
        let slot = self.next_slot;
        let value = if slot == self.max_msg_count as u64 {
            SENTINEL
        } else {
            slot as i32
        };
        let address = self.space.method_path(self.space.address_for(slot));
        substrate.send(&address, message_args(value)).await?;
        self.next_slot += 1;

        if value == SENTINEL {
            log_info!(self.logger, "Sent sentinel to {address} after {slot} messages");
        } else {
            log_debug!(self.logger, "Sent {value} to {address}");
        }
        Ok(Some(value))
    }
}

/// Receiver bound to every publisher address
pub struct PrimaryHandler {
    count: AtomicI64,
    sentinels: AtomicUsize,
    logger: Logger,
}

impl PrimaryHandler {
    pub fn new(logger: &Logger) -> Self {
        Self {
            count: AtomicI64::new(0),
            sentinels: AtomicUsize::new(0),
            logger: logger
                .with_component(Component::Dispatcher)
                .with_message_path("primary"),
        }
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn sentinels(&self) -> usize {
        self.sentinels.load(Ordering::SeqCst)
    }

    pub fn stream_ended(&self) -> bool {
        self.sentinels() > 0
    }

    fn receive(&self, msg: &Message) -> Result<HandlerOutcome> {
        let value = check_args(msg)?;
        if self.stream_ended() {
            return Err(violation(format!(
                "{}: received {value} after the sentinel",
                msg.address
            )));
        }

        let count = self.count.fetch_add(1, Ordering::SeqCst);
        if count < PRIMARY_LOG_FIRST {
            log_debug!(self.logger, "{} received {value}", msg.address);
        } else if (count + 1) % PROGRESS_EVERY == 0 {
            log_info!(self.logger, "Received {} messages", count + 1);
        }

        if value == SENTINEL {
            self.sentinels.fetch_add(1, Ordering::SeqCst);
            log_info!(self.logger, "Sentinel received at {} after {count} messages", msg.address);
            return Ok(HandlerOutcome::StreamEnd);
        }
        if value as i64 != count {
            return Err(violation(format!(
                "{}: expected {count}, received {value}",
                msg.address
            )));
        }
        Ok(HandlerOutcome::Continue)
    }
}

impl MessageHandler for PrimaryHandler {
    fn on_receive(&self, msg: &Message) -> anyhow::Result<HandlerOutcome> {
        self.receive(msg).map_err(|e| {
            log_error!(self.logger, "{e}");
            e.into()
        })
    }
}

/// Receiver of the tap copies of one publisher address
pub struct CopyHandler {
    stride: i64,
    start: i64,
    count: AtomicI64,
    logger: Logger,
}

impl CopyHandler {
    /// Copy handler behind address 0
    pub fn new(fan_out: i64, logger: &Logger) -> Self {
        Self::with_offset(fan_out, 0, logger)
    }

    /// Copy handler behind address `start`
    pub fn with_offset(fan_out: i64, start: i64, logger: &Logger) -> Self {
        Self {
            stride: fan_out,
            start,
            count: AtomicI64::new(start),
            logger: logger
                .with_component(Component::Dispatcher)
                .with_message_path("copy"),
        }
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::SeqCst)
    }

    fn receive(&self, msg: &Message) -> Result<HandlerOutcome> {
        let value = check_args(msg)?;
        let count = self.count.fetch_add(self.stride, Ordering::SeqCst);
        if count < self.start + COPY_LOG_FIRST * self.stride {
            log_debug!(self.logger, "{} received copy {value}", msg.address);
        }
        if value == SENTINEL {
            log_info!(self.logger, "Sentinel copy received at {}", msg.address);
            return Ok(HandlerOutcome::StreamEnd);
        }
        if value as i64 != count {
            return Err(violation(format!(
                "{}: expected copy {count}, received {value}",
                msg.address
            )));
        }
        Ok(HandlerOutcome::Continue)
    }
}

impl MessageHandler for CopyHandler {
    fn on_receive(&self, msg: &Message) -> anyhow::Result<HandlerOutcome> {
        self.receive(msg).map_err(|e| {
            log_error!(self.logger, "{e}");
            e.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    fn logger() -> Logger {
        Logger::new_root(Component::Harness, "test")
    }

    fn msg(value: i32) -> Message {
        Message::new("/pubunistr0/äta", message_args(value))
    }

    #[test]
    fn test_closed_forms() {
        assert_eq!(expected_primary_count(200), 201);
        assert_eq!(expected_copy_count(2, 200), 202);
        assert_eq!(expected_copy_count(3, 200), 201);
        assert_eq!(expected_copy_count(1, 0), 1);
        assert_eq!(expected_copy_count(5, 3), 5);
        assert_eq!(expected_copy_count_at(2, 200, 1), 201);
        assert_eq!(expected_copy_count_at(3, 30, 2), 32);
        // address never reached: the counter keeps its start value
        assert_eq!(expected_copy_count_at(5, 0, 3), 3);
    }

    #[test]
    fn test_check_args_rejects_bad_payloads() {
        assert_eq!(check_args(&msg(7)).unwrap(), 7);

        let short = Message::new("/a/b", vec![Arg::Int32(1)]);
        assert!(check_args(&short).is_err());

        let wrong_literal = Message::new(
            "/a/b",
            vec![
                Arg::String("other".into()),
                Arg::Symbol(SYMBOL_LITERAL.into()),
                Arg::Int32(1),
            ],
        );
        assert!(check_args(&wrong_literal).is_err());

        let symbol_as_string = Message::new(
            "/a/b",
            vec![
                Arg::String(STRING_LITERAL.into()),
                Arg::String(SYMBOL_LITERAL.into()),
                Arg::Int32(1),
            ],
        );
        assert!(check_args(&symbol_as_string).is_err());
    }

    #[test]
    fn test_primary_counts_sentinel() {
        let handler = PrimaryHandler::new(&logger());
        for value in 0..4 {
            assert_eq!(handler.on_receive(&msg(value)).unwrap(), HandlerOutcome::Continue);
        }
        assert_eq!(
            handler.on_receive(&msg(SENTINEL)).unwrap(),
            HandlerOutcome::StreamEnd
        );
        assert_eq!(handler.count(), expected_primary_count(4));
        assert_eq!(handler.sentinels(), 1);

        let err = handler.on_receive(&msg(SENTINEL)).unwrap_err();
        assert!(matches!(
            err.downcast::<HarnessError>().unwrap(),
            HarnessError::ProtocolViolation(_)
        ));
    }

    #[test]
    fn test_primary_detects_gap() {
        let handler = PrimaryHandler::new(&logger());
        handler.on_receive(&msg(0)).unwrap();
        assert!(handler.on_receive(&msg(2)).is_err());
    }

    #[test]
    fn test_copy_advances_by_stride() {
        let handler = CopyHandler::new(3, &logger());
        // M = 7: address 0 sees slots 0, 3, 6; the sentinel goes to address 1
        for value in [0, 3, 6] {
            handler.on_receive(&msg(value)).unwrap();
        }
        assert_eq!(handler.count(), expected_copy_count(3, 7));
        assert!(handler.on_receive(&msg(10)).is_err());
    }

    #[test]
    fn test_copy_accepts_sentinel_without_check() {
        let handler = CopyHandler::new(2, &logger());
        // M = 4: address 0 sees 0, 2 and the sentinel in slot 4
        handler.on_receive(&msg(0)).unwrap();
        handler.on_receive(&msg(2)).unwrap();
        assert_eq!(
            handler.on_receive(&msg(SENTINEL)).unwrap(),
            HandlerOutcome::StreamEnd
        );
        assert_eq!(handler.count(), expected_copy_count(2, 4));
    }

    #[test]
    fn test_copy_with_offset() {
        let handler = CopyHandler::with_offset(3, 1, &logger());
        // M = 7: address 1 sees slots 1, 4 and the sentinel in slot 7
        assert!(handler.on_receive(&msg(0)).is_err());

        let handler = CopyHandler::with_offset(3, 1, &logger());
        handler.on_receive(&msg(1)).unwrap();
        handler.on_receive(&msg(4)).unwrap();
        assert_eq!(
            handler.on_receive(&msg(SENTINEL)).unwrap(),
            HandlerOutcome::StreamEnd
        );
        assert_eq!(handler.count(), expected_copy_count_at(3, 7, 1));
    }
}
