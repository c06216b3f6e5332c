//! Scripted replay of transport and client calls
//!
//! Drives a controller from a line-oriented script so the state machine can
//! be exercised without hardware:
//!
//! ```text
//! # transport side
//! attach 7 0x1b1c:0x0b29            # optional: 8/6/80  iface 3/1/1
//! detach 7
//! bus-add 1
//! bus-remove 1
//! # client side
//! open 7
//! read #1 64
//! write #1 64
//! close #1
//! status 7
//! ```
//!
//! Transport lines go through the same applier the dispatch thread uses;
//! client lines call the controller directly. Lifecycle events raised by a
//! step are appended to the transcript after it.

use crate::config::DriverConfig;
use crate::usb::notifier::{BusNotifier, LoggingObserver};
use crate::usb::worker::EventApplier;
use crate::usb::LifecycleController;
use anyhow::{Context, Result, anyhow, bail, ensure};
use api::{DeviceId, DeviceInfo, InterfaceClass, SessionHandle};
use common::{EventSubscriber, TransportEvent, create_event_channel};
use std::ops::ControlFlow;
use std::sync::Arc;

/// Largest `read`/`write` length a script may request
pub const MAX_TRANSFER: usize = 1 << 20;

/// One parsed script line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayStep {
    Attach { id: DeviceId, info: DeviceInfo },
    Detach { id: DeviceId },
    BusAdd { bus: u8 },
    BusRemove { bus: u8 },
    Open { id: DeviceId },
    Close { handle: SessionHandle },
    Read { handle: SessionHandle, len: usize },
    Write { handle: SessionHandle, len: usize },
    Status { id: DeviceId },
}

/// Parse a replay script; blank lines and `#` comments are skipped
pub fn parse_script(text: &str) -> Result<Vec<ReplayStep>> {
    text.lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = strip_comment(line).trim();
            (!line.is_empty()).then(|| {
                parse_line(line).with_context(|| format!("line {}: '{}'", index + 1, line))
            })
        })
        .collect()
}

fn strip_comment(line: &str) -> &str {
    // '#' also prefixes session handles, so only a '#' that starts a word
    // followed by whitespace or end of line opens a comment.
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        let starts_word = i == 0 || bytes[i - 1].is_ascii_whitespace();
        let ends_word = bytes.get(i + 1).is_none_or(|next| !next.is_ascii_digit());
        if *b == b'#' && starts_word && ends_word {
            return &line[..i];
        }
    }
    line
}

fn parse_line(line: &str) -> Result<ReplayStep> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let args = &words[1..];

    let step = match (words[0], args) {
        ("attach", [id, ids, rest @ ..]) => ReplayStep::Attach {
            id: parse_device_id(id)?,
            info: parse_device_info(ids, rest)?,
        },
        ("detach", [id]) => ReplayStep::Detach {
            id: parse_device_id(id)?,
        },
        ("bus-add", [bus]) => ReplayStep::BusAdd {
            bus: parse_number(bus)?,
        },
        ("bus-remove", [bus]) => ReplayStep::BusRemove {
            bus: parse_number(bus)?,
        },
        ("open", [id]) => ReplayStep::Open {
            id: parse_device_id(id)?,
        },
        ("close", [handle]) => ReplayStep::Close {
            handle: parse_handle(handle)?,
        },
        ("read", [handle, len]) => ReplayStep::Read {
            handle: parse_handle(handle)?,
            len: parse_transfer_len(len)?,
        },
        ("write", [handle, len]) => ReplayStep::Write {
            handle: parse_handle(handle)?,
            len: parse_transfer_len(len)?,
        },
        ("status", [id]) => ReplayStep::Status {
            id: parse_device_id(id)?,
        },
        (command, _) => bail!("unknown command or wrong arguments for '{}'", command),
    };
    Ok(step)
}

fn parse_number<T: TryFrom<u64>>(text: &str) -> Result<T> {
    let value = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    }
    .map_err(|e| anyhow!("invalid number '{}': {}", text, e))?;

    T::try_from(value).map_err(|_| anyhow!("number '{}' out of range", text))
}

fn parse_transfer_len(text: &str) -> Result<usize> {
    let len: u64 = parse_number(text)?;
    ensure!(
        len <= MAX_TRANSFER as u64,
        "transfer length {} exceeds {} bytes",
        text,
        MAX_TRANSFER
    );
    Ok(len as usize)
}

fn parse_device_id(text: &str) -> Result<DeviceId> {
    parse_number(text).map(DeviceId)
}

fn parse_handle(text: &str) -> Result<SessionHandle> {
    parse_number(text.trim_start_matches('#')).map(SessionHandle)
}

fn parse_triple(text: &str) -> Result<(u8, u8, u8)> {
    match text.split('/').collect::<Vec<_>>().as_slice() {
        [class, subclass, protocol] => Ok((
            parse_number(class)?,
            parse_number(subclass)?,
            parse_number(protocol)?,
        )),
        _ => bail!("expected class/subclass/protocol, got '{}'", text),
    }
}

fn parse_device_info(ids: &str, rest: &[&str]) -> Result<DeviceInfo> {
    let (vid, pid) = ids
        .split_once(':')
        .ok_or_else(|| anyhow!("expected VID:PID, got '{}'", ids))?;
    let mut info = DeviceInfo {
        vendor_id: parse_number(vid)?,
        product_id: parse_number(pid)?,
        ..DeviceInfo::default()
    };

    let mut rest = rest.iter();
    while let Some(word) = rest.next() {
        if *word == "iface" {
            let triple = rest
                .next()
                .ok_or_else(|| anyhow!("'iface' needs class/subclass/protocol"))?;
            let (class, subclass, protocol) = parse_triple(triple)?;
            info.interface = Some(InterfaceClass {
                class,
                subclass,
                protocol,
            });
        } else {
            (info.class, info.subclass, info.protocol) = parse_triple(word)?;
        }
    }
    Ok(info)
}

/// Replay driver over a transport with no data path
pub struct Replay {
    applier: EventApplier<()>,
    events: EventSubscriber,
}

impl Replay {
    pub fn new(config: &DriverConfig) -> Self {
        let (publisher, events) = create_event_channel(config.events.capacity);
        let controller = Arc::new(LifecycleController::from_config(config).with_events(publisher));
        let notifier = Arc::new(BusNotifier::new());
        notifier.register(Arc::new(LoggingObserver));

        Self {
            applier: EventApplier::new(controller, notifier),
            events,
        }
    }

    pub fn controller(&self) -> &LifecycleController<()> {
        self.applier.controller()
    }

    /// Run every step, returning the transcript
    pub fn run(&mut self, steps: &[ReplayStep]) -> Vec<String> {
        let mut transcript = Vec::new();
        for step in steps {
            transcript.push(self.step(step));
            transcript.extend(
                self.events
                    .drain()
                    .into_iter()
                    .map(|event| format!("  event: {:?}", event)),
            );
        }
        transcript
    }

    // Scripts cannot express `Shutdown`, so every event continues.
    fn transport_event(&mut self, event: TransportEvent<()>) {
        let flow = self.applier.apply(event);
        debug_assert_eq!(flow, ControlFlow::Continue(()));
    }

    fn step(&mut self, step: &ReplayStep) -> String {
        let controller = Arc::clone(self.applier.controller());
        match step {
            ReplayStep::Attach { id, info } => {
                match self.applier.attach(*id, info.clone(), ()) {
                    Ok(()) => match controller.status(*id) {
                        Some(status) => format!("attach {} -> /dev/{}", id, status.node_name),
                        None => format!("attach {} -> detached", id),
                    },
                    Err(e) => format!("attach {} -> refused: {}", id, e),
                }
            }
            ReplayStep::Detach { id } => {
                self.transport_event(TransportEvent::Detached { id: *id });
                format!("detach {}", id)
            }
            ReplayStep::BusAdd { bus } => {
                self.transport_event(TransportEvent::BusAdded { bus: *bus });
                format!("bus-add {}", bus)
            }
            ReplayStep::BusRemove { bus } => {
                self.transport_event(TransportEvent::BusRemoved { bus: *bus });
                format!("bus-remove {}", bus)
            }
            ReplayStep::Open { id } => match controller.open(*id) {
                Ok(handle) => format!("open {} -> {}", id, handle),
                Err(e) => format!("open {} -> error: {}", id, e),
            },
            ReplayStep::Close { handle } => match controller.close(*handle) {
                Ok(()) => format!("close {} -> ok", handle),
                Err(e) => format!("close {} -> error: {}", handle, e),
            },
            ReplayStep::Read { handle, len } => {
                let mut buf = vec![0u8; *len];
                match controller.read(*handle, &mut buf) {
                    Ok(n) => format!("read {} -> {} bytes", handle, n),
                    Err(e) => format!("read {} -> error: {}", handle, e),
                }
            }
            ReplayStep::Write { handle, len } => match controller.write(*handle, &vec![0u8; *len]) {
                Ok(n) => format!("write {} -> {} bytes", handle, n),
                Err(e) => format!("write {} -> error: {}", handle, e),
            },
            ReplayStep::Status { id } => match controller.status(*id) {
                Some(status) => format!(
                    "status {} -> {:?} present={} open={} refs={}",
                    id, status.state, status.present, status.open, status.refcount
                ),
                None => format!("status {} -> not registered", id),
            },
        }
    }
}
