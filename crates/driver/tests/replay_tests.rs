//! Replay script tests
//!
//! Drives whole attach/open/detach/close sequences through the replay
//! front end and checks the transcript.

use driver::DriverConfig;
use driver::replay::{Replay, parse_script};

fn run(script: &str) -> (Replay, Vec<String>) {
    let steps = parse_script(script).unwrap();
    let mut replay = Replay::new(&DriverConfig::default());
    let transcript = replay.run(&steps);
    (replay, transcript)
}

#[test]
fn test_detach_while_open() {
    let (replay, transcript) = run("attach 7 0x1b1c:0x0b29\n\
         open 7\n\
         detach 7\n\
         status 7\n\
         read #1 8\n\
         close #1\n\
         close #1\n");

    assert_eq!(transcript[0], "attach 7 -> /dev/usb_lifecycle_class7");
    assert!(transcript.iter().any(|line| line == "open 7 -> #1"));
    assert!(transcript.iter().any(|line| line == "status 7 -> not registered"));
    assert!(
        transcript
            .iter()
            .any(|line| line == "read #1 -> error: No such device")
    );
    assert!(transcript.iter().any(|line| line == "close #1 -> ok"));
    assert!(
        transcript
            .iter()
            .any(|line| line == "close #1 -> error: Invalid session handle")
    );

    let destroyed: Vec<_> = transcript
        .iter()
        .filter(|line| line.contains("Destroyed"))
        .collect();
    assert_eq!(destroyed.len(), 1);

    // Destroyed only after the close, never at detach
    let detach_at = transcript.iter().position(|l| l == "detach 7").unwrap();
    let close_at = transcript.iter().position(|l| l == "close #1 -> ok").unwrap();
    let destroyed_at = transcript.iter().position(|l| l.contains("Destroyed")).unwrap();
    assert!(detach_at < close_at && close_at < destroyed_at);

    assert_eq!(replay.controller().destroyed_count(), 1);
}

#[test]
fn test_unsupported_device_refused() {
    let (replay, transcript) = run("attach 3 0x1234:0x5678\nopen 3\n");
    assert_eq!(
        transcript[0],
        "attach 3 -> refused: Device 3 is not handled by this driver"
    );
    assert!(transcript.iter().any(|line| line == "open 3 -> error: No such device"));
    assert!(replay.controller().list_devices().is_empty());
}

#[test]
fn test_busy_and_bus_lines() {
    let (_, transcript) = run("bus-add 1\n\
         attach 1 0:0 8/6/0x50\n\
         open 1\n\
         open 1\n\
         write #1 16\n\
         bus-remove 1\n");

    assert_eq!(transcript[0], "bus-add 1");
    assert!(transcript.iter().any(|line| line == "open 1 -> error: Device or resource busy"));
    // Replay transports have no data path
    assert!(
        transcript
            .iter()
            .any(|line| line == "write #1 -> error: Operation not supported")
    );
    assert_eq!(transcript.last().unwrap(), "bus-remove 1");
}

#[test]
fn test_duplicate_attach_reports_refusal() {
    let (replay, transcript) = run("attach 7 0x1b1c:0x0b29\n\
         attach 7 0x1b1c:0x0b29\n\
         status 7\n");

    assert_eq!(transcript[0], "attach 7 -> /dev/usb_lifecycle_class7");
    let second = transcript
        .iter()
        .position(|line| line == "attach 7 -> refused: Device 7 is already registered")
        .expect("second attach should be refused");

    // Only the refusal follows; the live device is not reported destroyed
    let status = transcript
        .iter()
        .position(|line| line.starts_with("status 7"))
        .unwrap();
    assert_eq!(status, second + 2);
    assert!(transcript[second + 1].contains("AttachRefused"));
    assert!(!transcript.iter().any(|line| line.contains("Destroyed")));
    assert!(transcript[status].contains("refs=1"));

    assert_eq!(replay.controller().list_devices().len(), 1);
}

#[test]
fn test_oversized_transfer_is_a_parse_error() {
    let err = parse_script("attach 7 0x1b1c:0x0b29\n\
         open 7\n\
         read #1 0xffffffffffffffff\n")
    .unwrap_err();
    assert!(format!("{:#}", err).contains("line 3"));

    let err = parse_script("write #1 99999999999\n").unwrap_err();
    assert!(format!("{:#}", err).contains("exceeds"));
}
