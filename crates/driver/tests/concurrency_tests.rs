//! Concurrency tests for the device lifecycle
//!
//! Races client sessions against a transport detach and checks that the
//! device is destroyed exactly once, after the last owner lets go.
//!
//! Run with: `cargo test -p driver --test concurrency_tests`

use api::{CloseError, DeviceId, OpenError, TransferError};
use common::test_utils::{DropCounter, MockTransport, create_mock_device_info};
use driver::LifecycleController;
use driver::usb::IdTable;
use driver::usb::controller::{DEFAULT_CLASS_NAME, DEFAULT_MAX_DEVICES};
use proptest::prelude::*;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn controller() -> LifecycleController<MockTransport> {
    LifecycleController::new(IdTable::any(), DEFAULT_MAX_DEVICES, DEFAULT_CLASS_NAME)
}

// ============================================================================
// Detach racing open/close
// ============================================================================

#[test]
fn test_detach_races_sessions() {
    const THREADS: usize = 8;
    const ITERATIONS: usize = 500;

    for _ in 0..20 {
        let counter = DropCounter::new();
        let controller = Arc::new(controller());
        controller
            .on_attach(
                DeviceId(1),
                create_mock_device_info(0x1234, 0x5678),
                MockTransport::new(&counter),
            )
            .unwrap();

        let barrier = Arc::new(Barrier::new(THREADS + 1));
        let opened = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let controller = Arc::clone(&controller);
                let barrier = Arc::clone(&barrier);
                let opened = Arc::clone(&opened);
                thread::spawn(move || {
                    barrier.wait();
                    let mut buf = [0u8; 16];
                    for _ in 0..ITERATIONS {
                        match controller.open(DeviceId(1)) {
                            Ok(handle) => {
                                opened.fetch_add(1, Ordering::Relaxed);
                                match controller.read(handle, &mut buf) {
                                    Ok(n) => assert_eq!(n, buf.len()),
                                    Err(e) => assert_eq!(e, TransferError::NoSuchDevice),
                                }
                                controller.close(handle).unwrap();
                            }
                            Err(OpenError::Busy) | Err(OpenError::NoSuchDevice) => {}
                        }
                    }
                })
            })
            .collect();

        barrier.wait();
        let delay = rand::rng().random_range(0..200);
        thread::sleep(Duration::from_micros(delay));
        controller.on_detach(DeviceId(1));

        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(counter.count(), 1);
        assert_eq!(controller.destroyed_count(), 1);
        assert_eq!(controller.session_count(), 0);
        assert!(controller.status(DeviceId(1)).is_none());
        assert_eq!(controller.open(DeviceId(1)), Err(OpenError::NoSuchDevice));
    }
}

#[test]
fn test_detach_while_session_held_by_other_thread() {
    let counter = DropCounter::new();
    let controller = Arc::new(controller());
    controller
        .on_attach(
            DeviceId(7),
            create_mock_device_info(0x1234, 0x5678),
            MockTransport::new(&counter),
        )
        .unwrap();
    let handle = controller.open(DeviceId(7)).unwrap();

    let detacher = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.on_detach(DeviceId(7)))
    };
    detacher.join().unwrap();

    // Detach returned without waiting for the session
    assert_eq!(counter.count(), 0);

    let closer = {
        let controller = Arc::clone(&controller);
        thread::spawn(move || controller.close(handle))
    };
    assert_eq!(closer.join().unwrap(), Ok(()));
    assert_eq!(counter.count(), 1);
    assert_eq!(controller.close(handle), Err(CloseError::InvalidHandle));
}

#[test]
fn test_many_devices_attach_detach_concurrently() {
    const DEVICES: u32 = 16;

    let counter = DropCounter::new();
    let controller = Arc::new(controller());

    let attachers: Vec<_> = (0..DEVICES)
        .map(|id| {
            let controller = Arc::clone(&controller);
            let transport = MockTransport::new(&counter);
            thread::spawn(move || {
                controller
                    .on_attach(
                        DeviceId(id),
                        create_mock_device_info(0x1234, 0x5678),
                        transport,
                    )
                    .unwrap();
                let handle = controller.open(DeviceId(id)).unwrap();
                controller.on_detach(DeviceId(id));
                controller.close(handle).unwrap();
            })
        })
        .collect();

    for attacher in attachers {
        attacher.join().unwrap();
    }

    assert_eq!(counter.count(), DEVICES as usize);
    assert_eq!(controller.destroyed_count(), DEVICES as usize);
    assert!(controller.list_devices().is_empty());
}

// ============================================================================
// Random operation sequences
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Attach(u32),
    Detach(u32),
    Open(u32),
    Close(usize),
    Read(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u32..3).prop_map(Op::Attach),
        (0u32..3).prop_map(Op::Detach),
        (0u32..3).prop_map(Op::Open),
        (0usize..8).prop_map(Op::Close),
        (0usize..8).prop_map(Op::Read),
    ]
}

proptest! {
    #[test]
    fn test_random_sequences_destroy_each_object_once(
        ops in prop::collection::vec(op_strategy(), 1..64)
    ) {
        let counter = DropCounter::new();
        let controller = controller();
        let mut created = 0usize;
        let mut handles = Vec::new();

        for op in ops {
            match op {
                Op::Attach(id) => {
                    created += 1;
                    let _ = controller.on_attach(
                        DeviceId(id),
                        create_mock_device_info(0x1234, 0x5678),
                        MockTransport::new(&counter),
                    );
                }
                Op::Detach(id) => controller.on_detach(DeviceId(id)),
                Op::Open(id) => {
                    if let Ok(handle) = controller.open(DeviceId(id)) {
                        handles.push(handle);
                    }
                }
                Op::Close(index) => {
                    if !handles.is_empty() {
                        let handle = handles.remove(index % handles.len());
                        prop_assert_eq!(controller.close(handle), Ok(()));
                        prop_assert_eq!(controller.close(handle), Err(CloseError::InvalidHandle));
                    }
                }
                Op::Read(index) => {
                    if !handles.is_empty() {
                        let handle = handles[index % handles.len()];
                        let mut buf = [0u8; 4];
                        let result = controller.read(handle, &mut buf);
                        prop_assert!(result == Ok(4) || result == Err(TransferError::NoSuchDevice));
                    }
                }
            }

            // Every live owner still sees a positive count
            for status in controller.list_devices() {
                prop_assert!(status.refcount >= 1);
            }
            for handle in &handles {
                let status = controller.session_status(*handle).unwrap();
                prop_assert!(status.refcount >= 1);
            }
            prop_assert_eq!(counter.count(), controller.destroyed_count());
        }

        // Tear everything down: each constructed object is destroyed exactly once
        controller.detach_all();
        for handle in handles {
            prop_assert_eq!(controller.close(handle), Ok(()));
        }
        prop_assert_eq!(counter.count(), created);
        prop_assert_eq!(controller.destroyed_count(), created);
        prop_assert_eq!(controller.session_count(), 0);
    }
}
