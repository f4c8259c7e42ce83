//! End-to-end engine scenarios against the simulated transport
//!
//! Every test runs on a paused clock: sleeps and timeouts auto-advance,
//! so the full bench procedure (with its 30-second connect timeouts and
//! settle delays) executes in milliseconds of wall time.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::sleep;

use manocal::{
    CalibrationRig, ChannelSink, Config, DeviceId, DeviceSeed, DeviceStatus, Error, Event,
    LinkHealth,
};
use manocal_core::Command;
use manocal_transport::{DeviceLink, SimLink, SimProfile, SimReference};

struct Bench {
    rig: CalibrationRig,
    link: Arc<SimLink>,
    reference: Arc<SimReference>,
    events: UnboundedReceiver<Event>,
}

fn bench(profiles: Vec<(&str, SimProfile)>) -> Bench {
    let link = Arc::new(SimLink::new());
    for (id, profile) in &profiles {
        link.add_device(*id, profile.clone());
    }

    let reference = Arc::new(SimReference::new());
    let (sink, events) = ChannelSink::channel();

    let rig = CalibrationRig::new(
        link.clone(),
        reference.clone(),
        sink,
        Config::default().with_fast_timings(),
    );
    rig.register_batch(profiles.iter().map(|(id, _)| DeviceSeed::new(*id)).collect());

    Bench {
        rig,
        link,
        reference,
        events,
    }
}

fn drain(events: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}

fn id(s: &str) -> DeviceId {
    DeviceId::from(s)
}

// ---------------------------------------------------------------- setup

#[tokio::test(start_paused = true)]
async fn setup_processes_queue_in_fifo_order() {
    let mut b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
        ("C", SimProfile::default()),
    ]);

    b.rig.setup().run().await.unwrap();

    for device in ["A", "B", "C"] {
        assert_eq!(b.rig.registry().status(&id(device)), Some(DeviceStatus::Ready));
        assert!(b.link.is_subscribed(&id(device)));
    }

    let completed: Vec<String> = drain(&mut b.events)
        .into_iter()
        .filter_map(|e| match e {
            Event::SetupCompleted { device } => Some(device.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec!["A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn setup_reuses_already_open_link() {
    let link = Arc::new(SimLink::new());
    link.add_device("A", SimProfile::default());

    // Open the link out-of-band, as the discovery layer does
    let handle = link
        .connect(&id("A"), Duration::from_secs(1))
        .await
        .unwrap();

    let (sink, _events) = ChannelSink::channel();
    let rig = CalibrationRig::new(
        link.clone(),
        Arc::new(SimReference::new()),
        sink,
        Config::default().with_fast_timings(),
    );
    rig.register_batch(vec![DeviceSeed::connected("A", handle)]);

    rig.setup().run().await.unwrap();

    assert_eq!(rig.registry().status(&id("A")), Some(DeviceStatus::Ready));
    // The open link was reused; setup never dialed again
    assert_eq!(link.connect_attempts(&id("A")), 1);
}

#[tokio::test(start_paused = true)]
async fn setup_failure_is_isolated_to_the_device() {
    let mut b = bench(vec![
        (
            "A",
            SimProfile {
                fail_discovery: true,
                ..SimProfile::default()
            },
        ),
        ("B", SimProfile::default()),
    ]);

    b.rig.setup().run().await.unwrap();

    let a = b.rig.registry().snapshot(&id("A")).unwrap();
    assert_eq!(a.status, DeviceStatus::Failed);
    assert_eq!(a.retry_count, 3);
    assert!(a.last_error.is_some());
    // Connected but endpoints unresolvable: not the same as a dead link
    assert_eq!(a.link_health, LinkHealth::Undiscoverable);

    // The failed device stays in the batch but B is unaffected
    assert_eq!(b.rig.registry().len(), 2);
    assert_eq!(b.rig.registry().status(&id("B")), Some(DeviceStatus::Ready));

    let retries = drain(&mut b.events)
        .iter()
        .filter(|e| matches!(e, Event::SetupRetry { device, .. } if device == &id("A")))
        .count();
    assert_eq!(retries, 3);
}

#[tokio::test(start_paused = true)]
async fn metadata_failure_does_not_fail_setup() {
    let b = bench(vec![(
        "A",
        SimProfile {
            fail_metadata_reads: true,
            ..SimProfile::default()
        },
    )]);

    b.rig.setup().run().await.unwrap();

    let a = b.rig.registry().snapshot(&id("A")).unwrap();
    assert_eq!(a.status, DeviceStatus::Ready);
    assert!(a.metadata.is_empty());
}

#[tokio::test(start_paused = true)]
async fn setup_reads_device_metadata() {
    let b = bench(vec![(
        "A",
        SimProfile {
            firmware_version: "3.0.1".to_owned(),
            serial_number: "PT-0042".to_owned(),
            ..SimProfile::default()
        },
    )]);

    b.rig.setup().run().await.unwrap();

    let a = b.rig.registry().snapshot(&id("A")).unwrap();
    assert_eq!(a.metadata.firmware_version.as_deref(), Some("3.0.1"));
    assert_eq!(a.metadata.serial_number.as_deref(), Some("PT-0042"));
}

#[tokio::test(start_paused = true)]
async fn second_setup_run_is_rejected_while_active() {
    let b = bench(vec![("A", SimProfile::default())]);

    let (first, second) = tokio::join!(b.rig.setup().run(), b.rig.setup().run());
    assert!(first.is_ok());
    assert!(matches!(second, Err(Error::SetupInProgress)));
}

#[tokio::test(start_paused = true)]
async fn forced_removal_pauses_setup_and_skips_the_device() {
    let mut b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
        ("C", SimProfile::default()),
    ]);

    let (setup_result, removal_result) = tokio::join!(b.rig.setup().run(), async {
        // Fires while A is still being brought up
        sleep(Duration::from_millis(1)).await;
        b.rig.disconnect_device(&id("C")).await
    });
    setup_result.unwrap();
    removal_result.unwrap();

    assert_eq!(b.rig.registry().len(), 2);
    assert!(b.rig.registry().snapshot(&id("C")).is_none());
    assert_eq!(b.rig.registry().status(&id("A")), Some(DeviceStatus::Ready));
    assert_eq!(b.rig.registry().status(&id("B")), Some(DeviceStatus::Ready));

    let events = drain(&mut b.events);
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::SetupCompleted { device } if device == &id("C"))));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DeviceRemoved { device, .. } if device == &id("C"))));
}

// -------------------------------------------------------------- monitor

#[tokio::test(start_paused = true)]
async fn monitor_reclassifies_dropped_devices() {
    let mut b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();

    b.rig.monitor().check_now().await;
    assert!(b.rig.registry().batch_ready());

    b.link.sever(&id("A"));
    b.rig.monitor().check_now().await;

    assert_eq!(
        b.rig.registry().status(&id("A")),
        Some(DeviceStatus::Disconnected)
    );
    assert_eq!(
        b.rig.registry().link_health(&id("A")),
        Some(LinkHealth::Down)
    );
    assert!(!b.link.is_subscribed(&id("A")));
    assert!(!b.rig.registry().batch_ready());

    let events = drain(&mut b.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::ConnectivityLost { device } if device == &id("A"))));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BatchReadyChanged { ready: false })));

    // The monitor never reconnects on its own
    assert_eq!(b.link.written_commands(&id("A")), vec![]);
}

// ---------------------------------------------------------- calibration

#[tokio::test(start_paused = true)]
async fn calibration_runs_zero_low_high_in_order() {
    let b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();

    let summary = b.rig.calibration().run().await.unwrap();

    assert_eq!(
        summary.calibrated.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        vec!["A", "B"]
    );
    assert_eq!(summary.dropped, 0);

    for device in ["A", "B"] {
        let snapshot = b.rig.registry().snapshot(&id(device)).unwrap();
        assert!(snapshot.calibrated);
        assert_eq!(snapshot.status, DeviceStatus::Ready);

        // Strict phase order per device
        assert_eq!(
            b.link.written_commands(&id(device)),
            vec![
                Command::ReadZeroOffset,
                Command::WriteLowerCal,
                Command::WriteUpperCal
            ]
        );
        assert_eq!(b.link.lower_cal(&id(device)), Some(0));
        assert_eq!(b.link.upper_cal(&id(device)), Some(250));
    }

    // High phase drove the reference to the shared sweep pressure first
    assert_eq!(b.reference.targets(), vec![250.0]);
    assert_eq!(b.reference.at_target_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reference_failure_aborts_the_whole_run() {
    let mut b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();
    b.reference.fail_set_pressure_at(0);

    let result = b.rig.calibration().run().await;
    assert!(matches!(result, Err(Error::ReferenceControllerFailure(_))));
    assert!(!b.rig.calibration().is_active());

    // Zero and Low completed; no upper-calibration command was ever sent
    for device in ["A", "B"] {
        assert_eq!(
            b.link.written_commands(&id(device)),
            vec![Command::ReadZeroOffset, Command::WriteLowerCal]
        );
        let snapshot = b.rig.registry().snapshot(&id(device)).unwrap();
        assert_eq!(snapshot.status, DeviceStatus::Failed);
        assert!(!snapshot.calibrated);
    }

    let events = drain(&mut b.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::CalibrationStopped { .. })));
}

#[tokio::test(start_paused = true)]
async fn device_dropping_mid_phase_is_isolated() {
    // B's link dies on its second command exchange (the low point)
    let mut b = bench(vec![
        ("A", SimProfile::default()),
        (
            "B",
            SimProfile {
                drop_after_writes: Some(1),
                ..SimProfile::default()
            },
        ),
        ("C", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();

    let summary = b.rig.calibration().run().await.unwrap();

    assert_eq!(
        summary.calibrated.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        vec!["A", "C"]
    );
    assert_eq!(summary.dropped, 1);
    assert_eq!(b.rig.registry().len(), 2);
    assert!(b.rig.registry().snapshot(&id("B")).is_none());

    // B got its zero point and nothing after
    assert_eq!(b.link.written_commands(&id("B")), vec![Command::ReadZeroOffset]);

    // A and C were untouched by B's failure
    for device in ["A", "C"] {
        assert_eq!(
            b.link.written_commands(&id(device)),
            vec![
                Command::ReadZeroOffset,
                Command::WriteLowerCal,
                Command::WriteUpperCal
            ]
        );
    }

    let events = drain(&mut b.events);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::DevicesDropped { phase: "low", dropped } if dropped.len() == 1 && dropped[0].0 == id("B")
    )));
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_drops_only_the_offender() {
    let b = bench(vec![
        (
            "A",
            SimProfile {
                command_failures: u32::MAX,
                ..SimProfile::default()
            },
        ),
        ("B", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();

    let summary = b.rig.calibration().run().await.unwrap();

    assert_eq!(
        summary.calibrated.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
        vec!["B"]
    );
    assert!(b.rig.registry().snapshot(&id("A")).is_none());
    assert!(b.rig.registry().snapshot(&id("B")).unwrap().calibrated);
}

#[tokio::test(start_paused = true)]
async fn garbled_response_is_retried_then_succeeds() {
    // One protocol mismatch, then clean responses: the retry absorbs it
    let b = bench(vec![(
        "A",
        SimProfile {
            garbled_responses: 1,
            ..SimProfile::default()
        },
    )]);
    b.rig.setup().run().await.unwrap();

    let summary = b.rig.calibration().run().await.unwrap();
    assert_eq!(summary.calibrated.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn empty_batch_refuses_to_calibrate() {
    let b = bench(vec![]);
    let result = b.rig.calibration().run().await;
    assert!(matches!(result, Err(Error::NoDevicesRemaining)));
}

#[tokio::test(start_paused = true)]
async fn operator_stop_halts_between_phases() {
    let mut b = bench(vec![("A", SimProfile::default())]);
    b.rig.setup().run().await.unwrap();

    let (result, ()) = tokio::join!(b.rig.calibration().run(), async {
        sleep(Duration::from_millis(5)).await;
        b.rig.calibration().stop();
    });

    assert!(matches!(result, Err(Error::Stopped)));
    // Zero completed, nothing after the stop
    assert_eq!(b.link.written_commands(&id("A")), vec![Command::ReadZeroOffset]);

    let snapshot = b.rig.registry().snapshot(&id("A")).unwrap();
    assert_eq!(snapshot.status, DeviceStatus::Failed);
    assert!(!snapshot.calibrated);

    let events = drain(&mut b.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::CalibrationStopped { .. })));
}

// --------------------------------------------------------- verification

/// Drive a verification run while feeding each device a live stream that
/// tracks the reference with a fixed offset.
async fn run_tracked_verification(
    b: &Bench,
    offsets: &[(&str, f32)],
) -> manocal::Result<manocal::VerificationReport> {
    let run = b.rig.verification().run();
    tokio::pin!(run);

    let mut feeder = tokio::time::interval(Duration::from_millis(2));
    loop {
        tokio::select! {
            result = &mut run => break result,
            _ = feeder.tick() => {
                let target = b.reference.targets().last().copied().unwrap_or(0.0);
                for (device, offset) in offsets.iter().copied() {
                    b.link.push_sample(&id(device), target + offset);
                }
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn verification_certifies_on_mean_discrepancy() {
    let b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();

    // A tracks within tolerance, B reads 3 units high everywhere
    let report = run_tracked_verification(&b, &[("A", 1.0), ("B", 3.0)])
        .await
        .unwrap();

    // 9 ladder rungs, one point per connected device per rung
    assert_eq!(report.points.len(), 18);

    let verdicts: Vec<(String, bool)> = report
        .certifications
        .iter()
        .map(|(device, c)| (device.to_string(), c.certified))
        .collect();
    assert_eq!(
        verdicts,
        vec![("A".to_owned(), true), ("B".to_owned(), false)]
    );

    let b_cert = &report.certifications[1].1;
    assert!((b_cert.mean_discrepancy - 3.0).abs() < 1e-3);
    assert_eq!(b_cert.total_readings, 9);

    // Ladder went up in quarters and back down, then the terminal safety
    // action vented to zero
    assert_eq!(
        b.reference.targets(),
        vec![0.0, 62.5, 125.0, 187.5, 250.0, 187.5, 125.0, 62.5, 0.0, 0.0]
    );
}

#[tokio::test(start_paused = true)]
async fn cancelled_verification_computes_nothing_and_vents() {
    let mut b = bench(vec![("A", SimProfile::default())]);
    b.rig.setup().run().await.unwrap();

    let run = b.rig.verification().run();
    tokio::pin!(run);

    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = sleep(Duration::from_millis(4)) => {
                b.rig.verification().stop();
            }
        }
    };

    assert!(matches!(result, Err(Error::Stopped)));
    assert_eq!(b.rig.registry().status(&id("A")), Some(DeviceStatus::Ready));

    // Vented back to zero despite the cancellation
    assert_eq!(b.reference.targets().last(), Some(&0.0));

    let events = drain(&mut b.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::VerificationStopped { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, Event::DeviceCertified { .. })));
}

#[tokio::test(start_paused = true)]
async fn verification_reference_failure_is_fatal() {
    let b = bench(vec![("A", SimProfile::default())]);
    b.rig.setup().run().await.unwrap();

    // Third rung never arrives
    b.reference.fail_set_pressure_at(2);

    let result = run_tracked_verification(&b, &[("A", 0.5)]).await;
    assert!(matches!(result, Err(Error::ReferenceControllerFailure(_))));

    // Terminal safety action still ran: last commanded pressure is zero
    assert_eq!(b.reference.targets().last(), Some(&0.0));
}

#[tokio::test(start_paused = true)]
async fn disconnected_device_is_skipped_but_still_judged() {
    let b = bench(vec![
        ("A", SimProfile::default()),
        ("B", SimProfile::default()),
    ]);
    b.rig.setup().run().await.unwrap();

    // B dies before the sweep starts; no points can be captured for it
    b.link.sever(&id("B"));

    let report = run_tracked_verification(&b, &[("A", 0.5)]).await.unwrap();

    assert_eq!(report.points.len(), 9);
    let b_cert = report
        .certifications
        .iter()
        .find(|(device, _)| device == &id("B"))
        .map(|(_, c)| c)
        .unwrap();
    assert!(!b_cert.certified);
    assert_eq!(b_cert.total_readings, 0);
}
