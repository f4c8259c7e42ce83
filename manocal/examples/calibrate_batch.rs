//! Batch calibration example against the simulated bench

use std::sync::Arc;
use std::time::Duration;

use manocal::{CalibrationRig, ChannelSink, Config, DeviceSeed};
use manocal_transport::{SimLink, SimProfile, SimReference};

#[tokio::main]
async fn main() -> manocal::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let link = Arc::new(SimLink::new());
    for (id, serial) in [("PT-1", "A10021"), ("PT-2", "A10022"), ("PT-3", "A10023")] {
        link.add_device(
            id,
            SimProfile {
                display_name: id.to_owned(),
                serial_number: serial.to_owned(),
                ..SimProfile::default()
            },
        );
    }

    let reference = Arc::new(SimReference::new());
    let (sink, mut events) = ChannelSink::channel();

    let rig = CalibrationRig::new(
        link.clone(),
        reference.clone(),
        sink,
        Config::default().with_sweep_pressure(200.0).with_fast_timings(),
    );

    // Print every engine notification as it arrives
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    rig.register_batch(vec![
        DeviceSeed::new("PT-1"),
        DeviceSeed::new("PT-2"),
        DeviceSeed::new("PT-3"),
    ]);
    rig.monitor().start();

    rig.setup().run().await?;

    let summary = rig.calibration().run().await?;
    println!("calibrated {} devices", summary.calibrated.len());

    // Feed each device a live stream that tracks the reference so the
    // verification sweep has something to certify
    let feeder = {
        let link = link.clone();
        let reference = reference.clone();
        tokio::spawn(async move {
            loop {
                let target = reference.targets().last().copied().unwrap_or(0.0);
                for id in ["PT-1", "PT-2", "PT-3"] {
                    link.push_sample(&id.into(), target + 0.4);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    let report = rig.verification().run().await?;
    feeder.abort();

    for (device, certification) in &report.certifications {
        println!("{device}: {certification}");
    }

    rig.monitor().stop();
    Ok(())
}
