//! Generator → tiered receiver → correlator over two in-memory wires

use std::sync::Arc;
use std::time::{Duration, Instant};
use tierbench_common::{CycleClock, HwStamp, LoopbackPort, Shutdown};
use tierbench_rx::{OpMode, ProcessorConfig, ProcessorKind, RxConfig, RxEngine, TierMode};
use tierbench_tx::packet::SECONDARY_DST_PORT;
use tierbench_tx::schedule::BurstEntry;
use tierbench_tx::{BurstSchedule, TxConfig, TxEngine};

fn rx_config(op_mode: OpMode) -> RxConfig {
    RxConfig {
        op_mode,
        tier_mode: TierMode::Cxl,
        rx_cores: 1,
        first_core: 0,
        primary_ring_size: 512,
        secondary_ring_size: 256,
        primary_pool_size: 1024,
        secondary_pool_size: 512,
        buffer_size: 256,
        swq_size: 1024,
        sample_freq: Some(4),
        monitor_interval_ms: 50,
        processor: ProcessorConfig {
            kind: ProcessorKind::HeaderTouch,
            arg: 0,
        },
        strict_numa: false,
    }
}

fn tx_config(occupancy: std::path::PathBuf) -> TxConfig {
    TxConfig {
        tx_cores: 1,
        rx_cores: 1,
        first_core: 2,
        packet_size: 128,
        link_gbps: 0.05,
        secondary_dst_port: Some(SECONDARY_DST_PORT),
        schedule: BurstSchedule::new(vec![
            BurstEntry {
                duration_us: 200,
                gap_us: 50,
            },
            BurstEntry {
                duration_us: 100,
                gap_us: 0,
            },
        ])
        .unwrap(),
        occupancy_outfile: Some(occupancy),
        rx_pool_size: 1024,
        rx_ring_size: 512,
        monitor_interval_ms: 50,
        ..Default::default()
    }
}

fn round_trip(op_mode: OpMode) {
    let occupancy = std::env::temp_dir().join(format!(
        "tierbench-roundtrip-{}-{op_mode}.txt",
        std::process::id()
    ));
    let clock = CycleClock::calibrate(Duration::from_millis(20)).unwrap();
    let shutdown = Shutdown::new();

    let mut rx = RxEngine::new(rx_config(op_mode), clock, shutdown.clone()).unwrap();
    let mut tx = TxEngine::new(tx_config(occupancy.clone()), clock, shutdown.clone()).unwrap();

    let rx_port = Arc::new(rx.loopback_port(HwStamp::Rx).unwrap());
    let tx_port = Arc::new(tx.loopback_port(HwStamp::Tx).unwrap());
    LoopbackPort::connect(&tx_port, &rx_port);

    rx.start(rx_port.clone()).unwrap();
    tx.start(tx_port.clone()).unwrap();

    let tx_stats = tx.stats().clone();
    let deadline = Instant::now() + Duration::from_secs(10);
    while tx_stats.snapshot().cores[1].received < 50 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }

    let tx_report = tx.stop().unwrap();
    let rx_report = rx.stop();

    assert!(tx_report.total_sent() > 0);
    assert!(tx_report.telemetry_rx >= 50);
    assert_eq!(tx_report.invalid_latencies, 0);
    assert!(tx_report.latency.count > 0);
    assert!(tx_report.latency.max_ns < 1_000_000_000);

    // both tiers saw traffic and every buffer went home
    assert!(rx_report.totals.primary_processed > 0);
    assert!(rx_report.totals.secondary_processed > 0);
    assert!(rx_report.totals.transmitted >= tx_report.telemetry_rx);
    for pool in rx.pools().iter() {
        assert_eq!(pool.allocated(), 0);
    }

    let text = std::fs::read_to_string(&occupancy).unwrap();
    std::fs::remove_file(&occupancy).unwrap();
    assert!(text.contains("------ For RX_Index 0 ------"));
    assert!(text.contains("------ For RX_Index 1 ------"));
}

#[test]
fn test_pipeline_round_trip() {
    round_trip(OpMode::Pipeline);
}

#[test]
fn test_rtc_round_trip() {
    round_trip(OpMode::Rtc);
}
