//! Modbus Signal Map Demo
//!
//! Runs a short master session against an in-process simulated slave:
//! - Device settings loaded from host source arguments
//! - Signal configs parsed, grouped and planned into chunked reads
//! - Poll cycles publishing scaled values
//! - Concurrent writes serialized onto the shared link, including an
//!   out-of-band rejection and an expired request
//!
//! Usage: cargo run --bin demo
//! Set RUST_LOG=modbus_signal_map=debug for per-chunk logging.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use modbus_signal_map::{
    DeviceSettings, LiveValues, MasterDevice, SignalConfig, SimulatedDevice, SourceArg,
    WriteRequest,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Modbus Signal Map v{} Demo", modbus_signal_map::VERSION);
    println!("==============================");

    // =========================================================================
    // Part 1: Device settings
    // =========================================================================
    println!("\nPart 1: Device settings");
    println!("-----------------------");

    let args = [
        SourceArg::new("Protocol", "TCP"),
        SourceArg::new("IPAddress", "127.0.0.1"),
        SourceArg::new("Port", "1502"),
        SourceArg::new("SlaveId", "3"),
        SourceArg::new("MaxNumberReadRegistersAtTime", "4"),
        SourceArg::new("RegisterShift", "-1"),
    ];
    let settings = DeviceSettings::from_source_args("boiler", &args)
        .with_write_backoff(Duration::from_millis(20));
    println!("  link:         {}", settings.link_id());
    println!("  slave id:     {}", settings.slave_id);
    println!("  chunk size:   {}", settings.max_read_registers);
    println!("  shift:        {}", settings.register_shift);

    // =========================================================================
    // Part 2: Simulated slave
    // =========================================================================
    let plc = SimulatedDevice::new()
        .with_slave_id(settings.slave_id)
        .with_latency(Duration::from_millis(5));

    // Addresses below are on the wire, one lower than configured.
    plc.set_discrete_input(0, true);
    plc.set_coil(4, true);
    plc.set_input_registers(9, &[2048, 0xFF38]);
    plc.set_holding_registers(9, &[0x41C8, 0x0000, 0x0001, 0x86A0]);
    plc.set_holding_registers(13, &[0x4009, 0x21FB, 0x5444, 0x2D18]);

    // =========================================================================
    // Part 3: Signals
    // =========================================================================
    println!("\nPart 3: Signals");
    println!("---------------");

    let configs = vec![
        SignalConfig::new("burner_fault", "mbFunctionNumber:2, reg:1").discrete(true),
        SignalConfig::new("pump_running", "mbFunctionNumber:1, reg:5"),
        SignalConfig::new("flow", "mbFunctionNumber:4, reg:10")
            .with_raw_band(0.0, 4096.0)
            .with_eu_band(0.0, 120.0),
        SignalConfig::new("delta_t", "mbFunctionNumber:4, reg:11, type:short"),
        SignalConfig::new("temperature", "mbFunctionNumber:3, reg:10, type:float"),
        SignalConfig::new("run_hours", "mbFunctionNumber:3, reg:12, type:dword"),
        SignalConfig::new("calibration", "mbFunctionNumber:3, reg:14, type:double"),
        SignalConfig::new("bad_type", "mbFunctionNumber:3, reg:30, type:decimal"),
        SignalConfig::new("setpoint", "mbFunctionNumber:16, reg:20, type:float")
            .with_eu_band(20.0, 90.0),
        SignalConfig::new("pump_cmd", "mbFunctionNumber:5, reg:5"),
        SignalConfig::new("valve", "mbFunctionNumber:6, reg:22")
            .with_raw_band(0.0, 10000.0)
            .with_eu_band(0.0, 100.0),
    ];

    let values = Arc::new(LiveValues::new());
    let mut device = MasterDevice::new("boiler", settings, plc.clone(), values.clone());
    let mapped = device.init(&configs)?;
    println!("  {} of {} signals mapped", mapped, configs.len());

    for map in device.read_maps() {
        if let Some(span) = map.span() {
            println!(
                "  {:<32} start {:>3}, {:>2} points, chunks {:?}",
                map.function().to_string(),
                span.start,
                span.number_of_points,
                map.chunks()
                    .iter()
                    .map(|chunk| (chunk.address, chunk.count))
                    .collect::<Vec<_>>()
            );
        }
    }

    // =========================================================================
    // Part 4: Polling
    // =========================================================================
    println!("\nPart 4: Polling");
    println!("---------------");

    let watchdog = device.spawn_idle_watchdog();
    for cycle in 1..=2 {
        let report = device.poll().await?;
        println!(
            "  cycle {}: {} values in {:?}, {} failed maps",
            cycle,
            report.published,
            report.elapsed,
            report.failures.len()
        );
    }
    for (name, value) in values.snapshot() {
        println!("  {:<14} = {}", name, value);
    }

    // =========================================================================
    // Part 5: Writes
    // =========================================================================
    println!("\nPart 5: Writes");
    println!("--------------");

    device.spawn_writers()?;
    plc.clear_calls();

    let requests = [
        WriteRequest::new("setpoint", 65.5),
        WriteRequest::new("pump_cmd", 1.0),
        WriteRequest::new("valve", 42.0),
        WriteRequest::new("setpoint", 150.0),
        WriteRequest::new("valve", 10.0).expires_after(chrono::Duration::zero()),
    ];
    let mut handles = Vec::new();
    for request in requests {
        let label = format!("{} <- {}", request.signal, request.value);
        handles.push((label, device.submit(request)?));
    }
    for (label, handle) in handles {
        println!("  {:<20} {:?}", label, handle.finished().await);
    }

    println!("  transport writes: {}", plc.write_calls().len());
    println!("  overlapping calls: {}", plc.overlap_detected());

    device.stop_writers();
    watchdog.abort();

    println!("\nDone.");
    Ok(())
}
