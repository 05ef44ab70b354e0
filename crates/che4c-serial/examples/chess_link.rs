//! CHE4C Robot Link Tool
//!
//! Opens the robot's serial port, cycles through the control statuses, and
//! prints whatever the controller reports back.
//!
//! Usage:
//!   cargo run --example chess_link -- [OPTIONS] [PORT]
//!
//! Options:
//!   --port PORT       Serial port (default: first Arduino found, else /dev/ttyACM0)
//!   --baud RATE       Baud rate (default: 9600)
//!   --config FILE     Load settings from a JSON host config
//!   --list            List serial ports and exit
//!   --simulate        Talk to an in-memory robot instead of hardware
//!
//! Set RUST_LOG=che4c_serial=debug for transceiver logging.

use anyhow::{bail, Context, Result};
use che4c_serial::config::HostConfig;
use che4c_serial::driver::PollDriver;
use che4c_serial::protocol::{
    list_ports, ControlStatus, MemoryChannel, MemoryDevice, SerialLink, StatusInterpreter,
    Transceiver, TransceiverRegistry,
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Echoes every status back the way the firmware acknowledges it
fn spawn_simulated_robot(device: MemoryDevice) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut acknowledged = 0;
        loop {
            let received = device.received_string();
            let lines: Vec<&str> = received.lines().collect();
            for line in &lines[acknowledged..] {
                device.push_line(line);
            }
            acknowledged = lines.len();
            if acknowledged >= ControlStatus::ALL.len() {
                device.push_line("simulation done");
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = HostConfig::default();
    let mut port_override: Option<String> = None;
    let mut baud_override: Option<u32> = None;
    let mut simulate = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                port_override = args.get(i).cloned();
            }
            "--baud" | "-b" => {
                i += 1;
                let raw = args.get(i).context("--baud needs a value")?;
                baud_override = Some(raw.parse().with_context(|| format!("bad baud rate {raw}"))?);
            }
            "--config" | "-c" => {
                i += 1;
                let path = args.get(i).context("--config needs a path")?;
                config = HostConfig::load(path).with_context(|| format!("loading {path}"))?;
            }
            "--list" | "-l" => {
                for port in list_ports() {
                    let marker = if port.is_arduino() { " (arduino)" } else { "" };
                    println!("{}{} {:?}", port.name, marker, port.product);
                }
                return Ok(());
            }
            "--simulate" => simulate = true,
            "--help" | "-h" => {
                println!("Usage: chess_link [--port PORT] [--baud RATE] [--config FILE] [--list] [--simulate]");
                return Ok(());
            }
            arg if !arg.starts_with('-') => port_override = Some(arg.to_string()),
            other => bail!("Unknown option: {other}"),
        }
        i += 1;
    }

    if let Some(port) = port_override {
        config.link.port_name = port;
    }
    if let Some(baud) = baud_override {
        config.link.baud_rate = baud;
    }
    if config.link.port_name.is_empty() {
        config.link.port_name = list_ports()
            .into_iter()
            .find(|p| p.is_arduino())
            .map(|p| p.name)
            .unwrap_or_else(|| "/dev/ttyACM0".to_string());
    }

    let mut simulator = None;
    let link = if simulate {
        let (channel, device) = MemoryChannel::pair();
        simulator = Some(spawn_simulated_robot(device));
        SerialLink::from_channel("simulated", Box::new(channel))?
    } else {
        println!(
            "Opening {} at {} baud...",
            config.link.port_name, config.link.baud_rate
        );
        let link = SerialLink::open(&config.link)?;
        // the bootloader swallows input for a moment after DTR toggles
        tokio::time::sleep(Duration::from_secs(2)).await;
        link
    };

    let registry = Arc::new(TransceiverRegistry::new());
    let status = Arc::new(
        StatusInterpreter::new().with_message_handler(|line| println!("robot says: {line}")),
    );
    let robot = Transceiver::with_config(&registry, status.clone(), &config.transceiver);
    robot.connect(link.clone());

    let driver = PollDriver::spawn(
        registry.clone(),
        link.clone(),
        config.transceiver.poll_interval(),
    );

    let mut updates = status.subscribe();
    for next in ControlStatus::ALL {
        if !robot.send_status(next) {
            driver.stop();
            bail!("link to the robot stalled while sending {next}");
        }
        println!("sent {next}");

        let echoed = tokio::time::timeout(Duration::from_secs(3), updates.changed()).await;
        match echoed {
            Ok(Ok(())) => println!("robot reports {:?}", *updates.borrow_and_update()),
            _ => println!("no status echo for {next}"),
        }
    }

    tokio::time::sleep(config.transceiver.poll_interval() * 4).await;
    let stats = link.stats();
    println!(
        "sent {} messages ({} bytes), received {} bytes",
        stats.tx_messages, stats.tx_bytes, stats.rx_bytes
    );

    robot.disconnect();
    driver.stop();
    driver.join().await;
    if let Some(handle) = simulator {
        if handle.join().is_err() {
            bail!("simulated robot panicked");
        }
    }

    Ok(())
}
