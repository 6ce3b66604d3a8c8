//! Operator console.
//!
//! Connects to one hub per label given on the command line (default: a
//! single "Swerve Hub"), starts the user program on each and streams
//! joystick input read from stdin at the control loop rate:
//!
//! ```text
//!   x1,y1,x2,y2      axis update in percent
//!   :start / :stop   start or stop the user programs
//!   :send <json>     send a {"type","payload"} envelope to every hub
//!   :status          print link and pipeline state
//!   :quit            stop the programs and disconnect
//! ```

use std::io::{self, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use embassy_futures::select::{select3, Either3};
use embassy_sync::pubsub::WaitResult;
use futures::future::select_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use swervelink::ble::gatt_client::GattBackend;
use swervelink::ble::{DiscoveredDevice, LinkEvents};
use swervelink::config::CONTROL_LOOP_PERIOD_MS;
use swervelink::{
    subscribe, AxisUpdate, ChassisVelocity, Hub, HubEvent, Message, SendOptions, VelocityStream,
};

type HostHub = Hub<GattBackend>;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut labels: Vec<String> = std::env::args().skip(1).collect();
    if labels.is_empty() {
        labels.push("Swerve Hub".into());
    }

    let mut hubs = Vec::with_capacity(labels.len());
    for label in &labels {
        let backend = GattBackend::new(select_bluetooth_device)
            .await
            .context("no usable Bluetooth adapter")?;
        let mut hub = Hub::new(label, backend);
        spawn_printer(&hub);

        println!("\nScanning for the {}...", label);
        hub.connect()
            .await
            .with_context(|| format!("connecting {}", label))?;
        hub.start_user_program()
            .await
            .with_context(|| format!("starting the program on {}", label))?;
        hubs.push(hub);
    }

    let result = run(&mut hubs).await;

    for hub in hubs.iter_mut() {
        if hub.is_connected() {
            if let Err(e) = hub.stop_user_program().await {
                warn!("{}: could not stop program: {}", hub.name(), e);
            }
        }
        hub.disconnect().await;
    }
    result
}

async fn run(hubs: &mut [HostHub]) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(Duration::from_millis(CONTROL_LOOP_PERIOD_MS));
    let mut velocity = ChassisVelocity::default();
    let mut streams = vec![VelocityStream::new(); hubs.len()];

    let links: Vec<LinkEvents> = hubs.iter().map(HostHub::link_events).collect();

    info!("Streaming at {} ms per update", CONTROL_LOOP_PERIOD_MS);

    loop {
        let link_event = select_all(
            links
                .iter()
                .enumerate()
                .map(|(i, events)| Box::pin(async move { (i, events.next().await) })),
        );

        match select3(link_event, lines.next_line(), ticker.tick()).await {
            Either3::First(((i, event), _, _)) => {
                let hub = &mut hubs[i];
                if let Err(e) = hub.handle_link_event(event).await {
                    warn!("{}: {}", hub.name(), e);
                }
                if !hub.is_connected() {
                    warn!("{} dropped the link", hub.name());
                    return Ok(());
                }
            }
            Either3::Second(line) => {
                let Some(line) = line.context("reading stdin")? else {
                    return Ok(());
                };
                match line.trim() {
                    "" => {}
                    ":quit" => return Ok(()),
                    ":start" => {
                        for hub in hubs.iter_mut() {
                            hub.start_user_program().await?;
                        }
                    }
                    ":stop" => {
                        velocity = ChassisVelocity::default();
                        for hub in hubs.iter_mut() {
                            hub.stop_user_program().await?;
                        }
                    }
                    ":status" => print_status(hubs),
                    input => {
                        if let Some(json) = input.strip_prefix(":send ") {
                            send_envelope(hubs, json).await?;
                        } else if let Some(axes) = AxisUpdate::parse_line(input) {
                            velocity = axes.into();
                        } else {
                            warn!("Unrecognised input: {}", input);
                        }
                    }
                }
            }
            Either3::Third(_) => {
                for (hub, stream) in hubs.iter_mut().zip(streams.iter_mut()) {
                    if let Err(e) = stream.tick(hub, velocity).await {
                        warn!("{}: {}", hub.name(), e);
                    }
                }
            }
        }
    }
}

async fn send_envelope(hubs: &mut [HostHub], json: &str) -> Result<()> {
    let message = match Message::parse(json) {
        Ok(message) => message,
        Err(e) => {
            warn!("Not an envelope: {}", e);
            return Ok(());
        }
    };
    for hub in hubs.iter_mut() {
        hub.send_envelope(&message, SendOptions::guaranteed()).await?;
    }
    Ok(())
}

fn print_status(hubs: &[HostHub]) {
    for hub in hubs {
        let pending = hub
            .json_stream()
            .pending_age()
            .map(|age| format!("{} ms", age.as_millis()))
            .unwrap_or_else(|| "-".into());
        println!(
            "{}: connected={} running={} ready={} queued={} buffered={}B pending={}",
            hub.name(),
            hub.is_connected(),
            hub.is_user_program_running(),
            hub.is_ready(),
            hub.queued_len(),
            hub.json_stream().buffered_len(),
            pending
        );
    }
}

/// Print hub events as they arrive.
fn spawn_printer(hub: &HostHub) {
    let bus = hub.event_bus();
    let name = hub.name().to_owned();
    tokio::spawn(async move {
        let mut events = match subscribe(&bus) {
            Ok(events) => events,
            Err(e) => {
                warn!("{}: {}", name, e);
                return;
            }
        };
        loop {
            match events.next_message().await {
                WaitResult::Message(HubEvent::Connected) => println!("[{}] connected", name),
                WaitResult::Message(HubEvent::Disconnected) => println!("[{}] disconnected", name),
                WaitResult::Message(HubEvent::ProgramRunningChanged(running)) => {
                    let state = if running { "running" } else { "stopped" };
                    println!("[{}] program {}", name, state);
                }
                WaitResult::Message(HubEvent::MessageReceived(message)) => {
                    println!("[{}] {}", name, message)
                }
                WaitResult::Message(HubEvent::Output(text)) => println!("[{}] > {}", name, text),
                WaitResult::Lagged(missed) => warn!("{}: missed {} events", name, missed),
            }
        }
    });
}

/// Interactive device menu on stdin. `None` cancels the selection.
fn select_bluetooth_device(devices: &[DiscoveredDevice]) -> Option<usize> {
    match prompt_for_device(devices) {
        Ok(choice) => choice,
        Err(e) => {
            warn!("Device selection failed: {}", e);
            None
        }
    }
}

fn prompt_for_device(devices: &[DiscoveredDevice]) -> io::Result<Option<usize>> {
    loop {
        println!("\n=== Available Hubs ===");
        for (i, device) in devices.iter().enumerate() {
            let rssi = device
                .rssi
                .map(|r| format!("{} dBm", r))
                .unwrap_or_else(|| "?".into());
            println!("{}. {} ({}, {})", i + 1, device.name, device.address, rssi);
        }
        println!("\nEnter hub number (1-{}) or 'q' to cancel: ", devices.len());
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        let input = input.trim();

        if input.eq_ignore_ascii_case("q") {
            return Ok(None);
        }

        match input.parse::<usize>() {
            Ok(choice) if choice > 0 && choice <= devices.len() => return Ok(Some(choice - 1)),
            Ok(_) => println!(
                "Invalid choice. Please enter a number between 1 and {}",
                devices.len()
            ),
            Err(_) => println!("Invalid input. Please enter a number or 'q' to cancel."),
        }
    }
}
