//! LWM2M device CLI
//!
//! Usage:
//!   cargo run --example lwm2m_client -- --name weather-station [--server 127.0.0.1] [--server-port 5683]
//!
//! Registers a device exposing a Device object (/3/0), refreshes the
//! registration periodically and unregisters on Ctrl+C.

use clap::Parser;
use log::LevelFilter;
use rust_lwm2m::{
    ClientConfig, Lwm2mClient, MemoryObjectRegistry, ObjectRegistry, UdpTransport, UserHandler,
};
use simple_logger::SimpleLogger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(name = "lwm2m-client")]
#[command(about = "LWM2M client - register a device with an LWM2M server")]
struct Args {
    /// Endpoint name to register with
    #[arg(short, long, default_value = "rust-lwm2m-device")]
    name: String,

    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    /// Server port
    #[arg(long, default_value = "5683")]
    server_port: u16,

    /// Local port the device listens on
    #[arg(short, long, default_value = "5684")]
    port: u16,

    /// Seconds between registration updates
    #[arg(long, default_value = "30")]
    update_interval: u64,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> rust_lwm2m::Result<()> {
    let args = Args::parse();
    SimpleLogger::new()
        .with_level(if args.verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        })
        .init()
        .expect("Failed to install logger");

    let objects = Arc::new(MemoryObjectRegistry::new());
    objects.create(3, 0)?;
    objects.set_resource(3, 0, 0, "rust-lwm2m")?;
    objects.set_resource(3, 0, 1, "demo device")?;
    objects.set_resource(3, 0, 2, "0001")?;

    let config = ClientConfig {
        port: args.port,
        ..ClientConfig::default()
    };
    let client = Lwm2mClient::new(Arc::new(UdpTransport::default()), objects, config);
    let device = client.register(&args.server, args.server_port, "", &args.name)?;
    println!(
        "Registered '{}' with {}:{} at {}",
        args.name, args.server, args.server_port, device.location
    );

    device.set_handler(UserHandler::Write(Arc::new(|address, value| {
        println!("Server wrote {} = {}", address, value);
        Ok(())
    })))?;
    device.set_handler(UserHandler::Execute(Arc::new(|address, arguments| {
        println!("Server executed {} {}", address, arguments.unwrap_or(""));
        Ok(())
    })))?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, unregistering...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    let interval = Duration::from_secs(args.update_interval);
    let mut last_update = Instant::now();
    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
        if last_update.elapsed() >= interval {
            client.update(&device)?;
            last_update = Instant::now();
        }
    }

    client.unregister(device)
}
