//! LWM2M management server CLI
//!
//! Usage:
//!   cargo run --example lwm2m_server -- [--port 5683] [--config lwm2m.json] [--verbose]
//!
//! Accepts registrations and reads the manufacturer (/3/0/0) of every
//! device that registers.

use clap::Parser;
use log::LevelFilter;
use rust_lwm2m::{Config, Lwm2mServer, MemoryRegistry, UdpTransport, UserHandler};
use simple_logger::SimpleLogger;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "lwm2m-server")]
#[command(about = "LWM2M server - accept device registrations over CoAP")]
struct Args {
    /// JSON config file (optional)
    #[arg(short, long)]
    config: Option<String>,

    /// UDP port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

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

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let transport = Arc::new(UdpTransport::from_config(&config.server));
    let server = Lwm2mServer::start(transport, Arc::new(MemoryRegistry::new()), &config.server)?;

    let management = server.management().clone();
    server.set_handler(UserHandler::Registration(Arc::new(move |device| {
        println!(
            "Registered '{}' as {} ({}:{}) with {}",
            device.name,
            device.location,
            device.address,
            device.port,
            device.links.join(", ")
        );
        // Keep the round trip off the router thread
        let management = management.clone();
        let id = device.id;
        std::thread::spawn(move || match management.read(id, 3, 0, 0) {
            Ok(manufacturer) => println!("  Device {} manufacturer: {}", id, manufacturer),
            Err(e) => println!("  Device {} read failed: {}", id, e),
        });
        Ok(())
    })))?;
    server.set_handler(UserHandler::Unregistration(Arc::new(|device| {
        println!("Unregistered '{}' ({})", device.name, device.location);
        Ok(())
    })))?;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        println!("\nReceived Ctrl+C, shutting down...");
        r.store(false, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl+C handler");

    println!("Server listening on: coap://0.0.0.0:{}", server.port());
    println!("Press Ctrl+C to stop\n");

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    println!("{} device(s) still registered", server.list_devices()?.len());
    server.stop()
}
