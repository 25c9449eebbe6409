//! Transmitter session monitor
//!
//! Demonstrates the session lifecycle:
//! - Scanning for a transmitter by ID
//! - Connecting and discovering characteristics
//! - Reconnecting after the link drops
//! - Enabling notifications once ready
//!
//! Run with: cargo run --example monitor -- --id 80H4H4
//!
//! Set RUST_LOG to change verbosity, e.g. RUST_LOG=transmitter_ble=trace

use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use transmitter_ble::{
    matches_transmitter, BtleplugCentral, CharacteristicId, ConnectionState, Error,
    PeripheralInfo, Result, Session, SessionConfig, SessionDelegate,
};

/// Connects only to the transmitter with the given ID.
struct Monitor {
    transmitter_id: String,
}

impl SessionDelegate for Monitor {
    fn should_connect(&self, peripheral: &PeripheralInfo) -> bool {
        let accept = matches_transmitter(peripheral, &self.transmitter_id);
        println!(
            "Discovered {} ({}), rssi {:?}: {}",
            peripheral.local_name.as_deref().unwrap_or("unnamed"),
            peripheral.id,
            peripheral.rssi,
            if accept { "connecting" } else { "skipping" }
        );
        accept
    }

    fn is_ready(&self) {
        println!("Transmitter {} ready", self.transmitter_id);
    }

    fn did_disconnect(&self) {
        println!("Transmitter {} disconnected, rescanning later", self.transmitter_id);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,transmitter_ble=debug")),
        )
        .init();

    println!("Transmitter Monitor");
    println!("===================\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let transmitter_id = args
        .iter()
        .position(|arg| arg == "--id")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.to_uppercase())
        .ok_or_else(|| Error::InvalidConfig {
            reason: "usage: monitor --id <transmitter id>".to_string(),
        })?;

    println!("Looking for transmitter {}...\n", transmitter_id);

    let central = BtleplugCentral::new().await?;
    let delegate = Arc::new(Monitor {
        transmitter_id: transmitter_id.clone(),
    });
    let session = Arc::new(Session::new(central, SessionConfig::default(), delegate));
    session.start().await?;

    let mut events = session.subscribe_state();
    let watcher = {
        let session = session.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                println!(
                    "[{}] {} {}",
                    event.at.format("%H:%M:%S%.3f"),
                    event.state,
                    event.peripheral_id.as_deref().unwrap_or("")
                );

                if event.state == ConnectionState::Ready {
                    match session
                        .set_notify_enabled(true, CharacteristicId::Control, None)
                        .await
                    {
                        Ok(()) => println!("  Control notifications enabled"),
                        Err(e) => println!("  Failed to enable notifications: {}", e),
                    }
                }
            }
        })
    };

    println!("Press Ctrl+C to exit\n");
    let _ = tokio::signal::ctrl_c().await;

    session.shutdown().await;
    watcher.abort();

    println!("\nReconnect attempts at exit: {}", session.reconnect_attempts());
    Ok(())
}
