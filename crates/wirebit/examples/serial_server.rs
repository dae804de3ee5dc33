//! Serial link server: creates a shared-memory link and echoes bytes.
//!
//! Run:
//! - cargo run -p wirebit --example serial_server
//! - then, in another terminal: cargo run -p wirebit --example serial_client

use std::{thread, time::Duration};

use wirebit::{Endpoint, LinkModel, SerialConfig, SerialEndpoint, ShmLink};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1 ms latency with a little jitter, seeded for reproducibility.
    let model = LinkModel {
        base_latency_ns: 1_000_000,
        jitter_ns: 100_000,
        seed: 7,
        ..Default::default()
    };
    let link = ShmLink::create("wirebit_demo", 64 * 1024, Some(model))?;
    let config = SerialConfig { baud: 115_200, ..Default::default() };
    let mut port = SerialEndpoint::new(link, config, 1)?;

    println!("serial server up on link \"wirebit_demo\" (115200 8N1)");
    println!("waiting for a client; ctrl-c to quit");

    loop {
        match port.recv() {
            Ok(bytes) => {
                println!("received {} bytes, echoing", bytes.len());
                port.send(&bytes)?;
            }
            Err(e) if e.is_timeout() => thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(e.into()),
        }
    }
}
