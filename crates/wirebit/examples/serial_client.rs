//! Serial link client: attaches to the server's link and sends a message.
//!
//! Run the serial_server example first, then:
//! - cargo run -p wirebit --example serial_client

use std::{thread, time::Duration};

use wirebit::{Endpoint, SerialConfig, SerialEndpoint, ShmLink};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let link = ShmLink::attach("wirebit_demo", None)?;
    let config = SerialConfig { baud: 115_200, ..Default::default() };
    let mut port = SerialEndpoint::new(link, config, 2)?;

    let message = b"hello over the simulated wire";
    port.send(message)?;
    println!("sent {} bytes, waiting for echo", message.len());

    let mut echoed = Vec::new();
    while echoed.len() < message.len() {
        match port.recv() {
            Ok(bytes) => echoed.extend_from_slice(&bytes),
            Err(e) if e.is_timeout() => thread::sleep(Duration::from_millis(1)),
            Err(e) => return Err(e.into()),
        }
    }

    println!("echo: {}", String::from_utf8_lossy(&echoed));
    let stats = port.link().stats();
    println!(
        "frames sent={} received={}",
        stats.frames_sent, stats.frames_received
    );
    Ok(())
}
