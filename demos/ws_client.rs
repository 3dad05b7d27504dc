//! Example: Print BTHome readings streamed by a running bridge
//!
//! Run with: cargo run --example ws_client -- ws://192.168.1.164

use bthome_ws_bridge::ble::BTHOME_SERVICE_UUID16;
use bthome_ws_bridge::Result;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;

/// Length of the hex-encoded device address at the start of every message.
const ADDRESS_HEX_LEN: usize = 12;

/// One decoded BTHome measurement.
struct Measurement {
    name: &'static str,
    value: String,
    unit: &'static str,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ws_client=info".parse().unwrap()),
        )
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:80".to_string());

    let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
    println!("Connected to {}. Waiting for messages...\n", url);

    while let Some(message) = ws.next().await {
        let text = match message? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        if text.len() < ADDRESS_HEX_LEN {
            println!("Message too short: {}", text);
            continue;
        }
        let (address, payload) = text.split_at(ADDRESS_HEX_LEN);

        let payload = match hex::decode(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                println!("Invalid hex payload from {}: {}", address, e);
                continue;
            }
        };

        print_reading(&format_address(address), &payload);
    }

    println!("Connection closed");
    Ok(())
}

/// Insert colons between the byte pairs of a hex address.
fn format_address(hex: &str) -> String {
    hex.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}

fn print_reading(address: &str, payload: &[u8]) {
    // Payload layout: uuid_lo, uuid_hi, device info, measurements
    let &[uuid_lo, uuid_hi, device_info, ref measurements @ ..] = payload else {
        println!("{}: payload too short ({} bytes)", address, payload.len());
        return;
    };

    let uuid = u16::from_le_bytes([uuid_lo, uuid_hi]);
    if uuid != BTHOME_SERVICE_UUID16 {
        println!("{}: unknown service UUID 0x{:04X}", address, uuid);
        return;
    }

    let version = (device_info >> 5) & 0x07;
    if version != 2 {
        println!("{}: unsupported BTHome version {}", address, version);
        return;
    }

    println!("Address: {}", address);
    for m in parse_measurements(measurements) {
        println!("  {}: {}{}", m.name, m.value, m.unit);
    }
}

fn parse_measurements(mut data: &[u8]) -> Vec<Measurement> {
    let mut measurements = Vec::new();

    while let Some((&object_id, rest)) = data.split_first() {
        let (decoded, len) = match object_id {
            0x00 => match rest.first() {
                Some(&packet) => (measurement("Packet", packet.to_string(), ""), 1),
                None => break,
            },
            0x01 => match rest.first() {
                Some(&battery) => (measurement("Battery", battery.to_string(), "%"), 1),
                None => break,
            },
            0x02 => match *rest {
                [lo, hi, ..] => {
                    let celsius = f64::from(i16::from_le_bytes([lo, hi])) * 0.01;
                    (measurement("Temperature", format!("{:.2}", celsius), "°C"), 2)
                }
                _ => break,
            },
            0x03 => match *rest {
                [lo, hi, ..] => {
                    let humidity = f64::from(u16::from_le_bytes([lo, hi])) * 0.01;
                    (measurement("Humidity", format!("{:.2}", humidity), "%"), 2)
                }
                _ => break,
            },
            0x0C => match *rest {
                [lo, hi, ..] => {
                    let volts = f64::from(u16::from_le_bytes([lo, hi])) * 0.001;
                    (measurement("Voltage", format!("{:.3}", volts), "V"), 2)
                }
                _ => break,
            },
            other => {
                // Object lengths are not self-describing, so stop here
                println!("  Unsupported object ID 0x{:02X}", other);
                break;
            }
        };

        measurements.push(decoded);
        data = &rest[len..];
    }

    if !data.is_empty() {
        println!("  {} trailing bytes not decoded", data.len());
    }

    measurements
}

fn measurement(name: &'static str, value: String, unit: &'static str) -> Measurement {
    Measurement { name, value, unit }
}
