//! LAN discovery via the device's multicast beacon.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

use crate::error::Result;

pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(231, 1, 1, 1);
/// Devices listen for probes here.
pub const QUERY_PORT: u16 = 10131;
/// Devices answer to this port.
pub const REPLY_PORT: u16 = 10134;

const QUERY: &str = r#"{"name":"unitree_dapengche"}"#;

/// Probe the local network and collect serial -> IP mappings until the
/// window elapses.
///
/// Malformed datagrams and send failures are logged and skipped; only a
/// reply socket that cannot be opened is an error.
pub async fn discover_devices(window: Duration) -> Result<HashMap<String, String>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, REPLY_PORT)).await?;
    if let Err(e) = socket.join_multicast_v4(MULTICAST_GROUP, Ipv4Addr::UNSPECIFIED) {
        warn!(error = %e, "could not join multicast group");
    }

    let mut found = HashMap::new();

    if let Err(e) = socket
        .send_to(QUERY.as_bytes(), (MULTICAST_GROUP, QUERY_PORT))
        .await
    {
        warn!(error = %e, "failed to send discovery probe");
        return Ok(found);
    }

    let deadline = Instant::now() + window;
    let mut buf = [0u8; 1024];
    loop {
        let (len, addr) = match timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => {
                debug!("discovery window elapsed");
                break;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "discovery receive failed");
                break;
            }
            Ok(Ok(received)) => received,
        };

        let reply: Value = match serde_json::from_slice(&buf[..len]) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, from = %addr, "ignoring non-JSON discovery reply");
                continue;
            }
        };

        if let Some(serial) = reply.get("sn").and_then(Value::as_str) {
            let ip = reply
                .get("ip")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| addr.ip().to_string());
            info!(serial, ip = %ip, "discovered device");
            found.insert(serial.to_string(), ip);
        }
    }

    Ok(found)
}
