use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{RelayError, RelayResult};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_PORT_COUNT: u16 = 10;

/**
    Bind a listener on the first free loopback port in `start..start + count`.

    Each candidate is tried exactly once, in order.
*/
pub async fn bind_loopback(start: u16, count: u16) -> RelayResult<(TcpListener, u16)> {
    for offset in 0..count {
        let Some(port) = start.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        match TcpListener::bind(addr).await {
            Ok(listener) => {
                info!(port, "bound relay listener");
                return Ok((listener, port));
            }
            Err(e) => debug!(port, error = %e, "port unavailable"),
        }
    }

    Err(RelayError::NoAvailablePort { start, count })
}
