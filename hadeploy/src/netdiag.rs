use log::{debug, warn};
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// ICMP echo probe. Any failure, including not being allowed to open the
/// ping socket, counts as unreachable; there is no retry.
pub async fn is_reachable(ip: &str, probe_timeout: Duration) -> bool {
    let addr: IpAddr = match ip.trim().parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("{} is not a usable address: {}", ip, e);
            return false;
        }
    };

    let client = match Client::new(&Config::default()).await {
        Ok(client) => client,
        Err(e) => {
            warn!("Failed to create ping client: {}", e);
            return false;
        }
    };

    let mut pinger = client.pinger(addr).await;
    pinger.size(56).timeout(probe_timeout);

    let reachable = pinger.ping(0).await.is_ok();
    debug!("reachability probe for {}: {}", ip, reachable);
    reachable
}

/// Raw TCP connect with a deadline. Refused, timed out and host-down all
/// count as closed.
pub async fn is_port_open(ip: &str, port: u16, probe_timeout: Duration) -> bool {
    if port == 0 {
        return false;
    }

    let open = matches!(
        timeout(probe_timeout, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    );
    debug!("port probe for {}:{}: {}", ip, port, open);
    open
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn detects_open_and_closed_ports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_port_open("127.0.0.1", port, Duration::from_secs(2)).await);

        drop(listener);
        assert!(!is_port_open("127.0.0.1", port, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn bad_address_is_closed() {
        assert!(!is_port_open("not-an-ip..", 22, Duration::from_millis(200)).await);
    }

    #[tokio::test]
    async fn unparsable_address_is_unreachable() {
        assert!(!is_reachable("999.999.999.999", Duration::from_millis(200)).await);
    }
}
