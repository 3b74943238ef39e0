use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

// RPC endpoint mapper and SMB, both needed for remote registry and remote execution
const PROBE_PORTS: [u16; 2] = [135, 445];

pub fn local_host_name() -> String {
    std::env::var("COMPUTERNAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

pub fn is_local(host: &str) -> bool {
    let h = host.trim();
    if h.is_empty() || h == "." || h.eq_ignore_ascii_case("localhost") || h == "127.0.0.1" || h == "::1" { return true; }
    let local = local_host_name();
    let short = h.split('.').next().unwrap_or(h);
    h.eq_ignore_ascii_case(&local) || short.eq_ignore_ascii_case(&local)
}

/// Local host is always reachable; remote hosts must accept a TCP connection on an RPC/SMB port.
pub fn is_reachable(host: &str, timeout: Duration) -> bool {
    if is_local(host) { return true; }
    for port in PROBE_PORTS {
        let addrs = match (host.trim(), port).to_socket_addrs() {
            Ok(a) => a,
            Err(e) => { log::debug!("Resolve failed for {}: {}", host, e); return false; }
        };
        for addr in addrs {
            if TcpStream::connect_timeout(&addr, timeout).is_ok() {
                log::trace!("{} reachable on {}", host, addr);
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_aliases() {
        assert!(is_local("localhost"));
        assert!(is_local("LOCALHOST"));
        assert!(is_local("."));
        assert!(is_local(""));
        assert!(is_local("127.0.0.1"));
        assert!(is_local(&local_host_name()));
        assert!(!is_local("definitely-not-this-box-7f3a"));
    }

    #[test]
    fn local_is_reachable_without_probe() {
        assert!(is_reachable("localhost", Duration::from_millis(1)));
    }

    #[test]
    fn unresolvable_host_is_unreachable() {
        assert!(!is_reachable("no-such-host.invalid", Duration::from_millis(200)));
    }
}
