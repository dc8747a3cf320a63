//! Node address discovery.

use std::net::Ipv4Addr;

/// Whether `ip` is an RFC1918 private IPv4 address.
pub fn is_private_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok_and(|addr| addr.is_private())
}

/// Bridges and overlays created by the container runtime and the cluster.
const VIRTUAL_INTERFACES: [&str; 6] = ["lo", "docker", "br-", "veth", "cni", "flannel"];

/// First `(interface, address)` with a private address in the output of
/// `ip -o -4 addr show`, ignoring virtual interfaces.
pub fn private_interface(ip_output: &str) -> Option<(String, String)> {
    ip_output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let inet = fields.iter().position(|f| *f == "inet")?;
        let iface = fields.get(1)?.trim_end_matches(':');
        if VIRTUAL_INTERFACES.iter().any(|v| iface.starts_with(v)) {
            return None;
        }
        let address = fields.get(inet + 1)?.split('/').next()?;
        is_private_ipv4(address).then(|| (iface.to_string(), address.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const IP_OUTPUT: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
2: eth0    inet 203.0.113.7/32 metric 100 scope global dynamic eth0\\       valid_lft 86000sec
3: docker0    inet 172.17.0.1/16 brd 172.17.255.255 scope global docker0\\       valid_lft forever
4: enp7s0    inet 10.0.0.2/32 brd 10.0.0.2 scope global dynamic enp7s0\\       valid_lft 86000sec";

    #[test]
    fn rfc1918_ranges() {
        assert!(is_private_ipv4("10.1.2.3"));
        assert!(is_private_ipv4("172.16.0.1"));
        assert!(is_private_ipv4("172.31.255.255"));
        assert!(!is_private_ipv4("172.32.0.1"));
        assert!(is_private_ipv4("192.168.1.1"));
        assert!(!is_private_ipv4("203.0.113.7"));
        assert!(!is_private_ipv4("not-an-ip"));
        assert!(!is_private_ipv4("10.0.0"));
        assert!(!is_private_ipv4("10.0.0.256"));
        assert!(!is_private_ipv4("127.0.0.1"));
    }

    #[test]
    fn skips_runtime_bridges() {
        assert_eq!(
            private_interface(IP_OUTPUT),
            Some(("enp7s0".to_string(), "10.0.0.2".to_string()))
        );
    }

    #[test]
    fn first_private_match_wins() {
        let output = "2: ens10    inet 192.168.0.4/24 scope global ens10\n\
                      3: enp7s0    inet 10.0.0.2/32 scope global enp7s0";
        assert_eq!(
            private_interface(output),
            Some(("ens10".to_string(), "192.168.0.4".to_string()))
        );
    }

    #[test]
    fn none_without_private_address() {
        assert_eq!(
            private_interface("2: eth0    inet 203.0.113.7/32 scope global eth0"),
            None
        );
    }
}
