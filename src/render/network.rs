use std::fmt;

use super::AUTOGENERATED;
use crate::wg::{Cidr, config::WgConfig};

const SUPPRESS_RULE_PRIORITY: u32 = 32764;
const MARK_RULE_PRIORITY: u32 = 32765;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ActivationPolicy {
    Manual,
    #[default]
    Up,
}

impl fmt::Display for ActivationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActivationPolicy::Manual => write!(f, "manual"),
            ActivationPolicy::Up => write!(f, "up"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PolicyFamily {
    Ipv4,
    Ipv6,
    Both,
}

impl PolicyFamily {
    fn of(defaults: impl Iterator<Item = Cidr>) -> Option<Self> {
        let (mut v4, mut v6) = (false, false);
        for cidr in defaults {
            if cidr.is_ipv4() {
                v4 = true;
            } else {
                v6 = true;
            }
        }

        match (v4, v6) {
            (true, true) => Some(PolicyFamily::Both),
            (true, false) => Some(PolicyFamily::Ipv4),
            (false, true) => Some(PolicyFamily::Ipv6),
            (false, false) => None,
        }
    }
}

impl fmt::Display for PolicyFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyFamily::Ipv4 => write!(f, "ipv4"),
            PolicyFamily::Ipv6 => write!(f, "ipv6"),
            PolicyFamily::Both => write!(f, "both"),
        }
    }
}

pub struct NetworkUnit<'a> {
    cfg: &'a WgConfig,
    activation: ActivationPolicy,
}

impl<'a> NetworkUnit<'a> {
    pub fn new(cfg: &'a WgConfig, activation: ActivationPolicy) -> Self {
        Self { cfg, activation }
    }

    /// Allowed IPs of every peer, first occurrence wins, loopback dropped.
    fn routes(&self) -> Vec<Cidr> {
        let mut routes: Vec<Cidr> = Vec::new();

        for cidr in self.cfg.peers.iter().flat_map(|peer| &peer.allowed_ips) {
            if cidr.ip.is_loopback() || routes.contains(cidr) {
                continue;
            }
            routes.push(*cidr);
        }

        routes
    }
}

impl fmt::Display for NetworkUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.cfg.interface;
        let has_default_route = self.cfg.has_default_route();

        writeln!(f, "{AUTOGENERATED}")?;
        writeln!(f, "[Match]")?;
        writeln!(f, "Name = {}", iface.name)?;
        writeln!(f)?;

        writeln!(f, "[Link]")?;
        writeln!(f, "ActivationPolicy = {}", self.activation)?;
        if let Some(mtu) = iface.mtu {
            writeln!(f, "MTUBytes = {mtu}")?;
        }
        writeln!(f)?;

        writeln!(f, "[Network]")?;
        for addr in &iface.address {
            writeln!(f, "Address = {addr}")?;
        }

        for dns in &iface.dns {
            writeln!(f, "DNS = {dns}")?;
        }

        if !iface.domains.is_empty() {
            writeln!(f, "Domains = {}", iface.domains.join(" "))?;
        }

        if has_default_route && !iface.dns.is_empty() {
            writeln!(f, "Domains = ~.")?;
        }

        writeln!(f)?;

        if !iface.should_create_routes() {
            return Ok(());
        }

        let mark = iface.routing_mark();
        let mark_table = iface.routing_table();
        let table = if has_default_route {
            Some(mark_table)
        } else {
            iface.table.id()
        };

        let routes = self.routes();
        for cidr in &routes {
            writeln!(f, "[Route]")?;
            writeln!(f, "Destination = {cidr}")?;
            if let Some(table) = table {
                writeln!(f, "Table = {table}")?;
            }
            writeln!(f)?;
        }

        if let Some(family) = PolicyFamily::of(routes.into_iter().filter(Cidr::is_default)) {
            writeln!(f, "[RoutingPolicyRule]")?;
            writeln!(f, "SuppressPrefixLength = 0")?;
            writeln!(f, "Family = {family}")?;
            writeln!(f, "Priority = {SUPPRESS_RULE_PRIORITY}")?;
            writeln!(f)?;

            writeln!(f, "[RoutingPolicyRule]")?;
            writeln!(f, "FirewallMark = {mark:#x}")?;
            writeln!(f, "InvertRule = true")?;
            writeln!(f, "Table = {mark_table}")?;
            writeln!(f, "Family = {family}")?;
            writeln!(f, "Priority = {MARK_RULE_PRIORITY}")?;
            writeln!(f)?;
        }

        Ok(())
    }
}

pub fn render_network(cfg: &WgConfig, activation: ActivationPolicy) -> String {
    NetworkUnit::new(cfg, activation).to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::wg::deterministic_mark;

    #[test]
    fn test_render_network_split_tunnel() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24, fd00::1/64
DNS = 10.0.0.53, lan.example
MTU = 1420
Table = 42

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 10.0.0.2/32, 192.168.10.0/24, 127.0.0.1/32

[Peer]
PublicKey = sMYYPASxJslAuszh5PgUPysrzZHHBOzawJ8PFbRQrHI=
AllowedIPs = 192.168.10.0/24, fd00::3/128
",
        )
        .unwrap();

        assert_eq!(
            render_network(&cfg, ActivationPolicy::Up),
            "# Autogenerated by wg2nd
[Match]
Name = wg0

[Link]
ActivationPolicy = up
MTUBytes = 1420

[Network]
Address = 10.0.0.1/24
Address = fd00::1/64
DNS = 10.0.0.53
Domains = lan.example

[Route]
Destination = 10.0.0.2/32
Table = 42

[Route]
Destination = 192.168.10.0/24
Table = 42

[Route]
Destination = fd00::3/128
Table = 42

"
        );
    }

    // Default routes are routed into the mark table, and a pair of policy
    // rules sends unmarked traffic there while keeping the main table's
    // more specific routes.
    #[test]
    fn test_render_network_default_route() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.14.123.142/32
DNS = 10.0.0.2
FwMark = 0xca6c

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 0.0.0.0/0
Endpoint = vpn.example:51820
",
        )
        .unwrap();

        assert_eq!(
            render_network(&cfg, ActivationPolicy::Manual),
            "# Autogenerated by wg2nd
[Match]
Name = wg0

[Link]
ActivationPolicy = manual

[Network]
Address = 10.14.123.142/32
DNS = 10.0.0.2
Domains = ~.

[Route]
Destination = 0.0.0.0/0
Table = 51820

[RoutingPolicyRule]
SuppressPrefixLength = 0
Family = ipv4
Priority = 32764

[RoutingPolicyRule]
FirewallMark = 0xca6c
InvertRule = true
Table = 51820
Family = ipv4
Priority = 32765

"
        );
    }

    #[test]
    fn test_policy_family_both() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 0.0.0.0/0, ::/0
",
        )
        .unwrap();

        let network = render_network(&cfg, ActivationPolicy::Up);
        assert_eq!(network.matches("Family = both\n").count(), 2);
        assert!(network.contains(&format!("Table = {}\n", cfg.interface.routing_table())));
        assert!(!network.contains("Domains"));
    }

    #[test]
    fn test_mark_naming_main_table() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24
FwMark = 254

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 0.0.0.0/0
",
        )
        .unwrap();

        let table = deterministic_mark("wg0");
        assert_eq!(cfg.interface.routing_mark(), 254);
        assert_eq!(cfg.interface.routing_table(), table);

        let network = render_network(&cfg, ActivationPolicy::Up);
        assert!(network.contains("FirewallMark = 0xfe\n"));
        assert!(!network.contains("Table = 254\n"));
        assert_eq!(network.matches(&format!("Table = {table}\n")).count(), 2);
    }

    #[test]
    fn test_table_off_has_no_routes() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24
Table = off

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 0.0.0.0/0
",
        )
        .unwrap();

        let network = render_network(&cfg, ActivationPolicy::Up);
        assert!(network.ends_with("[Network]\nAddress = 10.0.0.1/24\n\n"));
        assert!(!network.contains("[Route]"));
        assert!(!network.contains("[RoutingPolicyRule]"));
    }

    #[test]
    fn test_auto_table_routes_untagged() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 10.0.0.0/24
",
        )
        .unwrap();

        let network = render_network(&cfg, ActivationPolicy::Up);
        assert!(network.ends_with("[Route]\nDestination = 10.0.0.0/24\n\n"));
    }
}
