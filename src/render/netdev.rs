use std::fmt;

use super::{AUTOGENERATED, KeyMode, keyfile::KeyPurpose};
use crate::wg::{config::WgConfig, instance::Table};

pub struct NetdevUnit<'a> {
    cfg: &'a WgConfig,
    key_mode: KeyMode<'a>,
}

impl<'a> NetdevUnit<'a> {
    pub fn new(cfg: &'a WgConfig, key_mode: KeyMode<'a>) -> Self {
        Self { cfg, key_mode }
    }
}

impl fmt::Display for NetdevUnit<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.cfg.interface;

        writeln!(f, "{AUTOGENERATED}")?;
        writeln!(f, "[NetDev]")?;
        writeln!(f, "Name = {}", iface.name)?;
        writeln!(f, "Kind = wireguard")?;
        writeln!(f, "Description = {} - wireguard tunnel", iface.name)?;
        writeln!(f)?;

        writeln!(f, "[WireGuard]")?;
        match self.key_mode {
            KeyMode::Inline => writeln!(f, "PrivateKey = {}", iface.private_key.expose())?,
            KeyMode::Keyfile(layout) => writeln!(
                f,
                "PrivateKeyFile = {}",
                layout.path(&iface.name, KeyPurpose::Private).display()
            )?,
        }

        if let Some(port) = iface.listen_port {
            writeln!(f, "ListenPort = {port}")?;
        }

        if iface.should_create_routes() && iface.table != Table::Auto {
            writeln!(f, "RouteTable = {}", iface.table)?;
        }

        if iface.should_create_routes() && self.cfg.has_default_route() {
            writeln!(f, "FirewallMark = {:#x}", iface.routing_mark())?;
        }

        writeln!(f)?;

        for (idx, peer) in self.cfg.peers.iter().enumerate() {
            writeln!(f, "[WireGuardPeer]")?;
            writeln!(f, "PublicKey = {}", peer.public_key)?;

            if let Some(endpoint) = &peer.endpoint {
                writeln!(f, "Endpoint = {endpoint}")?;
            }

            if let Some(psk) = &peer.preshared_key {
                match self.key_mode {
                    KeyMode::Inline => writeln!(f, "PresharedKey = {}", psk.expose())?,
                    KeyMode::Keyfile(layout) => writeln!(
                        f,
                        "PresharedKeyFile = {}",
                        layout
                            .path(&iface.name, KeyPurpose::Preshared(idx))
                            .display()
                    )?,
                }
            }

            let allowed_ips = peer
                .allowed_ips
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            writeln!(f, "AllowedIPs = {allowed_ips}")?;

            if let Some(keepalive) = peer.persistent_keepalive {
                writeln!(f, "PersistentKeepalive = {keepalive}")?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

pub fn render_netdev(cfg: &WgConfig, key_mode: KeyMode<'_>) -> String {
    NetdevUnit::new(cfg, key_mode).to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::render::keyfile::{KeyfileLayout, render_keyfiles};

    const CONFIG: &str = "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24
ListenPort = 51820
Table = 42

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 10.0.0.2/32, 192.168.10.0/24
Endpoint = 203.0.113.1:51820
PersistentKeepalive = 25
PresharedKey = KIst3pK+YVHmM5k7NbNULKd2px9vaRsFi/y4E7NDWDQ=

[Peer]
PublicKey = sMYYPASxJslAuszh5PgUPysrzZHHBOzawJ8PFbRQrHI=
AllowedIPs = 10.0.0.3/32
";

    #[test]
    fn test_render_netdev_keyfiles() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let layout = KeyfileLayout::default();

        assert_eq!(
            render_netdev(&cfg, KeyMode::Keyfile(&layout)),
            "# Autogenerated by wg2nd
[NetDev]
Name = wg0
Kind = wireguard
Description = wg0 - wireguard tunnel

[WireGuard]
PrivateKeyFile = /etc/systemd/network/wg0.privkey
ListenPort = 51820
RouteTable = 42

[WireGuardPeer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
Endpoint = 203.0.113.1:51820
PresharedKeyFile = /etc/systemd/network/wg0.peer1.symkey
AllowedIPs = 10.0.0.2/32,192.168.10.0/24
PersistentKeepalive = 25

[WireGuardPeer]
PublicKey = sMYYPASxJslAuszh5PgUPysrzZHHBOzawJ8PFbRQrHI=
AllowedIPs = 10.0.0.3/32

"
        );
    }

    #[test]
    fn test_render_netdev_inline() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let netdev = render_netdev(&cfg, KeyMode::Inline);

        assert!(netdev.contains("PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=\n"));
        assert!(netdev.contains("PresharedKey = KIst3pK+YVHmM5k7NbNULKd2px9vaRsFi/y4E7NDWDQ=\n"));
        assert!(!netdev.contains("KeyFile"));
    }

    #[test]
    fn test_keyfile_mode_leaks_no_secrets() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let layout = KeyfileLayout::new("/run/wg");
        let netdev = render_netdev(&cfg, KeyMode::Keyfile(&layout));

        let keyfiles = render_keyfiles(&cfg, &layout);
        assert_eq!(keyfiles.len(), 2);

        for keyfile in keyfiles.values() {
            assert!(!netdev.contains(keyfile.contents().trim()));
            assert!(netdev.contains(&keyfile.path.display().to_string()));
        }
    }

    #[test]
    fn test_default_route_sets_mark() {
        let cfg = WgConfig::parse_config(
            "wg0",
            "[Interface]
PrivateKey = cJgeEfHUay0aKpV+k1lFK9nq9JJcqzKm8+Wh3EGtg1c=
Address = 10.0.0.1/24
FwMark = 51820

[Peer]
PublicKey = kB9CSPsPS5irR0ZpVAHZKPNHLQKjIFjmgc6MSCAiWUs=
AllowedIPs = 0.0.0.0/0
",
        )
        .unwrap();

        let netdev = render_netdev(&cfg, KeyMode::Inline);
        assert!(netdev.contains("FirewallMark = 0xca6c\n"));
        assert!(!netdev.contains("RouteTable"));
    }

    #[test]
    fn test_table_off_disables_routing() {
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

        let netdev = render_netdev(&cfg, KeyMode::Inline);
        assert!(!netdev.contains("FirewallMark"));
        assert!(!netdev.contains("RouteTable"));
    }

    #[test]
    fn test_render_is_deterministic() {
        let cfg = WgConfig::parse_config("wg0", CONFIG).unwrap();
        let layout = KeyfileLayout::default();

        assert_eq!(
            render_netdev(&cfg, KeyMode::Keyfile(&layout)),
            render_netdev(&cfg.clone(), KeyMode::Keyfile(&layout))
        );
    }
}
