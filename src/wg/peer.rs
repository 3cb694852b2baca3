use super::{Cidr, Endpoint, Key, Secret, instance::ExtraFields};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgConfigPeer {
    // PublicKey
    pub public_key: Key,

    // PresharedKey
    pub preshared_key: Option<Secret>,

    // Endpoint
    pub endpoint: Option<Endpoint>,

    // AllowedIPs
    pub allowed_ips: Vec<Cidr>,

    // PersistentKeepalive
    pub persistent_keepalive: Option<u16>,

    pub extra: ExtraFields,
}

impl WgConfigPeer {
    pub fn has_default_route(&self) -> bool {
        self.allowed_ips.iter().any(Cidr::is_default)
    }
}
