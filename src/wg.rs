use base64::prelude::*;
use hashes::sha2::sha256;
use std::{
    net::{AddrParseError, IpAddr, SocketAddr},
    num::ParseIntError,
    str::FromStr,
};

pub mod config;
pub mod instance;
pub mod peer;

pub type DecodeError = base64::DecodeSliceError;

pub const KEY_LEN: usize = 32;

/// Failure of a single value to match its field's grammar.
#[derive(Debug, thiserror::Error)]
pub enum ValueError {
    #[error("key decode error: {0}")]
    KeyDecode(#[from] DecodeError),

    #[error("key must decode to 32 bytes, got {0}")]
    KeyLength(usize),

    #[error("addr parse error: {0}")]
    Addr(#[from] AddrParseError),

    #[error("int parse error: {0}")]
    Int(#[from] ParseIntError),

    #[error("prefix length {mask} exceeds {max}")]
    PrefixLength { mask: u32, max: u32 },

    #[error("endpoint must be host:port, got {0:?}")]
    Endpoint(String),

    #[error("expected one of {expected}, got {got:?}")]
    Keyword {
        expected: &'static str,
        got: String,
    },

    #[error("{0} out of range")]
    OutOfRange(String),

    #[error("duplicate entry {0}")]
    Duplicate(String),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Key([u8; KEY_LEN]);

impl FromStr for Key {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut inner = [0u8; KEY_LEN];
        let len = BASE64_STANDARD.decode_slice(s, &mut inner)?;
        if len != KEY_LEN {
            return Err(ValueError::KeyLength(len));
        }

        Ok(Key(inner))
    }
}

#[cfg(test)]
impl Key {
    pub fn random() -> Key {
        Key(rand::random())
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", BASE64_STANDARD.encode(self.0))
    }
}

/// Private or preshared key material.
///
/// No `Display`. The encoded value is only reachable through
/// [`Secret::expose`], called from the keyfile and inline-netdev render paths.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Key);

impl Secret {
    pub(crate) fn expose(&self) -> String {
        self.0.to_string()
    }
}

impl From<Key> for Secret {
    fn from(key: Key) -> Self {
        Secret(key)
    }
}

impl FromStr for Secret {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret(s.parse()?))
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    pub ip: IpAddr,
    pub mask: u8,
}

impl Cidr {
    pub fn is_ipv4(&self) -> bool {
        self.ip.is_ipv4()
    }

    // 0.0.0.0/0 or ::/0
    pub fn is_default(&self) -> bool {
        self.mask == 0 && self.ip.is_unspecified()
    }
}

impl FromStr for Cidr {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, mask) = s.split_once('/').unwrap_or((s, ""));
        let ip: IpAddr = ip.trim().parse()?;
        let mask = mask.trim();

        let max = if ip.is_ipv4() { 32 } else { 128 };
        let mask: u32 = if !mask.is_empty() { mask.parse()? } else { max };
        if mask > max {
            return Err(ValueError::PrefixLength { mask, max });
        }

        Ok(Cidr {
            ip,
            mask: mask as _,
        })
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.ip, self.mask)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Domain(String),
    Ip(SocketAddr),
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Domain(dom) => write!(f, "{dom}"),
            Endpoint::Ip(addr) => write!(f, "{addr}"),
        }
    }
}

impl FromStr for Endpoint {
    type Err = ValueError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(addr) = s.parse() {
            return Ok(Self::Ip(addr));
        }

        match s.rsplit_once(':') {
            Some((host, port))
                if !host.is_empty() && !host.contains(':') && port.parse::<u16>().is_ok() =>
            {
                Ok(Self::Domain(s.to_string()))
            }
            _ => Err(ValueError::Endpoint(s.to_string())),
        }
    }
}

pub(crate) const MAIN_TABLE: u32 = 254;
pub(crate) const LOCAL_TABLE: u32 = 255;

/// Mark and table id shared by the policy routing rules and the firewall.
///
/// Derived from the interface name only, so regenerating a config always
/// yields the same value. 0 and the reserved main/local tables are skipped.
pub fn deterministic_mark(interface_name: &str) -> u32 {
    let mut round = 0u32;
    loop {
        let input = if round == 0 {
            interface_name.to_string()
        } else {
            format!("{interface_name}#{round}")
        };

        let digest = sha256::hash(input.as_bytes()).into_bytes();
        let mark = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
        if mark != 0 && mark != MAIN_TABLE && mark != LOCAL_TABLE {
            return mark;
        }

        round += 1;
    }
}
