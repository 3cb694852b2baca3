use std::{
    collections::{HashMap, hash_map::Entry},
    net::IpAddr,
    path::Path,
    result::Result,
    str::FromStr,
};

use super::{
    Cidr, Endpoint, Key, Secret, ValueError,
    instance::{ExtraFields, Hook, HookStage, Table, WgConfigInterface},
    peer::WgConfigPeer,
};

pub const DEFAULT_INTERFACE_NAME: &str = "wg";
const MAX_INTERFACE_NAME_LEN: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgConfig {
    pub interface: WgConfigInterface,
    pub peers: Vec<WgConfigPeer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Interface,
    Peer,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Section::Interface => write!(f, "Interface"),
            Section::Peer => write!(f, "Peer"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("no [Interface] section")]
    MissingInterfaceSection,

    #[error("line {line}: [{section}] section missing essential field \"{key}\"")]
    MissingRequiredField {
        section: Section,
        key: &'static str,
        line: usize,
    },

    #[error("line {line}: invalid value for \"{key}\": {source}")]
    MalformedValue {
        line: usize,
        key: String,
        source: ValueError,
    },

    #[error("line {line}: public key already used by the peer at line {first}")]
    DuplicatePeerKey { line: usize, first: usize },

    #[error("line {line}: default routes exist on multiple peers")]
    MultipleDefaultRoutes { line: usize },

    #[error("line {line}: expected key-value pair, got {got:?}")]
    ExpectedKeyValue { line: usize, got: String },

    #[error("line {line}: unexpected key outside of section: {key}")]
    KeyOutsideSection { line: usize, key: String },

    #[error("line {line}: unknown section [{name}]")]
    UnknownSection { line: usize, name: String },

    #[error("invalid interface name {0:?}")]
    InvalidInterfaceName(String),
}

impl ParseError {
    pub fn line(&self) -> Option<usize> {
        match self {
            ParseError::MissingInterfaceSection | ParseError::InvalidInterfaceName(_) => None,
            ParseError::MissingRequiredField { line, .. }
            | ParseError::MalformedValue { line, .. }
            | ParseError::DuplicatePeerKey { line, .. }
            | ParseError::MultipleDefaultRoutes { line }
            | ParseError::ExpectedKeyValue { line, .. }
            | ParseError::KeyOutsideSection { line, .. }
            | ParseError::UnknownSection { line, .. } => Some(*line),
        }
    }
}

struct List<I>(Vec<I>);
impl<I: FromStr> FromStr for List<I> {
    type Err = I::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut items = Vec::new();

        for s in s.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            items.push(s.parse()?);
        }

        Ok(List(items))
    }
}

// `off` or a plain value
struct Toggle<I>(Option<I>);
impl<I: FromStr> FromStr for Toggle<I> {
    type Err = I::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("off") {
            return Ok(Toggle(None));
        }

        Ok(Toggle(Some(s.parse()?)))
    }
}

struct Mark(u32);
impl FromStr for Mark {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mark = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16)?,
            None => s.parse()?,
        };
        Ok(Mark(mark))
    }
}

struct Flag(bool);
impl FromStr for Flag {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "true" => Ok(Flag(true)),
            "false" => Ok(Flag(false)),
            _ => Err(ValueError::Keyword {
                expected: "true or false",
                got: s.to_string(),
            }),
        }
    }
}

enum WgPropKind {
    PublicKey,
    PresharedKey,
    Endpoint,
    AllowedIPs,
    PersistentKeepalive,
    Unknown,
    PrivateKey,
    Address,
    ListenPort,
    PostUp,
    PostDown,
    PreUp,
    PreDown,
    FWMark,
    Table,
    MTU,
    DNS,
    SaveConfig,
}

impl From<&str> for WgPropKind {
    fn from(key: &str) -> Self {
        match key.to_ascii_lowercase().as_str() {
            "publickey" => WgPropKind::PublicKey,
            "presharedkey" => WgPropKind::PresharedKey,
            "endpoint" => WgPropKind::Endpoint,
            "allowedips" => WgPropKind::AllowedIPs,
            "persistentkeepalive" => WgPropKind::PersistentKeepalive,
            "privatekey" => WgPropKind::PrivateKey,
            "listenport" => WgPropKind::ListenPort,
            "postup" => WgPropKind::PostUp,
            "postdown" => WgPropKind::PostDown,
            "preup" => WgPropKind::PreUp,
            "predown" => WgPropKind::PreDown,
            "fwmark" => WgPropKind::FWMark,
            "dns" => WgPropKind::DNS,
            "mtu" => WgPropKind::MTU,
            "address" => WgPropKind::Address,
            "table" => WgPropKind::Table,
            "saveconfig" => WgPropKind::SaveConfig,
            _ => WgPropKind::Unknown,
        }
    }
}

fn value<M>(key: &str, value: &str, line: usize) -> Result<M, ParseError>
where
    M: FromStr,
    M::Err: Into<ValueError>,
{
    value.parse().map_err(|err: M::Err| ParseError::MalformedValue {
        line,
        key: key.to_string(),
        source: err.into(),
    })
}

#[derive(Default)]
struct InterfaceDraft {
    line: usize,
    private_key: Option<Secret>,
    address: Vec<Cidr>,
    listen_port: Option<u16>,
    mtu: Option<u16>,
    dns: Vec<IpAddr>,
    domains: Vec<String>,
    table: Table,
    fwmark: Option<u32>,
    firewall_hooks: Vec<Hook>,
    save_config: Option<bool>,
    extra: ExtraFields,
}

impl InterfaceDraft {
    fn assign(&mut self, key: &str, val: &str, line: usize) -> Result<(), ParseError> {
        let hook = |stage: HookStage| Hook {
            stage,
            command: val.to_string(),
            line,
        };

        match WgPropKind::from(key) {
            WgPropKind::PrivateKey => self.private_key = Some(value(key, val, line)?),
            WgPropKind::Address => self
                .address
                .extend(value::<List<Cidr>>(key, val, line)?.0),
            WgPropKind::ListenPort => self.listen_port = Some(value(key, val, line)?),
            WgPropKind::MTU => self.mtu = Some(value(key, val, line)?),
            WgPropKind::DNS => {
                for entry in val.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                    match entry.parse::<IpAddr>() {
                        Ok(ip) => self.dns.push(ip),
                        Err(_) if entry.contains(char::is_whitespace) => {
                            return Err(ParseError::MalformedValue {
                                line,
                                key: key.to_string(),
                                source: ValueError::Keyword {
                                    expected: "an address or a search domain",
                                    got: entry.to_string(),
                                },
                            });
                        }
                        Err(_) => self.domains.push(entry.to_string()),
                    }
                }
            }
            WgPropKind::Table => self.table = value(key, val, line)?,
            WgPropKind::FWMark => {
                self.fwmark = value::<Toggle<Mark>>(key, val, line)?
                    .0
                    .map(|mark| mark.0)
                    .filter(|mark| *mark != 0)
            }
            WgPropKind::PreUp => self.firewall_hooks.push(hook(HookStage::PreUp)),
            WgPropKind::PostUp => self.firewall_hooks.push(hook(HookStage::PostUp)),
            WgPropKind::PreDown => self.firewall_hooks.push(hook(HookStage::PreDown)),
            WgPropKind::PostDown => self.firewall_hooks.push(hook(HookStage::PostDown)),
            WgPropKind::SaveConfig => self.save_config = Some(value::<Flag>(key, val, line)?.0),
            _ => self.extra.push(key, val),
        }

        Ok(())
    }

    fn finish(self, name: String) -> Result<WgConfigInterface, ParseError> {
        let missing = |key| ParseError::MissingRequiredField {
            section: Section::Interface,
            key,
            line: self.line,
        };

        let private_key = self.private_key.ok_or_else(|| missing("PrivateKey"))?;
        if self.address.is_empty() {
            return Err(missing("Address"));
        }

        Ok(WgConfigInterface {
            name,
            private_key,
            address: self.address,
            listen_port: self.listen_port,
            mtu: self.mtu,
            dns: self.dns,
            domains: self.domains,
            table: self.table,
            fwmark: self.fwmark,
            firewall_hooks: self.firewall_hooks,
            save_config: self.save_config,
            extra: self.extra,
        })
    }
}

#[derive(Default)]
struct PeerDraft {
    line: usize,
    public_key: Option<(Key, usize)>,
    preshared_key: Option<Secret>,
    endpoint: Option<Endpoint>,
    allowed_ips: Vec<Cidr>,
    default_route_line: Option<usize>,
    persistent_keepalive: Option<u16>,
    extra: ExtraFields,
}

impl PeerDraft {
    fn assign(&mut self, key: &str, val: &str, line: usize) -> Result<(), ParseError> {
        match WgPropKind::from(key) {
            WgPropKind::PublicKey => self.public_key = Some((value(key, val, line)?, line)),
            WgPropKind::PresharedKey => self.preshared_key = Some(value(key, val, line)?),
            WgPropKind::Endpoint => self.endpoint = Some(value(key, val, line)?),
            WgPropKind::AllowedIPs => {
                for cidr in value::<List<Cidr>>(key, val, line)?.0 {
                    if self.allowed_ips.contains(&cidr) {
                        return Err(ParseError::MalformedValue {
                            line,
                            key: key.to_string(),
                            source: ValueError::Duplicate(cidr.to_string()),
                        });
                    }

                    if cidr.is_default() && self.default_route_line.is_none() {
                        self.default_route_line = Some(line);
                    }

                    self.allowed_ips.push(cidr);
                }
            }
            WgPropKind::PersistentKeepalive => {
                self.persistent_keepalive = value::<Toggle<u16>>(key, val, line)?.0
            }
            _ => self.extra.push(key, val),
        }

        Ok(())
    }

    fn finish(self) -> Result<(WgConfigPeer, usize), ParseError> {
        let missing = |key| ParseError::MissingRequiredField {
            section: Section::Peer,
            key,
            line: self.line,
        };

        let (public_key, key_line) = self.public_key.ok_or_else(|| missing("PublicKey"))?;
        if self.allowed_ips.is_empty() {
            return Err(missing("AllowedIPs"));
        }

        let peer = WgConfigPeer {
            public_key,
            preshared_key: self.preshared_key,
            endpoint: self.endpoint,
            allowed_ips: self.allowed_ips,
            persistent_keepalive: self.persistent_keepalive,
            extra: self.extra,
        };

        Ok((peer, key_line))
    }
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with(';') {
        return "";
    }

    match line.find('#') {
        Some(pos) => &line[..pos],
        None => line,
    }
}

pub fn interface_name_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| DEFAULT_INTERFACE_NAME.to_string())
}

fn validate_interface_name(name: &str) -> Result<(), ParseError> {
    let valid_char = |c: char| c.is_ascii_alphanumeric() || "_=+.-".contains(c);

    if name.is_empty() || name.len() > MAX_INTERFACE_NAME_LEN || !name.chars().all(valid_char) {
        return Err(ParseError::InvalidInterfaceName(name.to_string()));
    }

    Ok(())
}

impl WgConfig {
    /// Parses a wg-quick style config for the interface `name`.
    ///
    /// `\n` and `\r\n` line endings are accepted interchangeably.
    pub fn parse_config(name: &str, input: &str) -> Result<Self, ParseError> {
        validate_interface_name(name)?;

        let mut interface: Option<InterfaceDraft> = None;
        let mut peers: Vec<PeerDraft> = Vec::new();
        let mut section = None;

        for (idx, raw) in input.split('\n').enumerate() {
            let line_no = idx + 1;
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            let line = strip_comment(line).trim();

            if line.is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                let header = header.trim();
                if header.eq_ignore_ascii_case("interface") {
                    interface.get_or_insert_with(|| InterfaceDraft {
                        line: line_no,
                        ..Default::default()
                    });
                    section = Some(Section::Interface);
                } else if header.eq_ignore_ascii_case("peer") {
                    peers.push(PeerDraft {
                        line: line_no,
                        ..Default::default()
                    });
                    section = Some(Section::Peer);
                } else {
                    return Err(ParseError::UnknownSection {
                        line: line_no,
                        name: header.to_string(),
                    });
                }

                continue;
            }

            let Some((key, val)) = line.split_once('=') else {
                return Err(ParseError::ExpectedKeyValue {
                    line: line_no,
                    got: line.to_string(),
                });
            };
            let (key, val) = (key.trim(), val.trim());

            match (section, interface.as_mut(), peers.last_mut()) {
                (Some(Section::Interface), Some(iface), _) => iface.assign(key, val, line_no)?,
                (Some(Section::Peer), _, Some(peer)) => peer.assign(key, val, line_no)?,
                _ => {
                    return Err(ParseError::KeyOutsideSection {
                        line: line_no,
                        key: key.to_string(),
                    });
                }
            }
        }

        let interface = interface
            .ok_or(ParseError::MissingInterfaceSection)?
            .finish(name.to_string())?;

        let mut seen_keys: HashMap<Key, usize> = HashMap::new();
        let mut default_route_seen = false;
        let mut finished = Vec::with_capacity(peers.len());

        for peer in peers {
            let default_route_line = peer.default_route_line;
            let (peer, key_line) = peer.finish()?;

            match seen_keys.entry(peer.public_key) {
                Entry::Occupied(first) => {
                    return Err(ParseError::DuplicatePeerKey {
                        line: key_line,
                        first: *first.get(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(key_line);
                }
            }

            if let Some(line) = default_route_line {
                if default_route_seen {
                    return Err(ParseError::MultipleDefaultRoutes { line });
                }
                default_route_seen = true;
            }

            finished.push(peer);
        }

        log::debug!(
            "parsed [Interface] {} with {} peer(s)",
            interface.name,
            finished.len()
        );

        Ok(WgConfig {
            interface,
            peers: finished,
        })
    }

    pub fn has_default_route(&self) -> bool {
        self.peers.iter().any(WgConfigPeer::has_default_route)
    }

    /// Fields with no systemd-networkd counterpart, dropped from the output.
    pub fn unsupported_fields(&self) -> Vec<String> {
        let mut notes = Vec::new();

        if self.interface.save_config.is_some() {
            notes.push(
                "[Interface] field \"SaveConfig\" has no systemd-networkd analog, omitting"
                    .to_string(),
            );
        }

        for (key, _) in self.interface.extra.iter() {
            notes.push(format!("[Interface] unknown field \"{key}\", omitting"));
        }

        for (idx, peer) in self.peers.iter().enumerate() {
            for (key, _) in peer.extra.iter() {
                notes.push(format!("[Peer] #{} unknown field \"{key}\", omitting", idx + 1));
            }
        }

        notes
    }
}
