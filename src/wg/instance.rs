use std::{net::IpAddr, str::FromStr};

use super::{Cidr, LOCAL_TABLE, MAIN_TABLE, Secret, ValueError, deterministic_mark};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgConfigInterface {
    // file stem, or an explicit name
    pub name: String,

    // PrivateKey
    pub private_key: Secret,

    // Address
    pub address: Vec<Cidr>,

    // ListenPort
    pub listen_port: Option<u16>,

    // MTU
    pub mtu: Option<u16>,

    // DNS, address entries
    pub dns: Vec<IpAddr>,

    // DNS, search domain entries
    pub domains: Vec<String>,

    // Table
    pub table: Table,

    // FwMark
    pub fwmark: Option<u32>,

    // PreUp, PostUp, PreDown, PostDown
    pub firewall_hooks: Vec<Hook>,

    // SaveConfig
    pub save_config: Option<bool>,

    pub extra: ExtraFields,
}

impl WgConfigInterface {
    pub fn should_create_routes(&self) -> bool {
        self.table != Table::Off
    }

    /// Firewall mark used for default-route policy routing.
    pub fn routing_mark(&self) -> u32 {
        self.fwmark
            .unwrap_or_else(|| deterministic_mark(&self.name))
    }

    /// Routing table for default routes. Equal to the mark, unless the mark
    /// would name the main or local table.
    pub fn routing_table(&self) -> u32 {
        match self.routing_mark() {
            MAIN_TABLE | LOCAL_TABLE => deterministic_mark(&self.name),
            mark => mark,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    #[default]
    Auto,
    Off,
    Main,
    Local,
    Id(u32),
}

impl Table {
    /// Numeric table id, `None` for `auto` and `off`.
    pub fn id(&self) -> Option<u32> {
        match self {
            Table::Auto | Table::Off => None,
            Table::Main => Some(MAIN_TABLE),
            Table::Local => Some(LOCAL_TABLE),
            Table::Id(id) => Some(*id),
        }
    }
}

impl FromStr for Table {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "off" => Table::Off,
            "auto" => Table::Auto,
            "main" => Table::Main,
            "local" => Table::Local,
            num => match num.parse::<u32>() {
                Ok(0) => return Err(ValueError::OutOfRange(format!("table {num}"))),
                Ok(MAIN_TABLE) => Table::Main,
                Ok(LOCAL_TABLE) => Table::Local,
                Ok(id) => Table::Id(id),
                Err(_) => {
                    return Err(ValueError::Keyword {
                        expected: "off, auto, main, local or a table number",
                        got: s.to_string(),
                    });
                }
            },
        })
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Table::Auto => write!(f, "auto"),
            Table::Off => write!(f, "off"),
            Table::Main => write!(f, "main"),
            Table::Local => write!(f, "local"),
            Table::Id(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    PreUp,
    PostUp,
    PreDown,
    PostDown,
}

impl HookStage {
    pub fn is_up(&self) -> bool {
        matches!(self, HookStage::PreUp | HookStage::PostUp)
    }
}

impl std::fmt::Display for HookStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HookStage::PreUp => "PreUp",
            HookStage::PostUp => "PostUp",
            HookStage::PreDown => "PreDown",
            HookStage::PostDown => "PostDown",
        })
    }
}

/// One `PreUp=`/`PostUp=`/`PreDown=`/`PostDown=` line, kept as free text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hook {
    pub stage: HookStage,
    pub command: String,
    pub line: usize,
}

/// Unrecognized `Key = Value` pairs of one section, in source order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExtraFields(Vec<(String, String)>);

impl ExtraFields {
    pub fn push(&mut self, key: &str, value: &str) {
        self.0.push((key.to_string(), value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
