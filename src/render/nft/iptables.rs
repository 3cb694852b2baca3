//! Translation of single `iptables`/`ip6tables` invocations into nftables
//! rule expressions.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Family {
    Ipv4,
    Ipv6,
}

impl Family {
    // address expression prefix
    fn ip(&self) -> &'static str {
        match self {
            Family::Ipv4 => "ip",
            Family::Ipv6 => "ip6",
        }
    }

    fn nfproto(&self) -> &'static str {
        match self {
            Family::Ipv4 => "ipv4",
            Family::Ipv6 => "ipv6",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TableKind {
    Raw,
    Mangle,
    Nat,
    Filter,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TableKind::Raw => "raw",
            TableKind::Mangle => "mangle",
            TableKind::Nat => "nat",
            TableKind::Filter => "filter",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPoint {
    Prerouting,
    Input,
    Forward,
    Output,
    Postrouting,
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPoint::Prerouting => "prerouting",
            HookPoint::Input => "input",
            HookPoint::Forward => "forward",
            HookPoint::Output => "output",
            HookPoint::Postrouting => "postrouting",
        })
    }
}

/// A base chain: an iptables table bound to one netfilter hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chain {
    pub table: TableKind,
    pub hook: HookPoint,
}

impl Chain {
    fn new(table: TableKind, hook: HookPoint) -> Option<Self> {
        use HookPoint::*;

        let valid = match table {
            TableKind::Filter => matches!(hook, Input | Forward | Output),
            TableKind::Nat => matches!(hook, Prerouting | Input | Output | Postrouting),
            TableKind::Mangle => true,
            TableKind::Raw => matches!(hook, Prerouting | Output),
        };

        valid.then_some(Chain { table, hook })
    }

    pub fn name(&self) -> String {
        format!("{}_{}", self.table, self.hook)
    }

    /// `type ... hook ... priority ...;` line of the chain declaration.
    pub fn declaration(&self) -> String {
        let kind = match self.table {
            TableKind::Nat => "nat",
            _ => "filter",
        };

        let priority = match (self.table, self.hook) {
            (TableKind::Nat, HookPoint::Prerouting | HookPoint::Output) => "dstnat",
            (TableKind::Nat, _) => "srcnat",
            (TableKind::Mangle, _) => "mangle",
            (TableKind::Raw, _) => "raw",
            (TableKind::Filter, _) => "filter",
        };

        format!(
            "type {kind} hook {} priority {priority}; policy accept;",
            self.hook
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Append,
    Insert,
    Delete,
}

/// Chain-level commands: they act on whole chains instead of single rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainCommand {
    Flush,
    Zero,
    DeleteChain,
    NewChain,
    RenameChain,
    Policy,
    List,
}

impl ChainCommand {
    /// Commands that only undo what the up hooks built.
    pub fn is_teardown(&self) -> bool {
        matches!(self, ChainCommand::Flush | ChainCommand::Zero | ChainCommand::DeleteChain)
    }
}

impl fmt::Display for ChainCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ChainCommand::Flush => "-F",
            ChainCommand::Zero => "-Z",
            ChainCommand::DeleteChain => "-X",
            ChainCommand::NewChain => "-N",
            ChainCommand::RenameChain => "-E",
            ChainCommand::Policy => "-P",
            ChainCommand::List => "-L",
        })
    }
}

/// One translated rule, ready to be placed in its chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub family: Family,
    pub chain: Chain,
    pub target: Target,
    /// 1-based `-I` position, `None` for appended rules.
    pub insert_at: Option<usize>,
    exprs: Vec<String>,
    verdict: String,
    comment: Option<String>,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "meta nfproto {}", self.family.nfproto())?;
        for expr in &self.exprs {
            write!(f, " {expr}")?;
        }
        write!(f, " {}", self.verdict)?;
        if let Some(comment) = &self.comment {
            write!(f, " comment \"{comment}\"")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Accept,
    Drop,
    Reject,
    Return,
    Masquerade,
    Snat,
    Dnat,
    TcpMss,
    Mark,
    ConnMark,
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Rule { action: Action, rule: Rule },
    Chain(ChainCommand),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("not an iptables command")]
    NotIptables,

    #[error("missing value for option {0}")]
    MissingValue(String),

    #[error("unsupported option {0}")]
    UnsupportedOption(String),

    #[error("unsupported table {0}")]
    UnsupportedTable(String),

    #[error("chain {chain} in table {table} has no base chain equivalent")]
    UnsupportedChain { table: String, chain: String },

    #[error("unsupported target {0}")]
    UnsupportedTarget(String),

    #[error("no rule action (-A, -I or -D)")]
    MissingAction,

    #[error("no jump target (-j)")]
    MissingTarget,
}

impl TranslateError {
    /// The rule targets a chain the hook table cannot hold, so it has no
    /// place in the ruleset at all. Every other error only means the
    /// translator does not know the construct.
    pub fn is_unrepresentable(&self) -> bool {
        matches!(self, TranslateError::UnsupportedChain { .. })
    }
}

pub fn family_of(program: &str) -> Option<Family> {
    let program = program.rsplit('/').next().unwrap_or(program);

    match program {
        "iptables" | "iptables-nft" | "iptables-legacy" => Some(Family::Ipv4),
        "ip6tables" | "ip6tables-nft" | "ip6tables-legacy" => Some(Family::Ipv6),
        _ => None,
    }
}

fn unquote(token: &str) -> &str {
    token
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .or_else(|| token.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')))
        .unwrap_or(token)
}

// "a,b" -> "{ a, b }"
fn set(items: Vec<String>) -> String {
    match items.as_slice() {
        [item] => item.clone(),
        _ => format!("{{ {} }}", items.join(", ")),
    }
}

// "1000:2000" -> "1000-2000", "80,443" -> "{ 80, 443 }"
fn ports(list: &str) -> String {
    set(list.split(',').map(|p| p.replace(':', "-")).collect())
}

fn addrs(list: &str) -> String {
    set(list.split(',').map(str::to_string).collect())
}

fn cmp(negate: bool) -> &'static str {
    if negate { "!= " } else { "" }
}

// "0x10" -> "0x10", "0x10/0xff" -> "and 0xff == 0x10"
fn mark_match(value: &str, negate: bool) -> String {
    match value.split_once('/') {
        Some((mark, mask)) => format!("and {mask} {} {mark}", if negate { "!=" } else { "==" }),
        None => format!("{}{value}", cmp(negate)),
    }
}

fn log_level(level: &str) -> Result<&'static str, TranslateError> {
    Ok(match level.to_lowercase().as_str() {
        "0" | "emerg" | "panic" => "emerg",
        "1" | "alert" => "alert",
        "2" | "crit" => "crit",
        "3" | "err" | "error" => "err",
        "4" | "warn" | "warning" => "warn",
        "5" | "notice" => "notice",
        "6" | "info" => "info",
        "7" | "debug" => "debug",
        _ => return Err(TranslateError::UnsupportedOption(format!("--log-level {level}"))),
    })
}

#[derive(Default)]
struct Matches {
    iif: Option<(bool, String)>,
    oif: Option<(bool, String)>,
    saddr: Option<(bool, String)>,
    daddr: Option<(bool, String)>,
    proto: Option<(bool, String)>,
    sport: Option<(bool, String)>,
    dport: Option<(bool, String)>,
    tcp_flags: Option<(String, String)>,
    ct_state: Option<(bool, String)>,
    mark: Option<(bool, String)>,
    ct_mark: Option<(bool, String)>,
    comment: Option<String>,
}

impl Matches {
    fn exprs(&self, family: Family) -> Vec<String> {
        let mut exprs = Vec::new();

        if let Some((neg, iif)) = &self.iif {
            exprs.push(format!("iifname {}\"{iif}\"", cmp(*neg)));
        }
        if let Some((neg, oif)) = &self.oif {
            exprs.push(format!("oifname {}\"{oif}\"", cmp(*neg)));
        }
        if let Some((neg, saddr)) = &self.saddr {
            exprs.push(format!("{} saddr {}{}", family.ip(), cmp(*neg), addrs(saddr)));
        }
        if let Some((neg, daddr)) = &self.daddr {
            exprs.push(format!("{} daddr {}{}", family.ip(), cmp(*neg), addrs(daddr)));
        }

        let has_ports = self.sport.is_some() || self.dport.is_some() || self.tcp_flags.is_some();
        match &self.proto {
            Some((false, proto)) if has_ports => {
                if let Some((neg, sport)) = &self.sport {
                    exprs.push(format!("{proto} sport {}{}", cmp(*neg), ports(sport)));
                }
                if let Some((neg, dport)) = &self.dport {
                    exprs.push(format!("{proto} dport {}{}", cmp(*neg), ports(dport)));
                }
            }
            Some((neg, proto)) => exprs.push(format!("meta l4proto {}{proto}", cmp(*neg))),
            None => {}
        }

        if let Some((mask, comp)) = &self.tcp_flags {
            exprs.push(format!("tcp flags & ({}) == {}", mask.replace(',', "|"), comp.replace(',', "|")));
        }

        if let Some((neg, state)) = &self.ct_state {
            exprs.push(format!("ct state {}{state}", cmp(*neg)));
        }
        if let Some((neg, mark)) = &self.mark {
            exprs.push(format!("meta mark {}", mark_match(mark, *neg)));
        }
        if let Some((neg, mark)) = &self.ct_mark {
            exprs.push(format!("ct mark {}", mark_match(mark, *neg)));
        }

        exprs
    }
}

fn reject_with(kind: &str) -> Result<String, TranslateError> {
    Ok(match kind {
        "tcp-reset" => "reject with tcp reset".to_string(),
        "icmp-port-unreachable" | "icmp6-port-unreachable" | "port-unreach" => {
            "reject with icmpx type port-unreachable".to_string()
        }
        "icmp-host-unreachable" | "icmp6-addr-unreachable" => {
            "reject with icmpx type host-unreachable".to_string()
        }
        "icmp-net-unreachable" | "icmp6-no-route" => "reject with icmpx type no-route".to_string(),
        "icmp-admin-prohibited" | "icmp6-adm-prohibited" => {
            "reject with icmpx type admin-prohibited".to_string()
        }
        other => return Err(TranslateError::UnsupportedOption(format!("--reject-with {other}"))),
    })
}

/// Translates one iptables invocation, already split into tokens, with `%i`
/// substituted.
pub fn translate(tokens: &[&str]) -> Result<Invocation, TranslateError> {
    let (program, args) = tokens.split_first().ok_or(TranslateError::NotIptables)?;
    let family = family_of(program).ok_or(TranslateError::NotIptables)?;

    let mut table = TableKind::Filter;
    let mut table_name = "filter".to_string();
    let mut action = None;
    let mut chain_command = None;
    let mut insert_at = None;
    let mut chain_name = None;
    let mut module = String::new();
    let mut matches = Matches::default();
    let mut target = None;
    let mut target_opts: Vec<(String, Option<String>)> = Vec::new();
    let mut negate = false;

    let mut iter = args.iter().map(|t| unquote(t)).peekable();
    while let Some(opt) = iter.next() {
        let command = match opt {
            "-F" | "--flush" => Some(ChainCommand::Flush),
            "-Z" | "--zero" => Some(ChainCommand::Zero),
            "-X" | "--delete-chain" => Some(ChainCommand::DeleteChain),
            "-N" | "--new-chain" => Some(ChainCommand::NewChain),
            "-E" | "--rename-chain" => Some(ChainCommand::RenameChain),
            "-P" | "--policy" => Some(ChainCommand::Policy),
            "-L" | "--list" | "-S" | "--list-rules" => Some(ChainCommand::List),
            _ => None,
        };
        if let Some(command) = command {
            chain_command = Some(command);
            // chain names and policy arguments
            while iter.next_if(|arg| !arg.starts_with('-')).is_some() {}
            continue;
        }

        let mut take = |opt: &str| -> Result<String, TranslateError> {
            iter.next()
                .map(str::to_string)
                .ok_or_else(|| TranslateError::MissingValue(opt.to_string()))
        };

        match opt {
            "!" => {
                negate = true;
                continue;
            }
            "-t" | "--table" => {
                table_name = take(opt)?;
                table = match table_name.as_str() {
                    "filter" => TableKind::Filter,
                    "nat" => TableKind::Nat,
                    "mangle" => TableKind::Mangle,
                    "raw" => TableKind::Raw,
                    other => return Err(TranslateError::UnsupportedTable(other.to_string())),
                };
            }
            "-A" | "--append" => {
                action = Some(Action::Append);
                chain_name = Some(take(opt)?);
            }
            "-D" | "--delete" => {
                action = Some(Action::Delete);
                chain_name = Some(take(opt)?);
            }
            "-I" | "--insert" => {
                action = Some(Action::Insert);
                chain_name = Some(take(opt)?);
                let position = iter.peek().and_then(|n| n.parse::<usize>().ok());
                if position.is_some() {
                    iter.next();
                }
                insert_at = Some(position.unwrap_or(1));
            }
            "-w" | "--wait" => {
                iter.next_if(|n| n.parse::<u32>().is_ok());
            }
            "-i" | "--in-interface" => matches.iif = Some((negate, take(opt)?)),
            "-o" | "--out-interface" => matches.oif = Some((negate, take(opt)?)),
            "-s" | "--source" | "--src" => matches.saddr = Some((negate, take(opt)?)),
            "-d" | "--destination" | "--dst" => matches.daddr = Some((negate, take(opt)?)),
            "-p" | "--protocol" => {
                let proto = take(opt)?.to_lowercase();
                matches.proto = match (negate, proto.as_str()) {
                    (false, "all" | "0") => None,
                    (true, "all" | "0") => {
                        return Err(TranslateError::UnsupportedOption(format!("! -p {proto}")));
                    }
                    _ => Some((negate, proto)),
                };
            }
            "--sport" | "--source-port" | "--sports" | "--source-ports" => {
                matches.sport = Some((negate, take(opt)?))
            }
            "--dport" | "--destination-port" | "--dports" | "--destination-ports" => {
                matches.dport = Some((negate, take(opt)?))
            }
            "--tcp-flags" => {
                let mask = take(opt)?.to_lowercase();
                let comp = take(opt)?.to_lowercase();
                matches.tcp_flags = Some((mask, comp));
            }
            "--syn" => matches.tcp_flags = Some(("syn,rst,ack,fin".into(), "syn".into())),
            "--state" | "--ctstate" => {
                matches.ct_state = Some((negate, take(opt)?.to_lowercase()))
            }
            "--mark" if module == "connmark" => matches.ct_mark = Some((negate, take(opt)?)),
            "--mark" if module == "mark" => matches.mark = Some((negate, take(opt)?)),
            "--comment" | "--log-prefix" => {
                let mut text = take(opt)?;
                if let Some(open) = text.strip_prefix('"') {
                    text = open.to_string();
                    while !text.ends_with('"') {
                        text.push(' ');
                        text.push_str(&take(opt)?);
                    }
                    text.pop();
                }
                let text = text.replace('"', "");
                if opt == "--comment" {
                    matches.comment = Some(text);
                } else {
                    target_opts.push((opt.to_string(), Some(text)));
                }
            }
            "-m" | "--match" => {
                module = take(opt)?;
                if !matches!(
                    module.as_str(),
                    "state" | "conntrack" | "tcp" | "udp" | "multiport" | "comment" | "mark" | "connmark"
                ) {
                    return Err(TranslateError::UnsupportedOption(format!("-m {module}")));
                }
            }
            "-j" | "--jump" => {
                let name = take(opt)?;
                target = Some(match name.as_str() {
                    "ACCEPT" => Target::Accept,
                    "DROP" => Target::Drop,
                    "REJECT" => Target::Reject,
                    "RETURN" => Target::Return,
                    "MASQUERADE" => Target::Masquerade,
                    "SNAT" => Target::Snat,
                    "DNAT" => Target::Dnat,
                    "TCPMSS" => Target::TcpMss,
                    "MARK" => Target::Mark,
                    "CONNMARK" => Target::ConnMark,
                    "LOG" => Target::Log,
                    other => return Err(TranslateError::UnsupportedTarget(other.to_string())),
                });
            }
            "--clamp-mss-to-pmtu" | "--save-mark" | "--restore-mark" => {
                target_opts.push((opt.to_string(), None))
            }
            "--to-source" | "--to-destination" | "--to" | "--reject-with" | "--set-mss"
            | "--set-mark" | "--set-xmark" | "--log-level" => {
                let value = take(opt)?;
                target_opts.push((opt.to_string(), Some(value)));
            }
            other => return Err(TranslateError::UnsupportedOption(other.to_string())),
        }

        negate = false;
    }

    if let Some(command) = chain_command {
        return Ok(Invocation::Chain(command));
    }

    let action = action.ok_or(TranslateError::MissingAction)?;
    let chain_name = chain_name.ok_or(TranslateError::MissingAction)?;
    let target = target.ok_or(TranslateError::MissingTarget)?;

    let has_ports = matches.sport.is_some() || matches.dport.is_some();
    if has_ports && !matches!(&matches.proto, Some((false, p)) if p == "tcp" || p == "udp" || p == "sctp") {
        return Err(TranslateError::UnsupportedOption(
            "port match without -p tcp, udp or sctp".into(),
        ));
    }

    let hook = match chain_name.as_str() {
        "PREROUTING" => Some(HookPoint::Prerouting),
        "INPUT" => Some(HookPoint::Input),
        "FORWARD" => Some(HookPoint::Forward),
        "OUTPUT" => Some(HookPoint::Output),
        "POSTROUTING" => Some(HookPoint::Postrouting),
        _ => None,
    };
    let chain = hook
        .and_then(|hook| Chain::new(table, hook))
        .ok_or_else(|| TranslateError::UnsupportedChain {
            table: table_name.clone(),
            chain: chain_name.clone(),
        })?;

    let opt = |name: &str| {
        target_opts
            .iter()
            .find(|(k, _)| k == name)
            .and_then(|(_, v)| v.clone())
    };
    let flag = |name: &str| target_opts.iter().any(|(k, _)| k == name);

    let verdict = match target {
        Target::Accept => "accept".to_string(),
        Target::Drop => "drop".to_string(),
        Target::Return => "return".to_string(),
        Target::Reject => match opt("--reject-with") {
            Some(kind) => reject_with(&kind)?,
            None => "reject".to_string(),
        },
        Target::Masquerade => "masquerade".to_string(),
        Target::Snat => {
            let to = opt("--to-source")
                .or_else(|| opt("--to"))
                .ok_or_else(|| TranslateError::MissingValue("--to-source".into()))?;
            format!("snat {} to {to}", family.ip())
        }
        Target::Dnat => {
            let to = opt("--to-destination")
                .or_else(|| opt("--to"))
                .ok_or_else(|| TranslateError::MissingValue("--to-destination".into()))?;
            format!("dnat {} to {to}", family.ip())
        }
        Target::TcpMss => match opt("--set-mss") {
            Some(mss) => format!("tcp option maxseg size set {mss}"),
            None if flag("--clamp-mss-to-pmtu") => "tcp option maxseg size set rt mtu".to_string(),
            None => return Err(TranslateError::MissingValue("--clamp-mss-to-pmtu".into())),
        },
        Target::Mark => {
            let mark = opt("--set-mark")
                .or_else(|| opt("--set-xmark"))
                .ok_or_else(|| TranslateError::MissingValue("--set-mark".into()))?;
            if mark.contains('/') {
                return Err(TranslateError::UnsupportedOption(format!("--set-mark {mark}")));
            }
            format!("meta mark set {mark}")
        }
        Target::ConnMark => match opt("--set-mark") {
            Some(mark) if mark.contains('/') => {
                return Err(TranslateError::UnsupportedOption(format!("--set-mark {mark}")));
            }
            Some(mark) => format!("ct mark set {mark}"),
            None if flag("--save-mark") => "ct mark set meta mark".to_string(),
            None if flag("--restore-mark") => "meta mark set ct mark".to_string(),
            None => return Err(TranslateError::MissingValue("--set-mark".into())),
        },
        Target::Log => {
            let mut log = "log".to_string();
            if let Some(prefix) = opt("--log-prefix") {
                log.push_str(&format!(" prefix \"{prefix}\""));
            }
            if let Some(level) = opt("--log-level") {
                log.push_str(&format!(" level {}", log_level(&level)?));
            }
            log
        }
    };

    Ok(Invocation::Rule {
        action,
        rule: Rule {
            family,
            chain,
            target,
            insert_at: insert_at.filter(|_| action == Action::Insert),
            exprs: matches.exprs(family),
            verdict,
            comment: matches.comment,
        },
    })
}
