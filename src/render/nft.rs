use std::fmt;

use crate::wg::{Cidr, config::WgConfig};

pub mod hooks;
pub mod iptables;

pub use hooks::Warning;

#[derive(Debug, thiserror::Error)]
pub enum FirewallTranslationError {
    #[error("line {line}: hook command `{command}` has no nftables equivalent: {source}")]
    UnrepresentableHook {
        line: usize,
        command: String,
        source: iptables::TranslateError,
    },
}

/// Generated nftables text plus the hook commands that did not make it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ruleset {
    pub text: String,
    pub warnings: Vec<Warning>,
}

// Drops traffic for the tunnel addresses arriving on any other interface and
// carries the routing mark of the encrypted flow across conntrack.
fn write_guard_table(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    ip: &str,
    addrs: &[&Cidr],
    mark: u32,
) -> fmt::Result {
    writeln!(f, "table {ip} {name} {{")?;
    writeln!(f, "  chain preraw {{")?;
    writeln!(f, "    type filter hook prerouting priority raw; policy accept;")?;
    for addr in addrs {
        writeln!(
            f,
            "    iifname != \"{name}\" {ip} daddr {} fib saddr type != local drop;",
            addr.ip
        )?;
    }
    writeln!(f, "  }}")?;
    writeln!(f)?;
    writeln!(f, "  chain premangle {{")?;
    writeln!(f, "    type filter hook prerouting priority mangle; policy accept;")?;
    writeln!(f, "    meta l4proto udp meta mark set ct mark;")?;
    writeln!(f, "  }}")?;
    writeln!(f)?;
    writeln!(f, "  chain postmangle {{")?;
    writeln!(f, "    type filter hook postrouting priority mangle; policy accept;")?;
    writeln!(f, "    meta l4proto udp meta mark {mark:#x} ct mark set meta mark;")?;
    writeln!(f, "  }}")?;
    writeln!(f, "}}")
}

fn write_hook_table(f: &mut fmt::Formatter<'_>, name: &str, intents: &[hooks::Intent]) -> fmt::Result {
    let chains = hooks::chain_rules(intents);
    if chains.is_empty() {
        return Ok(());
    }

    writeln!(f)?;
    writeln!(f, "table inet {name}_hooks {{")?;
    for (idx, (chain, rules)) in chains.iter().enumerate() {
        if idx > 0 {
            writeln!(f)?;
        }

        writeln!(f, "  chain {} {{", chain.name())?;
        writeln!(f, "    {}", chain.declaration())?;
        for rule in rules {
            writeln!(f, "    {rule};")?;
        }
        writeln!(f, "  }}")?;
    }
    writeln!(f, "}}")
}

/// The nftables ruleset text: guard tables, the hook table, then `nft`
/// passthrough commands.
pub struct NftRuleset<'a> {
    cfg: &'a WgConfig,
    classified: &'a hooks::Classified,
}

impl<'a> NftRuleset<'a> {
    pub fn new(cfg: &'a WgConfig, classified: &'a hooks::Classified) -> Self {
        Self { cfg, classified }
    }
}

impl fmt::Display for NftRuleset<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let iface = &self.cfg.interface;
        let mark = iface.routing_mark();

        let (v4, v6): (Vec<&Cidr>, Vec<&Cidr>) = iface.address.iter().partition(|addr| addr.is_ipv4());

        if !v4.is_empty() {
            write_guard_table(f, &iface.name, "ip", &v4, mark)?;
        }

        if !v6.is_empty() {
            if !v4.is_empty() {
                writeln!(f)?;
            }
            write_guard_table(f, &iface.name, "ip6", &v6, mark)?;
        }

        write_hook_table(f, &iface.name, &self.classified.intents)?;

        let mut passthrough = self.classified.intents.iter().filter_map(|intent| match intent {
            hooks::Intent::Literal(hooks::Literal::Nft(command)) => Some(command),
            _ => None,
        });

        if let Some(first) = passthrough.next() {
            writeln!(f)?;
            writeln!(f, "{first}")?;
            for command in passthrough {
                writeln!(f, "{command}")?;
            }
        }

        Ok(())
    }
}

pub fn render_nftables(cfg: &WgConfig) -> Result<Ruleset, FirewallTranslationError> {
    let classified = hooks::classify(&cfg.interface.name, &cfg.interface.firewall_hooks)?;

    for intent in &classified.intents {
        log::debug!("firewall intent: {intent:?}");
    }

    let text = NftRuleset::new(cfg, &classified).to_string();

    Ok(Ruleset {
        text,
        warnings: classified.warnings,
    })
}
