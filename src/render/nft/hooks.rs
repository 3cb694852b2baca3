//! Classification of `PreUp`/`PostUp`/`PreDown`/`PostDown` command lines into
//! firewall intents.

use super::{
    FirewallTranslationError,
    iptables::{self, Action, Chain, HookPoint, Invocation, Rule, TableKind, Target},
};
use crate::wg::instance::{Hook, HookStage};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `-t nat -A POSTROUTING ... -j MASQUERADE`
    Masquerade(Rule),

    /// `-A FORWARD ... -j ACCEPT`
    ForwardAccept(Rule),

    Literal(Literal),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    // any other translatable iptables rule
    Rule(Rule),

    // `nft <command>`, passed through verbatim
    Nft(String),
}

impl Intent {
    pub fn rule(&self) -> Option<&Rule> {
        match self {
            Intent::Masquerade(rule)
            | Intent::ForwardAccept(rule)
            | Intent::Literal(Literal::Rule(rule)) => Some(rule),
            Intent::Literal(Literal::Nft(_)) => None,
        }
    }
}

/// A hook command that was left out of the ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub line: usize,
    pub stage: HookStage,
    pub command: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Classified {
    pub intents: Vec<Intent>,
    pub warnings: Vec<Warning>,
}

enum Outcome {
    Keep(Intent),
    Teardown,
    Skip(String),
}

fn classify_rule(rule: Rule) -> Intent {
    let chain = rule.chain;
    match (chain.table, chain.hook, rule.target) {
        (TableKind::Nat, HookPoint::Postrouting, Target::Masquerade) => Intent::Masquerade(rule),
        (TableKind::Filter, HookPoint::Forward, Target::Accept) => Intent::ForwardAccept(rule),
        _ => Intent::Literal(Literal::Rule(rule)),
    }
}

fn classify_command(
    stage: HookStage,
    line: usize,
    command: &str,
) -> Result<Outcome, FirewallTranslationError> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let Some(&program) = tokens.first() else {
        return Ok(Outcome::Skip("empty command".into()));
    };

    if iptables::family_of(program).is_some() {
        let invocation = match iptables::translate(&tokens) {
            Ok(invocation) => invocation,
            Err(source) if source.is_unrepresentable() => {
                return Err(FirewallTranslationError::UnrepresentableHook {
                    line,
                    command: command.to_string(),
                    source,
                });
            }
            Err(err) => return Ok(Outcome::Skip(err.to_string())),
        };

        return Ok(match (invocation, stage.is_up()) {
            (Invocation::Rule { action: Action::Append | Action::Insert, rule }, true) => {
                Outcome::Keep(classify_rule(rule))
            }
            (Invocation::Rule { action: Action::Delete, .. }, false) => Outcome::Teardown,
            (Invocation::Rule { action: Action::Delete, .. }, true) => {
                Outcome::Skip("rule deletion while bringing the interface up".into())
            }
            (Invocation::Rule { .. }, false) => {
                Outcome::Skip("rule added while taking the interface down".into())
            }
            (Invocation::Chain(command), false) if command.is_teardown() => Outcome::Teardown,
            (Invocation::Chain(command), _) => {
                Outcome::Skip(format!("chain command {command} has no declarative equivalent"))
            }
        });
    }

    let program = program.rsplit('/').next().unwrap_or(program);
    if program != "nft" {
        return Ok(Outcome::Skip("not a firewall command".into()));
    }

    let Some(rest) = command.trim_start().split_once(char::is_whitespace).map(|(_, rest)| rest.trim())
    else {
        return Ok(Outcome::Skip("nft without a command".into()));
    };

    if rest.starts_with('-') {
        return Ok(Outcome::Skip("nft command line options cannot be inlined".into()));
    }

    let verb = rest.split_whitespace().next().unwrap_or_default();
    Ok(match (verb, stage.is_up()) {
        ("delete" | "flush" | "destroy", false) => Outcome::Teardown,
        (_, true) => Outcome::Keep(Intent::Literal(Literal::Nft(rest.to_string()))),
        (_, false) => Outcome::Skip("nft command run while taking the interface down".into()),
    })
}

/// Splits each hook on `;`, substitutes `%i` with the interface name and
/// classifies every resulting command in hook order.
pub fn classify(interface: &str, hooks: &[Hook]) -> Result<Classified, FirewallTranslationError> {
    let mut classified = Classified::default();

    for hook in hooks {
        for command in hook.command.split(';') {
            let command = command.trim().replace("%i", interface);
            if command.is_empty() {
                continue;
            }

            match classify_command(hook.stage, hook.line, &command)? {
                Outcome::Keep(intent) => classified.intents.push(intent),
                Outcome::Teardown => log::debug!("line {}: dropping teardown `{command}`", hook.line),
                Outcome::Skip(reason) => classified.warnings.push(Warning {
                    line: hook.line,
                    stage: hook.stage,
                    command,
                    reason,
                }),
            }
        }
    }

    Ok(classified)
}

/// Rules grouped by base chain, chains in order of first appearance. Rules
/// keep hook order within a chain, except `-I` rules, which land at their
/// position the way iptables places them.
pub fn chain_rules(intents: &[Intent]) -> Vec<(Chain, Vec<&Rule>)> {
    let mut chains: Vec<(Chain, Vec<&Rule>)> = Vec::new();

    for rule in intents.iter().filter_map(Intent::rule) {
        let idx = match chains.iter().position(|(chain, _)| *chain == rule.chain) {
            Some(idx) => idx,
            None => {
                chains.push((rule.chain, Vec::new()));
                chains.len() - 1
            }
        };

        let rules = &mut chains[idx].1;
        match rule.insert_at {
            Some(pos) => rules.insert(pos.saturating_sub(1).min(rules.len()), rule),
            None => rules.push(rule),
        }
    }

    chains
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(stage: HookStage, line: usize, command: &str) -> Hook {
        Hook {
            stage,
            command: command.to_string(),
            line,
        }
    }

    #[test]
    fn test_classify_intents() {
        let hooks = [
            hook(
                HookStage::PostUp,
                7,
                "iptables -A FORWARD -i %i -j ACCEPT; iptables -t nat -A POSTROUTING -o eth0 -j MASQUERADE",
            ),
            hook(HookStage::PostUp, 8, "iptables -A INPUT -i %i -p tcp --dport 22 -j DROP"),
            hook(HookStage::PostUp, 9, "nft add rule inet filter input iifname %i accept"),
        ];

        let classified = classify("wg0", &hooks).unwrap();
        assert!(classified.warnings.is_empty());
        assert_eq!(classified.intents.len(), 4);

        assert!(matches!(classified.intents[0], Intent::ForwardAccept(_)));
        assert!(matches!(classified.intents[1], Intent::Masquerade(_)));
        assert!(matches!(classified.intents[2], Intent::Literal(Literal::Rule(_))));
        assert_eq!(
            classified.intents[3],
            Intent::Literal(Literal::Nft("add rule inet filter input iifname wg0 accept".into()))
        );

        let names: Vec<String> = chain_rules(&classified.intents)
            .iter()
            .map(|(chain, _)| chain.name())
            .collect();
        assert_eq!(names, ["filter_forward", "nat_postrouting", "filter_input"]);
    }

    #[test]
    fn test_teardown_is_dropped() {
        let hooks = [
            hook(
                HookStage::PostDown,
                4,
                "iptables -D FORWARD -i %i -j ACCEPT; iptables -t nat -D POSTROUTING -o eth0 -j MASQUERADE",
            ),
            hook(HookStage::PreDown, 5, "nft delete table inet wg0_extra"),
        ];

        assert_eq!(classify("wg0", &hooks).unwrap(), Classified::default());
    }

    #[test]
    fn test_non_firewall_commands_warn() {
        let hooks = [
            hook(HookStage::PreUp, 3, "sysctl -w net.ipv4.ip_forward=1"),
            hook(HookStage::PostUp, 4, "ip rule add fwmark 1234 table 1234; ;"),
            hook(HookStage::PostDown, 5, "iptables -A FORWARD -i %i -j ACCEPT"),
        ];

        let classified = classify("wg0", &hooks).unwrap();
        assert!(classified.intents.is_empty());
        assert_eq!(classified.warnings.len(), 3);
        assert_eq!(classified.warnings[0].line, 3);
        assert_eq!(classified.warnings[1].command, "ip rule add fwmark 1234 table 1234");
        assert_eq!(classified.warnings[2].stage, HookStage::PostDown);
        assert_eq!(classified.warnings[2].command, "iptables -A FORWARD -i wg0 -j ACCEPT");
    }

    #[test]
    fn test_flush_teardown_is_dropped() {
        let hooks = [
            hook(HookStage::PostDown, 5, "iptables -F; iptables -t nat -F"),
            hook(HookStage::PostDown, 6, "ip6tables -X wg-chain; iptables -Z"),
        ];

        assert_eq!(classify("wg0", &hooks).unwrap(), Classified::default());
    }

    #[test]
    fn test_chain_management_warns() {
        let hooks = [
            hook(HookStage::PostUp, 3, "iptables -N wg-chain; iptables -P FORWARD DROP"),
            hook(HookStage::PostUp, 4, "iptables -F"),
        ];

        let classified = classify("wg0", &hooks).unwrap();
        assert!(classified.intents.is_empty());
        let commands: Vec<&str> = classified.warnings.iter().map(|w| w.command.as_str()).collect();
        assert_eq!(commands, ["iptables -N wg-chain", "iptables -P FORWARD DROP", "iptables -F"]);
        assert_eq!(classified.warnings[0].reason, "chain command -N has no declarative equivalent");
    }

    #[test]
    fn test_unknown_option_warns() {
        let hooks = [
            hook(HookStage::PostUp, 6, "iptables -A FORWARD -i %i -j ACCEPT"),
            hook(HookStage::PostUp, 7, "iptables -A INPUT -m recent --rcheck -j DROP"),
            hook(HookStage::PostUp, 8, "iptables -A INPUT -j NFQUEUE --queue-num 1"),
        ];

        let classified = classify("wg0", &hooks).unwrap();
        assert_eq!(classified.intents.len(), 1);
        assert_eq!(classified.warnings.len(), 2);
        assert_eq!(classified.warnings[0].line, 7);
        assert_eq!(classified.warnings[0].reason, "unsupported option -m recent");
        assert_eq!(classified.warnings[1].reason, "unsupported target NFQUEUE");
    }

    #[test]
    fn test_log_rule_is_kept() {
        let hooks = [hook(HookStage::PostUp, 12, "iptables -A FORWARD -i %i -j LOG --log-prefix wg")];

        let classified = classify("wg0", &hooks).unwrap();
        assert!(classified.warnings.is_empty());
        let rule = classified.intents[0].rule().unwrap();
        assert_eq!(rule.target, Target::Log);
        assert_eq!(rule.to_string(), "meta nfproto ipv4 iifname \"wg0\" log prefix \"wg\"");
    }

    #[test]
    fn test_inserts_follow_iptables_order() {
        let hooks = [hook(
            HookStage::PostUp,
            5,
            "iptables -A FORWARD -j DROP; iptables -I FORWARD -i %i -j ACCEPT; \
             iptables -I FORWARD -o %i -j ACCEPT; iptables -I FORWARD 2 -p udp --dport 53 -j ACCEPT; \
             iptables -I FORWARD 9 -j RETURN",
        )];

        let classified = classify("wg0", &hooks).unwrap();
        let chains = chain_rules(&classified.intents);
        assert_eq!(chains.len(), 1);

        let rules: Vec<String> = chains[0].1.iter().map(|rule| rule.to_string()).collect();
        assert_eq!(
            rules,
            [
                "meta nfproto ipv4 oifname \"wg0\" accept",
                "meta nfproto ipv4 udp dport 53 accept",
                "meta nfproto ipv4 iifname \"wg0\" accept",
                "meta nfproto ipv4 drop",
                "meta nfproto ipv4 return",
            ]
        );
    }

    #[test]
    fn test_user_chain_rule_fails() {
        let hooks = [
            hook(HookStage::PostUp, 6, "iptables -A FORWARD -i %i -j ACCEPT"),
            hook(HookStage::PostUp, 12, "iptables -A wg-chain -i %i -j ACCEPT"),
        ];

        let err = classify("wg0", &hooks).unwrap_err();
        let FirewallTranslationError::UnrepresentableHook { line, command, .. } = err;
        assert_eq!(line, 12);
        assert_eq!(command, "iptables -A wg-chain -i wg0 -j ACCEPT");
    }
}
