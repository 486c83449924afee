//! §4.E: ordered accept/reject rules and the three-valued admission check.

use std::net::Ipv4Addr;

use crate::error::{Error, ErrorKind};

/// One `accept`/`reject` rule in a router's exit policy, in declaration
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitPolicyRule {
    pub kind: RuleKind,
    pub addr: u32,
    pub mask: u32,
    pub port: u16,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Accept,
    Reject,
}

/// Outcome of matching an (address, port) pair against a policy chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    Rejected,
    Unknown,
}

impl ExitPolicyRule {
    /// Parse `ADDR[/MASK][:PORT]` as found after an `accept`/`reject`
    /// keyword. `keyword` selects the rule kind.
    pub fn parse(keyword: &str, pattern: &str) -> Result<ExitPolicyRule, Error> {
        let kind = match keyword {
            "accept" => RuleKind::Accept,
            "reject" => RuleKind::Reject,
            other => {
                return Err(ErrorKind::Semantic(format!("not an exit-policy keyword: {other}")).into())
            }
        };

        let (addr_mask, port_part) = match pattern.find(':') {
            Some(idx) => (&pattern[..idx], Some(&pattern[idx + 1..])),
            None => (pattern, None),
        };
        let (addr_part, mask_part) = match addr_mask.find('/') {
            Some(idx) => (&addr_mask[..idx], Some(&addr_mask[idx + 1..])),
            None => (addr_mask, None),
        };

        let (addr, is_wildcard_addr) = if addr_part == "*" {
            (0u32, true)
        } else {
            let ip: Ipv4Addr = addr_part
                .parse()
                .map_err(|_| ErrorKind::Semantic(format!("bad address in rule: {pattern}")))?;
            (u32::from(ip), false)
        };

        let mask = match mask_part {
            None => {
                if is_wildcard_addr {
                    0
                } else {
                    0xFFFF_FFFF
                }
            }
            Some(m) if m.contains('.') => {
                let ip: Ipv4Addr = m
                    .parse()
                    .map_err(|_| ErrorKind::Semantic(format!("bad mask in rule: {pattern}")))?;
                u32::from(ip)
            }
            Some(m) => {
                let prefix: u32 = m
                    .parse()
                    .map_err(|_| ErrorKind::Semantic(format!("bad mask in rule: {pattern}")))?;
                if prefix > 32 {
                    return Err(ErrorKind::Semantic(format!("bad mask in rule: {pattern}")).into());
                }
                if prefix == 0 {
                    0
                } else {
                    0xFFFF_FFFFu32 << (32 - prefix)
                }
            }
        };

        let port = match port_part {
            None | Some("*") => 0,
            Some(p) => p
                .parse::<u16>()
                .map_err(|_| ErrorKind::Semantic(format!("bad port in rule: {pattern}")))?,
        };

        Ok(ExitPolicyRule {
            kind,
            addr,
            mask,
            port,
            text: pattern.to_string(),
        })
    }
}

/// Parse a comma-separated list of `(accept|reject) PATTERN` rules, as used
/// by the self-descriptor builder's `ExitPolicy` configuration string. Bad
/// rules are skipped, not fatal, per §7.
pub fn parse_policy_csv(csv: &str) -> Vec<ExitPolicyRule> {
    let mut rules = Vec::new();
    for entry in csv.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(2, char::is_whitespace);
        let keyword = parts.next().unwrap_or("");
        let pattern = parts.next().unwrap_or("").trim();
        match ExitPolicyRule::parse(keyword, pattern) {
            Ok(rule) => rules.push(rule),
            Err(e) => tracing::warn!("skipping unparsable exit-policy rule {entry:?}: {e}"),
        }
    }
    rules
}

/// §4.E: total, deterministic three-valued match. `addr == 0` means the
/// caller does not yet know the destination address.
pub fn match_policy(addr: u32, port: u16, rules: &[ExitPolicyRule]) -> Verdict {
    let mut maybe_reject = false;

    for rule in rules {
        if addr != 0 {
            if (addr & rule.mask) == (rule.addr & rule.mask) && (rule.port == 0 || rule.port == port)
            {
                return match rule.kind {
                    RuleKind::Accept => Verdict::Accepted,
                    RuleKind::Reject => Verdict::Rejected,
                };
            }
        } else if rule.mask == 0 && rule.port == port {
            return match rule.kind {
                RuleKind::Accept => Verdict::Accepted,
                RuleKind::Reject => Verdict::Rejected,
            };
        } else if rule.kind == RuleKind::Reject && (rule.port == 0 || rule.port == port) {
            maybe_reject = true;
        }
    }

    if addr != 0 {
        Verdict::Accepted
    } else if maybe_reject {
        Verdict::Unknown
    } else {
        Verdict::Accepted
    }
}
