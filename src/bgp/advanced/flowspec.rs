//! BGP FlowSpec (RFC 5575, spec §4.6): a rule matcher fed by configuration or
//! received NLRI (NLRI decoding itself is out of scope; see spec §4.6).

use std::fmt;

use ipnetwork::IpNetwork;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericOperator {
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

impl NumericOperator {
    fn holds(self, value: u32, against: u32) -> bool {
        match self {
            NumericOperator::Eq => value == against,
            NumericOperator::Lt => value < against,
            NumericOperator::Gt => value > against,
            NumericOperator::Le => value <= against,
            NumericOperator::Ge => value >= against,
        }
    }
}

/// A packet descriptor to match rules against.
#[derive(Debug, Clone)]
pub struct PacketDescriptor {
    pub destination: IpNetwork,
    pub source: Option<IpNetwork>,
    pub protocol: Option<u8>,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    pub icmp_type: Option<u8>,
    pub icmp_code: Option<u8>,
    pub tcp_flags: Option<u8>,
    pub packet_length: Option<u16>,
    pub dscp: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct FlowspecMatch {
    pub destination_prefix: Option<IpNetwork>,
    pub source_prefix: Option<IpNetwork>,
    pub protocol: Vec<(NumericOperator, u8)>,
    pub source_port: Vec<(NumericOperator, u16)>,
    pub destination_port: Vec<(NumericOperator, u16)>,
    pub icmp_type: Vec<(NumericOperator, u8)>,
    pub icmp_code: Vec<(NumericOperator, u8)>,
    /// (mask, expected bits)
    pub tcp_flags: Option<(u8, u8)>,
    pub packet_length: Vec<(NumericOperator, u16)>,
    pub dscp: Vec<(NumericOperator, u8)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowspecAction {
    Drop,
    RateLimit(u64),
    Redirect,
    MarkDscp(u8),
    Sample,
    Pass,
}

/// Human-readable rendering of the RFC 5575 traffic-action extended
/// communities, for log lines and observability hooks (spec §10.5).
impl fmt::Display for FlowspecAction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlowspecAction::Drop => write!(f, "traffic-rate: 0 (discard)"),
            FlowspecAction::RateLimit(bps) => write!(f, "traffic-rate: {} bytes/sec", bps),
            FlowspecAction::Redirect => write!(f, "traffic-action: redirect"),
            FlowspecAction::MarkDscp(dscp) => write!(f, "traffic-marking: dscp {}", dscp),
            FlowspecAction::Sample => write!(f, "traffic-action: sample"),
            FlowspecAction::Pass => write!(f, "traffic-rate: default (accept)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowspecRule {
    pub priority: i32,
    pub matches: FlowspecMatch,
    pub action: FlowspecAction,
}

fn list_holds<T: Copy>(conditions: &[(NumericOperator, T)], value: Option<T>, cmp: impl Fn(T) -> u32, against: impl Fn(T) -> u32) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let Some(value) = value else { return false };
    conditions.iter().all(|(op, bound)| op.holds(cmp(value), against(*bound)))
}

impl FlowspecMatch {
    fn matches(&self, pkt: &PacketDescriptor) -> bool {
        if let Some(dst) = &self.destination_prefix {
            if !dst.contains(pkt.destination.ip()) {
                return false;
            }
        }
        if let Some(src_cond) = &self.source_prefix {
            match pkt.source {
                Some(src) if src_cond.contains(src.ip()) => {}
                _ => return false,
            }
        }
        if !list_holds(&self.protocol, pkt.protocol, |v| v as u32, |v| v as u32) {
            return false;
        }
        if !list_holds(&self.source_port, pkt.source_port, |v| v as u32, |v| v as u32) {
            return false;
        }
        if !list_holds(&self.destination_port, pkt.destination_port, |v| v as u32, |v| v as u32) {
            return false;
        }
        if !list_holds(&self.icmp_type, pkt.icmp_type, |v| v as u32, |v| v as u32) {
            return false;
        }
        if !list_holds(&self.icmp_code, pkt.icmp_code, |v| v as u32, |v| v as u32) {
            return false;
        }
        if !list_holds(&self.packet_length, pkt.packet_length, |v| v as u32, |v| v as u32) {
            return false;
        }
        if !list_holds(&self.dscp, pkt.dscp, |v| v as u32, |v| v as u32) {
            return false;
        }
        if let Some((mask, expected)) = self.tcp_flags {
            match pkt.tcp_flags {
                Some(flags) if flags & mask == expected => {}
                _ => return false,
            }
        }
        true
    }
}

/// Rules indexed by priority (lower = higher priority), spec §4.6.
#[derive(Debug, Default)]
pub struct FlowspecMatcher {
    rules: Vec<FlowspecRule>,
}

impl FlowspecMatcher {
    pub fn new(mut rules: Vec<FlowspecRule>) -> Self {
        rules.sort_by_key(|r| r.priority);
        FlowspecMatcher { rules }
    }

    pub fn insert(&mut self, rule: FlowspecRule) {
        let pos = self.rules.partition_point(|r| r.priority <= rule.priority);
        self.rules.insert(pos, rule);
    }

    /// The highest-priority rule whose every present condition holds.
    pub fn find_match(&self, pkt: &PacketDescriptor) -> Option<&FlowspecRule> {
        self.rules.iter().find(|rule| rule.matches.matches(pkt))
    }

    pub fn apply(&self, rule: &FlowspecRule) -> FlowspecAction {
        rule.action
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pkt(dest: &str) -> PacketDescriptor {
        PacketDescriptor {
            destination: dest.parse().unwrap(),
            source: None,
            protocol: Some(6),
            source_port: None,
            destination_port: Some(80),
            icmp_type: None,
            icmp_code: None,
            tcp_flags: None,
            packet_length: None,
            dscp: None,
        }
    }

    #[test]
    fn matches_by_destination_and_protocol() {
        let rule = FlowspecRule {
            priority: 10,
            matches: FlowspecMatch {
                destination_prefix: Some("198.51.100.0/24".parse().unwrap()),
                protocol: vec![(NumericOperator::Eq, 6)],
                ..Default::default()
            },
            action: FlowspecAction::Drop,
        };
        let matcher = FlowspecMatcher::new(vec![rule]);
        let found = matcher.find_match(&pkt("198.51.100.5/32")).unwrap();
        assert_eq!(found.action, FlowspecAction::Drop);
        assert!(matcher.find_match(&pkt("203.0.113.5/32")).is_none());
    }

    #[test]
    fn highest_priority_rule_wins() {
        let low = FlowspecRule { priority: 100, matches: FlowspecMatch::default(), action: FlowspecAction::Pass };
        let high = FlowspecRule { priority: 1, matches: FlowspecMatch::default(), action: FlowspecAction::Drop };
        let matcher = FlowspecMatcher::new(vec![low, high]);
        assert_eq!(matcher.find_match(&pkt("198.51.100.5/32")).unwrap().action, FlowspecAction::Drop);
    }

    #[test]
    fn renders_actions_as_extended_community_text() {
        assert_eq!(FlowspecAction::Drop.to_string(), "traffic-rate: 0 (discard)");
        assert_eq!(FlowspecAction::RateLimit(1000).to_string(), "traffic-rate: 1000 bytes/sec");
        assert_eq!(FlowspecAction::MarkDscp(46).to_string(), "traffic-marking: dscp 46");
    }
}
