//! One OSPF neighbor's data structure (RFC 2328 §10): its FSM instance plus
//! the DD/request/retransmission lists §10's exchange procedures maintain.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use crate::wire::ospf::{LsaHeader, LsaKey};

use super::fsm::{self, Effect, Event, State};

#[derive(Debug)]
pub struct OspfNeighbor {
    pub router_id: Ipv4Addr,
    pub address: Ipv4Addr,
    pub priority: u8,
    pub state: State,
    pub last_hello: Instant,
    pub is_master: bool,
    pub dd_sequence_number: u32,
    pub ls_request_list: Vec<LsaKey>,
    pub ls_retransmission_list: Vec<(LsaKey, Instant)>,
    pub db_summary_list: Vec<LsaHeader>,
    pub declared_dr: Ipv4Addr,
    pub declared_bdr: Ipv4Addr,
}

impl OspfNeighbor {
    pub fn new(router_id: Ipv4Addr, address: Ipv4Addr, priority: u8) -> Self {
        OspfNeighbor {
            router_id,
            address,
            priority,
            state: State::Down,
            last_hello: Instant::now(),
            is_master: false,
            dd_sequence_number: 0,
            ls_request_list: Vec::new(),
            ls_retransmission_list: Vec::new(),
            db_summary_list: Vec::new(),
            declared_dr: Ipv4Addr::UNSPECIFIED,
            declared_bdr: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Apply `event`, clearing the DD/request/retransmission lists whenever
    /// the FSM's `ClearLists` effect fires. Invalid events are silently
    /// ignored, matching OSPF's forgiving FSM (spec §7).
    pub fn apply(&mut self, event: Event) -> Option<fsm::Transition> {
        let transition = fsm::transition(self.state, event)?;
        self.state = transition.next;
        if transition.effects.contains(&Effect::ClearLists) {
            self.ls_request_list.clear();
            self.ls_retransmission_list.clear();
            self.db_summary_list.clear();
        }
        Some(transition)
    }

    /// Handle reception of a Hello: refresh the inactivity timer and derive
    /// the 2-Way/1-Way transition from whether we saw ourselves in the
    /// neighbor's neighbor list (spec §4.7).
    pub fn handle_hello_received(&mut self, bidirectional: bool) {
        self.last_hello = Instant::now();
        match self.state {
            State::Down | State::Attempt => {
                self.apply(Event::HelloReceived);
            }
            State::Init => {
                if bidirectional {
                    self.apply(Event::TwoWayReceived);
                } else {
                    self.apply(Event::OneWay);
                }
            }
            s if s >= State::TwoWay => {
                if !bidirectional {
                    self.apply(Event::OneWay);
                }
            }
            _ => {}
        }
    }

    /// Determine master/slave by numeric router-id comparison (spec §4.7):
    /// the larger router id is master and picks the initial DD sequence
    /// number; the slave adopts it from the master's first DBD.
    pub fn start_database_exchange(&mut self, our_router_id: Ipv4Addr, initial_sequence: u32) {
        self.is_master = u32::from(our_router_id) > u32::from(self.router_id);
        if self.is_master {
            self.dd_sequence_number = initial_sequence;
        }
    }

    pub fn exchange_done(&mut self) {
        if self.state != State::Exchange {
            return;
        }
        self.apply(Event::ExchangeDone);
        if self.ls_request_list.is_empty() {
            self.apply(Event::LoadingDone);
        }
    }

    pub fn loading_done_if_satisfied(&mut self) {
        if self.state == State::Loading && self.ls_request_list.is_empty() {
            self.apply(Event::LoadingDone);
        }
    }

    pub fn check_inactivity(&mut self, dead_interval: Duration) -> bool {
        if self.last_hello.elapsed() > dead_interval {
            self.apply(Event::InactivityTimer);
            true
        } else {
            false
        }
    }

    pub fn is_full(&self) -> bool {
        fsm::is_full(self.state)
    }

    pub fn is_adjacent(&self) -> bool {
        fsm::is_adjacent(self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn down_to_init_on_first_hello() {
        let mut n = OspfNeighbor::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 2), 1);
        n.handle_hello_received(false);
        assert_eq!(n.state, State::Init);
    }

    #[test]
    fn init_to_twoway_when_bidirectional() {
        let mut n = OspfNeighbor::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 2), 1);
        n.state = State::Init;
        n.handle_hello_received(true);
        assert_eq!(n.state, State::TwoWay);
    }

    #[test]
    fn higher_router_id_is_master() {
        let mut n = OspfNeighbor::new(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 1), 1);
        n.start_database_exchange(Ipv4Addr::new(10, 0, 0, 9), 100);
        assert!(n.is_master);
        assert_eq!(n.dd_sequence_number, 100);
    }

    #[test]
    fn lower_router_id_is_slave() {
        let mut n = OspfNeighbor::new(Ipv4Addr::new(10, 0, 0, 9), Ipv4Addr::new(10, 0, 0, 9), 1);
        n.start_database_exchange(Ipv4Addr::new(10, 0, 0, 1), 100);
        assert!(!n.is_master);
    }

    #[test]
    fn exchange_done_with_empty_request_list_goes_straight_to_full() {
        let mut n = OspfNeighbor::new(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 2), 1);
        n.state = State::Exchange;
        n.exchange_done();
        assert_eq!(n.state, State::Full);
    }
}
