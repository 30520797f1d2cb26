//! The OSPF neighbor finite-state machine (spec C3, RFC 2328 §10.3): a pure
//! transition table mirroring `bgp::fsm`'s shape. Unlike BGP, an invalid event
//! here is not fatal (spec §7) — OSPF's FSM is more forgiving by design, so
//! callers log and ignore rather than tearing the neighbor down.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum State {
    Down,
    Attempt,
    Init,
    TwoWay,
    ExStart,
    Exchange,
    Loading,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    HelloReceived,
    Start,
    TwoWayReceived,
    NegotiationDone,
    ExchangeDone,
    BadLsReq,
    LoadingDone,
    AdjOk,
    SeqNumberMismatch,
    OneWay,
    KillNbr,
    InactivityTimer,
    LlDown,
}

/// An effect the caller (interface/neighbor runtime) must realize; the FSM
/// itself never builds a packet or touches a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartInactivityTimer,
    ClearLists,
    GenerateDdSequenceNumber,
    SendDatabaseDescription,
    ReoriginateRouterLsa,
    FloodSelfOriginatedLsas,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub effects: Vec<Effect>,
}

fn to(state: State, effects: Vec<Effect>) -> Option<Transition> {
    Some(Transition { next: state, effects })
}

/// Apply `event` to a neighbor currently in `state`. Returns `None` when the
/// event is not valid for this state; RFC 2328's neighbor FSM treats that as
/// a no-op rather than an error (spec §7's `FsmViolation` handling for OSPF).
pub fn transition(state: State, event: Event) -> Option<Transition> {
    use Event::*;
    use State::*;

    match (state, event) {
        (Down, Start) => to(Attempt, vec![Effect::StartInactivityTimer]),
        (Down, HelloReceived) => to(Init, vec![Effect::StartInactivityTimer]),

        (Attempt, HelloReceived) => to(Init, vec![Effect::StartInactivityTimer]),

        (Init, TwoWayReceived) => to(TwoWay, vec![]),
        (Init, OneWay) => to(Init, vec![]),
        (Init, HelloReceived) => to(Init, vec![Effect::StartInactivityTimer]),

        // AdjOk? is evaluated by the caller (DR/BDR relevance, spec §4.7);
        // the FSM only models the transition once that decision is made.
        (TwoWay, AdjOk) => to(ExStart, vec![Effect::GenerateDdSequenceNumber, Effect::SendDatabaseDescription]),
        (TwoWay, HelloReceived) => to(TwoWay, vec![Effect::StartInactivityTimer]),

        (ExStart, NegotiationDone) => to(Exchange, vec![Effect::SendDatabaseDescription]),
        (ExStart, HelloReceived) => to(ExStart, vec![Effect::StartInactivityTimer]),

        (Exchange, ExchangeDone) => to(Loading, vec![]),
        (Exchange, SeqNumberMismatch) | (Exchange, BadLsReq) => {
            to(ExStart, vec![Effect::ClearLists, Effect::GenerateDdSequenceNumber, Effect::SendDatabaseDescription])
        }
        (Exchange, HelloReceived) => to(Exchange, vec![Effect::StartInactivityTimer]),

        (Loading, LoadingDone) => to(Full, vec![Effect::ReoriginateRouterLsa, Effect::FloodSelfOriginatedLsas]),
        (Loading, SeqNumberMismatch) | (Loading, BadLsReq) => {
            to(ExStart, vec![Effect::ClearLists, Effect::GenerateDdSequenceNumber, Effect::SendDatabaseDescription])
        }
        (Loading, HelloReceived) => to(Loading, vec![Effect::StartInactivityTimer]),

        (Full, HelloReceived) => to(Full, vec![Effect::StartInactivityTimer]),
        (Full, SeqNumberMismatch) | (Full, BadLsReq) => {
            to(ExStart, vec![Effect::ClearLists, Effect::GenerateDdSequenceNumber, Effect::SendDatabaseDescription])
        }

        // Every state above Init collapses to Init on 1-Way (loss of
        // bidirectional communication) or to Down on KillNbr/InactivityTimer
        // /LLDown, clearing summary/request/retransmission lists.
        (s, OneWay) if s > Init => to(Init, vec![Effect::ClearLists]),
        (s, KillNbr | InactivityTimer | LlDown) if s != Down => to(Down, vec![Effect::ClearLists]),

        _ => None,
    }
}

pub fn is_adjacent(state: State) -> bool {
    state >= State::ExStart
}

pub fn is_full(state: State) -> bool {
    state == State::Full
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_path_to_full() {
        let mut state = State::Down;
        for event in [
            Event::Start,
            Event::HelloReceived,
            Event::TwoWayReceived,
            Event::AdjOk,
            Event::NegotiationDone,
            Event::ExchangeDone,
            Event::LoadingDone,
        ] {
            let t = transition(state, event).expect("valid transition");
            state = t.next;
        }
        assert_eq!(state, State::Full);
    }

    #[test]
    fn invalid_event_in_down_is_rejected() {
        assert!(transition(State::Down, Event::NegotiationDone).is_none());
    }

    #[test]
    fn one_way_drops_adjacency_states_to_init() {
        for state in [State::TwoWay, State::ExStart, State::Exchange, State::Loading, State::Full] {
            let t = transition(state, Event::OneWay).unwrap();
            assert_eq!(t.next, State::Init);
        }
    }

    #[test]
    fn kill_nbr_valid_from_every_non_down_state() {
        for state in [State::Attempt, State::Init, State::TwoWay, State::ExStart, State::Exchange, State::Loading, State::Full] {
            assert_eq!(transition(state, Event::KillNbr).unwrap().next, State::Down);
        }
    }

    #[test]
    fn full_triggers_reorigination_and_flooding() {
        let t = transition(State::Loading, Event::LoadingDone).unwrap();
        assert!(t.effects.contains(&Effect::ReoriginateRouterLsa));
        assert!(t.effects.contains(&Effect::FloodSelfOriginatedLsas));
    }
}
