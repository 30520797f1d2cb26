//! The BGP session finite-state machine (spec C3, RFC 4271 §8): a pure
//! transition table. Actions are emitted as effect records; the session
//! runtime (`bgp::session`) is the only thing that touches the wire or a
//! timer.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Idle,
    Connect,
    Active,
    OpenSent,
    OpenConfirm,
    Established,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    ManualStart,
    ManualStartWithPassive,
    ManualStop,
    ConnectRetryTimerExpires,
    HoldTimerExpires,
    KeepaliveTimerExpires,
    TcpConnectionConfirmed,
    TcpConnectionFails,
    BgpOpen,
    BgpOpenMsgErr,
    BgpHeaderErr,
    NotifMsgVerErr,
    KeepAliveMsg,
    UpdateMsg,
    UpdateMsgErr,
    NotifMsg,
}

/// An effect the runtime must realize; the FSM itself never touches I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    StartConnectRetryTimer,
    StopConnectRetryTimer,
    StartHoldTimer(u16),
    StopHoldTimer,
    StartKeepaliveTimer(u16),
    StopKeepaliveTimer,
    InitiateTcpConnection,
    ListenForTcpConnection,
    DropTcpConnection,
    SendOpen,
    SendKeepalive,
    SendNotification(u8, u8),
    ReleaseResources,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub effects: Vec<Effect>,
}

fn to_idle(subcode_on_notify: Option<(u8, u8)>) -> Transition {
    let mut effects = vec![
        Effect::StopConnectRetryTimer,
        Effect::StopHoldTimer,
        Effect::StopKeepaliveTimer,
        Effect::DropTcpConnection,
        Effect::ReleaseResources,
    ];
    if let Some((code, sub)) = subcode_on_notify {
        effects.insert(0, Effect::SendNotification(code, sub));
    }
    Transition { next: State::Idle, effects }
}

/// Apply `event` to a session currently in `state`. Returns `None` when the
/// event is not valid for this state — the caller raises `FsmViolation`
/// (spec §7) and, per RFC 4271 §8.2.2, falls back to Idle with a FSM Error
/// NOTIFICATION (error code 5) from OpenSent/OpenConfirm/Established.
pub fn transition(state: State, event: &Event, hold_time: u16) -> Option<Transition> {
    use Event::*;
    use State::*;

    match (state, event) {
        (Idle, ManualStart) => Some(Transition {
            next: Connect,
            effects: vec![Effect::InitiateTcpConnection, Effect::StartConnectRetryTimer],
        }),
        (Idle, ManualStartWithPassive) => Some(Transition {
            next: Active,
            effects: vec![Effect::ListenForTcpConnection, Effect::StartConnectRetryTimer],
        }),

        (Connect, ManualStop) => Some(Transition {
            next: Idle,
            effects: vec![Effect::DropTcpConnection, Effect::StopConnectRetryTimer, Effect::ReleaseResources],
        }),
        (Connect, ConnectRetryTimerExpires) => Some(Transition {
            next: Connect,
            effects: vec![Effect::DropTcpConnection, Effect::InitiateTcpConnection, Effect::StartConnectRetryTimer],
        }),
        (Connect, TcpConnectionConfirmed) => Some(Transition {
            next: OpenSent,
            effects: vec![Effect::StopConnectRetryTimer, Effect::SendOpen, Effect::StartHoldTimer(240)],
        }),
        (Connect, TcpConnectionFails) => Some(Transition {
            next: Active,
            effects: vec![Effect::StartConnectRetryTimer],
        }),
        (Connect, BgpOpen) => Some(Transition {
            next: OpenConfirm,
            effects: vec![Effect::StopConnectRetryTimer, Effect::SendOpen, Effect::SendKeepalive, Effect::StartHoldTimer(hold_time)],
        }),

        (Active, ManualStop) => Some(Transition {
            next: Idle,
            effects: vec![Effect::StopConnectRetryTimer, Effect::ReleaseResources],
        }),
        (Active, ConnectRetryTimerExpires) => Some(Transition {
            next: Connect,
            effects: vec![Effect::InitiateTcpConnection, Effect::StartConnectRetryTimer],
        }),
        (Active, TcpConnectionConfirmed) => Some(Transition {
            next: OpenSent,
            effects: vec![Effect::StopConnectRetryTimer, Effect::SendOpen, Effect::StartHoldTimer(240)],
        }),
        (Active, TcpConnectionFails) => Some(Transition {
            next: Idle,
            effects: vec![Effect::StartConnectRetryTimer, Effect::ReleaseResources],
        }),

        (OpenSent, ManualStop) => Some(Transition {
            next: Idle,
            effects: vec![Effect::SendNotification(6, 0), Effect::DropTcpConnection, Effect::ReleaseResources],
        }),
        (OpenSent, TcpConnectionFails) => Some(Transition {
            next: Active,
            effects: vec![Effect::StopHoldTimer, Effect::StartConnectRetryTimer],
        }),
        (OpenSent, BgpOpen) => Some(Transition {
            next: OpenConfirm,
            effects: vec![Effect::SendKeepalive, Effect::StartHoldTimer(hold_time), Effect::StartKeepaliveTimer(hold_time / 3)],
        }),
        (OpenSent, BgpHeaderErr) | (OpenSent, BgpOpenMsgErr) => Some(to_idle(Some((1, 0)))),
        (OpenSent, NotifMsgVerErr) => Some(Transition {
            next: Idle,
            effects: vec![Effect::StopConnectRetryTimer, Effect::DropTcpConnection, Effect::ReleaseResources],
        }),

        (OpenConfirm, ManualStop) => Some(Transition {
            next: Idle,
            effects: vec![Effect::SendNotification(6, 0), Effect::DropTcpConnection, Effect::ReleaseResources],
        }),
        (OpenConfirm, HoldTimerExpires) => Some(to_idle(Some((4, 0)))),
        (OpenConfirm, KeepaliveTimerExpires) => Some(Transition {
            next: OpenConfirm,
            effects: vec![Effect::SendKeepalive, Effect::StartKeepaliveTimer(hold_time / 3)],
        }),
        (OpenConfirm, TcpConnectionFails) | (OpenConfirm, NotifMsg) => Some(to_idle(None)),
        (OpenConfirm, KeepAliveMsg) => Some(Transition {
            next: Established,
            effects: vec![Effect::StartHoldTimer(hold_time)],
        }),
        (OpenConfirm, BgpHeaderErr) | (OpenConfirm, BgpOpenMsgErr) => Some(to_idle(Some((1, 0)))),

        (Established, ManualStop) => Some(Transition {
            next: Idle,
            effects: vec![Effect::SendNotification(6, 0), Effect::DropTcpConnection, Effect::ReleaseResources],
        }),
        (Established, HoldTimerExpires) => Some(to_idle(Some((4, 0)))),
        (Established, KeepaliveTimerExpires) => Some(Transition {
            next: Established,
            effects: vec![Effect::SendKeepalive, Effect::StartKeepaliveTimer(hold_time / 3)],
        }),
        (Established, KeepAliveMsg) => Some(Transition { next: Established, effects: vec![Effect::StartHoldTimer(hold_time)] }),
        (Established, UpdateMsg) => Some(Transition { next: Established, effects: vec![Effect::StartHoldTimer(hold_time)] }),
        (Established, UpdateMsgErr) => Some(to_idle(Some((3, 0)))),
        (Established, BgpHeaderErr) => Some(to_idle(Some((1, 0)))),
        (Established, TcpConnectionFails) | (Established, NotifMsg) => Some(to_idle(None)),

        // ManualStop is valid from every state (RFC 4271 §8.2.2); wire it
        // generically for states not already covered above.
        (_, ManualStop) => Some(to_idle(None)),
        _ => None,
    }
}

/// Only Established exchanges UPDATE/KEEPALIVE application traffic (spec
/// §4.3's key contract). Used to gate inbound message processing.
pub fn is_established(state: State) -> bool {
    state == State::Established
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_active_path_to_established() {
        let mut state = State::Idle;
        for event in [
            Event::ManualStart,
            Event::TcpConnectionConfirmed,
            Event::BgpOpen,
            Event::KeepAliveMsg,
        ] {
            let t = transition(state, &event, 90).expect("valid transition");
            state = t.next;
        }
        assert_eq!(state, State::Established);
    }

    #[test]
    fn invalid_event_in_idle_is_rejected() {
        assert!(transition(State::Idle, &Event::KeepAliveMsg, 90).is_none());
    }

    #[test]
    fn hold_timer_expiry_sends_code_4() {
        let t = transition(State::Established, &Event::HoldTimerExpires, 90).unwrap();
        assert_eq!(t.next, State::Idle);
        assert!(t.effects.contains(&Effect::SendNotification(4, 0)));
    }

    #[test]
    fn manual_stop_valid_from_every_state() {
        for state in [State::Idle, State::Connect, State::Active, State::OpenSent, State::OpenConfirm, State::Established] {
            assert!(transition(state, &Event::ManualStop, 90).is_some());
        }
    }
}
