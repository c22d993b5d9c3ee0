use dart_core::state::{allowed_transitions, validate_transition, MissionState};
use proptest::prelude::*;

#[test]
fn test_init_transitions() {
    assert!(validate_transition(MissionState::Init, MissionState::Recall).is_ok());
    assert!(validate_transition(MissionState::Init, MissionState::Investigate).is_ok());

    // Invalid
    assert!(validate_transition(MissionState::Init, MissionState::Plan).is_err());
    assert!(validate_transition(MissionState::Init, MissionState::Execute).is_err());
}

#[test]
fn test_retry_returns_to_investigate() {
    for from in [
        MissionState::Decide,
        MissionState::Plan,
        MissionState::SafetyReview,
        MissionState::Execute,
        MissionState::Verify,
    ] {
        assert!(validate_transition(from, MissionState::Investigate).is_ok());
        assert!(validate_transition(from, MissionState::Abort).is_ok());
    }
    // Recall happens once, before the first investigation
    assert!(validate_transition(MissionState::Verify, MissionState::Recall).is_err());
}

#[test]
fn test_success_only_after_decide_or_verify() {
    let sources: Vec<MissionState> = MissionState::ALL
        .into_iter()
        .filter(|s| validate_transition(*s, MissionState::Success).is_ok())
        .collect();
    assert_eq!(sources, vec![MissionState::Decide, MissionState::Verify]);
}

fn any_state() -> impl Strategy<Value = MissionState> {
    prop_oneof![
        Just(MissionState::Init),
        Just(MissionState::Recall),
        Just(MissionState::Investigate),
        Just(MissionState::Decide),
        Just(MissionState::Plan),
        Just(MissionState::SafetyReview),
        Just(MissionState::Execute),
        Just(MissionState::Verify),
        Just(MissionState::Success),
        Just(MissionState::Abort),
    ]
}

proptest! {
    #[test]
    fn prop_all_transitions_are_subset_of_allowed(from in any_state(), to in any_state()) {
        let res = validate_transition(from, to);
        let allowed = allowed_transitions(from);
        if allowed.contains(&to) {
            prop_assert!(res.is_ok());
        } else {
            prop_assert!(res.is_err());
        }
    }

    #[test]
    fn prop_terminal_states_have_no_exits(from in any_state()) {
        prop_assert_eq!(from.is_terminal(), allowed_transitions(from).is_empty());
    }
}
