//! The launcher hands each spawned participant its identity through environment
//! variables; these tests cover the participant-side recovery of that identity.
//! Kept in their own binary because they mutate process-global environment state.

use simple_pario::{PariError, ParticipantGroup};

#[test]
fn group_identity_round_trips_through_the_environment() {
    assert!(!ParticipantGroup::is_spawned());
    let err = ParticipantGroup::from_env().unwrap_err();
    assert!(matches!(err, PariError::InvalidArgument(_)));

    std::env::set_var("PARIO_RANK", "2");
    std::env::set_var("PARIO_SIZE", "4");
    assert!(ParticipantGroup::is_spawned());
    let group = ParticipantGroup::from_env().unwrap();
    assert_eq!(group.rank(), 2);
    assert_eq!(group.size(), 4);

    // An identity the launcher could never have produced is rejected.
    std::env::set_var("PARIO_RANK", "4");
    assert!(ParticipantGroup::from_env().is_err());
    std::env::set_var("PARIO_RANK", "not-a-rank");
    assert!(matches!(
        ParticipantGroup::from_env().unwrap_err(),
        PariError::InvalidArgument(_)
    ));

    std::env::remove_var("PARIO_RANK");
    std::env::remove_var("PARIO_SIZE");
}
