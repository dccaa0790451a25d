//! Master evaluation and master-gated level transitions
//!
//! There is no election round. Every participant evaluates mastership
//! locally from the room projection: the member that joined earliest and
//! is still present is the master. Membership broadcasts already reach
//! everyone in the same order, so everyone reaches the same answer.

use crate::error::AuthorityError;
use crate::transport::{SessionCallbacks, Transport};
use log::{error, info};
use shared::{level_label_for, ParticipantInfo};

#[derive(Debug, Default)]
pub struct AuthorityManager {
    last_requested: Option<String>,
}

impl AuthorityManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_master(&self, transport: &dyn Transport) -> bool {
        transport.is_master()
    }

    /// Level most recently broadcast by this participant.
    pub fn last_requested(&self) -> Option<&str> {
        self.last_requested.as_deref()
    }

    /// Broadcasts a level change to the room.
    ///
    /// Only the master may do this. Anyone else gets an error back and
    /// nothing is sent; a late membership signal can legitimately land
    /// here after mastership moved, so this is never fatal.
    pub fn request_level_load(
        &mut self,
        transport: &mut dyn Transport,
        label: &str,
    ) -> Result<(), AuthorityError> {
        if !transport.is_master() {
            error!("Trying to load level '{}' but we are not the master", label);
            return Err(AuthorityError::NotMaster {
                label: label.to_string(),
            });
        }

        info!("Loading level: {}", label);
        transport.load_level(label);
        self.last_requested = Some(label.to_string());
        Ok(())
    }

    fn reload_arena(&mut self, transport: &mut dyn Transport) {
        if !transport.is_master() {
            return;
        }

        let count = transport
            .current_room()
            .map(|room| room.participant_count())
            .unwrap_or(0);
        // Mastership was just checked, so this cannot be refused.
        let _ = self.request_level_load(transport, &level_label_for(count));
    }
}

impl SessionCallbacks for AuthorityManager {
    fn on_participant_entered(
        &mut self,
        transport: &mut dyn Transport,
        participant: &ParticipantInfo,
    ) {
        info!("{} ({}) entered the room", participant.nickname, participant.id);
        self.reload_arena(transport);
    }

    fn on_participant_left(&mut self, transport: &mut dyn Transport, participant: &ParticipantInfo) {
        info!("{} ({}) left the room", participant.nickname, participant.id);
        self.reload_arena(transport);
    }

    fn on_left_room(&mut self, _transport: &mut dyn Transport) {
        self.last_requested = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::dispatch;
    use crate::transport::mock::{info, Call, MockTransport};
    use crate::transport::Signal;
    use shared::ParticipantId;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_non_master_cannot_load() {
        let mut authority = AuthorityManager::new();
        let mut transport = MockTransport::in_room(2, vec![info(1, 1), info(2, 2)]);

        let result = authority.request_level_load(&mut transport, "Room for 2");

        assert_err!(result);
        assert!(transport.calls.is_empty());
        assert!(authority.last_requested().is_none());
    }

    #[test]
    fn test_master_loads_level() {
        let mut authority = AuthorityManager::new();
        let mut transport = MockTransport::in_room(1, vec![info(1, 1)]);

        assert_ok!(authority.request_level_load(&mut transport, "Room for 1"));
        assert_eq!(transport.calls, vec![Call::LoadLevel("Room for 1".to_string())]);
        assert_eq!(authority.last_requested(), Some("Room for 1"));
    }

    #[test]
    fn test_master_reloads_when_participant_enters() {
        let mut authority = AuthorityManager::new();
        let mut transport = MockTransport::in_room(1, vec![info(1, 1)]);
        transport.room_mut().add_member(info(2, 2));

        dispatch(
            &mut authority,
            &mut transport,
            &Signal::ParticipantEntered(info(2, 2)),
        );

        assert_eq!(transport.calls, vec![Call::LoadLevel("Room for 2".to_string())]);
    }

    #[test]
    fn test_non_master_ignores_membership_changes() {
        let mut authority = AuthorityManager::new();
        let mut transport = MockTransport::in_room(2, vec![info(1, 1), info(2, 2)]);
        transport.room_mut().add_member(info(3, 3));

        dispatch(
            &mut authority,
            &mut transport,
            &Signal::ParticipantEntered(info(3, 3)),
        );

        assert!(transport.calls.is_empty());
    }

    #[test]
    fn test_promoted_master_reloads_after_master_leaves() {
        let mut authority = AuthorityManager::new();
        let mut transport = MockTransport::in_room(2, vec![info(1, 1), info(2, 2), info(3, 3)]);
        assert!(!authority.is_master(&transport));

        let departed = transport.room_mut().remove_member(ParticipantId(1)).unwrap();
        dispatch(
            &mut authority,
            &mut transport,
            &Signal::ParticipantLeft(departed),
        );

        assert!(authority.is_master(&transport));
        assert_eq!(transport.calls, vec![Call::LoadLevel("Room for 2".to_string())]);
    }

    #[test]
    fn test_exactly_one_master_per_room() {
        let members = vec![info(4, 7), info(9, 2), info(6, 5)];
        let masters: Vec<u32> = members
            .iter()
            .filter(|m| MockTransport::in_room(m.id.0, members.clone()).is_master())
            .map(|m| m.id.0)
            .collect();

        assert_eq!(masters, vec![9]);
    }
}
