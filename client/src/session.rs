//! Connect, match and room-membership state machine for one participant

use crate::transport::{RoomOptions, SessionCallbacks, Transport};
use log::{debug, info, warn};
use shared::level_label_for;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    ConnectedNoRoom,
    JoiningRoom,
    InRoom,
    LeavingRoom,
}

/// What the launcher screen shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LauncherUi {
    pub control_panel_visible: bool,
    pub progress_visible: bool,
    /// Why the last attempt ended, shown next to the control panel.
    pub status_cause: Option<String>,
}

impl LauncherUi {
    fn armed(cause: Option<String>) -> Self {
        Self {
            control_panel_visible: true,
            progress_visible: false,
            status_cause: cause,
        }
    }
}

/// Drives `Idle -> Connecting -> ConnectedNoRoom -> JoiningRoom -> InRoom
/// -> LeavingRoom -> Idle`.
///
/// Requests are fire-and-forget; each transition past `connect` happens in
/// a signal handler. Duplicate or late signals are tolerated: the join
/// intent is consumed once and at most one room creation is issued per
/// join attempt.
pub struct SessionCoordinator {
    state: SessionState,
    room_options: RoomOptions,
    join_intent: bool,
    create_requested: bool,
    ui: LauncherUi,
}

impl SessionCoordinator {
    pub fn new(max_participants: u8) -> Self {
        Self {
            state: SessionState::Idle,
            room_options: RoomOptions { max_participants },
            join_intent: false,
            create_requested: false,
            ui: LauncherUi::armed(None),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ui(&self) -> &LauncherUi {
        &self.ui
    }

    pub fn room_options(&self) -> RoomOptions {
        self.room_options
    }

    pub fn is_in_room(&self) -> bool {
        self.state == SessionState::InRoom
    }

    /// Starts matchmaking.
    ///
    /// When already connected to the matchmaker this goes straight to a
    /// random join; otherwise it starts the handshake and remembers the
    /// intent to join until the handshake completes.
    pub fn connect(&mut self, transport: &mut dyn Transport) {
        match self.state {
            SessionState::Connecting => {
                debug!("connect() ignored, handshake already in progress");
                return;
            }
            SessionState::JoiningRoom | SessionState::InRoom | SessionState::LeavingRoom => {
                debug!("connect() ignored in state {:?}", self.state);
                return;
            }
            SessionState::Idle | SessionState::ConnectedNoRoom => {}
        }

        self.ui = LauncherUi {
            control_panel_visible: false,
            progress_visible: true,
            status_cause: None,
        };

        if transport.is_connected() {
            self.begin_join(transport);
        } else {
            self.join_intent = transport.connect_using_settings();
            if self.join_intent {
                self.state = SessionState::Connecting;
            } else {
                warn!("Transport refused to start the connection");
                self.ui = LauncherUi::armed(Some("connection could not be started".to_string()));
            }
        }
    }

    /// Leaves the current room. Returns false when not in a room.
    pub fn leave_room(&mut self, transport: &mut dyn Transport) -> bool {
        if self.state != SessionState::InRoom {
            debug!("leave_room() ignored in state {:?}", self.state);
            return false;
        }

        info!("Leaving room");
        transport.leave_room();
        self.state = SessionState::LeavingRoom;
        true
    }

    fn begin_join(&mut self, transport: &mut dyn Transport) {
        self.create_requested = false;
        self.state = SessionState::JoiningRoom;
        transport.join_random_room();
    }
}

impl SessionCallbacks for SessionCoordinator {
    fn on_connected_to_matchmaker(&mut self, transport: &mut dyn Transport) {
        info!("Connected to matchmaker");

        if matches!(
            self.state,
            SessionState::Idle | SessionState::Connecting | SessionState::ConnectedNoRoom
        ) {
            self.state = SessionState::ConnectedNoRoom;
        }

        // Reconnect signals after leaving a room must not rejoin on their own.
        if self.join_intent {
            self.join_intent = false;
            self.begin_join(transport);
        }
    }

    fn on_join_random_failed(&mut self, transport: &mut dyn Transport, code: i16, message: &str) {
        if self.state != SessionState::JoiningRoom {
            warn!("Join-random failure ({}) outside of a join attempt", code);
            return;
        }
        if self.create_requested {
            debug!("Room creation already requested, ignoring failure {}", code);
            return;
        }

        info!(
            "No random room available ({}: {}), creating one for {} participants",
            code, message, self.room_options.max_participants
        );
        self.create_requested = true;
        transport.create_room(None, self.room_options);
    }

    fn on_create_room_failed(&mut self, _transport: &mut dyn Transport, code: i16, message: &str) {
        warn!("Room creation failed ({}): {}", code, message);
        self.create_requested = false;
        self.state = SessionState::ConnectedNoRoom;
        self.ui = LauncherUi::armed(Some(format!("room creation failed: {}", message)));
    }

    fn on_joined_room(&mut self, transport: &mut dyn Transport) {
        self.state = SessionState::InRoom;
        self.create_requested = false;
        self.ui = LauncherUi {
            control_panel_visible: false,
            progress_visible: false,
            status_cause: None,
        };

        let count = transport
            .current_room()
            .map(|room| room.participant_count())
            .unwrap_or(0);
        info!("Joined room with {} participant(s)", count);

        // Later joiners pick the level up from the room's scene sync.
        if count == 1 {
            let label = level_label_for(1);
            info!("First in room, loading '{}'", label);
            transport.load_level(&label);
        }
    }

    fn on_disconnected(&mut self, _transport: &mut dyn Transport, cause: &str) {
        warn!("Disconnected: {}", cause);
        self.state = SessionState::Idle;
        self.join_intent = false;
        self.create_requested = false;
        self.ui = LauncherUi::armed(Some(cause.to_string()));
    }

    fn on_left_room(&mut self, _transport: &mut dyn Transport) {
        info!("Left room, returning to launcher");
        self.state = SessionState::Idle;
        self.create_requested = false;
        self.ui = LauncherUi::armed(None);
    }
}
