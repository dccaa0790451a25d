//! Local key/value preferences and the player name stored in them

use crate::error::{InputError, PrefsError};
use crate::transport::Transport;
use log::{debug, info, warn};
use shared::{clamp_nickname, MAX_NICKNAME_LEN};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const PLAYER_NAME_PREF_KEY: &str = "PlayerName";

pub trait PrefsStore {
    fn get_string(&self, key: &str) -> Option<String>;
    fn set_string(&mut self, key: &str, value: &str);
    fn has_key(&self, key: &str) -> bool;
}

/// In-memory preferences, lost on exit.
#[derive(Debug, Default)]
pub struct MemoryPrefs {
    values: HashMap<String, String>,
}

impl MemoryPrefs {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrefsStore for MemoryPrefs {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
    }

    fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Preferences persisted as a bincode-encoded map. Every write is saved
/// immediately.
#[derive(Debug)]
pub struct FilePrefs {
    path: PathBuf,
    values: HashMap<String, String>,
}

impl FilePrefs {
    /// Opens the store at `path`. A missing file starts out empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PrefsError> {
        let path = path.as_ref().to_path_buf();
        let values = match fs::read(&path) {
            Ok(bytes) => bincode::deserialize(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No preferences at {}, starting empty", path.display());
                HashMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), PrefsError> {
        let bytes = bincode::serialize(&self.values)?;
        fs::write(&self.path, bytes)?;
        Ok(())
    }
}

impl PrefsStore for FilePrefs {
    fn get_string(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.values.insert(key.to_string(), value.to_string());
        if let Err(e) = self.save() {
            warn!("Failed to save preferences to {}: {}", self.path.display(), e);
        }
    }

    fn has_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }
}

/// Reads the stored player name and hands it to the transport as the
/// nickname. Returns the name when one was stored.
pub fn load_player_name(prefs: &dyn PrefsStore, transport: &mut dyn Transport) -> Option<String> {
    if !prefs.has_key(PLAYER_NAME_PREF_KEY) {
        return None;
    }

    let stored = prefs.get_string(PLAYER_NAME_PREF_KEY)?;
    let name = clamp_nickname(&stored).to_string();
    transport.set_nickname(&name);
    Some(name)
}

/// Sets the player's display name and remembers it for next time.
/// An empty or overlong name is refused and nothing is changed.
pub fn set_player_name(
    prefs: &mut dyn PrefsStore,
    transport: &mut dyn Transport,
    name: &str,
) -> Result<(), InputError> {
    if name.is_empty() {
        warn!("Player name is null or empty");
        return Err(InputError::EmptyName);
    }
    if name.len() > MAX_NICKNAME_LEN {
        warn!("Player name is {} bytes, limit is {}", name.len(), MAX_NICKNAME_LEN);
        return Err(InputError::NameTooLong {
            len: name.len(),
            max: MAX_NICKNAME_LEN,
        });
    }

    transport.set_nickname(name);
    prefs.set_string(PLAYER_NAME_PREF_KEY, name);
    info!("Player name set to '{}'", name);
    Ok(())
}
