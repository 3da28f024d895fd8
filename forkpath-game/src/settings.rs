use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{KEY_MUSIC_ON, KEY_SOUND_ON, KEY_VIBRATION_ON, TOGGLE_OFF, TOGGLE_ON};
use crate::storage::{KeyValueStore, StorageError};

/// Player-facing on/off toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKind {
    Sound,
    Music,
    Vibration,
}

impl SettingKind {
    pub const ALL: [Self; 3] = [Self::Sound, Self::Music, Self::Vibration];

    #[must_use]
    pub const fn key(self) -> &'static str {
        match self {
            Self::Sound => KEY_SOUND_ON,
            Self::Music => KEY_MUSIC_ON,
            Self::Vibration => KEY_VIBRATION_ON,
        }
    }
}

impl fmt::Display for SettingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sound => write!(f, "sound"),
            Self::Music => write!(f, "music"),
            Self::Vibration => write!(f, "vibration"),
        }
    }
}

/// Toggle persistence. Absent keys read as on.
#[derive(Debug, Clone)]
pub struct Settings<S> {
    store: S,
}

impl<S: KeyValueStore> Settings<S> {
    #[must_use]
    pub const fn new(store: S) -> Self {
        Self { store }
    }

    #[must_use]
    pub fn is_on(&self, kind: SettingKind) -> bool {
        match self.store.get_int(kind.key()) {
            Ok(value) => value.unwrap_or(TOGGLE_ON) != TOGGLE_OFF,
            Err(err) => {
                log::warn!("failed to read {kind} toggle: {err}");
                true
            }
        }
    }

    /// # Errors
    ///
    /// Returns an error if the toggle cannot be persisted.
    pub fn set(&self, kind: SettingKind, on: bool) -> Result<(), StorageError> {
        let value = if on { TOGGLE_ON } else { TOGGLE_OFF };
        self.store.set_int(kind.key(), value)?;
        self.store.flush()
    }

    /// Flip a toggle and return its new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the toggle cannot be persisted.
    pub fn toggle(&self, kind: SettingKind) -> Result<bool, StorageError> {
        let next = !self.is_on(kind);
        self.set(kind, next)?;
        Ok(next)
    }
}
