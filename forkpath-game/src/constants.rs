//! Centralized persisted keys and tuning defaults for Forkpath.
//!
//! Every durable key the engine touches is listed here so that a store file
//! can be audited against a single table.

// Persisted keys -----------------------------------------------------------
pub const KEY_CURRENT_LEVEL_INDEX: &str = "current-level-index";
pub const KEY_MONEY_BALANCE: &str = "money-balance";
pub const KEY_MONEY_INITIALIZED: &str = "money-initialized";
pub const KEY_SOUND_ON: &str = "sound-on";
pub const KEY_MUSIC_ON: &str = "music-on";
pub const KEY_VIBRATION_ON: &str = "vibration-on";

// Economy tuning -----------------------------------------------------------
pub const DEFAULT_START_BALANCE: i64 = 200_000;
pub const DEFAULT_COST_PER_CHOICE: i64 = 30_000;
pub const DEFAULT_REWARD_PER_LEVEL: i64 = 150_000;

// Flow timing (seconds) ----------------------------------------------------
pub const DEFAULT_BOOT_LOADING_SECS: f32 = 0.0;
pub const DEFAULT_STAGE_LOADING_SECS: f32 = 0.0;
pub const DEFAULT_INTRO_FALLBACK_SECS: f32 = 1.0;
pub const DEFAULT_CONNECTIVITY_CHECK_SECS: f32 = 2.0;
/// Longest authored delay accepted by config and catalog validation.
pub const MAX_DELAY_SECS: f32 = 3_600.0;

// Presentation time scale --------------------------------------------------
pub const TIME_SCALE_RUNNING: f32 = 1.0;
pub const TIME_SCALE_PAUSED: f32 = 0.0;

// Toggle encoding ----------------------------------------------------------
pub const TOGGLE_ON: i64 = 1;
pub const TOGGLE_OFF: i64 = 0;
