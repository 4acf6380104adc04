// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

pub mod database;

#[path = "leveling/leveling_store.rs"]
pub mod leveling;

#[path = "guild_settings/sqlite_settings_store.rs"]
pub mod guild_settings;
