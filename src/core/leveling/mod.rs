// Core leveling module - XP ledger, level curve, drops and role rewards.
// Nothing in here knows about Discord; the discord layer feeds it plain ids.

pub mod activity_ingest;
pub mod cooldowns;
pub mod drops;
pub mod level_curve;
pub mod leveling_config;
pub mod leveling_models;
pub mod leveling_service;
pub mod reward_dispatch;

pub use activity_ingest::*;
pub use drops::*;
pub use leveling_config::*;
pub use leveling_models::*;
pub use leveling_service::*;
pub use reward_dispatch::*;
