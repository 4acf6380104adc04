// Discord commands module.
// Each feature gets its own command file.

pub mod leveling;

use crate::discord::{Data, Error};

/// Every command the bot registers, for the poise framework options.
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        leveling::rank(),
        leveling::leaderboard(),
        leveling::catch(),
        leveling::levelreward(),
        leveling::xpstats(),
    ]
}
