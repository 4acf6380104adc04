// Discord glue for the leveling engine: gateway events, level-up announcements,
// serenity implementations of the core ports and the background jobs.

pub mod activity_events;
pub mod background_tasks;
pub mod leveling_announcements;
pub mod platform_adapters;
