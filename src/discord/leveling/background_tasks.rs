// Periodic leveling jobs: voice scans, drop spawning and the drop sweep.
//
// All three loops share one watch channel. Flipping it to `true` makes every
// loop return at its next wait; work already in progress (an award, a claim
// prompt being posted) runs to completion first.

use crate::discord::leveling::activity_events::{drop_targets, voice_snapshots};
use crate::discord::leveling::leveling_announcements::handle_level_up;
use crate::discord::leveling::platform_adapters::SerenityDropAnnouncer;
use crate::discord::Data;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

pub struct LevelingTasks {
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for LevelingTasks {
    fn default() -> Self {
        Self::new()
    }
}

impl LevelingTasks {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the voice scan, drop spawner and drop sweeper.
    pub async fn start(&self, ctx: serenity::Context, data: Data) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            tracing::debug!("Leveling tasks already running");
            return;
        }

        handles.push(tokio::spawn(voice_scan_loop(
            ctx.clone(),
            data.clone(),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(drop_spawn_loop(
            ctx.clone(),
            data.clone(),
            self.shutdown.subscribe(),
        )));
        handles.push(tokio::spawn(drop_sweep_loop(
            ctx,
            data,
            self.shutdown.subscribe(),
        )));

        tracing::info!("Leveling background tasks started");
    }

    /// Stop every loop and wait for them to finish.
    pub async fn shutdown(&self) {
        // Ignore the error: it only means no loop is listening anymore.
        let _ = self.shutdown.send(true);

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Leveling task ended abnormally");
            }
        }
        tracing::info!("Leveling background tasks stopped");
    }
}

/// Sleep for `wait`, or return true early if shutdown was requested.
async fn wait_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => false,
        // A dropped sender counts as shutdown too.
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

async fn voice_scan_loop(
    ctx: serenity::Context,
    data: Data,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = data.leveling.config().voice_scan_interval();

    while !wait_or_shutdown(interval, &mut shutdown).await {
        let snapshots = voice_snapshots(&ctx.cache);
        let report = data
            .leveling
            .run_voice_scan(&snapshots, tokio::time::Instant::now())
            .await;

        tracing::debug!(
            channels = snapshots.len(),
            awarded = report.awarded,
            cooling_down = report.cooling_down,
            failed = report.failed,
            "Voice scan finished"
        );

        for change in &report.level_ups {
            handle_level_up(&ctx, &data, change, None).await;
        }
    }
}

async fn drop_spawn_loop(
    ctx: serenity::Context,
    data: Data,
    mut shutdown: watch::Receiver<bool>,
) {
    let announcer = SerenityDropAnnouncer::new(ctx.http.clone());
    let mut rng = StdRng::from_entropy();

    loop {
        // A fresh wait every cycle.
        let wait = data.leveling.config().roll_drop_interval(&mut rng);
        if wait_or_shutdown(wait, &mut shutdown).await {
            break;
        }

        let targets = drop_targets(&ctx.cache);
        let spawned = data
            .leveling
            .spawn_drops(&targets, &announcer, &mut rng, Utc::now())
            .await;
        tracing::debug!(guilds = targets.len(), spawned = spawned.len(), "Drop cycle finished");
    }
}

async fn drop_sweep_loop(
    ctx: serenity::Context,
    data: Data,
    mut shutdown: watch::Receiver<bool>,
) {
    let announcer = SerenityDropAnnouncer::new(ctx.http.clone());
    let interval = data.leveling.config().drop_sweep_interval();

    while !wait_or_shutdown(interval, &mut shutdown).await {
        let swept = data
            .leveling
            .sweep_expired_drops(&announcer, Utc::now())
            .await;
        if swept > 0 {
            tracing::info!(swept, "Expired XP drops removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_returns_false_when_the_timer_fires() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!wait_or_shutdown(Duration::from_secs(300), &mut rx).await);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_long_wait() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            wait_or_shutdown(Duration::from_secs(3600), &mut rx).await
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn dropped_sender_counts_as_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(wait_or_shutdown(Duration::from_secs(3600), &mut rx).await);
    }

    #[tokio::test]
    async fn shutdown_without_start_is_a_no_op() {
        let tasks = LevelingTasks::new();
        tasks.shutdown().await;
        assert!(tasks.handles.lock().await.is_empty());
    }
}
