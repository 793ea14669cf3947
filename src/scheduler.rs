//! Scheduler: keeps one game open for purchases at all times.
//!
//! When a game reaches a terminal state and, after the configured cooldown,
//! no other game is still `scheduled`, the next one is created. Games opened
//! through the API or recovered at startup count as open games, so they never
//! multiply the cadence. Creation failures are retried after `retry_delay`.

use crate::{
    config::SchedulerConfig,
    errors::BingoResult,
    games::types::GameStatus,
    lifecycle::{GameController, GameFinished},
};
use chrono::{DateTime, Timelike, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info};

/// Special-game cadence: every `special_every`-th game, or any game created
/// during one of `special_hours_utc`
pub fn is_special_slot(config: &SchedulerConfig, sequence: u64, now: DateTime<Utc>) -> bool {
    let by_count = config.special_every > 0 && sequence > 0 && sequence % config.special_every as u64 == 0;
    by_count || config.special_hours_utc.contains(&now.hour())
}

pub struct Scheduler {
    controller: Arc<GameController>,
    config: SchedulerConfig,
    cooldown: Duration,
    retry_delay: Duration,
    finished_rx: mpsc::UnboundedReceiver<GameFinished>,
    shutdown_rx: watch::Receiver<bool>,
    sequence: u64,
}

impl Scheduler {
    pub fn new(
        controller: Arc<GameController>,
        config: SchedulerConfig,
        finished_rx: mpsc::UnboundedReceiver<GameFinished>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            controller,
            cooldown: Duration::from_millis(config.cooldown_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            config,
            finished_rx,
            shutdown_rx,
            sequence: 0,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Open the next game, retrying until it is persisted or shutdown is requested
    async fn open_next(&mut self) -> bool {
        loop {
            match self.create_one() {
                Ok(()) => return true,
                Err(e) => {
                    error!(error = %e, retry_in_ms = self.retry_delay.as_millis() as u64, "Failed to schedule game");
                    if !self.wait(self.retry_delay).await {
                        return false;
                    }
                }
            }
        }
    }

    fn create_one(&mut self) -> BingoResult<()> {
        let sequence = self.sequence + 1;
        let special = is_special_slot(&self.config, sequence, Utc::now());
        let game_id = self.controller.create_game(special)?;
        self.sequence = sequence;
        debug!(game_id = %game_id, sequence, special, "Scheduler opened game");
        Ok(())
    }

    /// Games still accepting purchases. A failed read counts as none.
    fn open_games(&self) -> usize {
        match self.controller.store().games() {
            Ok(games) => games.iter().filter(|g| g.status == GameStatus::Scheduled).count(),
            Err(e) => {
                error!(error = %e, "Failed to read open games");
                0
            }
        }
    }

    async fn wait(&mut self, duration: Duration) -> bool {
        if *self.shutdown_rx.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.shutdown_rx.changed() => false,
        }
    }

    async fn run(mut self) {
        info!(cooldown_ms = self.config.cooldown_ms, "Scheduler started");

        if self.open_games() == 0 && !self.open_next().await {
            return;
        }

        loop {
            let finished = tokio::select! {
                finished = self.finished_rx.recv() => finished,
                _ = self.shutdown_rx.changed() => None,
            };
            let Some(finished) = finished else { break };

            info!(game_id = %finished.game_id, status = %finished.status, "Game finished");
            if !self.wait(self.cooldown).await {
                break;
            }
            let open = self.open_games();
            if open > 0 {
                debug!(open, "A game is still open for purchases, not scheduling another");
                continue;
            }
            if !self.open_next().await {
                break;
            }
        }

        info!(games_opened = self.sequence, "Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BingoConfig, game_store::GameStore, games::vrf_engine::VRFSeedEngine, hub::BroadcastHub,
        storage::MemoryStorage,
    };
    use chrono::TimeZone;

    fn scheduled_ids(controller: &GameController) -> Vec<String> {
        controller
            .store()
            .games()
            .unwrap()
            .into_iter()
            .filter(|g| g.status == GameStatus::Scheduled)
            .map(|g| g.id)
            .collect()
    }

    async fn wait_for_one_open(controller: &GameController, not: Option<&str>) -> String {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let open = scheduled_ids(controller);
            if open.len() == 1 && Some(open[0].as_str()) != not {
                return open[0].clone();
            }
            assert!(tokio::time::Instant::now() < deadline, "open games: {:?}", open);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_finished_games_do_not_multiply_open_games() {
        let mut config = BingoConfig::testing();
        config.game.purchase_window_ms = 60_000;
        let store = GameStore::new(Arc::new(MemoryStorage::new()), 4);
        let hub = BroadcastHub::new(&config.broadcast);
        let (tx, rx) = mpsc::unbounded_channel();
        let controller =
            GameController::new(store, hub, Arc::new(VRFSeedEngine::new_random()), Arc::new(config.clone()), tx);
        let scheduler =
            Scheduler::new(Arc::clone(&controller), config.scheduler.clone(), rx, controller.shutdown_signal()).spawn();

        let first = wait_for_one_open(&controller, None).await;

        // Games opened by hand also report when they finish
        for _ in 0..3 {
            let game_id = controller.create_game(false).unwrap();
            controller.cancel(&game_id, "operator").unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(scheduled_ids(&controller), vec![first.clone()]);

        controller.cancel(&first, "operator").unwrap();
        wait_for_one_open(&controller, Some(&first)).await;
        assert_eq!(controller.store().games().unwrap().len(), 5);

        controller.shutdown().await;
        scheduler.await.unwrap();
    }

    #[test]
    fn test_special_cadence() {
        let config = SchedulerConfig {
            special_every: 3,
            special_hours_utc: vec![21],
            ..Default::default()
        };
        let morning = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let evening = Utc.with_ymd_and_hms(2024, 5, 1, 21, 30, 0).unwrap();

        let specials: Vec<u64> = (1..=9).filter(|n| is_special_slot(&config, *n, morning)).collect();
        assert_eq!(specials, vec![3, 6, 9]);
        assert!(is_special_slot(&config, 1, evening));

        let never = SchedulerConfig {
            special_every: 0,
            special_hours_utc: vec![],
            ..Default::default()
        };
        assert!(!is_special_slot(&never, 10, evening));
    }
}
