//! Engine state survives a restart on RocksDB, and unfinished games resume
//! from their persisted draw prefix.

use bingohall::{
    config::{BingoConfig, StorageBackend},
    factory::{Engine, EngineFactory},
    GameStatus,
};
use std::time::Duration;
use tempfile::TempDir;

fn rocks_config(dir: &TempDir) -> BingoConfig {
    let mut config = BingoConfig::testing();
    config.storage.backend = StorageBackend::RocksDb;
    config.storage.data_directory = dir.path().join("bingo").to_string_lossy().to_string();
    config.storage.clear_on_start = false;
    config.game.purchase_window_ms = 100;
    config.game.draw_interval_ms = 25;
    config
}

async fn wait_until<F: Fn(&Engine) -> bool>(engine: &Engine, what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !check(engine) {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_active_game_resumes_after_restart() {
    let dir = TempDir::new().unwrap();
    let config = rocks_config(&dir);

    let (game_id, prefix, seed_key) = {
        let engine = EngineFactory::create_engine(config.clone()).await.unwrap();
        let controller = engine.controller.clone();

        let game_id = controller.create_game(false).unwrap();
        for user in ["alice", "bob"] {
            controller.deposit(user, 250).unwrap();
            controller.purchase_card(user, &game_id).unwrap();
        }

        wait_until(&engine, "three draws", |e| {
            e.controller
                .game_state(&game_id)
                .map(|s| s.drawn_numbers.len() >= 3)
                .unwrap_or(false)
        })
        .await;

        let seed_key = engine.seed_public_key().to_string();
        engine.shutdown().await;
        let prefix = controller.game_state(&game_id).unwrap().drawn_numbers;
        (game_id, prefix, seed_key)
    };

    let engine = EngineFactory::create_engine(config).await.unwrap();
    assert_eq!(engine.seed_public_key(), seed_key);

    wait_until(&engine, "completion", |e| {
        e.controller
            .game_state(&game_id)
            .map(|s| s.status == GameStatus::Completed)
            .unwrap_or(false)
    })
    .await;

    let state = engine.controller.game_state(&game_id).unwrap();
    assert!(state.drawn_numbers.starts_with(&prefix));
    for user in ["alice", "bob"] {
        let ledger = engine.controller.ledger();
        let history: i64 = ledger.transactions(user).unwrap().iter().map(|t| t.amount).sum();
        assert_eq!(history, ledger.balance(user).unwrap() as i64);
    }
    assert!(state.bingo.is_some());

    let report = engine.controller.verify(&game_id).unwrap().expect("resumed game verifies");
    assert_eq!(report.bingo_draw, Some(state.drawn_numbers.len()));

    engine.shutdown().await;
}

#[tokio::test]
async fn test_balances_and_wallet_persist() {
    let dir = TempDir::new().unwrap();
    let mut config = rocks_config(&dir);
    config.game.purchase_window_ms = 60_000;

    let (wallet_digest, game_id) = {
        let engine = EngineFactory::create_engine(config.clone()).await.unwrap();
        let controller = engine.controller.clone();
        controller.deposit("carol", 700).unwrap();
        let game_id = controller.create_game(false).unwrap();
        controller.purchase_card("carol", &game_id).unwrap();
        controller.start_game(&game_id).unwrap();
        let digest = engine.store().wallet().unwrap().digest;
        engine.shutdown().await;
        (digest, game_id)
    };

    // Keep the resumed game from drawing while balances are checked
    config.game.draw_interval_ms = 60_000;
    let engine = EngineFactory::create_engine(config).await.unwrap();
    let controller = engine.controller.clone();
    assert_eq!(controller.ledger().balance("carol").unwrap(), 600);
    assert_eq!(controller.ledger().transactions("carol").unwrap().len(), 2);
    assert_eq!(controller.user_cards("carol", &game_id).unwrap().len(), 1);
    assert_eq!(engine.store().wallet().unwrap().digest, wallet_digest);
    assert_eq!(engine.store().jackpot().unwrap().amount, 10);

    engine.shutdown().await;
}
