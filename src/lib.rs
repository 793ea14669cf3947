//! bingohall - real-time multiplayer bingo engine
//!
//! Games are scheduled, sell cards during a purchase window, then draw
//! numbers from a VRF-committed permutation until a card completes. Quine
//! (first full row) and bingo (full card) prizes are credited atomically
//! with the draw that produced them, and a global jackpot pays out on an
//! early bingo. Every state change is persisted through an optimistic
//! transactional store and fanned out to game and user subscribers.

pub mod api;
pub mod common;
pub mod config;
pub mod errors;
pub mod factory;
pub mod fairness;
pub mod game_store;
pub mod games;
pub mod hub;
pub mod lifecycle;
pub mod scheduler;
pub mod storage;

pub use config::{BingoConfig, ConfigLoader};
pub use errors::{BingoError, BingoResult};
pub use factory::{Engine, EngineFactory};
pub use games::{types::*, PrizeLedger, VRFSeedEngine};
pub use hub::{BroadcastHub, Subscription, Topic};
pub use lifecycle::{DrawOutcome, GameController, GameFinished};
