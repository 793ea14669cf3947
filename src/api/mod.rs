//! HTTP and WebSocket surface
//!
//! Thin axum layer over the lifecycle controller: game creation and state,
//! card purchase, deposits, transaction history, fairness verification and
//! the two subscription streams (per game, per user).

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::ApiServer;
