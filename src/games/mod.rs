pub mod types;
pub mod card;
pub mod draw;
pub mod verifier;
pub mod ledger;
pub mod vrf_engine;

pub use types::*;
pub use ledger::PrizeLedger;
pub use vrf_engine::VRFSeedEngine;
