pub mod algorand;
pub mod config;
pub mod error;
pub mod event_queue;
pub mod experiment;
pub mod geometry;
pub mod message;
pub mod mir;
pub mod network;
pub mod node;
pub mod simulation;
pub mod tally;
pub mod tendermint;
#[cfg(any(test, feature = "test-mocks"))]
pub mod test_mocks;
pub mod value;
