pub mod classifier;
pub mod config;
pub mod conversation;
pub mod decoder;
pub mod driver;
pub mod inference;
pub mod message;
pub mod transport;
pub mod turn;
