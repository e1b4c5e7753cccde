pub mod classifier;
pub mod client;
pub mod payload;
