pub mod analysis;
pub mod approachability;
pub mod config;
pub mod detector;
pub mod emotion;
pub mod face;
pub mod server;
