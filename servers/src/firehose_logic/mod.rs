pub mod config;
pub mod control;
pub mod logger;
pub mod state;
pub mod supervisor;
pub mod wiring;
