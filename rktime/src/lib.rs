pub mod config;
pub mod controller;
pub mod daemon;
pub mod ntp;
pub mod runtime;
pub mod time;
