pub mod hardware;
pub mod rtc;
pub mod obd;
pub mod elm327;
pub mod config;

pub mod storage;
pub mod trip;
pub mod session;

#[cfg(test)]
mod session_tests;
