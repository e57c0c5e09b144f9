#![forbid(unsafe_code)]

pub mod dedup;
pub mod health;
pub mod http;
