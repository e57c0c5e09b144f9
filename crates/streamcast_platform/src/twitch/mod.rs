#![forbid(unsafe_code)]

pub mod auth;
pub mod eventsub;
mod helix;


pub use auth::{CredentialError, CredentialManager, TwitchEndpoints};
pub use helix::HelixClient;
