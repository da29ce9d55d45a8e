pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod frames;
pub mod provider;
pub mod tasks {
    pub mod generator;
    pub mod playback;
    pub mod session;
}

pub use error::{Error, Result};
