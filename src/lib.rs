pub mod commands;
pub mod config;
pub mod content;
pub mod db;
pub mod dispatcher;
pub mod duration;
pub mod metadata;
pub mod overlay;
pub mod services;
pub mod tts;

use std::sync::Arc;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub queue: services::queue::QueueService,
    pub overlay: overlay::OverlayHub,
    pub metadata: Arc<dyn metadata::MetadataResolver>,
    pub tts: tts::TtsClient,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
