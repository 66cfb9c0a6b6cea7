pub mod info;
pub mod messages;
pub mod settings;

use crate::config::Config;
use crate::{Data, Error};
use poise::serenity_prelude as serenity;

const SUCCESS_COLOR: u32 = 0x2ecc71;
const ERROR_COLOR: u32 = 0xe74c3c;
const INFO_COLOR: u32 = 0x3498db;

/// Every slash command the bot registers. The anonymous variants can be
/// switched off per deployment.
pub fn all(config: &Config) -> Vec<poise::Command<Data, Error>> {
    let mut commands = vec![
        info::alive(),
        info::help(),
        info::client(),
        info::info(),
        messages::send(),
        messages::talk(),
        messages::stop(),
        settings::setdefaulttime(),
        settings::setmaxtime(),
        settings::setdisplayfull(),
    ];
    if !config.hide_commands_disabled {
        commands.push(messages::hidesend());
        commands.push(messages::hidetalk());
    }
    commands
}

pub fn success_embed(description: impl Into<String>) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("✅ Success")
        .description(description)
        .color(SUCCESS_COLOR)
}

pub fn error_embed(description: impl Into<String>) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("❌ Error")
        .description(description)
        .color(ERROR_COLOR)
}

pub fn how_to_use_embed() -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title("📺 How to use")
        .description(
            "1. Run `/client` and add the link as a browser source in OBS.\n\
             2. Use `/send` to show a link, an attachment or some text on stream.\n\
             3. Use `/talk` to have the bot say something out loud.\n\
             4. `/stop` cuts what is currently playing.",
        )
        .color(INFO_COLOR)
}
