use std::path::Path;

use adaptive::ManagerConfig;
use clap::Subcommand;
use clap_handler::Handler;

mod inspect;
mod play;

#[derive(Subcommand, Clone, Handler)]
pub enum AdaptiveCommand {
    Inspect(inspect::InspectCommand),
    Play(play::PlayCommand),
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ManagerConfig> {
    match path {
        Some(path) => {
            log::debug!("Loading config from {}", path.display());
            Ok(ManagerConfig::load(path)?)
        }
        None => Ok(ManagerConfig::default()),
    }
}
