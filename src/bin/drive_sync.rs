use anyhow::{Context, Result};
use dicom_drive_sync::{
    Config, DirectoryPrompt, OAuthCredentials, Scheduler, SyncCycle, SystemClock,
};
use env_logger::{Env, Target};
use log::info;

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(Target::Stdout)
        .init();
    info!("Starting drive sync");

    let config = Config::try_load("config.toml").context("failed to load config.toml")?;
    info!(
        "Uploading '{}' files to folder {} every {}s",
        config.file_suffix, config.remote_container_id, config.interval_secs
    );

    let credentials = OAuthCredentials::from_config(&config)?;
    let directories = DirectoryPrompt::new(config.source_directory.clone());
    let scheduler = Scheduler::new(SystemClock, config.interval());
    let mut cycle = SyncCycle::new(config, directories, credentials);

    scheduler.run(|| {
        cycle.run();
    })
}
