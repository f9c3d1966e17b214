use anyhow::Result;
use clap::Args;
use config::MongodConfig;
use lifecycle::MongodManager;

#[derive(Args)]
pub struct FetchArgs {
    #[arg(long, help = "Override the server version")]
    pub version: Option<String>
}

pub async fn run(mut config: MongodConfig, args: FetchArgs) -> Result<()> {
    if let Some(version) = args.version {
        config.version = version;
    }

    let manager = MongodManager::new(config)?;
    let binary = manager.binary().await?;
    println!("{}", binary.path().display());
    Ok(())
}
