use anyhow::Result;
use clap::Args;
use config::MongodConfig;

#[derive(Args)]
pub struct ConfigArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool
}

pub fn run(config: MongodConfig, args: ConfigArgs) -> Result<()> {
    let config = config.validated()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
