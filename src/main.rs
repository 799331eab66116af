use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use console::style;

use tsumiki::{DEFAULT_CONFIG, Pipeline, Profile};

/// Front-end asset pipeline.
#[derive(Debug, Parser)]
#[command(name = "tsumiki", version, about, long_about = None)]
struct Cli {
    /// Path to the config file.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG)]
    config: Utf8PathBuf,

    /// `development` turns on source maps, anything else is production.
    #[arg(long, env = "TSUMIKI_ENV", default_value = "production")]
    env: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Remove the configured output directories.
    Clean,
    /// Run every task once.
    Build {
        /// Clean before building.
        #[arg(long)]
        clean: bool,
    },
    /// Package the output tree into a timestamped archive.
    Archive,
    /// Serve the output directory.
    Serve,
    /// Clean, build, then serve and rebuild on changes.
    #[command(alias = "default")]
    Watch {
        /// Don't start the HTTP server or live reload.
        #[arg(long)]
        no_serve: bool,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{} {err:#}", style("error:").red().bold());
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tsumiki::init_logging()?;

    let profile = Profile::from_env_value(&cli.env);
    let command = cli.command.unwrap_or(Command::Watch { no_serve: false });
    let pipeline = Pipeline::load(&cli.config)?;
    let env = pipeline.environment(profile);

    eprintln!(
        "Running {} in {} mode ({:?}).",
        style("tsumiki").red(),
        style(command.label()).blue(),
        profile,
    );

    match command {
        Command::Clean => pipeline.clean()?,
        Command::Build { clean } => {
            pipeline.build(&env, clean)?;
        }
        Command::Archive => {
            pipeline.archive(&env)?;
        }
        #[cfg(feature = "server")]
        Command::Serve => pipeline.serve()?,
        #[cfg(not(feature = "server"))]
        Command::Serve => anyhow::bail!("built without the `server` feature"),
        #[cfg(feature = "live")]
        Command::Watch { no_serve } => pipeline.watch(env, !no_serve)?,
        #[cfg(not(feature = "live"))]
        Command::Watch { .. } => anyhow::bail!("built without the `live` feature"),
    }

    Ok(())
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Clean => "clean",
            Command::Build { .. } => "build",
            Command::Archive => "archive",
            Command::Serve => "serve",
            Command::Watch { .. } => "watch",
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_watch() {
        let cli = Cli::try_parse_from(["tsumiki"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, DEFAULT_CONFIG);

        let cli = Cli::try_parse_from(["tsumiki", "default", "--no-serve"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Watch { no_serve: true })));
    }

    #[test]
    fn test_build_flags() {
        let cli = Cli::try_parse_from(["tsumiki", "--env", "development", "build", "--clean"]).unwrap();
        assert_eq!(cli.env, "development");
        assert!(matches!(cli.command, Some(Command::Build { clean: true })));
    }
}
