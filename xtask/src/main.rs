use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the secboot workspace", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build every workspace member
    Build,
    /// Type-check and lint the workspace
    Check,
    /// Run the full test suite
    Test,
    /// Run the secboot CLI, forwarding any extra arguments
    Run {
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str]) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {} failed", args.join(" "));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building workspace...");
            cargo(&["build", "--workspace"])?;
        }
        Commands::Check => {
            println!("Checking workspace...");
            cargo(&["check", "--workspace", "--all-targets"])?;
            cargo(&["clippy", "--workspace", "--all-targets"])?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"])?;
        }
        Commands::Run { args } => {
            println!("Running CLI...");
            let mut cmd: Vec<&str> = vec!["run", "-p", "secboot-cli", "--"];
            cmd.extend(args.iter().map(String::as_str));
            cargo(&cmd)?;
        }
    }

    Ok(())
}
