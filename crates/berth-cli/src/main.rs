use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;
mod offline;

#[derive(Parser)]
#[command(
    name = "berthctl",
    about = "Berth — operate sandboxes and releases",
    version,
    propagate_version = true
)]
struct Cli {
    /// Application config file.
    #[arg(short, long, global = true, default_value = "berth.toml")]
    config: PathBuf,

    /// State database.
    #[arg(long, global = true, default_value = ".berth/state.redb")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Which release or sandbox to act on. Defaults to the latest release.
#[derive(Args, Debug, Clone, Default)]
struct TargetArgs {
    /// Release environment (latest release when omitted).
    #[arg(short, long, conflicts_with = "sandbox")]
    env: Option<String>,

    /// Sandbox slug; pass the flag without a value for the latest sandbox.
    #[arg(long, num_args = 0..=1, default_missing_value = "")]
    sandbox: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the execution ledger
    Logs {
        #[command(flatten)]
        target: TargetArgs,
        /// Only executions that exited non-zero
        #[arg(long)]
        failed: bool,
    },
    /// Open an interactive shell on the server
    Ssh {
        #[command(flatten)]
        target: TargetArgs,
    },
    /// Run a command inside a process, service or database container
    Exec {
        #[command(flatten)]
        target: TargetArgs,
        /// Group the recorded output under this session id
        #[arg(long)]
        session: Option<String>,
        process: String,
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Set the replica count of a release process
    Scale {
        #[arg(short, long)]
        env: Option<String>,
        process: String,
        replicas: u32,
    },
    /// Restart the pods of a release process
    Restart {
        #[arg(short, long)]
        env: Option<String>,
        process: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("berth=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let ctx = commands::Context::load(&cli.config, &cli.state)?;

    match cli.command {
        Commands::Logs { target, failed } => commands::logs::show(&ctx, &target.selector(), failed),
        Commands::Ssh { target } => {
            let code = commands::remote::ssh(&ctx, &target.selector())?;
            std::process::exit(code);
        }
        Commands::Exec {
            target,
            session,
            process,
            command,
        } => {
            let code = commands::remote::exec(
                &ctx,
                &target.selector(),
                &process,
                &command.join(" "),
                session.as_deref(),
            )?;
            std::process::exit(code);
        }
        Commands::Scale {
            env,
            process,
            replicas,
        } => commands::remote::scale(&ctx, env.as_deref(), &process, replicas),
        Commands::Restart { env, process } => {
            commands::remote::restart(&ctx, env.as_deref(), &process)
        }
    }
}

impl TargetArgs {
    fn selector(&self) -> berth_provision::Selector {
        match &self.sandbox {
            Some(slug) if slug.is_empty() => berth_provision::Selector::sandbox(None),
            Some(slug) => berth_provision::Selector::sandbox(Some(slug)),
            None => berth_provision::Selector::release(self.env.as_deref()),
        }
    }
}
