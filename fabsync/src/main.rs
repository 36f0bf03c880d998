use anyhow::{Result, anyhow};
use clap::{CommandFactory, Parser};
use tracing::instrument;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "fab_sync",
    version,
    about = "Copy a local directory tree to an environment's hosts over SCP",
    long_about = "`fab_sync` copies a local directory to every host of a deployment environment
in parallel, optionally routing each copy through an SSH tunnel established
via the gateway host.

EXAMPLE:
    # Push a site build to all QA hosts through the gateway
    fab_sync -l ./site -r /var/www/site -e qa --tunnel --summary"
)]
struct Args {
    // Sync options
    /// Local directory to copy from; must exist
    #[arg(
        short = 'l',
        long = "local-dir",
        value_name = "LOCAL",
        help_heading = "Sync options"
    )]
    local_dir: std::path::PathBuf,

    /// Destination directory on the remote hosts (not validated locally)
    #[arg(
        short = 'r',
        long = "remote-dir",
        value_name = "REMOTE",
        help_heading = "Sync options"
    )]
    remote_dir: String,

    /// Deployment environment to target
    #[arg(
        short = 'e',
        long = "environment",
        value_enum,
        default_value_t = common::Environment::Qa,
        help_heading = "Sync options"
    )]
    environment: common::Environment,

    /// Route every copy through an SSH tunnel via the gateway host
    #[arg(short = 't', long = "tunnel", help_heading = "Sync options")]
    tunnel: bool,

    // Progress & output
    /// Verbose level: -v INFO / -vv DEBUG / -vvv TRACE (default: ERROR)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, help_heading = "Progress & output")]
    verbose: u8,

    /// Print summary at the end
    #[arg(long, help_heading = "Progress & output")]
    summary: bool,

    /// Quiet mode, don't report errors
    #[arg(short = 'q', long = "quiet", help_heading = "Progress & output")]
    quiet: bool,

    // Advanced settings
    /// Number of worker threads, 0 means number of cores
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_workers: usize,

    /// Number of blocking worker threads, 0 means Tokio runtime default (512)
    #[arg(
        long,
        default_value = "0",
        value_name = "N",
        help_heading = "Advanced settings"
    )]
    max_blocking_threads: usize,
}

#[instrument]
async fn async_main(args: Args) -> Result<fab_sync::transfer::Summary> {
    let hosts = common::hosts_for(args.environment);
    tracing::info!(
        "Syncing {:?} to {:?} on {} ({} hosts{})",
        args.local_dir,
        args.remote_dir,
        args.environment,
        hosts.len(),
        if args.tunnel { ", tunneled" } else { "" }
    );
    let settings = fab_sync::transfer::Settings {
        use_tunnel: args.tunnel,
        ssh: common::SshSettings::from_env(),
    };
    let summary =
        fab_sync::transfer::transfer(&args.local_dir, &args.remote_dir, hosts, &settings).await?;
    if !summary.all_succeeded() {
        if args.summary {
            return Err(anyhow!(
                "fab_sync failed on {} of {} hosts\n\n{}",
                summary.hosts_failed,
                hosts.len(),
                &summary
            ));
        }
        return Err(anyhow!(
            "fab_sync failed on {} of {} hosts",
            summary.hosts_failed,
            hosts.len()
        ));
    }
    Ok(summary)
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    // resolve the local path up front; a missing path is a usage error, not a
    // transfer failure, and nothing may be contacted in that case
    args.local_dir = match args.local_dir.canonicalize() {
        Ok(path) => path,
        Err(_) => {
            let mut command = Args::command();
            command
                .error(
                    clap::error::ErrorKind::ValueValidation,
                    format!("{}: No such file or directory", args.local_dir.display()),
                )
                .exit();
        }
    };
    let func = {
        let args = args.clone();
        || async_main(args)
    };
    let output = common::OutputConfig {
        quiet: args.quiet,
        verbose: args.verbose,
        print_summary: args.summary,
    };
    let runtime = common::RuntimeConfig {
        max_workers: args.max_workers,
        max_blocking_threads: args.max_blocking_threads,
    };
    let res = common::run(&output, &runtime, func);
    if res.is_none() {
        std::process::exit(1);
    }
    Ok(())
}
