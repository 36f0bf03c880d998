//! Shared scaffolding for the `fab_sync` tool: configuration types, the
//! static host directory and the run harness that wires up tracing and the
//! tokio runtime for the binary.

pub mod config;
pub mod hosts;

pub use config::{OutputConfig, RuntimeConfig, SshSettings};
pub use hosts::{Environment, UnknownEnvironmentError, hosts_for};

fn init_tracing(output: &OutputConfig) {
    let level = match output.verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    // try_init so that tests invoking run() repeatedly don't panic on the
    // second subscriber registration
    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Set up tracing and a tokio runtime, then drive `func` to completion.
///
/// Returns `None` if `func` failed (after logging the error chain) or the
/// runtime could not be built; the caller maps `None` to a nonzero exit.
pub fn run<FuncT, FutureT, SummaryT>(
    output: &OutputConfig,
    runtime: &RuntimeConfig,
    func: FuncT,
) -> Option<SummaryT>
where
    FuncT: FnOnce() -> FutureT,
    FutureT: std::future::Future<Output = anyhow::Result<SummaryT>>,
    SummaryT: std::fmt::Display,
{
    init_tracing(output);
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if runtime.max_workers > 0 {
        builder.worker_threads(runtime.max_workers);
    }
    if runtime.max_blocking_threads > 0 {
        builder.max_blocking_threads(runtime.max_blocking_threads);
    }
    let tokio_runtime = match builder.build() {
        Ok(tokio_runtime) => tokio_runtime,
        Err(error) => {
            eprintln!("failed to start the tokio runtime: {error}");
            return None;
        }
    };
    match tokio_runtime.block_on(func()) {
        Ok(summary) => {
            if output.print_summary {
                println!("{summary}");
            }
            Some(summary)
        }
        Err(error) => {
            if !output.quiet {
                tracing::error!("{:#}", error);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_returns_summary_on_success() {
        let output = OutputConfig::default();
        let runtime = RuntimeConfig {
            max_workers: 1,
            ..Default::default()
        };
        let result = run(&output, &runtime, || async { anyhow::Ok("done".to_string()) });
        assert_eq!(result, Some("done".to_string()));
    }

    #[test]
    fn test_run_returns_none_on_error() {
        let output = OutputConfig {
            quiet: true,
            ..Default::default()
        };
        let runtime = RuntimeConfig::default();
        let result: Option<String> = run(&output, &runtime, || async {
            Err::<String, _>(anyhow::anyhow!("boom"))
        });
        assert_eq!(result, None);
    }
}
