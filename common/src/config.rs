//! Configuration types for runtime, output and SSH connection settings

/// Runtime configuration for tokio and thread pools
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeConfig {
    /// Number of worker threads (0 = number of CPU cores)
    pub max_workers: usize,
    /// Number of blocking threads (0 = tokio default of 512)
    pub max_blocking_threads: usize,
}

/// Output and logging configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct OutputConfig {
    /// Suppress error output
    pub quiet: bool,
    /// Verbosity level: 0=ERROR, 1=INFO, 2=DEBUG, 3=TRACE
    pub verbose: u8,
    /// Print summary statistics at the end
    pub print_summary: bool,
}

/// Connection settings for the gateway hop and the remote copies.
///
/// The deployment scripts this tool replaces kept these in a process-wide
/// mutable environment; here they are resolved once via
/// [`SshSettings::from_env`] and passed explicitly to the tunnel and transfer
/// layers.
#[derive(Debug, Clone)]
pub struct SshSettings {
    /// Bastion host used to reach hosts without a direct route
    pub gateway_host: String,
    /// Login user on the gateway
    pub gateway_user: String,
    /// First local port used for tunnel forwards; host i gets base + i
    pub gateway_base_port: u16,
    /// Login user on the copy targets
    pub ssh_user: String,
    /// Private key passed to ssh/scp with -i; None leaves key selection to
    /// the client
    pub identity_file: Option<std::path::PathBuf>,
    /// Program name or path of the ssh client
    pub ssh_program: String,
    /// Program name or path of the scp client
    pub scp_program: String,
    /// Fixed wait after spawning a tunnel before its first use
    pub settle_delay: std::time::Duration,
    /// ConnectTimeout passed to the scp client
    pub connect_timeout: std::time::Duration,
    /// Cap on a single remote copy, timed out locally
    pub command_timeout: std::time::Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            gateway_host: "gateway.example.com".to_string(),
            gateway_user: "deploy".to_string(),
            gateway_base_port: 4204,
            ssh_user: "deploy".to_string(),
            identity_file: default_identity_file(),
            ssh_program: "ssh".to_string(),
            scp_program: "scp".to_string(),
            settle_delay: std::time::Duration::from_secs(2),
            connect_timeout: std::time::Duration::from_secs(900),
            command_timeout: std::time::Duration::from_secs(900),
        }
    }
}

impl SshSettings {
    /// Site defaults with `FABSYNC_*` environment overrides applied.
    ///
    /// These are operator-machine constants, not CLI flags.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Ok(host) = std::env::var("FABSYNC_GATEWAY_HOST") {
            settings.gateway_host = host;
        }
        if let Ok(user) = std::env::var("FABSYNC_GATEWAY_USER") {
            settings.gateway_user = user;
        }
        if let Some(port) = port_from_env("FABSYNC_GATEWAY_BASE_PORT") {
            settings.gateway_base_port = port;
        }
        if let Ok(user) = std::env::var("FABSYNC_SSH_USER") {
            settings.ssh_user = user;
        }
        if let Ok(identity) = std::env::var("FABSYNC_IDENTITY") {
            settings.identity_file = Some(std::path::PathBuf::from(identity));
        }
        if let Ok(program) = std::env::var("FABSYNC_SSH") {
            settings.ssh_program = program;
        }
        if let Ok(program) = std::env::var("FABSYNC_SCP") {
            settings.scp_program = program;
        }
        if let Some(delay) = duration_from_env("FABSYNC_SETTLE_DELAY") {
            settings.settle_delay = delay;
        }
        if let Some(timeout) = duration_from_env("FABSYNC_CONNECT_TIMEOUT") {
            settings.connect_timeout = timeout;
        }
        if let Some(timeout) = duration_from_env("FABSYNC_COMMAND_TIMEOUT") {
            settings.command_timeout = timeout;
        }
        settings
    }
}

/// Default private key, matching what the deployment flow always used
fn default_identity_file() -> Option<std::path::PathBuf> {
    std::env::var_os("HOME").map(|home| std::path::Path::new(&home).join(".ssh").join("id_rsa"))
}

fn duration_from_env(name: &str) -> Option<std::time::Duration> {
    let value = std::env::var(name).ok()?;
    match humantime::parse_duration(&value) {
        Ok(duration) => {
            tracing::debug!("Using custom duration {:?} (from {})", duration, name);
            Some(duration)
        }
        Err(error) => {
            tracing::warn!("Ignoring invalid duration in {}={:?}: {}", name, value, error);
            None
        }
    }
}

fn port_from_env(name: &str) -> Option<u16> {
    let value = std::env::var(name).ok()?;
    match value.parse::<u16>() {
        Ok(port) => Some(port),
        Err(error) => {
            tracing::warn!("Ignoring invalid port in {}={:?}: {}", name, value, error);
            None
        }
    }
}
