//! SSH local-port-forward management
//!
//! Each tunnel is a spawned `ssh -N -L` child process bound to one local
//! port. There is no readiness handshake with the forward: after spawning we
//! wait out a fixed settle delay and assume the listener is up. A forward
//! that fails to establish after that surfaces as a failed copy, not here.
//!
//! The local port for host i is always `gateway_base_port + i`, so ports are
//! unique within one invocation; overlapping invocations against the same
//! gateway share the range and can collide.

use common::SshSettings;

/// Errors from establishing a local port forward
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// The ssh client could not be started at all
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// The ssh client exited during the settle delay
    #[error("ssh tunnel to {dest_host} via {gateway_host} exited with {status} before first use")]
    Exited {
        dest_host: String,
        gateway_host: String,
        status: std::process::ExitStatus,
    },
}

/// A live SSH local-port-forward process.
///
/// Closing is forceful (kill, no graceful shutdown). The child is registered
/// with `kill_on_drop` so an early return cannot leak the process past the
/// tunnel handle itself, but the owning call path is expected to
/// [`close`](Tunnel::close) every tunnel it opened.
#[derive(Debug)]
pub struct Tunnel {
    child: tokio::process::Child,
    local_port: u16,
    dest_host: String,
}

impl Tunnel {
    /// Spawn a forward from `localhost:local_port` to `dest_host:dest_port`
    /// through the configured gateway, then wait out the settle delay.
    #[tracing::instrument(skip(settings))]
    pub async fn open(
        settings: &SshSettings,
        dest_host: &str,
        dest_port: u16,
        local_port: u16,
    ) -> Result<Self, TunnelError> {
        let mut command = tokio::process::Command::new(&settings.ssh_program);
        command
            .arg("-N")
            .arg("-q")
            .arg("-o")
            .arg("StrictHostKeyChecking=no")
            .arg("-L")
            .arg(format!("{local_port}:{dest_host}:{dest_port}"));
        if let Some(identity) = &settings.identity_file {
            command.arg("-i").arg(identity);
        }
        command.arg(format!(
            "{}@{}",
            settings.gateway_user, settings.gateway_host
        ));
        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        tracing::debug!("Spawning tunnel process: {:?}", command.as_std());
        let mut child = command.spawn().map_err(|source| TunnelError::Spawn {
            program: settings.ssh_program.clone(),
            source,
        })?;
        // best-effort rendezvous: ssh gives us no readiness signal for the
        // forward, so wait out the settle delay before first use
        tokio::time::sleep(settings.settle_delay).await;
        if let Ok(Some(status)) = child.try_wait() {
            return Err(TunnelError::Exited {
                dest_host: dest_host.to_string(),
                gateway_host: settings.gateway_host.clone(),
                status,
            });
        }
        tracing::info!(
            "Tunnel to {} ready on localhost:{} via {}",
            dest_host,
            local_port,
            settings.gateway_host
        );
        Ok(Tunnel {
            child,
            local_port,
            dest_host: dest_host.to_string(),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn dest_host(&self) -> &str {
        &self.dest_host
    }

    /// The local address the forward listens on, as `host:port`
    pub fn endpoint(&self) -> String {
        format!("localhost:{}", self.local_port)
    }

    /// Kill the forward process and reap it.
    pub async fn close(mut self) {
        if let Err(error) = self.child.kill().await {
            tracing::warn!("Failed to kill tunnel to {}: {}", self.dest_host, error);
        }
        tracing::debug!(
            "Tunnel to {} on localhost:{} closed",
            self.dest_host,
            self.local_port
        );
    }
}
