//! Parallel fan-out of the directory copy across the target hosts
//!
//! One `scp` run is dispatched per host; copies are concurrent and
//! independent, and a failure on one host never aborts the others. With
//! tunneling enabled the real hostnames are substituted by local forward
//! endpoints before dispatch, and every forward is released before this
//! module returns, on success and failure paths alike.

use common::SshSettings;

use crate::tunnel::Tunnel;

/// A single copy destination: a real host or a local tunnel endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyTarget {
    pub host: String,
    pub port: u16,
}

impl CopyTarget {
    /// A directly reachable host on the standard ssh port
    pub fn host(name: &str) -> Self {
        Self {
            host: name.to_string(),
            port: 22,
        }
    }

    /// The local endpoint of an established forward
    pub fn tunnel_endpoint(tunnel: &Tunnel) -> Self {
        Self {
            host: "localhost".to_string(),
            port: tunnel.local_port(),
        }
    }
}

impl std::fmt::Display for CopyTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.port == 22 {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Transfer options
#[derive(Debug, Clone)]
pub struct Settings {
    /// Route every copy through a gateway forward instead of connecting
    /// directly
    pub use_tunnel: bool,
    pub ssh: SshSettings,
}

/// Per-host outcome counts for one invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub hosts_ok: usize,
    pub hosts_failed: usize,
}

impl Summary {
    pub fn all_succeeded(&self) -> bool {
        self.hosts_failed == 0
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hosts copied: {}\nhosts failed: {}",
            self.hosts_ok, self.hosts_failed
        )
    }
}

/// Local forward ports for one invocation, assigned by host index
fn local_ports(base_port: u16, count: usize) -> Vec<u16> {
    (0..count).map(|index| base_port + index as u16).collect()
}

/// Run `op` once per target with no ordering between targets.
///
/// Each outcome slot is written only by its own task; a panicked task counts
/// as a failure for its target.
async fn dispatch<OpT, FutureT>(targets: Vec<CopyTarget>, op: OpT) -> Vec<(CopyTarget, bool)>
where
    OpT: Fn(CopyTarget) -> FutureT,
    FutureT: std::future::Future<Output = bool> + Send + 'static,
{
    let mut join_set = tokio::task::JoinSet::new();
    for (index, target) in targets.iter().enumerate() {
        let operation = op(target.clone());
        join_set.spawn(async move { (index, operation.await) });
    }
    let mut outcomes = vec![false; targets.len()];
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, succeeded)) => outcomes[index] = succeeded,
            Err(error) => tracing::error!("Copy task panicked: {error}"),
        }
    }
    targets.into_iter().zip(outcomes).collect()
}

/// Copy `local` to `remote` on a single target, capped by the command
/// timeout. Returns plain success/failure; diagnostics go to the log.
async fn copy_to_target(
    local: std::path::PathBuf,
    remote: String,
    target: CopyTarget,
    ssh: SshSettings,
) -> bool {
    let mut command = tokio::process::Command::new(&ssh.scp_program);
    command
        .arg("-r")
        .arg("-p")
        .arg("-q")
        .arg("-o")
        .arg("StrictHostKeyChecking=no")
        .arg("-o")
        .arg(format!("ConnectTimeout={}", ssh.connect_timeout.as_secs()));
    if let Some(identity) = &ssh.identity_file {
        command.arg("-i").arg(identity);
    }
    if target.port != 22 {
        command.arg("-P").arg(target.port.to_string());
    }
    command
        .arg(local)
        .arg(format!("{}@{}:{remote}", ssh.ssh_user, target.host))
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true);
    tracing::debug!("Running copy: {:?}", command.as_std());
    match tokio::time::timeout(ssh.command_timeout, command.status()).await {
        Ok(Ok(status)) if status.success() => {
            tracing::info!("Copy to {} succeeded", target);
            true
        }
        Ok(Ok(status)) => {
            tracing::error!("Copy to {} failed with {}", target, status);
            false
        }
        Ok(Err(error)) => {
            tracing::error!("Failed to run {} for {}: {}", ssh.scp_program, target, error);
            false
        }
        Err(_) => {
            // the timed-out future drops the child, which kill_on_drop reaps
            tracing::error!(
                "Copy to {} timed out after {:?}",
                target,
                ssh.command_timeout
            );
            false
        }
    }
}

async fn close_all(tunnels: Vec<Tunnel>) {
    for tunnel in tunnels {
        tunnel.close().await;
    }
}

/// Copy `local` to `remote` on every host, concurrently.
///
/// With `use_tunnel` set, one forward per host is opened first (sequentially,
/// each on its own local port) and the copies run against the forward
/// endpoints instead of the hostnames. A forward that cannot be established
/// aborts the run before any copy is dispatched.
#[tracing::instrument(skip(settings))]
pub async fn transfer(
    local: &std::path::Path,
    remote: &str,
    hosts: &[&str],
    settings: &Settings,
) -> anyhow::Result<Summary> {
    let mut tunnels = Vec::new();
    let targets = if settings.use_tunnel {
        let ports = local_ports(settings.ssh.gateway_base_port, hosts.len());
        let mut endpoints = Vec::with_capacity(hosts.len());
        for (host, local_port) in hosts.iter().zip(ports) {
            match Tunnel::open(&settings.ssh, host, 22, local_port).await {
                Ok(tunnel) => {
                    endpoints.push(CopyTarget::tunnel_endpoint(&tunnel));
                    tunnels.push(tunnel);
                }
                Err(error) => {
                    // nothing has been copied yet; release what was opened
                    // and abort the whole run
                    close_all(tunnels).await;
                    return Err(
                        anyhow::Error::new(error).context("failed to establish gateway tunnel")
                    );
                }
            }
        }
        endpoints
    } else {
        hosts.iter().map(|host| CopyTarget::host(host)).collect()
    };
    let results = {
        let local = local.to_path_buf();
        let remote = remote.to_string();
        let ssh = settings.ssh.clone();
        dispatch(targets, move |target| {
            copy_to_target(local.clone(), remote.clone(), target, ssh.clone())
        })
        .await
    };
    close_all(tunnels).await;
    let mut summary = Summary::default();
    for (target, succeeded) in &results {
        if *succeeded {
            summary.hosts_ok += 1;
        } else {
            tracing::error!("Copy to {} did not succeed", target);
            summary.hosts_failed += 1;
        }
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_stub(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn stub_settings(ssh_program: &std::path::Path, scp_program: &std::path::Path) -> SshSettings {
        SshSettings {
            ssh_program: ssh_program.display().to_string(),
            scp_program: scp_program.display().to_string(),
            identity_file: None,
            settle_delay: std::time::Duration::from_millis(50),
            command_timeout: std::time::Duration::from_secs(10),
            ..Default::default()
        }
    }

    fn read_pids(path: &std::path::Path) -> Vec<u32> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| line.trim().parse().unwrap())
            .collect()
    }

    fn pid_alive(pid: u32) -> bool {
        std::path::Path::new(&format!("/proc/{pid}")).exists()
    }

    #[test]
    fn test_local_ports_unique_and_ordered() {
        assert_eq!(local_ports(4204, 3), [4204, 4205, 4206]);
        assert_eq!(local_ports(4204, 1), [4204]);
        assert!(local_ports(4204, 0).is_empty());
    }

    #[test]
    fn test_summary_is_and_over_hosts() {
        let summary = Summary {
            hosts_ok: 3,
            hosts_failed: 0,
        };
        assert!(summary.all_succeeded());
        let summary = Summary {
            hosts_ok: 2,
            hosts_failed: 1,
        };
        assert!(!summary.all_succeeded());
    }

    #[test]
    fn test_copy_target_display() {
        assert_eq!(CopyTarget::host("qatools1").to_string(), "qatools1");
        let endpoint = CopyTarget {
            host: "localhost".to_string(),
            port: 4204,
        };
        assert_eq!(endpoint.to_string(), "localhost:4204");
    }

    #[tokio::test]
    async fn test_dispatch_isolates_failures() {
        let targets = vec![
            CopyTarget::host("qatools1"),
            CopyTarget::host("qatools2"),
            CopyTarget::host("qatools3"),
        ];
        let results = dispatch(targets, |target| async move { target.host != "qatools2" }).await;
        assert_eq!(results.len(), 3);
        let failed: Vec<&str> = results
            .iter()
            .filter(|(_, succeeded)| !succeeded)
            .map(|(target, _)| target.host.as_str())
            .collect();
        assert_eq!(failed, ["qatools2"]);
    }

    #[tokio::test]
    async fn test_dispatch_runs_targets_concurrently() {
        // the barrier only clears if all three ops are in flight at once
        let barrier = std::sync::Arc::new(tokio::sync::Barrier::new(3));
        let targets = vec![
            CopyTarget::host("qatools1"),
            CopyTarget::host("qatools2"),
            CopyTarget::host("qatools3"),
        ];
        let results = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            dispatch(targets, move |_| {
                let barrier = barrier.clone();
                async move {
                    barrier.wait().await;
                    true
                }
            }),
        )
        .await
        .expect("dispatch must not serialize the per-target operations");
        assert!(results.iter().all(|(_, succeeded)| *succeeded));
    }

    #[tokio::test]
    async fn test_transfer_aggregates_per_host_results() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("site");
        std::fs::create_dir(&local).unwrap();
        let ssh = write_stub(dir.path(), "ssh-stub", "#!/bin/sh\nexit 0\n");
        let scp = write_stub(
            dir.path(),
            "scp-stub",
            "#!/bin/sh\ncase \"$*\" in *qatools2*) exit 1 ;; esac\nexit 0\n",
        );
        let settings = Settings {
            use_tunnel: false,
            ssh: stub_settings(&ssh, &scp),
        };
        let summary = transfer(
            &local,
            "/var/www/site",
            &["qatools1", "qatools2", "qatools3"],
            &settings,
        )
        .await
        .unwrap();
        assert_eq!(
            summary,
            Summary {
                hosts_ok: 2,
                hosts_failed: 1,
            }
        );
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_transfer_with_tunnels_substitutes_endpoints_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("site");
        std::fs::create_dir(&local).unwrap();
        let pid_file = dir.path().join("tunnel.pids");
        let args_file = dir.path().join("scp.args");
        let ssh = write_stub(
            dir.path(),
            "ssh-stub",
            &format!("#!/bin/sh\necho $$ >> {}\nexec sleep 30\n", pid_file.display()),
        );
        let scp = write_stub(
            dir.path(),
            "scp-stub",
            &format!("#!/bin/sh\necho \"$*\" >> {}\nexit 0\n", args_file.display()),
        );
        let settings = Settings {
            use_tunnel: true,
            ssh: stub_settings(&ssh, &scp),
        };
        let summary = transfer(&local, "/opt/tools", &["qatools1", "qatools2"], &settings)
            .await
            .unwrap();
        assert_eq!(
            summary,
            Summary {
                hosts_ok: 2,
                hosts_failed: 0,
            }
        );
        // one forward per host, all reaped by the time transfer returns
        let pids = read_pids(&pid_file);
        assert_eq!(pids.len(), 2);
        assert!(pids.iter().all(|pid| !pid_alive(*pid)));
        // copies went to the forward endpoints, each on its own port
        let args = std::fs::read_to_string(&args_file).unwrap();
        assert!(args.contains("-P 4204"));
        assert!(args.contains("-P 4205"));
        assert!(args.contains("@localhost:"));
        assert!(!args.contains("@qatools1"));
    }

    #[tokio::test]
    async fn test_transfer_tunnel_failure_aborts_before_any_copy() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("site");
        std::fs::create_dir(&local).unwrap();
        let pid_file = dir.path().join("tunnel.pids");
        let args_file = dir.path().join("scp.args");
        // the forward for the second host (port 4205) dies immediately
        let ssh = write_stub(
            dir.path(),
            "ssh-stub",
            &format!(
                "#!/bin/sh\ncase \"$*\" in *4205:qatools2*) exit 255 ;; esac\n\
                 echo $$ >> {}\nexec sleep 30\n",
                pid_file.display()
            ),
        );
        let scp = write_stub(
            dir.path(),
            "scp-stub",
            &format!("#!/bin/sh\necho \"$*\" >> {}\nexit 0\n", args_file.display()),
        );
        let settings = Settings {
            use_tunnel: true,
            ssh: stub_settings(&ssh, &scp),
        };
        let error = transfer(&local, "/opt/tools", &["qatools1", "qatools2"], &settings)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("failed to establish"));
        // no copy was dispatched, and the first forward was released
        assert!(!args_file.exists());
        let pids = read_pids(&pid_file);
        assert_eq!(pids.len(), 1);
        assert!(!pid_alive(pids[0]));
    }

    #[tokio::test]
    async fn test_transfer_times_out_stuck_copy() {
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("site");
        std::fs::create_dir(&local).unwrap();
        let ssh = write_stub(dir.path(), "ssh-stub", "#!/bin/sh\nexit 0\n");
        let scp = write_stub(dir.path(), "scp-stub", "#!/bin/sh\nexec sleep 30\n");
        let mut settings = Settings {
            use_tunnel: false,
            ssh: stub_settings(&ssh, &scp),
        };
        settings.ssh.command_timeout = std::time::Duration::from_millis(100);
        let summary = transfer(&local, "/opt/tools", &["prodtools3"], &settings)
            .await
            .unwrap();
        assert_eq!(
            summary,
            Summary {
                hosts_ok: 0,
                hosts_failed: 1,
            }
        );
    }
}
