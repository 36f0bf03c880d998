//! Environment-scoped directory sync over SCP
//!
//! `fab_sync` copies a local directory tree to every host of a deployment
//! environment in parallel, delegating the actual transfer to the system
//! `scp` client.
//!
//! ```bash
//! # Push a site build to all QA hosts
//! fab_sync -l ./site -r /var/www/site -e qa --summary
//! ```
//!
//! When the target hosts are only reachable through the gateway, `--tunnel`
//! routes each copy through a dedicated SSH local-port-forward:
//!
//! ```bash
//! fab_sync -l ./site -r /var/www/site -e prod --tunnel
//! ```
//!
//! One forward is opened per host, bound to a unique local port derived from
//! the gateway base port and the host's index in the environment list. All
//! forwards are torn down before the run finishes, whether the copies
//! succeeded or not.
//!
//! Copies run concurrently and independently: a failure on one host never
//! stops the others, and the process exits 0 only when every host succeeded.

pub mod transfer;
pub mod tunnel;
