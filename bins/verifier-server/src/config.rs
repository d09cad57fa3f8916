// Command line and environment settings for the verifier server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::builder::TypedValueParser;
use clap::Parser;
use verifier_common::config::{
    VerifierConfig, DEFAULT_MAX_JOBS, DEFAULT_MAX_LOG_BYTES, DEFAULT_STOP_GRACE_SECS,
};

pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Run untrusted solutions inside throwaway Docker containers
#[derive(Debug, Clone, Parser)]
#[command(name = "verifier-server", version)]
pub struct Settings {
    /// Address to bind the HTTP server to
    #[arg(long, env = "VERIFIER_HTTP", default_value = "0.0.0.0:5000")]
    pub http: SocketAddr,

    /// URI of the Docker remote API (unix://, tcp://, http:// or https://)
    #[arg(long, env = "DOCKER_HOST", default_value = DEFAULT_DOCKER_HOST)]
    pub docker_host: String,

    /// Directory holding key.pem, cert.pem and ca.pem for a TLS Docker host
    #[arg(long, env = "DOCKER_CERT_PATH")]
    pub docker_cert_dir: Option<PathBuf>,

    /// Maximum number of containers running at once
    #[arg(long, env = "VERIFIER_MAX_JOBS", default_value_t = DEFAULT_MAX_JOBS)]
    pub max_jobs: usize,

    /// Seconds a solution may run before its container is stopped
    #[arg(
        long,
        env = "VERIFIER_TIMEOUT_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout_secs: u64,

    /// Seconds Docker waits before killing a container being stopped
    #[arg(long, default_value_t = DEFAULT_STOP_GRACE_SECS)]
    pub stop_grace_secs: u32,

    /// Most bytes of sandbox output read back per job
    #[arg(
        long,
        env = "VERIFIER_MAX_LOG_BYTES",
        default_value_t = DEFAULT_MAX_LOG_BYTES,
        value_parser = clap::value_parser!(u64).range(1..).map(|n| n as usize)
    )]
    pub max_log_bytes: usize,

    /// Keep containers after each job (debug mode)
    #[arg(long, env = "VERIFIER_DEBUG")]
    pub keep_containers: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl Settings {
    pub fn to_verifier_config(&self) -> VerifierConfig {
        VerifierConfig::default()
            .with_max_jobs(self.max_jobs)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_stop_grace_secs(self.stop_grace_secs)
            .with_keep_containers(self.keep_containers)
            .with_max_log_bytes(self.max_log_bytes)
    }

    /// Certificate directory, ignored for local sockets
    pub fn cert_dir(&self) -> Option<&std::path::Path> {
        if self.docker_host.starts_with("unix://") {
            return None;
        }
        self.docker_cert_dir
            .as_deref()
            .filter(|dir| !dir.as_os_str().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_valid() {
        Settings::command().debug_assert();
    }

    #[test]
    fn test_flags() {
        let settings = Settings::try_parse_from([
            "verifier-server",
            "--http",
            "127.0.0.1:8080",
            "--docker-host",
            "tcp://10.0.0.2:2376",
            "--docker-cert-dir",
            "/etc/docker/certs",
            "--max-jobs",
            "0",
            "--timeout-secs",
            "10",
            "--stop-grace-secs",
            "3",
            "--max-log-bytes",
            "65536",
            "--keep-containers",
        ])
        .unwrap();

        assert_eq!(settings.http, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(
            settings.cert_dir(),
            Some(std::path::Path::new("/etc/docker/certs"))
        );

        let config = settings.to_verifier_config();
        assert_eq!(config.max_jobs, 1);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.stop_grace_secs, 3);
        assert!(config.keep_containers);
        assert_eq!(config.max_log_bytes, 65536);
    }

    #[test]
    fn test_log_limit_defaults() {
        let settings = Settings::try_parse_from(["verifier-server"]).unwrap();
        assert_eq!(settings.to_verifier_config().max_log_bytes, DEFAULT_MAX_LOG_BYTES);
        assert!(Settings::try_parse_from(["verifier-server", "--max-log-bytes", "0"]).is_err());
    }

    #[test]
    fn test_cert_dir_ignored_for_unix_socket() {
        let settings = Settings::try_parse_from([
            "verifier-server",
            "--docker-host",
            DEFAULT_DOCKER_HOST,
            "--docker-cert-dir",
            "/etc/docker/certs",
        ])
        .unwrap();
        assert_eq!(settings.cert_dir(), None);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(Settings::try_parse_from(["verifier-server", "--timeout-secs", "0"]).is_err());
    }
}
