use anyhow::bail;
use clap::Parser;
use tonic_views::settings::{
    DEFAULT_AUTH_USER_KEY, DEFAULT_STREAM_BUFFER_SIZE, DEFAULT_STUB_LOCATION, ServiceDefinition,
    Settings,
};

/// Runtime configuration for the `tonic-views-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first), with defaults suitable for local runs.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tonic-views-server",
    version,
    about = "A gRPC server dispatching calls to declarative views"
)]
pub struct CliArgs {
    /// Size of the blocking pool views execute on.
    ///
    /// Calls beyond this many in flight wait for a free worker.
    ///
    /// Environment variable: `NUM_WORKERS`
    #[arg(long, env = "NUM_WORKERS", default_value_t = 1)]
    pub num_workers: usize,

    /// Messages a streaming view may produce ahead of the client.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = DEFAULT_STREAM_BUFFER_SIZE)]
    pub stream_buffer_size: usize,

    /// Metadata key carrying the JSON-encoded principal.
    ///
    /// Environment variable: `AUTH_USER_KEY`
    #[arg(long, env = "AUTH_USER_KEY", default_value_t = String::from(DEFAULT_AUTH_USER_KEY))]
    pub auth_user_key: String,

    /// Location the generated stubs are registered under.
    ///
    /// Environment variable: `STUB_LOCATION`
    #[arg(long, env = "STUB_LOCATION", default_value_t = String::from(DEFAULT_STUB_LOCATION))]
    pub stub_location: String,

    /// Attach the server-side cause chain of internal errors to the call
    /// trailers. Leave off in production.
    ///
    /// Environment variable: `EXPOSE_ERROR_TRACES`
    #[arg(long, env = "EXPOSE_ERROR_TRACES", default_value_t = false)]
    pub expose_error_traces: bool,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:55000" or "/tmp/tonic-views.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:55000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Load and validate every service, then exit without serving.
    #[arg(long, default_value_t = false)]
    pub check: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub num_workers: usize,
    pub stream_buffer_size: usize,
    pub auth_user_key: String,
    pub stub_location: String,
    pub expose_error_traces: bool,
    pub server_addr: String,
    pub uds: bool,
    pub check: bool,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.num_workers == 0 {
            bail!("NUM_WORKERS must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.server_addr.is_empty() {
            bail!("SERVER_ADDR cannot be empty");
        }

        Ok(Self {
            num_workers: args.num_workers,
            stream_buffer_size: args.stream_buffer_size,
            auth_user_key: args.auth_user_key,
            stub_location: args.stub_location,
            expose_error_traces: args.expose_error_traces,
            server_addr: args.server_addr,
            uds: args.uds,
            check: args.check,
        })
    }
}

impl ServerConfig {
    /// Engine settings serving `services`.
    pub fn settings(
        &self,
        services: impl IntoIterator<Item = ServiceDefinition>,
    ) -> anyhow::Result<Settings> {
        let builder = services.into_iter().fold(Settings::builder(), |b, s| b.service(s));
        let settings = builder
            .auth_user_key(self.auth_user_key.clone())
            .stubs(self.stub_location.clone())
            .stream_buffer_size(self.stream_buffer_size)
            .expose_error_traces(self.expose_error_traces)
            .build()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let cli = CliArgs::try_parse_from(std::iter::once("tonic-views-server").chain(args.iter().copied()))?;
        ServerConfig::try_from(cli)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.server_addr, "0.0.0.0:55000");
        assert_eq!(config.num_workers, 1);
        assert_eq!(config.auth_user_key, DEFAULT_AUTH_USER_KEY);
        assert_eq!(config.stub_location, DEFAULT_STUB_LOCATION);
        assert!(!config.expose_error_traces);
        assert!(!config.check);
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(parse(&["--num-workers", "0"]).is_err());
        assert!(parse(&["--stream-buffer-size", "0"]).is_err());
    }

    #[test]
    fn settings_follow_config() {
        let config = parse(&["--auth-user-key", "principal", "--expose-error-traces"]).unwrap();
        let settings = config
            .settings([ServiceDefinition::new(
                "TestService",
                "test",
                "test.proto",
                "users.rpcs",
            )])
            .unwrap();
        assert_eq!(settings.auth_user_key(), "principal");
        assert!(settings.expose_error_traces());
        assert_eq!(settings.stubs(), DEFAULT_STUB_LOCATION);
    }
}
