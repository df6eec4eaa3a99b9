use clap::{Args, Subcommand};
use ipclink_transport::{ConnectConfig, ListenConfig, LocalTransport};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod doctor;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send a single envelope.
    Send(SendArgs),
    /// Accept connections on a port and print received envelopes.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Run local environment health checks.
    Doctor(DoctorArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Doctor(args) => doctor::run(args, format),
    }
}

/// Same-host channel options shared by `send` and `listen`.
#[derive(Args, Debug, Clone)]
pub struct LocalArgs {
    /// Directory holding same-host socket and pipe endpoints.
    #[arg(long, value_name = "DIR")]
    pub local_dir: Option<PathBuf>,
    /// Use named pipes instead of a Unix socket for same-host channels.
    #[arg(long, conflicts_with = "tcp_only")]
    pub fifo: bool,
    /// Never use a same-host channel.
    #[arg(long)]
    pub tcp_only: bool,
}

impl LocalArgs {
    fn transport(&self) -> LocalTransport {
        if self.fifo {
            LocalTransport::Fifo
        } else {
            LocalTransport::UnixSocket
        }
    }

    pub fn connect_config(&self) -> ConnectConfig {
        let mut config = ConnectConfig::default().with_local_transport(self.transport());
        if let Some(dir) = &self.local_dir {
            config = config.with_local_dir(dir);
        }
        config.prefer_local = !self.tcp_only;
        config
    }

    pub fn listen_config(&self) -> ListenConfig {
        let mut config = ListenConfig::default().with_local_transport(self.transport());
        if let Some(dir) = &self.local_dir {
            config = config.with_local_dir(dir);
        }
        if self.tcp_only {
            config = config.without_local();
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Destination as host or host:port.
    #[arg(env = "CENTRALHOST", default_value = "localhost")]
    pub target: String,
    /// Envelope class id.
    #[arg(long, short = 'c', default_value = "1")]
    pub class: u16,
    /// Envelope intent.
    #[arg(long, default_value = "-1", allow_hyphen_values = true)]
    pub intent: i32,
    /// Correlation id. Defaults to 1.
    #[arg(long, allow_hyphen_values = true)]
    pub msg_ref: Option<i32>,
    /// Dispatch reference id.
    #[arg(long, allow_hyphen_values = true)]
    pub dispatch_ref: Option<i32>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["ints", "file"])]
    pub data: Option<String>,
    /// Comma-separated 32-bit integer payload.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, conflicts_with_all = ["data", "file"])]
    pub ints: Option<Vec<i32>>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["data", "ints"])]
    pub file: Option<PathBuf>,
    /// Text carried in the class segment.
    #[arg(long)]
    pub class_data: Option<String>,
    /// Wait for one envelope in return and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    #[command(flatten)]
    pub local: LocalArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Port to accept on.
    pub port: u16,
    /// Filter to specific class ids (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub classes: Option<Vec<u16>>,
    /// Exit after receiving N envelopes.
    #[arg(long)]
    pub count: Option<usize>,
    /// Decode payloads as arrays of 32-bit integers.
    #[arg(long)]
    pub ints: bool,
    #[command(flatten)]
    pub local: LocalArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct DoctorArgs {
    /// Router to check, as host or host:port.
    #[arg(long, env = "CENTRALHOST")]
    pub router: Option<String>,
    /// Also try to open a connection to the router.
    #[arg(long)]
    pub connect: bool,
    /// Directory holding same-host socket and pipe endpoints.
    #[arg(long, value_name = "DIR")]
    pub local_dir: Option<PathBuf>,
}
