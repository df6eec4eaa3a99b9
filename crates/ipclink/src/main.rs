mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "ipclink", version, about = "Send and inspect ipclink envelopes")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "IPCLINK_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "ipclink",
            "send",
            "central:1390",
            "--class",
            "42",
            "--intent",
            "-1",
            "--data",
            "hello",
        ])
        .expect("send args should parse");

        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.target, "central:1390");
        assert_eq!(args.class, 42);
        assert_eq!(args.intent, -1);
    }

    #[test]
    fn parses_int_payload_list() {
        let cli = Cli::try_parse_from(["ipclink", "send", "localhost", "--ints", "1,-2,3"])
            .expect("send args should parse");
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(args.ints, Some(vec![1, -2, 3]));
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "ipclink",
            "send",
            "localhost",
            "--ints",
            "1,2",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn rejects_fifo_with_tcp_only() {
        let err = Cli::try_parse_from(["ipclink", "listen", "1381", "--fifo", "--tcp-only"])
            .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_listen_subcommand() {
        let cli = Cli::try_parse_from([
            "ipclink",
            "listen",
            "1381",
            "--classes",
            "1,42",
            "--count",
            "2",
            "--local-dir",
            "/tmp/x",
        ])
        .expect("listen args should parse");
        let Command::Listen(args) = cli.command else {
            panic!("expected listen");
        };
        assert_eq!(args.port, 1381);
        assert_eq!(args.classes, Some(vec![1, 42]));
        assert_eq!(args.count, Some(2));
        let config = args.local.listen_config();
        assert_eq!(config.local_dir, std::path::PathBuf::from("/tmp/x"));
        assert!(config.local);
    }

    #[test]
    fn tcp_only_disables_local_channel() {
        let cli = Cli::try_parse_from(["ipclink", "send", "localhost", "--tcp-only"])
            .expect("send args should parse");
        let Command::Send(args) = cli.command else {
            panic!("expected send");
        };
        assert!(!args.local.connect_config().prefer_local);
    }
}
