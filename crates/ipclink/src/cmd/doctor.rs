use std::path::{Path, PathBuf};

use ipclink_transport::{
    connect, hostname, is_local_host, ConnectConfig, Target, UnixDomainSocket,
    DEFAULT_LOCAL_DIR, DEFAULT_SOCKET_BUFFER,
};
use serde::Serialize;

use crate::cmd::DoctorArgs;
use crate::exit::{CliResult, HEALTH_CHECK_FAILED, SUCCESS};
use crate::output::OutputFormat;

#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum CheckStatus {
    Pass,
    Fail,
    Warn,
    Info,
    Skip,
}

#[derive(Debug, Serialize)]
struct CheckResult {
    name: String,
    status: CheckStatus,
    detail: String,
}

#[derive(Debug, Serialize)]
struct DoctorOutput {
    checks: Vec<CheckResult>,
    overall: &'static str,
}

pub fn run(args: DoctorArgs, format: OutputFormat) -> CliResult<i32> {
    let local_dir = args
        .local_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR));

    let mut checks = vec![
        platform_transport_check(),
        hostname_check(),
        local_dir_check(&local_dir),
        temp_dir_writable_check(),
    ];
    checks.extend(router_checks(&args, &local_dir));
    checks.push(compiled_features_check());

    let output = summarize(checks);
    print_doctor(&output, format);

    if output.overall == "fail" {
        Ok(HEALTH_CHECK_FAILED)
    } else {
        Ok(SUCCESS)
    }
}

fn summarize(checks: Vec<CheckResult>) -> DoctorOutput {
    let has_fail = checks.iter().any(|c| matches!(c.status, CheckStatus::Fail));
    DoctorOutput {
        checks,
        overall: if has_fail { "fail" } else { "pass" },
    }
}

fn check(name: &str, status: CheckStatus, detail: impl Into<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status,
        detail: detail.into(),
    }
}

fn print_doctor(output: &DoctorOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("ipclink doctor\n");
            for c in &output.checks {
                println!(
                    "  [{:>4}] {:<22} {}",
                    status_text(c.status),
                    c.name,
                    c.detail
                );
            }
            if output.overall == "pass" {
                println!("\n  Result: all checks passed");
            } else {
                println!("\n  Result: one or more checks failed");
            }
        }
        OutputFormat::Raw => {
            println!("{}", output.overall);
        }
    }
}

fn status_text(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "PASS",
        CheckStatus::Fail => "FAIL",
        CheckStatus::Warn => "WARN",
        CheckStatus::Info => "INFO",
        CheckStatus::Skip => "SKIP",
    }
}

fn platform_transport_check() -> CheckResult {
    if cfg!(unix) {
        check(
            "platform_transport",
            CheckStatus::Pass,
            "TCP, Unix domain sockets and named pipes available",
        )
    } else {
        check(
            "platform_transport",
            CheckStatus::Fail,
            "same-host channels need a Unix platform",
        )
    }
}

fn hostname_check() -> CheckResult {
    match hostname() {
        Ok(name) => check("hostname", CheckStatus::Pass, name),
        Err(err) => check(
            "hostname",
            CheckStatus::Fail,
            format!("gethostname failed: {err}"),
        ),
    }
}

fn local_dir_check(dir: &Path) -> CheckResult {
    match std::fs::metadata(dir) {
        Ok(meta) if !meta.is_dir() => check(
            "local_dir",
            CheckStatus::Fail,
            format!("{} is not a directory", dir.display()),
        ),
        Ok(meta) if meta.permissions().readonly() => check(
            "local_dir",
            CheckStatus::Warn,
            format!(
                "{} is read-only; listeners will accept over TCP only",
                dir.display()
            ),
        ),
        Ok(_) => check(
            "local_dir",
            CheckStatus::Pass,
            format!("{} present", dir.display()),
        ),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => check(
            "local_dir",
            CheckStatus::Info,
            format!("{} absent; the first listener creates it", dir.display()),
        ),
        Err(err) => check(
            "local_dir",
            CheckStatus::Fail,
            format!("{}: {err}", dir.display()),
        ),
    }
}

fn temp_dir_writable_check() -> CheckResult {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!(
        "ipclink-doctor-{}-{nanos}",
        std::process::id()
    ));
    let _ = std::fs::create_dir_all(&dir);
    let result = UnixDomainSocket::bind_with_mode(dir.join("doctor.sock"), 0o700, DEFAULT_SOCKET_BUFFER);
    let _ = std::fs::remove_dir_all(&dir);

    match result {
        Ok(_) => check(
            "temp_dir_writable",
            CheckStatus::Pass,
            "temp socket bind succeeded",
        ),
        Err(err) => check(
            "temp_dir_writable",
            CheckStatus::Fail,
            format!("temp socket bind failed: {err}"),
        ),
    }
}

fn router_checks(args: &DoctorArgs, local_dir: &Path) -> Vec<CheckResult> {
    let Some(raw) = &args.router else {
        return vec![check(
            "router_target",
            CheckStatus::Skip,
            "no --router given and CENTRALHOST not set",
        )];
    };
    let target = match Target::parse(raw) {
        Ok(target) => target,
        Err(err) => return vec![check("router_target", CheckStatus::Fail, err.to_string())],
    };

    let same_host = hostname()
        .map(|this_host| is_local_host(&target.host, &this_host))
        .unwrap_or(false);
    let mut checks = vec![check(
        "router_target",
        CheckStatus::Pass,
        format!(
            "{target} ({})",
            if same_host { "same host" } else { "remote" }
        ),
    )];

    if !args.connect {
        checks.push(check(
            "router_connect",
            CheckStatus::Skip,
            "pass --connect to try a connection",
        ));
        return checks;
    }
    let config = ConnectConfig::default().with_local_dir(local_dir);
    checks.push(match connect(&target, &config) {
        Ok(conn) => check(
            "router_connect",
            CheckStatus::Pass,
            format!("connected over {}", conn.kind().as_str()),
        ),
        Err(err) => check("router_connect", CheckStatus::Fail, err.to_string()),
    });
    checks
}

fn compiled_features_check() -> CheckResult {
    let mut features = Vec::new();
    if cfg!(feature = "peer") {
        features.push("peer");
    }
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    check("compiled_features", CheckStatus::Info, features.join(", "))
}
