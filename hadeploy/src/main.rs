use clap::{arg, command, ArgMatches, Command};
use log::error;
use std::path::PathBuf;
use std::sync::Arc;

use hadeploy::config;
use hadeploy::logging::init_logging;
use hadeploy::models::{DeployEvent, HostTarget, SoftwareSource};
use hadeploy::orchestrator::{CancelFlag, Deployer, DeploymentPlan, RemotePaths};
use hadeploy::roles::RoleMap;
use hadeploy::session::SessionManager;
use hadeploy::tester::ConnectionTester;
use hadeploy::transfer::TransferManager;
use hadeploy::validate;
use hadeploy::vault::Vault;
use hadeploy::{Error, Result};

const DEFAULT_JDK_ARCHIVE: &str = "jdk-8u212-linux-x64.tar.gz";
const DEFAULT_HADOOP_ARCHIVE: &str = "hadoop-3.1.3.tar.gz";

fn cli() -> Command {
    command!()
        .about("Automated bring-up of a 3-node Hadoop cluster over SSH")
        .subcommand_required(true)
        .arg(arg!(--config <FILE> "Cluster config file").global(true))
        .subcommand(Command::new("test").about("Run layered connection diagnostics on every host"))
        .subcommand(
            Command::new("upload")
                .about("Upload a local file to every host concurrently")
                .arg(arg!(<FILE> "Local file to upload"))
                .arg(arg!(<REMOTE_DIR> "Remote directory to place it in")),
        )
        .subcommand(
            Command::new("deploy")
                .about("Run the full deployment pipeline")
                .arg(arg!(--"jdk-file" <FILE> "Local JDK archive to upload"))
                .arg(arg!(--"jdk-archive" <NAME> "JDK archive already staged on the hosts"))
                .arg(arg!(--"hadoop-file" <FILE> "Local Hadoop archive to upload"))
                .arg(arg!(--"hadoop-archive" <NAME> "Hadoop archive already staged on the hosts")),
        )
}

#[tokio::main]
async fn main() {
    init_logging();

    let matches = cli().get_matches();
    let result = match matches.subcommand() {
        Some(("test", sub)) => run_test(&matches, sub).await,
        Some(("upload", sub)) => run_upload(&matches, sub).await,
        Some(("deploy", sub)) => run_deploy(&matches, sub).await,
        _ => unreachable!("subcommand is required"),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn config_path(matches: &ArgMatches) -> Result<PathBuf> {
    match matches.get_one::<String>("config") {
        Some(path) => Ok(PathBuf::from(path)),
        None => config::default_config_path(),
    }
}

fn load_targets(matches: &ArgMatches) -> Result<Vec<HostTarget>> {
    let vault = Vault::open_default()?;
    let path = config_path(matches)?;
    let targets = config::load(&path, &vault)?;

    if targets.is_empty() {
        return Err(Error::validation(
            "config",
            format!("no hosts configured, populate {} first", path.display()),
        ));
    }

    for target in &targets {
        validate::validate_target(target)?;
    }

    Ok(targets)
}

async fn run_test(matches: &ArgMatches, _sub: &ArgMatches) -> Result<()> {
    let targets = load_targets(matches)?;

    let sessions = Arc::new(SessionManager::new());
    let tester = ConnectionTester::new(Arc::clone(&sessions));

    let reports = tester.test_all(&targets).await;

    let mut succeeded = 0;
    for report in &reports {
        if report.status.is_success() {
            succeeded += 1;
            println!(
                "VM{} {:<15} {:<24} {}ms",
                report.index,
                report.ip,
                report.status.describe(),
                report.latency.as_millis()
            );
        } else {
            println!(
                "VM{} {:<15} {:<24} {}",
                report.index,
                report.ip,
                report.status.describe(),
                report.message
            );
            if let Some(detail) = &report.detail {
                println!("    detail: {}", detail);
            }
        }
    }
    println!("connection test: {}/{} succeeded", succeeded, reports.len());

    sessions.close_all().await;
    Ok(())
}

async fn run_upload(matches: &ArgMatches, sub: &ArgMatches) -> Result<()> {
    let targets = load_targets(matches)?;

    let local = PathBuf::from(sub.get_one::<String>("FILE").expect("required"));
    let remote_dir = sub.get_one::<String>("REMOTE_DIR").expect("required");

    let sessions = Arc::new(SessionManager::new());
    let manager = TransferManager::new(Arc::clone(&sessions));

    let outcomes = manager.upload_to_all(&targets, &local, remote_dir).await;

    let mut succeeded = 0;
    for outcome in &outcomes {
        if outcome.success {
            succeeded += 1;
            println!(
                "VM{} {:<15} ok  {} ({} bytes, {}ms)",
                outcome.index,
                outcome.ip,
                outcome.remote_path,
                outcome.bytes,
                outcome.duration.as_millis()
            );
        } else {
            println!(
                "VM{} {:<15} failed  {}",
                outcome.index,
                outcome.ip,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    println!("upload: {}/{} succeeded", succeeded, outcomes.len());

    sessions.close_all().await;
    Ok(())
}

fn software_source(
    sub: &ArgMatches,
    file_arg: &str,
    archive_arg: &str,
    default_archive: &str,
) -> SoftwareSource {
    if let Some(path) = sub.get_one::<String>(file_arg) {
        SoftwareSource::LocalFile {
            path: PathBuf::from(path),
        }
    } else {
        SoftwareSource::Preset {
            archive: sub
                .get_one::<String>(archive_arg)
                .cloned()
                .unwrap_or_else(|| default_archive.to_string()),
        }
    }
}

async fn run_deploy(matches: &ArgMatches, sub: &ArgMatches) -> Result<()> {
    let targets = load_targets(matches)?;

    if targets.len() != 3 {
        return Err(Error::validation(
            "config",
            format!("deployment expects a 3-node cluster, found {}", targets.len()),
        ));
    }

    let roles = RoleMap::default_three_node([targets[0].index, targets[1].index, targets[2].index]);

    let plan = DeploymentPlan {
        targets,
        jdk: software_source(sub, "jdk-file", "jdk-archive", DEFAULT_JDK_ARCHIVE),
        hadoop: software_source(sub, "hadoop-file", "hadoop-archive", DEFAULT_HADOOP_ARCHIVE),
        roles,
        paths: RemotePaths::default(),
    };

    let sessions = Arc::new(SessionManager::new());
    let deployer = Deployer::new(Arc::clone(&sessions));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let cancel = CancelFlag::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let worker = tokio::spawn(async move {
        deployer.deploy(&plan, &tx, &cancel).await;
    });

    // The event channel is the only coupling between the pipeline and
    // this drain loop; it ends when the deployer drops its sender.
    let mut fatal = None;
    while let Some(event) = rx.recv().await {
        match event {
            DeployEvent::Stage { name } => println!("==> {}", name),
            DeployEvent::Progress { current, total } => println!("    [{:>3}/{}]", current, total),
            DeployEvent::Log(line) => println!("    {}", line),
            DeployEvent::ErrorLine(line) => eprintln!("  ! {}", line),
            DeployEvent::Complete => println!("deployment complete"),
            DeployEvent::Fatal(message) => {
                eprintln!("deployment failed: {}", message);
                fatal = Some(message);
            }
        }
    }

    let _ = worker.await;
    sessions.close_all().await;

    match fatal {
        Some(message) => Err(Error::Command(message)),
        None => Ok(()),
    }
}
