use crate::error::Error;
use crate::exec;
use crate::models::{DeployEvent, HostTarget, SoftwareSource};
use crate::roles::NodeRole;
use crate::roles::RoleMap;
use crate::session::SessionManager;
use crate::transfer;
use crate::Result;

use hadrc::ssh::SshSession;
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Remote filesystem layout. Overridable so the pipeline is not welded to
/// one distribution's conventions.
#[derive(Debug, Clone)]
pub struct RemotePaths {
    pub software_dir: String,
    pub install_dir: String,
    pub jdk_link: String,
    pub hadoop_link: String,
    pub profile_file: String,
    pub hosts_file: String,
}

impl Default for RemotePaths {
    fn default() -> Self {
        RemotePaths {
            software_dir: "/opt/software".into(),
            install_dir: "/opt/module".into(),
            jdk_link: "/opt/module/jdk".into(),
            hadoop_link: "/opt/module/hadoop".into(),
            profile_file: "/etc/profile".into(),
            hosts_file: "/etc/hosts".into(),
        }
    }
}

/// Everything the pipeline needs to bring a cluster up.
#[derive(Debug, Clone)]
pub struct DeploymentPlan {
    pub targets: Vec<HostTarget>,
    pub jdk: SoftwareSource,
    pub hadoop: SoftwareSource,
    pub roles: RoleMap,
    pub paths: RemotePaths,
}

/// Cooperative cancellation. Checked between stages and between hosts;
/// an in-flight remote call is never interrupted.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Five-stage deployment pipeline. Each stage walks every host; a failing
/// host is reported and skipped while the stage carries on, and only a
/// stage-level fault (outside the per-host loop) aborts the remainder of
/// the pipeline.
pub struct Deployer {
    sessions: Arc<SessionManager>,
}

impl Deployer {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Deployer { sessions }
    }

    pub async fn deploy(
        &self,
        plan: &DeploymentPlan,
        events: &UnboundedSender<DeployEvent>,
        cancel: &CancelFlag,
    ) {
        info!("starting cluster deployment for {} hosts", plan.targets.len());

        if let Err(e) = plan.roles.validate() {
            error!("deployment aborted: {}", e);
            emit(events, DeployEvent::Fatal(format!("invalid role assignment: {}", e)));
            return;
        }

        let stages: [(&str, u8); 5] = [
            ("environment setup", 0),
            ("JDK install", 20),
            ("Hadoop install", 40),
            ("config distribution", 60),
            ("cluster init and start", 80),
        ];

        for (name, percent) in stages {
            if cancel.is_cancelled() {
                warn!("deployment cancelled before stage: {}", name);
                emit(events, DeployEvent::Fatal("deployment cancelled".into()));
                return;
            }

            emit(events, DeployEvent::Stage { name: name.to_string() });
            emit(events, DeployEvent::Progress { current: percent, total: 100 });

            let outcome = match name {
                "environment setup" => self.setup_environment(plan, events, cancel).await,
                "JDK install" => {
                    self.install_stage(plan, events, cancel, &plan.jdk, &plan.paths.jdk_link, "JDK", None)
                        .await
                }
                "Hadoop install" => {
                    let exports = format!(
                        "export HADOOP_HOME={}\nexport PATH=$PATH:$HADOOP_HOME/bin:$HADOOP_HOME/sbin",
                        plan.paths.hadoop_link
                    );
                    self.install_stage(
                        plan,
                        events,
                        cancel,
                        &plan.hadoop,
                        &plan.paths.hadoop_link,
                        "Hadoop",
                        Some(exports),
                    )
                    .await
                }
                "config distribution" => self.distribute_configs(plan, events, cancel).await,
                _ => self.init_and_start(plan, events, cancel).await,
            };

            if let Err(e) = outcome {
                error!("stage '{}' failed: {}", name, e);
                emit(events, DeployEvent::Fatal(format!("stage '{}' failed: {}", name, e)));
                return;
            }
        }

        emit(events, DeployEvent::Progress { current: 100, total: 100 });
        emit(events, DeployEvent::Complete);
        info!("cluster deployment finished");
    }

    /// Stage 1: hostname plus name resolution on every host.
    async fn setup_environment(
        &self,
        plan: &DeploymentPlan,
        events: &UnboundedSender<DeployEvent>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        emit(events, DeployEvent::Log("configuring cluster environment".into()));
        let hosts_block = hosts_table(&plan.targets);

        for target in &plan.targets {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if let Err(e) = self.host_environment(target, &hosts_block, plan, events).await {
                error!("environment setup on {} failed: {}", target.ip, e);
                emit(
                    events,
                    DeployEvent::ErrorLine(format!(
                        "[VM{}] environment setup failed: {}",
                        target.index, e
                    )),
                );
            }
        }

        emit(events, DeployEvent::Log("environment setup finished".into()));
        Ok(())
    }

    async fn host_environment(
        &self,
        target: &HostTarget,
        hosts_block: &str,
        plan: &DeploymentPlan,
        events: &UnboundedSender<DeployEvent>,
    ) -> Result<()> {
        let session = self.sessions.get_or_create(target).await?;

        emit(
            events,
            DeployEvent::Log(format!("[VM{}] setting hostname: {}", target.index, target.hostname)),
        );
        self.run_step(
            &session,
            target.index,
            &format!("sudo hostnamectl set-hostname {}", target.hostname),
            events,
        )
        .await?;

        emit(
            events,
            DeployEvent::Log(format!("[VM{}] updating {}", target.index, plan.paths.hosts_file)),
        );
        self.run_step(
            &session,
            target.index,
            &format!("echo '{}' | sudo tee -a {}", hosts_block, plan.paths.hosts_file),
            events,
        )
        .await?;

        Ok(())
    }

    /// Stages 2 and 3: stage the archive, unpack it into the install root
    /// and point the canonical symlink at it. Hadoop additionally gets its
    /// environment exports appended to the system profile.
    #[allow(clippy::too_many_arguments)]
    async fn install_stage(
        &self,
        plan: &DeploymentPlan,
        events: &UnboundedSender<DeployEvent>,
        cancel: &CancelFlag,
        source: &SoftwareSource,
        link: &str,
        label: &str,
        profile_exports: Option<String>,
    ) -> Result<()> {
        emit(events, DeployEvent::Log(format!("installing {} on all hosts", label)));

        for target in &plan.targets {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if let Err(e) = self
                .host_install(target, plan, source, link, label, profile_exports.as_deref(), events)
                .await
            {
                error!("{} install on {} failed: {}", label, target.ip, e);
                emit(
                    events,
                    DeployEvent::ErrorLine(format!(
                        "[VM{}] {} install failed: {}",
                        target.index, label, e
                    )),
                );
            }
        }

        emit(events, DeployEvent::Log(format!("{} install finished", label)));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn host_install(
        &self,
        target: &HostTarget,
        plan: &DeploymentPlan,
        source: &SoftwareSource,
        link: &str,
        label: &str,
        profile_exports: Option<&str>,
        events: &UnboundedSender<DeployEvent>,
    ) -> Result<()> {
        let paths = &plan.paths;
        let session = self.sessions.get_or_create(target).await?;

        self.run_step(
            &session,
            target.index,
            &format!("sudo mkdir -p {}", paths.software_dir),
            events,
        )
        .await?;
        self.run_step(
            &session,
            target.index,
            &format!(
                "sudo chown -R {}:{} {}",
                target.username, target.username, paths.software_dir
            ),
            events,
        )
        .await?;
        self.run_step(
            &session,
            target.index,
            &format!("sudo mkdir -p {}", paths.install_dir),
            events,
        )
        .await?;

        let archive = match source {
            SoftwareSource::LocalFile { path } => {
                emit(
                    events,
                    DeployEvent::Log(format!(
                        "[VM{}] uploading {} archive to {}",
                        target.index, label, paths.software_dir
                    )),
                );
                let (remote_path, _bytes) =
                    transfer::upload(&session, path, &paths.software_dir, None).await?;
                remote_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(remote_path.as_str())
                    .to_string()
            }
            SoftwareSource::Preset { archive } => {
                emit(
                    events,
                    DeployEvent::Log(format!(
                        "[VM{}] using preset {} archive: {}",
                        target.index, label, archive
                    )),
                );
                archive.clone()
            }
        };

        emit(
            events,
            DeployEvent::Log(format!(
                "[VM{}] extracting {} into {}",
                target.index, archive, paths.install_dir
            )),
        );
        self.run_step(
            &session,
            target.index,
            &format!(
                "sudo tar -zxf {}/{} -C {}",
                paths.software_dir, archive, paths.install_dir
            ),
            events,
        )
        .await?;

        let stem = archive_stem(&archive);
        self.run_step(
            &session,
            target.index,
            &format!("sudo ln -sfn {}/{} {}", paths.install_dir, stem, link),
            events,
        )
        .await?;

        if let Some(exports) = profile_exports {
            self.run_step(
                &session,
                target.index,
                &format!("echo '{}' | sudo tee -a {}", exports, paths.profile_file),
                events,
            )
            .await?;
        }

        emit(
            events,
            DeployEvent::Log(format!("[VM{}] {} install complete", target.index, label)),
        );
        Ok(())
    }

    /// Stage 4: generate the cluster site files from the role assignment
    /// and push them to every host. Files land in the staging directory
    /// first, then move into the Hadoop config directory with elevated
    /// rights.
    async fn distribute_configs(
        &self,
        plan: &DeploymentPlan,
        events: &UnboundedSender<DeployEvent>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        emit(events, DeployEvent::Log("generating cluster configuration".into()));
        let files = generate_cluster_configs(plan)?;
        let staging = format!("{}/conf", plan.paths.software_dir);
        let conf_dir = format!("{}/etc/hadoop", plan.paths.hadoop_link);

        for target in &plan.targets {
            if cancel.is_cancelled() {
                return Ok(());
            }

            if let Err(e) = self
                .host_distribute(target, &files, &staging, &conf_dir, events)
                .await
            {
                error!("config distribution to {} failed: {}", target.ip, e);
                emit(
                    events,
                    DeployEvent::ErrorLine(format!(
                        "[VM{}] config distribution failed: {}",
                        target.index, e
                    )),
                );
            }
        }

        emit(events, DeployEvent::Log("configuration distributed".into()));
        Ok(())
    }

    async fn host_distribute(
        &self,
        target: &HostTarget,
        files: &[(String, String)],
        staging: &str,
        conf_dir: &str,
        events: &UnboundedSender<DeployEvent>,
    ) -> Result<()> {
        let session = self.sessions.get_or_create(target).await?;

        for (name, content) in files {
            session
                .transfer_file(content.as_bytes(), &format!("{}/{}", staging, name))
                .await?;
        }

        emit(
            events,
            DeployEvent::Log(format!("[VM{}] installing configuration files", target.index)),
        );
        self.run_step(
            &session,
            target.index,
            &format!("sudo mkdir -p {} && sudo cp {}/* {}", conf_dir, staging, conf_dir),
            events,
        )
        .await?;

        Ok(())
    }

    /// Stage 5: format the filesystem metadata once on the NameNode host,
    /// then bring the storage and resource services up cluster wide.
    async fn init_and_start(
        &self,
        plan: &DeploymentPlan,
        events: &UnboundedSender<DeployEvent>,
        cancel: &CancelFlag,
    ) -> Result<()> {
        let namenode_index = plan
            .roles
            .namenode_host()
            .ok_or_else(|| Error::Role("no NameNode host assigned".into()))?;
        let resourcemanager_index = plan
            .roles
            .resourcemanager_host()
            .ok_or_else(|| Error::Role("no ResourceManager host assigned".into()))?;

        let namenode = target_by_index(plan, namenode_index)?;
        let resourcemanager = target_by_index(plan, resourcemanager_index)?;

        // Formatting must happen exactly once, before any service starts.
        emit(
            events,
            DeployEvent::Log(format!("[VM{}] formatting NameNode metadata", namenode.index)),
        );
        if let Err(e) = self
            .run_on(
                namenode,
                &format!(
                    "sudo {}/bin/hdfs namenode -format -nonInteractive",
                    plan.paths.hadoop_link
                ),
                events,
            )
            .await
        {
            error!("NameNode format on {} failed: {}", namenode.ip, e);
            emit(
                events,
                DeployEvent::ErrorLine(format!(
                    "[VM{}] NameNode format failed: {}",
                    namenode.index, e
                )),
            );
        }

        if cancel.is_cancelled() {
            return Ok(());
        }

        emit(
            events,
            DeployEvent::Log(format!("[VM{}] starting HDFS services", namenode.index)),
        );
        if let Err(e) = self
            .run_on(
                namenode,
                &format!("{}/sbin/start-dfs.sh", plan.paths.hadoop_link),
                events,
            )
            .await
        {
            error!("HDFS start on {} failed: {}", namenode.ip, e);
            emit(
                events,
                DeployEvent::ErrorLine(format!(
                    "[VM{}] HDFS start failed: {}",
                    namenode.index, e
                )),
            );
        }

        if cancel.is_cancelled() {
            return Ok(());
        }

        emit(
            events,
            DeployEvent::Log(format!(
                "[VM{}] starting YARN services",
                resourcemanager.index
            )),
        );
        if let Err(e) = self
            .run_on(
                resourcemanager,
                &format!("{}/sbin/start-yarn.sh", plan.paths.hadoop_link),
                events,
            )
            .await
        {
            error!("YARN start on {} failed: {}", resourcemanager.ip, e);
            emit(
                events,
                DeployEvent::ErrorLine(format!(
                    "[VM{}] YARN start failed: {}",
                    resourcemanager.index, e
                )),
            );
        }

        emit(events, DeployEvent::Log("cluster services started".into()));
        Ok(())
    }

    async fn run_on(
        &self,
        target: &HostTarget,
        command: &str,
        events: &UnboundedSender<DeployEvent>,
    ) -> Result<()> {
        let session = self.sessions.get_or_create(target).await?;
        self.run_step(&session, target.index, command, events).await
    }

    /// One remote command with its output forwarded into the event stream.
    /// A nonzero exit turns into an error so per-host handling can skip
    /// the rest of that host's steps.
    async fn run_step(
        &self,
        session: &SshSession,
        host_index: u8,
        command: &str,
        events: &UnboundedSender<DeployEvent>,
    ) -> Result<()> {
        let outcome = exec::execute_streaming(
            session,
            command,
            |line| emit(events, DeployEvent::Log(format!("[VM{}] {}", host_index, line))),
            |line| {
                emit(
                    events,
                    DeployEvent::ErrorLine(format!("[VM{}] {}", host_index, line)),
                )
            },
        )
        .await?;

        if !outcome.success {
            return Err(Error::Command(format!(
                "`{}` exited with code {}",
                command, outcome.exit_code
            )));
        }
        Ok(())
    }
}

fn emit(events: &UnboundedSender<DeployEvent>, event: DeployEvent) {
    // A dropped receiver only means nobody is watching anymore.
    let _ = events.send(event);
}

fn target_by_index(plan: &DeploymentPlan, index: u8) -> Result<&HostTarget> {
    plan.targets
        .iter()
        .find(|target| target.index == index)
        .ok_or_else(|| Error::Role(format!("role assigned to unknown host index {}", index)))
}

/// The address to hostname mapping appended to every host's resolution
/// file.
fn hosts_table(targets: &[HostTarget]) -> String {
    targets
        .iter()
        .map(|target| format!("{} {}", target.ip, target.hostname))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `jdk-8u212-linux-x64.tar.gz` unpacks into `jdk-8u212-linux-x64`.
fn archive_stem(archive: &str) -> &str {
    archive
        .strip_suffix(".tar.gz")
        .or_else(|| archive.strip_suffix(".tgz"))
        .or_else(|| archive.strip_suffix(".tar"))
        .unwrap_or(archive)
}

fn xml_property(name: &str, value: &str) -> String {
    format!(
        "  <property>\n    <name>{}</name>\n    <value>{}</value>\n  </property>\n",
        name, value
    )
}

fn site_file(properties: &[(String, String)]) -> String {
    let mut body = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<configuration>\n");
    for (name, value) in properties {
        body.push_str(&xml_property(name, value));
    }
    body.push_str("</configuration>\n");
    body
}

/// Render the site files reflecting the role assignment.
fn generate_cluster_configs(plan: &DeploymentPlan) -> Result<Vec<(String, String)>> {
    let roles = &plan.roles;

    let namenode = hostname_of(plan, roles.namenode_host())?;
    let resourcemanager = hostname_of(plan, roles.resourcemanager_host())?;
    let secondary = hostname_of(plan, roles.secondary_namenode_host())?;

    let replication = plan.targets.len().min(3).to_string();

    let core_site = site_file(&[
        (
            "fs.defaultFS".to_string(),
            format!("hdfs://{}:8020", namenode),
        ),
        (
            "hadoop.tmp.dir".to_string(),
            format!("{}/data", plan.paths.hadoop_link),
        ),
    ]);

    let hdfs_site = site_file(&[
        (
            "dfs.namenode.http-address".to_string(),
            format!("{}:9870", namenode),
        ),
        (
            "dfs.namenode.secondary.http-address".to_string(),
            format!("{}:9868", secondary),
        ),
        ("dfs.replication".to_string(), replication),
    ]);

    let yarn_site = site_file(&[
        (
            "yarn.resourcemanager.hostname".to_string(),
            resourcemanager.clone(),
        ),
        (
            "yarn.nodemanager.aux-services".to_string(),
            "mapreduce_shuffle".to_string(),
        ),
    ]);

    let workers = roles
        .hosts_with(NodeRole::DataNode)
        .into_iter()
        .map(|index| hostname_of(plan, Some(index)))
        .collect::<Result<Vec<_>>>()?
        .join("\n")
        + "\n";

    Ok(vec![
        ("core-site.xml".to_string(), core_site),
        ("hdfs-site.xml".to_string(), hdfs_site),
        ("yarn-site.xml".to_string(), yarn_site),
        ("workers".to_string(), workers),
    ])
}

fn hostname_of(plan: &DeploymentPlan, index: Option<u8>) -> Result<String> {
    let index = index.ok_or_else(|| Error::Role("required role is unassigned".into()))?;
    Ok(target_by_index(plan, index)?.hostname.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn test_target(index: u8, port: u16) -> HostTarget {
        HostTarget {
            index,
            ip: format!("127.0.0.{}", index),
            hostname: format!("hadoop10{}", index),
            username: "hadoop".into(),
            password: "secret".into(),
            ssh_port: port,
            timeout_ms: 1_000,
        }
    }

    fn test_plan(port: u16) -> DeploymentPlan {
        DeploymentPlan {
            targets: vec![test_target(1, port), test_target(2, port), test_target(3, port)],
            jdk: SoftwareSource::Preset {
                archive: "jdk-8u212-linux-x64.tar.gz".into(),
            },
            hadoop: SoftwareSource::Preset {
                archive: "hadoop-3.1.3.tar.gz".into(),
            },
            roles: RoleMap::default_three_node([1, 2, 3]),
            paths: RemotePaths::default(),
        }
    }

    #[test]
    fn hosts_table_lists_every_node() {
        let plan = test_plan(22);
        let table = hosts_table(&plan.targets);
        assert_eq!(
            table,
            "127.0.0.1 hadoop101\n127.0.0.2 hadoop102\n127.0.0.3 hadoop103"
        );
    }

    #[test]
    fn archive_stem_strips_known_suffixes() {
        assert_eq!(archive_stem("jdk-8u212-linux-x64.tar.gz"), "jdk-8u212-linux-x64");
        assert_eq!(archive_stem("hadoop-3.1.3.tgz"), "hadoop-3.1.3");
        assert_eq!(archive_stem("plain.tar"), "plain");
        assert_eq!(archive_stem("unknown.zip"), "unknown.zip");
    }

    #[test]
    fn generated_configs_reflect_role_assignment() {
        let plan = test_plan(22);
        let files = generate_cluster_configs(&plan).unwrap();

        let core = &files.iter().find(|(n, _)| n == "core-site.xml").unwrap().1;
        assert!(core.contains("hdfs://hadoop101:8020"));

        let hdfs = &files.iter().find(|(n, _)| n == "hdfs-site.xml").unwrap().1;
        assert!(hdfs.contains("hadoop103:9868"));
        assert!(hdfs.contains("<value>3</value>"));

        let yarn = &files.iter().find(|(n, _)| n == "yarn-site.xml").unwrap().1;
        assert!(yarn.contains("hadoop102"));

        let workers = &files.iter().find(|(n, _)| n == "workers").unwrap().1;
        assert_eq!(workers, "hadoop101\nhadoop102\nhadoop103\n");
    }

    #[test]
    fn cancel_flag_round_trip() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
        assert!(flag.clone().is_cancelled());
    }

    #[tokio::test]
    async fn unreachable_hosts_produce_errors_but_pipeline_completes() {
        // Nothing listens on port 1; every per-host step fails, yet the
        // pipeline must visit all five stages and finish with Complete.
        let deployer = Deployer::new(Arc::new(SessionManager::new()));
        let plan = test_plan(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        deployer.deploy(&plan, &tx, &CancelFlag::new()).await;
        drop(tx);

        let mut stages = Vec::new();
        let mut error_lines = 0;
        let mut completed = false;
        let mut fatal = false;
        while let Some(event) = rx.recv().await {
            match event {
                DeployEvent::Stage { name } => stages.push(name),
                DeployEvent::ErrorLine(_) => error_lines += 1,
                DeployEvent::Complete => completed = true,
                DeployEvent::Fatal(_) => fatal = true,
                _ => {}
            }
        }

        assert_eq!(stages.len(), 5);
        assert!(error_lines >= plan.targets.len());
        assert!(completed);
        assert!(!fatal);
    }

    #[tokio::test]
    async fn cancelled_deployment_stops_before_doing_work() {
        let deployer = Deployer::new(Arc::new(SessionManager::new()));
        let plan = test_plan(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let cancel = CancelFlag::new();
        cancel.cancel();
        deployer.deploy(&plan, &tx, &cancel).await;
        drop(tx);

        let mut saw_fatal = false;
        let mut saw_stage = false;
        while let Some(event) = rx.recv().await {
            match event {
                DeployEvent::Fatal(message) => {
                    saw_fatal = true;
                    assert!(message.contains("cancelled"));
                }
                DeployEvent::Stage { .. } => saw_stage = true,
                _ => {}
            }
        }

        assert!(saw_fatal);
        assert!(!saw_stage);
    }

    #[tokio::test]
    async fn invalid_roles_are_fatal_before_any_stage() {
        let deployer = Deployer::new(Arc::new(SessionManager::new()));
        let mut plan = test_plan(1);
        plan.roles = RoleMap::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        deployer.deploy(&plan, &tx, &CancelFlag::new()).await;
        drop(tx);

        let mut saw_fatal = false;
        while let Some(event) = rx.recv().await {
            if let DeployEvent::Fatal(message) = event {
                saw_fatal = true;
                assert!(message.contains("role"));
            }
        }
        assert!(saw_fatal);
    }
}
