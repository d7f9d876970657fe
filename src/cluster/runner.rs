/// Job runners: local command execution and its SSH-wrapped remote
/// counterpart. Runners build the final command through a CommandBuilder
/// and hand it to the subprocess primitives; in dry-run mode building
/// still happens but nothing is executed.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};

use crate::cluster::builder::{CommandBuilder, JobSpec};
use crate::config::defs::{ClusterConfig, PipelineError};
use crate::utils::command::{bash_quote, call_subprocess, call_tool, with_timeout};
use crate::utils::file::compression_tool;

/// Runs built commands on the current host.
pub struct JobRunner {
    conf: Arc<ClusterConfig>,
    builder: CommandBuilder,
    test_mode: bool,
}

impl JobRunner {
    pub fn new(conf: Arc<ClusterConfig>, builder: CommandBuilder, test_mode: bool) -> Self {
        JobRunner {
            conf,
            builder,
            test_mode,
        }
    }

    pub fn conf(&self) -> &Arc<ClusterConfig> {
        &self.conf
    }

    pub async fn run_command(
        &self,
        cmd: &str,
        spec: &JobSpec,
        workdir: Option<&Path>,
        path: Option<&str>,
    ) -> Result<Vec<String>, PipelineError> {
        self.run_with_builder(&self.builder, cmd, spec, workdir, path)
            .await
    }

    /// Runs a command through an explicit builder, overriding the default
    /// one. Used for trivial order-sensitive commands next to a
    /// scheduler-wrapping default.
    pub async fn run_with_builder(
        &self,
        builder: &CommandBuilder,
        cmd: &str,
        spec: &JobSpec,
        workdir: Option<&Path>,
        path: Option<&str>,
    ) -> Result<Vec<String>, PipelineError> {
        let built = builder.build(cmd, spec).await?;
        debug!("{}", built);
        if self.test_mode {
            return Ok(Vec::new());
        }
        let path = path.or(self.conf.host_path.as_deref());
        call_subprocess(&built, path, workdir).await
    }

    /// Submission entry point; at this level identical to run_command.
    pub async fn submit_command(
        &self,
        cmd: &str,
        spec: &JobSpec,
        workdir: Option<&Path>,
        path: Option<&str>,
    ) -> Result<Vec<String>, PipelineError> {
        self.run_command(cmd, spec, workdir, path).await
    }
}

fn file_basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Runs built commands on a named remote host over ssh, and moves files
/// to and from a (possibly distinct) transfer host.
#[derive(Debug)]
pub struct RemoteJobRunner {
    conf: Arc<ClusterConfig>,
    builder: CommandBuilder,
    test_mode: bool,
    remote_host: String,
    remote_port: u16,
    remote_user: String,
    remote_wdir: String,
    transfer_host: String,
    transfer_wdir: String,
}

impl RemoteJobRunner {
    /// Builds a runner for the configured cluster head node. All of host,
    /// user and working directory must be set; the transfer host and
    /// directory fall back to the cluster ones.
    pub fn from_config(
        conf: Arc<ClusterConfig>,
        builder: CommandBuilder,
        test_mode: bool,
    ) -> Result<Self, PipelineError> {
        let remote_host = conf
            .cluster
            .clone()
            .ok_or_else(|| missing("cluster host"))?;
        let remote_user = conf
            .cluster_user
            .clone()
            .ok_or_else(|| missing("cluster user"))?;
        let remote_wdir = conf
            .cluster_workdir
            .clone()
            .ok_or_else(|| missing("cluster working directory"))?;
        let transfer_host = conf.transfer_host.clone().unwrap_or_else(|| {
            debug!("Falling back to cluster host for transfer.");
            remote_host.clone()
        });
        let transfer_wdir = conf.transfer_workdir.clone().unwrap_or_else(|| {
            debug!("Falling back to cluster remote directory for transfer.");
            remote_wdir.clone()
        });
        Ok(RemoteJobRunner {
            remote_port: conf.cluster_port,
            conf,
            builder,
            test_mode,
            remote_host,
            remote_user,
            remote_wdir,
            transfer_host,
            transfer_wdir,
        })
    }

    /// Builds a runner for the alternative (desktop) alignment host,
    /// wrapping every command in nohup/nice so it survives the ssh
    /// session.
    pub fn desktop(conf: Arc<ClusterConfig>, test_mode: bool) -> Result<Self, PipelineError> {
        let remote_host = conf.althost.clone().ok_or_else(|| missing("althost"))?;
        let remote_user = conf
            .althost_user
            .clone()
            .ok_or_else(|| missing("althost user"))?;
        let remote_wdir = conf
            .althost_workdir
            .clone()
            .ok_or_else(|| missing("althost working directory"))?;
        Ok(RemoteJobRunner {
            remote_port: conf.althost_port,
            builder: CommandBuilder::Nohup {
                remote_wdir: remote_wdir.clone(),
            },
            conf,
            test_mode,
            remote_host: remote_host.clone(),
            remote_user,
            remote_wdir: remote_wdir.clone(),
            transfer_host: remote_host,
            transfer_wdir: remote_wdir,
        })
    }

    pub fn conf(&self) -> &Arc<ClusterConfig> {
        &self.conf
    }

    pub fn remote_wdir(&self) -> &str {
        &self.remote_wdir
    }

    fn ssh_args(&self, remote_cmd: String) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if let Some(key) = self.conf.cluster_ssh_key.as_deref() {
            args.push("-i".to_string());
            args.push(key.to_string());
        }
        args.push("-p".to_string());
        args.push(self.remote_port.to_string());
        args.push(format!("{}@{}", self.remote_user, self.remote_host));
        args.push(remote_cmd);
        args
    }

    /// Runs a command directly on the remote host: sources the remote
    /// profile, changes to the working directory, optionally sets PATH,
    /// then executes. The remote command travels as a single ssh argument
    /// so no local shell quoting layer applies.
    pub async fn run_command(
        &self,
        cmd: &str,
        spec: &JobSpec,
        wdir: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<String>, PipelineError> {
        self.run_with_builder(&self.builder, cmd, spec, wdir, path)
            .await
    }

    pub async fn run_with_builder(
        &self,
        builder: &CommandBuilder,
        cmd: &str,
        spec: &JobSpec,
        wdir: Option<&str>,
        path: Option<&str>,
    ) -> Result<Vec<String>, PipelineError> {
        let built = builder.build(cmd, spec).await?;
        let wdir = wdir.unwrap_or(&self.remote_wdir);
        let pathdef = match path {
            Some(p) => format!("PATH={} ", p),
            None => String::new(),
        };
        let remote_cmd = format!("source /etc/profile; cd {} && {}{}", wdir, pathdef, built);
        let args = self.ssh_args(remote_cmd);
        debug!("ssh {}", args.join(" "));
        if self.test_mode {
            return Ok(Vec::new());
        }
        with_timeout(
            self.conf.remote_timeout_secs,
            call_tool("ssh", &args, self.conf.host_path.as_deref(), None),
        )
        .await
    }

    pub async fn submit_command(
        &self,
        cmd: &str,
        spec: &JobSpec,
        path: Option<&str>,
    ) -> Result<Vec<String>, PipelineError> {
        self.run_command(cmd, spec, None, path).await
    }

    /// Walks the remote PATH components and returns the first directory
    /// holding an executable of the given name, or None.
    pub async fn find_remote_executable(
        &self,
        progname: &str,
        path: Option<&str>,
    ) -> Result<Option<String>, PipelineError> {
        let snippet = format!(
            "IFS=':' read -a pathary <<< $PATH && for elem in ${{pathary[@]}}; \
             do if [ -x ${{elem}}/{prog} ]; then found=${{elem}}/{prog}; break; fi; done \
             && echo $found",
            prog = progname
        );
        let output = self
            .run_with_builder(&CommandBuilder::Plain, &snippet, &JobSpec::default(), None, path)
            .await?;
        match output.first() {
            Some(line) if !line.trim().is_empty() => {
                let executable = line.trim().to_string();
                debug!("Found remote executable at {}", executable);
                Ok(Some(executable))
            }
            _ => Ok(None),
        }
    }

    fn resolve_destnames(
        &self,
        filenames: &[PathBuf],
        destnames: Option<&[String]>,
    ) -> Result<Vec<String>, PipelineError> {
        match destnames {
            Some(names) => {
                if names.len() != filenames.len() {
                    return Err(PipelineError::InvalidArgument(
                        "If used, the length of the destnames list must equal that of the filenames list."
                            .to_string(),
                    ));
                }
                Ok(names.to_vec())
            }
            None => Ok(filenames.iter().map(|f| file_basename(f)).collect()),
        }
    }

    /// Copies local files to the transfer host working directory via scp.
    /// The same login credentials are assumed to work for the cluster and
    /// the transfer host.
    pub async fn remote_copy_files(
        &self,
        filenames: &[PathBuf],
        destnames: Option<&[String]>,
        same_permissions: bool,
    ) -> Result<(), PipelineError> {
        let destnames = self.resolve_destnames(filenames, destnames)?;
        for (from, dest) in filenames.iter().zip(destnames.iter()) {
            let destfile = bash_quote(&format!("{}/{}", self.transfer_wdir, dest));
            let mut args: Vec<String> = vec!["-P".to_string(), self.remote_port.to_string()];
            if same_permissions {
                args.push("-p".to_string());
            }
            if let Some(key) = self.conf.cluster_ssh_key.as_deref() {
                args.push("-i".to_string());
                args.push(key.to_string());
            }
            args.push("-q".to_string());
            args.push(from.to_string_lossy().into_owned());
            args.push(format!(
                "{}@{}:{}",
                self.remote_user, self.transfer_host, destfile
            ));
            debug!("scp {}", args.join(" "));
            if !self.test_mode {
                with_timeout(
                    self.conf.remote_timeout_secs,
                    call_tool("scp", &args, self.conf.host_path.as_deref(), None),
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Uncompresses a file in the remote working directory with the given
    /// tool (gzip/bzip2 semantics: -f -d, suffix stripped by the tool).
    /// Returns the filename without its compression suffix.
    pub async fn remote_uncompress_file(
        &self,
        fname: &str,
        ziptool: &str,
    ) -> Result<String, PipelineError> {
        info!("Uncompressing remote file {}", fname);
        let destfile = format!("{}/{}", self.remote_wdir, fname);
        let cmd = format!("{} -f -d {}", ziptool, bash_quote(&destfile));
        self.run_with_builder(&CommandBuilder::Plain, &cmd, &JobSpec::default(), None, None)
            .await?;
        Ok(match fname.rfind('.') {
            Some(idx) => fname[..idx].to_string(),
            None => fname.to_string(),
        })
    }

    /// Copies data files to the server, uncompresses where the local copy
    /// carries a compression magic number, and returns the final
    /// remote-resident decompressed path per file.
    pub async fn transfer_data(
        &self,
        filenames: &[PathBuf],
        destnames: Option<&[String]>,
    ) -> Result<Vec<String>, PipelineError> {
        let destnames = self.resolve_destnames(filenames, destnames)?;
        self.remote_copy_files(filenames, Some(&destnames), false)
            .await?;

        let mut uncompressed = Vec::with_capacity(destnames.len());
        for (local, dest) in filenames.iter().zip(destnames.iter()) {
            // The local copy is inspected: the remote header is not
            // readable without another round trip.
            let name = match compression_tool(local)? {
                Some(tool) => self.remote_uncompress_file(dest, tool).await?,
                None => dest.clone(),
            };
            uncompressed.push(format!("{}/{}", self.remote_wdir, name));
        }
        Ok(uncompressed)
    }
}

fn missing(field: &str) -> PipelineError {
    PipelineError::InvalidConfig(format!("Remote host information not provided: {}", field))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_conf() -> ClusterConfig {
        let mut conf = ClusterConfig::default();
        conf.cluster = Some("head.example.org".to_string());
        conf.cluster_user = Some("pipe".to_string());
        conf.cluster_workdir = Some("/scratch/pipe".to_string());
        conf
    }

    #[tokio::test]
    async fn test_dry_run_returns_sentinel_empty_output() -> anyhow::Result<()> {
        let conf = Arc::new(ClusterConfig::default());
        let runner = JobRunner::new(conf, CommandBuilder::Plain, true);
        let out = runner
            .run_command("echo should-not-run", &JobSpec::default(), None, None)
            .await?;
        assert!(out.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_runner_executes() -> anyhow::Result<()> {
        let conf = Arc::new(ClusterConfig::default());
        let runner = JobRunner::new(conf, CommandBuilder::Plain, false);
        let out = runner
            .run_command("echo ran", &JobSpec::default(), None, None)
            .await?;
        assert_eq!(out, vec!["ran".to_string()]);
        Ok(())
    }

    #[test]
    fn test_remote_runner_requires_host_info() {
        let conf = Arc::new(ClusterConfig::default());
        let err = RemoteJobRunner::from_config(conf, CommandBuilder::Plain, true).unwrap_err();
        match err {
            PipelineError::InvalidConfig(msg) => {
                assert!(msg.contains("Remote host information not provided"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_transfer_falls_back_to_cluster_host() {
        let conf = Arc::new(remote_conf());
        let runner = RemoteJobRunner::from_config(conf, CommandBuilder::Plain, true).unwrap();
        assert_eq!(runner.transfer_host, "head.example.org");
        assert_eq!(runner.transfer_wdir, "/scratch/pipe");
    }

    #[tokio::test]
    async fn test_copy_rejects_mismatched_name_lists() {
        let conf = Arc::new(remote_conf());
        let runner = RemoteJobRunner::from_config(conf, CommandBuilder::Plain, true).unwrap();
        let files = vec![PathBuf::from("a.fq"), PathBuf::from("b.fq")];
        let dests = vec!["a.fq".to_string()];
        let err = runner
            .remote_copy_files(&files, Some(&dests), false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_find_remote_executable_dry_run_is_none() -> anyhow::Result<()> {
        let conf = Arc::new(remote_conf());
        let runner = RemoteJobRunner::from_config(conf, CommandBuilder::Plain, true)?;
        assert_eq!(runner.find_remote_executable("bwa", None).await?, None);
        Ok(())
    }

    #[test]
    fn test_desktop_runner_requires_althost() {
        let conf = Arc::new(remote_conf());
        assert!(RemoteJobRunner::desktop(conf, true).is_err());
    }
}
