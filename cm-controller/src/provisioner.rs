use std::{
    io::{self, Read, Write},
    process::{Command, Stdio},
    thread,
};

use tracing::info;

use crate::Play;

/// Executes a play on behalf of a job.
///
/// Called on the blocking thread pool. Output written to `log` becomes
/// visible to log readers as soon as it is written.
pub trait Provisioner: Send + Sync + 'static {
    fn run(&self, play: &Play, log: &mut dyn Write) -> Result<(), String>;
}

/// Describes the play it would run without executing anything.
#[derive(Clone, Debug, Default)]
pub struct DryRunProvisioner;

impl Provisioner for DryRunProvisioner {
    fn run(&self, play: &Play, log: &mut dyn Write) -> Result<(), String> {
        describe_play(play, log).map_err(|err| format!("failed to write job log: {err}"))
    }
}

fn describe_play(play: &Play, log: &mut dyn Write) -> io::Result<()> {
    writeln!(
        log,
        "PLAY [{}] hosts={} host_group={}",
        play.playbook,
        play.hosts.join(","),
        play.host_group
    )?;
    writeln!(log, "extra vars: {}", play.extra_vars)?;
    writeln!(log, "dry run, nothing was executed")
}

/// Runs `ansible-playbook` (or a compatible binary) against an inline inventory.
#[derive(Clone, Debug)]
pub struct AnsibleProvisioner {
    program: String,
}

impl AnsibleProvisioner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn args(play: &Play) -> Vec<String> {
        // A trailing comma makes ansible read the host list as an inventory.
        let mut args = vec![
            "--inventory".to_string(),
            format!("{},", play.hosts.join(",")),
            "--user".to_string(),
            play.user.clone(),
            "--private-key".to_string(),
            play.private_key.clone(),
        ];
        if !play.host_group.is_empty() {
            args.push("--extra-vars".to_string());
            args.push(format!("host_group={}", play.host_group));
        }
        args.push("--extra-vars".to_string());
        args.push(play.extra_vars.clone());
        args.push(play.playbook.clone());
        args
    }
}

impl Default for AnsibleProvisioner {
    fn default() -> Self {
        Self::new("ansible-playbook")
    }
}

impl Provisioner for AnsibleProvisioner {
    fn run(&self, play: &Play, log: &mut dyn Write) -> Result<(), String> {
        let args = Self::args(play);
        info!(program = %self.program, playbook = %play.playbook, "running playbook");
        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| format!("failed to start {}: {err}", self.program))?;

        let stderr = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut collected = Vec::new();
                let _ = stderr.read_to_end(&mut collected);
                collected
            })
        });

        if let Some(mut stdout) = child.stdout.take() {
            if let Err(err) = copy_output(&mut stdout, log) {
                // reap the child so neither it nor the stderr reader outlives the job
                let _ = child.kill();
                let _ = child.wait();
                drop(stdout);
                if let Some(handle) = stderr {
                    let _ = handle.join();
                }
                return Err(format!("failed to copy output: {err}"));
            }
        }
        if let Some(collected) = stderr.and_then(|handle| handle.join().ok()) {
            log.write_all(&collected)
                .map_err(|err| format!("failed to write job log: {err}"))?;
        }

        let status = child
            .wait()
            .map_err(|err| format!("failed to wait for {}: {err}", self.program))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("{} exited with {status}", self.program))
        }
    }
}

fn copy_output(source: &mut impl Read, log: &mut dyn Write) -> io::Result<()> {
    let mut buf = [0u8; 4096];
    loop {
        let read = source.read(&mut buf)?;
        if read == 0 {
            return Ok(());
        }
        log.write_all(&buf[..read])?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn play() -> Play {
        Play {
            playbook: "/etc/clusterm/playbooks/site.yml".to_string(),
            hosts: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            host_group: "service-worker".to_string(),
            user: "cluster-admin".to_string(),
            private_key: "/etc/clusterm/id_rsa".to_string(),
            extra_vars: r#"{"env":"prod"}"#.to_string(),
        }
    }

    #[test]
    fn dry_run_logs_the_play() {
        let mut log = Vec::new();
        DryRunProvisioner
            .run(&play(), &mut log)
            .expect("dry run succeeds");
        let text = String::from_utf8(log).expect("log is utf-8");
        assert!(text.starts_with("PLAY [/etc/clusterm/playbooks/site.yml] hosts=10.0.0.1,10.0.0.2"));
        assert!(text.contains(r#"extra vars: {"env":"prod"}"#));
    }

    #[test]
    fn ansible_args_use_inline_inventory() {
        let args = AnsibleProvisioner::args(&play());
        assert_eq!(args[0], "--inventory");
        assert_eq!(args[1], "10.0.0.1,10.0.0.2,");
        assert!(args.contains(&"host_group=service-worker".to_string()));
        assert_eq!(args[args.len() - 2], r#"{"env":"prod"}"#);
        assert_eq!(
            args.last().map(String::as_str),
            Some("/etc/clusterm/playbooks/site.yml")
        );
    }

    struct ClosedLog;

    impl Write for ClosedLog {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "log closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unwritable_log_fails_the_run_after_reaping_the_child() {
        // echo prints its arguments, so there is always output to copy
        let provisioner = AnsibleProvisioner::new("echo");
        let err = provisioner
            .run(&play(), &mut ClosedLog)
            .expect_err("output cannot be logged");
        assert!(err.starts_with("failed to copy output"), "{err}");
    }

    #[test]
    fn missing_program_fails_the_run() {
        let provisioner = AnsibleProvisioner::new("clusterm-no-such-binary");
        let mut log = Vec::new();
        let err = provisioner
            .run(&play(), &mut log)
            .expect_err("binary does not exist");
        assert!(err.starts_with("failed to start clusterm-no-such-binary"), "{err}");
    }
}
