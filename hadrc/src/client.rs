/// A remote command: program name plus arguments, rendered to a single
/// shell line when handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    cmd: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(cmd: impl Into<String>) -> Self {
        Command {
            cmd: cmd.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn get_cmd(&self) -> &str {
        &self.cmd
    }

    pub fn get_args(&self) -> &Vec<String> {
        &self.args
    }

    pub fn render(&self) -> String {
        if self.args.is_empty() {
            return self.cmd.clone();
        }
        let mut line = self.cmd.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

impl From<&Command> for Vec<u8> {
    fn from(cmd: &Command) -> Self {
        cmd.render().into_bytes()
    }
}

/// Captured result of one remote command execution.
#[derive(Debug, Default, Clone)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub status_code: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_joins_args() {
        let cmd = Command::new("tar").arg("-zxf").arg("/opt/software/pkg.tar.gz");
        assert_eq!(cmd.render(), "tar -zxf /opt/software/pkg.tar.gz");
        let bytes: Vec<u8> = (&cmd).into();
        assert_eq!(bytes, b"tar -zxf /opt/software/pkg.tar.gz".to_vec());
    }

    #[test]
    fn success_only_on_zero_exit() {
        let mut output = CommandOutput {
            stdout: b"ok\n".to_vec(),
            stderr: Vec::new(),
            status_code: Some(0),
        };
        assert!(output.success());

        output.status_code = Some(1);
        assert!(!output.success());

        output.status_code = None;
        assert!(!output.success());
    }
}
