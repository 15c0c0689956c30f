use std::{
    ffi::OsStr,
    io::{self, BufRead, BufReader, Error},
    process::{self, Child, ExitStatus, Stdio},
    sync::mpsc,
    thread,
};

/// A `process::Command` which logs what it runs, and routes its output to the log.
pub struct Command {
    cmd: process::Command,
}

impl Command {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Command { cmd: process::Command::new(program) }
    }

    pub fn arg<S: AsRef<OsStr>>(&mut self, arg: S) -> &mut Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<S: AsRef<OsStr>, I: IntoIterator<Item = S>>(&mut self, args: I) -> &mut Self {
        self.cmd.args(args);
        self
    }

    pub fn env<K: AsRef<OsStr>, V: AsRef<OsStr>>(&mut self, key: K, value: V) -> &mut Self {
        self.cmd.env(key, value);
        self
    }

    /// Ensure that the variable is not inherited by the child.
    pub fn env_remove<K: AsRef<OsStr>>(&mut self, key: K) -> &mut Self {
        self.cmd.env_remove(key);
        self
    }

    fn spawn(&mut self, cmd: &str) -> io::Result<Child> {
        info!("running {}", cmd);
        self.cmd
            .spawn()
            .map_err(|why| Error::new(why.kind(), format!("failed to spawn {}: {}", cmd, why)))
    }

    /// Run the program to completion, returning its exit status without checking it.
    pub fn status(&mut self) -> io::Result<ExitStatus> {
        let cmd = format!("{:?}", self.cmd);
        self.spawn(&cmd)?.wait()
    }

    /// Run the program and check the status.
    pub fn run(&mut self) -> io::Result<()> {
        self.run_with_callbacks(|info| info!("{}", info), |error| warn!("{}", error))
    }

    /// Run the program and check the status, handing each line of output to a callback.
    pub fn run_with_callbacks<I, E>(&mut self, mut info: I, error: E) -> io::Result<()>
    where
        I: FnMut(&str),
        E: FnMut(&str),
    {
        self.run_until(
            |line| {
                info(line);
                true
            },
            error,
        )
        .map(|_| ())
    }

    /// As `run_with_callbacks`, except that the program is killed as soon as
    /// `info` returns `false`. Returns `Ok(false)` if it was killed, in which
    /// case the exit status is not checked.
    pub fn run_until<I, E>(&mut self, mut info: I, mut error: E) -> io::Result<bool>
    where
        I: FnMut(&str) -> bool,
        E: FnMut(&str),
    {
        let cmd = format!("{:?}", self.cmd);
        self.cmd.stdout(Stdio::piped());
        self.cmd.stderr(Stdio::piped());

        let mut child = self.spawn(&cmd)?;

        enum Line {
            Out(String),
            Err(String),
        }

        let (tx, rx) = mpsc::channel();

        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines().filter_map(Result::ok) {
                    let _ = tx.send(Line::Out(line));
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().filter_map(Result::ok) {
                    let _ = tx.send(Line::Err(line));
                }
            });
        } else {
            drop(tx);
        }

        for line in rx {
            match line {
                Line::Out(line) => {
                    if !info(&line) {
                        info!("killing {}", cmd);
                        // The readers exit once the pipes are closed.
                        let _ = child.kill();
                        child.wait()?;
                        return Ok(false);
                    }
                }
                Line::Err(line) => error(&line),
            }
        }

        child.wait().and_then(|status| status_as_result(status, &cmd)).map(|_| true)
    }
}

/// Convert a non-zero exit status into an error naming the command.
pub fn status_as_result(status: ExitStatus, cmd: &str) -> io::Result<()> {
    if status.success() {
        Ok(())
    } else if let Some(127) = status.code() {
        Err(io::Error::new(io::ErrorKind::NotFound, format!("command {} was not found", cmd)))
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("command {} failed with exit status: {}", cmd, status),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output_of(command: &mut Command) -> Vec<String> {
        let mut lines = Vec::new();
        command.run_with_callbacks(|l| lines.push(l.to_owned()), |_| ()).unwrap();
        lines
    }

    #[test]
    fn command_not_found() {
        assert!(Command::new("asdfasdf").run().unwrap_err().kind() == io::ErrorKind::NotFound);
    }

    #[test]
    fn failure_names_the_command() {
        let err = Command::new("sh").args(&["-c", "exit 2"]).run().unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(err.to_string().contains("\"sh\""));
    }

    #[test]
    fn environment_overrides() {
        std::env::set_var("UBIQUITY_CHROOT_TEST_REMOVED", "1");
        let output = output_of(
            Command::new("sh")
                .args(&["-c", "echo ${UBIQUITY_CHROOT_TEST_SET}:${UBIQUITY_CHROOT_TEST_REMOVED}"])
                .env("UBIQUITY_CHROOT_TEST_SET", "set")
                .env_remove("UBIQUITY_CHROOT_TEST_REMOVED"),
        );
        assert_eq!(output, vec!["set:".to_owned()]);
    }

    #[test]
    fn callbacks_receive_each_line() {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        Command::new("sh")
            .args(&["-c", "echo one; echo two; echo three >&2"])
            .run_with_callbacks(|l| stdout.push(l.to_owned()), |l| stderr.push(l.to_owned()))
            .unwrap();
        assert_eq!(stdout, vec!["one".to_owned(), "two".to_owned()]);
        assert_eq!(stderr, vec!["three".to_owned()]);
    }

    #[test]
    fn run_until_kills_the_program() {
        let mut seen = Vec::new();
        let finished = Command::new("sh")
            .args(&["-c", "echo first; echo second; exec sleep 30"])
            .run_until(
                |l| {
                    seen.push(l.to_owned());
                    l != "second"
                },
                |_| (),
            )
            .unwrap();
        assert!(!finished);
        assert_eq!(seen, vec!["first".to_owned(), "second".to_owned()]);

        let finished = Command::new("sh").args(&["-c", "echo done"]).run_until(|_| true, |_| ());
        assert!(finished.unwrap());
    }

    #[test]
    fn status_is_not_checked() {
        let status = Command::new("sh").args(&["-c", "exit 3"]).status().unwrap();
        assert_eq!(status.code(), Some(3));
    }
}
