use std::{
    os::unix::process::ExitStatusExt,
    process::{Command, ExitStatus, Output},
};

use anyhow::{anyhow, bail, Context, Error};
use log::trace;

use crate::crate_private::Sealed;

/// Extension for `std::process::Output` to easily check status, produce anyhow errors, and get
/// output. This is a sealed trait, so it cannot be implemented outside of this crate.
pub trait OutputChecker: Sealed {
    fn is_success(&self) -> bool;
    fn exit_code(&self) -> Option<i32>;
    fn end_signal(&self) -> Option<i32>;

    fn process_type(&self) -> &'static str {
        "process"
    }

    fn output(&self) -> String {
        "".into()
    }

    fn error_output(&self) -> String {
        "".into()
    }

    fn output_report(&self) -> String {
        let stdout = self.output();
        let stderr = self.error_output();

        let mut res = String::with_capacity(stdout.len() + stderr.len() + 20);

        if !stdout.is_empty() {
            res += &format!("stdout:\n{}\n", stdout);
        }

        if !stderr.is_empty() {
            if !res.is_empty() {
                res += "\n";
            }
            res += &format!("stderr:\n{}\n", stderr);
        }

        res
    }

    fn check(&self) -> Result<(), Error> {
        if self.is_success() {
            return Ok(());
        }

        Err(match self.output_report() {
            s if !s.is_empty() => anyhow!("Process output:\n{}", s).context(self.explain_exit()),
            _ => anyhow!("(No output was captured)").context(self.explain_exit()),
        })
    }

    fn check_output(&self) -> Result<String, Error> {
        self.check()?;
        Ok(self.output())
    }

    fn explain_exit(&self) -> String {
        if let Some(code) = self.exit_code() {
            format!("{} exited with status: {code}", self.process_type())
        } else if let Some(signal) = self.end_signal() {
            format!("{} was terminated by signal: {signal}", self.process_type())
        } else {
            format!("{} exited with unknown status", self.process_type())
        }
    }
}

impl Sealed for Output {}

impl OutputChecker for Output {
    fn is_success(&self) -> bool {
        self.status.success()
    }

    fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    fn end_signal(&self) -> Option<i32> {
        self.status.end_signal()
    }

    fn error_output(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into()
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into()
    }
}

impl Sealed for ExitStatus {}

impl OutputChecker for ExitStatus {
    fn is_success(&self) -> bool {
        self.success()
    }

    fn exit_code(&self) -> Option<i32> {
        self.code()
    }

    fn end_signal(&self) -> Option<i32> {
        self.signal()
    }
}

impl Sealed for Result<Output, std::io::Error> {}

impl OutputChecker for Result<Output, std::io::Error> {
    fn is_success(&self) -> bool {
        self.as_ref()
            .map(|output| output.is_success())
            .unwrap_or(false)
    }

    fn exit_code(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.exit_code())
    }

    fn end_signal(&self) -> Option<i32> {
        self.as_ref().ok().and_then(|output| output.end_signal())
    }

    fn error_output(&self) -> String {
        self.as_ref()
            .map(|output| output.error_output())
            .unwrap_or("".into())
    }

    fn output(&self) -> String {
        self.as_ref()
            .map(|output| output.output())
            .unwrap_or("".into())
    }

    fn check(&self) -> Result<(), Error> {
        match self {
            Ok(output) => output.check(),
            Err(e) => bail!("Failed to execute {}: {}", self.process_type(), e),
        }
    }

    fn check_output(&self) -> Result<String, Error> {
        match self {
            Ok(output) => output.check_output(),
            Err(e) => bail!("Failed to execute {}: {}", self.process_type(), e),
        }
    }

    fn explain_exit(&self) -> String {
        match self {
            Ok(output) => output.explain_exit(),
            Err(e) => format!("Failed to execute {}: {}", self.process_type(), e),
        }
    }
}

/// Extension for `std::process::Command` to run, check the exit status, and report on failure in
/// one call, logging the rendered command line at trace level either way.
pub trait RunAndCheck: Sealed {
    fn run_and_check(&mut self) -> Result<(), Error>;
    fn output_and_check(&mut self) -> Result<String, Error>;
    fn raw_output_and_check(&mut self) -> Result<Output, Error>;
    fn render_command(&self) -> String;
}

impl Sealed for Command {}

impl RunAndCheck for Command {
    fn run_and_check(&mut self) -> Result<(), Error> {
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let result = self.output();
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            result.explain_exit(),
            result.output_report(),
        );
        result
            .check()
            .with_context(|| format!("Error when running: {}", self.render_command()))
    }

    fn output_and_check(&mut self) -> Result<String, Error> {
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let result = self.output();
        trace!(
            "Executed '{rendered_command}': {}. Report:\n{}",
            result.explain_exit(),
            result.output_report(),
        );
        result
            .check_output()
            .with_context(|| format!("Error when running: {}", self.render_command()))
    }

    fn raw_output_and_check(&mut self) -> Result<Output, Error> {
        let rendered_command = self.render_command();
        trace!("Executing '{rendered_command}'");
        let result = self.output().with_context(|| {
            format!("Failed to execute: {}", self.render_command())
        })?;
        result
            .check()
            .with_context(|| format!("Error when running: {}", self.render_command()))?;
        Ok(result)
    }

    fn render_command(&self) -> String {
        let mut rendered = self.get_program().to_string_lossy().to_string();
        for arg in self.get_args() {
            rendered.push(' ');
            rendered.push_str(&arg.to_string_lossy());
        }
        rendered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_and_check_success() {
        let mut cmd = Command::new("true");
        cmd.run_and_check().unwrap();
    }

    #[test]
    fn test_run_and_check_failure() {
        let mut cmd = Command::new("false");
        let err = cmd.run_and_check().unwrap_err();
        assert!(err.to_string().contains("Error when running"));
    }

    #[test]
    fn test_output_and_check() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = cmd.output_and_check().unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn test_render_command() {
        let mut cmd = Command::new("echo");
        cmd.arg("a").arg("b");
        assert_eq!(cmd.render_command(), "echo a b");
    }
}
