#![allow(dead_code)]

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use medsrv_services::{ProbeCommand, ProbeOutput, ProbeRunner};

#[derive(Debug, Clone)]
pub enum Reply {
    Output(ProbeOutput),
    Fail(io::ErrorKind),
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Output(ProbeOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Reply::Output(ProbeOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }
}

/// Answers probe commands from a table keyed by a substring of the command line
#[derive(Default)]
pub struct ScriptedRunner {
    replies: Vec<(String, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, needle: &str, reply: Reply) -> Self {
        self.replies.push((needle.to_string(), reply));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProbeRunner for ScriptedRunner {
    async fn run(&self, command: &ProbeCommand) -> io::Result<ProbeOutput> {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());

        let reply = self
            .replies
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone());

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Fail(kind)) => Err(io::Error::new(kind, format!("scripted failure: {line}"))),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("unscripted: {line}"))),
        }
    }
}

/// A file standing in for a python interpreter
pub fn fake_python(dir: &Path) -> PathBuf {
    let path = dir.join("python3");
    std::fs::write(&path, "").unwrap();
    path
}

/// Executable shell script at `dir/name`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    std::fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
