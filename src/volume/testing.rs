//! Fake host shared by volume and manager tests

use crate::deadline::Deadline;
use crate::error::Result;
use crate::volume::command::{CommandOutput, CommandRunner, Invocation};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub(crate) struct FakeState {
    pub formatted: bool,
    pub open: bool,
    pub has_fs: bool,
    pub mounted: bool,
    pub calls: Vec<String>,
    pub key_files: Vec<PathBuf>,
    pub fail_format: bool,
    pub fail_mount: bool,
}

/// In-memory host with cryptsetup/mount semantics
pub(crate) struct FakeHost {
    tools: bool,
    pub state: Mutex<FakeState>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeHost {
            tools: true,
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn without_tools() -> Arc<Self> {
        Arc::new(FakeHost {
            tools: false,
            state: Mutex::new(FakeState::default()),
        })
    }

    /// Number of recorded invocations starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.calls.iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    fn fail(code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    fn key_file_arg(args: &[String], state: &mut FakeState) {
        let pos = args.iter().position(|a| a == "--key-file").unwrap();
        let path = PathBuf::from(&args[pos + 1]);
        assert!(path.exists(), "key file must exist during the call");
        state.key_files.push(path);
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, invocation: &Invocation, _deadline: &Deadline) -> Result<CommandOutput> {
        let args = invocation.args_lossy();
        let mut state = self.state.lock().unwrap();
        state.calls.push(invocation.to_string());

        let out = match (invocation.program(), args.first().map(String::as_str)) {
            ("truncate", _) => {
                let size: u64 = args[1].parse().unwrap();
                let file = std::fs::File::create(&args[2]).unwrap();
                file.set_len(size).unwrap();
                Self::ok("")
            }
            ("cryptsetup", Some("luksFormat")) => {
                Self::key_file_arg(&args, &mut state);
                if state.fail_format {
                    Self::fail(1, "Cannot format device")
                } else {
                    state.formatted = true;
                    Self::ok("")
                }
            }
            ("cryptsetup", Some("status")) => {
                if state.open {
                    Self::ok("is active")
                } else {
                    Self::fail(4, "is inactive")
                }
            }
            ("cryptsetup", Some("open")) => {
                Self::key_file_arg(&args, &mut state);
                assert!(state.formatted);
                state.open = true;
                Self::ok("")
            }
            ("cryptsetup", Some("close")) => {
                if state.open {
                    state.open = false;
                    Self::ok("")
                } else {
                    Self::fail(4, "Device not active")
                }
            }
            ("blkid", _) => {
                if state.has_fs {
                    Self::ok("ext4\n")
                } else {
                    Self::fail(2, "")
                }
            }
            ("mkfs.ext4", _) => {
                state.has_fs = true;
                Self::ok("")
            }
            ("mountpoint", _) => {
                if state.mounted {
                    Self::ok("")
                } else {
                    Self::fail(1, "")
                }
            }
            ("mount", _) => {
                if state.fail_mount {
                    Self::fail(32, "mount: wrong fs type")
                } else {
                    state.mounted = true;
                    Self::ok("")
                }
            }
            ("umount", _) => {
                state.mounted = false;
                Self::ok("")
            }
            ("df", _) => Self::ok("     Used\n  1048576\n"),
            _ => Self::fail(127, "command not found"),
        };
        Ok(out)
    }

    fn has_program(&self, _program: &str) -> bool {
        self.tools
    }

    fn device_mapper_accessible(&self) -> bool {
        self.tools
    }
}
