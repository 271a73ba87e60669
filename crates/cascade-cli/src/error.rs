/// Process exit codes following POSIX conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Success (0). Also used after an interrupt-triggered teardown.
    Success = 0,

    /// Any error path: lock contention, transport failure, remote fail (1)
    Error = 1,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
