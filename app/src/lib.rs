pub mod shell;

pub use shell::{parse_command, Shell, ShellCommand};
