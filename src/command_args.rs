//! Type-safe external command contracts.
//!
//! Every external program the tool runs is described by a type implementing
//! [`CommandArgs`]. The type is the single source of truth for the program
//! name, its argument vector and the environment it needs; the runner turns
//! it into an [`Invocation`] and decides how to execute it.

use crate::config::SudoMode;

/// Fail rather than prompt when a password would be required
pub const SUDO_NON_INTERACTIVE: &str = "-n";

/// Trait for typed external command descriptions.
///
/// # Contract
///
/// - `program()` is the bare program name, resolved through `PATH`.
/// - `to_cli_args()` returns the arguments exactly as the program expects them.
/// - `mutates_system()` is true for anything a dry run must skip.
/// - `needs_privilege()` is true for commands that must run as root.
pub trait CommandArgs {
    /// Program to execute (e.g. `apt-get`)
    fn program(&self) -> &str;

    /// Arguments, in order
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables the program needs
    fn get_env_vars(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Whether running this changes the system
    fn mutates_system(&self) -> bool;

    /// Whether this must run as root
    fn needs_privilege(&self) -> bool {
        false
    }

    /// Whether stdout should be streamed to the console while it runs
    fn echo_output(&self) -> bool {
        false
    }
}

/// How privileged commands are launched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// Already root, or escalation disabled
    Direct,
    /// Prefix with `sudo`
    Sudo,
}

impl Privilege {
    /// Decide escalation from configuration and the effective user
    pub fn resolve(mode: SudoMode, is_root: bool) -> Self {
        match mode {
            SudoMode::Always => Self::Sudo,
            SudoMode::Never => Self::Direct,
            SudoMode::Auto if is_root => Self::Direct,
            SudoMode::Auto => Self::Sudo,
        }
    }
}

/// A fully resolved command line, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub mutating: bool,
    pub echo: bool,
}

impl Invocation {
    /// Build an invocation from typed args.
    ///
    /// Privileged commands under `Privilege::Sudo` become
    /// `sudo -n VAR=value ... program args...`, since sudo resets the environment
    /// of the command it runs. Children have no terminal to prompt on, so sudo
    /// must fail instead of asking for a password.
    pub fn from_args<A: CommandArgs + ?Sized>(args: &A, privilege: Privilege) -> Self {
        let env = args.get_env_vars();

        if args.needs_privilege() && privilege == Privilege::Sudo {
            let mut sudo_args = vec![SUDO_NON_INTERACTIVE.to_string()];
            sudo_args.extend(env.iter().map(|(key, value)| format!("{}={}", key, value)));
            sudo_args.push(args.program().to_string());
            sudo_args.extend(args.to_cli_args());

            Self {
                program: "sudo".to_string(),
                args: sudo_args,
                env: Vec::new(),
                mutating: args.mutates_system(),
                echo: args.echo_output(),
            }
        } else {
            Self {
                program: args.program().to_string(),
                args: args.to_cli_args(),
                env,
                mutating: args.mutates_system(),
                echo: args.echo_output(),
            }
        }
    }

    /// Human-readable command line for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
