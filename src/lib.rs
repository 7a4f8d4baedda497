//! Pilomar setup library
//!
//! Provisions a Raspberry Pi for the Pilomar telescope: marks the application
//! and firmware files executable, brings the operating system up to date,
//! installs the Python dependencies through apt and records an inventory of
//! installed software before and after in an append-only session log.

pub mod cli;
pub mod command_args;
pub mod command_runner;
pub mod config;
pub mod console;
pub mod error;
pub mod inventory;
pub mod logger;
pub mod orchestrator;
pub mod package_manager;
pub mod permissions;
pub mod process_guard;
pub mod provision_state;
pub mod sanity;
pub mod session;

// Re-export main types for convenience
pub use command_args::{CommandArgs, Invocation, Privilege};
pub use command_runner::{CommandOutput, CommandRunner, SystemRunner};
pub use config::{ColorMode, PackageRequirement, PermissionTarget, SetupConfig, SudoMode};
pub use console::Console;
pub use error::{OperationStatus, ProvisionError};
pub use inventory::{InventoryKind, InventorySnapshot, InventorySnapshotter};
pub use logger::SessionLog;
pub use orchestrator::{Failure, Orchestrator, RunSummary};
pub use package_manager::{PackageManager, PackageOperation};
pub use permissions::PermissionSetter;
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use provision_state::{ProvisionContext, ProvisionStage, StageTransitionError};
pub use session::ProvisioningSession;
