//! Provisioning state machine
//!
//! `ProvisionContext` owns the current stage of a run and only allows strictly
//! forward, one-step transitions. There is no failure state: a phase that
//! reports problems still advances, and the problems are recorded separately.
//!
//! # Stage Flow
//!
//! ```text
//! Init
//!   ↓
//! PermissionsSet
//!   ↓
//! IndexRefreshed
//!   ↓
//! Upgraded
//!   ↓
//! DependenciesInstalled
//!   ↓
//! CleanedUp
//!   ↓
//! Reported
//!   ↓
//! Done
//! ```

use std::fmt;
use thiserror::Error;

/// Provisioning stages in sequential order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ProvisionStage {
    /// Session resolved and log opened
    Init = 0,
    /// Application and firmware files marked executable
    PermissionsSet = 1,
    /// Initial inventory captured and package index refreshed
    IndexRefreshed = 2,
    /// Installed packages upgraded
    Upgraded = 3,
    /// Named dependencies installed
    DependenciesInstalled = 4,
    /// Unneeded packages removed and cache cleared
    CleanedUp = 5,
    /// Final inventory and summary written to the log
    Reported = 6,
    /// Run finished (terminal)
    Done = 7,
}

impl ProvisionStage {
    #[inline]
    pub const fn order(self) -> u8 {
        self as u8
    }

    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::PermissionsSet),
            Self::PermissionsSet => Some(Self::IndexRefreshed),
            Self::IndexRefreshed => Some(Self::Upgraded),
            Self::Upgraded => Some(Self::DependenciesInstalled),
            Self::DependenciesInstalled => Some(Self::CleanedUp),
            Self::CleanedUp => Some(Self::Reported),
            Self::Reported => Some(Self::Done),
            Self::Done => None,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Init => "Initialising",
            Self::PermissionsSet => "Making source codes and scripts executable",
            Self::IndexRefreshed => "Updating the operating system",
            Self::Upgraded => "Upgrading installed packages",
            Self::DependenciesInstalled => "Installing dependencies",
            Self::CleanedUp => "Cleaning up",
            Self::Reported => "Recording final package inventory",
            Self::Done => "Setup complete",
        }
    }

    pub const fn all_stages() -> &'static [Self] {
        &[
            Self::Init,
            Self::PermissionsSet,
            Self::IndexRefreshed,
            Self::Upgraded,
            Self::DependenciesInstalled,
            Self::CleanedUp,
            Self::Reported,
            Self::Done,
        ]
    }
}

impl fmt::Display for ProvisionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors that can occur during stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot skip from {from} to {to}")]
    SkippedStage {
        from: ProvisionStage,
        to: ProvisionStage,
    },

    #[error("Cannot go backwards from {from} to {to}")]
    BackwardTransition {
        from: ProvisionStage,
        to: ProvisionStage,
    },

    #[error("Already at stage {stage}")]
    AlreadyAtStage { stage: ProvisionStage },

    #[error("Provisioning run is already finished")]
    AfterDone,
}

/// Owns the current stage of a run.
///
/// ```
/// use pilomar_setup::provision_state::{ProvisionContext, ProvisionStage};
///
/// let mut ctx = ProvisionContext::new();
/// ctx.transition_to(ProvisionStage::PermissionsSet).unwrap();
/// assert_eq!(ctx.current_stage(), ProvisionStage::PermissionsSet);
/// assert!(ctx.transition_to(ProvisionStage::Done).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct ProvisionContext {
    current: ProvisionStage,
}

impl Default for ProvisionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisionContext {
    pub fn new() -> Self {
        Self {
            current: ProvisionStage::Init,
        }
    }

    #[inline]
    pub fn current_stage(&self) -> ProvisionStage {
        self.current
    }

    #[inline]
    pub fn is_done(&self) -> bool {
        self.current.is_terminal()
    }

    /// Transition to `target`, which must be exactly the next stage.
    pub fn transition_to(
        &mut self,
        target: ProvisionStage,
    ) -> Result<ProvisionStage, StageTransitionError> {
        if self.current.is_terminal() {
            return Err(StageTransitionError::AfterDone);
        }
        if target == self.current {
            return Err(StageTransitionError::AlreadyAtStage { stage: target });
        }
        if target < self.current {
            return Err(StageTransitionError::BackwardTransition {
                from: self.current,
                to: target,
            });
        }
        if self.current.next() != Some(target) {
            return Err(StageTransitionError::SkippedStage {
                from: self.current,
                to: target,
            });
        }

        tracing::debug!("Stage {:?} -> {:?}", self.current, target);
        self.current = target;
        Ok(target)
    }
}
