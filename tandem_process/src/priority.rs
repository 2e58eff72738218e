//! OS scheduling hints for worker processes.

use crate::error::ProcessError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority class of a worker, mapped to a nice level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// nice 10
    Low,
    /// nice 0
    #[default]
    Normal,
    /// nice -10
    High,
    /// nice -20
    Highest,
}

impl Priority {
    /// Nice level of the class.
    pub const fn niceness(self) -> i32 {
        match self {
            Self::Low => 10,
            Self::Normal => 0,
            Self::High => -10,
            Self::Highest => -20,
        }
    }

    /// Set the nice level of the calling process.
    ///
    /// Raising priority (negative nice) usually needs `CAP_SYS_NICE`.
    pub fn apply(self) -> Result<(), ProcessError> {
        let nice = self.niceness();
        // SAFETY: setpriority only reads its scalar arguments; `who = 0`
        // addresses the calling process.
        let ret = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, nice) };
        if ret != 0 {
            return Err(ProcessError::Priority {
                nice,
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Stable lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Highest => "highest",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ProcessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "highest" => Ok(Self::Highest),
            _ => Err(ProcessError::UnknownPriority(s.to_owned())),
        }
    }
}
