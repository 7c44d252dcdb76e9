//! Link configuration.

use serde::{Deserialize, Serialize};

/// Link settings.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct PhySettings {
    /// Largest chunk moved by one engine transfer, in bytes. Defaults to
    /// [`PhySettings::DEFAULT_MTU`], may not exceed [`PhySettings::MAX_MTU`].
    pub mtu: u16,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct PhySettingsOverrides {
    /// Largest chunk moved by one engine transfer, in bytes. Defaults to
    /// [`PhySettings::DEFAULT_MTU`].
    pub mtu: Option<u16>,
}

impl PhySettings {
    pub const DEFAULT_MTU: u16 = 255;
    /// The discard buffer used for dropped packets is sized to this.
    pub const MAX_MTU: u16 = 255;

    #[must_use]
    pub fn with_mtu(self, mtu: u16) -> Self {
        Self { mtu }
    }

    /// Returns `true` if these settings can be used to open a link.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        (1..=Self::MAX_MTU).contains(&self.mtu)
    }
}

impl Default for PhySettings {
    fn default() -> Self {
        Self {
            mtu: Self::DEFAULT_MTU,
        }
    }
}

impl PhySettingsOverrides {
    pub fn into_settings(self) -> PhySettings {
        PhySettings {
            mtu: self.mtu.unwrap_or(PhySettings::DEFAULT_MTU),
        }
    }
}
