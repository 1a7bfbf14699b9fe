//! Device model: chip families and their constant profiles.

pub mod chip;
pub mod profile;

pub use chip::{ChipFamily, Revision};
pub use profile::{AddressRange, BootloaderEnable, CcfgField, DeviceProfile, EraseStyle};
