//! Supernova, the Zenith virtual machine runtime.
//!
//! Provides the instruction-set execution engine, the executable image
//! loader, and their supporting serialization and logging infrastructure.

pub mod types;
pub mod utils;
pub mod virtual_machine;
