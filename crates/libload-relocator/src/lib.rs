//! Package relocation for JVM archives.
//!
//! Relocation rewrites every reference to a set of source packages inside a
//! jar so that the classes live under a different package. Two plugins in the
//! same process can then each carry their own copy of a library without the
//! shared class namespace mixing them up.
//!
//! The transform is pure: [`relocate`] takes the archive bytes and returns
//! new archive bytes. It never touches the filesystem or the network.
//!
//! ```no_run
//! use libload_relocator::{relocate, Relocation};
//!
//! # fn example(jar: &[u8]) -> Result<(), libload_relocator::RelocationError> {
//! let rules = vec![
//!     Relocation::new("com.google.gson", "org.example.plugin.libs.gson"),
//! ];
//! let relocated = relocate(jar, &rules)?;
//! # let _ = relocated;
//! # Ok(())
//! # }
//! ```

mod class_file;
mod error;
mod jar;
mod rule;

pub use class_file::ClassFileError;
pub use error::{RelocationError, Result};
pub use jar::relocate;
pub use rule::Relocation;
