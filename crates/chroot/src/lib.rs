//! Execute external commands on behalf of the installer, optionally within a
//! chroot of the target system.

#[macro_use]
extern crate cascade;
#[macro_use]
extern crate log;

extern crate sys_mount;

mod chroot;
mod command;

pub use self::chroot::*;
pub use self::command::*;
