//! Client-facing TCP protocol.
//!
//! - `command` - Command vocabulary and reply table
//! - `package` - Header, status, and package body types
//! - `codec` - Length-prefixed package framing

pub mod codec;
pub mod command;
pub mod package;

pub use codec::{CodecError, PackageDecoder, PackageEncoder};
pub use command::{reply_command_for, Command};
pub use package::{Header, OpStatus, Package, PackageBody, UserAgent, WireMessage};
