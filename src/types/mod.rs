//! Core types for simulator state representation.
//!
//! - [`Endpoint`] is the network location learned from the discovery beacon
//! - [`ConnectionState`] is the ordered lifecycle enum every component gates on
//! - [`Value`] / [`ValueKind`] model dataref values and their wire encoding
//! - [`DatarefPath`] parses `base[index]` consumer paths
//! - [`Instruction`] is the tagged union of simulator-bound actions

mod endpoint;
mod instruction;
mod path;
mod state;
mod value;

pub use endpoint::{BeaconRole, Endpoint};
pub use instruction::Instruction;
pub use path::{DatarefPath, element_name};
pub use state::ConnectionState;
pub use value::{Value, ValueKind, decode_data_string, round_display};
