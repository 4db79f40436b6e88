//! Terminal front end
//!
//! A [`Host`](crate::host::Host) that prompts on the terminal, plus
//! colored rendering of execution results.

pub mod display;

pub use display::format_permission;
pub use display::parse_selection;
pub use display::render_result;
pub use display::TerminalHost;
