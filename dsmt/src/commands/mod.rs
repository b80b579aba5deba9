//! Command implementations for the dsmt CLI, one file per subcommand.

pub mod init;
pub mod scenarios;
pub mod simulate;

pub use init::{run_init, InitArgs};
pub use scenarios::{run_scenarios, Scenario};
pub use simulate::{run_simulate, SimulateArgs};
