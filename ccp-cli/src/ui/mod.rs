//! Terminal UI helpers: prompts and progress bars.

mod confirm;
mod progress;

pub use confirm::{choose_shutdown, ConsoleConfirmation, ShutdownChoice};
pub use progress::{join_bar, TransferBars};
