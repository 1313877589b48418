//! Interactive prompts.

use ccp::client::{Confirmation, DownloadOffer};
use ccp::config::format_size;
use ccp::server::ConnectionSummary;
use console::style;
use dialoguer::{Confirm, Select};
use tracing::warn;

/// Asks on the terminal before a download starts.
pub struct ConsoleConfirmation;

impl Confirmation for ConsoleConfirmation {
    fn confirm(&self, offer: &DownloadOffer) -> bool {
        println!();
        println!("File:        {}", style(&offer.remote_path).bold());
        println!(
            "Size:        {} ({} bytes)",
            format_size(offer.total_size),
            offer.total_size
        );
        println!("Streams:     {}", offer.streams);
        println!(
            "Compressed:  {}",
            if offer.compressed { "yes" } else { "no" }
        );
        println!();

        match Confirm::new()
            .with_prompt("Start download?")
            .default(true)
            .interact()
        {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Confirmation prompt failed, declining");
                false
            }
        }
    }
}

/// What to do with active connections when asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownChoice {
    WaitForTransfers,
    AbortTransfers,
    KeepServing,
}

/// Ask how to stop while connections are active.
pub fn choose_shutdown(active: &[ConnectionSummary]) -> Result<ShutdownChoice, dialoguer::Error> {
    println!();
    println!(
        "{} active connection(s):",
        style(active.len()).yellow().bold()
    );
    for conn in active {
        println!(
            "  #{:<4} {:<22} {:<30} {} stream(s), {}s",
            conn.id,
            conn.peer,
            conn.path.as_deref().unwrap_or("(awaiting request)"),
            conn.ports.len(),
            conn.age.as_secs()
        );
    }

    let choices = [
        "Wait for transfers to finish",
        "Abort transfers now",
        "Keep serving",
    ];
    let picked = Select::new()
        .with_prompt("Shut down?")
        .items(&choices[..])
        .default(0)
        .interact()?;

    Ok(match picked {
        0 => ShutdownChoice::WaitForTransfers,
        1 => ShutdownChoice::AbortTransfers,
        _ => ShutdownChoice::KeepServing,
    })
}
