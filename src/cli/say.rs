//! One-shot "say" command

use std::error::Error;
use std::io;

use crate::cli::render::TranscriptPrinter;
use crate::core::conversation::TurnOutcome;
use crate::core::driver::ConversationDriver;

pub async fn run_say(
    mut driver: ConversationDriver,
    prompt: &[String],
) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: spoilerfree say <prompt>");
        std::process::exit(1);
    }

    let mut printer = TranscriptPrinter::new(io::stdout());
    driver.submit(&prompt);

    let mut render_result: io::Result<()> = Ok(());
    driver
        .run_until_idle(|view| {
            if render_result.is_ok() {
                render_result = printer.render(view);
            }
        })
        .await;
    render_result?;

    if driver.conversation().last_outcome() == Some(TurnOutcome::ErrorRecovered) {
        std::process::exit(1);
    }
    Ok(())
}
