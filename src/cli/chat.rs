//! Interactive line-based chat

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::render::TranscriptPrinter;
use crate::core::driver::ConversationDriver;

#[derive(Debug, PartialEq, Eq)]
pub enum ChatInput<'a> {
    Quit,
    Reset,
    Message(&'a str),
    Blank,
}

pub fn parse_input(line: &str) -> ChatInput<'_> {
    let trimmed = line.trim();
    match trimmed {
        "" => ChatInput::Blank,
        "/quit" | "/exit" => ChatInput::Quit,
        "/reset" => ChatInput::Reset,
        text => ChatInput::Message(text),
    }
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "you> ")?;
    stdout.flush()
}

pub async fn run_chat(mut driver: ConversationDriver) -> Result<(), Box<dyn Error>> {
    let danger = driver.conversation().settings().danger_mode;
    println!("spoilerfree {}", env!("CARGO_PKG_VERSION"));
    if danger {
        println!("Spoiler protection is OFF.");
    }
    println!("Type /reset to start over, /quit to leave.");

    let mut printer = TranscriptPrinter::new(io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_input(&line) {
            ChatInput::Quit => break,
            ChatInput::Blank => continue,
            ChatInput::Reset => {
                driver.reset();
                printer.reset();
                println!("(new conversation)");
            }
            ChatInput::Message(text) => {
                if !driver.submit(text) {
                    continue;
                }
                let mut render_result: io::Result<()> = Ok(());
                driver
                    .run_until_idle(|view| {
                        if render_result.is_ok() {
                            render_result = printer.render(view);
                        }
                    })
                    .await;
                render_result?;
            }
        }
    }

    Ok(())
}
