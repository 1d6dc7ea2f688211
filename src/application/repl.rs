use std::io::Write as _;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};

use super::agent::Agent;

/// Interactive operator loop. Commands are matched case-insensitively in
/// both bare and slash-prefixed forms; anything else becomes a user turn.
/// Every registered tool is released before the loop returns.
pub async fn run(agent: &mut Agent) -> Result<(), std::io::Error> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        print!("\n> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "quit" | "exit" | "/exit" => {
                println!("Goodbye!");
                break;
            }
            "clear" | "/clear" => {
                agent.clear_history();
                println!("History cleared.");
                continue;
            }
            "/help" => {
                println!("Commands:");
                println!("  /help   - Show this help message");
                println!("  /clear  - Clear conversation history");
                println!("  /exit   - Exit the agent");
                println!();
                println!("Anything else is sent to the LLM as a prompt.");
                continue;
            }
            _ => {}
        }

        debug!("dispatching user turn");
        match agent.run(input).await {
            Ok(answer) => println!("\n[Answer]\n{answer}"),
            Err(err) => {
                error!(%err, "turn failed");
                println!("\n[Error] {err}");
            }
        }
    }

    agent.release_tools().await;
    Ok(())
}
