//! Interactive REPL.

use crate::commands::{self, parse_invocation};
use callwire_client::Client;
use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use std::time::Duration;

const HELP_TEXT: &str = r#"
Enter calls as method(arg, ...) with JSON literal arguments, e.g.
  help()                        List commands available on the server
  add(1, 2)
  import("clock")               Load a server-side plugin

  exit, quit                    Leave the REPL
"#;

pub async fn run(mut client: Client, retry_delay: Duration) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "callwire CLI".bold().cyan());
    println!("Connecting to {}...", client.config().target());

    // Poll until the server is reachable
    client.connect_with_retry(retry_delay, None).await?;
    println!("{}", "Connected!".green());

    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(true)
        .build();
    let mut rl: Editor<(), DefaultHistory> = Editor::with_config(config)?;

    let history_path = std::env::var("HOME")
        .map(|h| std::path::PathBuf::from(h).join(".callwire_history"))
        .unwrap_or_else(|_| ".callwire_history".into());
    let _ = rl.load_history(&history_path);

    println!("Type '?' for usage, 'help()' for server commands.\n");

    loop {
        let prompt = format!("{} ", ">".cyan());
        match rl.readline(&prompt) {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match line {
                    "exit" | "quit" => break,
                    "?" => {
                        println!("{}", HELP_TEXT);
                        continue;
                    }
                    _ => {}
                }

                let invocation = match parse_invocation(line) {
                    Ok(invocation) => invocation,
                    Err(e) => {
                        tracing::debug!("Rejected input {:?}: {}", line, e);
                        println!("{}: {}\n", "Invalid syntax".red(), e);
                        continue;
                    }
                };

                if !client.is_connected() {
                    tracing::info!("Connection lost, reconnecting to {}", client.config().target());
                    println!("{}", "Reconnecting...".dimmed());
                    client.connect_with_retry(retry_delay, None).await?;
                }

                match commands::execute(&mut client, invocation).await {
                    Ok(output) => println!("{}\n", output),
                    Err(e) => println!("{}: {}\n", "Error".red(), e),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                tracing::error!("Readline failed: {:?}", err);
                println!("{}: {:?}", "Error".red(), err);
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);

    client.disconnect().await;
    println!("{}", "Disconnected.".dimmed());

    Ok(())
}
