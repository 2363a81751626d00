use anyhow::Result;
use mmlive_realtime::{LiveEvent, LiveSession};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::io::Write;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

const PROMPT: &str = "You -> ";

/// Console commands besides plain text.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Text(&'a str),
    State,
    Quit,
    Empty,
}

pub fn parse_input(line: &str) -> Input<'_> {
    match line.trim() {
        "" => Input::Empty,
        "/quit" | "/exit" => Input::Quit,
        "/state" => Input::State,
        text => Input::Text(text),
    }
}

/// Run the interactive loop until `/quit`, Ctrl+C or EOF.
pub async fn run_console(session: LiveSession) -> Result<()> {
    let printer = tokio::spawn(print_events(session.subscribe()));

    println!("mmlive console");
    println!("Type a message and press Enter. /state shows the connection, /quit exits.\n");

    // rustyline blocks, so it gets its own thread and feeds lines back over a channel.
    let (line_tx, mut lines) = mpsc::channel::<String>(16);
    let reader = tokio::task::spawn_blocking(move || read_lines(line_tx));

    while let Some(line) = lines.recv().await {
        match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::State => println!("[{}]", session.state()),
            Input::Text(text) => {
                if let Err(e) = session.send_text(text, true).await {
                    eprintln!("Send failed: {}", e);
                }
            }
        }
    }

    session.disconnect().await?;
    printer.abort();
    reader.await?
}

fn read_lines(lines: mpsc::Sender<String>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    rl.add_history_entry(line.as_str())?;
                }
                let quit = parse_input(&line) == Input::Quit;
                if lines.blocking_send(line).is_err() || quit {
                    return Ok(());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Interrupted");
                return Ok(());
            }
            Err(ReadlineError::Eof) => return Ok(()),
            Err(err) => return Err(err.into()),
        }
    }
}

async fn print_events(mut events: broadcast::Receiver<LiveEvent>) {
    let mut stdout = std::io::stdout();
    loop {
        match events.recv().await {
            Ok(LiveEvent::Log(log)) => tracing::debug!(kind = %log.kind, "{}", log.message),
            Ok(event) => {
                if let Some(text) = describe(&event) {
                    print!("{text}");
                    let _ = stdout.flush();
                }
            }
            Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Console fell behind session events"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Console rendering of a session event.
pub fn describe(event: &LiveEvent) -> Option<String> {
    match event {
        LiveEvent::Content(content) => {
            let text: String = content.parts.iter().filter_map(|p| p.text.as_deref()).collect();
            (!text.is_empty()).then_some(text)
        }
        LiveEvent::TurnComplete => Some("\n".to_string()),
        LiveEvent::Interrupted => Some("\n[interrupted]\n".to_string()),
        LiveEvent::Connected => Some("[connected]\n".to_string()),
        LiveEvent::Close { reason } => Some(format!("[closed: {reason}]\n")),
        LiveEvent::Reconnecting { attempt, delay } => {
            Some(format!("[reconnecting: attempt {attempt} in {}ms]\n", delay.as_millis()))
        }
        LiveEvent::ToolCall(call) => {
            let names: Vec<&str> = call.function_calls.iter().map(|c| c.name.as_str()).collect();
            Some(format!("[tool call: {}]\n", names.join(", ")))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mmlive_realtime::Content;
    use std::time::Duration;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("  "), Input::Empty);
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input(" /exit "), Input::Quit);
        assert_eq!(parse_input("/state"), Input::State);
        assert_eq!(parse_input(" hello "), Input::Text("hello"));
    }

    #[test]
    fn test_describe_events() {
        let content = LiveEvent::Content(Content::from_text("hi"));
        assert_eq!(describe(&content).as_deref(), Some("hi"));
        assert_eq!(describe(&LiveEvent::TurnComplete).as_deref(), Some("\n"));
        let reconnecting = LiveEvent::Reconnecting { attempt: 2, delay: Duration::from_secs(2) };
        assert_eq!(describe(&reconnecting).as_deref(), Some("[reconnecting: attempt 2 in 2000ms]\n"));
        assert_eq!(describe(&LiveEvent::Open), None);
    }
}
