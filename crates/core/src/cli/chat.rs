//! `pegasus chat` — interactive REPL command.
//!
//! Boots the full runtime, then reads lines from the terminal, submits
//! each as a task, and prints the final response (or failure notice)
//! when the task settles.

use std::sync::Arc;
use std::time::Duration;

use pg_domain::config::Config;
use pg_domain::task::TaskState;

use crate::bootstrap;

const CHAT_SOURCE: &str = "terminal";

/// Run the interactive chat REPL until Ctrl+D or `/exit`.
pub async fn chat(config: Arc<Config>) -> anyhow::Result<()> {
    let runtime = bootstrap::build_runtime(config).await?;
    let task_timeout = Duration::from_secs(runtime.config.agent.task_timeout_sec);

    let history_path = runtime.config.data_dir.join("chat_history.txt");
    let mut rl = rustyline::DefaultEditor::new()?;
    let _ = rl.load_history(&history_path);

    eprintln!("Pegasus interactive chat");
    eprintln!("Type /exit or Ctrl+D to quit");
    eprintln!();

    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                rl.add_history_entry(&line).ok();

                if trimmed == "/exit" || trimmed == "/quit" {
                    break;
                }

                if let Err(e) = send_message(&runtime, trimmed, task_timeout).await {
                    eprintln!("\x1B[31merror: {e}\x1B[0m");
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                eprintln!("(Use Ctrl+D or /exit to quit)");
                continue;
            }
            Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("\x1B[31mreadline error: {e}\x1B[0m");
                break;
            }
        }
    }

    let _ = rl.save_history(&history_path);
    runtime.shutdown().await;
    Ok(())
}

/// One chat round: submit, wait, print the outcome.
async fn send_message(
    runtime: &bootstrap::Runtime,
    text: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let task_id = runtime.agent.submit(text, CHAT_SOURCE).await?;
    let handle = runtime.agent.wait_for_task(&task_id, Some(timeout)).await?;

    let fsm = handle.fsm.lock().await;
    match fsm.state() {
        TaskState::Completed => {
            let response = fsm
                .context
                .final_result
                .as_ref()
                .and_then(|r| r.response.clone())
                .unwrap_or_else(|| "(no response)".into());
            println!("{response}");
        }
        TaskState::Failed => {
            let error = fsm.context.error.as_deref().unwrap_or("unknown error");
            eprintln!("\x1B[31mtask failed: {error}\x1B[0m");
        }
        other => eprintln!("task ended in unexpected state {other}"),
    }
    Ok(())
}
