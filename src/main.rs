use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use archive_explorer::{
    logging, AppConfig, ArchiveHandle, PathTree, SessionController, SessionState, ZipEngine,
};
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tracing::error;

#[derive(Parser, Debug)]
#[command(name = "archive-explorer", version, about = "Browse the contents of a zip archive")]
struct Cli {
    /// Archive to open. Defaults to the most recently viewed archive.
    archive: Option<PathBuf>,

    /// Print the tree as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = logging::init() {
        eprintln!("failed to initialise logging: {e}");
    }
    let cli = Cli::parse();
    let config = AppConfig::load_or_default();

    let engine = Arc::new(ZipEngine::from_config(&config));
    let mut controller = SessionController::new(engine).with_config(&config);

    let handle = controller.handle();
    let input = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin())));
    controller.on_password_required(move |request| {
        let handle = handle.clone();
        let input = input.clone();
        let session = request.session;
        let attempt = request.attempt;
        tokio::spawn(async move {
            match prompt_password(&input, attempt).await {
                Some(password) => handle.submit_password(session, password),
                None => handle.cancel(session),
            };
        });
    });

    let started = match cli.archive {
        Some(path) => controller
            .start_session(ArchiveHandle::new(path))
            .await
            .map(Some),
        None => controller.start_from(&config).await,
    };
    match started {
        Ok(Some(_)) => {}
        Ok(None) => {
            eprintln!("no archive given and no recently viewed archive");
            return ExitCode::from(2);
        }
        Err(e) => {
            error!(error = %e, "Could not start extraction");
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    }

    let state = controller.run().await;
    print_tree(controller.tree(), cli.json);

    match state {
        SessionState::Completed => ExitCode::SUCCESS,
        other => {
            eprintln!("extraction {other}");
            ExitCode::FAILURE
        }
    }
}

/// Reads one line from the shared input. An empty line or end of input
/// declines.
async fn prompt_password<R>(input: &Mutex<R>, attempt: u32) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut input = input.lock().await;
    if attempt > 1 {
        eprint!("wrong password, try again (empty line cancels): ");
    } else {
        eprint!("password required (empty line cancels): ");
    }
    let mut line = String::new();
    input.read_line(&mut line).await.ok()?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    (!password.is_empty()).then_some(password)
}

fn print_tree(tree: &PathTree, json: bool) {
    if json {
        match serde_json::to_string_pretty(tree) {
            Ok(out) => println!("{out}"),
            Err(e) => eprintln!("error: {e}"),
        }
        return;
    }
    for (depth, name) in tree.walk() {
        println!("{}{}", "  ".repeat(depth - 1), name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prompts_share_one_reader() {
        let input = Mutex::new(&b"first\r\nsecond\n\nleft over\n"[..]);

        assert_eq!(prompt_password(&input, 1).await.as_deref(), Some("first"));
        assert_eq!(prompt_password(&input, 2).await.as_deref(), Some("second"));
        assert_eq!(prompt_password(&input, 3).await, None);
        assert_eq!(prompt_password(&input, 1).await.as_deref(), Some("left over"));
        // end of input declines
        assert_eq!(prompt_password(&input, 1).await, None);
    }
}
