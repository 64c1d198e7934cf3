use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use filter_stack::{Editor, EditorConfig, EditorError, EditorResult, FileSource, ImageOpsEngine};

#[derive(Parser, Debug)]
#[command(name = "filter-stack", version, about = "Apply, undo and save image filters")]
struct Cli {
    /// Configuration file (JSON). Defaults to the per-user one if present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Scratch directory for staged job files.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Directory exported images are saved into.
    #[arg(long)]
    export_dir: Option<PathBuf>,

    /// Give up on a filter after this many seconds (0 waits forever).
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Image to open on startup.
    #[arg(long)]
    image: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> EditorResult<EditorConfig> {
        let mut config = match &self.config {
            Some(path) => EditorConfig::load(path)?,
            None => EditorConfig::load_default()?,
        };
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.export_dir {
            config.export_dir = Some(dir.clone());
        }
        if let Some(secs) = self.timeout_secs {
            config.engine_timeout_secs = (secs > 0).then_some(secs);
        }
        Ok(config)
    }
}

/// One line of user input
#[derive(Debug, Clone, PartialEq)]
enum Message {
    Open(PathBuf),
    Apply(String),
    Undo,
    Export(Option<String>),
    History,
    Filters,
    Help,
    Quit,
}

impl Message {
    /// `Ok(None)` for a blank line.
    fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, rest)) => (command, Some(rest.trim()).filter(|r| !r.is_empty())),
            None => (line, None),
        };

        let message = match (command.to_ascii_lowercase().as_str(), arg) {
            ("open", Some(path)) => Message::Open(PathBuf::from(path)),
            ("apply", Some(name)) => Message::Apply(name.to_string()),
            ("undo", None) => Message::Undo,
            ("export", name) => Message::Export(name.map(str::to_string)),
            ("history", None) => Message::History,
            ("filters", None) => Message::Filters,
            ("help", _) => Message::Help,
            ("quit" | "exit", None) => Message::Quit,
            ("open" | "apply", None) => return Err(format!("'{command}' needs an argument")),
            _ => return Err(format!("Unknown command '{line}'. Type 'help'.")),
        };
        Ok(Some(message))
    }
}

const HELP: &str = "\
Commands:
  open <path>      start editing an image
  apply <filter>   apply a filter to the current image
  undo             drop the last filter
  export [name]    save the current image
  history          list the edit history
  filters          list available filters
  quit             leave";

struct App {
    editor: Arc<Editor>,
    /// Waits on the running filter and prints its outcome
    pending: Option<JoinHandle<()>>,
}

impl App {
    fn new(editor: Editor) -> Self {
        Self {
            editor: Arc::new(editor),
            pending: None,
        }
    }

    /// Handle one message. Returns false once the user wants out.
    async fn update(&mut self, message: Message) -> bool {
        match message {
            Message::Open(path) => {
                if !path.is_file() {
                    println!("⚠️  {} is not a file", path.display());
                    return true;
                }
                let outcome = self.editor.select_image(Arc::new(FileSource::new(path.clone())));
                if outcome.is_ok() {
                    println!("🖼️  Editing {}", path.display());
                }
            }
            Message::Apply(name) => {
                let outcome = self.editor.apply_transform(&name);
                match outcome.result {
                    Ok(handle) => {
                        println!("⏳ Applying '{}'...", handle.transform().label);
                        let editor = Arc::clone(&self.editor);
                        self.pending = Some(tokio::spawn(async move {
                            if let Some(message) = editor.finish(handle).await.message {
                                println!("{message}");
                            }
                        }));
                    }
                    Err(_) => print_message(outcome.message),
                }
            }
            Message::Undo => print_message(self.editor.undo().message),
            Message::Export(name) => print_message(self.editor.export(name).await.message),
            Message::History => {
                let snapshot = self.editor.history();
                if snapshot.is_empty() {
                    println!("(no image)");
                }
                for (i, state) in snapshot.entries().iter().enumerate() {
                    let marker = if i + 1 == snapshot.len() { "*" } else { " " };
                    println!(
                        "{marker} {i}: {} ({})",
                        state.display_name(),
                        state.created_at().format("%H:%M:%S")
                    );
                }
            }
            Message::Filters => {
                for transform in self.editor.catalog().iter() {
                    println!("  {:<14} {}", transform.name, transform.label);
                }
            }
            Message::Help => println!("{HELP}"),
            Message::Quit => {
                if let Some(pending) = self.pending.take() {
                    if self.editor.is_busy() {
                        println!("⏳ Waiting for the running filter...");
                    }
                    let _ = pending.await;
                }
                return false;
            }
        }
        true
    }
}

fn print_message(message: Option<String>) {
    if let Some(message) = message {
        println!("{message}");
    }
}

async fn run(cli: Cli) -> EditorResult<()> {
    let config = cli.config()?;
    let editor = Editor::from_config(&config, Arc::new(ImageOpsEngine::new()))?;
    println!(
        "🎨 filter-stack ready with {} filters. Type 'help' for commands.",
        editor.catalog().len()
    );

    let mut app = App::new(editor);
    if let Some(path) = cli.image.clone() {
        app.update(Message::Open(path)).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = lines
            .next_line()
            .await
            .map_err(|e| EditorError::io("reading input", &e))?;
        let Some(line) = line else {
            // EOF behaves like quit
            app.update(Message::Quit).await;
            break;
        };
        match Message::parse(&line) {
            Ok(Some(message)) => {
                if !app.update(message).await {
                    break;
                }
            }
            Ok(None) => {}
            Err(reason) => println!("{reason}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("⚠️  {}", err.user_message());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            Message::parse("open  /tmp/a photo.jpg "),
            Ok(Some(Message::Open(PathBuf::from("/tmp/a photo.jpg"))))
        );
        assert_eq!(
            Message::parse("APPLY grayscale"),
            Ok(Some(Message::Apply("grayscale".into())))
        );
        assert_eq!(Message::parse("export"), Ok(Some(Message::Export(None))));
        assert_eq!(
            Message::parse("export out.png"),
            Ok(Some(Message::Export(Some("out.png".into()))))
        );
        assert_eq!(Message::parse("exit"), Ok(Some(Message::Quit)));
        assert_eq!(Message::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_errors() {
        assert!(Message::parse("apply").is_err());
        assert!(Message::parse("undo twice").is_err());
        assert!(Message::parse("frobnicate").is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"engine_timeout_secs": 30, "export_dir": "/tmp/a"}"#).unwrap();

        let cli = Cli::parse_from([
            "filter-stack",
            "--config",
            path.to_str().unwrap(),
            "--export-dir",
            "/tmp/b",
            "--timeout-secs",
            "0",
        ]);
        let config = cli.config().unwrap();
        assert_eq!(config.export_dir, Some(PathBuf::from("/tmp/b")));
        assert_eq!(config.engine_timeout(), None);
    }
}
