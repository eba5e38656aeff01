//! Interactive destination and folder prompts on the terminal.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};

use beckon_core::resolver::{Destination, DestinationChooser, FolderChooser};
use beckon_core::Result;

/// Asks on stdin where to save files.
///
/// An empty answer takes the suggestion, `n` cancels, anything else is a path.
pub struct PromptChooser {
    default_dir: PathBuf,
}

impl PromptChooser {
    /// Create a prompt suggesting paths in `default_dir`.
    pub const fn new(default_dir: PathBuf) -> Self {
        Self { default_dir }
    }

    async fn ask(&self, question: &str, suggested: &Path) -> Result<Destination> {
        print!("  {} [{}] (n to cancel): ", question, suggested.display());
        io::stdout().flush()?;

        let mut input = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        let read = reader.read_line(&mut input).await?;

        if read == 0 {
            return Ok(Destination::Cancelled);
        }
        Ok(parse_answer(&input, suggested))
    }
}

impl DestinationChooser for PromptChooser {
    fn choose_destination<'a>(
        &'a self,
        suggested_name: &'a str,
    ) -> BoxFuture<'a, Result<Destination>> {
        Box::pin(async move {
            let suggested = self.default_dir.join(suggested_name);
            self.ask(&format!("Save '{}' to", suggested_name), &suggested)
                .await
        })
    }
}

impl FolderChooser for PromptChooser {
    fn choose_folder(&self) -> BoxFuture<'_, Result<Destination>> {
        Box::pin(self.ask("Shared folder", &self.default_dir))
    }
}

fn parse_answer(input: &str, suggested: &Path) -> Destination {
    match input.trim() {
        "" => Destination::Chosen(suggested.to_path_buf()),
        answer if matches!(answer.to_lowercase().as_str(), "n" | "no" | "q") => {
            Destination::Cancelled
        }
        answer => Destination::Chosen(PathBuf::from(answer)),
    }
}
