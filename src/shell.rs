use std::path::{Component, Path, PathBuf};
use chrono::Local;
use tokio::fs;
use tracing::debug;

pub const GOODBYE: &str = "goodbye!";

/// The server-side state of one peer's shell: currently only the working directory
#[derive(Clone, Debug)]
pub struct ShellState {
    cwd: PathBuf,
}

impl ShellState {
    pub fn new(cwd: PathBuf) -> ShellState {
        ShellState { cwd }
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Resolves a file name relative to the working directory
    pub fn resolve(&self, name: &str) -> PathBuf {
        normalize(&self.cwd.join(name))
    }

    pub fn echo(&self, text: &str) -> String {
        text.to_string()
    }

    pub fn time(&self) -> String {
        Local::now().format("%H:%M:%S%.3f").to_string()
    }

    pub async fn ls(&self) -> String {
        match self.do_ls().await {
            Ok(listing) => listing,
            Err(e) => format!("Error reading directory: {}", e),
        }
    }

    async fn do_ls(&self) -> anyhow::Result<String> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(&self.cwd).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            let kind = if metadata.is_dir() {
                "dir"
            }
            else if metadata.is_symlink() {
                "symlink"
            }
            else {
                "file"
            };
            entries.push(format!("{} [{}, {} bytes]", entry.file_name().to_string_lossy(), kind, metadata.len()));
        }
        entries.sort();
        Ok(entries.join("\n"))
    }

    pub async fn cd(&mut self, path: Option<&str>) -> String {
        let Some(path) = path else {
            return "error: path required".to_string();
        };

        let target = self.resolve(path);
        match fs::metadata(&target).await {
            Ok(metadata) if metadata.is_dir() => {
                debug!("changing directory to {:?}", target);
                self.cwd = target;
                format!("Changed directory to {}", self.cwd.display())
            }
            _ => format!("error: {} is not a valid directory", target.display()),
        }
    }
}

/// Lexical normalization: removes `.` and resolves `..` without touching the file system
fn normalize(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                result.pop();
            }
            other => result.push(other),
        }
    }
    result
}
