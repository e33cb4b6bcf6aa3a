//! Path resolution and upload for drag-and-drop and paste.

use futures::future::BoxFuture;
use std::path::PathBuf;

use crate::PastedImage;

/// Server-side file helpers used when inserting paths into a session.
pub trait FileBridge: Send + Sync {
    /// Turn a dropped file's bare name into a path the remote shell can see.
    fn resolve_path(&self, name: &str, is_dir: bool) -> BoxFuture<'static, anyhow::Result<PathBuf>>;

    /// Store a pasted image and return where it landed.
    fn upload(&self, image: PastedImage) -> BoxFuture<'static, anyhow::Result<PathBuf>>;
}

/// POSIX-shell quoting. Plain paths pass through untouched.
pub fn shell_quote(s: &str) -> String {
    let plain = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+:,@%=~".contains(c));
    if plain {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', r"'\''"))
    }
}

/// Quoted, space-joined paths with a trailing space, ready to type at a
/// prompt. `None` when nothing survived.
pub fn insertion_text(paths: &[PathBuf]) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    let mut text = paths
        .iter()
        .map(|p| shell_quote(&p.to_string_lossy()))
        .collect::<Vec<_>>()
        .join(" ");
    text.push(' ');
    Some(text)
}
