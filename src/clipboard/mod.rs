//! Copying a finished summary to the system clipboard.

use anyhow::{anyhow, Result};
use arboard::Clipboard;
use std::io::Write;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};
use which::which;

struct CopyTool {
    name: &'static str,
    args: &'static [&'static str],
}

/// Command-line fallbacks, tried in order when the native backend fails.
const COPY_TOOLS: &[CopyTool] = &[
    CopyTool {
        name: "wl-copy",
        args: &[],
    },
    CopyTool {
        name: "xclip",
        args: &["-selection", "clipboard"],
    },
    CopyTool {
        name: "xsel",
        args: &["--clipboard", "--input"],
    },
];

/// Copy `text`, preferring the native clipboard. Returns the backend used.
pub fn copy_text(text: &str) -> Result<&'static str> {
    if text.is_empty() {
        return Ok("none");
    }

    info!("Copying {} chars to clipboard", text.len());

    match Clipboard::new().and_then(|mut clipboard| clipboard.set_text(text)) {
        Ok(()) => return Ok("native"),
        Err(err) => warn!(
            "System clipboard backend unavailable ({}); trying clipboard tools",
            err
        ),
    }

    copy_with_tools(text)
}

fn copy_with_tools(text: &str) -> Result<&'static str> {
    for tool in COPY_TOOLS {
        if which(tool.name).is_err() {
            continue;
        }

        let child = Command::new(tool.name)
            .args(tool.args)
            .stdin(Stdio::piped())
            .spawn();
        let Ok(mut child) = child else {
            continue;
        };

        if let Some(stdin) = child.stdin.as_mut() {
            if stdin.write_all(text.as_bytes()).is_err() {
                continue;
            }
        }
        // Close stdin so the tool sees EOF.
        drop(child.stdin.take());

        if matches!(child.wait(), Ok(status) if status.success()) {
            debug!("Text copied to clipboard with {}", tool.name);
            return Ok(tool.name);
        }
    }

    Err(anyhow!(
        "No clipboard tool (wl-copy/xclip/xsel) available for fallback"
    ))
}
