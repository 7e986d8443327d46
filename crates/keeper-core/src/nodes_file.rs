//! The CTDB nodes file.
//!
//! Plain text, one address per line, newline-terminated; the line
//! index is the member's pnn. A leading `#` disables a slot without
//! shifting the positions below it, which is why lines are only ever
//! commented in place, never removed or reordered.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::debug;

use keeper_proto::error::KeeperResult;
use keeper_proto::node::{NodeEntry, NodeState};

/// Read the nodes file as an ordered list of raw lines, `#` prefixes
/// included. A missing file reads as an empty list: before the first
/// member is published there simply is no file yet.
pub fn read_nodes(path: &Path) -> KeeperResult<Vec<String>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines() {
        lines.push(line?.trim().to_string());
    }
    Ok(lines)
}

/// Replace the nodes file content and fsync it. The caller is
/// responsible for triggering the daemon reload afterward; the daemon
/// works from a cached copy and never re-reads on its own.
pub fn write_nodes(path: &Path, lines: &[String]) -> KeeperResult<()> {
    let mut file = File::create(path)?;
    for line in lines {
        writeln!(file, "{}", line)?;
    }
    file.sync_all()?;
    debug!("wrote {} node line(s) to {}", lines.len(), path.display());
    Ok(())
}

/// Line at `pnn`, or `""` when the file is shorter than that.
pub fn node_line(lines: &[String], pnn: u32) -> &str {
    lines
        .get(pnn as usize)
        .map(String::as_str)
        .unwrap_or("")
}

/// Expected nodes-file rendering for an entry, given the current
/// lines. A changed entry disables whatever currently occupies its
/// slot, whatever that is; the new address is only published on the
/// following (replaced) pass.
pub fn entry_line(current: &[String], entry: &NodeEntry) -> String {
    if entry.state == NodeState::Changed {
        format!("#{}", node_line(current, entry.pnn).trim_matches('#'))
    } else {
        entry.node.clone()
    }
}
