// ABOUTME: File and directory-tree comparison for transactions.
// ABOUTME: Unified diffs for text, a byte heuristic for binaries.

use crate::error::Result;
use std::path::Path;
use walkdir::WalkDir;

const CONTEXT: usize = 3;

/// Binary detection: any byte outside the text set within the first 1 KiB.
pub fn is_binary(path: &Path) -> Result<bool> {
    use std::io::Read;

    let mut file = std::fs::File::open(path)?;
    let mut buf = [0u8; 1024];
    let n = file.read(&mut buf)?;
    Ok(buf[..n].iter().any(|&b| !is_text_byte(b)))
}

fn is_text_byte(b: u8) -> bool {
    // 0x7f (DEL) counts as binary, the high half does not
    matches!(b, 7..=10 | 12 | 13 | 27 | 0x20..=0x7e | 0x80..=0xff)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Equal,
    Delete,
    Insert,
}

/// Classic unified diff over lines, with `---`/`+++` headers when labels are
/// non-empty and three lines of context per hunk.
pub fn unified_diff(from: &str, to: &str, from_label: &str, to_label: &str) -> String {
    let from_lines: Vec<&str> = from.lines().collect();
    let to_lines: Vec<&str> = to.lines().collect();
    let ops = diff_lines(&from_lines, &to_lines);

    if !ops.iter().any(|(tag, _, _)| *tag != Tag::Equal) {
        return String::new();
    }

    let mut out = String::new();
    if !from_label.is_empty() || !to_label.is_empty() {
        out.push_str(&format!("--- {from_label}\n+++ {to_label}\n"));
    }

    for hunk in group_hunks(&ops) {
        let (old_start, old_len, new_start, new_len) = hunk_header(&ops, &hunk);
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            old_start, old_len, new_start, new_len
        ));
        for &i in &hunk {
            let (tag, old_idx, new_idx) = ops[i];
            match tag {
                Tag::Equal => out.push_str(&format!(" {}\n", from_lines[old_idx])),
                Tag::Delete => out.push_str(&format!("-{}\n", from_lines[old_idx])),
                Tag::Insert => out.push_str(&format!("+{}\n", to_lines[new_idx])),
            }
        }
    }
    out
}

/// Line-level diff via longest common subsequence. Each op carries the index
/// into the old resp. new line list (unused side is the running position).
fn diff_lines(old: &[&str], new: &[&str]) -> Vec<(Tag, usize, usize)> {
    let n = old.len();
    let m = new.len();
    let mut table = vec![vec![0usize; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[i][j] = if old[i] == new[j] {
                table[i + 1][j + 1] + 1
            } else {
                table[i + 1][j].max(table[i][j + 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if old[i] == new[j] {
            ops.push((Tag::Equal, i, j));
            i += 1;
            j += 1;
        } else if table[i + 1][j] >= table[i][j + 1] {
            ops.push((Tag::Delete, i, j));
            i += 1;
        } else {
            ops.push((Tag::Insert, i, j));
            j += 1;
        }
    }
    while i < n {
        ops.push((Tag::Delete, i, j));
        i += 1;
    }
    while j < m {
        ops.push((Tag::Insert, i, j));
        j += 1;
    }
    ops
}

/// Indices of ops forming hunks: changed runs padded with context, merged
/// when their context overlaps.
fn group_hunks(ops: &[(Tag, usize, usize)]) -> Vec<Vec<usize>> {
    let changed: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, (tag, _, _))| *tag != Tag::Equal)
        .map(|(i, _)| i)
        .collect();

    let mut hunks: Vec<(usize, usize)> = Vec::new();
    for &idx in &changed {
        let start = idx.saturating_sub(CONTEXT);
        let end = (idx + CONTEXT + 1).min(ops.len());
        match hunks.last_mut() {
            Some((_, last_end)) if start <= *last_end => *last_end = end,
            _ => hunks.push((start, end)),
        }
    }

    hunks
        .into_iter()
        .map(|(start, end)| (start..end).collect())
        .collect()
}

fn hunk_header(ops: &[(Tag, usize, usize)], hunk: &[usize]) -> (usize, usize, usize, usize) {
    let mut old_len = 0;
    let mut new_len = 0;
    for &i in hunk {
        match ops[i].0 {
            Tag::Equal => {
                old_len += 1;
                new_len += 1;
            }
            Tag::Delete => old_len += 1,
            Tag::Insert => new_len += 1,
        }
    }
    let first = hunk[0];
    let (_, old_idx, new_idx) = ops[first];
    // unified diff line numbers are 1-based; zero-length ranges keep the
    // preceding line number
    let old_start = if old_len == 0 { old_idx } else { old_idx + 1 };
    let new_start = if new_len == 0 { new_idx } else { new_idx + 1 };
    (old_start, old_len, new_start, new_len)
}

/// Compare two paths (files or trees) and collect human-readable report
/// lines: only-in notices, unified diffs, binary notices.
pub fn diff_paths(
    left: &Path,
    right: &Path,
    left_alias: &str,
    right_alias: &str,
) -> Result<Vec<String>> {
    let mut report = Vec::new();

    if !left.is_dir() || !right.is_dir() {
        compare_pair(left, right, "", left_alias, right_alias, &mut report)?;
        return Ok(report);
    }

    // left side drives content comparison and left-only reporting
    for entry in WalkDir::new(left).min_depth(1) {
        let entry = entry.map_err(|e| crate::error::Error::Execution(e.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(left)
            .expect("walked path is under its root");
        let rel_str = rel.to_string_lossy();
        compare_pair(
            entry.path(),
            &right.join(rel),
            &rel_str,
            left_alias,
            right_alias,
            &mut report,
        )?;
    }

    // right side only reports files the left walk could not see
    for entry in WalkDir::new(right).min_depth(1) {
        let entry = entry.map_err(|e| crate::error::Error::Execution(e.to_string()))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(right)
            .expect("walked path is under its root");
        if !left.join(rel).exists() {
            report.push(format!("Only in {}: {}", right_alias, rel.to_string_lossy()));
        }
    }

    Ok(report)
}

fn compare_pair(
    left: &Path,
    right: &Path,
    rel: &str,
    left_alias: &str,
    right_alias: &str,
    report: &mut Vec<String>,
) -> Result<()> {
    let display = |alias: &str| {
        if rel.is_empty() {
            alias.to_string()
        } else {
            format!("{alias} : {rel}")
        }
    };

    if !right.exists() {
        report.push(format!(
            "Only in {}: {}",
            left_alias,
            if rel.is_empty() {
                left.to_string_lossy().into_owned()
            } else {
                rel.to_string()
            }
        ));
        return Ok(());
    }
    if !left.exists() {
        report.push(format!(
            "Only in {}: {}",
            right_alias,
            if rel.is_empty() {
                right.to_string_lossy().into_owned()
            } else {
                rel.to_string()
            }
        ));
        return Ok(());
    }
    if left.is_dir() {
        return Ok(());
    }

    let left_bytes = std::fs::read(left)?;
    let right_bytes = std::fs::read(right)?;
    if left_bytes == right_bytes {
        return Ok(());
    }

    if is_binary(left)? || is_binary(right)? {
        report.push(format!("--- {}", display(left_alias)));
        report.push(format!("+++ {}", display(right_alias)));
        report.push("(binary files differ)".to_string());
        return Ok(());
    }

    let diff = unified_diff(
        &String::from_utf8_lossy(&left_bytes),
        &String::from_utf8_lossy(&right_bytes),
        &display(left_alias),
        &display(right_alias),
    );
    report.extend(diff.lines().map(|l| l.to_string()));
    Ok(())
}
