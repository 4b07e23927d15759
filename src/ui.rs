use colored::Colorize;

/// Diffs longer than this are abbreviated unless running verbose
const DIFF_PREVIEW_LIMIT: usize = 10;
/// Lines kept at each end of an abbreviated diff
const DIFF_CONTEXT: usize = 5;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a destructive-change notice
pub fn danger(msg: &str) {
    println!("  {} {}", "DANGER".red().bold(), msg.red());
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a step indicator
pub fn step(num: usize, total: usize, msg: &str) {
    println!("{} {}", format!("[{}/{}]", num, total).blue().bold(), msg);
}

/// Print device diff output, coloring added and removed lines
pub fn diff(text: &str, verbose: bool) {
    for line in abbreviate_diff(text, verbose) {
        let trimmed = line.trim_start();
        if trimmed.starts_with('+') {
            println!("    {}", line.green());
        } else if trimmed.starts_with('-') {
            println!("    {}", line.red());
        } else if trimmed.starts_with('[') {
            println!("    {}", line.cyan());
        } else {
            println!("    {}", line.dimmed());
        }
    }
}

/// First and last lines of a long diff with a count of what was skipped
pub fn abbreviate_diff(text: &str, verbose: bool) -> Vec<String> {
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if verbose || lines.len() <= DIFF_PREVIEW_LIMIT {
        return lines.into_iter().map(str::to_string).collect();
    }
    let hidden = lines.len() - 2 * DIFF_CONTEXT;
    let mut out: Vec<String> = lines[..DIFF_CONTEXT].iter().map(|l| l.to_string()).collect();
    out.push(format!("... ({} more lines)", hidden));
    out.extend(lines[lines.len() - DIFF_CONTEXT..].iter().map(|l| l.to_string()));
    out
}

/// Format a duration in milliseconds for display
pub fn format_elapsed(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> String {
        (1..=n)
            .map(|i| format!("+   line {}", i))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn test_short_diff_is_kept() {
        let lines = abbreviate_diff(&numbered(10), false);
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[9], "+   line 10");
    }

    #[test]
    fn test_long_diff_is_abbreviated() {
        let lines = abbreviate_diff(&numbered(14), false);
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[4], "+   line 5");
        assert_eq!(lines[5], "... (4 more lines)");
        assert_eq!(lines[6], "+   line 10");
        assert_eq!(lines[10], "+   line 14");
    }

    #[test]
    fn test_verbose_shows_everything() {
        assert_eq!(abbreviate_diff(&numbered(30), true).len(), 30);
    }

    #[test]
    fn test_blank_lines_dropped() {
        let lines = abbreviate_diff("\n[edit system]\n\n+  host-name pe1;\n", false);
        assert_eq!(lines, ["[edit system]", "+  host-name pe1;"]);
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(250), "250ms");
        assert_eq!(format_elapsed(1500), "1.5s");
        assert_eq!(format_elapsed(125_000), "2m05s");
    }
}
