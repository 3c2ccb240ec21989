//! Output formatting for CLI display

use crate::constraint::{CompileError, Compiled};
use colored::Colorize;

/// Format a compiled expression; quiet mode prints only the canonical form
#[must_use]
pub fn compiled(compiled: &Compiled, quiet: bool) -> String {
    let canonical = compiled.expr.to_string();
    if quiet {
        return canonical;
    }

    let mut lines = vec![format!("{} {}", "ok".green(), canonical)];
    lines.push(format!("  level: {}", compiled.level));
    if compiled.depends_on_state {
        lines.push("  follows run state".to_string());
    }
    if !compiled.keywords.is_empty() {
        let keywords: Vec<&str> = compiled.keywords.iter().map(|k| k.name()).collect();
        lines.push(format!("  keywords: {}", keywords.join(", ")));
    }
    for warning in &compiled.warnings {
        lines.push(format!("  {} {warning}", "warning:".yellow()));
    }
    lines.join("\n")
}

#[must_use]
pub fn compile_error(error: &CompileError) -> String {
    format!("{} {error}", "error:".red())
}

/// Format a subject with its tags for display
#[must_use]
pub fn subject_with_tags(name: &str, tags: &[String], quiet: bool) -> String {
    if quiet {
        format!("{name}\t{}", tags.join(","))
    } else if tags.is_empty() {
        format!("  {name} (no tags)")
    } else {
        format!("  {} [{}]", name.bold(), tags.join(", ").cyan())
    }
}

/// Format a tag's constraint diagnostic
#[must_use]
pub fn diagnostic(tag: &str, message: &str) -> String {
    format!("  {} {}: {message}", "!".yellow(), tag.bold())
}

/// Format a function or keyword with its accepted names
#[must_use]
pub fn names(primary: &str, aliases: &[&str], detail: &str) -> String {
    if aliases.is_empty() {
        format!("  {:<24} {}", primary.green(), detail.dimmed())
    } else {
        format!(
            "  {:<24} {} ({})",
            primary.green(),
            detail.dimmed(),
            aliases.join(", ")
        )
    }
}
