use chrono::{DateTime, Local, Utc};
use crossterm::style::Stylize;

pub fn success(message: &str) {
    println!("  {} {message}", "✔".green().bold());
}

pub fn info(message: &str) {
    println!("  {} {message}", "ℹ".cyan());
}

pub fn muted(message: &str) {
    println!("  {}", message.dark_grey());
}

pub fn warn(message: &str) {
    eprintln!("  {} {}", "Warning:".yellow().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("  {} {}", "Error:".red().bold(), message);
}

pub fn emit_warnings(warnings: &[String]) {
    for warning in warnings {
        warn(warning);
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub fn format_local_time(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// `1:05:09` / `23:41`
pub fn format_position(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}
