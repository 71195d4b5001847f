use colored::*;

use crate::chat::{Message, Role};
use crate::history::HistoryEntry;

pub fn print_header(text: &str) {
    println!("\n{}", text.bright_cyan().bold());
    println!("{}", "=".repeat(text.chars().count()).bright_cyan());
}

pub fn print_success(text: &str) {
    println!("{}", text.green());
}

pub fn print_error(text: &str) {
    eprintln!("{}", text.red().bold());
}

pub fn print_info(text: &str) {
    println!("{}", text.blue());
}

pub fn print_prompt(text: &str) {
    print!("{}", text.yellow().bold());
}

/// One message, prefixed with its 1-based position in the conversation
pub fn print_message(position: usize, message: &Message) {
    let label = match message.role {
        Role::User => "You".yellow().bold(),
        Role::Assistant => "Assistant".green().bold(),
        Role::System => "System".magenta().bold(),
    };
    let edited = if message.is_edited { " (edited)".dimmed() } else { "".normal() };

    if message.is_loading {
        println!("[{}] {}: {}", position, label, "...".dimmed());
    } else {
        println!("[{}] {}{}: {}", position, label, edited, message.content);
    }
}

pub fn print_entry(position: usize, entry: &HistoryEntry) {
    let when = chrono::DateTime::from_timestamp_millis(entry.last_modified)
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_default();

    println!(
        "{:>3}. {}  {}  {}",
        position,
        entry.title.bold(),
        when.dimmed(),
        entry.id.dimmed()
    );
}
