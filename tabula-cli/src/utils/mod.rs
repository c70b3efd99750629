use anyhow::Result;
use colored::Colorize;

/// Validate a migration name is snake_case
pub fn validate_migration_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("Migration name cannot be empty");
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        anyhow::bail!(
            "Migration name must be snake_case (lowercase letters, numbers, underscores only)\n\n\
            Valid examples:\n\
            • create_users\n\
            • add_email_to_users"
        );
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        anyhow::bail!("Migration name cannot start with a digit; the timestamp prefix is added for you");
    }

    if name.len() > 64 {
        anyhow::bail!("Migration name must be 64 characters or less");
    }

    Ok(())
}

/// Success message with checkmark
pub fn success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Info message
pub fn info(message: &str) {
    println!("{} {}", "→".blue().bold(), message);
}

/// Warning message
pub fn warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Section header
pub fn section(title: &str) {
    println!("\n{}", title.bold().underline());
}
