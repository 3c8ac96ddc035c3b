//! Configuration command
//!
//! Shows the effective configuration or validates a config file.

use crate::util;
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::Path;
use veil_core::VeilConfig;

/// Print the effective configuration
pub async fn run_show(path: Option<&Path>) -> Result<()> {
    let config = util::load_config(path)?;

    println!("{}", "Veil Configuration".bold());
    match path {
        Some(path) => println!("{}: {}\n", "Location".dimmed(), path.display().dimmed()),
        None => println!("{}\n", "(built-in defaults)".dimmed()),
    }

    print_config(&config);
    Ok(())
}

/// Validate a config file and report the result
pub async fn run_validate(path: &Path) -> Result<()> {
    util::load_config(Some(path))?;
    println!("{} {}", "✓".green(), format!("{} is valid", path.display()).bold());
    Ok(())
}

fn print_config(config: &VeilConfig) {
    println!("{}", "[records]".yellow());
    println!("  {} = {}", "capacity".cyan(), config.records.capacity);

    println!("\n{}", "[queries]".yellow());
    println!(
        "  {} = {} {}",
        "default_ttl_ms".cyan(),
        config.queries.default_ttl_ms,
        format!("({}ms)", config.queries.default_ttl_ms).dimmed()
    );
    println!("  {} = {}", "max_tree_entries".cyan(), config.queries.max_tree_entries);
    for (i, pattern) in config.queries.category_patterns.iter().enumerate() {
        println!("  {} = {}", format!("category_patterns[{}]", i).cyan(), pattern);
    }

    println!("\n{}", "[health]".yellow());
    println!(
        "  {} = {} {}",
        "healthy_rate".cyan(),
        config.health.healthy_rate,
        format!("({})", util::format_percent(config.health.healthy_rate)).dimmed()
    );
    println!("  {} = {}", "min_samples".cyan(), config.health.min_samples);
    println!("  {} = {}", "history_len".cyan(), config.health.history_len);

    println!("\n{}", "[visibility]".yellow());
    println!("  {} = {}", "threshold".cyan(), config.visibility.threshold);

    println!("\n{}", "[scheduler]".yellow());
    println!("  {} = {}", "individual_mode".cyan(), config.scheduler.individual_mode);
    println!("  {} = {}", "lazy_processing".cyan(), config.scheduler.lazy_processing);
    println!("  {} = {}", "id_attribute".cyan(), config.scheduler.id_attribute);
    println!("  {} = {}", "link_selector".cyan(), config.scheduler.link_selector);
    for (i, selector) in config.scheduler.container_selectors.iter().enumerate() {
        println!("  {} = {}", format!("container_selectors[{}]", i).cyan(), selector);
    }
    println!(
        "  {} = {} {}",
        "maintenance_interval_secs".cyan(),
        config.scheduler.maintenance_interval_secs,
        format!("({}s)", config.scheduler.maintenance_interval_secs).dimmed()
    );

    println!("\n{}", "[classes]".yellow());
    println!("  {} = {}", "dimmed".cyan(), config.classes.dimmed);
    println!("  {} = {}", "hidden".cyan(), config.classes.hidden);
}
