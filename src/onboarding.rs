use colored::*;
use std::env;
use std::fs;
use std::io;

/// Run onboarding checks to ensure the user has a usable configuration
pub fn run_onboarding_checks() -> Result<(), OnboardingError> {
    println!("{}", "=".repeat(60).bright_cyan());
    println!(
        "{}",
        "  Market-Making Dashboard - Initialization"
            .bright_cyan()
            .bold()
    );
    println!("{}", "=".repeat(60).bright_cyan());
    println!();

    check_allow_lists()?;
    check_feed_urls()?;
    check_database_permissions()?;

    println!("{}", "✓ All configuration checks passed!".green().bold());
    println!();

    Ok(())
}

/// Empty allow-lists are legal (deny-all is the safe default) but almost
/// always a setup mistake, so surface it loudly before the REPL starts.
fn check_allow_lists() -> Result<(), OnboardingError> {
    let kom = env::var("KOM_OWNER_WALLETS").unwrap_or_default();
    let bba = env::var("BBA_OWNER_WALLETS").unwrap_or_default();

    if kom.trim().is_empty() && bba.trim().is_empty() {
        println!(
            "{} {}",
            "⚠".yellow(),
            "No wallet allow-lists configured - every wallet will be denied".yellow()
        );
    } else {
        println!("{} Wallet allow-lists found", "✓".green());
    }
    Ok(())
}

fn check_feed_urls() -> Result<(), OnboardingError> {
    let malformed: Vec<&str> = [
        ("KOM_FEED_URL", "http"),
        ("BBA_FEED_URL", "http"),
        ("SSE_URL", "http"),
        ("WS_URL", "ws"),
    ]
    .iter()
    .filter_map(|&(key, scheme)| match env::var(key) {
        Ok(value) if !value.trim().starts_with(scheme) => Some(key),
        _ => None,
    })
    .collect();

    if !malformed.is_empty() {
        return Err(OnboardingError::MalformedFeedUrls(malformed));
    }

    println!("{} Feed endpoints OK", "✓".green());
    Ok(())
}

fn check_database_permissions() -> Result<(), OnboardingError> {
    let db_path =
        env::var("DATABASE_PATH").unwrap_or_else(|_| "./metrics_history.db".to_string());

    // Try to create/open the database file to check permissions
    match fs::OpenOptions::new().write(true).create(true).open(&db_path) {
        Ok(_) => {
            println!("{} Database permissions OK", "✓".green());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(OnboardingError::DatabasePermissionDenied(db_path))
        }
        Err(e) => Err(OnboardingError::DatabaseError(e.to_string())),
    }
}

#[derive(Debug)]
pub enum OnboardingError {
    MalformedFeedUrls(Vec<&'static str>),
    DatabasePermissionDenied(String),
    DatabaseError(String),
}

impl std::fmt::Display for OnboardingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnboardingError::MalformedFeedUrls(keys) => {
                writeln!(f)?;
                writeln!(
                    f,
                    "{}",
                    "[!] CONFIGURATION ERROR: Malformed Feed Endpoints".red().bold()
                )?;
                writeln!(f, "{}", "-".repeat(60).red())?;
                writeln!(f, "These variables are set but do not look like URLs:")?;
                writeln!(f)?;
                writeln!(f, "  {}", keys.join(", ").yellow())?;
                writeln!(f)?;
                writeln!(f, "{}", ">> ACTION REQUIRED:".yellow().bold())?;
                writeln!(f, "1. Open your {} file.", "'.env'".cyan())?;
                writeln!(
                    f,
                    "2. Point the HTTP endpoints at your metrics server, e.g.:"
                )?;
                writeln!(f, "   {}", "KOM_FEED_URL=http://localhost:3000/api/liquidex".cyan())?;
                writeln!(f, "3. The socket endpoint must use a ws:// or wss:// scheme:")?;
                writeln!(f, "   {}", "WS_URL=ws://localhost:3000/api/ws".cyan())?;
                writeln!(f, "{}", "-".repeat(60).red())?;
                Ok(())
            }
            OnboardingError::DatabasePermissionDenied(path) => {
                writeln!(f)?;
                writeln!(
                    f,
                    "{}",
                    "[!] SYSTEM ERROR: Cannot create Database File".red().bold()
                )?;
                writeln!(f, "{}", "-".repeat(60).red())?;
                writeln!(f, "Could not create '{}' in the current folder.", path.yellow())?;
                writeln!(f)?;
                writeln!(f, "{}", ">> DIAGNOSIS:".yellow().bold())?;
                writeln!(f, "- Are you running in a read-only folder?")?;
                writeln!(f, "- Do you have write permissions?")?;
                writeln!(f)?;
                writeln!(f, "{}", ">> TRY:".yellow().bold())?;
                writeln!(f, "- On Linux/Mac: Run {}", "chmod +w .".cyan())?;
                writeln!(f, "- Move to a user directory with write access")?;
                writeln!(f, "- Set DATABASE_PATH in .env to a writable location")?;
                writeln!(f, "{}", "-".repeat(60).red())?;
                Ok(())
            }
            OnboardingError::DatabaseError(err) => {
                writeln!(f)?;
                writeln!(f, "{}", "[!] DATABASE ERROR".red().bold())?;
                writeln!(f, "{}", "-".repeat(60).red())?;
                writeln!(f, "Error: {}", err)?;
                writeln!(f, "{}", "-".repeat(60).red())?;
                Ok(())
            }
        }
    }
}

impl std::error::Error for OnboardingError {}
