use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use contact_import::models::{Strategy, TargetField};

#[derive(Debug, Parser)]
#[command(author, version, about = "Import CSV contacts onto a fixed contact schema", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve(ServeArgs),
    /// Import one CSV file and print the merged contacts as JSON
    Import(ImportArgs),
    /// Wait for an agentic import run and print its output
    Status(StatusArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// CSV file to import
    pub file: PathBuf,
    /// How columns are mapped onto the contact fields
    #[arg(short, long, value_enum, default_value_t = Strategy::Manual)]
    pub strategy: Strategy,
    /// Column for a field, e.g. `fullName=Name` (repeatable, manual strategy)
    #[arg(short = 'm', long = "map", value_parser = parse_field_mapping, action = clap::ArgAction::Append)]
    pub map: Vec<(TargetField, String)>,
    /// What to rank contacts on (agentic strategy)
    #[arg(long)]
    pub ranking_criteria: Option<String>,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Event id returned when the import was submitted
    pub event_id: String,
    /// Status service base URL (overrides JOBS_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,
}

fn parse_field_mapping(value: &str) -> Result<(TargetField, String), String> {
    let (field, header) = value
        .split_once('=')
        .ok_or_else(|| format!("expected field=Header, got '{}'", value))?;
    let field = field.trim().parse::<TargetField>().map_err(|e| e.to_string())?;
    Ok((field, header.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_field_mapping() {
        assert_eq!(
            parse_field_mapping("fullName=Full Name").unwrap(),
            (TargetField::FullName, "Full Name".to_string())
        );
        assert!(parse_field_mapping("fullName").is_err());
        assert!(parse_field_mapping("phone=Phone").is_err());
    }

    #[test]
    fn test_import_args() {
        let cli = Cli::try_parse_from([
            "contact-import",
            "import",
            "people.csv",
            "--map",
            "fullName=Name",
            "-m",
            "email=Email",
        ])
        .unwrap();
        match cli.command {
            Commands::Import(args) => {
                assert_eq!(args.strategy, Strategy::Manual);
                assert_eq!(args.map.len(), 2);
                assert_eq!(args.map[1], (TargetField::Email, "Email".to_string()));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_agentic_args() {
        let cli = Cli::try_parse_from([
            "contact-import",
            "import",
            "people.csv",
            "--strategy",
            "agentic",
            "--ranking-criteria",
            "seniority",
        ])
        .unwrap();
        match cli.command {
            Commands::Import(args) => {
                assert_eq!(args.strategy, Strategy::Agentic);
                assert_eq!(args.ranking_criteria.as_deref(), Some("seniority"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
