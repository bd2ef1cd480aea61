use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use nextsql_core::profiles::PasswordSource;

#[derive(Debug, Parser)]
#[command(name = "nextsql", version, about = "Browse and query MySQL servers from saved profiles")]
pub struct Cli {
    /// Profiles file to use instead of the per-user default.
    #[arg(long, global = true, env = "NEXTSQL_PROFILES")]
    pub profiles: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List saved profiles.
    Profiles,
    /// Save a new profile.
    Add(AddArgs),
    /// Delete a profile.
    Remove { profile: String },
    /// Restrict which databases `browse` shows. No names clears the filter.
    SelectDatabases {
        profile: String,
        databases: Vec<String>,
    },
    /// Walk databases, tables and columns.
    Browse(BrowseArgs),
    /// Run one statement and print the result.
    Query(QueryArgs),
    /// Interactive prompt; statements end with `;`.
    Shell {
        profile: String,
        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Debug, clap::Args)]
pub struct AddArgs {
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value_t = nextsql_core::profiles::DEFAULT_MYSQL_PORT)]
    pub port: u16,
    #[arg(long, default_value = "root")]
    pub user: String,
    #[arg(long)]
    pub password: Option<String>,
    #[arg(long, value_enum, default_value_t = PasswordSourceArg::Inline)]
    pub password_source: PasswordSourceArg,
    #[arg(long)]
    pub database: Option<String>,
    /// Connect once to list the server's databases before saving.
    #[arg(long)]
    pub discover: bool,
    /// Databases to show when browsing.
    #[arg(long = "select", value_delimiter = ',')]
    pub selected_databases: Vec<String>,
}

#[derive(Debug, clap::Args)]
pub struct BrowseArgs {
    pub profile: String,
    pub database: Option<String>,
    pub table: Option<String>,
    /// Show the first rows of the table instead of its columns.
    #[arg(long, requires = "table")]
    pub preview: bool,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, clap::Args)]
pub struct QueryArgs {
    pub profile: String,
    pub sql: String,
    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Copy, clap::Args)]
pub struct OutputArgs {
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    pub format: OutputFormat,
    /// Return BIGINT columns as numbers instead of text.
    #[arg(long)]
    pub native_integers: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PasswordSourceArg {
    Inline,
    EnvVar,
    Keyring,
}

impl From<PasswordSourceArg> for PasswordSource {
    fn from(value: PasswordSourceArg) -> Self {
        match value {
            PasswordSourceArg::Inline => Self::Inline,
            PasswordSourceArg::EnvVar => Self::EnvVar,
            PasswordSourceArg::Keyring => Self::Keyring,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{Cli, Command, OutputFormat, PasswordSourceArg};

    #[test]
    fn parses_add_with_selected_databases() {
        let cli = Cli::try_parse_from([
            "nextsql",
            "add",
            "--name",
            "staging",
            "--host",
            "db.internal",
            "--password-source",
            "env-var",
            "--select",
            "shop,crm",
        ])
        .expect("add should parse");

        let Command::Add(args) = cli.command else {
            panic!("expected add command");
        };
        assert_eq!(args.name, "staging");
        assert_eq!(args.port, 3306);
        assert_eq!(args.user, "root");
        assert_eq!(args.password_source, PasswordSourceArg::EnvVar);
        assert_eq!(args.selected_databases, vec!["shop", "crm"]);
        assert!(!args.discover);
    }

    #[test]
    fn parses_query_with_json_output() {
        let cli = Cli::try_parse_from([
            "nextsql",
            "--profiles",
            "/tmp/profiles.toml",
            "query",
            "local",
            "SELECT 1",
            "--format",
            "json",
            "--native-integers",
        ])
        .expect("query should parse");

        assert_eq!(
            cli.profiles.as_deref(),
            Some(std::path::Path::new("/tmp/profiles.toml"))
        );
        let Command::Query(args) = cli.command else {
            panic!("expected query command");
        };
        assert_eq!(args.sql, "SELECT 1");
        assert_eq!(args.output.format, OutputFormat::Json);
        assert!(args.output.native_integers);
    }

    #[test]
    fn preview_requires_a_table() {
        assert!(Cli::try_parse_from(["nextsql", "browse", "local", "shop", "--preview"]).is_err());
        assert!(
            Cli::try_parse_from(["nextsql", "browse", "local", "shop", "orders", "--preview"])
                .is_ok()
        );
    }
}
