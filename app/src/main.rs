mod cli;
mod output;
mod shell;
#[cfg(test)]
mod testing;

use std::error::Error;
use std::io::{self, Write};

use clap::Parser;
use nextsql_adapters::mysql::MysqlSessionBackend;
use nextsql_core::config::SessionConfig;
use nextsql_core::connection_manager::ConnectionManager;
use nextsql_core::error::SessionError;
use nextsql_core::profiles::{ConnectionProfile, FileProfilesStore, ProfileStore};
use nextsql_core::query_dispatcher::QueryOptions;
use nextsql_core::schema_explorer::SchemaExplorer;
use nextsql_core::session::SessionBackend;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::{AddArgs, BrowseArgs, Cli, Command, OutputArgs};

fn init_tracing() {
    let filter = EnvFilter::try_from_env("NEXTSQL_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn query_options(output: OutputArgs) -> QueryOptions {
    QueryOptions {
        large_integer_as_text: !output.native_integers,
    }
}

/// Accepts either a profile id or a profile name.
fn resolve_profile_id<B: SessionBackend, S: ProfileStore>(
    manager: &ConnectionManager<B, S>,
    key: &str,
) -> Result<String, SessionError> {
    let profiles = manager.list_profiles();
    profiles
        .iter()
        .find(|profile| profile.id == key)
        .or_else(|| profiles.iter().find(|profile| profile.name == key))
        .map(|profile| profile.id.clone())
        .ok_or_else(|| SessionError::ProfileNotFound {
            profile_id: key.to_string(),
        })
}

async fn add_profile<B: SessionBackend, S: ProfileStore>(
    manager: &ConnectionManager<B, S>,
    args: AddArgs,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let mut profile = ConnectionProfile::new(args.name, args.host, args.user);
    profile.port = args.port;
    profile.password = args.password;
    profile.password_source = args.password_source.into();
    profile.database = args.database;
    profile.selected_databases = args.selected_databases;

    if args.discover {
        let databases = manager.discover_databases(&profile).await?;
        writeln!(out, "Databases on {}:", profile.endpoint())?;
        for database in databases {
            writeln!(out, "  {database}")?;
        }
    }

    let (id, name) = (profile.id.clone(), profile.name.clone());
    manager.add_profile(profile)?;
    writeln!(out, "Saved profile `{name}` ({id})")?;
    Ok(())
}

async fn browse<B: SessionBackend, S: ProfileStore>(
    manager: &ConnectionManager<B, S>,
    args: BrowseArgs,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let id = resolve_profile_id(manager, &args.profile)?;
    let explorer = SchemaExplorer::new(manager).with_options(query_options(args.output));
    let format = args.output.format;

    let rendered = match (args.database.as_deref(), args.table.as_deref()) {
        (None, _) => output::render_names(&explorer.databases(&id).await?, format)?,
        (Some(database), None) => {
            output::render_names(&explorer.tables(&id, database).await?, format)?
        }
        (Some(database), Some(table)) if args.preview => {
            output::render_result(&explorer.preview(&id, database, table).await?, format)?
        }
        (Some(database), Some(table)) => {
            let labels = explorer
                .columns(&id, database, table)
                .await?
                .iter()
                .map(nextsql_core::schema_explorer::ColumnSummary::label)
                .collect::<Vec<_>>();
            output::render_names(&labels, format)?
        }
    };
    writeln!(out, "{rendered}")?;
    Ok(())
}

async fn run_app<B: SessionBackend, S: ProfileStore>(
    command: Command,
    manager: &ConnectionManager<B, S>,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    match command {
        Command::Profiles => {
            writeln!(out, "{}", output::render_profiles(&manager.list_profiles()))?;
        }
        Command::Add(args) => add_profile(manager, args, out).await?,
        Command::Remove { profile } => {
            let id = resolve_profile_id(manager, &profile)?;
            if manager.remove_profile(&id).await? {
                writeln!(out, "Removed profile {id}")?;
            }
        }
        Command::SelectDatabases { profile, databases } => {
            let id = resolve_profile_id(manager, &profile)?;
            let updated = manager.set_selected_databases(&id, databases)?;
            if updated.selected_databases.is_empty() {
                writeln!(out, "`{}` now shows all databases", updated.name)?;
            } else {
                writeln!(
                    out,
                    "`{}` now shows: {}",
                    updated.name,
                    updated.selected_databases.join(", ")
                )?;
            }
        }
        Command::Browse(args) => browse(manager, args, out).await?,
        Command::Query(args) => {
            let id = resolve_profile_id(manager, &args.profile)?;
            let result = manager
                .execute_query(&id, &args.sql, &query_options(args.output))
                .await?;
            writeln!(out, "{}", output::render_result(&result, args.output.format)?)?;
        }
        Command::Shell { profile, output } => {
            let id = resolve_profile_id(manager, &profile)?;
            shell::run_shell(manager, &id, output, out).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();
    let cli = Cli::parse();

    let store = match cli.profiles {
        Some(path) => FileProfilesStore::load_from_path(path)?,
        None => FileProfilesStore::load_default()?,
    };
    let config = SessionConfig::from_env()?;
    let manager = ConnectionManager::with_config(MysqlSessionBackend, store, config);

    let mut stdout = io::stdout().lock();
    let outcome = run_app(cli.command, &manager, &mut stdout).await;
    manager.shutdown().await;
    outcome
}
