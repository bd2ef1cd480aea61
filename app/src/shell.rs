use std::error::Error;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nextsql_core::connection_manager::ConnectionManager;
use nextsql_core::error::SessionError;
use nextsql_core::profiles::{ConnectionProfile, ProfileStore};
use nextsql_core::query_dispatcher::QueryOptions;
use nextsql_core::session::SessionBackend;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::debug;

use crate::cli::OutputArgs;
use crate::output::render_result;
use crate::resolve_profile_id;

#[derive(Debug, PartialEq, Eq)]
pub enum ShellInput {
    /// More lines are needed before the statement is complete.
    Pending,
    Statement(String),
    /// `\use <profile>`: switch the active connection.
    Use(String),
    Help,
    Exit,
}

fn parse_use(line: &str) -> Option<ShellInput> {
    let rest = line.strip_prefix("\\use")?;
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let profile = rest.trim().trim_end_matches(';').trim();
    Some(if profile.is_empty() {
        ShellInput::Help
    } else {
        ShellInput::Use(profile.to_string())
    })
}

/// Accumulates lines until a statement terminated by `;` is complete.
#[derive(Debug, Default)]
pub struct StatementBuffer {
    buffer: String,
}

impl StatementBuffer {
    pub fn push_line(&mut self, line: &str) -> ShellInput {
        let trimmed = line.trim();
        if self.buffer.is_empty() {
            match trimmed.to_ascii_lowercase().as_str() {
                "exit" | "quit" | "\\q" => return ShellInput::Exit,
                "help" | "\\?" => return ShellInput::Help,
                "" => return ShellInput::Pending,
                _ => {}
            }
            if let Some(input) = parse_use(trimmed) {
                return input;
            }
        }

        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(trimmed);

        match self.buffer.strip_suffix(';') {
            Some(statement) => {
                let statement = statement.trim().to_string();
                self.buffer.clear();
                if statement.is_empty() {
                    ShellInput::Pending
                } else {
                    ShellInput::Statement(statement)
                }
            }
            None => ShellInput::Pending,
        }
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

const HELP: &str = "End statements with `;`. `\\use <profile>` switches connection, \
                    `exit` or `quit` leaves, Ctrl-C clears the buffer.";

/// Interactive session state: which profile statements go to and whether its
/// connection dropped since the last prompt.
pub struct Shell<'a, B: SessionBackend, S: ProfileStore> {
    manager: &'a ConnectionManager<B, S>,
    target: ConnectionProfile,
    output: OutputArgs,
    status_changed: Arc<AtomicBool>,
    target_was_connected: bool,
}

impl<'a, B: SessionBackend, S: ProfileStore> Shell<'a, B, S> {
    pub async fn open(
        manager: &'a ConnectionManager<B, S>,
        profile_id: &str,
        output: OutputArgs,
    ) -> Result<Self, SessionError> {
        let status_changed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&status_changed);
        manager.on_status_changed(move || flag.store(true, Ordering::SeqCst));

        let mut shell = Self {
            manager,
            target: manager.profile(profile_id)?,
            output,
            status_changed,
            target_was_connected: false,
        };
        shell.switch_to(profile_id).await?;
        Ok(shell)
    }

    async fn switch_to(&mut self, profile_id: &str) -> Result<(), SessionError> {
        let profile = self.manager.profile(profile_id)?;
        self.manager.select_active(&profile.id).await?;
        self.target = profile;
        self.target_was_connected = true;
        self.status_changed.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// The last-active profile while its session is live, otherwise the
    /// profile last chosen, which reconnects on the next statement.
    #[must_use]
    pub fn current_target(&self) -> ConnectionProfile {
        self.manager
            .last_active()
            .unwrap_or_else(|| self.target.clone())
    }

    #[must_use]
    pub fn prompt(&self) -> String {
        match self.manager.last_active() {
            Some(profile) => format!("{}> ", profile.name),
            None => format!("{} (disconnected)> ", self.target.name),
        }
    }

    /// A message when the target's session went away since the last call.
    pub fn take_status_notice(&mut self) -> Option<String> {
        if !self.status_changed.swap(false, Ordering::SeqCst) {
            return None;
        }
        let connected = self.manager.is_connected(&self.target.id);
        let dropped = self.target_was_connected && !connected;
        self.target_was_connected = connected;
        dropped.then(|| {
            format!(
                "connection to `{}` dropped; the next statement reconnects",
                self.target.name
            )
        })
    }

    /// Returns `false` once the user asked to leave.
    pub async fn handle(
        &mut self,
        input: ShellInput,
        out: &mut impl Write,
    ) -> Result<bool, Box<dyn Error>> {
        match input {
            ShellInput::Pending => {}
            ShellInput::Help => writeln!(out, "{HELP}")?,
            ShellInput::Exit => return Ok(false),
            ShellInput::Use(key) => {
                let switched = match resolve_profile_id(self.manager, &key) {
                    Ok(id) => self.switch_to(&id).await,
                    Err(error) => Err(error),
                };
                match switched {
                    Ok(()) => writeln!(
                        out,
                        "Switched to {} ({})",
                        self.target.name,
                        self.target.endpoint()
                    )?,
                    Err(error) => writeln!(out, "error: {error}")?,
                }
            }
            ShellInput::Statement(sql) => {
                let target = self.current_target();
                debug!(profile_id = %target.id, "running shell statement");
                let options = QueryOptions {
                    large_integer_as_text: !self.output.native_integers,
                };
                match self.manager.execute_query(&target.id, &sql, &options).await {
                    Ok(result) => writeln!(out, "{}", render_result(&result, self.output.format)?)?,
                    Err(error) => writeln!(out, "error: {error}")?,
                }
            }
        }
        Ok(true)
    }
}

pub async fn run_shell<B: SessionBackend, S: ProfileStore>(
    manager: &ConnectionManager<B, S>,
    profile_id: &str,
    output: OutputArgs,
    out: &mut impl Write,
) -> Result<(), Box<dyn Error>> {
    let mut shell = Shell::open(manager, profile_id, output).await?;
    let target = shell.current_target();
    writeln!(out, "Connected to {} ({})", target.name, target.endpoint())?;
    writeln!(out, "{HELP}")?;

    let mut editor = DefaultEditor::new()?;
    let mut buffer = StatementBuffer::default();

    loop {
        if let Some(notice) = shell.take_status_notice() {
            writeln!(out, "{notice}")?;
        }
        let prompt = if buffer.is_empty() {
            shell.prompt()
        } else {
            "    -> ".to_string()
        };

        // Keep-alive tasks keep running on the other workers while we wait.
        let line = match tokio::task::block_in_place(|| editor.readline(&prompt)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(error) => return Err(error.into()),
        };

        let input = buffer.push_line(&line);
        if let ShellInput::Statement(sql) = &input {
            if let Err(error) = editor.add_history_entry(format!("{sql};")) {
                debug!(%error, "could not record shell history");
            }
        }
        if !shell.handle(input, out).await? {
            break;
        }
    }

    Ok(())
}
