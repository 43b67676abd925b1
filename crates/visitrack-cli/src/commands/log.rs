use clap::Subcommand;
use visitrack_core::Database;

use super::CmdResult;

#[derive(Subcommand)]
pub enum LogAction {
    /// List stored location snapshots, newest first
    List {
        /// Only this user's snapshots
        #[arg(long)]
        user: Option<String>,
        /// Maximum number of rows
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

pub fn run(action: LogAction) -> CmdResult {
    let db = Database::open()?;
    match action {
        LogAction::List { user, limit } => {
            let entries = db.list_fixes(user.as_deref(), limit)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
