use anyhow::{Context, Result, bail};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::application::{
    BalanceEntry, LeaveFilter, LeaveService, LogNotifier, NewLeave, NotificationDispatcher,
    NotificationQueue, TransitionResult,
};
use crate::config::AppConfig;
use crate::domain::{Actor, LeaveStatus, User, UserRole};

/// Leave tracker - per-year leave balances with approval accounting
#[derive(Parser)]
#[command(name = "leave-tracker")]
#[command(about = "Track leave requests and the balances they draw from")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides LEAVE_TRACKER_DATABASE)
    #[arg(short, long, global = true)]
    pub database: Option<String>,

    /// Username to act as
    #[arg(long = "as", global = true, value_name = "USERNAME")]
    pub acting_user: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// User management commands
    #[command(subcommand)]
    User(UserCommands),

    /// Business year management commands
    #[command(subcommand)]
    Year(YearCommands),

    /// Leave type management commands
    #[command(name = "type")]
    #[command(subcommand)]
    LeaveType(LeaveTypeCommands),

    /// Allowance and balance commands
    #[command(subcommand)]
    Allowance(AllowanceCommands),

    /// Leave request commands
    #[command(subcommand)]
    Leave(LeaveCommands),
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Create a new user
    Create {
        /// Username (must be unique)
        username: String,

        /// Role: admin, employee, none
        #[arg(short, long, default_value = "employee")]
        role: String,

        /// Email address for notifications
        #[arg(short, long)]
        email: Option<String>,

        /// First name
        #[arg(long, default_value = "")]
        first_name: String,

        /// Last name
        #[arg(long, default_value = "")]
        last_name: String,

        /// Grant superuser rights (sees and manages everything)
        #[arg(long)]
        superuser: bool,
    },

    /// List users visible to the acting user
    List,
}

#[derive(Subcommand)]
pub enum YearCommands {
    /// Create a business year
    Create {
        /// Calendar year, e.g. 2024
        year: i32,
    },

    /// List business years
    List,
}

#[derive(Subcommand)]
pub enum LeaveTypeCommands {
    /// Create a leave type
    Create {
        /// Name, e.g. "Vacation"
        name: String,
    },

    /// List leave types
    List,
}

#[derive(Subcommand)]
pub enum AllowanceCommands {
    /// Set the days a user is allotted in a business year
    Set {
        /// Username
        username: String,

        /// Business year
        #[arg(short, long)]
        year: i32,

        /// Allotted days
        #[arg(long)]
        days: i64,
    },

    /// Remove a user's balance record for a business year
    Remove {
        /// Username
        username: String,

        /// Business year
        #[arg(short, long)]
        year: i32,
    },

    /// Show one user's balance for a business year
    Show {
        /// Username
        username: String,

        /// Business year
        #[arg(short, long)]
        year: i32,
    },

    /// List balances visible to the acting user
    List {
        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum LeaveCommands {
    /// Submit a leave request (starts out pending)
    Submit {
        /// Requesting user (defaults to the acting user)
        #[arg(short, long)]
        user: Option<String>,

        /// Leave type name
        #[arg(short = 't', long = "type")]
        leave_type: String,

        /// First day of leave (YYYY-MM-DD)
        #[arg(long)]
        start: String,

        /// Last day of leave (YYYY-MM-DD)
        #[arg(long)]
        end: String,

        /// Number of days requested
        #[arg(long)]
        days: i64,

        /// Business year (defaults to the year of the start date)
        #[arg(short, long)]
        year: Option<i32>,

        /// Free-form description
        #[arg(short = 'm', long)]
        description: Option<String>,
    },

    /// List leave requests
    List {
        /// Filter by username
        #[arg(short, long)]
        user: Option<String>,

        /// Filter by status: pending, approved, rejected, cancelled
        #[arg(short, long)]
        status: Option<String>,

        /// Filter by leave type name
        #[arg(short = 't', long = "type")]
        leave_type: Option<String>,

        /// Filter by business year
        #[arg(short, long)]
        year: Option<i32>,
    },

    /// Show detailed leave information
    Show {
        /// Leave ID
        id: String,
    },

    /// Approve a leave request
    Approve {
        /// Leave ID
        id: String,
    },

    /// Reject a leave request
    Reject {
        /// Leave ID
        id: String,
    },

    /// Cancel a leave request
    Cancel {
        /// Leave ID
        id: String,
    },

    /// Set a leave request's status directly
    Status {
        /// Leave ID
        id: String,

        /// New status: pending, approved, rejected, cancelled
        status: String,
    },

    /// Delete a leave request (approved days are given back)
    Delete {
        /// Leave ID
        id: String,
    },
}

impl Cli {
    pub async fn run(self, config: AppConfig) -> Result<()> {
        let database = self.database.clone().unwrap_or(config.database.clone());

        if matches!(self.command, Commands::Init) {
            LeaveService::init(&database).await?;
            println!("Database initialized: {}", database);
            return Ok(());
        }

        let (queue, rx) = NotificationQueue::channel();
        let dispatcher =
            NotificationDispatcher::new(LogNotifier, config.notifications.admin_emails.clone())
                .spawn(rx);

        let service = LeaveService::connect(&database)
            .await?
            .with_options(config.ledger)
            .with_notifications(queue);

        let result = self.dispatch(&service).await;

        // Dropping the service closes the queue and lets the dispatcher drain.
        drop(service);
        if let Err(err) = dispatcher.await {
            tracing::warn!(error = %err, "notification dispatcher failed");
        }

        result
    }

    async fn dispatch(self, service: &LeaveService) -> Result<()> {
        let acting_user = self.acting_user;
        match self.command {
            // Handled in `run` before a service exists.
            Commands::Init => Ok(()),
            Commands::User(cmd) => run_user_command(service, acting_user.as_deref(), cmd).await,
            Commands::Year(cmd) => run_year_command(service, cmd).await,
            Commands::LeaveType(cmd) => run_leave_type_command(service, cmd).await,
            Commands::Allowance(cmd) => {
                run_allowance_command(service, acting_user.as_deref(), cmd).await
            }
            Commands::Leave(cmd) => {
                let actor_user = resolve_acting_user(service, acting_user.as_deref()).await?;
                run_leave_command(service, &actor_user, cmd).await
            }
        }
    }
}

async fn resolve_acting_user(service: &LeaveService, username: Option<&str>) -> Result<User> {
    let Some(username) = username else {
        bail!("This command needs an acting user: pass --as <username>");
    };
    Ok(service.get_user(username).await?)
}

async fn resolve_actor(service: &LeaveService, username: Option<&str>) -> Result<Actor> {
    Ok(resolve_acting_user(service, username).await?.actor())
}

async fn run_user_command(
    service: &LeaveService,
    acting_user: Option<&str>,
    cmd: UserCommands,
) -> Result<()> {
    match cmd {
        UserCommands::Create {
            username,
            role,
            email,
            first_name,
            last_name,
            superuser,
        } => {
            let role = UserRole::from_str(&role).with_context(|| {
                format!("Invalid role '{}'. Valid roles: admin, employee, none", role)
            })?;

            let mut user = User::new(username, role)
                .with_name(first_name, last_name)
                .with_superuser(superuser);
            if let Some(email) = email {
                user = user.with_email(email);
            }

            let user = service.create_user(user).await?;
            println!("Created user: {} ({})", user.username, user.role);
        }

        UserCommands::List => {
            let actor = resolve_actor(service, acting_user).await?;
            let users = service.list_users(&actor).await?;
            if users.is_empty() {
                println!("No users found.");
                return Ok(());
            }

            println!("{:<20} {:<10} {:<28} {}", "USERNAME", "ROLE", "EMAIL", "NAME");
            println!("{}", "-".repeat(80));
            for user in users {
                println!(
                    "{:<20} {:<10} {:<28} {}",
                    truncate(&user.username, 20),
                    user.role,
                    truncate(user.email.as_deref().unwrap_or("-"), 28),
                    user.display_name()
                );
            }
        }
    }
    Ok(())
}

async fn run_year_command(service: &LeaveService, cmd: YearCommands) -> Result<()> {
    match cmd {
        YearCommands::Create { year } => {
            let business_year = service.create_business_year(year).await?;
            println!("Created business year: {}", business_year);
        }
        YearCommands::List => {
            let years = service.list_business_years().await?;
            if years.is_empty() {
                println!("No business years found.");
            }
            for year in years {
                println!("{}", year);
            }
        }
    }
    Ok(())
}

async fn run_leave_type_command(service: &LeaveService, cmd: LeaveTypeCommands) -> Result<()> {
    match cmd {
        LeaveTypeCommands::Create { name } => {
            let leave_type = service.create_leave_type(name).await?;
            println!("Created leave type: {}", leave_type.name);
        }
        LeaveTypeCommands::List => {
            let types = service.list_leave_types().await?;
            if types.is_empty() {
                println!("No leave types found.");
            }
            for leave_type in types {
                println!("{}", leave_type.name);
            }
        }
    }
    Ok(())
}

/// One balance line, as exported to json/csv.
#[derive(Debug, Serialize)]
struct BalanceRow {
    username: String,
    year: i32,
    days: i64,
    used_days: i64,
    remaining: i64,
}

impl From<&BalanceEntry> for BalanceRow {
    fn from(entry: &BalanceEntry) -> Self {
        Self {
            username: entry.user.username.clone(),
            year: entry.year.year,
            days: entry.balance.days,
            used_days: entry.balance.used_days,
            remaining: entry.balance.remaining(),
        }
    }
}

async fn run_allowance_command(
    service: &LeaveService,
    acting_user: Option<&str>,
    cmd: AllowanceCommands,
) -> Result<()> {
    match cmd {
        AllowanceCommands::Set {
            username,
            year,
            days,
        } => {
            let balance = service.set_allowance(&username, year, days).await?;
            println!(
                "Allowance for {} in {}: {} day(s), {} used",
                username, year, balance.days, balance.used_days
            );
        }

        AllowanceCommands::Remove { username, year } => {
            let balance = service.remove_allowance(&username, year).await?;
            println!(
                "Removed allowance for {} in {} ({} of {} day(s) used)",
                username, year, balance.used_days, balance.days
            );
        }

        AllowanceCommands::Show { username, year } => {
            let actor = resolve_actor(service, acting_user).await?;
            let entry = service.get_balance(&actor, &username, year).await?;
            println!("Balance: {} / {}", entry.user.username, entry.year);
            println!("  Allotted:   {}", entry.balance.days);
            println!("  Used:       {}", entry.balance.used_days);
            println!("  Remaining:  {}", entry.balance.remaining());
            if entry.balance.is_overdrawn() {
                println!("  (over-approved)");
            }
        }

        AllowanceCommands::List { format } => {
            let actor = resolve_actor(service, acting_user).await?;
            let entries = service.list_balances(&actor).await?;
            let rows: Vec<BalanceRow> = entries.iter().map(BalanceRow::from).collect();

            match format.as_str() {
                "json" => println!("{}", serde_json::to_string_pretty(&rows)?),
                "csv" => {
                    let mut writer = csv::Writer::from_writer(std::io::stdout());
                    for row in &rows {
                        writer.serialize(row)?;
                    }
                    writer.flush()?;
                }
                "table" => {
                    if rows.is_empty() {
                        println!("No balances found.");
                        return Ok(());
                    }
                    println!(
                        "{:<20} {:>6} {:>8} {:>8} {:>10}",
                        "USER", "YEAR", "DAYS", "USED", "REMAINING"
                    );
                    println!("{}", "-".repeat(56));
                    for row in rows {
                        println!(
                            "{:<20} {:>6} {:>8} {:>8} {:>10}",
                            truncate(&row.username, 20),
                            row.year,
                            row.days,
                            row.used_days,
                            row.remaining
                        );
                    }
                }
                other => bail!("Unknown format '{}'. Use table, json or csv", other),
            }
        }
    }
    Ok(())
}

async fn run_leave_command(service: &LeaveService, acting_user: &User, cmd: LeaveCommands) -> Result<()> {
    let actor = acting_user.actor();

    match cmd {
        LeaveCommands::Submit {
            user,
            leave_type,
            start,
            end,
            days,
            year,
            description,
        } => {
            let start_date = parse_date(&start)?;
            let end_date = parse_date(&end)?;
            let request = NewLeave {
                username: user.unwrap_or_else(|| acting_user.username.clone()),
                leave_type,
                year: year.unwrap_or_else(|| start_date.year()),
                start_date,
                end_date,
                days,
                description,
            };

            let leave = service.submit_leave(&actor, request).await?;
            println!(
                "Submitted leave: {} to {} ({} day(s)) [{}]",
                leave.start_date, leave.end_date, leave.days, leave.id
            );
        }

        LeaveCommands::List {
            user,
            status,
            leave_type,
            year,
        } => {
            let status = status.map(|s| parse_status(&s)).transpose()?;
            let filter = LeaveFilter {
                username: user,
                status,
                leave_type,
                year,
            };

            let leaves = service.list_leaves(&actor, filter).await?;
            if leaves.is_empty() {
                println!("No leaves found.");
                return Ok(());
            }

            println!(
                "{:<36} {:<10} {:<10} {:>5} {:<9}",
                "ID", "START", "END", "DAYS", "STATUS"
            );
            println!("{}", "-".repeat(74));
            for leave in leaves {
                println!(
                    "{:<36} {:<10} {:<10} {:>5} {:<9}",
                    leave.id, leave.start_date, leave.end_date, leave.days, leave.status
                );
            }
        }

        LeaveCommands::Show { id } => {
            let info = service.get_leave_info(&actor, parse_id(&id)?).await?;
            println!("Leave: {}", info.leave.id);
            println!("  Employee:      {} ({})", info.user.display_name(), info.user.username);
            println!("  Type:          {}", info.leave_type.name);
            println!("  From:          {}", info.leave.start_date);
            println!("  To:            {}", info.leave.end_date);
            println!("  Days:          {}", info.leave.days);
            println!("  Business year: {}", info.year);
            println!("  Status:        {}", info.leave.status.label());
            if let Some(description) = &info.leave.description {
                println!("  Description:   {}", description);
            }
            match &info.balance {
                Some(balance) => println!(
                    "  Balance:       {} used of {} ({} left)",
                    balance.used_days,
                    balance.days,
                    balance.remaining()
                ),
                None => println!("  Balance:       (no allowance set)"),
            }
            let over_allowance = info
                .balance
                .as_ref()
                .is_some_and(|balance| !balance.can_consume(info.leave.days));
            if info.leave.status == LeaveStatus::Pending && over_allowance {
                println!("  Warning:       approving would exceed the allowance");
            }
        }

        LeaveCommands::Approve { id } => {
            let result = service.approve_leave(&actor, parse_id(&id)?).await?;
            print_transition(&result);
        }

        LeaveCommands::Reject { id } => {
            let result = service.reject_leave(&actor, parse_id(&id)?).await?;
            print_transition(&result);
        }

        LeaveCommands::Cancel { id } => {
            let result = service.cancel_leave(&actor, parse_id(&id)?).await?;
            print_transition(&result);
        }

        LeaveCommands::Status { id, status } => {
            let status = parse_status(&status)?;
            let result = service.change_status(&actor, parse_id(&id)?, status).await?;
            print_transition(&result);
        }

        LeaveCommands::Delete { id } => {
            let leave = service.delete_leave(&actor, parse_id(&id)?).await?;
            println!("Deleted leave: {} ({})", leave.id, leave.status);
        }
    }
    Ok(())
}

fn print_transition(result: &TransitionResult) {
    if result.old_status == result.leave.status {
        println!("Leave {} is already {}", result.leave.id, result.leave.status);
        return;
    }

    println!(
        "Leave {}: {} -> {}",
        result.leave.id, result.old_status, result.leave.status
    );
    if let Some(balance) = &result.balance {
        println!(
            "  Balance: {} used of {} ({} left)",
            balance.used_days,
            balance.days,
            balance.remaining()
        );
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() > max_len {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).context("Invalid leave ID format (expected UUID)")
}

fn parse_status(status: &str) -> Result<LeaveStatus> {
    LeaveStatus::from_str(status).with_context(|| {
        format!(
            "Invalid status '{}'. Valid statuses: pending, approved, rejected, cancelled",
            status
        )
    })
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_date("2023-02-29").is_err());
        assert!(parse_date("29/02/2024").is_err());
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("approved").unwrap(), LeaveStatus::Approved);
        assert!(parse_status("done").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a-very-long-username", 10), "a-very-...");
    }

    #[test]
    fn test_help_and_version_need_no_config() {
        let help = Cli::try_parse_from(["leave-tracker", "--help"]).err().unwrap();
        assert_eq!(help.kind(), clap::error::ErrorKind::DisplayHelp);

        let version = Cli::try_parse_from(["leave-tracker", "--version"]).err().unwrap();
        assert_eq!(version.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_parses_acting_user_after_subcommand() {
        let cli = Cli::try_parse_from([
            "leave-tracker",
            "leave",
            "approve",
            "00000000-0000-0000-0000-000000000000",
            "--as",
            "boss",
        ])
        .unwrap();
        assert_eq!(cli.acting_user.as_deref(), Some("boss"));
        assert!(matches!(
            cli.command,
            Commands::Leave(LeaveCommands::Approve { .. })
        ));
    }
}
