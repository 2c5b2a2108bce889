use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use remote_medic::models::{Credentials, Medicine, Patient, Registration};
use remote_medic::services::medicines::{ListParams, Prescription};
use remote_medic::services::{medicines, patients};
use remote_medic::{ApiError, ClientConfig, FileStorage, Navigate, NavigationDecision, RemoteMedic};
use serde::Serialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("not signed in; run `remote-medic login` first")]
    NotSignedIn,
    #[error("cannot locate a home directory; pass --session-dir or set REMOTE_MEDIC_SESSION_DIR")]
    MissingSessionDir,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "remote-medic", about = "Remote patient and medication management CLI")]
struct Cli {
    #[arg(long, env = "REMOTE_MEDIC_API_URL")]
    api_url: Option<String>,

    #[arg(long, env = "REMOTE_MEDIC_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Directory holding the persisted session token.
    #[arg(long, env = "REMOTE_MEDIC_SESSION_DIR")]
    session_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        username: String,
        #[arg(long, env = "REMOTE_MEDIC_PASSWORD")]
        password: String,
    },
    Register(RegisterArgs),
    Logout,
    Whoami,
    /// Print the navigation decision for a screen path.
    Route {
        path: String,
    },
    Patients(PatientsCommand),
    Medicines(MedicinesCommand),
}

#[derive(Args, Debug)]
struct RegisterArgs {
    username: String,
    #[arg(long)]
    email: String,
    #[arg(long, env = "REMOTE_MEDIC_PASSWORD")]
    password: String,
    #[arg(long)]
    first_name: Option<String>,
    #[arg(long)]
    last_name: Option<String>,
}

#[derive(Args, Debug)]
struct PatientsCommand {
    #[command(subcommand)]
    command: PatientsSubcommand,
}

#[derive(Subcommand, Debug)]
enum PatientsSubcommand {
    List {
        #[arg(long)]
        page: Option<u32>,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
    },
    Get {
        id: i64,
    },
    Unassigned,
    Carer {
        carer_id: i64,
    },
    Create(PatientArgs),
    Update {
        id: i64,
        #[command(flatten)]
        fields: PatientArgs,
    },
    Delete {
        id: i64,
    },
    Assign {
        id: i64,
        user_id: i64,
    },
    Unassign {
        id: i64,
    },
    Users {
        id: i64,
    },
}

#[derive(Args, Debug)]
struct PatientArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    email: String,
    #[arg(long, default_value = "")]
    phone: String,
    #[arg(long)]
    age: Option<u32>,
    #[arg(long, default_value = "")]
    address: String,
    #[arg(long, default_value = "")]
    notes: String,
}

impl From<PatientArgs> for Patient {
    fn from(args: PatientArgs) -> Self {
        Self {
            name: args.name,
            email: args.email,
            phone: args.phone,
            age: args.age,
            address: args.address,
            medical_notes: args.notes,
            ..Patient::default()
        }
    }
}

#[derive(Args, Debug)]
struct MedicinesCommand {
    #[command(subcommand)]
    command: MedicinesSubcommand,
}

#[derive(Subcommand, Debug)]
enum MedicinesSubcommand {
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        per_page: u32,
        /// Include disabled medicines.
        #[arg(long)]
        all: bool,
        /// Ignore paging.
        #[arg(long)]
        get_all: bool,
    },
    Get {
        id: i64,
    },
    Create(MedicineArgs),
    Update {
        id: i64,
        #[command(flatten)]
        fields: MedicineArgs,
    },
    Delete {
        id: i64,
    },
    Enable {
        id: i64,
    },
    Disable {
        id: i64,
    },
    Patient {
        patient_id: i64,
    },
    Assign {
        patient_id: i64,
        medicine_id: i64,
        #[arg(long)]
        dose: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
    Remove {
        patient_id: i64,
        medicine_id: i64,
    },
    Search {
        query: String,
        #[arg(long)]
        all: bool,
    },
    Carer {
        carer_id: i64,
    },
}

#[derive(Args, Debug)]
struct MedicineArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    dosage: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    instructions: String,
    #[arg(long)]
    every_hours: Option<u32>,
    #[arg(long)]
    every_days: Option<u32>,
    /// `YYYY-MM-DD`
    #[arg(long)]
    start: Option<String>,
    /// `YYYY-MM-DD`
    #[arg(long)]
    end: Option<String>,
    #[arg(long)]
    inactive: bool,
}

impl From<MedicineArgs> for Medicine {
    fn from(args: MedicineArgs) -> Self {
        Self {
            name: args.name,
            dosage: args.dosage,
            description: args.description,
            instructions: args.instructions,
            frequency_hours: args.every_hours,
            frequency_days: args.every_days,
            start_date: args.start,
            end_date: args.end,
            is_active: !args.inactive,
            ..Medicine::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let app = build_app(&cli)?;
    if needs_profile(&cli.command) {
        app.initialize().await;
    } else {
        app.restore();
    }

    match cli.command {
        Command::Login { username, password } => run_login(&app, username, password).await,
        Command::Register(args) => run_register(&app, args).await,
        Command::Logout => {
            let ended = app.logout();
            print_json(&json!({ "signed_out": ended }))
        }
        Command::Whoami => {
            require_route(&app, "/profile")?;
            let user = app.current_user().await.ok_or(CliError::NotSignedIn)?;
            print_json(&user)
        }
        Command::Route { path } => {
            let decision = app.navigate(&path);
            print_json(&json!({
                "path": path,
                "decision": format!("{decision:?}"),
                "redirect": decision.redirect_path(),
            }))
        }
        Command::Patients(cmd) => run_patients(&app, cmd).await,
        Command::Medicines(cmd) => run_medicines(&app, cmd).await,
    }
}

/// Commands that talk to protected endpoints resolve the profile first, so a
/// stale token is dropped before use. The rest only read the persisted token.
fn needs_profile(command: &Command) -> bool {
    matches!(command, Command::Whoami | Command::Patients(_) | Command::Medicines(_))
}

fn build_app(cli: &Cli) -> Result<RemoteMedic, CliError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(api_url) = &cli.api_url {
        config = config.with_api_url(api_url);
    }
    if let Some(secs) = cli.timeout_secs.filter(|s| *s > 0) {
        config = config.with_timeout(Duration::from_secs(secs));
    }

    let session_dir = match &cli.session_dir {
        Some(dir) => dir.clone(),
        None => dirs::home_dir().ok_or(CliError::MissingSessionDir)?.join(".remote-medic"),
    };
    let storage = Arc::new(FileStorage::in_dir(&session_dir));
    let navigate: Navigate = Arc::new(|path: &str| tracing::info!(%path, "redirecting"));
    Ok(RemoteMedic::new(config, storage, navigate)?)
}

fn require_route(app: &RemoteMedic, path: &str) -> Result<(), CliError> {
    match app.navigate(path) {
        NavigationDecision::RedirectToLogin => Err(CliError::NotSignedIn),
        NavigationDecision::Allow | NavigationDecision::RedirectToHome => Ok(()),
    }
}

async fn run_login(app: &RemoteMedic, username: String, password: String) -> Result<(), CliError> {
    let user = app.login(&Credentials::new(username, password)).await?;
    print_json(&user)
}

async fn run_register(app: &RemoteMedic, args: RegisterArgs) -> Result<(), CliError> {
    let registration = Registration {
        username: args.username,
        email: args.email,
        password: args.password,
        first_name: args.first_name,
        last_name: args.last_name,
    };
    let resp = app.register(&registration).await?;
    print_json(&json!({ "message": resp.message, "user": resp.user }))
}

async fn run_patients(app: &RemoteMedic, cmd: PatientsCommand) -> Result<(), CliError> {
    require_route(app, "/patients")?;
    let client = app.client();
    match cmd.command {
        PatientsSubcommand::List { page: None, .. } => print_json(&patients::list(client).await?),
        PatientsSubcommand::List { page: Some(page), per_page } => {
            print_json(&patients::list_page(client, page, per_page).await?)
        }
        PatientsSubcommand::Get { id } => print_json(&patients::get(client, id).await?),
        PatientsSubcommand::Unassigned => print_json(&patients::unassigned(client).await?),
        PatientsSubcommand::Carer { carer_id } => print_json(&patients::for_carer(client, carer_id).await?),
        PatientsSubcommand::Create(fields) => print_json(&patients::create(client, &fields.into()).await?),
        PatientsSubcommand::Update { id, fields } => {
            print_json(&patients::update(client, id, &fields.into()).await?)
        }
        PatientsSubcommand::Delete { id } => print_json(&patients::delete(client, id).await?),
        PatientsSubcommand::Assign { id, user_id } => print_json(&patients::assign(client, id, user_id).await?),
        PatientsSubcommand::Unassign { id } => print_json(&patients::unassign(client, id).await?),
        PatientsSubcommand::Users { id } => print_json(&patients::assigned_users(client, id).await?),
    }
}

async fn run_medicines(app: &RemoteMedic, cmd: MedicinesCommand) -> Result<(), CliError> {
    require_route(app, "/medicines")?;
    let client = app.client();
    match cmd.command {
        MedicinesSubcommand::List { page, per_page, all, get_all } => {
            let params = ListParams { page, per_page, active_only: !all, get_all };
            print_json(&medicines::list(client, params).await?)
        }
        MedicinesSubcommand::Get { id } => print_json(&medicines::get(client, id).await?),
        MedicinesSubcommand::Create(fields) => print_json(&medicines::create(client, &fields.into()).await?),
        MedicinesSubcommand::Update { id, fields } => {
            print_json(&medicines::update(client, id, &fields.into()).await?)
        }
        MedicinesSubcommand::Delete { id } => print_json(&medicines::delete(client, id).await?),
        MedicinesSubcommand::Enable { id } => print_json(&medicines::enable(client, id).await?),
        MedicinesSubcommand::Disable { id } => print_json(&medicines::disable(client, id).await?),
        MedicinesSubcommand::Patient { patient_id } => {
            print_json(&medicines::for_patient(client, patient_id).await?)
        }
        MedicinesSubcommand::Assign { patient_id, medicine_id, dose, notes } => {
            let prescription = Prescription { dose_per_take: dose, notes };
            print_json(&medicines::assign_to_patient(client, patient_id, medicine_id, &prescription).await?)
        }
        MedicinesSubcommand::Remove { patient_id, medicine_id } => {
            print_json(&medicines::remove_from_patient(client, patient_id, medicine_id).await?)
        }
        MedicinesSubcommand::Search { query, all } => print_json(&medicines::search(client, &query, !all).await?),
        MedicinesSubcommand::Carer { carer_id } => print_json(&medicines::for_carer(client, carer_id).await?),
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patients_list_defaults_to_unpaginated() {
        let cli = Cli::try_parse_from(["remote-medic", "patients", "list"]).unwrap();
        let Command::Patients(cmd) = cli.command else { panic!("expected patients command") };
        assert!(matches!(cmd.command, PatientsSubcommand::List { page: None, per_page: 10 }));
    }

    #[test]
    fn medicine_args_map_to_record() {
        let cli = Cli::try_parse_from([
            "remote-medic",
            "medicines",
            "create",
            "--name",
            "Aspirin",
            "--dosage",
            "100mg",
            "--every-hours",
            "8",
        ])
        .unwrap();
        let Command::Medicines(MedicinesCommand { command: MedicinesSubcommand::Create(args) }) = cli.command else {
            panic!("expected medicines create");
        };
        let medicine = Medicine::from(args);
        assert_eq!(medicine.frequency_hours, Some(8));
        assert!(medicine.is_active);
        assert!(medicine.validate().is_empty());
    }

    #[test]
    fn only_protected_commands_resolve_the_profile() {
        let parse = |args: &[&str]| Cli::try_parse_from(args).unwrap().command;

        assert!(!needs_profile(&parse(&["remote-medic", "logout"])));
        assert!(!needs_profile(&parse(&["remote-medic", "route", "/patients"])));
        assert!(!needs_profile(&parse(&["remote-medic", "login", "carer1", "--password", "Passw0rd"])));
        assert!(needs_profile(&parse(&["remote-medic", "whoami"])));
        assert!(needs_profile(&parse(&["remote-medic", "patients", "get", "4"])));
        assert!(needs_profile(&parse(&["remote-medic", "medicines", "search", "aspirin"])));
    }

    #[test]
    fn global_flags_parse() {
        let cli = Cli::try_parse_from([
            "remote-medic",
            "--api-url",
            "http://backend:5000/",
            "--session-dir",
            "/tmp/rm",
            "route",
            "/patients/3",
        ])
        .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://backend:5000/"));
        assert_eq!(cli.session_dir, Some(PathBuf::from("/tmp/rm")));
        assert!(matches!(cli.command, Command::Route { ref path } if path == "/patients/3"));
    }
}
