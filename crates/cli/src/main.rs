use anyhow::Context;
use api_shared::{JournalEntryReq, JournalEntryRes, PatientReq, PatientRes};
use clap::{Args, Parser, Subcommand};
use journal_core::{CoreConfig, JournalEntryData, PatientData, QueryService, RecordId, RecordKind};
use journal_messaging::channel::{HEADER_COMMAND_ID, HEADER_EVENT_TYPE};
use journal_messaging::{Accepted, MessagingConfig, Pipeline};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "journal")]
#[command(about = "Patient journal CLI")]
struct Cli {
    /// Directory holding the record store (in-memory when omitted)
    #[arg(long, global = true, env = "JOURNAL_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Patient records
    #[command(subcommand)]
    Patients(PatientCommands),
    /// Journal entries
    #[command(subcommand)]
    Journal(JournalCommands),
}

#[derive(Subcommand)]
enum PatientCommands {
    /// List all patients
    List,
    /// Show one patient
    Get { id: i64 },
    /// Submit a CREATE command
    Create(PatientArgs),
    /// Submit an UPDATE command
    Update {
        id: i64,
        #[command(flatten)]
        patient: PatientArgs,
    },
    /// Submit a DELETE command (also deletes the patient's journal entries)
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum JournalCommands {
    /// List journal entries, newest first when filtered by patient
    List {
        #[arg(long)]
        patient: Option<i64>,
    },
    /// Submit a CREATE command
    Create(JournalArgs),
    /// Submit an UPDATE command
    Update {
        id: i64,
        #[command(flatten)]
        entry: JournalArgs,
    },
    /// Submit a DELETE command
    Delete { id: i64 },
}

#[derive(Args)]
struct PatientArgs {
    #[arg(long)]
    first_name: String,
    #[arg(long)]
    last_name: String,
    #[arg(long)]
    personal_number: String,
    /// Date of birth (YYYY-MM-DD)
    #[arg(long)]
    date_of_birth: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone_number: Option<String>,
    #[arg(long)]
    address: Option<String>,
}

impl TryFrom<PatientArgs> for PatientData {
    type Error = journal_core::RecordError;

    fn try_from(args: PatientArgs) -> Result<Self, Self::Error> {
        PatientData::try_from(PatientReq {
            first_name: args.first_name,
            last_name: args.last_name,
            personal_number: args.personal_number,
            date_of_birth: args.date_of_birth,
            email: args.email,
            phone_number: args.phone_number,
            address: args.address,
        })
    }
}

#[derive(Args)]
struct JournalArgs {
    #[arg(long)]
    patient: i64,
    #[arg(long)]
    note: String,
    #[arg(long)]
    diagnosis: Option<String>,
    #[arg(long)]
    treatment: Option<String>,
}

impl TryFrom<JournalArgs> for JournalEntryData {
    type Error = journal_core::RecordError;

    fn try_from(args: JournalArgs) -> Result<Self, Self::Error> {
        JournalEntryData::try_from(JournalEntryReq {
            patient_id: args.patient,
            note: args.note,
            diagnosis: args.diagnosis,
            treatment: args.treatment,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("Use 'journal --help' for commands");
        return Ok(());
    };

    let core = match cli.data_dir {
        Some(dir) => CoreConfig::with_data_dir(dir)?,
        None => CoreConfig::in_memory(),
    };
    let store = Arc::new(core.open_store().context("opening record store")?);
    let query = QueryService::new(store.clone());

    match command {
        Commands::Patients(PatientCommands::List) => {
            let patients = query.patients();
            if patients.is_empty() {
                println!("No patients found.");
            }
            for patient in patients {
                println!(
                    "ID: {}, Name: {}, Personal number: {}",
                    patient.id,
                    patient.full_name(),
                    patient.personal_number
                );
            }
        }
        Commands::Patients(PatientCommands::Get { id }) => {
            let patient = query.patient(RecordId::new(id)?)?;
            print_json(&PatientRes::from(patient))?;
        }
        Commands::Journal(JournalCommands::List { patient }) => {
            let entries = match patient {
                Some(id) => query.journal_entries_for_patient(RecordId::new(id)?)?,
                None => query.journal_entries(),
            };
            if entries.is_empty() {
                println!("No journal entries found.");
            }
            for entry in entries {
                print_json(&JournalEntryRes::from(entry))?;
            }
        }
        mutation => {
            let pipeline = Pipeline::start(store, MessagingConfig::from_lookup(env_var)?)?;
            let accepted = submit(&pipeline, mutation).await;
            let settled = pipeline.settle(SETTLE_TIMEOUT).await;
            if let (Ok(accepted), Ok(())) = (&accepted, &settled) {
                report(&pipeline, accepted)?;
            }
            pipeline.shutdown().await;
            accepted?;
            settled?;
        }
    }

    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

async fn submit(pipeline: &Pipeline, command: Commands) -> anyhow::Result<Accepted> {
    let patients = pipeline.patient_commands();
    let journal = pipeline.journal_commands();
    let accepted = match command {
        Commands::Patients(PatientCommands::Create(args)) => {
            patients.create(args.try_into()?).await?
        }
        Commands::Patients(PatientCommands::Update { id, patient }) => {
            patients.update(RecordId::new(id)?, patient.try_into()?).await?
        }
        Commands::Patients(PatientCommands::Delete { id }) => {
            patients.delete(RecordId::new(id)?).await?
        }
        Commands::Journal(JournalCommands::Create(args)) => {
            journal.create(args.try_into()?).await?
        }
        Commands::Journal(JournalCommands::Update { id, entry }) => {
            journal.update(RecordId::new(id)?, entry.try_into()?).await?
        }
        Commands::Journal(JournalCommands::Delete { id }) => {
            journal.delete(RecordId::new(id)?).await?
        }
        Commands::Patients(PatientCommands::List | PatientCommands::Get { .. })
        | Commands::Journal(JournalCommands::List { .. }) => {
            anyhow::bail!("not a mutation")
        }
    };
    println!(
        "Command {} accepted on {} (partition {}, offset {})",
        accepted.command_id, accepted.topic, accepted.partition, accepted.offset
    );
    Ok(accepted)
}

/// Print the events the command produced, or say that it produced none.
fn report(pipeline: &Pipeline, accepted: &Accepted) -> anyhow::Result<()> {
    let command_id = accepted.command_id.to_string();
    let mut produced = 0;
    for kind in [RecordKind::Patient, RecordKind::JournalEntry] {
        let topic = pipeline.config().topics.events(kind);
        for event in pipeline.broker().messages(topic)? {
            if event.header(HEADER_COMMAND_ID) != Some(command_id.as_str()) {
                continue;
            }
            produced += 1;
            println!(
                "{} {} key={}",
                topic,
                event.header(HEADER_EVENT_TYPE).unwrap_or("?"),
                event.key.as_deref().unwrap_or("-")
            );
            if let Some(state) = event.json() {
                print_json(&state)?;
            }
        }
    }
    if produced == 0 {
        println!("Command {command_id} changed nothing; it was rejected or failed (see log output).");
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
