//! smartband: command-line front end for smartband-daemon.
//!
//! Stands in for the voice front end: each `say` is one utterance in a
//! conversation, and the daemon's spoken reply is printed to stdout.
//!
//! ## Subcommands
//!
//! - `say`: Send one operation (and optional value) within a conversation
//! - `end`: End a conversation, discarding its identity and device
//! - `report`: Publish reported fields for a band, as the band would
//! - `register`: Add a band to a user's catalog
//! - `shadow`: Print a band's stored shadow document
//! - `health`: Check that the daemon is up

mod daemon_client;
mod fields;
mod logging;

use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use smartband_daemon_protocol::Method;

#[derive(Parser)]
#[command(name = "smartband")]
#[command(about = "Talk to your SmartBand through the local daemon")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one command, e.g. `say identify-user ana` or `say read-heart-rate`
    Say {
        /// Operation name (identify-user, select-device, read-steps, ...)
        #[arg(value_name = "OPERATION")]
        operation: String,

        /// Slot value: username, device nickname, or threshold
        #[arg(value_name = "VALUE")]
        value: Option<String>,

        /// Conversation to continue
        #[arg(long, default_value = "cli")]
        conversation: String,

        /// Print the full reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// End a conversation
    End {
        #[arg(long, default_value = "cli")]
        conversation: String,
    },

    /// Publish reported fields for a band (e.g. heart_rate=72 steps=1200)
    Report {
        #[arg(value_name = "PHYSICAL_ID")]
        physical_id: String,

        #[arg(value_name = "KEY=VALUE", required = true)]
        fields: Vec<String>,
    },

    /// Register a band under a user's catalog
    Register {
        #[arg(value_name = "USER")]
        user: String,

        #[arg(value_name = "NICKNAME")]
        nickname: String,

        #[arg(value_name = "PHYSICAL_ID")]
        physical_id: String,
    },

    /// Print a band's shadow document
    Shadow {
        #[arg(value_name = "PHYSICAL_ID")]
        physical_id: String,
    },

    /// Check daemon health
    Health,
}

fn main() {
    let _logging_guard = logging::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli.command) {
        tracing::error!(error = %err, "smartband command failed");
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

fn run(command: Commands) -> Result<(), String> {
    match command {
        Commands::Say {
            operation,
            value,
            conversation,
            json: as_json,
        } => {
            let data = daemon_client::call(
                Method::Command,
                Some(json!({
                    "conversation_id": conversation,
                    "operation": operation,
                    "value": value,
                })),
            )?;
            if as_json {
                print_json(&data)
            } else {
                println!("{}", text_field(&data, "message"));
                Ok(())
            }
        }
        Commands::End { conversation } => {
            let data = daemon_client::call(
                Method::EndConversation,
                Some(json!({ "conversation_id": conversation })),
            )?;
            println!("{}", text_field(&data, "message"));
            Ok(())
        }
        Commands::Report {
            physical_id,
            fields,
        } => {
            let reported = fields::parse_fields(&fields)?;
            let data = daemon_client::call(
                Method::ReportState,
                Some(json!({
                    "physical_id": physical_id,
                    "recorded_at": Utc::now().to_rfc3339(),
                    "reported": reported,
                })),
            )?;
            print_json(&data)
        }
        Commands::Register {
            user,
            nickname,
            physical_id,
        } => {
            let data = daemon_client::call(
                Method::RegisterDevice,
                Some(json!({
                    "user": user,
                    "nickname": nickname,
                    "physical_id": physical_id,
                })),
            )?;
            print_json(&data)
        }
        Commands::Shadow { physical_id } => {
            let data = daemon_client::call_with_retry(
                Method::GetShadow,
                Some(json!({ "physical_id": physical_id })),
            )?;
            print_json(&data)
        }
        Commands::Health => {
            let data = daemon_client::call_with_retry(Method::GetHealth, None)?;
            print_json(&data)
        }
    }
}

fn text_field<'a>(data: &'a Value, key: &str) -> &'a str {
    data.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn print_json(data: &Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(data)
        .map_err(|err| format!("Failed to format response: {}", err))?;
    println!("{}", text);
    Ok(())
}
