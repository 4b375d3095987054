use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use schooldesk::api::HttpTransport;
use schooldesk::cache::{BulkResult, Filters};
use schooldesk::config::Config;
use schooldesk::school::models::CreateFeePayment;
use schooldesk::school::registry;
use schooldesk::school::{AnyResource, Console};

#[derive(Parser, Debug)]
#[command(name = "schooldesk")]
#[command(about = "Command-line client for the school administration backend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/schooldesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Tenant (school) to act on, overriding api.tenant
  #[arg(short, long)]
  tenant: Option<String>,

  /// Print cache statistics to stderr when done
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List entities of a resource
  List {
    resource: String,
    /// Filter as key=value, repeatable
    #[arg(short, long = "filter", value_parser = parse_filter)]
    filters: Vec<(String, String)>,
  },
  /// Show one entity
  Get { resource: String, id: String },
  /// Delete one entity
  Delete { resource: String, id: String },
  /// Record a fee payment
  Pay {
    #[arg(long)]
    student_fee: String,
    #[arg(long)]
    student: String,
    #[arg(long)]
    amount: f64,
    #[arg(long)]
    method: Option<String>,
  },
  /// Record the fee payments listed in a JSON file
  BulkPay { file: PathBuf },
  /// Print the receipt of a fee payment
  Receipt { id: String },
  /// Generate student fees from a fee structure
  GenerateFees {
    #[arg(long)]
    structure: String,
    #[arg(long = "student", required = true)]
    students: Vec<String>,
  },
  /// Generate the salaries of every staff member for a month
  GenerateSalaries {
    #[arg(long)]
    month: u32,
    #[arg(long)]
    year: i32,
  },
  ApproveLeave { id: String },
  RejectLeave {
    id: String,
    #[arg(long)]
    reason: Option<String>,
  },
  /// Show an employee's leave balance for a year
  LeaveBalance { employee: String, year: i32 },
  ToggleDiscount { id: String },
  /// List available resources
  Resources,
}

fn parse_filter(s: &str) -> std::result::Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected key=value, got '{}'", s)),
  }
}

/// Log to a daily file in the data directory so stdout stays clean.
/// Returns the guard that flushes the writer, or `None` if no log file could
/// be set up.
fn init_tracing() -> Option<WorkerGuard> {
  let log_dir = dirs::data_dir()?.join("schooldesk").join("logs");
  std::fs::create_dir_all(&log_dir).ok()?;
  let appender = RollingFileAppender::builder()
    .rotation(Rotation::DAILY)
    .filename_prefix("schooldesk")
    .filename_suffix("log")
    .build(&log_dir)
    .ok()?;
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter =
    EnvFilter::try_from_env("SCHOOLDESK_LOG").unwrap_or_else(|_| EnvFilter::new("schooldesk=info"));

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(filter)
    .init();
  Some(guard)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

fn print_resources() {
  for def in registry::RESOURCES {
    println!(
      "{:<18} {:<20} {}  ({})",
      def.name,
      def.path,
      def.description,
      def.aliases.join(", ")
    );
  }
}

fn report_bulk<T: Serialize>(result: &BulkResult<T>) -> Result<()> {
  if result.is_partial() {
    warn!(failed = result.failed.len(), total = result.total(), "bulk partially failed");
    eprintln!("{} of {} items failed", result.failed.len(), result.total());
  }
  print_json(result)
}

/// Resolve a resource by exact name or alias. Near misses are reported with
/// suggestions instead of being guessed, since `delete` goes through here.
fn lookup<'a>(console: &'a Console, name: &str) -> Result<&'a dyn AnyResource> {
  let Some(def) = registry::find_exact(name) else {
    let suggestions: Vec<&str> = registry::get_suggestions(name).iter().map(|d| d.name).collect();
    if suggestions.is_empty() {
      return Err(eyre!(
        "Unknown resource '{}'. Run `schooldesk resources` to see the available ones.",
        name
      ));
    }
    return Err(eyre!(
      "Unknown resource '{}'. Did you mean: {}?",
      name,
      suggestions.join(", ")
    ));
  };
  console
    .resource(def.name)
    .ok_or_else(|| eyre!("Resource '{}' is not available", def.name))
}

fn read_payments(path: &Path) -> Result<Vec<CreateFeePayment>> {
  let contents = std::fs::read_to_string(path)
    .map_err(|e| eyre!("Failed to read {}: {}", path.display(), e))?;
  serde_json::from_str(&contents).map_err(|e| eyre!("Failed to parse {}: {}", path.display(), e))
}

async fn run(console: &Console, command: Command) -> Result<()> {
  match command {
    Command::List { resource, filters } => {
      let filters: Filters = filters.into_iter().collect();
      let items = lookup(console, &resource)?.list_value(filters).await?;
      print_json(&items)
    }
    Command::Get { resource, id } => match lookup(console, &resource)?.detail_value(id.clone()).await? {
      Some(entity) => print_json(&entity),
      None => Err(eyre!("No {} with id '{}'", resource, id)),
    },
    Command::Delete { resource, id } => {
      lookup(console, &resource)?.delete(id.clone()).await?;
      println!("Deleted {} {}", resource, id);
      Ok(())
    }
    Command::Pay {
      student_fee,
      student,
      amount,
      method,
    } => {
      let input = CreateFeePayment {
        student_fee_id: student_fee,
        student_id: student,
        amount,
        payment_method: method,
        payment_date: None,
        remarks: None,
      };
      let payment = console.fee_payments.create_payment(&input).await?;
      print_json(&payment)
    }
    Command::BulkPay { file } => {
      let payments = read_payments(&file)?;
      let result = console.fee_payments.bulk_create_payments(&payments).await?;
      report_bulk(&result)
    }
    Command::Receipt { id } => {
      let receipt = console.fee_payments.generate_receipt(&id).await?;
      print_json(&receipt.data)
    }
    Command::GenerateFees { structure, students } => {
      let result = console.student_fees.bulk_generate(&structure, &students).await?;
      report_bulk(&result)
    }
    Command::GenerateSalaries { month, year } => {
      if !(1..=12).contains(&month) {
        return Err(eyre!("month must be between 1 and 12, got {}", month));
      }
      let result = console.salaries.generate_all(month, year).await?;
      report_bulk(&result)
    }
    Command::ApproveLeave { id } => print_json(&console.leaves.approve(&id).await?),
    Command::RejectLeave { id, reason } => {
      print_json(&console.leaves.reject(&id, reason.as_deref()).await?)
    }
    Command::LeaveBalance { employee, year } => {
      print_json(&console.leaves.balance(&employee, year).await?.data)
    }
    Command::ToggleDiscount { id } => print_json(&console.student_discounts.toggle(&id).await?),
    Command::Resources => {
      print_resources();
      Ok(())
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  if let Command::Resources = args.command {
    print_resources();
    return Ok(());
  }

  let _guard = init_tracing();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;

  // Override tenant if specified on command line
  if let Some(tenant) = args.tenant {
    config.api.tenant = Some(tenant);
  }

  let token = Config::get_api_token()?;
  let transport = HttpTransport::new(&config.api, Some(token))?;
  let console = Console::new(Arc::new(transport), config.cache.store());
  info!(url = %config.api.url, tenant = ?config.api.tenant, "schooldesk starting");

  run(&console, args.command).await?;

  if args.verbose {
    eprintln!("{:?}", console.store().stats());
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use schooldesk::cache::CacheStore;
  use schooldesk::config::ApiConfig;

  fn console() -> Console {
    let config = ApiConfig {
      url: "http://localhost:3000".to_string(),
      tenant: None,
      timeout_secs: 5,
    };
    let transport = HttpTransport::new(&config, None).unwrap();
    Console::new(Arc::new(transport), CacheStore::new())
  }

  #[test]
  fn test_lookup_requires_exact_name_or_alias() {
    let console = console();
    assert_eq!(lookup(&console, "fees").unwrap().name(), "studentFees");
    assert_eq!(lookup(&console, "feePayments").unwrap().name(), "feePayments");

    let err = lookup(&console, "fee").err().unwrap();
    assert!(err.to_string().contains("Did you mean"), "{}", err);
    assert!(err.to_string().contains("feeCategories"), "{}", err);
    assert!(lookup(&console, "pay").is_err());
    assert!(lookup(&console, "xyz").err().unwrap().to_string().contains("schooldesk resources"));
  }

  #[test]
  fn test_parse_filter() {
    assert_eq!(parse_filter("studentId=S1"), Ok(("studentId".to_string(), "S1".to_string())));
    assert!(parse_filter("=S1").is_err());
    assert!(parse_filter("studentId").is_err());
  }
}
