mod cache;
mod config;
mod context;
mod event;
mod farm;
mod logging;
mod offline;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use cache::{CacheSource, EntityKind};
use context::AppContext;
use farm::{FarmState, Gender, NewHutch, NewRabbit, NewRow, RemovalRequest, SyncOutcome};
use offline::{
  ClickOutcome, Destination, Notification, NotificationClick, Notifier, PushPayload, Request,
};

#[derive(Parser, Debug)]
#[command(name = "warren")]
#[command(about = "Offline cache and record sync for a rabbit farm")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/warren/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Farm id to use instead of the configured one
  #[arg(short, long, global = true)]
  farm: Option<String>,

  /// Keep every store in memory for this run only
  #[arg(long, global = true)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Install the current offline store and activate it
  Install,
  /// List offline response stores
  Stores,
  /// Fetch a URL through the offline controller
  Fetch {
    url: Url,
    /// Treat the request as a page navigation
    #[arg(long, conflicts_with = "image")]
    document: bool,
    /// Treat the request as an image
    #[arg(long)]
    image: bool,
  },
  /// Reconcile local snapshots with the server
  Sync {
    /// rabbits, hutches, rows, removals or breedings (default: all)
    kind: Option<String>,
  },
  /// Print a local snapshot without contacting the server
  Show { kind: String },
  /// Check whether two rabbits can be bred, optionally recording the mating
  Breed {
    doe: String,
    buck: String,
    /// Mating date (default: today)
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Record the mating on the server if the pair is compatible
    #[arg(long)]
    record: bool,
  },
  /// Pregnancy dates for a mating date
  Due { mating_date: NaiveDate },
  /// Show a push notification from a JSON payload
  Push { payload: String },
  /// Simulate a click on a notification targeting `url`
  Click {
    url: String,
    #[arg(long)]
    action: Option<String>,
  },
  #[command(subcommand)]
  Rabbit(RabbitCommand),
  #[command(subcommand)]
  Hutch(HutchCommand),
  #[command(subcommand)]
  Row(RowCommand),
}

#[derive(Subcommand, Debug)]
enum RabbitCommand {
  /// Add a rabbit
  Add {
    id: String,
    #[arg(long, value_enum)]
    gender: GenderArg,
    #[arg(long)]
    breed: String,
    #[arg(long)]
    born: NaiveDate,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    father: Option<String>,
    #[arg(long)]
    mother: Option<String>,
    #[arg(long)]
    hutch: Option<String>,
  },
  /// Record a rabbit leaving the farm
  Remove {
    id: String,
    /// sold, died, culled, ...
    #[arg(long)]
    reason: String,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    date: Option<NaiveDate>,
    #[arg(long)]
    sale_amount: Option<f64>,
  },
}

#[derive(Subcommand, Debug)]
enum HutchCommand {
  Add {
    id: String,
    #[arg(long)]
    row: String,
    #[arg(long)]
    level: String,
    #[arg(long)]
    position: u32,
    #[arg(long)]
    size: Option<String>,
    #[arg(long)]
    material: Option<String>,
    #[arg(long = "feature")]
    features: Vec<String>,
  },
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum RowCommand {
  Add {
    name: String,
    #[arg(long)]
    capacity: u32,
    #[arg(long = "level")]
    levels: Vec<String>,
    #[arg(long)]
    description: Option<String>,
  },
  Delete { name: String },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum GenderArg {
  Doe,
  Buck,
}

impl From<GenderArg> for Gender {
  fn from(arg: GenderArg) -> Self {
    match arg {
      GenderArg::Doe => Gender::Doe,
      GenderArg::Buck => Gender::Buck,
    }
  }
}

/// Shows notifications on stdout.
struct PrintNotifier;

impl Notifier for PrintNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    println!("[{}] {}", notification.title, notification.body);
    if let Some(url) = &notification.url {
      println!("  -> {}", url);
    }
    let actions: Vec<&str> = notification
      .actions
      .iter()
      .map(|a| a.title.as_str())
      .collect();
    println!("  actions: {}", actions.join(" | "));
    Ok(())
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(config.log_file.as_deref())?;

  // Override farm if specified on command line
  let config = if let Some(farm_id) = args.farm {
    config::Config { farm_id, ..config }
  } else {
    config
  };

  let mut ctx = AppContext::new(config, args.ephemeral, Arc::new(PrintNotifier))?;
  run(&ctx, args.command).await?;

  for event in ctx.events.drain() {
    tracing::debug!(?event, "lifecycle");
  }
  Ok(())
}

async fn run(ctx: &AppContext, command: Command) -> Result<()> {
  let today = Local::now().date_naive();

  match command {
    Command::Install => {
      let report = ctx.boot(true).await?;
      if let Some(install) = report.install {
        match &install.essential_error {
          None => println!("Essential files cached"),
          Some(e) => println!("Essential files skipped: {}", e),
        }
        println!(
          "Optional files: {} cached, {} failed",
          install.optional_cached.len(),
          install.optional_failed.len()
        );
      }
      for name in &report.purge.deleted {
        println!("Deleted stale store {}", name);
      }
      for name in &report.purge.failed {
        println!("Could not delete stale store {}", name);
      }
      println!("Active store: {}", ctx.controller.current_store());
    }
    Command::Stores => {
      let current = ctx.controller.current_store();
      for name in ctx.controller.list_stores()? {
        let marker = if name == current { "*" } else { " " };
        println!("{} {}", marker, name);
      }
    }
    Command::Fetch {
      url,
      document,
      image,
    } => {
      ctx.boot(false).await?;
      let request = if document {
        Request::navigate(url)
      } else if image {
        Request::get(url, Destination::Image)
      } else {
        let destination = Destination::from_path(url.path());
        Request::get(url, destination)
      };
      let response = ctx.controller.handle(request).await?;
      let content_type = response.content_type.as_deref().unwrap_or("-");
      println!(
        "{} {} ({} bytes)",
        response.status,
        content_type,
        response.body.len()
      );
      if content_type.starts_with("text/") {
        println!("{}", response.text());
      }
    }
    Command::Sync { kind } => {
      ctx.boot(false).await?;
      let mut state = ctx.farm.load();
      println!("Farm {}", ctx.farm.farm_id());
      let outcomes = match kind {
        Some(kind) => vec![ctx.farm.sync(parse_kind(&kind)?, &mut state).await],
        None => ctx.farm.sync_all(&mut state).await,
      };
      for outcome in &outcomes {
        print_outcome(outcome);
      }
    }
    Command::Show { kind } => {
      let state = ctx.farm.load();
      print_kind(&state, parse_kind(&kind)?);
    }
    Command::Breed {
      doe,
      buck,
      date,
      record,
    } => {
      let mut state = ctx.farm.load();
      let mating_date = date.unwrap_or(today);
      let compatibility = ctx.farm.check_breeding(&state, &doe, &buck, mating_date)?;
      if !compatibility.is_compatible() {
        println!("Not compatible: {}", compatibility.messages().join(", "));
        return Ok(());
      }
      println!("{} and {} are compatible", doe, buck);

      if record {
        ctx.boot(false).await?;
        let breeding = ctx
          .farm
          .record_breeding(&mut state, &doe, &buck, mating_date)
          .await?;
        println!(
          "Recorded breeding {}; kindling expected {}",
          breeding.id, breeding.expected_birth_date
        );
      }
    }
    Command::Due { mating_date } => {
      let schedule = ctx.farm.schedule(mating_date);
      println!("Mated:             {}", schedule.mating_date);
      println!("Expected kindling: {}", schedule.expected_kindling);
      println!("Nest box by:       {}", schedule.nest_box);
      println!("Days remaining:    {}", schedule.days_remaining(today));
    }
    Command::Push { payload } => {
      if ctx.controller.handle_push(payload.as_bytes()).is_none() {
        return Err(eyre!("Push payload was not shown"));
      }
    }
    Command::Click { url, action } => {
      ctx.boot(false).await?;
      let notification = Notification::from_payload(PushPayload {
        body: String::new(),
        id: None,
        url: Some(url),
        title: None,
      });
      match ctx
        .controller
        .handle_notification_click(NotificationClick {
          action,
          notification,
        }) {
        ClickOutcome::Dismissed => println!("Dismissed"),
        ClickOutcome::Focused { client, url } => println!("Focused window {} at {}", client, url),
        ClickOutcome::Opened { client, url } => println!("Opened window {} at {}", client, url),
      }
    }
    Command::Rabbit(command) => {
      ctx.boot(false).await?;
      let mut state = ctx.farm.load();
      match command {
        RabbitCommand::Add {
          id,
          gender,
          breed,
          born,
          name,
          father,
          mother,
          hutch,
        } => {
          let rabbit = ctx
            .farm
            .add_rabbit(
              &mut state,
              NewRabbit {
                rabbit_id: id,
                name,
                gender: gender.into(),
                breed,
                birth_date: born,
                father_id: father,
                mother_id: mother,
                hutch_id: hutch,
              },
            )
            .await?;
          println!("Added rabbit {}", rabbit.label());
        }
        RabbitCommand::Remove {
          id,
          reason,
          notes,
          date,
          sale_amount,
        } => {
          let removal = RemovalRequest {
            reason,
            notes,
            date: date.unwrap_or(today),
            sale_amount,
          };
          let record = ctx.farm.remove_rabbit(&mut state, &id, removal).await?;
          println!("Removed {} ({})", record.rabbit_id, record.reason);
        }
      }
    }
    Command::Hutch(command) => {
      ctx.boot(false).await?;
      let mut state = ctx.farm.load();
      match command {
        HutchCommand::Add {
          id,
          row,
          level,
          position,
          size,
          material,
          features,
        } => {
          let hutch = ctx
            .farm
            .add_hutch(
              &mut state,
              NewHutch {
                id,
                row_name: row,
                level,
                position,
                size,
                material,
                features,
              },
            )
            .await?;
          println!("Added hutch {} in row {}", hutch.id, hutch.row_name);
        }
        HutchCommand::Delete { id } => {
          ctx.farm.delete_hutch(&mut state, &id).await?;
          println!("Deleted hutch {}", id);
        }
      }
    }
    Command::Row(command) => {
      ctx.boot(false).await?;
      let mut state = ctx.farm.load();
      match command {
        RowCommand::Add {
          name,
          capacity,
          levels,
          description,
        } => {
          let row = ctx
            .farm
            .add_row(
              &mut state,
              NewRow {
                name,
                description,
                capacity,
                levels,
              },
            )
            .await?;
          println!("Added row {} ({} hutches)", row.name, row.capacity);
        }
        RowCommand::Delete { name } => {
          ctx.farm.delete_row(&mut state, &name).await?;
          println!("Deleted row {}", name);
        }
      }
    }
  }

  Ok(())
}

fn parse_kind(kind: &str) -> Result<EntityKind> {
  EntityKind::parse(kind).ok_or_else(|| {
    let known: Vec<&str> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
    eyre!("Unknown kind '{}', expected one of: {}", kind, known.join(", "))
  })
}

fn print_outcome(outcome: &SyncOutcome) {
  match outcome.source {
    CacheSource::Network => println!("{:<10} {} synced", outcome.kind, outcome.count),
    CacheSource::Snapshot => {
      let saved = outcome
        .saved_at
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "never".to_string());
      println!(
        "{:<10} {} from snapshot saved {} ({})",
        outcome.kind,
        outcome.count,
        saved,
        outcome.error.as_deref().unwrap_or("unknown error")
      );
    }
  }
}

fn print_kind(state: &FarmState, kind: EntityKind) {
  match kind {
    EntityKind::Rabbits => {
      for r in &state.rabbits {
        let pregnant = if r.is_pregnant { " pregnant" } else { "" };
        println!(
          "{:<24} {:<5} {:<20} born {} hutch {}{}",
          r.label(),
          r.gender,
          r.breed,
          r.birth_date,
          r.hutch_id.as_deref().unwrap_or("-"),
          pregnant
        );
      }
    }
    EntityKind::Hutches => {
      for h in &state.hutches {
        let occupied = if h.is_occupied { "occupied" } else { "free" };
        println!(
          "{:<8} row {} level {} #{} {}",
          h.id, h.row_name, h.level, h.position, occupied
        );
      }
    }
    EntityKind::Rows => {
      for r in &state.rows {
        println!(
          "{:<12} capacity {} levels {}",
          r.name,
          r.capacity,
          r.levels.join(",")
        );
      }
    }
    EntityKind::Removals => {
      for r in &state.removals {
        println!("{} {:<12} {}", r.date, r.rabbit_id, r.reason);
      }
    }
    EntityKind::Breedings => {
      for b in &state.breedings {
        let kits = b
          .number_of_kits
          .map(|n| format!("{} kits", n))
          .unwrap_or_else(|| "pending".to_string());
        println!(
          "{:<6} {} x {} mated {} due {} {}",
          b.id, b.doe_id, b.buck_id, b.mating_date, b.expected_birth_date, kits
        );
      }
    }
  }
  if state.len(kind) == 0 {
    println!("No {} saved locally", kind);
  }
}
