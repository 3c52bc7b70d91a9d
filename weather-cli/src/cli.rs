use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, Utc};
use clap::{Args, Parser, Subcommand};
use inquire::{Confirm, CustomType, Password, PasswordDisplayMode, Select, Text};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use weather_core::{
    CityId, Config, DataResult, RefreshTarget, Units, WeatherResult, WeatherSnapshot,
    pipeline::ScheduleStore,
};

use crate::app::App;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather store and background refresh daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactively set the API key, units, language and location.
    Configure,

    /// Show a stored snapshot (the latest one by default).
    Show {
        #[arg(long)]
        id: Option<CityId>,
    },

    /// List every stored snapshot.
    List,

    /// Fetch fresh weather and store it.
    Refresh(RefreshArgs),

    /// Delete stored snapshots.
    Delete(DeleteArgs),

    /// Run the scheduled refresh pipeline until Ctrl-C.
    Daemon,

    /// Queue a refresh chain due immediately.
    RunNow,

    /// Cancel pending refresh chains.
    Cancel,

    /// Show schedule and store status.
    Status,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct RefreshArgs {
    /// Use the configured current location.
    #[arg(long)]
    here: bool,

    #[arg(long)]
    city_id: Option<CityId>,

    #[arg(long)]
    city_name: Option<String>,
}

impl RefreshArgs {
    fn target(self) -> RefreshTarget {
        match (self.here, self.city_id, self.city_name) {
            (false, Some(id), _) => RefreshTarget::CityId(id),
            (false, None, Some(name)) => RefreshTarget::CityName(name),
            _ => RefreshTarget::CurrentLocation,
        }
    }
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct DeleteArgs {
    #[arg(long)]
    id: Option<CityId>,

    /// Delete every stored snapshot.
    #[arg(long)]
    all: bool,
}

impl Cli {
    pub async fn run(self, config: Config) -> Result<()> {
        match self.command {
            Command::Configure => configure(config),
            Command::Show { id } => show(&App::open(config)?, id).await,
            Command::List => list(&App::open(config)?).await,
            Command::Refresh(args) => refresh(&App::open(config)?, args.target()).await,
            Command::Delete(args) => delete(&App::open(config)?, args).await,
            Command::Daemon => daemon(&App::open(config)?).await,
            Command::RunNow => {
                let app = App::open(config)?;
                app.require_api_key()?;
                let id = app.scheduler()?.run_now().await?;
                println!("Queued refresh chain #{id}; a running daemon will pick it up.");
                Ok(())
            }
            Command::Cancel => {
                let cancelled = App::open(config)?.scheduler()?.cancel().await?;
                println!("Cancelled {cancelled} pending chain(s).");
                Ok(())
            }
            Command::Status => status(&App::open(config)?).await,
        }
    }
}

fn configure(mut config: Config) -> Result<()> {
    let hint = config
        .api
        .api_key
        .as_deref()
        .map(|key| format!("Leave empty to keep the saved key ({})", mask_key(key)));
    let mut prompt = Password::new("OpenWeather API key:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .without_confirmation();
    if let Some(hint) = &hint {
        prompt = prompt.with_help_message(hint);
    }
    let entered = prompt.prompt().context("Failed to read API key")?;
    let api_key = resolve_api_key(&entered, config.api.api_key.as_deref())?;
    config.set_api_key(api_key);

    let units_start = Units::all().iter().position(|u| *u == config.api.units).unwrap_or(1);
    config.api.units = Select::new("Units:", Units::all().to_vec())
        .with_starting_cursor(units_start)
        .prompt()
        .context("Failed to read units")?;

    let lang = Text::new("Language code:")
        .with_default(&config.api.lang)
        .prompt()
        .context("Failed to read language")?;
    config.api.lang = lang.trim().to_string();

    let fixed = Confirm::new("Use fixed coordinates as the current location?")
        .with_default(config.location.fixed_coordinates().is_some())
        .prompt()
        .context("Failed to read location choice")?;
    if fixed {
        let latitude = CustomType::<f64>::new("Latitude:")
            .with_error_message("Please enter a number")
            .prompt()
            .context("Failed to read latitude")?;
        let longitude = CustomType::<f64>::new("Longitude:")
            .with_error_message("Please enter a number")
            .prompt()
            .context("Failed to read longitude")?;
        config.location.latitude = Some(latitude);
        config.location.longitude = Some(longitude);
    } else {
        config.location.latitude = None;
        config.location.longitude = None;
    }

    config.validate()?;
    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

async fn show(app: &App, id: Option<CityId>) -> Result<()> {
    let repo = app.repository();
    let result = match id {
        Some(id) => repo.get_by_id(id).await,
        None => repo.get_latest().await,
    };

    match result {
        DataResult::Success(snapshot) => print_snapshot(&snapshot, app.config().api.units),
        DataResult::Empty => match id {
            Some(id) => println!("No stored weather for city #{id}."),
            None => println!("No stored weather yet. Try `weather refresh --here`."),
        },
        DataResult::Error(message) => bail!(message),
    }
    Ok(())
}

async fn list(app: &App) -> Result<()> {
    match app.repository().get_all().await {
        DataResult::Success(snapshots) => {
            for snapshot in &snapshots {
                print_summary(snapshot, app.config().api.units);
            }
        }
        DataResult::Empty => println!("No stored weather yet."),
        DataResult::Error(message) => bail!(message),
    }
    Ok(())
}

async fn refresh(app: &App, target: RefreshTarget) -> Result<()> {
    app.require_api_key()?;

    let cancel = CancellationToken::new();
    let repo = app.repository();
    let handle = repo.spawn_refresh(target, cancel.clone());
    let abort = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    let result = tokio::select! {
        res = handle => res.context("Refresh task failed")?,
        _ = abort => {
            cancel.cancel();
            bail!("Refresh cancelled");
        }
    };

    match result {
        DataResult::Success(snapshot) => print_snapshot(&snapshot, app.config().api.units),
        DataResult::Empty => println!("No weather data returned."),
        DataResult::Error(message) => bail!(message),
    }
    Ok(())
}

async fn delete(app: &App, args: DeleteArgs) -> Result<()> {
    let repo = app.repository();
    if args.all {
        match repo.delete_all().await {
            DataResult::Success(removed) => println!("Deleted {removed} snapshot(s)."),
            DataResult::Empty => println!("Nothing to delete."),
            DataResult::Error(message) => bail!(message),
        }
        return Ok(());
    }

    let Some(id) = args.id else {
        bail!("Pass --id <CITY_ID> or --all");
    };
    match repo.delete_by_id(id).await {
        DataResult::Success(()) => println!("Deleted city #{id}."),
        DataResult::Empty => println!("No stored weather for city #{id}."),
        DataResult::Error(message) => bail!(message),
    }
    Ok(())
}

/// A fresh entry wins; an empty one keeps the saved key.
fn resolve_api_key(entered: &str, saved: Option<&str>) -> Result<String> {
    let entered = entered.trim();
    if !entered.is_empty() {
        return Ok(entered.to_string());
    }
    match saved.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => Ok(key.to_string()),
        None => bail!("API key cannot be empty"),
    }
}

/// Stars for all but the last four characters; short keys are hidden entirely.
fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    let shown = if chars.len() > 8 { 4 } else { 0 };
    let hidden = chars.len() - shown;
    let tail: String = chars[hidden..].iter().collect();
    format!("{}{tail}", "*".repeat(hidden))
}

async fn daemon(app: &App) -> Result<()> {
    app.require_api_key()?;

    let scheduler = app.scheduler()?;
    let shutdown = CancellationToken::new();
    let runner = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    let mut updates = app.repository().subscribe();
    let feed = tokio::spawn(async move {
        while let Some(event) = updates.recv().await {
            tracing::debug!(?event, "Store updated");
        }
    });
    tracing::info!("Refresh daemon started; press Ctrl-C to stop");

    let ctrl_c = async { tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C") };
    let result = supervise(runner, shutdown, ctrl_c).await;
    feed.abort();
    result?;

    tracing::info!("Refresh daemon stopped");
    Ok(())
}

/// Wait for `stop`, then shut the scheduler down and wait for it.
///
/// Fails straight away if the scheduler task ends first.
async fn supervise<F>(
    mut runner: JoinHandle<WeatherResult<()>>,
    shutdown: CancellationToken,
    stop: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::select! {
        stopped = stop => {
            shutdown.cancel();
            runner.await.context("Scheduler task failed")??;
            stopped
        }
        finished = &mut runner => {
            shutdown.cancel();
            finished.context("Scheduler task failed")??;
            bail!("Scheduler stopped before shutdown was requested")
        }
    }
}

async fn status(app: &App) -> Result<()> {
    let schedule = app.schedule()?;
    let pending = schedule.pending_count()?;
    let next = schedule.next_pending()?;

    println!("Pending chains: {pending}");
    if let Some(chain) = next {
        println!("Next chain:     #{} at {} ({})", chain.id, local(chain.next_run_at), chain.stage);
        if let Some(error) = chain.last_error {
            println!("Last error:     {error}");
        }
    }

    match app.repository().get_latest().await {
        DataResult::Success(snapshot) => {
            println!("Latest city:    {} (#{})", snapshot.display_name(), snapshot.id);
        }
        DataResult::Empty => println!("Latest city:    none stored"),
        DataResult::Error(message) => println!("Latest city:    unavailable ({message})"),
    }
    Ok(())
}

fn local(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

fn print_summary(snapshot: &WeatherSnapshot, units: Units) {
    let temp = snapshot
        .main
        .as_ref()
        .map(|m| format!("{:.1}{}", m.temp, units.temperature_suffix()))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "{:>10}  {:<24} {:>8}  {}",
        snapshot.id,
        snapshot.display_name(),
        temp,
        snapshot.headline().unwrap_or("-")
    );
}

fn print_snapshot(snapshot: &WeatherSnapshot, units: Units) {
    let suffix = units.temperature_suffix();
    let country = snapshot.sys.as_ref().and_then(|s| s.country.as_deref());

    match country {
        Some(country) => println!("{}, {} (#{})", snapshot.display_name(), country, snapshot.id),
        None => println!("{} (#{})", snapshot.display_name(), snapshot.id),
    }
    if let Some(headline) = snapshot.headline() {
        println!("  {headline}");
    }
    if let Some(main) = &snapshot.main {
        println!(
            "  Temperature: {:.1}{suffix} (feels like {:.1}{suffix}, {:.1}..{:.1}{suffix})",
            main.temp, main.feels_like, main.temp_min, main.temp_max
        );
        println!("  Humidity:    {:.0}%  Pressure: {:.0} hPa", main.humidity, main.pressure);
    }
    if let Some(wind) = &snapshot.wind {
        let speed_unit = if units == Units::Imperial { "mph" } else { "m/s" };
        match wind.deg {
            Some(deg) => println!("  Wind:        {:.1} {speed_unit} from {deg}°", wind.speed),
            None => println!("  Wind:        {:.1} {speed_unit}", wind.speed),
        }
    }
    if let Some(clouds) = &snapshot.clouds {
        println!("  Clouds:      {}%", clouds.all);
    }
    if let Some(observed) = snapshot.dt.and_then(|dt| DateTime::from_timestamp(dt, 0)) {
        println!("  Observed:    {}", local(observed));
    }
}
