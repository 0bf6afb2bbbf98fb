use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use chrono::Local;
use clap::{Args, Subcommand};
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::{
    store::DocumentStore,
    timer::{format_time, ticker::TimerTicker, TimerEngine, TimerStatus},
    tracker::{
        entities::{Activity, Period, UserDocument},
        manager::{DataManager, SessionFilter},
    },
    users::Theme,
    utils::{shutdown::detect_shutdown, time::millis_to_hours},
};

use super::{
    app::App,
    dates::{parse_range, DateStyle},
};

#[derive(Subcommand, Debug)]
pub enum ActivityCommand {
    #[command(about = "Show every activity with its hours for a timeframe")]
    List {
        #[arg(long, short, default_value_t = Period::Day, help = "day, month or year")]
        period: Period,
    },
    #[command(about = "Create an empty activity")]
    Create {
        title: String,
        #[arg(long, short, help = "Any CSS color, e.g. \"hsl(15, 100%, 70%)\"")]
        color: Option<String>,
    },
    #[command(about = "Delete an activity together with its hours")]
    Delete { title: String },
    #[command(about = "Add hours to an activity and record them in the session log")]
    Add {
        title: String,
        hours: f64,
        #[arg(long, short, default_value_t = Period::Day)]
        period: Period,
        #[arg(long, short)]
        note: Option<String>,
    },
    #[command(about = "Overwrite the current and previous hours of a timeframe")]
    Set {
        title: String,
        current: f64,
        previous: f64,
        #[arg(long, short, default_value_t = Period::Day)]
        period: Period,
    },
    #[command(about = "Replace the activities with the ones in a JSON file")]
    Import { file: PathBuf },
    #[command(about = "Restore the default activities")]
    Reset,
    #[command(about = "Show or change the color theme")]
    Theme { theme: Option<Theme> },
}

#[derive(Args, Debug)]
pub struct SessionsCommand {
    #[arg(long, short)]
    activity: Option<String>,
    #[arg(long, short, help = "Accepts dates like \"yesterday\" or \"15/03/2025\"")]
    from: Option<String>,
    #[arg(long, short)]
    to: Option<String>,
    #[arg(long, default_value_t = DateStyle::Uk)]
    date_style: DateStyle,
    #[arg(
        long,
        help = "Extend the range to the start of the first day and the end of the last one"
    )]
    days: bool,
}

#[derive(Subcommand, Debug)]
pub enum TimerCommand {
    #[command(about = "Start a stopwatch, resuming it when paused")]
    Start { title: String },
    Pause { title: String },
    Resume { title: String },
    #[command(about = "Stop a stopwatch and add its time to the day")]
    Stop {
        title: String,
        #[arg(long, short)]
        note: Option<String>,
    },
    Status,
    #[command(about = "Follow running stopwatches until they stop or Ctrl-C")]
    Watch,
}

#[derive(Subcommand, Debug)]
pub enum UserCommand {
    List,
    Create { name: String },
    #[command(about = "Forget a user name. Its activities are kept")]
    Delete { name: String },
    #[command(about = "Make a user current, creating it when needed")]
    Switch { name: String },
}

/// Accepted import formats: a bare activity list or a whole exported document.
#[derive(Deserialize)]
#[serde(untagged)]
enum ImportFile {
    Activities(Vec<Activity>),
    Document(UserDocument),
}

impl ImportFile {
    fn into_activities(self) -> Vec<Activity> {
        match self {
            ImportFile::Activities(activities) => activities,
            ImportFile::Document(document) => document.activities,
        }
    }
}

fn previous_label(period: Period) -> &'static str {
    match period {
        Period::Day => "yesterday",
        Period::Month => "last month",
        Period::Year => "last year",
    }
}

pub async fn process_activity_command(app: &App, command: ActivityCommand) -> Result<()> {
    match command {
        ActivityCommand::List { period } => {
            let timers = app.timers().await?;
            for activity in app.data.get_data().await {
                let stats = activity.timeframes.get(period);
                let elapsed = format_time(timers.elapsed(&activity.title));
                let timer = match timers.status(&activity.title) {
                    TimerStatus::Absent => String::new(),
                    TimerStatus::Running => format!("\t{elapsed}"),
                    TimerStatus::Paused => format!("\t{elapsed} (paused)"),
                };
                println!(
                    "{}\t{:.2}h\t{} {:.2}h{}",
                    activity.title,
                    stats.current,
                    previous_label(period),
                    stats.previous,
                    timer
                );
            }
        }
        ActivityCommand::Create { title, color } => {
            let activity = app.data.create_activity(&title, color).await?;
            println!("Created {}", activity.title);
        }
        ActivityCommand::Delete { title } => {
            if !app.data.delete_activity(&title).await? {
                bail!("No activity called {title}");
            }
            let mut timers = app.timers().await?;
            timers.stop(&title).await?;
            println!("Deleted {title}");
        }
        ActivityCommand::Add {
            title,
            hours,
            period,
            note,
        } => {
            if app
                .data
                .record_hours(&title, period, hours, note)
                .await?
                .is_none()
            {
                bail!("No activity called {title}");
            }
            println!("Added {hours}h to {title}");
        }
        ActivityCommand::Set {
            title,
            current,
            previous,
            period,
        } => {
            if !app
                .data
                .update_activity_hours(&title, period, current, previous)
                .await?
            {
                bail!("No activity called {title}");
            }
        }
        ActivityCommand::Import { file } => {
            let content = tokio::fs::read_to_string(&file).await?;
            let activities = serde_json::from_str::<ImportFile>(&content)?.into_activities();
            let count = activities.len();
            app.data.import(activities).await?;
            println!("Imported {count} activities");
        }
        ActivityCommand::Reset => {
            let activities = app.data.reset_data().await?;
            println!("Restored {} default activities", activities.len());
        }
        ActivityCommand::Theme { theme } => match theme {
            Some(theme) => app.users.set_theme(theme).await?,
            None => println!("{}", app.users.theme().await?),
        },
    }
    Ok(())
}

pub async fn process_sessions_command(app: &App, command: SessionsCommand) -> Result<()> {
    let range = parse_range(
        command.from.as_deref(),
        command.to.as_deref(),
        command.date_style,
        command.days,
        app.clock.time().with_timezone(&Local),
    )?;
    let filter = SessionFilter {
        activity: command.activity,
        from: range.from,
        to: range.to,
    };

    for session in app.data.time_sessions(&filter).await {
        println!(
            "{}\t{:.2}h\t{}\t{}",
            session.timestamp.with_timezone(&Local).format("%x %H:%M:%S"),
            session.hours,
            session.activity,
            session.note.unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn process_timer_command(app: &App, command: TimerCommand) -> Result<()> {
    let mut timers = app.timers().await?;
    match command {
        TimerCommand::Start { title } | TimerCommand::Resume { title } => {
            if !app.data.get_data().await.iter().any(|v| v.title == title) {
                bail!("No activity called {title}");
            }
            match timers.status(&title) {
                TimerStatus::Running => println!("{title} is already running"),
                TimerStatus::Paused => {
                    timers.start(&title).await?;
                    println!("Resumed {title} at {}", format_time(timers.elapsed(&title)));
                }
                TimerStatus::Absent => {
                    timers.start(&title).await?;
                    println!("Started {title}");
                }
            }
        }
        TimerCommand::Pause { title } => {
            if !timers.pause(&title).await? {
                bail!("{title} has no running timer");
            }
            println!("Paused {title} at {}", format_time(timers.elapsed(&title)));
        }
        TimerCommand::Stop { title, note } => {
            let elapsed_ms = stop_timer(&app.data, &mut timers, &title, note).await?;
            println!("Logged {} for {title}", format_time(elapsed_ms));
        }
        TimerCommand::Status => {
            for reading in timers.readings() {
                let state = if reading.paused { "paused" } else { "running" };
                let elapsed = format_time(reading.elapsed_ms);
                println!("{}\t{elapsed}\t{state}", reading.title);
            }
        }
        TimerCommand::Watch => watch_timers(app, timers).await?,
    }
    Ok(())
}

/// Records the timer's time on the day bucket and in the session log, and only then removes the
/// timer. When recording fails the timer keeps running so no time is lost.
async fn stop_timer<S: DocumentStore>(
    data: &DataManager<S>,
    timers: &mut TimerEngine,
    title: &str,
    note: Option<String>,
) -> Result<i64> {
    if !timers.is_active(title) {
        bail!("{title} has no timer");
    }
    let elapsed_ms = timers.elapsed(title);
    let recorded = if elapsed_ms > 0 {
        data.record_hours(title, Period::Day, millis_to_hours(elapsed_ms), note)
            .await?
            .is_some()
    } else {
        true
    };

    timers.stop(title).await?;
    if !recorded {
        bail!(
            "No activity called {title}, {} discarded",
            format_time(elapsed_ms)
        );
    }
    Ok(elapsed_ms)
}

async fn watch_timers(app: &App, timers: TimerEngine) -> Result<()> {
    let shutdown = CancellationToken::new();
    let (sender, mut receiver) = mpsc::channel(4);
    let ticker = TimerTicker::new(
        Arc::new(Mutex::new(timers)),
        sender,
        shutdown.clone(),
        app.config.tick_interval,
        app.clock.clone(),
    )
    .with_reload_every(app.config.timer_reload_ticks);

    let display = async {
        let mut stdout = std::io::stdout();
        while let Some(readings) = receiver.recv().await {
            let line = readings
                .iter()
                .map(|v| format!("{} {}", v.title, format_time(v.elapsed_ms)))
                .collect::<Vec<_>>()
                .join("  ");
            print!("\r{line}");
            stdout.flush()?;
        }
        println!();
        anyhow::Ok(())
    };
    let ticking = async {
        let result = ticker.run().await;
        shutdown.cancel();
        result
    };

    let (_, ticked, displayed) = tokio::join!(detect_shutdown(shutdown.clone()), ticking, display);
    ticked?;
    displayed
}

pub async fn process_user_command(app: &App, command: UserCommand) -> Result<()> {
    match command {
        UserCommand::List => {
            let current = app.users.current_user().await?;
            for user in app.users.users().await? {
                let marker = if current.as_deref() == Some(user.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{marker} {}\t{}",
                    user.name,
                    user.created_at.with_timezone(&Local).format("%x")
                );
            }
        }
        UserCommand::Create { name } => {
            let user = app.users.create_user(&name).await?;
            println!("Created {}", user.name);
        }
        UserCommand::Delete { name } => {
            if !app.users.delete_user(&name).await? {
                bail!("No user called {name}");
            }
            println!("Deleted {name}");
        }
        UserCommand::Switch { name } => {
            if !app.users.user_exists(&name).await? {
                app.users.create_user(&name).await?;
            }
            app.users.switch_user(&name).await?;
            app.data.set_user(Some(&name));
            let count = app.data.get_data().await.len();
            println!("Switched to {name} with {count} activities");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use crate::{
        config::TrackerConfig,
        store::{document_key, memory_store::MemoryStore, prefs::Preferences, DocumentStore},
        timer::TimerEngine,
        tracker::{
            entities::{Activity, UserDocument},
            manager::{DataManager, SessionFilter},
        },
        utils::clock::test_clock::ManualClock,
    };

    use super::{stop_timer, ImportFile};

    #[tokio::test]
    async fn test_stop_keeps_timer_when_recording_fails() -> Result<()> {
        let dir = tempdir()?;
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let store = MemoryStore::new();
        let document = UserDocument::new(vec![Activity::new("Work", None)], start);
        store.save(&document_key(None), &document).await?;
        let data = DataManager::new(
            store,
            None,
            Arc::new(clock.clone()),
            TrackerConfig::default(),
        );
        let prefs = Preferences::new(dir.path().join("prefs.json"));
        let mut timers = TimerEngine::restore(prefs, Arc::new(clock.clone())).await?;

        timers.start("Work").await?;
        clock.advance_ms(3_600_000);
        data.store().set_offline(true);
        assert!(stop_timer(&data, &mut timers, "Work", None).await.is_err());
        assert!(timers.is_active("Work"));
        assert_eq!(timers.elapsed("Work"), 3_600_000);

        data.store().set_offline(false);
        clock.advance_ms(1_800_000);
        let elapsed = stop_timer(&data, &mut timers, "Work", None).await?;
        assert_eq!(elapsed, 5_400_000);
        assert!(!timers.is_active("Work"));
        assert_eq!(data.get_data().await[0].timeframes.day.current, 1.5);
        assert_eq!(data.time_sessions(&SessionFilter::default()).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_for_missing_activity_discards_timer() -> Result<()> {
        let dir = tempdir()?;
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap());
        let data = DataManager::new(
            MemoryStore::new(),
            None,
            Arc::new(clock.clone()),
            TrackerConfig::default(),
        );
        let prefs = Preferences::new(dir.path().join("prefs.json"));
        let mut timers = TimerEngine::restore(prefs, Arc::new(clock.clone())).await?;

        timers.start("Gone").await?;
        clock.advance_ms(1000);
        assert!(stop_timer(&data, &mut timers, "Gone", None).await.is_err());
        assert!(!timers.is_active("Gone"));
        assert!(stop_timer(&data, &mut timers, "Gone", None).await.is_err());
        Ok(())
    }

    #[test]
    fn test_import_accepts_list_and_document() -> Result<()> {
        let list = r#"[{"title": "Work", "timeframes": {
            "daily": {"current": 1, "previous": 2},
            "weekly": {"current": 3, "previous": 4},
            "monthly": {"current": 5, "previous": 6}}}]"#;
        let activities = serde_json::from_str::<ImportFile>(list)?.into_activities();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].timeframes.year.previous, 6.);

        let document = format!(r#"{{"activities": {list}, "lastUpdate": "2024-05-01T09:00:00Z"}}"#);
        let activities = serde_json::from_str::<ImportFile>(&document)?.into_activities();
        assert_eq!(activities[0].title, "Work");
        Ok(())
    }

    #[test]
    fn test_import_rejects_other_shapes() {
        assert!(serde_json::from_str::<ImportFile>(r#"{"title": "Work"}"#).is_err());
    }
}
