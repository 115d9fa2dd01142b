use anyhow::{Context, Result, bail};
use clap::Subcommand;
use tidemark_core::{LoopStatus, NotificationSettings, Planner};
use tracing::info;

use crate::host::saved;

#[derive(Subcommand, Debug)]
pub enum NotifyCommand {
    /// Show or change notification settings
    Settings {
        #[arg(long, conflicts_with = "disable")]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Minutes before the due time to alert
        #[arg(long)]
        advance: Option<u32>,
        /// Minutes between checks
        #[arg(long)]
        interval: Option<u32>,
        /// Only alert between these local hours, e.g. 9-17 (end exclusive)
        #[arg(long, conflicts_with = "any_hour")]
        working_hours: Option<String>,
        /// Alert at any hour
        #[arg(long)]
        any_hour: bool,
    },

    /// Settings plus which tasks have already been notified
    Status,

    /// Run the notification loop in the foreground until Ctrl-C
    Watch,

    /// Run one check-and-fire pass and exit
    Check,

    /// Run the daily sweep that re-arms tasks scheduled today or later
    Sweep,
}

pub async fn run(planner: &mut Planner, cmd: NotifyCommand) -> Result<()> {
    match cmd {
        NotifyCommand::Settings {
            enable,
            disable,
            advance,
            interval,
            working_hours,
            any_hour,
        } => {
            let mut s = planner.notification_settings();
            let before = s;
            if enable {
                s.enabled = true;
            }
            if disable {
                s.enabled = false;
            }
            if let Some(a) = advance {
                s.advance_minutes = a;
            }
            if let Some(i) = interval {
                s.poll_interval_minutes = i;
            }
            if let Some(w) = working_hours {
                let (start, end) = parse_hours(&w)?;
                s.restrict_to_working_hours = true;
                s.working_hours_start = start;
                s.working_hours_end = end;
            }
            if any_hour {
                s.restrict_to_working_hours = false;
            }
            if s != before {
                saved(planner.configure_notifications(s))?;
                println!("Saved.");
            }
            print_settings(&s);
            Ok(())
        }
        NotifyCommand::Status => {
            print_settings(&planner.notification_settings());
            let ids = planner.notified_task_ids();
            println!("\nAlready notified: {}", if ids.is_empty() { "none".to_string() } else { ids.len().to_string() });
            for id in ids {
                match planner.get_current(&id) {
                    Some(t) => println!("  {id} {}", t.version.title),
                    None => println!("  {id} (deleted)"),
                }
            }
            Ok(())
        }
        NotifyCommand::Check => {
            let report = planner.poll_notifications();
            if let Some(e) = report.persist_error {
                eprintln!("warning: {e}");
            }
            println!(
                "{} sent, {} failed, {} skipped",
                report.fired.len(),
                report.sink_failures,
                report.skipped
            );
            Ok(())
        }
        NotifyCommand::Sweep => {
            let cleared = saved(planner.on_focus())?;
            println!("Re-armed {cleared} task(s).");
            Ok(())
        }
        NotifyCommand::Watch => watch(planner).await,
    }
}

async fn watch(planner: &Planner) -> Result<()> {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            match planner.start_notifications() {
                LoopStatus::Running | LoopStatus::AwaitingPermission => {}
                LoopStatus::Disabled => bail!("notifications are disabled (tidemark notify settings --enable)"),
                LoopStatus::PermissionDenied => bail!("alert permission was denied"),
            }
            let s = planner.notification_settings();
            info!(interval_minutes = s.poll_interval_minutes, "watching for due tasks");
            println!(
                "Watching for tasks due within {} min, checking every {} min. Ctrl-C to stop.",
                s.advance_minutes, s.poll_interval_minutes
            );
            tokio::signal::ctrl_c().await.context("wait for Ctrl-C")?;
            planner.stop_notifications();
            println!("Stopped.");
            Ok::<_, anyhow::Error>(())
        })
        .await
}

fn parse_hours(s: &str) -> Result<(u8, u8)> {
    let (a, b) = s
        .split_once('-')
        .with_context(|| format!("working hours '{s}' should look like 9-17"))?;
    let start: u8 = a.trim().parse().with_context(|| format!("start hour '{a}'"))?;
    let end: u8 = b.trim().parse().with_context(|| format!("end hour '{b}'"))?;
    Ok((start, end))
}

fn print_settings(s: &NotificationSettings) {
    println!("enabled:        {}", s.enabled);
    println!("advance:        {} min", s.advance_minutes);
    println!("check every:    {} min", s.poll_interval_minutes);
    if s.restrict_to_working_hours {
        println!("working hours:  {:02}:00-{:02}:00", s.working_hours_start, s.working_hours_end);
    } else {
        println!("working hours:  any");
    }
}
