use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime};
use clap::{Args, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use tidemark_core::time::{day_key, parse_day_key, parse_time_of_day};
use tidemark_core::{
    Category, DropTarget, ExportFormat, ExportScope, FocusLevel, Planner, Priority, SummaryDraft,
    TaskDraft, TaskSnapshot, export_file_name,
};

use crate::host::saved;

/// Fields shared by `add` and `edit`. On `edit`, anything left out keeps its
/// current value; `none` clears an optional field.
#[derive(Args, Debug, Default, Clone)]
pub struct TaskFields {
    /// AI/ML, Quantum Computing, Physics, Math, Content Creation, Freelancing, Other
    #[arg(long, short = 'c')]
    pub category: Option<String>,

    #[arg(long, short = 'd')]
    pub description: Option<String>,

    /// Estimated minutes
    #[arg(long, short = 'm')]
    pub minutes: Option<String>,

    /// Scheduled date, YYYY-MM-DD
    #[arg(long)]
    pub date: Option<String>,

    /// Start time, HH:MM
    #[arg(long)]
    pub time: Option<String>,

    /// urgent-important, not-urgent-important, urgent-not-important, not-urgent-not-important
    #[arg(long, short = 'p')]
    pub priority: Option<String>,

    /// 1 (shallow) to 5 (deep)
    #[arg(long, short = 'f')]
    pub focus: Option<u8>,
}

impl TaskFields {
    pub fn apply(self, mut draft: TaskDraft) -> Result<TaskDraft> {
        if let Some(c) = self.category {
            draft.category = parse_category(&c)?;
        }
        if let Some(d) = self.description {
            draft.description = clearable(&d).map(str::to_string);
        }
        if let Some(m) = self.minutes {
            draft.estimated_minutes = clearable(&m)
                .map(|m| m.parse::<u32>().with_context(|| format!("minutes '{m}'")))
                .transpose()?;
        }
        if let Some(d) = self.date {
            draft.scheduled_date = clearable(&d).map(parse_day_key).transpose()?;
        }
        if let Some(t) = self.time {
            draft.start_time = clearable(&t).map(parse_time_of_day).transpose()?;
        }
        if let Some(p) = self.priority {
            draft.priority = p.parse::<Priority>()?;
        }
        if let Some(f) = self.focus {
            draft.focus_level = FocusLevel::new(f)?;
        }
        Ok(draft)
    }
}

fn clearable(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.is_empty() || s.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(s)
    }
}

fn parse_category(s: &str) -> Result<Category> {
    let s = s.trim();
    Category::ALL
        .into_iter()
        .find(|c| c.label().eq_ignore_ascii_case(s))
        .with_context(|| {
            let known: Vec<&str> = Category::ALL.iter().map(|c| c.label()).collect();
            format!("unknown category '{s}' (expected one of: {})", known.join(", "))
        })
}

fn parse_date_arg(planner: &Planner, s: Option<&str>) -> Result<NaiveDate> {
    match s {
        None | Some("today") => Ok(planner.today()),
        Some("tomorrow") => Ok(planner.today() + chrono::Duration::days(1)),
        Some(s) => Ok(parse_day_key(s)?),
    }
}

pub fn add(planner: &mut Planner, title: String, fields: TaskFields) -> Result<()> {
    let draft = fields.apply(TaskDraft::new(title))?;
    let id = saved(planner.create_task(draft))?;
    println!("Created {id}");
    Ok(())
}

pub fn edit(planner: &mut Planner, id: &str, title: Option<String>, fields: TaskFields) -> Result<()> {
    let current = planner
        .get_current(id)
        .with_context(|| format!("no current task with id {id}"))?;
    let mut draft = fields.apply(TaskDraft::from_version(&current.version))?;
    if let Some(t) = title {
        draft.title = t;
    }
    saved(planner.update_task(id, draft))?;
    println!("Updated {id}");
    Ok(())
}

pub fn delete(planner: &mut Planner, id: &str) -> Result<()> {
    saved(planner.delete_task(id))?;
    println!("Deleted {id}");
    Ok(())
}

pub fn show(planner: &Planner, id: &str) -> Result<()> {
    let Some(history) = planner.history_of(id) else {
        bail!("unknown task id {id}");
    };
    match planner.get_current(id) {
        Some(t) => {
            println!("{}", line(&t));
            if let Some(d) = &t.version.description {
                println!("    {d}");
            }
        }
        None => println!("{id} (deleted)"),
    }
    println!("\nHistory ({} versions):", history.len());
    for (i, v) in history.iter().enumerate() {
        println!(
            "  #{i} {} rev {}{} | {}",
            v.timestamp.format("%Y-%m-%d %H:%M:%S"),
            v.revision,
            if v.deleted { " [deleted]" } else { "" },
            v.title
        );
    }
    Ok(())
}

pub fn list(planner: &Planner, overdue_only: bool) -> Result<()> {
    let tasks = if overdue_only {
        planner.overdue()
    } else {
        planner.list_current()
    };
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    let now = planner.now();
    for t in &tasks {
        let flag = if planner.is_overdue(t, now) { " (overdue)" } else { "" };
        println!("{}{flag}", line(t));
    }
    Ok(())
}

pub fn history(planner: &Planner, limit: usize) -> Result<()> {
    for h in planner.list_history().into_iter().take(limit) {
        println!(
            "{} rev {:>4} {} #{}{} | {}",
            h.version.timestamp.format("%Y-%m-%d %H:%M:%S"),
            h.version.revision,
            h.task_id,
            h.index,
            if h.version.deleted { " [deleted]" } else { "" },
            h.version.title
        );
    }
    Ok(())
}

pub fn day(planner: &Planner, date: Option<String>) -> Result<()> {
    let date = parse_date_arg(planner, date.as_deref())?;
    let buckets = planner.bucket_by_date(planner.today());
    println!("# {}", date.format("%A, %Y-%m-%d"));
    print_bucket(buckets.day(date));

    if date == planner.today() {
        let overdue = buckets.before_reference();
        if !overdue.is_empty() {
            println!("\nOverdue:");
            for t in overdue {
                println!("  {}", line(t));
            }
        }
        if !buckets.unscheduled.is_empty() {
            println!("\nUnscheduled:");
            print_bucket(&buckets.unscheduled);
        }
    }
    Ok(())
}

pub fn week(planner: &Planner, date: Option<String>) -> Result<()> {
    let date = parse_date_arg(planner, date.as_deref())?;
    let (start, end) = planner.range_for_week(date);
    println!("# Week {} to {}", day_key(start), day_key(end));
    let buckets = planner.bucket_by_date(planner.today());
    for (d, tasks) in buckets.range(start, end) {
        println!("\n{}", d.format("%a %Y-%m-%d"));
        print_bucket(tasks);
    }
    Ok(())
}

pub fn move_task(planner: &mut Planner, id: &str, to: &str, time: Option<String>) -> Result<()> {
    let target = match (clearable(to), time) {
        (None, _) => DropTarget::Unscheduled,
        (Some(d), None) => DropTarget::Day(parse_date_arg(planner, Some(d))?),
        (Some(d), Some(t)) => DropTarget::Slot {
            date: parse_date_arg(planner, Some(d))?,
            time: parse_time_of_day(&t)?,
        },
    };
    saved(planner.move_task(id, target))?;
    let t = planner.get_current(id).context("task vanished after move")?;
    println!("Moved: {}", line(&t));
    Ok(())
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Json,
    Csv,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ScopeArg {
    Current,
    History,
}

pub fn export(planner: &Planner, format: FormatArg, scope: ScopeArg, out: Option<PathBuf>) -> Result<()> {
    let scope = match scope {
        ScopeArg::Current => ExportScope::Current,
        ScopeArg::History => ExportScope::History,
    };
    let (text, format) = match format {
        FormatArg::Json => (planner.export_structured(scope)?, ExportFormat::Json),
        FormatArg::Csv => (planner.export_delimited(scope)?, ExportFormat::Csv),
    };

    let path = out.unwrap_or_else(|| PathBuf::from(export_file_name(format, planner.today())));
    if path.as_os_str() == "-" {
        print!("{text}");
        return Ok(());
    }
    fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
    println!("Exported to {}", path.display());
    Ok(())
}

pub fn dashboard(planner: &Planner) -> Result<()> {
    let d = planner.dashboard();
    println!("# Dashboard ({} tasks, {} min planned)\n", d.total_tasks, d.total_minutes());

    println!("Minutes per category:");
    for (c, m) in &d.minutes_per_category {
        println!("  {:<18} {m:>5}", c.label());
    }

    println!("\nFocus distribution:");
    for (i, n) in d.focus_distribution.iter().enumerate() {
        println!("  {} {:<20} {n}", i + 1, "#".repeat(*n as usize));
    }

    println!("\nUpcoming:");
    if d.upcoming.is_empty() {
        println!("  nothing scheduled");
    }
    for t in &d.upcoming {
        println!("  {}", line(t));
    }
    Ok(())
}

#[derive(Subcommand, Debug)]
pub enum SummaryCommand {
    /// Record a weekly reflection
    Add {
        #[arg(long)]
        went_well: Option<String>,
        #[arg(long)]
        blockers: Option<String>,
        #[arg(long)]
        next_steps: Option<String>,
        /// Any date in the week being summarised (default: today)
        #[arg(long)]
        date: Option<String>,
    },
    /// List saved reflections
    List,
}

pub fn summary(planner: &mut Planner, cmd: SummaryCommand) -> Result<()> {
    match cmd {
        SummaryCommand::Add {
            went_well,
            blockers,
            next_steps,
            date,
        } => {
            let reference = parse_date_arg(planner, date.as_deref())?;
            let draft = SummaryDraft {
                went_well: went_well.unwrap_or_default(),
                blockers: blockers.unwrap_or_default(),
                next_steps: next_steps.unwrap_or_default(),
            };
            let s = saved(planner.save_summary(reference, draft))?;
            println!("Saved summary for {}-W{:02}", s.year, s.week);
        }
        SummaryCommand::List => {
            if planner.summaries().is_empty() {
                println!("No summaries yet.");
            }
            for s in planner.summaries() {
                println!("{}-W{:02} ({})", s.year, s.week, s.created_at.format("%Y-%m-%d"));
                for (label, text) in [
                    ("went well", &s.went_well),
                    ("blockers", &s.blockers),
                    ("next", &s.next_steps),
                ] {
                    if !text.is_empty() {
                        println!("  {label}: {text}");
                    }
                }
            }
        }
    }
    Ok(())
}

fn print_bucket(tasks: &[TaskSnapshot]) {
    if tasks.is_empty() {
        println!("  -");
    }
    for t in tasks {
        println!("  {}", line(t));
    }
}

fn line(t: &TaskSnapshot) -> String {
    let v = &t.version;
    let when = match (v.scheduled_date, v.start_time) {
        (Some(d), Some(time)) => format!("{} {}", day_key(d), hhmm(time)),
        (Some(d), None) => day_key(d),
        (None, _) => "unscheduled".to_string(),
    };
    let minutes = v.estimated_minutes.map(|m| format!(" {m}m")).unwrap_or_default();
    format!(
        "{}  {:<16} {} [{}] focus {}{} | {}",
        t.id,
        when,
        v.category.label(),
        v.priority.label(),
        v.focus_level.get(),
        minutes,
        v.title
    )
}

fn hhmm(t: NaiveTime) -> String {
    t.format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_apply_and_clear() {
        let base = TaskDraft::new("x").with_minutes(30).with_description("old");
        let f = TaskFields {
            category: Some("quantum computing".into()),
            description: Some("none".into()),
            minutes: Some("45".into()),
            date: Some("2024-03-10".into()),
            time: Some("09:30".into()),
            priority: Some("urgent-important".into()),
            focus: Some(5),
        };
        let d = f.apply(base).unwrap();
        assert_eq!(d.category, Category::QuantumComputing);
        assert_eq!(d.description, None);
        assert_eq!(d.estimated_minutes, Some(45));
        assert_eq!(d.scheduled_date, Some(parse_day_key("2024-03-10").unwrap()));
        assert_eq!(d.priority, Priority::UrgentImportant);
        assert_eq!(d.focus_level.get(), 5);
    }

    #[test]
    fn test_fields_reject_bad_input() {
        let bad = [
            TaskFields { category: Some("Cooking".into()), ..Default::default() },
            TaskFields { focus: Some(7), ..Default::default() },
            TaskFields { date: Some("10/03/2024".into()), ..Default::default() },
            TaskFields { minutes: Some("soon".into()), ..Default::default() },
        ];
        for f in bad {
            assert!(f.apply(TaskDraft::new("x")).is_err());
        }
    }

    #[test]
    fn test_omitted_fields_keep_values() {
        let base = TaskDraft::new("x").with_minutes(30);
        let d = TaskFields::default().apply(base.clone()).unwrap();
        assert_eq!(d, base);
    }
}
