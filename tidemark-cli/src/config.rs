use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tidemark_core::time::{parse_weekday, parse_zone};
use tidemark_core::{NotificationSettings, PlannerConfig};

use crate::state::ensure_tidemark_home;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub planner: PlannerSection,
    #[serde(default)]
    pub notifications: NotificationsSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannerSection {
    /// IANA zone that "today" and due times are computed in
    #[serde(default = "default_timezone")]
    pub timezone: String,
    /// First day of the week view (monday, sunday, ...)
    #[serde(default = "default_week_start")]
    pub week_start: String,
}

/// Seeds notification settings until `tidemark notify settings` saves some.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsSection {
    pub enabled: bool,
    pub advance_minutes: u32,
    pub poll_interval_minutes: u32,
    pub restrict_to_working_hours: bool,
    pub working_hours_start: u8,
    pub working_hours_end: u8,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_week_start() -> String {
    "monday".to_string()
}

impl Default for PlannerSection {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            week_start: default_week_start(),
        }
    }
}

impl Default for NotificationsSection {
    fn default() -> Self {
        NotificationSettings::default().into()
    }
}

impl From<NotificationSettings> for NotificationsSection {
    fn from(s: NotificationSettings) -> Self {
        Self {
            enabled: s.enabled,
            advance_minutes: s.advance_minutes,
            poll_interval_minutes: s.poll_interval_minutes,
            restrict_to_working_hours: s.restrict_to_working_hours,
            working_hours_start: s.working_hours_start,
            working_hours_end: s.working_hours_end,
        }
    }
}

impl Config {
    pub fn planner_config(&self) -> Result<PlannerConfig> {
        let zone = parse_zone(&self.planner.timezone)
            .with_context(|| format!("[planner].timezone = {:?}", self.planner.timezone))?;
        let week_start = parse_weekday(&self.planner.week_start)
            .with_context(|| format!("[planner].week_start = {:?}", self.planner.week_start))?;
        let n = &self.notifications;
        let notifications = NotificationSettings {
            enabled: n.enabled,
            advance_minutes: n.advance_minutes,
            poll_interval_minutes: n.poll_interval_minutes,
            restrict_to_working_hours: n.restrict_to_working_hours,
            working_hours_start: n.working_hours_start,
            working_hours_end: n.working_hours_end,
        };
        notifications.validate().context("[notifications]")?;
        Ok(PlannerConfig {
            zone,
            week_start,
            notifications,
        })
    }
}

pub fn config_path() -> Result<PathBuf> {
    Ok(ensure_tidemark_home()?.join("config.toml"))
}

pub fn load_config() -> Result<Config> {
    let p = config_path()?;
    if !p.exists() {
        return Ok(Config::default());
    }
    let s = fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))?;
    toml::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

pub fn save_config(cfg: &Config) -> Result<()> {
    let p = config_path()?;
    let s = toml::to_string_pretty(cfg).context("serialize config")?;
    fs::write(&p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

pub fn init_config() -> Result<()> {
    let p = config_path()?;
    if p.exists() {
        println!("Config already exists: {}", p.display());
        return Ok(());
    }
    save_config(&Config::default())?;
    println!("Wrote {}", p.display());
    Ok(())
}

pub fn show_config() -> Result<()> {
    let p = config_path()?;
    let cfg = load_config()?;
    println!("# {}{}", p.display(), if p.exists() { "" } else { " (defaults)" });
    print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    #[test]
    fn test_partial_file_fills_defaults() {
        let cfg: Config = toml::from_str("[planner]\ntimezone = \"Europe/Berlin\"\n").unwrap();
        assert_eq!(cfg.planner.week_start, "monday");
        assert_eq!(cfg.notifications, NotificationsSection::default());

        let pc = cfg.planner_config().unwrap();
        assert_eq!(pc.zone, chrono_tz::Europe::Berlin);
        assert_eq!(pc.week_start, Weekday::Mon);
    }

    #[test]
    fn test_bad_values_are_reported() {
        let cfg: Config = toml::from_str("[planner]\ntimezone = \"Mars/Olympus\"\n").unwrap();
        assert!(cfg.planner_config().is_err());

        let cfg: Config = toml::from_str(
            "[notifications]\nenabled = true\nadvance_minutes = 0\npoll_interval_minutes = 1\n\
             restrict_to_working_hours = false\nworking_hours_start = 9\nworking_hours_end = 17\n",
        )
        .unwrap();
        assert!(cfg.planner_config().is_err());
    }

    #[test]
    fn test_default_round_trips_through_toml() {
        let s = toml::to_string_pretty(&Config::default()).unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back, Config::default());
    }
}
