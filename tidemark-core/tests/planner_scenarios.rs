use chrono::{DateTime, Duration, TimeZone, Utc};
use std::rc::Rc;
use tidemark_core::time::{parse_day_key, parse_time_of_day, parse_zone};
use tidemark_core::{
    Category, Collaborators, DropTarget, ExportScope, FileStore, FixedClock, FocusLevel, KeyValueStore,
    ManualTimer, MemoryStore, Permission, Planner, PlannerConfig, PlannerError, Priority, RecordingAlerts,
    SequentialIds, TaskDraft,
};

struct Env {
    planner: Planner,
    clock: Rc<FixedClock>,
    alerts: Rc<RecordingAlerts>,
}

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

fn open_with(storage: Rc<dyn KeyValueStore>, clock: Rc<FixedClock>, id_prefix: &str) -> Env {
    let alerts = Rc::new(RecordingAlerts::new(Permission::Granted));
    let config = PlannerConfig {
        zone: parse_zone("America/Chicago").unwrap(),
        ..PlannerConfig::default()
    };
    let (planner, _) = Planner::open(
        Collaborators {
            storage,
            clock: clock.clone(),
            ids: Rc::new(SequentialIds::new(id_prefix)),
            alerts: alerts.clone(),
            timer: Rc::new(ManualTimer::new()),
        },
        config,
    )
    .unwrap();
    Env { planner, clock, alerts }
}

fn env() -> Env {
    open_with(Rc::new(MemoryStore::new()), Rc::new(FixedClock::new(start())), "task")
}

fn read_ch3() -> TaskDraft {
    TaskDraft::new("Read ch.3")
        .with_category(Category::Physics)
        .scheduled_on(parse_day_key("2024-03-10").unwrap())
        .with_priority(Priority::NotUrgentImportant)
        .with_focus(FocusLevel::new(3).unwrap())
}

/// Scenario A: create, list, overdue relative to now.
#[test]
fn test_created_task_is_overdue_only_after_its_day() {
    let mut e = env();
    let id = e.planner.create_task(read_ch3()).unwrap();
    assert_eq!(e.planner.list_current().len(), 1);

    let task = e.planner.get_current(&id).unwrap();
    let mar15 = Utc.with_ymd_and_hms(2024, 3, 15, 18, 0, 0).unwrap();
    let mar01 = Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap();
    assert!(e.planner.is_overdue(&task, mar15));
    assert!(!e.planner.is_overdue(&task, mar01));
}

/// Scenario B: two updates give three versions, newest first.
#[test]
fn test_history_lists_every_version_newest_first() {
    let mut e = env();
    let id = e.planner.create_task(read_ch3()).unwrap();
    e.clock.advance(Duration::minutes(5));
    let edit = TaskDraft {
        title: "Read ch.3 again".into(),
        ..read_ch3()
    };
    e.planner.update_task(&id, edit).unwrap();
    e.clock.advance(Duration::minutes(5));
    let edit = TaskDraft {
        title: "Read ch.4".into(),
        ..read_ch3()
    };
    e.planner.update_task(&id, edit).unwrap();

    let history = e.planner.list_history();
    let mine: Vec<_> = history.iter().filter(|h| h.task_id == id).collect();
    assert_eq!(mine.len(), 3);
    assert_eq!(mine[0].version.title, "Read ch.4");
    assert_eq!(mine[2].version.title, "Read ch.3");
    assert!(mine.windows(2).all(|w| w[0].version.timestamp >= w[1].version.timestamp));
    assert!(mine.iter().all(|h| !h.version.deleted));
}

/// Equal timestamps fall back to reverse write order, across tasks too.
#[test]
fn test_history_ties_break_by_write_order() {
    let mut e = env();
    let a = e.planner.create_task(TaskDraft::new("a")).unwrap();
    let b = e.planner.create_task(TaskDraft::new("b")).unwrap();
    e.planner.update_task(&a, TaskDraft::new("a2")).unwrap();

    let order: Vec<(String, String)> = e
        .planner
        .list_history()
        .into_iter()
        .map(|h| (h.task_id, h.version.title))
        .collect();
    assert_eq!(
        order,
        vec![
            (a.clone(), "a2".to_string()),
            (b, "b".to_string()),
            (a, "a".to_string()),
        ]
    );
}

/// Scenario C: unscheduled task dropped onto a day.
#[test]
fn test_drop_moves_task_from_unscheduled_to_day_bucket() {
    let mut e = env();
    let id = e.planner.create_task(TaskDraft::new("Write notes")).unwrap();
    let reference = parse_day_key("2024-03-10").unwrap();

    let before = e.planner.bucket_by_date(reference);
    assert!(before.unscheduled.iter().any(|t| t.id == id));
    assert_eq!(before.scheduled_count(), 0);

    e.planner.move_task(&id, DropTarget::Day(reference)).unwrap();
    let after = e.planner.bucket_by_date(reference);
    assert!(after.unscheduled.is_empty());
    assert_eq!(after.by_date["2024-03-10"][0].id, id);
}

/// Scenario D: delete keeps the full history, tombstone included.
#[test]
fn test_delete_leaves_tombstone_in_history() {
    let mut e = env();
    let id = e.planner.create_task(read_ch3()).unwrap();
    e.clock.advance(Duration::minutes(1));
    e.planner.delete_task(&id).unwrap();

    assert!(e.planner.get_current(&id).is_none());
    let mine: Vec<_> = e
        .planner
        .list_history()
        .into_iter()
        .filter(|h| h.task_id == id)
        .collect();
    assert_eq!(mine.len(), 2);
    assert!(mine[0].version.deleted);
    assert_eq!(mine[0].version.title, "Read ch.3");
    assert!(!mine[1].version.deleted);
}

/// P1: histories only grow, and existing entries never change.
#[test]
fn test_histories_are_append_only() {
    let mut e = env();
    let id = e.planner.create_task(read_ch3()).unwrap();
    let mut seen = e.planner.history_of(&id).unwrap();

    let steps: Vec<Box<dyn Fn(&mut Planner, &str) -> Result<(), PlannerError>>> = vec![
        Box::new(|p: &mut Planner, id: &str| p.update_task(id, TaskDraft::new("x"))),
        Box::new(|p: &mut Planner, id: &str| p.move_task(id, DropTarget::Unscheduled)),
        Box::new(|p: &mut Planner, id: &str| p.delete_task(id)),
        Box::new(|p: &mut Planner, id: &str| p.delete_task(id)),
        Box::new(|p: &mut Planner, id: &str| p.update_task(id, TaskDraft::new("y"))),
    ];
    for step in steps {
        let _ = step(&mut e.planner, &id);
        let now = e.planner.history_of(&id).unwrap();
        assert!(now.len() >= seen.len());
        assert_eq!(&now[..seen.len()], &seen[..]);
        seen = now;
    }
    assert_eq!(seen.len(), 4);
}

/// P2 and P3: current state is the last live version; update after delete
/// is NotFound.
#[test]
fn test_update_after_delete_is_not_found() {
    let mut e = env();
    let id = e.planner.create_task(read_ch3()).unwrap();
    e.planner.update_task(&id, TaskDraft::new("v2")).unwrap();
    assert_eq!(e.planner.get_current(&id).unwrap().version.title, "v2");

    e.planner.delete_task(&id).unwrap();
    let err = e.planner.update_task(&id, TaskDraft::new("v3")).unwrap_err();
    assert!(matches!(err, PlannerError::NotFound(_)));
    assert!(e.planner.get_current(&id).is_none());
}

#[test]
fn test_validation_leaves_state_unchanged() {
    let mut e = env();
    let err = e.planner.create_task(TaskDraft::new("   ")).unwrap_err();
    assert!(matches!(err, PlannerError::Validation(_)));
    assert!(e.planner.list_current().is_empty());
    assert!(e.planner.list_history().is_empty());
}

/// P4 and P5: one alert per due time; rescheduling re-arms.
#[test]
fn test_notifications_fire_once_and_rearm_on_reschedule() {
    let mut e = env();
    // 2024-03-10 08:50 in Chicago (CDT started that morning).
    e.clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 13, 50, 0).unwrap());
    let id = e
        .planner
        .create_task(read_ch3().starting_at(parse_time_of_day("09:00").unwrap()))
        .unwrap();

    assert_eq!(e.planner.poll_notifications().fired.len(), 1);
    assert!(e.planner.poll_notifications().fired.is_empty());
    assert_eq!(e.alerts.fired().len(), 1);
    assert_eq!(e.alerts.fired()[0].tag, format!("tidemark-{id}"));

    e.planner
        .move_task(
            &id,
            DropTarget::Slot {
                date: parse_day_key("2024-03-10").unwrap(),
                time: parse_time_of_day("10:00").unwrap(),
            },
        )
        .unwrap();
    assert!(e.planner.notified_task_ids().is_empty());

    e.clock.set(Utc.with_ymd_and_hms(2024, 3, 10, 14, 50, 0).unwrap());
    assert_eq!(e.planner.poll_notifications().fired.len(), 1);
    assert!(e.planner.poll_notifications().fired.is_empty());
    assert_eq!(e.alerts.fired().len(), 2);
}

/// P6: every current task lands in exactly one bucket matching its date.
#[test]
fn test_bucketing_covers_every_current_task_once() {
    let mut e = env();
    let days = ["2024-03-09", "2024-03-10", "2024-03-10", "2024-03-31"];
    for (i, d) in days.iter().enumerate() {
        e.planner
            .create_task(TaskDraft::new(format!("t{i}")).scheduled_on(parse_day_key(d).unwrap()))
            .unwrap();
    }
    e.planner.create_task(TaskDraft::new("loose")).unwrap();

    let current = e.planner.list_current();
    let buckets = e.planner.bucket_by_date(parse_day_key("2024-03-10").unwrap());
    for t in &current {
        let hits: usize = buckets
            .by_date
            .values()
            .map(|b| b.iter().filter(|x| x.id == t.id).count())
            .sum();
        match t.version.scheduled_date {
            Some(d) => {
                assert_eq!(hits, 1);
                assert!(buckets.day(d).iter().any(|x| x.id == t.id));
                assert!(!buckets.unscheduled.iter().any(|x| x.id == t.id));
            }
            None => {
                assert_eq!(hits, 0);
                assert!(buckets.unscheduled.iter().any(|x| x.id == t.id));
            }
        }
    }
    assert_eq!(buckets.today().len(), 2);
}

/// P7: CSV export re-parses to the exact field values.
#[test]
fn test_delimited_export_round_trips_through_csv_reader() {
    let mut e = env();
    e.clock.set(start() + Duration::nanoseconds(123_456_789));
    let at = parse_time_of_day("10:20:30").unwrap();
    let tricky = ["plain", "comma, inside", "say \"hello\"", "two\nlines", "all, \"of\"\r\nit"];
    for t in tricky {
        let draft = TaskDraft::new(t)
            .with_description(t)
            .scheduled_on(parse_day_key("2024-03-04").unwrap())
            .starting_at(at);
        e.planner.create_task(draft).unwrap();
    }

    let text = e.planner.export_delimited(ExportScope::Current).unwrap();
    let mut reader = csv::Reader::from_reader(text.as_bytes());
    assert_eq!(reader.headers().unwrap().len(), 13);
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), tricky.len());
    let current = e.planner.list_current();
    for ((row, t), snap) in rows.iter().zip(tricky).zip(&current) {
        assert_eq!(&row[0], snap.id);
        assert_eq!(&row[4], t);
        assert_eq!(&row[6], t);
        let stamp = DateTime::parse_from_rfc3339(&row[3]).unwrap().with_timezone(&Utc);
        assert_eq!(stamp, snap.version.timestamp);
        assert_eq!(parse_time_of_day(&row[9]).unwrap(), at);
    }
}

#[test]
fn test_structured_history_export_includes_tombstones() {
    let mut e = env();
    let id = e.planner.create_task(read_ch3()).unwrap();
    e.planner.delete_task(&id).unwrap();

    let text = e.planner.export_structured(ExportScope::History).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
    let entries = doc["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().any(|v| v["deleted"] == true));

    let current = e.planner.export_structured(ExportScope::Current).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&current).unwrap();
    assert!(doc["entries"].as_array().unwrap().is_empty());
}

#[test]
fn test_state_survives_reopen_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Rc::new(FixedClock::new(start()));
    let id = {
        let store: Rc<dyn KeyValueStore> = Rc::new(FileStore::open(dir.path()).unwrap());
        let mut e = open_with(store, clock.clone(), "first");
        let id = e.planner.create_task(read_ch3()).unwrap();
        e.planner.update_task(&id, read_ch3().with_minutes(40)).unwrap();
        id
    };

    let store: Rc<dyn KeyValueStore> = Rc::new(FileStore::open(dir.path()).unwrap());
    let mut e = open_with(store, clock, "second");
    assert_eq!(e.planner.history_of(&id).unwrap().len(), 2);
    assert_eq!(e.planner.get_current(&id).unwrap().version.estimated_minutes, Some(40));

    // Revisions continue after reload, so new writes still sort first.
    let other = e.planner.create_task(TaskDraft::new("after reload")).unwrap();
    assert_eq!(e.planner.list_history()[0].task_id, other);
}

#[test]
fn test_opens_pre_versioned_browser_data() {
    let legacy = r#"[
        {"id":"lx1","title":"Quantum basics","category":"Quantum Computing","estimatedTime":"60",
         "date":"2024-03-10","startTime":"14:30","priority":"urgent-important","focus":"deep",
         "createdAt":"2024-03-01T08:00:00.000Z"},
        {"id":"lx2","history":[
            {"title":"Math drills","category":"Math","date":"","focusLevel":2,"createdAt":"2024-03-01T08:00:00.000Z"},
            {"title":"Math drills","category":"Math","focusLevel":2,"deleted":true,"updatedAt":"2024-03-02T08:00:00.000Z"}
        ]},
        {"id":"lx3","title":"Broken","focus":"frantic"}
    ]"#;
    let storage = Rc::new(MemoryStore::new().with_blob("learningTasks", legacy));
    let alerts = Rc::new(RecordingAlerts::new(Permission::Granted));
    let (planner, report) = Planner::open(
        Collaborators {
            storage,
            clock: Rc::new(FixedClock::new(start())),
            ids: Rc::new(SequentialIds::new("task")),
            alerts,
            timer: Rc::new(ManualTimer::new()),
        },
        PlannerConfig::default(),
    )
    .unwrap();

    assert_eq!(report.tasks.loaded, 2);
    assert_eq!(report.tasks.dropped, 1);
    assert!(!report.is_clean());

    let q = planner.get_current("lx1").unwrap();
    assert_eq!(q.version.category, Category::QuantumComputing);
    assert_eq!(q.version.focus_level.get(), 5);
    assert_eq!(q.version.estimated_minutes, Some(60));
    assert!(planner.get_current("lx2").is_none());
    assert_eq!(planner.history_of("lx2").unwrap().len(), 2);
}
