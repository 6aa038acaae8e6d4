//! Tests for cross-task references, memoization and per-task error isolation.

mod common;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use common::{CountingRunner, EmptyFs, date};
use tickets_trigger::eval::RefError;
use tickets_trigger::{
    Environment, FilterOracle, FsError, JailedFs, ProcessRunner, Registry, SemanticError,
    TaskEntry, TaskError,
};

fn entries(names: &[&str]) -> Vec<TaskEntry> {
    names
        .iter()
        .map(|name| TaskEntry::new(Path::new("/tasks").join(name), *name))
        .collect()
}

fn registry(names: &[&str]) -> Registry {
    let env = Environment::new(date(2024, 1, 1), EmptyFs, CountingRunner::new("2021-06-07"));
    Registry::new(env, entries(names))
}

fn path(name: &str) -> PathBuf {
    Path::new("/tasks").join(name)
}

fn semantic_kind(result: Result<NaiveDate, TaskError>) -> SemanticError {
    match result {
        Err(err) => err
            .semantic_kind()
            .cloned()
            .unwrap_or_else(|| panic!("expected a semantic error, got {err:?}")),
        Ok(date) => panic!("expected an error, got {date}"),
    }
}

#[test]
fn refs_resolve_to_the_declaring_task() -> Result<()> {
    let registry = registry(&["2020-08-04 & id(1) - test", "ref(1) - test"]);
    assert_eq!(registry.date(&path("2020-08-04 & id(1) - test"))?, date(2020, 8, 4));
    assert_eq!(registry.date(&path("ref(1) - test"))?, date(2020, 8, 4));
    assert!(registry.evaluate(&path("ref(1) - test"))?.uses_reference);
    Ok(())
}

#[test]
fn refs_work_in_either_order() -> Result<()> {
    let registry = registry(&["ref(a) + 2030-01-01 - b", "2021-02-03 & id(a) - a"]);
    assert_eq!(registry.date(&path("ref(a) + 2030-01-01 - b"))?, date(2021, 2, 3));
    Ok(())
}

#[test]
fn duplicate_ids_are_poisoned() {
    let registry = registry(&["id(1) - one", "id(1) - two", "ref(1) - three"]);
    assert_eq!(
        registry.get_by_id("1", &HashSet::new()),
        Err(RefError::Semantic(SemanticError::DuplicateId("1".to_string())))
    );
    assert_eq!(
        semantic_kind(registry.date(&path("ref(1) - three"))),
        SemanticError::DuplicateId("1".to_string())
    );
}

#[test]
fn unknown_ids_are_not_found() {
    let registry = registry(&["ref(nope) - x"]);
    assert_eq!(
        semantic_kind(registry.date(&path("ref(nope) - x"))),
        SemanticError::IdNotFound("nope".to_string())
    );
}

#[test]
fn cycles_are_detected() {
    let registry = registry(&[
        "ref(a) & id(b) - x",
        "ref(b) & id(a) - y",
        "ref(s) & id(s) - self",
    ]);
    assert!(matches!(
        semantic_kind(registry.date(&path("ref(a) & id(b) - x"))),
        SemanticError::Cycle(_)
    ));
    assert!(matches!(
        semantic_kind(registry.date(&path("ref(b) & id(a) - y"))),
        SemanticError::Cycle(_)
    ));
    assert_eq!(
        semantic_kind(registry.date(&path("ref(s) & id(s) - self"))),
        SemanticError::Cycle("s".to_string())
    );
}

#[test]
fn shared_targets_are_not_cycles() -> Result<()> {
    let runner = CountingRunner::new("2021-06-07");
    let calls = runner.calls.clone();
    let env = Environment::new(date(2024, 1, 1), EmptyFs, runner);
    let registry = Registry::new(
        env,
        entries(&[
            "ref(b) & ref(c) - top",
            "ref(d) & id(b) - left",
            "ref(d) & 2022-02-02 & id(c) - right",
            "bin(next) & id(d) - bottom",
        ]),
    );

    assert_eq!(registry.date(&path("ref(b) & ref(c) - top"))?, date(2022, 2, 2));
    assert_eq!(registry.date(&path("ref(d) & id(b) - left"))?, date(2021, 6, 7));
    assert_eq!(calls.get(), 1);
    Ok(())
}

#[test]
fn a_broken_target_resurfaces_its_own_error() -> Result<()> {
    let registry = registry(&["bin(missing) & id(broken) - a", "ref(broken) - b"]);
    let own = registry.evaluate(&path("bin(missing) & id(broken) - a")).unwrap_err();
    let via_ref = registry.evaluate(&path("ref(broken) - b")).unwrap_err();
    assert_eq!(own, via_ref);
    assert_eq!(
        own.semantic_kind(),
        Some(&SemanticError::Fs(FsError::BinaryNotFound("missing".to_string())))
    );
    Ok(())
}

#[test]
fn syntax_errors_do_not_stop_the_batch() {
    let registry = registry(&["not a trigger.txt", "2020-01-01 - fine.txt"]);
    let results = registry.evaluate_all();
    assert_eq!(results.len(), 2);
    assert!(matches!(results[0].1, Err(TaskError::Syntax { .. })));
    assert_eq!(results[1].1.as_ref().map(|task| task.date), Ok(date(2020, 1, 1)));
    assert!(registry.tree(&path("not a trigger.txt")).is_err());
}

#[test]
fn evaluations_are_memoized() -> Result<()> {
    let runner = CountingRunner::new("2021-06-07");
    let calls = runner.calls.clone();
    let env = Environment::new(date(2024, 1, 1), EmptyFs, runner);
    let registry = Registry::new(
        env,
        entries(&["bin(next) & id(n) - a", "ref(n) - b", "ref(n) + 2030-01-01 - c"]),
    );

    for (entry, result) in registry.evaluate_all() {
        assert_eq!(result?.date, date(2021, 6, 7), "{}", entry.name);
    }
    registry.evaluate(&path("bin(next) & id(n) - a"))?;
    assert_eq!(calls.get(), 1);
    Ok(())
}

#[test]
fn done_names_come_from_the_registry() -> Result<()> {
    let registry = registry(&["2020-08-04P1W - t.txt", "2020-08-04 - u.txt"]);
    assert_eq!(registry.done_name(&path("2020-08-04P1W - t.txt"))?, "2024-01-08P1W - t.txt");
    assert_eq!(registry.done_name(&path("2020-08-04 - u.txt"))?, "2020-08-04 - u.txt");
    Ok(())
}

#[test]
fn unknown_paths_are_reported() {
    let registry = registry(&[]);
    assert!(matches!(
        semantic_kind(registry.date(&path("missing.txt"))),
        SemanticError::UnknownTask(_)
    ));
}

#[test]
fn non_empty_checks_the_jailed_filesystem() -> Result<()> {
    let jail = tempfile::tempdir()?;
    let tasks = jail.path().join("tasks");
    std::fs::create_dir_all(tasks.join("inbox"))?;
    std::fs::create_dir_all(tasks.join("empty"))?;
    std::fs::write(tasks.join("inbox/mail.eml"), "hello")?;

    let tasks_by_file = [
        ("full.txt", "builtin(non_empty, 2021-01-01, inbox) - full"),
        ("empty.txt", "builtin(non_empty, 2021-01-01, empty) - empty"),
        ("escape.txt", "builtin(non_empty, 2021-01-01, ../../etc) - escape"),
    ];
    let env = Environment::new(
        date(2024, 1, 1),
        JailedFs::new(jail.path(), jail.path().join("bin"))?,
        ProcessRunner::default(),
    );
    let registry = Registry::new(
        env,
        tasks_by_file
            .iter()
            .map(|(file, name)| TaskEntry::new(tasks.join(file), *name)),
    );

    assert_eq!(registry.date(&tasks.join("full.txt"))?, date(2021, 1, 1));
    assert_eq!(registry.date(&tasks.join("empty.txt"))?, NaiveDate::MAX);
    assert!(matches!(
        semantic_kind(registry.date(&tasks.join("escape.txt"))),
        SemanticError::Fs(FsError::OutsideJail(_))
    ));
    Ok(())
}

#[cfg(unix)]
#[test]
fn bin_runs_real_helpers() -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let jail = tempfile::tempdir()?;
    let bins = tempfile::tempdir()?;
    // Prints a month derived from the number of arguments
    let script = bins.path().join("next-date");
    std::fs::write(&script, "#!/bin/sh\necho 2021-0$#-15\n")?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

    let name = "bin(next-date, args())P1M - pay rent.txt";
    let env = Environment::new(
        date(2024, 1, 1),
        JailedFs::new(jail.path(), bins.path())?,
        ProcessRunner::default(),
    );
    let task = jail.path().join(name);
    let registry = Registry::new(env, [TaskEntry::new(&task, name)]);

    assert_eq!(registry.date(&task)?, date(2021, 1, 15));
    assert_eq!(registry.done_name(&task)?, "2021-02-15P1M - pay rent.txt");
    Ok(())
}

/// Tag filters keyed by their output location.
struct TagFilters(Vec<(PathBuf, bool)>);

impl FilterOracle for TagFilters {
    fn is_filter_output(&self, path: &Path) -> bool {
        self.0.iter().any(|(output, _)| output == path)
    }

    fn requires_action(&self, path: &Path) -> bool {
        self.0
            .iter()
            .any(|(output, requires_action)| output == path && *requires_action)
    }
}

fn filter_tasks() -> Vec<TaskEntry> {
    [
        ("urgent.txt", "builtin(filter, 2021-01-01, filters/urgent.md) - urgent"),
        ("calm.txt", "builtin(filter, 2021-01-01, filters/calm.md) - calm"),
        ("notes.txt", "builtin(filter, 2021-01-01, notes.md) - notes"),
    ]
    .iter()
    .map(|(file, name)| TaskEntry::new(path(file), *name))
    .collect()
}

#[test]
fn filter_asks_the_installed_oracle() -> Result<()> {
    let filters = TagFilters(vec![
        (path("filters/urgent.md"), true),
        (path("filters/calm.md"), false),
    ]);
    let env = Environment::new(date(2024, 1, 1), EmptyFs, CountingRunner::new("2021-06-07"))
        .with_filters(filters);
    let registry = Registry::new(env, filter_tasks());

    assert_eq!(registry.date(&path("urgent.txt"))?, date(2021, 1, 1));
    assert_eq!(registry.date(&path("calm.txt"))?, NaiveDate::MAX);
    assert_eq!(
        semantic_kind(registry.date(&path("notes.txt"))),
        SemanticError::NotAFilterOutput("notes.md".to_string())
    );
    Ok(())
}

#[test]
fn filter_without_an_oracle_finds_no_outputs() {
    let env = Environment::new(date(2024, 1, 1), EmptyFs, CountingRunner::new("2021-06-07"));
    let registry = Registry::new(env, filter_tasks());
    assert_eq!(
        semantic_kind(registry.date(&path("urgent.txt"))),
        SemanticError::NotAFilterOutput("filters/urgent.md".to_string())
    );
}
