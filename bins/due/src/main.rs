use std::fmt;
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use serde::Serialize;

use tickets_core::{config::ConfigArgs, printer, reader};
use tickets_trigger::period::format_date;
use tickets_trigger::{Environment, EvaluatedTask, JailedFs, ProcessRunner, Registry};

/// A command line tool for computing when tasks are due.
///
/// Every file in the task directory is a task whose name starts with a trigger, such as
/// `2020-08-04 & ref(1) - call mom.txt`. By default this prints the due date and flags of every
/// task, or the error that stopped it from being evaluated. With `--done`, it prints the name the
/// given task should be renamed to once it is completed.
#[derive(Parser, Debug)]
#[command(name = "tickets-due", about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub printer: printer::PrinterArgs,

    #[command(flatten)]
    pub read_opts: reader::ReaderOpts,

    #[command(flatten)]
    pub config: ConfigArgs,

    /// Evaluate as if today were this date (YYYY-MM-DD). Defaults to the local date
    #[arg(long)]
    pub now: Option<NaiveDate>,

    /// Print the done name of the task with this file name instead of evaluating every task
    #[arg(long)]
    pub done: Option<String>,

    /// Only list tasks that are due today or earlier, and tasks with errors
    #[arg(long)]
    pub due_only: bool,
}

/// The outcome of evaluating one task.
#[derive(Debug, Serialize)]
pub struct TaskReport<'a> {
    pub name: &'a str,
    pub path: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<&'a EvaluatedTask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for TaskReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(task) = self.task else {
            return write!(
                f,
                "error\t{}\t{}",
                self.name,
                self.error.as_deref().unwrap_or_default()
            );
        };

        let when = if task.is_waiting {
            "waiting".to_string()
        } else if task.date == NaiveDate::MAX {
            "never".to_string()
        } else {
            format_date(task.date)
        };
        let mut flags = String::new();
        if let Some(time) = task.time {
            flags.push_str(&time.format(" %H:%M").to_string());
        }
        if task.is_repeating {
            flags.push_str(" repeat");
        }
        if let Some(priority) = task.priority {
            flags.push_str(&format!(" #{priority}"));
        }
        write!(f, "{when}{flags}\t{}", self.name)
    }
}

/// The done name of one task.
#[derive(Debug, Serialize)]
pub struct DoneReport<'a> {
    pub name: &'a str,
    pub done_name: String,
}

impl fmt::Display for DoneReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.done_name)
    }
}

/// Evaluate every task in the registry. Failing tasks are reported, never fatal.
fn reports(registry: &Registry, due_only: bool) -> Vec<TaskReport<'_>> {
    let now = registry.environment().now;
    registry
        .evaluate_all()
        .into_iter()
        .map(|(entry, result)| match result {
            Ok(task) => TaskReport {
                name: &entry.name,
                path: &entry.path,
                task: Some(task),
                error: None,
            },
            Err(err) => {
                log::warn!("{}: {err}", entry.name);
                TaskReport {
                    name: &entry.name,
                    path: &entry.path,
                    task: None,
                    error: Some(err.to_string()),
                }
            }
        })
        .filter(|report| !due_only || report.task.is_none_or(|task| task.date <= now))
        .collect()
}

fn done_report<'a>(registry: &'a Registry, name: &str) -> anyhow::Result<DoneReport<'a>> {
    let entry = registry
        .tasks()
        .find(|entry| entry.name == name)
        .with_context(|| format!("no task named '{name}'"))?;
    let done_name = registry.done_name(&entry.path)?;
    Ok(DoneReport {
        name: &entry.name,
        done_name,
    })
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::init();

    let settings = cli.config.settings()?;
    let task_dir = &cli.read_opts.task_dir;
    let jail_root = settings.jail_root_for(task_dir);
    let fs = JailedFs::new(&jail_root, settings.bin_dir_for(&jail_root))
        .with_context(|| format!("invalid jail root {}", jail_root.display()))?;
    let now = cli
        .now
        .unwrap_or_else(|| chrono::Local::now().date_naive());
    let env = Environment::new(now, fs, ProcessRunner::new(settings.timeout()));

    let entries = cli.read_opts.read_tasks()?;
    log::debug!("found {} task(s) in {}", entries.len(), task_dir.display());
    let registry = Registry::new(env, entries);

    let mut writer = std::io::stdout();
    match &cli.done {
        Some(name) => {
            let report = done_report(&registry, name)?;
            cli.printer.print(&[report], &mut writer)
        }
        None => cli
            .printer
            .print(&reports(&registry, cli.due_only), &mut writer),
    }
}
