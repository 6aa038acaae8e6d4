//! Fakes shared by the integration tests.
#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use chrono::NaiveDate;
use tickets_trigger::context::ProcessOutput;
use tickets_trigger::eval::{EvalContext, RefError};
use tickets_trigger::period::parse_date_text;
use tickets_trigger::{ExternalRunner, FileFacts, FsError, ProcessError, SemanticError, TaskFs};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid test date")
}

type Reply = Box<dyn Fn(&[String]) -> Result<String, ProcessError>>;

/// An [`EvalContext`] backed by plain values.
pub struct FakeContext {
    pub now: NaiveDate,
    pub refs: HashMap<String, NaiveDate>,
    pub lines: Vec<String>,
    pub target: Option<PathBuf>,
    pub reply: Reply,
    pub runs: RefCell<Vec<Vec<String>>>,
    pub builtin_calls: RefCell<Vec<(String, Vec<String>)>>,
}

impl FakeContext {
    pub fn new(now: NaiveDate) -> Self {
        Self {
            now,
            refs: HashMap::new(),
            lines: vec!["first line".to_string(), "second line".to_string()],
            target: None,
            reply: Box::new(|_| Ok("2021-01-01".to_string())),
            runs: RefCell::new(Vec::new()),
            builtin_calls: RefCell::new(Vec::new()),
        }
    }

    pub fn with_ref(mut self, id: &str, date: NaiveDate) -> Self {
        self.refs.insert(id.to_string(), date);
        self
    }

    pub fn with_reply(
        mut self,
        reply: impl Fn(&[String]) -> Result<String, ProcessError> + 'static,
    ) -> Self {
        self.reply = Box::new(reply);
        self
    }
}

impl EvalContext for FakeContext {
    fn now(&self) -> NaiveDate {
        self.now
    }

    fn resolve_ref(&self, id: &str) -> Result<NaiveDate, RefError> {
        self.refs
            .get(id)
            .copied()
            .ok_or_else(|| RefError::Semantic(SemanticError::IdNotFound(id.to_string())))
    }

    fn find_binary(&self, name: &str) -> Result<PathBuf, FsError> {
        if name == "missing" {
            return Err(FsError::BinaryNotFound(name.to_string()));
        }
        Ok(Path::new("/bins").join(name))
    }

    fn run_external(&self, argv: &[String]) -> Result<String, ProcessError> {
        self.runs.borrow_mut().push(argv.to_vec());
        (self.reply)(argv)
    }

    fn call_builtin(&self, name: &str, args: &[String]) -> Result<NaiveDate, SemanticError> {
        self.builtin_calls
            .borrow_mut()
            .push((name.to_string(), args.to_vec()));
        match (name, args.first()) {
            ("non_empty", Some(first)) => {
                parse_date_text(first).ok_or_else(|| SemanticError::InvalidDate(first.clone()))
            }
            _ => Err(SemanticError::UnknownBuiltin(name.to_string())),
        }
    }

    fn own_task_lines(&self) -> Result<Vec<String>, FsError> {
        Ok(self.lines.clone())
    }

    fn own_symlink_target(&self) -> Result<PathBuf, FsError> {
        self.target
            .clone()
            .ok_or_else(|| FsError::NotASymlink("task".to_string()))
    }

    fn own_task_path(&self) -> Result<PathBuf, FsError> {
        Ok(PathBuf::from("/tasks/task.txt"))
    }
}

/// A [`TaskFs`] with nothing in it except helper programs.
pub struct EmptyFs;

impl TaskFs for EmptyFs {
    fn resolve(&self, base: &Path, relative: &str) -> Result<PathBuf, FsError> {
        Ok(base.join(relative))
    }

    fn stat(&self, _path: &Path) -> Result<FileFacts, FsError> {
        Ok(FileFacts::default())
    }

    fn read_lines(&self, path: &Path) -> Result<Vec<String>, FsError> {
        Err(FsError::NotFound(path.display().to_string()))
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        Err(FsError::NotASymlink(path.display().to_string()))
    }

    fn native_path(&self, path: &Path) -> Result<PathBuf, FsError> {
        Ok(path.to_path_buf())
    }

    fn find_binary(&self, name: &str) -> Result<PathBuf, FsError> {
        if name == "missing" {
            return Err(FsError::BinaryNotFound(name.to_string()));
        }
        Ok(Path::new("/bins").join(name))
    }
}

/// An [`ExternalRunner`] that prints the same line every time and counts its calls.
#[derive(Clone)]
pub struct CountingRunner {
    pub line: String,
    pub calls: Rc<Cell<usize>>,
}

impl CountingRunner {
    pub fn new(line: &str) -> Self {
        Self {
            line: line.to_string(),
            calls: Rc::new(Cell::new(0)),
        }
    }
}

impl ExternalRunner for CountingRunner {
    fn run(&self, _argv: &[String]) -> Result<ProcessOutput, ProcessError> {
        self.calls.set(self.calls.get() + 1);
        Ok(ProcessOutput {
            code: Some(0),
            stdout: format!("{}\n", self.line),
            stderr: String::new(),
        })
    }
}
