//! Small modal forms: new project, trigger build, download by id.
//!
//! Validation happens locally before anything is sent; a rejected form comes
//! back as an [`Error::validation`] and stays open with its input intact.

use crate::error::{Error, Result};
use crate::model::{NewBuild, NewProject, Project};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub label: &'static str,
    pub value: String,
    pub required: bool,
}

impl Field {
    fn new(label: &'static str, required: bool) -> Self {
        Self {
            label,
            value: String::new(),
            required,
        }
    }

    fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    fn trimmed(&self) -> &str {
        self.value.trim()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormKind {
    NewProject,
    TriggerBuild { project_id: u64, default_branch: String },
    DownloadById,
}

/// What a valid form turns into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    CreateProject(NewProject),
    CreateBuild(NewBuild),
    Download { build_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    kind: FormKind,
    fields: Vec<Field>,
    focus: usize,
}

impl Form {
    pub fn new_project() -> Self {
        Self {
            kind: FormKind::NewProject,
            fields: vec![
                Field::new("Name", true),
                Field::new("Repository URL", true),
                Field::new("Branch", false).with_value("main"),
                Field::new("Subdirectory", false),
            ],
            focus: 0,
        }
    }

    pub fn trigger_build(project: &Project) -> Self {
        let default_branch = if project.branch.trim().is_empty() {
            "main".to_string()
        } else {
            project.branch.trim().to_string()
        };
        Self {
            kind: FormKind::TriggerBuild {
                project_id: project.id,
                default_branch: default_branch.clone(),
            },
            fields: vec![Field::new("Branch", false).with_value(&default_branch)],
            focus: 0,
        }
    }

    pub fn download_by_id() -> Self {
        Self {
            kind: FormKind::DownloadById,
            fields: vec![Field::new("Build ID", true)],
            focus: 0,
        }
    }

    pub fn kind(&self) -> &FormKind {
        &self.kind
    }

    pub fn title(&self) -> String {
        match &self.kind {
            FormKind::NewProject => "New project".into(),
            FormKind::TriggerBuild { project_id, .. } => format!("Trigger build (project {project_id})"),
            FormKind::DownloadById => "Download artifact".into(),
        }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn next_field(&mut self) {
        self.focus = (self.focus + 1) % self.fields.len().max(1);
    }

    pub fn prev_field(&mut self) {
        let n = self.fields.len().max(1);
        self.focus = (self.focus + n - 1) % n;
    }

    pub fn push(&mut self, c: char) {
        if let Some(f) = self.fields.get_mut(self.focus) {
            f.value.push(c);
        }
    }

    pub fn pop(&mut self) {
        if let Some(f) = self.fields.get_mut(self.focus) {
            f.value.pop();
        }
    }

    pub fn set(&mut self, label: &str, value: &str) {
        if let Some(f) = self.fields.iter_mut().find(|f| f.label == label) {
            f.value = value.to_string();
        }
    }

    pub fn submit(&self) -> Result<Submission> {
        for f in &self.fields {
            if f.required && f.trimmed().is_empty() {
                return Err(Error::validation(format!(
                    "{} is required",
                    f.label.to_lowercase()
                )));
            }
        }
        match &self.kind {
            FormKind::NewProject => {
                let branch = match self.fields[2].trimmed() {
                    "" => "main",
                    b => b,
                };
                let subdir = Some(self.fields[3].trimmed())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Ok(Submission::CreateProject(NewProject {
                    name: self.fields[0].trimmed().to_string(),
                    repo_url: self.fields[1].trimmed().to_string(),
                    branch: branch.to_string(),
                    subdir,
                }))
            }
            FormKind::TriggerBuild {
                project_id,
                default_branch,
            } => {
                let branch = match self.fields[0].trimmed() {
                    "" => default_branch.as_str(),
                    b => b,
                };
                Ok(Submission::CreateBuild(NewBuild {
                    project_id: *project_id,
                    branch: branch.to_string(),
                }))
            }
            FormKind::DownloadById => {
                let raw = self.fields[0].trimmed();
                let build_id = raw
                    .parse::<u64>()
                    .map_err(|_| Error::validation(format!("'{raw}' is not a build id")))?;
                Ok(Submission::Download { build_id })
            }
        }
    }
}
