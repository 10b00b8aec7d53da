use std::fmt;

use engine_integration::{EngineSettings, EngineTask};
use serde_json::Value;
use shared::{
    domain::AnnotationId,
    protocol::{Project, Task},
};

use crate::mode::SessionMode;

const DEFAULT_INTERFACES: &[&str] = &[
    "basic",
    "controls",
    "submit",
    "update",
    "predictions",
    "topbar",
    "predictions:menu",
    "annotations:menu",
    "annotations:current",
    "annotations:history",
    "side-column",
    "edit-history",
];

const STREAM_INTERFACES: &[&str] = &["infobar", "topbar:prevnext"];

const EXPLORER_INTERFACES: &[&str] = &[
    "infobar",
    "annotations:add-new",
    "annotations:view-all",
    "annotations:delete",
    "annotations:tabs",
    "predictions:tabs",
];

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

/// Optional panels the host enables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostInterfaces {
    pub instruction: bool,
    pub ground_truth: bool,
    pub auto_annotation: bool,
}

/// Receives the computed interface list and whether the session is a label
/// stream, returns the list the engine boots with.
pub type InterfacesModifier = Box<dyn Fn(Vec<String>, bool) -> Vec<String> + Send + Sync>;

pub struct SessionOptions {
    pub project: Project,
    pub mode: SessionMode,
    pub user: Option<Value>,
    /// Task shown immediately in explorer mode.
    pub task: Option<Task>,
    /// Annotation to select once the engine store is ready.
    pub annotation: Option<AnnotationId>,
    pub interfaces: HostInterfaces,
    pub interactive_preannotations: bool,
    pub interfaces_modifier: Option<InterfacesModifier>,
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("project", &self.project.id)
            .field("mode", &self.mode)
            .field("task", &self.task.as_ref().map(|task| task.id))
            .field("annotation", &self.annotation)
            .field("interfaces", &self.interfaces)
            .field("interactive_preannotations", &self.interactive_preannotations)
            .field("interfaces_modifier", &self.interfaces_modifier.is_some())
            .finish()
    }
}

impl SessionOptions {
    pub fn new(project: Project, mode: SessionMode) -> Self {
        Self {
            project,
            mode,
            user: None,
            task: None,
            annotation: None,
            interfaces: HostInterfaces::default(),
            interactive_preannotations: false,
            interfaces_modifier: None,
        }
    }

    pub fn build_interfaces(&self) -> Vec<String> {
        let mut interfaces = owned(DEFAULT_INTERFACES);

        if !self.project.enable_empty_annotation {
            interfaces.push("annotations:deny-empty".into());
        }

        if self.mode.is_label_stream() {
            interfaces.extend(owned(STREAM_INTERFACES));
            if self.project.show_skip_button {
                interfaces.push("skip".into());
            }
        } else {
            interfaces.extend(owned(EXPLORER_INTERFACES));
        }

        if self.interfaces.instruction {
            interfaces.push("instruction".into());
        }
        if !self.mode.is_label_stream() && self.interfaces.ground_truth {
            interfaces.push("ground-truth".into());
        }
        if self.interfaces.auto_annotation {
            interfaces.push("auto-annotation".into());
        }
        if self.mode.review {
            interfaces.push("review".into());
            interfaces.push("annotations:tabs".into());
        }

        match &self.interfaces_modifier {
            Some(modifier) => modifier(interfaces, self.mode.is_label_stream()),
            None => interfaces,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            project_id: self.project.id,
            user: self.user.clone(),
            config: self.project.label_config.clone(),
            task: self.task.as_ref().map(EngineTask::from_task),
            description: self.project.instruction_text(),
            interfaces: self.build_interfaces(),
            force_auto_annotation: self.interactive_preannotations,
            force_auto_accept_suggestions: self.interactive_preannotations,
        }
    }
}

#[cfg(test)]
mod tests {
    use shared::domain::{ProjectId, TaskId};

    use super::*;

    fn project() -> Project {
        Project::new(ProjectId(4))
    }

    fn has(interfaces: &[String], name: &str) -> bool {
        interfaces.iter().any(|existing| existing == name)
    }

    #[test]
    fn explorer_gets_annotation_management_panels() {
        let mut options = SessionOptions::new(project(), SessionMode::explorer());
        options.interfaces.ground_truth = true;
        let interfaces = options.build_interfaces();

        assert!(interfaces.starts_with(&["basic".to_string(), "controls".to_string()]));
        assert!(has(&interfaces, "annotations:add-new"));
        assert!(has(&interfaces, "ground-truth"));
        assert!(!has(&interfaces, "skip"));
        assert!(!has(&interfaces, "review"));
    }

    #[test]
    fn stream_gets_navigation_and_skip_but_never_ground_truth() {
        let mut options = SessionOptions::new(project(), SessionMode::label_stream());
        options.interfaces.ground_truth = true;
        let interfaces = options.build_interfaces();

        assert!(has(&interfaces, "topbar:prevnext"));
        assert!(has(&interfaces, "skip"));
        assert!(!has(&interfaces, "ground-truth"));
        assert!(!has(&interfaces, "annotations:add-new"));

        let mut hidden_skip = project();
        hidden_skip.show_skip_button = false;
        let options = SessionOptions::new(hidden_skip, SessionMode::label_stream());
        assert!(!has(&options.build_interfaces(), "skip"));
    }

    #[test]
    fn review_and_deny_empty_toggles() {
        let mut strict = project();
        strict.enable_empty_annotation = false;
        let interfaces = SessionOptions::new(strict, SessionMode::stream_review()).build_interfaces();

        assert!(has(&interfaces, "annotations:deny-empty"));
        assert!(has(&interfaces, "review"));
        assert!(has(&interfaces, "annotations:tabs"));
    }

    #[test]
    fn modifier_runs_last_and_sees_stream_flag() {
        let mut options = SessionOptions::new(project(), SessionMode::label_stream());
        options.interfaces.instruction = true;
        options.interfaces_modifier = Some(Box::new(|interfaces: Vec<String>, is_stream: bool| {
            let mut kept: Vec<String> = interfaces
                .into_iter()
                .filter(|name| name != "instruction")
                .collect();
            if is_stream {
                kept.push("custom:stream".to_string());
            }
            kept
        }));
        let interfaces = options.build_interfaces();

        assert!(!has(&interfaces, "instruction"));
        assert_eq!(interfaces.last().map(String::as_str), Some("custom:stream"));
    }

    #[test]
    fn engine_settings_mirror_project_and_flags() {
        let mut project = project();
        project.label_config = Some("<View/>".to_string());
        project.instruction = Some("  label the cats \n".to_string());
        let mut options = SessionOptions::new(project, SessionMode::explorer());
        options.task = Some(Task::new(TaskId(9)));
        options.interactive_preannotations = true;

        let settings = options.engine_settings();
        assert_eq!(settings.project_id, ProjectId(4));
        assert_eq!(settings.config.as_deref(), Some("<View/>"));
        assert_eq!(settings.description.as_deref(), Some("label the cats"));
        assert_eq!(settings.task.map(|task| task.id), Some(TaskId(9)));
        assert!(settings.force_auto_annotation);
        assert!(settings.force_auto_accept_suggestions);
    }

    #[test]
    fn blank_instruction_has_no_description() {
        let mut project = project();
        project.instruction = Some("   ".to_string());
        let options = SessionOptions::new(project, SessionMode::explorer());
        assert_eq!(options.engine_settings().description, None);
    }
}
