//! Cognitive stages: stateless processors that read the task context,
//! talk to the model where needed, and hand their output back to the
//! agent for the next FSM transition.

pub mod actor;
pub mod planner;
pub mod reflector;
pub mod thinker;

pub use actor::Actor;
pub use planner::Planner;
pub use reflector::Reflector;
pub use thinker::Thinker;

use std::path::Path;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persona
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identity block combined with each stage's instruction to form the
/// system prompt.
#[derive(Debug, Clone)]
pub struct Persona {
    pub name: String,
    pub identity: String,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Pegasus".into(),
            identity: "You are Pegasus, a personal assistant. You are direct, \
                       concise, and helpful. You use tools when they help and \
                       answer from knowledge when they don't."
                .into(),
        }
    }
}

pub(crate) fn system_prompt(persona: &Persona, instruction: &str) -> String {
    format!("{}\n\n{instruction}", persona.identity)
}

/// Index of known knowledge files, offered to the thinker on a task's
/// first iteration.
pub(crate) fn memory_index(memory_dir: &Path) -> Option<String> {
    let entries = std::fs::read_dir(memory_dir).ok()?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    if names.is_empty() {
        return None;
    }
    names.sort();
    Some(format!("Known knowledge files:\n{}", names.join("\n")))
}
