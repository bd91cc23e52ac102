//! Instructions a consumer can ask the simulator to perform.
//!
//! Configuration layers parse their action blocks into this union once, at
//! load time; the facade executes it without re-inspecting shapes.

use serde::{Deserialize, Serialize};

use super::value::Value;

/// A simulator-bound action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Instruction {
    /// One-shot command activation, optionally held for `duration` seconds.
    Command { path: String, #[serde(default)] duration: f64 },
    /// Start of a begin/end command pulse.
    CommandBegin { path: String },
    /// End of a begin/end command pulse.
    CommandEnd { path: String },
    /// Write a value to a dataref (path may carry an `[index]` suffix).
    SetDataref { path: String, value: Value },
    /// Ordered sequence of instructions executed one after another.
    Macro { instructions: Vec<Instruction> },
}

/// Command paths that mean "do nothing" in configuration files.
const NO_OPERATION: &[&str] = &["none", "noop", "nooperation", "nocommand", "donothing"];

impl Instruction {
    pub fn command(path: impl Into<String>) -> Self {
        Instruction::Command { path: path.into(), duration: 0.0 }
    }

    pub fn begin(path: impl Into<String>) -> Self {
        Instruction::CommandBegin { path: path.into() }
    }

    pub fn end(path: impl Into<String>) -> Self {
        Instruction::CommandEnd { path: path.into() }
    }

    pub fn set_dataref(path: impl Into<String>, value: Value) -> Self {
        Instruction::SetDataref { path: path.into(), value }
    }

    /// Whether this is a configuration placeholder that performs no action.
    pub fn is_no_operation(&self) -> bool {
        match self {
            Instruction::Command { path, .. }
            | Instruction::CommandBegin { path }
            | Instruction::CommandEnd { path } => {
                let normalized: String = path
                    .to_lowercase()
                    .chars()
                    .filter(|c| !matches!(c, '-' | '_' | ':' | '/'))
                    .collect();
                NO_OPERATION.contains(&normalized.as_str())
            }
            Instruction::SetDataref { .. } => false,
            Instruction::Macro { instructions } => instructions.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_operation_detection() {
        assert!(Instruction::command("none").is_no_operation());
        assert!(Instruction::command("No-Op").is_no_operation());
        assert!(!Instruction::command("sim/apu/start").is_no_operation());
        assert!(Instruction::Macro { instructions: vec![] }.is_no_operation());
    }

    #[test]
    fn tagged_deserialization() {
        let parsed: Instruction = serde_json::from_str(
            r#"{"kind":"set-dataref","path":"sim/x[2]","value":1.5}"#,
        )
        .unwrap();
        assert_eq!(parsed, Instruction::set_dataref("sim/x[2]", Value::Number(1.5)));
    }
}
