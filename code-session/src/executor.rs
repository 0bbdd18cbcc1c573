use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{languages::BuildPlan, types::CompileResult, workspace::Workspace};

/// Runs a plan's compile step to completion before any interactive run
#[derive(Debug, Clone, Default)]
pub struct BuildExecutor {}

impl BuildExecutor {
    pub fn new() -> Self {
        Self {}
    }

    /// Compiles the workspace sources. Plans without a compile step trivially succeed.
    pub async fn compile(&self, plan: &BuildPlan, workspace: &Workspace) -> CompileResult {
        let Some(template) = &plan.compile else {
            return CompileResult {
                succeeded: true,
                output: String::new(),
            };
        };

        let (program, args) = template.render(workspace.root(), workspace.source());
        debug!("Compiling {} with {} {:?}", plan.language, program, args);

        let output = match Command::new(&program)
            .args(&args)
            .current_dir(workspace.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to run compiler {}: {}", program, e);
                return CompileResult {
                    succeeded: false,
                    output: format!("Failed to run compiler {}: {}", program, e),
                };
            }
        };

        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stdout));

        if output.status.success() {
            return CompileResult {
                succeeded: true,
                output: text,
            };
        }

        debug!("Compilation of {} failed: {}", plan.language, output.status);
        if text.trim().is_empty() {
            text = format!("Compilation failed: {} exited with {}", program, output.status);
        }
        CompileResult {
            succeeded: false,
            output: text,
        }
    }
}
