//! Remediation prompt construction.

use crate::report::{now_iso8601, truncate_stack, ErrorReport};

/// Serialized context at or above this many characters is left out
pub const MAX_CONTEXT_CHARS: usize = 1000;

pub fn build_prompt(errors: &[ErrorReport], max_stack_length: usize) -> String {
    build_prompt_at(errors, max_stack_length, &now_iso8601())
}

/// Same as `build_prompt` with a fixed header timestamp
pub fn build_prompt_at(errors: &[ErrorReport], max_stack_length: usize, timestamp: &str) -> String {
    let count = errors.len();
    let mut prompt = String::new();

    prompt.push_str(&format!("# Runtime errors detected ({})\n\n", count));
    prompt.push_str(&format!("**Timestamp**: {}\n\n", timestamp));
    prompt.push_str(
        "The following errors were detected. **Inspect the project's source code, \
         identify the root cause, and fix it.**\n\n",
    );

    for (index, error) in errors.iter().enumerate() {
        prompt.push_str(&format!("## Error {}/{}\n\n", index + 1, count));
        prompt.push_str(&format!("**Message**: `{}`\n\n", error.message));

        if let Some(source) = &error.source {
            prompt.push_str(&format!("**Source**: {}\n\n", source));
        }

        if let Some(stack) = &error.stack {
            let stack = truncate_stack(stack, max_stack_length);
            prompt.push_str(&format!("**Stack trace**:\n```\n{}\n```\n\n", stack));
        }

        if let Some(context) = &error.context {
            if let Ok(context) = serde_json::to_string_pretty(context) {
                if context.chars().count() < MAX_CONTEXT_CHARS {
                    prompt.push_str(&format!("**Context**:\n```json\n{}\n```\n\n", context));
                }
            }
        }

        prompt.push_str("---\n\n");
    }

    prompt.push_str("\n**Next steps**:\n\n");
    prompt.push_str("1. Use each stack trace to locate where the error originates\n");
    prompt.push_str("2. Read the relevant source files\n");
    prompt.push_str("3. Analyze the root cause of the error\n");
    prompt.push_str("4. Propose a fix and apply it to the code where possible\n");
    prompt.push_str("5. When the fix is done, print `git diff` to report the changes\n\n");
    prompt.push_str(
        "**Important**: never run `git add` or `git commit`. Leave every change \
         unstaged and only review the diff.\n\n",
    );

    prompt
}
