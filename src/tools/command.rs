//! Run-command templates and per-target file naming

use crate::errors::{Result, ScanError};
use std::path::{Path, PathBuf};

/// Placeholder substituted with the scan target
pub const TARGET_PLACEHOLDER: &str = "target";

/// Substitute `target` into a run-command template
///
/// `{target}` is replaced, `{{` and `}}` produce literal braces. Any other
/// placeholder or an unbalanced brace is a template error.
pub fn render(template: &str, target: &str) -> Result<String> {
    let mut rendered = String::with_capacity(template.len() + target.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    rendered.push('{');
                    continue;
                }
                let mut name = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    match inner {
                        '}' => {
                            closed = true;
                            break;
                        }
                        '{' => {
                            return Err(template_error(template, "nested '{' in placeholder"));
                        }
                        other => name.push(other),
                    }
                }
                if !closed {
                    return Err(template_error(template, "unterminated '{'"));
                }
                if name != TARGET_PLACEHOLDER {
                    return Err(template_error(
                        template,
                        &format!("unknown placeholder '{{{}}}'", name),
                    ));
                }
                rendered.push_str(target);
            }
            '}' => {
                if chars.peek() == Some(&'}') {
                    chars.next();
                    rendered.push('}');
                } else {
                    return Err(template_error(template, "single '}' outside a placeholder"));
                }
            }
            other => rendered.push(other),
        }
    }

    Ok(rendered)
}

/// Check a template without rendering; returns whether it uses `{target}`
pub fn validate(template: &str) -> Result<bool> {
    // A sentinel no template would contain literally
    const PROBE: &str = "\u{0}probe\u{0}";
    let rendered = render(template, PROBE)?;
    Ok(rendered.contains(PROBE))
}

/// Filesystem-safe file stem derived from a target string
pub fn sanitize_target(target: &str) -> String {
    let collapsed = target.replace("://", "_");
    let sanitized: String = collapsed
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    // Keep "." and ".." from naming a directory entry
    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        "target".to_string()
    } else {
        sanitized
    }
}

/// `<tool_output_dir>/<sanitized target>.log`
pub fn log_file_path(tool_output_dir: &Path, target: &str) -> PathBuf {
    tool_output_dir.join(format!("{}.log", sanitize_target(target)))
}

/// Build a platform shell invocation for a full command line
pub fn shell_command(command_line: &str) -> tokio::process::Command {
    #[cfg(unix)]
    {
        let mut c = tokio::process::Command::new("sh");
        c.arg("-c");
        c.arg(command_line);
        c
    }
    #[cfg(windows)]
    {
        let mut c = tokio::process::Command::new("cmd");
        c.arg("/C");
        c.arg(command_line);
        c
    }
}

fn template_error(template: &str, reason: &str) -> ScanError {
    ScanError::Template {
        template: template.to_string(),
        reason: reason.to_string(),
    }
}
