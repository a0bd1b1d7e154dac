//! Framing for several commands sent through one `adb shell` invocation.
//!
//! Each command is followed by an `echo` of a fixed marker plus the
//! command's exit status, so one stream of output can be cut back into
//! per-command replies. Older adb versions do not forward exit codes and
//! translate line endings to CRLF; the marker handles the first and
//! trimming `\r` handles the second.

use crate::error::{AdbFsError, Result};

use super::Reply;

/// Terminator echoed after each command in a batch
pub const END_OF_COMMAND: &str = "__ADBFS_EOC__";

/// Render one framed line for `command`
fn frame(command: &str) -> String {
    format!("{} 2>&1; echo \"{} $?\"", command, END_OF_COMMAND)
}

/// Script fed to the remote shell on stdin
pub fn render_script(commands: &[String]) -> String {
    let mut script = String::new();
    for command in commands {
        script.push_str(&frame(command));
        script.push('\n');
    }
    script.push_str("exit\n");
    script
}

/// Split the combined output of a framed script into one reply per command
pub fn parse_framed(commands: &[String], output: &str) -> Result<Vec<Reply>> {
    let framed: Vec<String> = commands.iter().map(|c| frame(c)).collect();
    let mut replies = Vec::with_capacity(commands.len());
    let mut lines: Vec<String> = Vec::new();

    for raw in output.lines() {
        let line = raw.trim_end_matches('\r');

        // Shells attached to a pty echo their input back
        if line == "exit" || framed.iter().any(|f| f == line) {
            continue;
        }

        match split_marker(line) {
            Some((before, status)) => {
                if !before.is_empty() {
                    lines.push(before.to_string());
                }
                replies.push(Reply {
                    lines: std::mem::take(&mut lines),
                    status,
                });
            }
            None => lines.push(line.to_string()),
        }
    }

    if replies.len() < commands.len() {
        let mut detail = lines.join("\n");
        if detail.is_empty() {
            detail = "output ended early".to_string();
        }
        return Err(AdbFsError::Remote(format!(
            "batch interrupted after {} of {} commands: {}",
            replies.len(),
            commands.len(),
            detail
        )));
    }
    Ok(replies)
}

/// Find a terminator on this line. A command whose output lacks a trailing
/// newline leaves the marker glued to its last line.
fn split_marker(line: &str) -> Option<(&str, i32)> {
    let idx = line.rfind(END_OF_COMMAND)?;
    let status = line[idx + END_OF_COMMAND.len()..].trim().parse::<i32>().ok()?;
    Some((&line[..idx], status))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmds(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_render_script() {
        let script = render_script(&cmds(&["ls -l '/'", "stat '/a'"]));
        let lines: Vec<&str> = script.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "ls -l '/' 2>&1; echo \"__ADBFS_EOC__ $?\"");
        assert_eq!(lines[2], "exit");
    }

    #[test]
    fn test_parse_framed() {
        let commands = cmds(&["ls -l '/'", "rm '/x'"]);
        let output = "drwxr-xr-x root root 2023-04-01 10:20 a\r\n\
                      __ADBFS_EOC__ 0\r\n\
                      rm: /x: No such file or directory\r\n\
                      __ADBFS_EOC__ 1\r\n";
        let replies = parse_framed(&commands, output).unwrap();
        assert_eq!(replies.len(), 2);
        assert!(replies[0].success());
        assert_eq!(replies[0].lines.len(), 1);
        assert_eq!(replies[1].status, 1);
        assert_eq!(replies[1].text(), "rm: /x: No such file or directory");
    }

    #[test]
    fn test_marker_glued_to_output() {
        let commands = cmds(&["cat '/f'"]);
        let replies = parse_framed(&commands, "no newline__ADBFS_EOC__ 0\n").unwrap();
        assert_eq!(replies[0].lines, vec!["no newline".to_string()]);
    }

    #[test]
    fn test_echoed_input_is_skipped() {
        let commands = cmds(&["mkdir '/a'"]);
        let output = format!("{}\n__ADBFS_EOC__ 0\nexit\n", render_script(&commands).lines().next().unwrap());
        let replies = parse_framed(&commands, &output).unwrap();
        assert!(replies[0].lines.is_empty());
    }

    #[test]
    fn test_truncated_output_is_an_error() {
        let commands = cmds(&["ls -l '/'", "ls -l '/a'"]);
        let err = parse_framed(&commands, "__ADBFS_EOC__ 0\npartial").unwrap_err();
        assert!(err.to_string().contains("1 of 2"));
        assert!(err.to_string().contains("partial"));
    }
}
