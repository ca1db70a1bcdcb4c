use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

pub struct CommandExecutor;

impl CommandExecutor {
    /// Run `program` with `args` (no shell). Only stderr is kept, for error reporting.
    pub async fn execute(program: &str, args: &[String]) -> std::io::Result<CommandResult> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;

        Ok(CommandResult {
            success: output.status.success(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            exit_code: output.status.code(),
        })
    }

    /// Render a command line for logs and error messages.
    pub fn render(program: &str, args: &[String]) -> String {
        let mut line = program.to_string();
        for arg in args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push('"');
                line.push_str(arg);
                line.push('"');
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_exit_code() {
        let ok = CommandExecutor::execute("true", &[]).await.unwrap();
        assert!(ok.success);
        assert_eq!(ok.exit_code, Some(0));

        let failed = CommandExecutor::execute("false", &[]).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_execute_missing_binary_is_io_error() {
        let result = CommandExecutor::execute("/nonexistent/mediumkube-test-binary", &[]).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_render_quotes_spaced_args() {
        let args = vec![
            "--comment".to_string(),
            "Auto generated by mediumkubed".to_string(),
        ];
        assert_eq!(
            CommandExecutor::render("iptables", &args),
            "iptables --comment \"Auto generated by mediumkubed\""
        );
    }
}
