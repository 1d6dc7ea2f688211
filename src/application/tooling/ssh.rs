use std::io::Read;
use std::net::TcpStream;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{Value, json};
use ssh2::{KeyboardInteractivePrompt, Prompt, Session};
use tracing::debug;

use super::interface::{Tool, ToolArgs, ToolError};

const EXIT_NOTE: &str =
    "(note: grep returns status 1 when no matches found, which is not an error)";

/// Runs commands on remote hosts over SSH. Authentication falls back from
/// ssh-agent to the default key files to an interactive password prompt.
pub struct SshTool;

#[async_trait]
impl Tool for SshTool {
    fn name(&self) -> &str {
        "ssh"
    }

    fn description(&self) -> String {
        "Execute a command on a REMOTE host via SSH. ALWAYS use this when user says 'ssh to', provides user@host, or mentions a remote server/IP address."
            .to_string()
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "host": {
                    "type": "string",
                    "description": "The remote host in format user@hostname or just hostname (uses current user)",
                },
                "command": {
                    "type": "string",
                    "description": "The command to execute on the remote host",
                },
            },
            "required": ["host", "command"],
        })
    }

    async fn invoke(&self, args: &ToolArgs) -> Result<String, ToolError> {
        let host = args
            .get("host")
            .and_then(Value::as_str)
            .ok_or(ToolError::MissingParameter { name: "host" })?
            .to_string();
        let command = args
            .get("command")
            .and_then(Value::as_str)
            .ok_or(ToolError::MissingParameter { name: "command" })?
            .to_string();

        let (user, mut addr) = split_host(&host);
        if !addr.contains(':') {
            addr.push_str(":22");
        }

        debug!(user = user.as_str(), addr = addr.as_str(), "running remote command over ssh");
        // The ssh2 session is blocking; keep it off the async executor.
        tokio::task::spawn_blocking(move || run_remote(&user, &addr, &command))
            .await
            .map_err(|err| ToolError::execution(format!("ssh task failed: {err}")))?
    }
}

fn run_remote(user: &str, addr: &str, command: &str) -> Result<String, ToolError> {
    let tcp = TcpStream::connect(addr).map_err(|err| ToolError::Connect {
        host: addr.to_string(),
        message: err.to_string(),
    })?;

    let mut session = Session::new().map_err(|err| ToolError::Connect {
        host: addr.to_string(),
        message: err.to_string(),
    })?;
    session.set_tcp_stream(tcp);
    // Host keys are not verified: zero-setup access to lab hosts is traded
    // against MITM resistance here.
    session.handshake().map_err(|err| ToolError::Connect {
        host: addr.to_string(),
        message: err.to_string(),
    })?;

    authenticate(&session, user, addr)?;

    let mut channel = session
        .channel_session()
        .map_err(|err| ToolError::execution(format!("failed to create session: {err}")))?;
    channel
        .exec(command)
        .map_err(|err| ToolError::execution(format!("failed to run command: {err}")))?;

    let mut stdout = String::new();
    channel
        .read_to_string(&mut stdout)
        .map_err(|err| ToolError::execution(format!("failed to read output: {err}")))?;
    let mut stderr = String::new();
    channel
        .stderr()
        .read_to_string(&mut stderr)
        .map_err(|err| ToolError::execution(format!("failed to read stderr: {err}")))?;

    channel
        .wait_close()
        .map_err(|err| ToolError::execution(format!("failed to close channel: {err}")))?;
    let status = channel
        .exit_status()
        .map_err(|err| ToolError::execution(format!("failed to read exit status: {err}")))?;

    let mut output = stdout;
    if !stderr.is_empty() {
        output.push_str("\nSTDERR:\n");
        output.push_str(&stderr);
    }

    if status != 0 {
        if output.is_empty() {
            output.push_str("(command produced no output)\n");
        }
        output.push_str(&format!("Command exited with status: {status} {EXIT_NOTE}"));
    } else if output.is_empty() {
        output.push_str("(command succeeded but produced no output)");
    }

    Ok(output)
}

/// Key-based methods first (agent, then default key files); an interactive
/// password prompt is the last resort, offered both as password auth and as
/// a keyboard-interactive responder that answers every challenge with the
/// same string.
fn authenticate(session: &Session, user: &str, addr: &str) -> Result<(), ToolError> {
    if std::env::var("SSH_AUTH_SOCK").is_ok_and(|sock| !sock.is_empty()) {
        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() && agent.list_identities().is_ok() {
                for identity in agent.identities().unwrap_or_default() {
                    if agent.userauth(user, &identity).is_ok() && session.authenticated() {
                        return Ok(());
                    }
                }
            }
        }
    }

    if let Some(home) = std::env::var_os("HOME") {
        for key_file in ["id_rsa", "id_ed25519", "id_ecdsa"] {
            let path = Path::new(&home).join(".ssh").join(key_file);
            if !path.exists() {
                continue;
            }
            if session.userauth_pubkey_file(user, None, &path, None).is_ok()
                && session.authenticated()
            {
                return Ok(());
            }
        }
    }

    let display_host = addr.trim_end_matches(":22");
    let password = rpassword::prompt_password(format!("Password for {user}@{display_host}: "))
        .map_err(|err| ToolError::execution(format!("failed to read password: {err}")))?;

    if session.userauth_password(user, &password).is_ok() && session.authenticated() {
        return Ok(());
    }

    let mut responder = PasswordResponder { password };
    session
        .userauth_keyboard_interactive(user, &mut responder)
        .map_err(|err| ToolError::execution(format!("authentication failed: {err}")))?;
    if session.authenticated() {
        Ok(())
    } else {
        Err(ToolError::execution(format!(
            "authentication failed for {user}@{display_host}"
        )))
    }
}

struct PasswordResponder {
    password: String,
}

impl KeyboardInteractivePrompt for PasswordResponder {
    fn prompt(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[Prompt<'_>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Splits `[user@]hostname`, substituting the login user (falling back to
/// `root`) when no user is given.
fn split_host(host: &str) -> (String, String) {
    if let Some((user, hostname)) = host.split_once('@') {
        return (user.to_string(), hostname.to_string());
    }
    let user = std::env::var("USER")
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| "root".to_string());
    (user, host.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_user_and_host() {
        assert_eq!(
            split_host("deploy@web01"),
            ("deploy".to_string(), "web01".to_string())
        );
    }

    #[test]
    fn keeps_port_with_host() {
        assert_eq!(
            split_host("ops@db01:2222"),
            ("ops".to_string(), "db01:2222".to_string())
        );
    }

    #[test]
    fn defaults_user_from_environment() {
        let (user, host) = split_host("standalone-host");
        assert_eq!(host, "standalone-host");
        assert!(!user.is_empty());
    }

    #[test]
    fn password_responder_answers_every_prompt() {
        let mut responder = PasswordResponder {
            password: "s3cret".to_string(),
        };
        let prompts = [
            Prompt {
                text: "Password:".into(),
                echo: false,
            },
            Prompt {
                text: "Verification code:".into(),
                echo: true,
            },
        ];
        let answers = responder.prompt("user", "", &prompts);
        assert_eq!(answers, vec!["s3cret".to_string(), "s3cret".to_string()]);
    }
}
