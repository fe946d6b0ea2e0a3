//! Drives the running editor: launch, focus, open a folder, and type into the AI panel.
//!
//! Everything platform-specific sits behind [`EditorDriver`]. [`Automator`] owns the
//! sequencing (when to switch projects, when to open the panel, how often to retry) and
//! confirms panel state through [`PanelProbe`], which reads the workspace database.

use crate::utils::{self, Poll};
use crate::workspace::StorageLayout;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Bundle identifier of the editor on macOS.
pub const BUNDLE_ID: &str = "com.todesktop.230313mzl4w4u92";
const APP_NAME: &str = "Cursor";
const CLI: &str = "cursor";

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("editor automation is not supported on this platform")]
    Unsupported,
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("{0}")]
    InvalidInput(String),
    #[error("workspace not found: {0}")]
    UnknownWorkspace(String),
}

impl AutomationError {
    /// Failures that may go away on another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Spawn { .. } | Self::Command { .. } | Self::Timeout(_))
    }
}

pub type Result<T, E = AutomationError> = std::result::Result<T, E>;

/// Primitive actions against the editor process.
pub trait EditorDriver: Send + Sync {
    fn launch(&self) -> Result<()>;
    fn activate(&self) -> Result<()>;
    fn quit(&self) -> Result<()>;
    fn open_folder(&self, root: &Path) -> Result<()>;
    /// Press the AI panel shortcut. Opens the panel when it is hidden.
    fn toggle_chat_panel(&self) -> Result<()>;
    /// Paste `text` into the focused input.
    fn paste(&self, text: &str) -> Result<()>;
    /// Submit whatever the focused input holds.
    fn submit(&self) -> Result<()>;
}

/// Observes whether a workspace's AI panel is hidden.
pub trait PanelProbe: Send + Sync {
    /// `None` when the workspace is unknown.
    fn panel_hidden(&self, workspace_id: &str) -> Option<bool>;
}

impl PanelProbe for StorageLayout {
    fn panel_hidden(&self, workspace_id: &str) -> Option<bool> {
        StorageLayout::panel_hidden(self, workspace_id)
    }
}

// ---------------------------------------------------------------------------
// System driver
// ---------------------------------------------------------------------------

/// AppleScript on macOS; elsewhere only the `cursor` command line is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDriver;

fn run(program: &str, args: &[&str]) -> Result<String> {
    debug!(program, ?args, "Running");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| AutomationError::Spawn {
            program: program.to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(AutomationError::Command {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn spawn_detached(program: &str, args: &[&str]) -> Result<()> {
    debug!(program, ?args, "Spawning");
    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|source| AutomationError::Spawn {
            program: program.to_string(),
            source,
        })
}

fn osascript(script: &str) -> Result<String> {
    run("osascript", &["-e", script])
}

fn set_clipboard(text: &str) -> Result<()> {
    let spawn_err = |source: io::Error| AutomationError::Spawn {
        program: "pbcopy".to_string(),
        source,
    };
    let mut child = Command::new("pbcopy")
        .stdin(Stdio::piped())
        .spawn()
        .map_err(spawn_err)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(text.as_bytes()).map_err(spawn_err)?;
    }
    let status = child.wait().map_err(spawn_err)?;
    if !status.success() {
        return Err(AutomationError::Command {
            program: "pbcopy".to_string(),
            status: status.to_string(),
            stderr: String::new(),
        });
    }
    Ok(())
}

const IS_MACOS: bool = cfg!(target_os = "macos");

impl EditorDriver for SystemDriver {
    fn launch(&self) -> Result<()> {
        if IS_MACOS {
            run("open", &["-a", APP_NAME]).map(|_| ())
        } else {
            spawn_detached(CLI, &[])
        }
    }

    fn activate(&self) -> Result<()> {
        if !IS_MACOS {
            return Err(AutomationError::Unsupported);
        }
        let by_id = format!("tell application id \"{BUNDLE_ID}\" to activate");
        match osascript(&by_id) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!("Activation by bundle id failed, retrying by name: {e}");
                osascript(&format!("tell application \"{APP_NAME}\" to activate")).map(|_| ())
            }
        }
    }

    fn quit(&self) -> Result<()> {
        if !IS_MACOS {
            return Err(AutomationError::Unsupported);
        }
        osascript(&format!("tell application id \"{BUNDLE_ID}\" to quit")).map(|_| ())
    }

    fn open_folder(&self, root: &Path) -> Result<()> {
        let root = root.to_string_lossy();
        if IS_MACOS {
            run("open", &["-a", APP_NAME, &*root]).map(|_| ())
        } else {
            spawn_detached(CLI, &[&*root])
        }
    }

    fn toggle_chat_panel(&self) -> Result<()> {
        if !IS_MACOS {
            return Err(AutomationError::Unsupported);
        }
        osascript("tell application \"System Events\" to keystroke \"i\" using command down")
            .map(|_| ())
    }

    fn paste(&self, text: &str) -> Result<()> {
        if !IS_MACOS {
            return Err(AutomationError::Unsupported);
        }
        set_clipboard(text)?;
        osascript("tell application \"System Events\" to keystroke \"v\" using command down")
            .map(|_| ())
    }

    fn submit(&self) -> Result<()> {
        if !IS_MACOS {
            return Err(AutomationError::Unsupported);
        }
        // Return key
        osascript("tell application \"System Events\" to key code 36").map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// Sequencing
// ---------------------------------------------------------------------------

/// Which workspace the editor window is currently pointed at, as far as we know.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TargetContext {
    pub current_workspace: Option<String>,
}

/// Timing of automation sequences.
#[derive(Debug, Clone, Copy)]
pub struct SendPolicy {
    pub attempts: u32,
    pub retry_delay: Duration,
    /// Pause after launching the editor.
    pub launch_settle: Duration,
    /// Pause after opening a folder, while the window reloads.
    pub switch_settle: Duration,
    /// Pause after focusing the window.
    pub focus_settle: Duration,
    pub panel_poll: Poll,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_delay: Duration::from_secs(2),
            launch_settle: Duration::from_secs(3),
            switch_settle: Duration::from_secs(5),
            focus_settle: Duration::from_millis(500),
            panel_poll: Poll::new(Duration::from_millis(500), Duration::from_secs(5)),
        }
    }
}

impl SendPolicy {
    /// No pauses and a single attempt.
    pub fn immediate() -> Self {
        Self {
            attempts: 1,
            retry_delay: Duration::ZERO,
            launch_settle: Duration::ZERO,
            switch_settle: Duration::ZERO,
            focus_settle: Duration::ZERO,
            panel_poll: Poll::new(Duration::ZERO, Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendRequest {
    pub message: String,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(rename = "rootPath", default)]
    pub root_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    pub project_switched: bool,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelOutcome {
    /// Whether the shortcut was pressed.
    pub toggled: bool,
    /// Whether the open state was read back from the workspace database.
    pub confirmed: bool,
}

#[derive(Clone)]
pub struct Automator {
    driver: Arc<dyn EditorDriver>,
    probe: Arc<dyn PanelProbe>,
    policy: SendPolicy,
}

impl Automator {
    pub fn new(driver: Arc<dyn EditorDriver>, probe: Arc<dyn PanelProbe>, policy: SendPolicy) -> Self {
        Self {
            driver,
            probe,
            policy,
        }
    }

    pub fn system(layout: StorageLayout) -> Self {
        Self::new(Arc::new(SystemDriver), Arc::new(layout), SendPolicy::default())
    }

    pub fn open(&self) -> Result<()> {
        self.driver.launch()?;
        thread::sleep(self.policy.launch_settle);
        info!("Launched editor");
        Ok(())
    }

    pub fn activate(&self) -> Result<()> {
        self.driver.activate()?;
        thread::sleep(self.policy.focus_settle);
        Ok(())
    }

    pub fn quit(&self) -> Result<()> {
        self.driver.quit()?;
        info!("Asked editor to quit");
        Ok(())
    }

    /// Make sure the AI panel is open.
    ///
    /// With a workspace id the panel state is checked before and after pressing the
    /// shortcut. Without one the shortcut is pressed once and nothing is confirmed.
    pub fn open_panel(&self, workspace_id: Option<&str>, skip_activation: bool) -> Result<PanelOutcome> {
        if !skip_activation {
            self.activate()?;
        }
        let Some(ws) = workspace_id else {
            self.driver.toggle_chat_panel()?;
            return Ok(PanelOutcome {
                toggled: true,
                confirmed: false,
            });
        };

        match self.probe.panel_hidden(ws) {
            None => Err(AutomationError::UnknownWorkspace(ws.to_string())),
            Some(false) => Ok(PanelOutcome {
                toggled: false,
                confirmed: true,
            }),
            Some(true) => {
                self.driver.toggle_chat_panel()?;
                let opened = utils::wait_until(self.policy.panel_poll, || {
                    self.probe.panel_hidden(ws) == Some(false)
                });
                if !opened {
                    return Err(AutomationError::Timeout("the AI panel to open"));
                }
                Ok(PanelOutcome {
                    toggled: true,
                    confirmed: true,
                })
            }
        }
    }

    /// Point the editor at `root_path` and remember `workspace_id` as the new target.
    pub fn switch_project(
        &self,
        ctx: &mut TargetContext,
        root_path: &str,
        workspace_id: Option<&str>,
    ) -> Result<()> {
        let root_path = root_path.trim();
        if root_path.is_empty() {
            return Err(AutomationError::InvalidInput("rootPath cannot be empty".to_string()));
        }
        let root = Path::new(root_path);
        if !root.exists() {
            warn!(root = root_path, "Project path does not exist locally");
        }
        self.driver.open_folder(root)?;
        thread::sleep(self.policy.switch_settle);
        info!(root = root_path, workspace_id, "Switched project");
        ctx.current_workspace = workspace_id.map(str::to_string);
        Ok(())
    }

    /// Type `request.message` into the editor's AI panel.
    ///
    /// Switches project first when the request targets a workspace other than the
    /// current one and says where it lives. The activate/open/paste sequence is
    /// retried on transient failures. A failed project switch or submit is not retried,
    /// so the message is never pasted twice after it was pasted successfully.
    pub fn send_message(&self, ctx: &mut TargetContext, request: &SendRequest) -> Result<SendOutcome> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(AutomationError::EmptyMessage);
        }

        let workspace_id = request.workspace_id.as_deref().filter(|w| !w.is_empty());
        let mut project_switched = false;
        if let Some(ws) = workspace_id
            && ctx.current_workspace.as_deref() != Some(ws)
        {
            match request.root_path.as_deref().filter(|r| !r.trim().is_empty()) {
                Some(root) => {
                    self.switch_project(ctx, root, Some(ws))?;
                    project_switched = true;
                }
                None => warn!(workspace_id = ws, "Workspace changed but no rootPath to switch to"),
            }
        }

        let mut attempts = 0;
        utils::retry_if(
            self.policy.attempts,
            self.policy.retry_delay,
            AutomationError::is_transient,
            |attempt| {
                attempts = attempt;
                // Opening a folder already focuses the window.
                self.open_panel(workspace_id, project_switched)?;
                self.driver.paste(message)
            },
        )?;
        self.driver.submit()?;

        info!(attempts, project_switched, chars = message.chars().count(), "Message sent");
        Ok(SendOutcome {
            project_switched,
            attempts,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory editor: records every call and keeps a panel flag per workspace.
    #[derive(Default)]
    pub struct FakeEditor {
        pub calls: Mutex<Vec<String>>,
        pub panels: Mutex<HashMap<String, bool>>,
        /// Workspace whose panel the shortcut toggles.
        pub focused: Mutex<Option<String>>,
        /// Number of upcoming `paste` calls that fail.
        pub paste_failures: Mutex<u32>,
        pub submit_fails: bool,
        pub toggle_is_noop: bool,
        pub unsupported: bool,
    }

    impl FakeEditor {
        pub fn with_panel(workspace_id: &str, hidden: bool) -> Self {
            let fake = Self::default();
            fake.panels.lock().unwrap().insert(workspace_id.to_string(), hidden);
            *fake.focused.lock().unwrap() = Some(workspace_id.to_string());
            fake
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) -> Result<()> {
            if self.unsupported {
                return Err(AutomationError::Unsupported);
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }
    }

    impl EditorDriver for FakeEditor {
        fn launch(&self) -> Result<()> {
            self.record("launch".into())
        }

        fn activate(&self) -> Result<()> {
            self.record("activate".into())
        }

        fn quit(&self) -> Result<()> {
            self.record("quit".into())
        }

        fn open_folder(&self, root: &Path) -> Result<()> {
            self.record(format!("open_folder {}", root.display()))
        }

        fn toggle_chat_panel(&self) -> Result<()> {
            self.record("toggle".into())?;
            if self.toggle_is_noop {
                return Ok(());
            }
            if let Some(ws) = self.focused.lock().unwrap().clone()
                && let Some(hidden) = self.panels.lock().unwrap().get_mut(&ws)
            {
                *hidden = !*hidden;
            }
            Ok(())
        }

        fn submit(&self) -> Result<()> {
            self.record("submit".into())?;
            if self.submit_fails {
                return Err(AutomationError::Command {
                    program: "osascript".into(),
                    status: "exit status: 1".into(),
                    stderr: "key code rejected".into(),
                });
            }
            Ok(())
        }

        fn paste(&self, text: &str) -> Result<()> {
            self.record(format!("paste {text}"))?;
            let mut failures = self.paste_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(AutomationError::Command {
                    program: "osascript".into(),
                    status: "exit status: 1".into(),
                    stderr: "not focused".into(),
                });
            }
            Ok(())
        }
    }

    impl PanelProbe for FakeEditor {
        fn panel_hidden(&self, workspace_id: &str) -> Option<bool> {
            self.panels.lock().unwrap().get(workspace_id).copied()
        }
    }

    pub fn automator(fake: &Arc<FakeEditor>, policy: SendPolicy) -> Automator {
        Automator::new(fake.clone(), fake.clone(), policy)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{FakeEditor, automator};
    use super::*;

    fn request(message: &str, ws: Option<&str>, root: Option<&str>) -> SendRequest {
        SendRequest {
            message: message.to_string(),
            workspace_id: ws.map(str::to_string),
            root_path: root.map(str::to_string),
        }
    }

    #[test]
    fn empty_message_is_rejected_before_any_action() {
        let fake = Arc::new(FakeEditor::default());
        let auto = automator(&fake, SendPolicy::immediate());
        let err = auto
            .send_message(&mut TargetContext::default(), &request("   ", None, None))
            .unwrap_err();
        assert!(matches!(err, AutomationError::EmptyMessage));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn new_workspace_switches_project_then_sends() {
        let fake = Arc::new(FakeEditor::with_panel("ws1", true));
        let auto = automator(&fake, SendPolicy::immediate());
        let mut ctx = TargetContext::default();

        let outcome = auto
            .send_message(&mut ctx, &request("hello", Some("ws1"), Some("/tmp/proj")))
            .unwrap();
        assert!(outcome.project_switched);
        assert_eq!(ctx.current_workspace.as_deref(), Some("ws1"));
        assert_eq!(fake.calls(), vec!["open_folder /tmp/proj", "toggle", "paste hello", "submit"]);
    }

    #[test]
    fn same_workspace_does_not_switch_again() {
        let fake = Arc::new(FakeEditor::with_panel("ws1", false));
        let auto = automator(&fake, SendPolicy::immediate());
        let mut ctx = TargetContext {
            current_workspace: Some("ws1".to_string()),
        };

        let outcome = auto
            .send_message(&mut ctx, &request("again", Some("ws1"), Some("/tmp/proj")))
            .unwrap();
        assert!(!outcome.project_switched);
        assert_eq!(fake.calls(), vec!["activate", "paste again", "submit"]);
    }

    #[test]
    fn workspace_without_root_path_keeps_target() {
        let fake = Arc::new(FakeEditor::with_panel("ws2", false));
        let auto = automator(&fake, SendPolicy::immediate());
        let mut ctx = TargetContext {
            current_workspace: Some("ws1".to_string()),
        };

        auto.send_message(&mut ctx, &request("x", Some("ws2"), None)).unwrap();
        assert_eq!(ctx.current_workspace.as_deref(), Some("ws1"));
    }

    #[test]
    fn panel_that_never_opens_times_out() {
        let fake = Arc::new(FakeEditor {
            toggle_is_noop: true,
            ..FakeEditor::with_panel("ws1", true)
        });
        let auto = automator(&fake, SendPolicy::immediate());
        let err = auto.open_panel(Some("ws1"), true).unwrap_err();
        assert!(matches!(err, AutomationError::Timeout(_)));
    }

    #[test]
    fn open_panel_on_unknown_workspace() {
        let fake = Arc::new(FakeEditor::default());
        let auto = automator(&fake, SendPolicy::immediate());
        let err = auto.open_panel(Some("nope"), true).unwrap_err();
        assert!(matches!(err, AutomationError::UnknownWorkspace(_)));
    }

    #[test]
    fn open_panel_without_workspace_presses_once() {
        let fake = Arc::new(FakeEditor::default());
        let auto = automator(&fake, SendPolicy::immediate());
        let outcome = auto.open_panel(None, false).unwrap();
        assert_eq!(
            outcome,
            PanelOutcome {
                toggled: true,
                confirmed: false
            }
        );
        assert_eq!(fake.calls(), vec!["activate", "toggle"]);
    }

    #[test]
    fn failed_paste_is_retried() {
        let fake = Arc::new(FakeEditor::with_panel("ws1", false));
        *fake.paste_failures.lock().unwrap() = 2;
        let policy = SendPolicy {
            attempts: 3,
            ..SendPolicy::immediate()
        };
        let auto = automator(&fake, policy);
        let mut ctx = TargetContext {
            current_workspace: Some("ws1".to_string()),
        };

        let outcome = auto.send_message(&mut ctx, &request("hi", Some("ws1"), None)).unwrap();
        assert_eq!(outcome.attempts, 3);
    }

    #[test]
    fn retries_run_out() {
        let fake = Arc::new(FakeEditor::with_panel("ws1", false));
        *fake.paste_failures.lock().unwrap() = 5;
        let policy = SendPolicy {
            attempts: 2,
            ..SendPolicy::immediate()
        };
        let auto = automator(&fake, policy);
        let err = auto
            .send_message(&mut TargetContext::default(), &request("hi", Some("ws1"), None))
            .unwrap_err();
        assert!(matches!(err, AutomationError::Command { .. }));
    }

    #[test]
    fn unknown_workspace_is_not_retried() {
        let fake = Arc::new(FakeEditor::default());
        let policy = SendPolicy {
            attempts: 3,
            retry_delay: Duration::from_secs(60),
            ..SendPolicy::immediate()
        };
        let auto = automator(&fake, policy);
        let err = auto
            .send_message(&mut TargetContext::default(), &request("hi", Some("gone"), None))
            .unwrap_err();
        assert!(matches!(err, AutomationError::UnknownWorkspace(_)));
        assert_eq!(fake.calls(), vec!["activate"]);
    }

    #[test]
    fn failed_submit_does_not_paste_again() {
        let fake = Arc::new(FakeEditor {
            submit_fails: true,
            ..FakeEditor::with_panel("ws1", false)
        });
        let policy = SendPolicy {
            attempts: 3,
            ..SendPolicy::immediate()
        };
        let auto = automator(&fake, policy);
        let mut ctx = TargetContext {
            current_workspace: Some("ws1".to_string()),
        };
        let err = auto.send_message(&mut ctx, &request("hi", Some("ws1"), None)).unwrap_err();
        assert!(matches!(err, AutomationError::Command { .. }));
        assert_eq!(fake.calls(), vec!["activate", "paste hi", "submit"]);
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(AutomationError::Timeout("x").is_transient());
        assert!(!AutomationError::Unsupported.is_transient());
        assert!(!AutomationError::EmptyMessage.is_transient());
        assert!(!AutomationError::UnknownWorkspace("w".into()).is_transient());
    }

    #[test]
    fn switch_project_requires_a_path() {
        let fake = Arc::new(FakeEditor::default());
        let auto = automator(&fake, SendPolicy::immediate());
        let err = auto
            .switch_project(&mut TargetContext::default(), "  ", Some("ws"))
            .unwrap_err();
        assert!(matches!(err, AutomationError::InvalidInput(_)));
    }
}
