use std::path::Path;
use std::process::{Command, ExitStatus};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, ensure};
use tracing::{debug, warn};

/// Placeholder replaced by the shell-quoted image path.
pub const PATH_PLACEHOLDER: &str = "{path}";

/// Applies an image as the desktop background.
pub trait WallpaperSetter: Send + Sync {
    fn apply(&self, path: &Path) -> Result<()>;
}

impl<W: WallpaperSetter + ?Sized> WallpaperSetter for Arc<W> {
    fn apply(&self, path: &Path) -> Result<()> {
        (**self).apply(path)
    }
}

type CommandRunner = Arc<dyn Fn(&str) -> Result<CommandOutput> + Send + Sync>;

#[derive(Debug)]
struct CommandOutput {
    status: ExitStatus,
    stderr: String,
}

/// Runs a shell command template with `{path}` substituted.
#[derive(Clone)]
pub struct CommandWallpaperSetter {
    template: String,
    runner: CommandRunner,
}

impl std::fmt::Debug for CommandWallpaperSetter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandWallpaperSetter")
            .field("template", &self.template)
            .finish()
    }
}

impl CommandWallpaperSetter {
    pub fn new(template: Option<String>) -> Result<Self> {
        Self::build(template, Arc::new(|command| run_shell(command)))
    }

    fn build(template: Option<String>, runner: CommandRunner) -> Result<Self> {
        let template = template.unwrap_or_else(|| default_command().to_string());
        ensure!(
            template.contains(PATH_PLACEHOLDER),
            "wallpaper command must contain {PATH_PLACEHOLDER}"
        );
        Ok(Self { template, runner })
    }

    #[cfg(test)]
    fn with_runner(template: Option<String>, runner: CommandRunner) -> Result<Self> {
        Self::build(template, runner)
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    fn render(&self, path: &Path) -> String {
        self.template
            .replace(PATH_PLACEHOLDER, &shell_quote(&path.to_string_lossy()))
    }
}

impl WallpaperSetter for CommandWallpaperSetter {
    fn apply(&self, path: &Path) -> Result<()> {
        let command = self.render(path);
        let output = (self.runner)(&command)?;
        if output.status.success() {
            debug!(path = %path.display(), "wallpaper command succeeded");
            Ok(())
        } else {
            warn!(
                exit_code = ?output.status.code(),
                stderr = output.stderr.trim(),
                command = %command,
                "wallpaper command failed"
            );
            Err(anyhow!(
                "wallpaper command exited with {:?}",
                output.status.code()
            ))
        }
    }
}

/// Command used when the configuration leaves `wallpaper-command` unset.
pub fn default_command() -> &'static str {
    if cfg!(target_os = "macos") {
        "osascript -e 'on run argv' \
         -e 'tell application \"System Events\" to tell every desktop to set picture to (item 1 of argv)' \
         -e 'end run' {path}"
    } else {
        "gsettings set org.gnome.desktop.background picture-uri file://{path} \
         && gsettings set org.gnome.desktop.background picture-uri-dark file://{path} \
         || feh --no-fehbg --bg-scale {path}"
    }
}

/// Single-quotes `raw` for `sh`, escaping embedded single quotes.
pub fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r#"'\''"#))
}

fn run_shell(command: &str) -> Result<CommandOutput> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .with_context(|| format!("failed to spawn shell for command: {command}"))?;
    Ok(CommandOutput {
        status: output.status,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
