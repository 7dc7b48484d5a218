//! Interactive first boot: welcome panel, confirmation and field prompts.

use anyhow::{Context, Result};
use std::path::Path;

use crate::firstboot::config::{
    ConfigBuilder, DEFAULT_ADD_TO_SUDOERS, DEFAULT_ENABLE_SOUND, DEFAULT_ENABLE_SYSTEMD_LINGER,
    DEFAULT_SET_PASSWORD,
};
use crate::process::{Cmd, Runner};

const JOBS: &str = "# Jobs to be done
- Create first user (unprivileged)
- Optionally set a password
- Optionally add the new user to sudoers
- Optionally enable the users systemd session to linger
- Optionally install pulseaudio to enable sound
";

const ALERT_COLOR: &str = "#ed0000";

/// Terminal interaction used by first boot.
pub trait Prompter {
    fn welcome(&self, pretty_name: &str) -> Result<()>;

    /// Show what first boot is going to do.
    fn show_jobs(&self) -> Result<()>;

    /// `false` when the operator declines.
    fn confirm_proceed(&self) -> Result<bool>;

    fn announce_skipped(&self, marker: &Path) -> Result<()>;

    fn announce_already_complete(&self) -> Result<()>;

    fn text(&self, question: &str, default: &str) -> Result<String>;

    fn confirm(&self, question: &str, default: bool) -> Result<bool>;
}

/// `gum` for styled panels and the proceed confirmation, inquire for the
/// field prompts.
pub struct GumPrompter<'a> {
    runner: &'a dyn Runner,
}

impl<'a> GumPrompter<'a> {
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    fn alert(&self, text: &str, underline: bool) -> Result<()> {
        let mut cmd = Cmd::new("gum")
            .args(["style", "--foreground", ALERT_COLOR, "--margin", "1 2"]);
        if underline {
            cmd = cmd.arg("--underline");
        }
        cmd.arg(text).interactive().run(self.runner)?;
        Ok(())
    }

    fn format(&self, markdown: &str) -> Result<()> {
        Cmd::new("gum")
            .arg("format")
            .stdin_text(markdown)
            .interactive()
            .run(self.runner)?;
        Ok(())
    }
}

impl Prompter for GumPrompter<'_> {
    fn welcome(&self, pretty_name: &str) -> Result<()> {
        Cmd::new("gum")
            .args([
                "style",
                "--foreground",
                "#56a4d8",
                "--border-foreground",
                "#61a5fa",
                "--border",
                "double",
                "--align",
                "center",
                "--width",
                "80",
                "--margin",
                "1 2",
                "--padding",
                "2 4",
                "Welcome to the first boot experience!",
            ])
            .arg(format!("For: {pretty_name}"))
            .interactive()
            .run(self.runner)?;
        Ok(())
    }

    fn show_jobs(&self) -> Result<()> {
        self.format(JOBS)?;
        println!();
        Ok(())
    }

    fn confirm_proceed(&self) -> Result<bool> {
        let output = Cmd::new("gum")
            .args([
                "confirm",
                "Would you like to continue with the first boot experience?",
            ])
            .interactive()
            .allow_fail()
            .run(self.runner)?;
        Ok(output.success())
    }

    fn announce_skipped(&self, marker: &Path) -> Result<()> {
        self.alert("The first boot experience has been skipped.", true)?;
        self.format(&format!(
            "You will not see this again unless you delete the file `{}`\n",
            marker.display()
        ))
    }

    fn announce_already_complete(&self) -> Result<()> {
        self.alert(
            "First boot has already executed, this script is not idempotent & does not support running a second time.",
            false,
        )
    }

    fn text(&self, question: &str, default: &str) -> Result<String> {
        inquire::Text::new(question)
            .with_default(default)
            .prompt()
            .with_context(|| format!("prompting: {question}"))
    }

    fn confirm(&self, question: &str, default: bool) -> Result<bool> {
        inquire::Confirm::new(question)
            .with_default(default)
            .prompt()
            .with_context(|| format!("prompting: {question}"))
    }
}

/// Result of the interactive flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interactive {
    Proceed(ConfigBuilder),
    Declined,
}

/// Welcome the operator and collect every field, each pre-filled with its
/// default.
pub fn collect_interactive(
    prompter: &dyn Prompter,
    pretty_name: &str,
    default_user: &str,
) -> Result<Interactive> {
    prompter.welcome(pretty_name)?;
    prompter.show_jobs()?;
    if !prompter.confirm_proceed()? {
        return Ok(Interactive::Declined);
    }

    let builder = ConfigBuilder::new()
        .first_user(prompter.text(
            "What username would like for your first user?",
            default_user,
        )?)
        .set_password(prompter.confirm("Would you like to set a password?", DEFAULT_SET_PASSWORD)?)
        .add_to_sudoers(prompter.confirm(
            "Would you like to give the user the ability to elevate via sudo to root?",
            DEFAULT_ADD_TO_SUDOERS,
        )?)
        .enable_systemd_linger(prompter.confirm(
            "Would you like the users systemd session to linger?",
            DEFAULT_ENABLE_SYSTEMD_LINGER,
        )?)
        .enable_sound(prompter.confirm(
            "Would you like to install pulseaudio to enable sound?",
            DEFAULT_ENABLE_SOUND,
        )?);

    Ok(Interactive::Proceed(builder))
}

/// `PRETTY_NAME` from an os-release file, without quotes.
pub fn pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim().replace('"', ""))
        .filter(|value| !value.is_empty())
}

/// Read the distribution name for the welcome panel.
pub fn read_pretty_name(path: &Path) -> Result<String> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading '{}'", path.display()))?;
    Ok(pretty_name(&text).unwrap_or_else(|| "Linux".to_string()))
}


#[cfg(test)]
mod tests {
    use super::fake::ScriptedPrompter;
    use super::*;
    use crate::process::fake::FakeRunner;

    #[test]
    fn test_pretty_name() {
        let text = "NAME=\"Fedora Linux\"\nVERSION_ID=42\nPRETTY_NAME=\"Fedora Linux 42 (Container Image)\"\n";
        assert_eq!(
            pretty_name(text).as_deref(),
            Some("Fedora Linux 42 (Container Image)")
        );
        assert_eq!(pretty_name("NAME=x\n"), None);
    }

    #[test]
    fn test_read_pretty_name_falls_back() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("os-release");
        std::fs::write(&path, "ID=fedora\n").unwrap();
        assert_eq!(read_pretty_name(&path).unwrap(), "Linux");
    }

    #[test]
    fn test_declined() {
        let prompter = ScriptedPrompter::answering(false, &[], &[]);
        let result = collect_interactive(&prompter, "Fedora Linux 42", "JohnDoe").unwrap();
        assert_eq!(result, Interactive::Declined);
        assert_eq!(
            *prompter.shown.borrow(),
            vec!["welcome:Fedora Linux 42".to_string(), "jobs".to_string()]
        );
    }

    #[test]
    fn test_defaults_prefilled() {
        let prompter = ScriptedPrompter::answering(true, &[], &[]);
        let Interactive::Proceed(builder) =
            collect_interactive(&prompter, "Fedora", "JohnDoe").unwrap()
        else {
            panic!("expected to proceed");
        };
        let config = builder.build(|| unreachable!()).unwrap();
        assert_eq!(config.first_user, "JohnDoe");
        assert!(config.set_password && config.add_to_sudoers && config.enable_systemd_linger);
        assert!(!config.enable_sound);

        let shown = prompter.shown.borrow();
        assert!(shown.contains(&"text:What username would like for your first user?[JohnDoe]".to_string()));
        assert!(shown
            .iter()
            .any(|s| s == "confirm:Would you like to install pulseaudio to enable sound?[false]"));
    }

    #[test]
    fn test_answers_applied_in_order() {
        let prompter =
            ScriptedPrompter::answering(true, &["alice"], &[false, true, false, true]);
        let Interactive::Proceed(builder) =
            collect_interactive(&prompter, "Fedora", "JohnDoe").unwrap()
        else {
            panic!("expected to proceed");
        };
        let config = builder.build(|| unreachable!()).unwrap();
        assert_eq!(config.first_user, "alice");
        assert!(!config.set_password);
        assert!(config.add_to_sudoers);
        assert!(!config.enable_systemd_linger);
        assert!(config.enable_sound);
    }

    #[test]
    fn test_gum_confirm_exit_code_maps_to_decline() {
        let runner = FakeRunner::new(|_| crate::process::CmdOutput::failed(1, ""));
        let prompter = GumPrompter::new(&runner);
        assert!(!prompter.confirm_proceed().unwrap());
        assert!(runner.called("gum confirm"));
    }

    #[test]
    fn test_gum_welcome_names_distribution() {
        let runner = FakeRunner::succeeding();
        GumPrompter::new(&runner).welcome("Fedora Linux 42").unwrap();
        assert!(runner.calls()[0].ends_with("Welcome to the first boot experience! For: Fedora Linux 42"));
    }
}
