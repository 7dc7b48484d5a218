//! Provisioning steps applied to the host once a config is resolved.
//!
//! Steps run in a fixed order and stop at the first failure. Nothing is
//! rolled back, and the marker is only written after every step succeeded.

use anyhow::{bail, Context, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::firstboot::config::ProvisioningConfig;
use crate::firstboot::layout::HostLayout;
use crate::firstboot::marker;
use crate::process::{Cmd, Runner};

pub const PASSWORD_ATTEMPTS: u32 = 3;
pub const PASSWORD_RETRY_DELAY: Duration = Duration::from_secs(1);

const SUDOERS_MODE: u32 = 0o440;
const SUDOERS_WITH_PASSWORD: &str = "%wheel ALL=(ALL) ALL\n";
const SUDOERS_NOPASSWD: &str = "%wheel ALL=(ALL) NOPASSWD: ALL\n";

pub struct Executor<'a, W: Write> {
    runner: &'a dyn Runner,
    layout: &'a HostLayout,
    retry_delay: Duration,
    out: W,
}

impl<'a, W: Write> Executor<'a, W> {
    pub fn new(runner: &'a dyn Runner, layout: &'a HostLayout, out: W) -> Self {
        Self {
            runner,
            layout,
            retry_delay: PASSWORD_RETRY_DELAY,
            out,
        }
    }

    /// Delay between failed `passwd` attempts.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Apply `config` and write the completion marker.
    pub fn provision(&mut self, config: &ProvisioningConfig) -> Result<()> {
        let user = config.first_user.as_str();
        tracing::info!(user, "provisioning first user");

        self.step(&format!("Creating user '{user}'"), |ex| {
            ex.create_user(user, config.add_to_sudoers)
        })?;

        if config.set_password {
            self.interactive_step(&format!("Setting password for '{user}'"), |ex| {
                ex.set_password(user)
            })?;
        } else {
            self.step(&format!("Removing password for '{user}'"), |ex| {
                Cmd::new("passwd").args(["-d", user]).run(ex.runner)?;
                Ok(())
            })?;
        }

        if config.add_to_sudoers {
            self.step("Adding wheel group to sudoers", |ex| {
                write_sudoers(&ex.layout.sudoers_dropin(), config.set_password)
            })?;
        }

        if config.enable_systemd_linger {
            self.step("Enabling systemd linger", |ex| {
                Cmd::new("loginctl")
                    .args(["enable-linger", user])
                    .run(ex.runner)?;
                Ok(())
            })?;
        }

        if config.enable_sound {
            self.step("Installing pulseaudio", |ex| {
                Cmd::new("dnf")
                    .args(["install", "-y", "pulseaudio"])
                    .interactive()
                    .run(ex.runner)?;
                Ok(())
            })?;
        }

        self.step("Marking first boot as complete", |ex| {
            marker::mark_complete(&ex.layout.marker())
        })
    }

    fn step(&mut self, message: &str, f: impl FnOnce(&mut Self) -> Result<()>) -> Result<()> {
        write!(self.out, "{message}... ")?;
        self.out.flush()?;
        f(self).with_context(|| message.to_string())?;
        writeln!(self.out, "DONE")?;
        Ok(())
    }

    /// Like [`Self::step`], but the message gets its own line so the
    /// command's prompts do not share it.
    fn interactive_step(
        &mut self,
        message: &str,
        f: impl FnOnce(&mut Self) -> Result<()>,
    ) -> Result<()> {
        writeln!(self.out, "{message}...")?;
        self.out.flush()?;
        f(self).with_context(|| message.to_string())?;
        writeln!(self.out, "DONE")?;
        Ok(())
    }

    fn create_user(&self, user: &str, wheel: bool) -> Result<()> {
        let mut cmd = Cmd::new("useradd").arg("-m");
        if wheel {
            cmd = cmd.args(["-G", "wheel"]);
        }
        cmd.arg(user).run(self.runner)?;

        set_default_user(&self.layout.wsl_conf(), user)
    }

    fn set_password(&self, user: &str) -> Result<()> {
        for attempt in 1..=PASSWORD_ATTEMPTS {
            let output = Cmd::new("passwd")
                .arg(user)
                .interactive()
                .allow_fail()
                .run(self.runner)?;
            if output.success() {
                return Ok(());
            }
            tracing::warn!(attempt, "passwd failed");
            if attempt < PASSWORD_ATTEMPTS {
                thread::sleep(self.retry_delay);
            }
        }
        bail!("passwd failed {PASSWORD_ATTEMPTS} times for '{user}'")
    }
}

/// Append a `[user]` section so WSL logs in as `user`.
fn set_default_user(wsl_conf: &Path, user: &str) -> Result<()> {
    if let Some(parent) = wsl_conf.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(wsl_conf)
        .with_context(|| format!("opening '{}'", wsl_conf.display()))?;
    write!(file, "\n[user]\ndefault=\"{user}\"\n")
        .with_context(|| format!("appending to '{}'", wsl_conf.display()))
}

fn write_sudoers(path: &Path, require_password: bool) -> Result<()> {
    let content = if require_password {
        SUDOERS_WITH_PASSWORD
    } else {
        SUDOERS_NOPASSWD
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("writing '{}'", path.display()))?;
    fs::set_permissions(path, fs::Permissions::from_mode(SUDOERS_MODE))
        .with_context(|| format!("setting mode on '{}'", path.display()))
}

/// Ask WSL to terminate the distribution so the new default user applies
/// on next launch. No-op outside a WSL session.
pub fn request_shutdown(runner: &dyn Runner, distro_name: Option<&str>) -> Result<bool> {
    let Some(name) = distro_name.filter(|n| !n.is_empty()) else {
        return Ok(false);
    };
    tracing::info!(distro = name, "terminating distribution");
    Cmd::new("wsl.exe").args(["-t", name]).run(runner)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firstboot::marker::MarkerState;
    use crate::process::fake::FakeRunner;
    use crate::process::CmdOutput;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn config(user: &str) -> ProvisioningConfig {
        ProvisioningConfig {
            first_user: user.to_string(),
            set_password: true,
            add_to_sudoers: true,
            enable_systemd_linger: true,
            enable_sound: false,
        }
    }

    fn provision(
        runner: &FakeRunner,
        layout: &HostLayout,
        config: &ProvisioningConfig,
    ) -> (Result<()>, String) {
        let mut out = Vec::new();
        let result = Executor::new(runner, layout, &mut out)
            .with_retry_delay(Duration::ZERO)
            .provision(config);
        (result, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_default_config_steps() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        let runner = FakeRunner::succeeding();

        let (result, out) = provision(&runner, &layout, &config("alice"));
        result.unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "useradd -m -G wheel alice",
                "passwd alice",
                "loginctl enable-linger alice",
            ]
        );
        assert_eq!(
            fs::read_to_string(layout.wsl_conf()).unwrap(),
            "\n[user]\ndefault=\"alice\"\n"
        );
        let sudoers = layout.sudoers_dropin();
        assert_eq!(fs::read_to_string(&sudoers).unwrap(), "%wheel ALL=(ALL) ALL\n");
        assert_eq!(
            fs::metadata(&sudoers).unwrap().permissions().mode() & 0o777,
            0o440
        );
        assert_eq!(
            marker::read_state(&layout.marker()).unwrap(),
            MarkerState::Complete
        );
        assert!(out.starts_with("Creating user 'alice'... DONE\n"));
        assert!(out.contains("\nSetting password for 'alice'...\nDONE\n"));
        assert_eq!(out.matches("DONE").count(), 5);
    }

    #[test]
    fn test_minimal_config() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        let runner = FakeRunner::succeeding();
        let config = ProvisioningConfig {
            set_password: false,
            add_to_sudoers: false,
            enable_systemd_linger: false,
            ..config("bob")
        };

        let (result, _) = provision(&runner, &layout, &config);
        result.unwrap();

        assert_eq!(runner.calls(), vec!["useradd -m bob", "passwd -d bob"]);
        assert!(!layout.sudoers_dropin().exists());
        assert!(layout.marker().exists());
    }

    #[test]
    fn test_nopasswd_sudoers_and_sound() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        let runner = FakeRunner::succeeding();
        let config = ProvisioningConfig {
            set_password: false,
            enable_sound: true,
            ..config("carol")
        };

        let (result, _) = provision(&runner, &layout, &config);
        result.unwrap();

        assert_eq!(
            fs::read_to_string(layout.sudoers_dropin()).unwrap(),
            "%wheel ALL=(ALL) NOPASSWD: ALL\n"
        );
        assert!(runner.called("dnf install -y pulseaudio"));
    }

    #[test]
    fn test_wsl_conf_is_appended() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        fs::create_dir_all(temp.path().join("etc")).unwrap();
        fs::write(layout.wsl_conf(), "[boot]\nsystemd=true\n").unwrap();

        let (result, _) = provision(&FakeRunner::succeeding(), &layout, &config("dave"));
        result.unwrap();

        assert_eq!(
            fs::read_to_string(layout.wsl_conf()).unwrap(),
            "[boot]\nsystemd=true\n\n[user]\ndefault=\"dave\"\n"
        );
    }

    #[test]
    fn test_password_retried_until_success() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        let failures = Cell::new(0);
        let runner = FakeRunner::new(move |cmd| {
            if cmd.display() == "passwd erin" && failures.get() < 2 {
                failures.set(failures.get() + 1);
                CmdOutput::failed(10, "")
            } else {
                CmdOutput::ok("")
            }
        });

        let (result, _) = provision(&runner, &layout, &config("erin"));
        result.unwrap();

        let attempts = runner.calls().iter().filter(|c| *c == "passwd erin").count();
        assert_eq!(attempts, 3);
        assert!(layout.marker().exists());
    }

    #[test]
    fn test_password_gives_up_without_marker() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        let runner = FakeRunner::new(|cmd| {
            if cmd.program() == "passwd" {
                CmdOutput::failed(10, "")
            } else {
                CmdOutput::ok("")
            }
        });

        let (result, out) = provision(&runner, &layout, &config("frank"));
        let err = format!("{:#}", result.unwrap_err());
        assert!(err.contains("3 times"));

        let attempts = runner.calls().iter().filter(|c| *c == "passwd frank").count();
        assert_eq!(attempts, PASSWORD_ATTEMPTS as usize);
        assert!(!runner.called("loginctl"));
        assert!(!layout.marker().exists());
        // the user was already created; no rollback
        assert!(layout.wsl_conf().exists());
        assert!(out.ends_with("Setting password for 'frank'...\n"));
    }

    #[test]
    fn test_useradd_failure_stops_everything() {
        let temp = TempDir::new().unwrap();
        let layout = HostLayout::rooted(temp.path());
        let runner = FakeRunner::new(|_| CmdOutput::failed(9, "useradd: user 'root' already exists"));

        let (result, _) = provision(&runner, &layout, &config("root"));
        assert!(result.is_err());
        assert_eq!(runner.calls().len(), 1);
        assert!(!layout.wsl_conf().exists());
        assert!(!layout.marker().exists());
    }

    #[test]
    fn test_shutdown_only_inside_wsl() {
        let runner = FakeRunner::succeeding();
        assert!(!request_shutdown(&runner, None).unwrap());
        assert!(!request_shutdown(&runner, Some("")).unwrap());
        assert!(runner.calls().is_empty());

        assert!(request_shutdown(&runner, Some("FedoraLinux-42")).unwrap());
        assert_eq!(runner.calls(), vec!["wsl.exe -t FedoraLinux-42"]);
    }
}
