use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Error};

/// Operating mode recorded by the boot-time environment file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunMode {
    Run,
    Recover,
    Install,
    FactoryReset,
}

impl RunMode {
    fn as_str(self) -> &'static str {
        match self {
            RunMode::Run => "run",
            RunMode::Recover => "recover",
            RunMode::Install => "install",
            RunMode::FactoryReset => "factory-reset",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "run" => Some(RunMode::Run),
            "recover" => Some(RunMode::Recover),
            "install" => Some(RunMode::Install),
            "factory-reset" => Some(RunMode::FactoryReset),
            _ => None,
        }
    }
}

/// Boot-time environment file naming the current recovery-system label and operating
/// mode. Parsed as `key=value` lines, mirroring the real on-disk format.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Modeenv {
    pub mode: Option<String>,
    pub recovery_system: Option<String>,
    pub current_kernel_command_lines: Vec<String>,
    pub try_recovery_system: Option<String>,
    pub tried_recovery_systems: Vec<String>,
}

impl Modeenv {
    pub fn run_mode(&self) -> Option<RunMode> {
        self.mode.as_deref().and_then(RunMode::parse)
    }

    /// While a device is in `recover` mode, this field is authoritative over the
    /// seeded-systems log for determining the current recovery system.
    pub fn is_recover_authoritative(&self) -> bool {
        matches!(self.run_mode(), Some(RunMode::Recover))
    }

    pub fn parse(content: &str) -> Self {
        let mut map: BTreeMap<String, String> = BTreeMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim().to_string(), value.trim().to_string());
            }
        }

        Modeenv {
            mode: map.get("mode").cloned(),
            recovery_system: map.get("recovery_system").cloned(),
            current_kernel_command_lines: map
                .get("current_kernel_command_lines")
                .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
            try_recovery_system: map.get("try_recovery_system").cloned(),
            tried_recovery_systems: map
                .get("tried_recovery_systems")
                .map(|v| v.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(ref mode) = self.mode {
            out.push_str(&format!("mode={mode}\n"));
        }
        if let Some(ref recovery_system) = self.recovery_system {
            out.push_str(&format!("recovery_system={recovery_system}\n"));
        }
        out.push_str(&format!(
            "current_kernel_command_lines={}\n",
            self.current_kernel_command_lines.join(",")
        ));
        if let Some(ref try_recovery_system) = self.try_recovery_system {
            out.push_str(&format!("try_recovery_system={try_recovery_system}\n"));
        }
        if !self.tried_recovery_systems.is_empty() {
            out.push_str(&format!(
                "tried_recovery_systems={}\n",
                self.tried_recovery_systems.join(",")
            ));
        }
        out
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)
            .context(format!("Could not read modeenv file: {}", path.display()))?;
        Ok(Self::parse(&content))
    }

    pub fn save(&self, path: &Path) -> Result<(), Error> {
        osutils::files::create_file(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(self.render().as_bytes())
                    .context("Could not write modeenv contents")
            })
            .context(format!("Could not write modeenv file: {}", path.display()))
    }

    pub fn set_run_mode(&mut self, mode: RunMode) {
        self.mode = Some(mode.as_str().to_string());
    }
}
