use crate::{
    config::{self, ConfigStore, PathConfig, PathKey},
    fetch::{self, DownloadCapability, FetchedArchive},
    replace::{self, ReplaceOutcome, ReplaceRequest},
};
use anyhow::Result;
use std::path::{Path, PathBuf};

pub const CONTAINS_MODS_HINT: &str =
    "Select the folder that CONTAINS the 'mods' folder, not the 'mods' folder itself.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTarget {
    Client,
    Server,
    Minecraft,
}

impl SyncTarget {
    pub const ALL: [SyncTarget; 3] = [SyncTarget::Client, SyncTarget::Server, SyncTarget::Minecraft];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "client" => Some(SyncTarget::Client),
            "server" => Some(SyncTarget::Server),
            "minecraft" => Some(SyncTarget::Minecraft),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SyncTarget::Client => "CurseForge client",
            SyncTarget::Server => "CurseForge server",
            SyncTarget::Minecraft => "Minecraft",
        }
    }

    fn keys(self) -> Option<(PathKey, PathKey)> {
        match self {
            SyncTarget::Client => Some((PathKey::ClientOrigin, PathKey::ClientDestination)),
            SyncTarget::Server => Some((PathKey::ServerOrigin, PathKey::ServerDestination)),
            SyncTarget::Minecraft => None,
        }
    }

    fn origin_title(self) -> &'static str {
        match self {
            SyncTarget::Client => "Select the CLIENT instance folder",
            SyncTarget::Server => "Select the SERVER instance folder",
            SyncTarget::Minecraft => "Select the folder that CONTAINS the 'mods' folder to copy",
        }
    }

    fn destination_title(self) -> &'static str {
        match self {
            SyncTarget::Client => "Select the CLIENT destination folder",
            SyncTarget::Server => "Select the SERVER destination folder",
            SyncTarget::Minecraft => "Select the destination folder (.minecraft)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderRole {
    Origin,
    Destination,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPrompt {
    pub role: FolderRole,
    pub title: String,
    pub default: PathBuf,
    pub hint: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathChoice {
    Accepted(PathBuf),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChoice {
    Download,
    Local,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    pub message: String,
}

impl Notice {
    fn new(level: NoticeLevel, title: &str, message: String) -> Self {
        Self {
            level,
            title: title.to_string(),
            message,
        }
    }
}

/// The presentation layer. Every prompt blocks until the user answers.
pub trait Shell {
    fn pick_folder(&mut self, prompt: &FolderPrompt) -> Result<PathChoice>;
    fn confirm_replace(&mut self, source: &Path, destination: &Path) -> Result<bool>;
    fn choose_source(&mut self) -> Result<SourceChoice>;
    fn busy(&mut self, message: &str) -> Result<()>;
    fn notify(&mut self, notice: Notice) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    Cancelled,
    Replaced { destination: PathBuf, files: usize },
    Failed { message: String },
}

pub struct App {
    store: ConfigStore,
    pub paths: PathConfig,
    download: DownloadCapability,
    temp_root: PathBuf,
    pub file_id: String,
    pub last_report: Option<SyncReport>,
}

impl App {
    pub fn initialize() -> Result<Self> {
        let store = ConfigStore::at_default_location()?;
        let temp_root = config::base_data_dir()?.join("tmp");
        Ok(Self::with_parts(
            store,
            DownloadCapability::detect(),
            temp_root,
            fetch::resolve_file_id(None),
        ))
    }

    pub fn with_parts(
        store: ConfigStore,
        download: DownloadCapability,
        temp_root: PathBuf,
        file_id: String,
    ) -> Self {
        let paths = store.load();
        tracing::info!(
            config = %store.path().display(),
            download = download.is_available(),
            "app initialized"
        );
        Self {
            store,
            paths,
            download,
            temp_root,
            file_id,
            last_report: None,
        }
    }

    pub fn config_path(&self) -> &Path {
        self.store.path()
    }

    pub fn downloads_available(&self) -> bool {
        self.download.is_available()
    }

    pub fn run_sync(&mut self, target: SyncTarget, shell: &mut dyn Shell) -> Result<SyncReport> {
        let report = self.sync_flow(target, shell)?;
        match &report {
            SyncReport::Cancelled => tracing::info!(option = target.label(), "sync cancelled"),
            SyncReport::Replaced { destination, files } => tracing::info!(
                option = target.label(),
                destination = %destination.display(),
                files,
                "sync complete"
            ),
            SyncReport::Failed { message } => {
                tracing::error!(option = target.label(), "sync failed: {message}")
            }
        }
        self.last_report = Some(report.clone());
        Ok(report)
    }

    fn sync_flow(&mut self, target: SyncTarget, shell: &mut dyn Shell) -> Result<SyncReport> {
        let keys = target.keys();

        // Keeps a downloaded workspace alive until the copy is done.
        let mut fetched: Option<FetchedArchive> = None;
        let origin = if target == SyncTarget::Minecraft && self.download.is_available() {
            match shell.choose_source()? {
                SourceChoice::Cancelled => return Ok(SyncReport::Cancelled),
                SourceChoice::Download => {
                    shell.busy("Downloading modpack...")?;
                    match self.fetch_modpack() {
                        Ok(archive) => {
                            tracing::info!(
                                bytes = archive.downloaded_bytes(),
                                workspace = %archive.workspace().display(),
                                "modpack ready"
                            );
                            let origin = archive.origin().to_path_buf();
                            fetched = Some(archive);
                            origin
                        }
                        Err(err) => {
                            return self.fail(shell, "Download failed", err.to_string());
                        }
                    }
                }
                SourceChoice::Local => match self.prompt(shell, target, keys.map(|k| k.0), true)? {
                    Some(path) => path,
                    None => return Ok(SyncReport::Cancelled),
                },
            }
        } else {
            match self.prompt(shell, target, keys.map(|k| k.0), true)? {
                Some(path) => path,
                None => return Ok(SyncReport::Cancelled),
            }
        };

        let Some(destination) = self.prompt(shell, target, keys.map(|k| k.1), false)? else {
            return Ok(SyncReport::Cancelled);
        };

        let request = ReplaceRequest::new(origin, destination);
        let mut gate = |source: &Path, destination: &Path| {
            shell
                .confirm_replace(source, destination)
                .unwrap_or_else(|err| {
                    tracing::warn!("confirmation prompt failed: {err:#}");
                    false
                })
        };
        let result = replace::replace(&request, &mut gate);
        drop(fetched);

        match result {
            Ok(ReplaceOutcome::Cancelled) => Ok(SyncReport::Cancelled),
            Ok(ReplaceOutcome::Success { destination, files }) => {
                shell.notify(Notice::new(
                    NoticeLevel::Info,
                    "Success",
                    format!(
                        "'mods' folder copied to:\n{}\n({files} file(s))",
                        destination.display()
                    ),
                ))?;
                Ok(SyncReport::Replaced { destination, files })
            }
            Err(err) => self.fail(shell, "Error", err.to_string()),
        }
    }

    fn fetch_modpack(&self) -> Result<FetchedArchive, fetch::FetchError> {
        let transport = self.download.transport()?;
        fetch::fetch_and_locate(transport, &self.file_id, &self.temp_root)
    }

    /// Asks for a folder, remembering it when the option has a config key.
    fn prompt(
        &mut self,
        shell: &mut dyn Shell,
        target: SyncTarget,
        key: Option<PathKey>,
        origin: bool,
    ) -> Result<Option<PathBuf>> {
        let default = match key {
            Some(key) => self.paths.get(key).to_path_buf(),
            None if origin => PathBuf::new(),
            None => config::default_minecraft_dir(),
        };
        let (role, title) = if origin {
            (FolderRole::Origin, target.origin_title())
        } else {
            (FolderRole::Destination, target.destination_title())
        };
        let prompt = FolderPrompt {
            role,
            title: title.to_string(),
            default,
            hint: CONTAINS_MODS_HINT,
        };

        let path = match shell.pick_folder(&prompt)? {
            PathChoice::Accepted(path) => path,
            PathChoice::Cancelled => return Ok(None),
        };

        if let Some(key) = key {
            if self.paths.set(key, path.clone()) {
                if let Err(err) = self.store.save(&self.paths) {
                    tracing::error!("{err}");
                    shell.notify(Notice::new(
                        NoticeLevel::Warn,
                        "Settings not saved",
                        err.to_string(),
                    ))?;
                }
            }
        }
        Ok(Some(path))
    }

    fn fail(&self, shell: &mut dyn Shell, title: &str, message: String) -> Result<SyncReport> {
        shell.notify(Notice::new(NoticeLevel::Error, title, message.clone()))?;
        Ok(SyncReport::Failed { message })
    }
}
