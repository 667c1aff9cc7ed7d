//! Three-slot checkpoint rotation for running components.
//!
//! A commit moves the new files into `prep`, renames `current` to `old`,
//! renames `prep` to `current`, then deletes `old`. Every crash point leaves
//! at least one complete generation in `current` or `old`, and recovery
//! prefers `current`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::persist::{copy_dir_all, remove_dir_if_exists};

pub const PREP_DIR: &str = "_jobmap_prep_checkpoint";
pub const CURRENT_DIR: &str = "_jobmap_current_checkpoint";
pub const OLD_DIR: &str = "_jobmap_old_checkpoint";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    Current,
    Old,
}

crate::core::enum_str! {
    impl Slot {
        pub fn as_str(&self) -> &'static str;
        fn parse_str(raw: &str) -> Option<Self>;
        variants {
            Current => ["current"],
            Old => ["old"],
        }
    }
}

/// The checkpoint slots inside one component sandbox.
#[derive(Clone, Debug)]
pub struct CheckpointDirs {
    root: PathBuf,
}

impl CheckpointDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn prep(&self) -> PathBuf {
        self.root.join(PREP_DIR)
    }

    pub fn current(&self) -> PathBuf {
        self.root.join(CURRENT_DIR)
    }

    pub fn old(&self) -> PathBuf {
        self.root.join(OLD_DIR)
    }

    /// Step 1: move `files` into a fresh `prep` directory.
    pub fn stage(&self, files: &[PathBuf]) -> io::Result<()> {
        let prep = self.prep();
        remove_dir_if_exists(&prep)?;
        fs::create_dir_all(&prep)?;
        for file in files {
            let Some(name) = file.file_name() else {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("checkpoint file {} has no name", file.display()),
                ));
            };
            move_path(file, &prep.join(name))?;
        }
        Ok(())
    }

    /// Step 2: rename `current` to `old`.
    pub fn retire_current(&self) -> io::Result<()> {
        let current = self.current();
        if !current.exists() {
            return Ok(());
        }
        // A leftover `old` means the previous commit finished step 3 but not 4.
        remove_dir_if_exists(&self.old())?;
        fs::rename(current, self.old())
    }

    /// Step 3: rename `prep` to `current`.
    pub fn promote_prep(&self) -> io::Result<()> {
        fs::rename(self.prep(), self.current())
    }

    /// Step 4: delete `old`.
    pub fn drop_old(&self) -> io::Result<()> {
        remove_dir_if_exists(&self.old())
    }

    /// Run all four steps.
    pub fn commit(&self, files: &[PathBuf]) -> io::Result<()> {
        self.stage(files)?;
        self.retire_current()?;
        self.promote_prep()?;
        self.drop_old()?;
        tracing::debug!(dir = %self.root.display(), files = files.len(), "checkpoint committed");
        Ok(())
    }

    /// The generation recovery would adopt.
    pub fn active(&self) -> Option<(Slot, PathBuf)> {
        let current = self.current();
        if current.is_dir() {
            return Some((Slot::Current, current));
        }
        let old = self.old();
        old.is_dir().then_some((Slot::Old, old))
    }

    /// Adopt the active generation: copy its files into the sandbox root and
    /// move the directory to `transfer_dir` as the current checkpoint.
    pub fn recover(&self, transfer_dir: &Path) -> io::Result<Option<Slot>> {
        let Some((slot, dir)) = self.active() else {
            return Ok(None);
        };
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let target = self.root.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                copy_dir_all(&entry.path(), &target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }

        let staged = transfer_dir.join(CURRENT_DIR);
        if staged != dir {
            fs::create_dir_all(transfer_dir)?;
            remove_dir_if_exists(&staged)?;
            move_path(&dir, &staged)?;
        }
        remove_dir_if_exists(&self.prep())?;
        remove_dir_if_exists(&self.old())?;
        tracing::info!(
            dir = %self.root.display(),
            slot = slot.as_str(),
            "recovered checkpoint"
        );
        Ok(Some(slot))
    }

    /// Bring a checkpoint staged in `transfer_dir` back into this sandbox.
    pub fn restore_from(&self, transfer_dir: &Path) -> io::Result<bool> {
        let staged = transfer_dir.join(CURRENT_DIR);
        if !staged.is_dir() || self.current().is_dir() {
            return Ok(false);
        }
        copy_dir_all(&staged, &self.current())?;
        Ok(true)
    }

    /// Hand whatever generation survives to `transfer_dir`.
    pub fn stage_for_transfer(&self, transfer_dir: &Path) -> io::Result<bool> {
        let Some((_, dir)) = self.active() else {
            return Ok(false);
        };
        let staged = transfer_dir.join(CURRENT_DIR);
        fs::create_dir_all(transfer_dir)?;
        remove_dir_if_exists(&staged)?;
        copy_dir_all(&dir, &staged)?;
        Ok(true)
    }
}

fn move_path(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => {
            if from.is_dir() {
                copy_dir_all(from, to)?;
                fs::remove_dir_all(from)
            } else {
                fs::copy(from, to)?;
                fs::remove_file(from)
            }
        }
        Err(err) => Err(err),
    }
}
