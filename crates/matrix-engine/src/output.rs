use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTarget {
    pub folder: PathBuf,
    pub base_name: String,
    /// Prefix directories relative to the output directory, `/`-joined.
    pub subfolder: String,
    pub counter: u32,
}

impl SaveTarget {
    /// Splits `filename_prefix` (e.g. `train_data/img`) into subfolder and
    /// base name, creates the folder and picks the first free counter.
    pub fn resolve(output_dir: &Path, filename_prefix: &str) -> Result<Self> {
        let prefix = filename_prefix.trim().replace('\\', "/");
        let relative = Path::new(&prefix);
        let escapes = relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });
        if escapes {
            return Err(EngineError::InvalidOutputPath(filename_prefix.to_string()));
        }

        let mut parts: Vec<&str> = prefix
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();
        let base_name = match parts.pop() {
            Some(name) => name.to_string(),
            None => {
                return Err(EngineError::InputInvalid(
                    "filename prefix has no file name".to_string(),
                ))
            }
        };
        let subfolder = parts.join("/");
        let folder = parts
            .iter()
            .fold(output_dir.to_path_buf(), |path, part| path.join(part));
        fs::create_dir_all(&folder)?;

        let counter = next_counter(&folder, &base_name)?;
        debug!(folder = %folder.display(), base_name, counter, "resolved save target");
        Ok(Self {
            folder,
            base_name,
            subfolder,
            counter,
        })
    }

    pub fn file_name(&self, counter: u32, extension: &str) -> String {
        format!("{}_{counter:05}_.{extension}", self.base_name)
    }

    pub fn path(&self, counter: u32, extension: &str) -> PathBuf {
        self.folder.join(self.file_name(counter, extension))
    }
}

fn next_counter(folder: &Path, base_name: &str) -> Result<u32> {
    let lead = format!("{base_name}_");
    let mut highest = 0;
    for entry in fs::read_dir(folder)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(counter) = existing_counter(name, &lead) {
            highest = highest.max(counter);
        }
    }
    Ok(highest.saturating_add(1))
}

fn existing_counter(name: &str, lead: &str) -> Option<u32> {
    let rest = name.strip_prefix(lead)?;
    let (digits, _) = rest.split_once('_')?;
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use crate::error::EngineError;

    use super::{existing_counter, SaveTarget};

    #[test]
    fn first_save_starts_at_one_inside_subfolder() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let target = SaveTarget::resolve(temp.path(), "train_data/img")?;

        assert_eq!(target.folder, temp.path().join("train_data"));
        assert!(target.folder.is_dir());
        assert_eq!(target.subfolder, "train_data");
        assert_eq!(target.base_name, "img");
        assert_eq!(target.counter, 1);
        assert_eq!(target.file_name(7, "png"), "img_00007_.png");
        Ok(())
    }

    #[test]
    fn counter_continues_after_highest_existing_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        for name in ["clip_00003_.mp4", "clip_00012_.txt", "clip_x_.png", "other_00099_.png"] {
            fs::write(temp.path().join(name), b"")?;
        }
        let target = SaveTarget::resolve(temp.path(), "clip")?;
        assert_eq!(target.subfolder, "");
        assert_eq!(target.counter, 13);
        Ok(())
    }

    #[test]
    fn prefixes_escaping_the_output_directory_are_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        assert!(matches!(
            SaveTarget::resolve(temp.path(), "../outside/img"),
            Err(EngineError::InvalidOutputPath(_))
        ));
        assert!(matches!(
            SaveTarget::resolve(temp.path(), "/etc/img"),
            Err(EngineError::InvalidOutputPath(_))
        ));
        assert!(matches!(
            SaveTarget::resolve(temp.path(), "  "),
            Err(EngineError::InputInvalid(_))
        ));
        Ok(())
    }

    #[test]
    fn existing_counter_requires_digits_between_underscores() {
        assert_eq!(existing_counter("img_00042_.png", "img_"), Some(42));
        assert_eq!(existing_counter("img_00042.png", "img_"), None);
        assert_eq!(existing_counter("img__.png", "img_"), None);
        assert_eq!(existing_counter("image_00001_.png", "img_"), None);
    }
}
