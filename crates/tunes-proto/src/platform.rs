use std::path::{Path, PathBuf};

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/tunes/ (XDG standard)
    // instead of macOS Application Support for consistency
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join("tunes")
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunes")
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join("tunes")
    }

    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tunes")
    }
}

pub fn log_path() -> PathBuf {
    data_dir().join("tunes.log")
}

pub fn default_library_dir() -> PathBuf {
    data_dir().join("library")
}

#[cfg(unix)]
fn player_binary_names(command: &str) -> Vec<String> {
    vec![command.to_string()]
}

#[cfg(windows)]
fn player_binary_names(command: &str) -> Vec<String> {
    vec![format!("{}.exe", command), command.to_string()]
}

fn find_on_path(names: &[String]) -> Option<PathBuf> {
    let path = std::env::var("PATH").ok()?;
    #[cfg(unix)]
    let sep = ":";
    #[cfg(windows)]
    let sep = ";";
    for dir in path.split(sep) {
        for name in names {
            let p = PathBuf::from(dir).join(name);
            if p.exists() {
                return Some(p);
            }
        }
    }
    None
}

/// Resolve the external player binary.
///
/// A command containing a path separator is used as-is when it exists;
/// otherwise it is looked up beside the current executable, then on PATH.
pub fn find_player_binary(command: &str) -> Option<PathBuf> {
    let direct = Path::new(command);
    if direct.components().count() > 1 {
        return direct.exists().then(|| direct.to_path_buf());
    }

    let names = player_binary_names(command);
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(dir) = current_exe.parent() {
            for name in &names {
                let local = dir.join(name);
                if local.exists() {
                    return Some(local);
                }
            }
        }
    }

    find_on_path(&names)
}
