//! Bootstrap helpers for mintbot.
//!
//! Secrets (bot token, API keys) usually live in `~/.mintbot/.env` so the
//! bot can be started from any working directory.
//!
//! File: `~/.mintbot/.env` (standard dotenvy format)

use std::path::PathBuf;

/// Base directory for mintbot state: `~/.mintbot`.
pub fn mintbot_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mintbot")
}

/// Path to the mintbot-specific `.env` file: `~/.mintbot/.env`.
pub fn mintbot_env_path() -> PathBuf {
    mintbot_home().join(".env")
}

/// Load env vars from `~/.mintbot/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that the standard `./.env`
/// takes priority. dotenvy never overwrites existing env vars, so the
/// effective priority is:
///
///   explicit env vars > `./.env` > `~/.mintbot/.env`
pub fn load_mintbot_env() {
    load_env_file(&mintbot_env_path());
}

fn load_env_file(path: &std::path::Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dotenvy::from_path(path) {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mintbot_env_path() {
        let path = mintbot_env_path();
        assert!(path.ends_with(".mintbot/.env"));
    }

    #[test]
    fn test_load_env_file_does_not_override_existing_vars() {
        let dir = tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(
            &env_path,
            "MINTBOT_BOOTSTRAP_TEST_A=\"from-file\"\nMINTBOT_BOOTSTRAP_TEST_B=\"p#ss\"\n",
        )
        .unwrap();

        // SAFETY: variable names are unique to this test.
        unsafe {
            std::env::set_var("MINTBOT_BOOTSTRAP_TEST_A", "explicit");
        }

        load_env_file(&env_path);

        assert_eq!(std::env::var("MINTBOT_BOOTSTRAP_TEST_A").unwrap(), "explicit");
        assert_eq!(std::env::var("MINTBOT_BOOTSTRAP_TEST_B").unwrap(), "p#ss");
    }

    #[test]
    fn test_load_env_file_missing_is_noop() {
        let dir = tempdir().unwrap();
        load_env_file(&dir.path().join("absent.env"));
    }
}
