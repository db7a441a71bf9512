//! Database schema definitions and well-known tree layout.
//!
//! All nodes live in one adjacency-list table keyed by id. See
//! `migrations/*.sql` for the DDL.

/// Name of the single root node.
pub const ROOT_NAME: &str = "/";

/// Path separator; never allowed inside a node name.
pub const SEPARATOR: char = '/';

/// Shared directory holding per-user home directories.
pub const HOME_DIR: &str = "home";

/// Shared directory writable by everyone.
pub const TMP_DIR: &str = "tmp";

/// Owner-less directories created under the root on first run.
pub const SYSTEM_DIRS: &[&str] = &["bin", "etc", HOME_DIR, TMP_DIR, "usr", "var"];

/// Name of the greeting file dropped into a new home directory.
pub const WELCOME_FILE: &str = "welcome.txt";

pub fn welcome_text(username: &str) -> String {
    format!(
        "Welcome to the Linux simulator!\n\
         \n\
         This is a simulated Linux filesystem where you can practice basic commands.\n\
         Try exploring the filesystem with commands like:\n\
         \x20 - ls     (list files)\n\
         \x20 - cd     (change directory)\n\
         \x20 - cat    (view file contents)\n\
         \x20 - mkdir  (create directory)\n\
         \x20 - touch  (create file)\n\
         \n\
         Your personal home directory is /home/{username}.\n\
         The /tmp directory is shared and writable by everyone.\n\
         \n\
         Have fun learning!"
    )
}
