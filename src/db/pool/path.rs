use std::path::{Path, PathBuf};

/// The in-memory sentinel: no files, no subdirectories.
pub const MEMORY_URL: &str = ":memory:";

/// Compute the on-disk location of a user's database.
///
/// Files fan out over a two-level directory tree derived from the last four
/// characters of the uid, reversed and grouped in twos: uid "1234567" lands
/// in `<base>/76/54/1234567.db`. Short uids use fewer levels; a single
/// character uid sits in the base directory itself.
pub fn db_path(base: &Path, uid: &str) -> PathBuf {
    let mut path = base.to_path_buf();
    if uid.len() >= 2 {
        let reversed: Vec<char> = uid.chars().rev().take(4).collect();
        for level in reversed.chunks(2) {
            path.push(level.iter().collect::<String>());
        }
    }
    path.push(format!("{}.db", uid));
    path
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::db_path;

    #[test]
    fn fans_out_two_levels() {
        let base = Path::new("/data");
        assert_eq!(db_path(base, "1234567"), Path::new("/data/76/54/1234567.db"));
        assert_eq!(db_path(base, "1234"), Path::new("/data/43/21/1234.db"));
    }

    #[test]
    fn short_uids() {
        let base = Path::new("/data");
        assert_eq!(db_path(base, "1"), Path::new("/data/1.db"));
        assert_eq!(db_path(base, "12"), Path::new("/data/21/12.db"));
        assert_eq!(db_path(base, "123"), Path::new("/data/32/1/123.db"));
    }
}
