use std::borrow::Cow;
use std::ffi::OsStr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Resolve a program name the way `execvp` will.
///
/// - Absolute path, or a relative path with more than one component: returned
///   if it is an executable file.
/// - Single component: each directory of `search_paths` is tried in order and
///   the first executable match wins.
/// - Empty path: `None`.
///
/// The launcher only uses this to tell the user which pager will run; the
/// child still performs its own lookup when it execs.
pub fn find_command_path<'a>(search_paths: &OsStr, path: &'a Path) -> Option<Cow<'a, Path>> {
    let mut components = path.components();
    match (components.next(), components.next()) {
        (None, _) => None,
        (Some(name), None) if !path.is_absolute() => {
            find_in_path(search_paths, name.as_os_str()).map(Cow::Owned)
        }
        _ => find_by_path(path).map(Cow::Borrowed),
    }
}

fn find_in_path(search_paths: &OsStr, cmd: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(search_paths)
        .map(|dir| dir.join(cmd))
        .find(|candidate| is_executable(candidate))
}

fn find_by_path(path: &Path) -> Option<&Path> {
    if is_executable(path) { Some(path) } else { None }
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};

    fn osstr(s: &str) -> &OsStr {
        OsStr::new(s)
    }

    fn install(path: &Path, mode: u32) {
        File::create(path).expect("create program");
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).expect("chmod");
    }

    #[test]
    fn absolute_existing() {
        let path = Path::new("/bin/sh");
        let found = find_command_path(osstr("/nowhere"), path)
            .expect("Expected to find /bin/sh via absolute path");
        assert_eq!(found.as_ref(), path);
    }

    #[test]
    fn absolute_nonexisting() {
        let res = find_command_path(osstr("/bin"), Path::new("/bin/nonexisting"));
        assert!(res.is_none());
    }

    #[test]
    fn single_component_found_in_first_matching_dir() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        install(&second.path().join("pager"), 0o755);

        let search = std::env::join_paths([first.path(), second.path()]).expect("join");
        let found = find_command_path(&search, Path::new("pager"))
            .expect("Expected to find 'pager' in the second directory");
        assert_eq!(found.as_ref(), second.path().join("pager"));

        install(&first.path().join("pager"), 0o755);
        let found = find_command_path(&search, Path::new("pager")).expect("found");
        assert_eq!(found.as_ref(), first.path().join("pager"));
    }

    #[test]
    fn single_component_not_found_in_path() {
        let res = find_command_path(osstr("/bin"), Path::new("nonexisting-pager"));
        assert!(res.is_none());
    }

    #[test]
    fn files_without_execute_bits_are_skipped() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        install(&first.path().join("pager"), 0o644);
        install(&second.path().join("pager"), 0o700);

        let search = std::env::join_paths([first.path(), second.path()]).expect("join");
        let found = find_command_path(&search, Path::new("pager")).expect("found");
        assert_eq!(found.as_ref(), second.path().join("pager"));

        let plain = first.path().join("pager");
        assert!(find_command_path(osstr("/nowhere"), &plain).is_none());
    }

    #[test]
    fn directories_are_not_programs() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("less")).expect("mkdir");
        let res = find_command_path(dir.path().as_os_str(), Path::new("less"));
        assert!(res.is_none());
    }

    #[test]
    fn empty_path_is_none() {
        let res = find_command_path(osstr("/bin"), Path::new(""));
        assert!(res.is_none());
    }
}
